//! Password-based authenticated encryption for structured secret payloads.
//!
//! [`encrypt`] serializes a `serde::Serialize` value to JSON, derives a
//! 256-bit key from a password via PBKDF2-HMAC-SHA256 with a fresh 16-byte
//! salt and 100,000 iterations, and AES-256-GCM encrypts the result with a
//! fresh 12-byte nonce. The output layout is `salt || nonce || ciphertext +
//! tag`. [`decrypt`] reverses this and deserializes back to a caller-chosen
//! type. No additional authenticated data is used; any tampering surfaces as
//! [`CryptoBoxError::Decryption`].

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::{de::DeserializeOwned, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENVELOPE_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Failure encrypting or decrypting a password-protected payload.
#[derive(Debug, thiserror::Error)]
pub enum CryptoBoxError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },
}

/// A 256-bit key derived from a password, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct DerivedKey([u8; 32]);

fn derive_key(password: &[u8], salt: &[u8; SALT_LEN]) -> Result<DerivedKey, CryptoBoxError> {
    let mut bytes = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password, salt, PBKDF2_ITERATIONS, &mut bytes);
    Ok(DerivedKey(bytes))
}

/// Serializes `value` to JSON and encrypts it under `password`.
///
/// Returns `salt (16 bytes) || nonce (12 bytes) || ciphertext + tag`.
///
/// # Errors
///
/// Returns [`CryptoBoxError::Serialize`] if `value` cannot be serialized, or
/// [`CryptoBoxError::Encryption`] if the AEAD operation fails.
pub fn encrypt<T: Serialize>(value: &T, password: &str) -> Result<Vec<u8>, CryptoBoxError> {
    let plaintext = serde_json::to_vec(value)?;

    let mut salt = [0u8; SALT_LEN];
    rand::Rng::fill(&mut rand::thread_rng(), &mut salt);
    let key = derive_key(password.as_bytes(), &salt)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext =
        cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| CryptoBoxError::Encryption {
                reason: e.to_string(),
            })?;

    let mut envelope = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Reverses [`encrypt`], deserializing the recovered plaintext into `T`.
///
/// # Errors
///
/// Returns [`CryptoBoxError::CiphertextTooShort`] if `envelope` is shorter
/// than the minimum salt + nonce + tag length.
///
/// Returns [`CryptoBoxError::Decryption`] if authentication fails — wrong
/// password, corrupted data, or a tampered tag.
///
/// Returns [`CryptoBoxError::Serialize`] if the recovered plaintext is not
/// valid JSON for `T`.
pub fn decrypt<T: DeserializeOwned>(envelope: &[u8], password: &str) -> Result<T, CryptoBoxError> {
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(CryptoBoxError::CiphertextTooShort {
            expected: MIN_ENVELOPE_LEN,
            actual: envelope.len(),
        });
    }

    let (salt_bytes, rest) = envelope.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(salt_bytes);
    let key = derive_key(password.as_bytes(), &salt)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoBoxError::Decryption {
            reason: e.to_string(),
        })?;

    Ok(serde_json::from_slice(&plaintext)?)
}
