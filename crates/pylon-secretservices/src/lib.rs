//! Higher-level secret-manager-backed lifecycles built on [`pylon_secretclient`]:
//! SSH-config storage with TOFU, declarative object-store user provisioning,
//! and RKE2 cluster credential persistence.

pub mod objectstore;
pub mod rke2creds;
pub mod ssh;

use base64::Engine as _;
use rand::RngCore;

/// Failure in any secret-services lifecycle operation.
#[derive(Debug, thiserror::Error)]
pub enum SecretServicesError {
    #[error("secret client error: {0}")]
    SecretClient(#[from] pylon_secretclient::SecretClientError),
    #[error("ssh handshake error: {0}")]
    Ssh(#[from] pylon_sshcore::SshError),
    #[error("json decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ssh config at {path} has expired and was removed")]
    Expired { path: String },
    #[error("ssh config at {path} already has pinned host keys; aborting TOFU")]
    AlreadyPinned { path: String },
    #[error("no ssh config found at {path} to delete")]
    NothingToDelete { path: String },
    #[error("iac driver error: {0}")]
    IacDriver(#[from] pylon_iacdriver::IacDriverError),
    #[error("k8s api error: {0}")]
    K8sApi(#[from] pylon_k8sapi::K8sApiError),
    #[error("object store admin error: {0}")]
    ObjectStoreAdmin(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("no existing root credential found at {path}, cannot rotate")]
    NoRootCredential { path: String },
    #[error("deployment validation failed: {0}")]
    Deployment(#[from] pylon_models::storeauth::DeploymentError),
    #[error("invalid provisioning backend reference: {0}")]
    BackendRef(#[from] pylon_models::provisioning::BackendRefError),
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// A URL-safe, unpadded base64 string decoded from `len` random bytes —
/// mirrors Python's `secrets.token_urlsafe(len)`.
fn random_urlsafe_secret(len: usize) -> String {
    let mut bytes = vec![0_u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
