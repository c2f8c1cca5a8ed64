//! Async client for a Vault-compatible secret manager.
//!
//! Handles Kubernetes-auth login/renewal, KV v2 CRUD, transit
//! encryption-as-a-service, and policy/role provisioning for the
//! Kubernetes-auth method. One [`SecretClient`] wraps one reusable
//! `reqwest::Client` and serializes its own token refresh so concurrent
//! callers never trigger concurrent logins.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use pylon_models::config::SecretClientConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

/// Failure talking to, or authenticating against, the secret manager.
#[derive(Debug, thiserror::Error)]
pub enum SecretClientError {
    #[error("failed to read JWT at {path}: {source}")]
    ReadToken {
        path: String,
        source: std::io::Error,
    },
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("secret manager returned 404 for {path}")]
    NotFound { path: String },
    #[error("unexpected status {status} from {url}: {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[error("no token available after login/renewal")]
    TokenUnavailable,
    #[error("failed to decode response JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SecretClientError {
    /// `true` for [`SecretClientError::NotFound`] — mirrors the source's
    /// `"404" in str(exc)` sniffing, as a typed check instead of a string one.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Clone, Default)]
struct TokenState {
    client_token: Option<String>,
    last_check: Option<Instant>,
}

/// A Vault-compatible secret manager client.
pub struct SecretClient {
    http: reqwest::Client,
    config: SecretClientConfig,
    state: Mutex<TokenState>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct LookupSelfResponse {
    data: LookupSelfData,
}

#[derive(Debug, Deserialize)]
struct LookupSelfData {
    ttl: i64,
}

impl SecretClient {
    /// Builds a client from `config`. Does not perform any I/O — the first
    /// operation triggers login.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::Request`] if the underlying HTTP client
    /// cannot be constructed (e.g. `verify_ssl = false` combined with an
    /// unsupported TLS backend).
    pub fn new(config: SecretClientConfig) -> Result<Self, SecretClientError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|source| SecretClientError::Request {
                url: config.vault_addr.clone(),
                source,
            })?;

        Ok(Self {
            http,
            config,
            state: Mutex::new(TokenState::default()),
        })
    }

    /// No-op provided for symmetry with the source's context-manager
    /// lifecycle; `reqwest::Client` pools and closes its own connections.
    pub async fn shutdown(&self) {}

    async fn ensure_valid_token(&self) -> Result<String, SecretClientError> {
        let mut state = self.state.lock().await;

        if state.client_token.is_none() {
            let token = self.login().await?;
            state.client_token = Some(token);
            state.last_check = Some(Instant::now());
            return Ok(state.client_token.clone().unwrap_or_default());
        }

        let due = state
            .last_check
            .map(|t| t.elapsed() >= self.config.check_interval())
            .unwrap_or(true);

        if due {
            match self.lookup_self(state.client_token.as_deref().unwrap_or_default()).await {
                Ok(ttl) if ttl >= self.config.renew_threshold_seconds => {
                    state.last_check = Some(Instant::now());
                }
                Ok(_) => match self.renew_self(state.client_token.as_deref().unwrap_or_default()).await {
                    Ok(new_token) => {
                        state.client_token = Some(new_token);
                        state.last_check = Some(Instant::now());
                    }
                    Err(_) => {
                        let token = self.login().await?;
                        state.client_token = Some(token);
                        state.last_check = Some(Instant::now());
                    }
                },
                Err(SecretClientError::UnexpectedStatus { status, .. }) if status == 403 => {
                    let token = self.login().await?;
                    state.client_token = Some(token);
                    state.last_check = Some(Instant::now());
                }
                Err(err) => return Err(err),
            }
        }

        state.client_token.clone().ok_or(SecretClientError::TokenUnavailable)
    }

    async fn login(&self) -> Result<String, SecretClientError> {
        let jwt = tokio::fs::read_to_string(&self.config.token_path)
            .await
            .map_err(|source| SecretClientError::ReadToken {
                path: self.config.token_path.clone(),
                source,
            })?;

        let url = format!("{}/v1/auth/kubernetes/login", self.config.vault_addr);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "jwt": jwt.trim(), "role": self.config.vault_role_name }))
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        let body: LoginResponse = response.json().await.map_err(|source| {
            SecretClientError::Request { url, source }
        })?;
        Ok(body.auth.client_token)
    }

    async fn lookup_self(&self, token: &str) -> Result<i64, SecretClientError> {
        let url = format!("{}/v1/auth/token/lookup-self", self.config.vault_addr);
        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        let body: LookupSelfResponse = response
            .json()
            .await
            .map_err(|source| SecretClientError::Request { url, source })?;
        Ok(body.data.ttl)
    }

    async fn renew_self(&self, token: &str) -> Result<String, SecretClientError> {
        let url = format!("{}/v1/auth/token/renew-self", self.config.vault_addr);
        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        let body: LoginResponse = response.json().await.map_err(|source| {
            SecretClientError::Request { url, source }
        })?;
        Ok(body.auth.client_token)
    }

    /// Revokes the current token and returns to the unauthenticated state.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::Request`]/[`SecretClientError::UnexpectedStatus`]
    /// on transport or server failure.
    pub async fn revoke_self_token(&self) -> Result<(), SecretClientError> {
        let mut state = self.state.lock().await;
        let Some(token) = state.client_token.clone() else {
            return Ok(());
        };

        let url = format!("{}/v1/auth/token/revoke-self", self.config.vault_addr);
        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &token)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        state.client_token = None;
        state.last_check = None;
        Ok(())
    }

    // ── KV v2 ────────────────────────────────────────────────────────

    /// Reads a secret from `secret/data/<path>`, returning the inner
    /// `data.data` map (or the whole payload if that field is absent).
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::NotFound`] on a 404, or
    /// [`SecretClientError::UnexpectedStatus`] for any other non-2xx.
    pub async fn read_secret(&self, path: &str) -> Result<Value, SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/secret/data/{path}", self.config.vault_addr);

        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", &token)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if response.status().as_u16() == 404 {
            return Err(SecretClientError::NotFound { path: path.to_owned() });
        }
        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        let body: Value = response.json().await.map_err(|source| SecretClientError::Request { url, source })?;
        Ok(body
            .get("data")
            .and_then(|d| d.get("data"))
            .filter(Value::is_object)
            .cloned()
            .unwrap_or(body))
    }

    /// Writes `data` to `secret/data/<path>`.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any non-2xx
    /// response.
    pub async fn write_secret(&self, path: &str, data: &Value) -> Result<(), SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/secret/data/{path}", self.config.vault_addr);

        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &token)
            .json(&json!({ "data": data }))
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }
        Ok(())
    }

    /// Writes `data` only if it differs from the current contents at
    /// `path`, avoiding a version bump for no-op writes.
    ///
    /// Returns whether a write actually happened.
    ///
    /// # Errors
    ///
    /// Propagates [`SecretClient::read_secret`] / [`SecretClient::write_secret`]
    /// errors other than [`SecretClientError::NotFound`].
    pub async fn write_secret_idempotent(
        &self,
        path: &str,
        data: &Value,
    ) -> Result<bool, SecretClientError> {
        let existing = match self.read_secret(path).await {
            Ok(value) => Some(value),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        if existing.as_ref() == Some(data) {
            return Ok(false);
        }
        self.write_secret(path, data).await?;
        Ok(true)
    }

    /// Lists immediate child keys under `path` via
    /// `secret/metadata/<path>?list=true`. A 404 yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any non-2xx,
    /// non-404 response.
    pub async fn list_secrets(&self, path: &str) -> Result<Vec<String>, SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let path = if path.ends_with('/') {
            path.to_owned()
        } else {
            format!("{path}/")
        };
        let url = format!("{}/v1/secret/metadata/{path}?list=true", self.config.vault_addr);

        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", &token)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        let body: Value = response.json().await.map_err(|source| SecretClientError::Request { url, source })?;
        Ok(body
            .get("data")
            .and_then(|d| d.get("keys"))
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| k.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Deletes a secret: soft (`secret/data/<path>`, keeps version history)
    /// or hard (`secret/metadata/<path>`, wipes it entirely).
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any response
    /// other than 200, 204, or 404.
    pub async fn delete_secret(&self, path: &str, hard: bool) -> Result<(), SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = if hard {
            format!("{}/v1/secret/metadata/{path}", self.config.vault_addr)
        } else {
            format!("{}/v1/secret/data/{path}", self.config.vault_addr)
        };

        let response = self
            .http
            .delete(&url)
            .header("X-Vault-Token", &token)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        let status = response.status().as_u16();
        if status != 200 && status != 204 && status != 404 {
            return Err(unexpected_status(&url, response).await);
        }
        Ok(())
    }

    /// Returns the raw metadata document for a KV v2 secret (version
    /// history, `deletion_time` per version). Returns an empty object on
    /// 404.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any other
    /// non-2xx response.
    pub async fn secret_history(&self, path: &str) -> Result<Value, SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/secret/metadata/{path}", self.config.vault_addr);

        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", &token)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if response.status().as_u16() == 404 {
            return Ok(json!({}));
        }
        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        response
            .json()
            .await
            .map_err(|source| SecretClientError::Request { url, source })
    }

    // ── Transit ──────────────────────────────────────────────────────

    /// Creates a transit key named `name` if it does not already exist.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any failure
    /// other than an already-exists conflict.
    pub async fn write_transit_key(&self, name: &str) -> Result<(), SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/transit/keys/{name}", self.config.vault_addr);

        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &token)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        let status = response.status().as_u16();
        if response.status().is_success() || status == 400 {
            return Ok(());
        }
        Err(unexpected_status(&url, response).await)
    }

    /// Encrypts `plaintext` under transit key `name`, returning the
    /// server's opaque ciphertext string.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any non-2xx
    /// response.
    pub async fn encrypt_transit_data(
        &self,
        name: &str,
        plaintext: &[u8],
    ) -> Result<String, SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/transit/encrypt/{name}", self.config.vault_addr);
        let encoded = base64_encode(plaintext);

        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &token)
            .json(&json!({ "plaintext": encoded }))
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        let body: Value = response.json().await.map_err(|source| SecretClientError::Request { url, source })?;
        Ok(body
            .get("data")
            .and_then(|d| d.get("ciphertext"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned())
    }

    /// Decrypts an `encrypt_transit_data`-produced ciphertext string.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any non-2xx
    /// response.
    pub async fn decrypt_transit_data(
        &self,
        name: &str,
        ciphertext: &str,
    ) -> Result<Vec<u8>, SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/transit/decrypt/{name}", self.config.vault_addr);

        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &token)
            .json(&json!({ "ciphertext": ciphertext }))
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        let body: Value = response.json().await.map_err(|source| SecretClientError::Request { url, source })?;
        let encoded = body
            .get("data")
            .and_then(|d| d.get("plaintext"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(base64_decode(encoded))
    }

    // ── Policy / role provisioning ───────────────────────────────────

    /// Grants read-on-data + list-on-metadata under `kv_subpath` to a new
    /// ACL policy named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any non-2xx
    /// response.
    pub async fn create_read_only_policy(
        &self,
        name: &str,
        kv_subpath: &str,
    ) -> Result<(), SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/sys/policies/acl/{name}", self.config.vault_addr);
        let policy = json!({
            "policy": format!(
                "path \"secret/data/{kv_subpath}\" {{ capabilities = [\"read\"] }}\n\
                 path \"secret/metadata/{kv_subpath}\" {{ capabilities = [\"list\"] }}"
            )
        });

        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &token)
            .json(&policy)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }
        Ok(())
    }

    /// Removes an ACL policy, tolerating a 404.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any response
    /// other than 200, 204, or 404.
    pub async fn delete_policy(&self, name: &str) -> Result<(), SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/sys/policies/acl/{name}", self.config.vault_addr);
        self.delete_tolerating_404(&url, &token).await
    }

    /// Binds `bound_service_account_names`/`namespaces` to `policies` under
    /// a Kubernetes-auth role named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any non-2xx
    /// response.
    pub async fn create_k8s_role(
        &self,
        name: &str,
        bound_service_account_names: &[String],
        bound_service_account_namespaces: &[String],
        policies: &[String],
        ttl: &str,
    ) -> Result<(), SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/auth/kubernetes/role/{name}", self.config.vault_addr);

        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &token)
            .json(&json!({
                "bound_service_account_names": bound_service_account_names,
                "bound_service_account_namespaces": bound_service_account_namespaces,
                "policies": policies,
                "ttl": ttl,
            }))
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.clone(), source })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }
        Ok(())
    }

    /// Removes a Kubernetes-auth role, tolerating a 404.
    ///
    /// # Errors
    ///
    /// Returns [`SecretClientError::UnexpectedStatus`] for any response
    /// other than 200, 204, or 404.
    pub async fn delete_k8s_role(&self, name: &str) -> Result<(), SecretClientError> {
        let token = self.ensure_valid_token().await?;
        let url = format!("{}/v1/auth/kubernetes/role/{name}", self.config.vault_addr);
        self.delete_tolerating_404(&url, &token).await
    }

    async fn delete_tolerating_404(
        &self,
        url: &str,
        token: &str,
    ) -> Result<(), SecretClientError> {
        let response = self
            .http
            .delete(url)
            .header("X-Vault-Token", token)
            .send()
            .await
            .map_err(|source| SecretClientError::Request { url: url.to_owned(), source })?;

        let status = response.status().as_u16();
        if status != 200 && status != 204 && status != 404 {
            return Err(unexpected_status(url, response).await);
        }
        Ok(())
    }
}

async fn unexpected_status(url: &str, response: reqwest::Response) -> SecretClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SecretClientError::UnexpectedStatus {
        url: url.to_owned(),
        status,
        body,
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(encoded: &str) -> Vec<u8> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap_or_default()
}

/// The outcome of an idempotent secret write, mirroring the source's
/// `{"changed": bool}` return shape where callers want it structured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteOutcome {
    pub changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(addr: &str) -> SecretClientConfig {
        SecretClientConfig {
            vault_role_name: "role".to_owned(),
            vault_addr: addr.to_owned(),
            token_path: "/dev/null".to_owned(),
            verify_ssl: true,
            renew_threshold_seconds: 60.0,
            check_interval_seconds: 60.0,
        }
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/kubernetes/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": { "client_token": "test-token" }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn read_secret_unwraps_nested_data() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/app/db"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "data": { "password": "hunter2" } }
            })))
            .mount(&server)
            .await;

        let client = SecretClient::new(config(&server.uri())).unwrap();
        let secret = client.read_secret("app/db").await.unwrap();
        assert_eq!(secret["password"], "hunter2");
    }

    #[tokio::test]
    async fn read_secret_missing_returns_not_found() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SecretClient::new(config(&server.uri())).unwrap();
        let err = client.read_secret("app/missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn list_secrets_returns_empty_on_404() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SecretClient::new(config(&server.uri())).unwrap();
        let keys = client.list_secrets("app/").await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn write_secret_idempotent_skips_unchanged_write() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/app/db"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "data": { "a": 1 } }
            })))
            .mount(&server)
            .await;

        let client = SecretClient::new(config(&server.uri())).unwrap();
        let changed = client
            .write_secret_idempotent("app/db", &json!({ "a": 1 }))
            .await
            .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn transit_encrypt_decrypt_roundtrip_against_mock() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/transit/encrypt/mykey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "ciphertext": "vault:v1:opaque" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transit/decrypt/mykey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "plaintext": base64_encode(b"secret bytes") }
            })))
            .mount(&server)
            .await;

        let client = SecretClient::new(config(&server.uri())).unwrap();
        let ciphertext = client.encrypt_transit_data("mykey", b"secret bytes").await.unwrap();
        assert_eq!(ciphertext, "vault:v1:opaque");
        let plaintext = client.decrypt_transit_data("mykey", &ciphertext).await.unwrap();
        assert_eq!(plaintext, b"secret bytes");
    }
}
