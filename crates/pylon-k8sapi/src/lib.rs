//! Minimal in-cluster Kubernetes REST client.
//!
//! Backs [`pylon-statestore`](../pylon_statestore)'s k8s-secret backend and
//! object-store service-account enumeration. Not a general-purpose client —
//! it knows exactly two things: one secret's data map, and the list of all
//! service accounts in the cluster.
//!
//! Configuration is in-cluster only: bearer token and CA bundle from the
//! standard service-account mount, API server host/port from the
//! `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT` environment
//! variables that the kubelet always injects into pods.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use pylon_models::storeauth::ServiceAccountRef;
use serde::{Deserialize, Serialize};

const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const DEFAULT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Failure configuring or talking to the Kubernetes API server.
#[derive(Debug, thiserror::Error)]
pub enum K8sApiError {
    #[error("failed to read service account token at {path}: {source}")]
    ReadToken {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read CA bundle at {path}: {source}")]
    ReadCaBundle {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("KUBERNETES_SERVICE_HOST is not set — not running in-cluster")]
    NotInCluster,
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("unexpected status {status} from {url}: {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[error("secret data key {key} is not valid base64: {source}")]
    Decode {
        key: String,
        source: base64::DecodeError,
    },
}

/// In-cluster connection details, loaded once at client construction.
#[derive(Debug, Clone)]
struct InClusterConfig {
    api_server: String,
    token: String,
    ca_bundle: Vec<u8>,
}

impl InClusterConfig {
    fn load() -> Result<Self, K8sApiError> {
        Self::load_from(Path::new(DEFAULT_TOKEN_PATH), Path::new(DEFAULT_CA_PATH))
    }

    fn load_from(token_path: &Path, ca_path: &Path) -> Result<Self, K8sApiError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| K8sApiError::NotInCluster)?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_owned());

        let token =
            std::fs::read_to_string(token_path).map_err(|source| K8sApiError::ReadToken {
                path: token_path.to_path_buf(),
                source,
            })?;
        let ca_bundle =
            std::fs::read(ca_path).map_err(|source| K8sApiError::ReadCaBundle {
                path: ca_path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            api_server: format!("https://{host}:{port}"),
            token: token.trim().to_owned(),
            ca_bundle,
        })
    }
}

/// A minimal Kubernetes API client.
pub struct K8sApiClient {
    http: reqwest::Client,
    api_server: String,
    token: String,
}

/// The `data` map of a Kubernetes `Secret`, base64-decoded.
pub type SecretData = HashMap<String, Vec<u8>>;

#[derive(Debug, Serialize, Deserialize)]
struct SecretResource {
    #[serde(rename = "apiVersion", default = "secret_api_version")]
    api_version: String,
    #[serde(default = "secret_kind")]
    kind: String,
    metadata: SecretMetadata,
    #[serde(default)]
    data: HashMap<String, String>,
}

fn secret_api_version() -> String {
    "v1".to_owned()
}

fn secret_kind() -> String {
    "Secret".to_owned()
}

#[derive(Debug, Serialize, Deserialize)]
struct SecretMetadata {
    name: String,
    namespace: String,
}

#[derive(Debug, Deserialize)]
struct ServiceAccountList {
    items: Vec<ServiceAccountItem>,
}

#[derive(Debug, Deserialize)]
struct ServiceAccountItem {
    metadata: SecretMetadata,
}

impl K8sApiClient {
    /// Builds a client from the standard in-cluster service-account mount.
    ///
    /// # Errors
    ///
    /// Returns [`K8sApiError::NotInCluster`] if `KUBERNETES_SERVICE_HOST` is
    /// unset, [`K8sApiError::ReadToken`] / [`K8sApiError::ReadCaBundle`] if
    /// the mounted files cannot be read, or [`K8sApiError::ClientBuild`] if
    /// the CA bundle cannot be parsed.
    pub fn from_in_cluster_config() -> Result<Self, K8sApiError> {
        let config = InClusterConfig::load()?;
        Self::from_config(config)
    }

    fn from_config(config: InClusterConfig) -> Result<Self, K8sApiError> {
        let cert = reqwest::Certificate::from_pem(&config.ca_bundle)
            .map_err(K8sApiError::ClientBuild)?;
        let http = reqwest::Client::builder()
            .add_root_certificate(cert)
            .build()
            .map_err(K8sApiError::ClientBuild)?;

        Ok(Self {
            http,
            api_server: config.api_server,
            token: config.token,
        })
    }

    /// Reads one secret's `data` map, base64-decoded.
    ///
    /// Returns `Ok(None)` if the secret does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`K8sApiError::Request`] on transport failure, or
    /// [`K8sApiError::UnexpectedStatus`] for any response other than 200 or
    /// 404.
    pub async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretData>, K8sApiError> {
        let url = format!(
            "{}/api/v1/namespaces/{namespace}/secrets/{name}",
            self.api_server
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| K8sApiError::Request {
                url: url.clone(),
                source,
            })?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        let resource: SecretResource = response
            .json()
            .await
            .map_err(|source| K8sApiError::Request { url, source })?;

        decode_secret_data(&resource.data).map(Some)
    }

    /// Creates or replaces one secret's `data` map (values base64-encoded
    /// on the wire, plaintext in `data` here).
    ///
    /// # Errors
    ///
    /// Returns [`K8sApiError::Request`] on transport failure, or
    /// [`K8sApiError::UnexpectedStatus`] for a non-2xx response.
    pub async fn put_secret_data(
        &self,
        namespace: &str,
        name: &str,
        data: &SecretData,
    ) -> Result<(), K8sApiError> {
        let url = format!(
            "{}/api/v1/namespaces/{namespace}/secrets/{name}",
            self.api_server
        );
        let body = SecretResource {
            api_version: secret_api_version(),
            kind: secret_kind(),
            metadata: SecretMetadata {
                name: name.to_owned(),
                namespace: namespace.to_owned(),
            },
            data: encode_secret_data(data),
        };

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|source| K8sApiError::Request {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }
        Ok(())
    }

    /// Lists every service account across all namespaces.
    ///
    /// # Errors
    ///
    /// Returns [`K8sApiError::Request`] on transport failure, or
    /// [`K8sApiError::UnexpectedStatus`] for a non-2xx response.
    pub async fn list_service_accounts(&self) -> Result<Vec<ServiceAccountRef>, K8sApiError> {
        let url = format!("{}/api/v1/serviceaccounts", self.api_server);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| K8sApiError::Request {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(unexpected_status(&url, response).await);
        }

        let list: ServiceAccountList = response
            .json()
            .await
            .map_err(|source| K8sApiError::Request { url, source })?;

        Ok(list
            .items
            .into_iter()
            .map(|item| ServiceAccountRef {
                namespace: item.metadata.namespace,
                name: item.metadata.name,
            })
            .collect())
    }
}

async fn unexpected_status(url: &str, response: reqwest::Response) -> K8sApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    K8sApiError::UnexpectedStatus {
        url: url.to_owned(),
        status,
        body,
    }
}

fn decode_secret_data(data: &HashMap<String, String>) -> Result<SecretData, K8sApiError> {
    let mut decoded = HashMap::with_capacity(data.len());
    for (key, value) in data {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(value)
            .map_err(|source| K8sApiError::Decode {
                key: key.clone(),
                source,
            })?;
        decoded.insert(key.clone(), bytes);
    }
    Ok(decoded)
}

fn encode_secret_data(data: &SecretData) -> HashMap<String, String> {
    data.iter()
        .map(|(key, value)| {
            (
                key.clone(),
                base64::engine::general_purpose::STANDARD.encode(value),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_roundtrips() {
        let mut data = SecretData::new();
        data.insert("ciphertext".to_owned(), b"hello world".to_vec());

        let encoded = encode_secret_data(&data);
        let decoded = decode_secret_data(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[tokio::test]
    async fn get_secret_data_returns_none_on_404() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = K8sApiClient {
            http: reqwest::Client::new(),
            api_server: server.uri(),
            token: "fake-token".to_owned(),
        };

        let result = client.get_secret_data("ns", "name").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn list_service_accounts_parses_items() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/api/v1/serviceaccounts"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(
                serde_json::json!({
                    "items": [
                        {"metadata": {"name": "default", "namespace": "ns-a"}},
                        {"metadata": {"name": "worker", "namespace": "ns-b"}},
                    ]
                }),
            ))
            .mount(&server)
            .await;

        let client = K8sApiClient {
            http: reqwest::Client::new(),
            api_server: server.uri(),
            token: "fake-token".to_owned(),
        };

        let accounts = client.list_service_accounts().await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].namespace, "ns-a");
    }

    #[tokio::test]
    async fn put_then_get_secret_data_roundtrips_against_mock() {
        let server = wiremock::MockServer::start().await;
        let mut stored = SecretData::new();
        stored.insert("ciphertext".to_owned(), b"payload".to_vec());
        let encoded = encode_secret_data(&stored);

        wiremock::Mock::given(wiremock::matchers::method("PUT"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(
                serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": {"name": "n", "namespace": "ns"},
                    "data": encoded,
                }),
            ))
            .mount(&server)
            .await;

        let client = K8sApiClient {
            http: reqwest::Client::new(),
            api_server: server.uri(),
            token: "fake-token".to_owned(),
        };

        client.put_secret_data("ns", "n", &stored).await.unwrap();
        let fetched = client.get_secret_data("ns", "n").await.unwrap().unwrap();
        assert_eq!(fetched, stored);
    }
}
