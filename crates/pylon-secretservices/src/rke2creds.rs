//! Persistence of [`Rke2Credentials`] produced by a completed cluster
//! deployment.

use pylon_models::rke2::Rke2Credentials;
use pylon_secretclient::SecretClient;

use crate::SecretServicesError;

/// Writes `creds` to `path`, skipping the write if the stored value is
/// already identical.
///
/// # Errors
///
/// Returns [`SecretServicesError::SecretClient`] on a transport failure.
pub async fn save(secret_client: &SecretClient, path: &str, creds: &Rke2Credentials) -> Result<(), SecretServicesError> {
    secret_client
        .write_secret_idempotent(path, &serde_json::to_value(creds)?)
        .await?;
    Ok(())
}

/// Reads and validates the [`Rke2Credentials`] stored at `path`.
///
/// # Errors
///
/// Returns [`SecretServicesError::SecretClient`] if nothing is stored, or
/// [`SecretServicesError::Json`] if the stored value doesn't match the
/// expected shape.
pub async fn load(secret_client: &SecretClient, path: &str) -> Result<Rke2Credentials, SecretServicesError> {
    let raw = secret_client.read_secret(path).await?;
    Ok(serde_json::from_value(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_models::config::SecretClientConfig;
    use wiremock::matchers::{method, path as path_matcher};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_against(server: &MockServer) -> SecretClient {
        Mock::given(method("POST"))
            .and(path_matcher("/v1/auth/kubernetes/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "auth": { "client_token": "tok", "lease_duration": 3600 }
            })))
            .mount(server)
            .await;

        SecretClient::new(SecretClientConfig {
            vault_role_name: "role".to_owned(),
            vault_addr: server.uri(),
            token_path: "/dev/null".to_owned(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let server = MockServer::start().await;
        let client = client_against(&server).await;

        let creds = Rke2Credentials {
            kubeconfig: "apiVersion: v1".to_owned(),
            join_token: "tok".to_owned(),
            control_plane_ssh_vault_path: vec!["ssh/cp-0".to_owned()],
        };

        Mock::given(method("GET"))
            .and(path_matcher("/v1/secret/data/rke2/creds"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_matcher("/v1/secret/data/rke2/creds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {}})))
            .mount(&server)
            .await;

        save(&client, "rke2/creds", &creds).await.unwrap();
    }

    #[tokio::test]
    async fn load_decodes_stored_payload() {
        let server = MockServer::start().await;
        let client = client_against(&server).await;

        let creds = Rke2Credentials {
            kubeconfig: "apiVersion: v1".to_owned(),
            join_token: "tok".to_owned(),
            control_plane_ssh_vault_path: vec!["ssh/cp-0".to_owned()],
        };

        Mock::given(method("GET"))
            .and(path_matcher("/v1/secret/data/rke2/creds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "data": creds }
            })))
            .mount(&server)
            .await;

        let loaded = load(&client, "rke2/creds").await.unwrap();
        assert_eq!(loaded.join_token, "tok");
    }
}
