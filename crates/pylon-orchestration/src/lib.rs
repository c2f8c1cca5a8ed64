//! Resolves a stored provider credential into the environment its
//! provisioning-tool plugin expects, then drives [`pylon_iacdriver`]
//! against that provider's root module.

use std::collections::HashMap;

use pylon_iacdriver::{IacDriver, IacDriverConfig};
use pylon_models::provider::ProviderCredential;
use pylon_models::provisioning::ProvisioningBackendRef;
use pylon_secretclient::SecretClient;
use pylon_statestore::{ObjectStoreClient, StateStorage};

/// Failure resolving a provider credential or driving its deployment.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("secret client error: {0}")]
    SecretClient(#[from] pylon_secretclient::SecretClientError),
    #[error("stored credential did not match any known provider shape: {0}")]
    Json(#[from] serde_json::Error),
    #[error("iac driver error: {0}")]
    IacDriver(#[from] pylon_iacdriver::IacDriverError),
    #[error("invalid provisioning backend reference: {0}")]
    BackendRef(#[from] pylon_models::provisioning::BackendRefError),
}

/// Reads the credential stored at `path`, decodes it as `provider`'s
/// [`ProviderCredential`] variant, and derives the environment its
/// provisioning-tool plugin expects.
///
/// # Errors
///
/// Returns [`OrchestrationError::SecretClient`] if nothing is stored at
/// `path`, or [`OrchestrationError::Json`] if it doesn't decode into a
/// [`ProviderCredential`].
pub async fn provider_env(secret_client: &SecretClient, path: &str) -> Result<HashMap<String, String>, OrchestrationError> {
    let raw = secret_client.read_secret(path).await?;
    let credential: ProviderCredential = serde_json::from_value(raw)?;
    Ok(credential.to_env_map()?.into_iter().collect())
}

/// Resolves `credentials_path`'s provider credential, then runs
/// `iacdriver` init + apply (or destroy, if `destroy` is set) against
/// `providers/<provider>` with `variables` and the resolved environment.
///
/// # Errors
///
/// Propagates credential resolution or `iacdriver` failures.
#[allow(clippy::too_many_arguments)]
pub async fn deploy(
    provider: &str,
    secret_client: &SecretClient,
    credentials_path: &str,
    variables: &HashMap<String, serde_json::Value>,
    destroy: bool,
    iac_config: IacDriverConfig,
    storage: &dyn StateStorage,
    object: Option<&dyn ObjectStoreClient>,
    workspace: &str,
) -> Result<(), OrchestrationError> {
    let env = provider_env(secret_client, credentials_path).await?;
    let root = format!("providers/{provider}");
    let backend = ProvisioningBackendRef::new(&root, Some(workspace.to_owned()))?;

    let driver = IacDriver::new(iac_config, secret_client, storage, object);
    if destroy {
        driver.destroy(&backend, variables, &env, false).await?;
    } else {
        driver.init(&root, false).await?;
        driver.apply(&backend, variables, &env, false).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_models::config::SecretClientConfig;
    use pylon_statestore::NoStorage;
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
    async fn provider_env_derives_aws_vars_from_stored_credential() {
        let server = MockServer::start().await;
        let client = client_against(&server).await;

        Mock::given(method("GET"))
            .and(path_matcher("/v1/secret/data/providers/aws/creds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "data": {
                    "provider": "aws",
                    "access_key_id": "AKIA",
                    "secret_access_key": "secret",
                } }
            })))
            .mount(&server)
            .await;

        let env = provider_env(&client, "providers/aws/creds").await.unwrap();
        assert_eq!(env.get("AWS_ACCESS_KEY_ID").unwrap(), "AKIA");
    }

    #[tokio::test]
    async fn deploy_propagates_missing_working_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let client = client_against(&server).await;

        Mock::given(method("GET"))
            .and(path_matcher("/v1/secret/data/providers/aws/creds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "data": {
                    "provider": "aws",
                    "access_key_id": "AKIA",
                    "secret_access_key": "secret",
                } }
            })))
            .mount(&server)
            .await;

        let storage = NoStorage;
        let iac_config = IacDriverConfig {
            tool_binary: "true".to_owned(),
            base_path: tmp.path().to_path_buf(),
        };

        let err = deploy("aws", &client, "providers/aws/creds", &HashMap::new(), false, iac_config, &storage, None, "default")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::IacDriver(_)));
    }
}
