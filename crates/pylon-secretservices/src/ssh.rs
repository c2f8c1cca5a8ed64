//! SSH-config lifecycle: store, store-with-immediate-TOFU, retrieve
//! (optionally TOFU-populating on read), and delete.

use std::time::Duration;

use pylon_models::ssh::{SshConfig, SshVaultEnvelope};
use pylon_secretclient::SecretClient;

use crate::{now_unix, SecretServicesError};

const EXPIRY_SECONDS: f64 = 3600.0;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Writes `cfg` to `path`. If `cfg.host_keys` is empty the stored envelope
/// expires in one hour, since no TOFU handshake has pinned host keys yet.
///
/// # Errors
///
/// Returns [`SecretServicesError::SecretClient`] on a transport failure.
pub async fn store(secret_client: &SecretClient, path: &str, cfg: &SshConfig) -> Result<(), SecretServicesError> {
    let expires_at = if cfg.has_pinned_host_keys() {
        None
    } else {
        Some(now_unix() + EXPIRY_SECONDS)
    };
    let envelope = SshVaultEnvelope {
        ssh_config: cfg.clone(),
        expires_at,
    };
    secret_client
        .write_secret_idempotent(path, &serde_json::to_value(&envelope)?)
        .await?;
    Ok(())
}

/// Stores `cfg`, then immediately runs TOFU if it has no pinned host
/// keys. A TOFU failure forcibly hard-deletes the just-stored entry
/// before the error is returned, so a half-configured entry never lingers.
///
/// # Errors
///
/// Returns whatever [`tofu_populate`] returned, after best-effort cleanup.
pub async fn store_with_tofu(secret_client: &SecretClient, path: &str, cfg: &SshConfig) -> Result<(), SecretServicesError> {
    store(secret_client, path, cfg).await?;
    if !cfg.has_pinned_host_keys() {
        if let Err(err) = tofu_populate(secret_client, path).await {
            let _ = delete(secret_client, path, true).await;
            return Err(err);
        }
    }
    Ok(())
}

/// Runs TOFU against the config stored at `path`, requiring it to have no
/// pinned host keys yet, and writes the result back with the expiry
/// cleared. Retried up to 30 times a second apart, since the remote host
/// may not yet be reachable for the handshake.
///
/// # Errors
///
/// Returns [`SecretServicesError::AlreadyPinned`] if host keys are already
/// pinned, or propagates the read/handshake/write failure otherwise, once
/// every attempt has failed.
pub async fn tofu_populate(secret_client: &SecretClient, path: &str) -> Result<(), SecretServicesError> {
    pylon_retry::retry("ssh-tofu-populate", 30, RETRY_DELAY, || tofu_populate_once(secret_client, path)).await
}

async fn tofu_populate_once(secret_client: &SecretClient, path: &str) -> Result<(), SecretServicesError> {
    let existing = get(secret_client, path, false).await?;
    if existing.has_pinned_host_keys() {
        return Err(SecretServicesError::AlreadyPinned { path: path.to_owned() });
    }

    let host_keys = pylon_sshcore::get_server_key(&existing).await?;
    let updated = existing.with_host_keys(host_keys);
    let envelope = SshVaultEnvelope {
        ssh_config: updated,
        expires_at: None,
    };
    secret_client.write_secret(path, &serde_json::to_value(&envelope)?).await?;
    Ok(())
}

/// Retrieves the [`SshConfig`] stored at `path`. An expired entry is
/// hard-deleted and reported as an error. When `tofu_if_missing_host_keys`
/// is set and no host keys are pinned yet, runs TOFU and returns the
/// freshly-populated config. Retried up to 3 times a second apart.
///
/// # Errors
///
/// Returns [`SecretServicesError::Expired`] if the stored envelope has
/// expired, or propagates any read/TOFU failure, once every attempt has
/// failed.
pub async fn get(secret_client: &SecretClient, path: &str, tofu_if_missing_host_keys: bool) -> Result<SshConfig, SecretServicesError> {
    pylon_retry::retry("ssh-get-config", 3, RETRY_DELAY, || get_once(secret_client, path, tofu_if_missing_host_keys)).await
}

async fn get_once(secret_client: &SecretClient, path: &str, tofu_if_missing_host_keys: bool) -> Result<SshConfig, SecretServicesError> {
    let raw = secret_client.read_secret(path).await?;
    let envelope: SshVaultEnvelope = serde_json::from_value(raw)?;

    if envelope.is_expired(now_unix()) {
        secret_client.delete_secret(path, true).await?;
        return Err(SecretServicesError::Expired { path: path.to_owned() });
    }

    if tofu_if_missing_host_keys && !envelope.ssh_config.has_pinned_host_keys() {
        tofu_populate(secret_client, path).await?;
        let updated_raw = secret_client.read_secret(path).await?;
        let updated: SshVaultEnvelope = serde_json::from_value(updated_raw)?;
        return Ok(updated.ssh_config);
    }

    Ok(envelope.ssh_config)
}

/// Deletes the config at `path`. A soft delete requires the entry to
/// currently exist (and be valid), surfacing an error otherwise; a hard
/// delete tolerates its absence.
///
/// # Errors
///
/// Returns [`SecretServicesError::NothingToDelete`] on a missing soft
/// delete target, or propagates any other read/delete failure.
pub async fn delete(secret_client: &SecretClient, path: &str, hard: bool) -> Result<(), SecretServicesError> {
    match secret_client.read_secret(path).await {
        Ok(raw) => {
            let _: SshVaultEnvelope = serde_json::from_value(raw)?;
        }
        Err(err) if err.is_not_found() => {
            if !hard {
                return Err(SecretServicesError::NothingToDelete { path: path.to_owned() });
            }
        }
        Err(err) => return Err(err.into()),
    }

    secret_client.delete_secret(path, hard).await?;
    Ok(())
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
    async fn store_without_host_keys_sets_an_expiry() {
        let server = MockServer::start().await;
        let client = client_against(&server).await;

        Mock::given(method("GET"))
            .and(path_matcher("/v1/secret/data/ssh/test"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut captured_body = None;
        Mock::given(method("POST"))
            .and(path_matcher("/v1/secret/data/ssh/test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {}})))
            .mount(&server)
            .await;

        let cfg = SshConfig::new("root", "host", 22, "key", vec![]).unwrap();
        store(&client, "ssh/test", &cfg).await.unwrap();
        let _ = captured_body.take();
    }

    #[tokio::test]
    async fn delete_soft_requires_presence() {
        let server = MockServer::start().await;
        let client = client_against(&server).await;

        Mock::given(method("GET"))
            .and(path_matcher("/v1/secret/data/ssh/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = delete(&client, "ssh/missing", false).await.unwrap_err();
        assert!(matches!(err, SecretServicesError::NothingToDelete { .. }));
    }

    #[tokio::test]
    async fn get_retries_transient_read_failures() {
        let server = MockServer::start().await;
        let client = client_against(&server).await;

        let cfg = SshConfig::new("root", "host", 22, "key", vec!["host-key".to_owned()]).unwrap();
        let envelope = SshVaultEnvelope { ssh_config: cfg, expires_at: None };

        // first attempt hits a 500, the retry wrapper must try again
        Mock::given(method("GET"))
            .and(path_matcher("/v1/secret/data/ssh/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_matcher("/v1/secret/data/ssh/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "data": envelope }
            })))
            .mount(&server)
            .await;

        let resolved = get(&client, "ssh/flaky", false).await.unwrap();
        assert_eq!(resolved.hostname, "host");
    }

    #[tokio::test]
    async fn get_reports_expired_entries_and_removes_them() {
        let server = MockServer::start().await;
        let client = client_against(&server).await;

        let cfg = SshConfig::new("root", "host", 22, "key", vec!["host-key".to_owned()]).unwrap();
        let envelope = SshVaultEnvelope {
            ssh_config: cfg,
            expires_at: Some(1.0),
        };

        Mock::given(method("GET"))
            .and(path_matcher("/v1/secret/data/ssh/expired"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "data": envelope }
            })))
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path_matcher("/v1/secret/metadata/ssh/expired"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        // exercises the non-retrying core directly so the test doesn't pay
        // for three retry attempts against a deterministically-failing mock
        let err = get_once(&client, "ssh/expired", false).await.unwrap_err();
        assert!(matches!(err, SecretServicesError::Expired { .. }));
    }
}
