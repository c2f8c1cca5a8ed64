//! Declarative, idempotent object-store user provisioning: a root
//! credential, a root bucket, and per-service-account users/policies/
//! secret-manager roles that track a declared [`ObjectStoreDeployment`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use pylon_iacdriver::{IacDriver, IacDriverConfig};
use pylon_k8sapi::K8sApiClient;
use pylon_models::provisioning::ProvisioningBackendRef;
use pylon_models::storeauth::{BucketGrant, ObjectStoreCredential, ObjectStoreDeployment, ServiceAccountAccess};
use pylon_secretclient::SecretClient;
use pylon_statestore::K8sSecretStorage;
use serde_json::Value;

use crate::{random_urlsafe_secret, SecretServicesError};

/// Transit key name shared by every object-store-backed service.
pub const TRANSIT_KEY_NAME: &str = "amoebius";
/// Provisioning root for the object-store server infrastructure module.
pub const SERVICE_ROOT: &str = "services/objectstore";
const K8S_NAMESPACE: &str = "amoebius";
const ROOT_CREDENTIAL_PATH: &str = "amoebius/services/objectstore/root";
const USER_CREDENTIAL_PREFIX: &str = "amoebius/services/objectstore/id/";
const ROOT_DEFAULT_URL: &str = "http://minio.minio.svc.cluster.local:9000";

/// Administrative operations against one object-store cluster, performed
/// as its root identity.
#[async_trait]
pub trait ObjectStoreAdmin: Send + Sync {
    async fn create_bucket(&self, bucket: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn create_user(&self, access_key: &str, secret_key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn create_policy(&self, name: &str, grants: &[BucketGrant]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn attach_policy_to_user(&self, access_key: &str, policy_name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn delete_user(&self, access_key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn delete_policy(&self, name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn update_user_password(&self, access_key: &str, new_secret_key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Connects to an object-store cluster as its root identity, producing an
/// [`ObjectStoreAdmin`] handle. Kept separate from the admin trait itself
/// since connecting is async and credential-driven.
#[async_trait]
pub trait ObjectStoreAdminFactory: Send + Sync {
    async fn connect(&self, root: &ObjectStoreCredential) -> Result<Box<dyn ObjectStoreAdmin>, Box<dyn std::error::Error + Send + Sync>>;
}

fn admin_err(e: Box<dyn std::error::Error + Send + Sync>) -> SecretServicesError {
    SecretServicesError::ObjectStoreAdmin(e)
}

async fn get_credential(secret_client: &SecretClient, path: &str) -> Result<Option<ObjectStoreCredential>, SecretServicesError> {
    match secret_client.read_secret(path).await {
        Ok(value) => Ok(Some(serde_json::from_value(value)?)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn put_credential(secret_client: &SecretClient, path: &str, credential: &ObjectStoreCredential) -> Result<(), SecretServicesError> {
    secret_client.write_secret(path, &serde_json::to_value(credential)?).await?;
    Ok(())
}

fn generate_root_credential() -> ObjectStoreCredential {
    ObjectStoreCredential {
        url: ROOT_DEFAULT_URL.to_owned(),
        access_key: "admin".to_owned(),
        secret_key: random_urlsafe_secret(16),
        secure: false,
    }
}

async fn apply_server_infra(
    secret_client: &SecretClient,
    k8s: Arc<K8sApiClient>,
    iac_config: IacDriverConfig,
    workspace: &str,
    root: &ObjectStoreCredential,
) -> Result<(), SecretServicesError> {
    secret_client.write_transit_key(TRANSIT_KEY_NAME).await?;

    let backend = ProvisioningBackendRef::new(SERVICE_ROOT, Some(workspace.to_owned()))?;
    let storage = K8sSecretStorage::new(k8s, K8S_NAMESPACE, &backend, Some(TRANSIT_KEY_NAME.to_owned()));
    let driver = IacDriver::new(iac_config, secret_client, &storage, None);

    driver.init(SERVICE_ROOT, false).await?;

    let mut vars = std::collections::HashMap::new();
    vars.insert("root_user".to_owned(), Value::String(root.access_key.clone()));
    vars.insert("root_password".to_owned(), Value::String(root.secret_key.clone()));
    driver.apply(&backend, &vars, &std::collections::HashMap::new(), false).await?;

    Ok(())
}

/// Idempotently deploys an object-store cluster plus the per-service-account
/// users/policies declared in `deployment`.
///
/// Steps: ensure a root credential, ensure the transit key, apply the
/// server infrastructure module via [`IacDriver`] with ephemeral
/// `K8sSecretStorage` state, create the root bucket, then configure every
/// declared service account (skipping ones absent from the cluster when
/// `skip_missing_service_accounts`) and remove any stale ones no longer
/// declared — both fanned out in parallel.
///
/// # Errors
///
/// Returns [`SecretServicesError::Deployment`] if `deployment` has
/// duplicate service accounts, or propagates the first failure from
/// secret-client, object-store-admin, or `iacdriver` calls.
#[allow(clippy::too_many_arguments)]
pub async fn deploy(
    deployment: &ObjectStoreDeployment,
    secret_client: &SecretClient,
    k8s: Arc<K8sApiClient>,
    factory: &dyn ObjectStoreAdminFactory,
    iac_config: IacDriverConfig,
    workspace: &str,
    skip_missing_service_accounts: bool,
) -> Result<(), SecretServicesError> {
    deployment.validate()?;

    let root = match get_credential(secret_client, ROOT_CREDENTIAL_PATH).await? {
        Some(existing) => existing,
        None => {
            let generated = generate_root_credential();
            put_credential(secret_client, ROOT_CREDENTIAL_PATH, &generated).await?;
            generated
        }
    };

    apply_server_infra(secret_client, Arc::clone(&k8s), iac_config, workspace, &root).await?;

    let admin = factory.connect(&root).await.map_err(admin_err)?;
    admin.create_bucket(&deployment.root_bucket).await.map_err(admin_err)?;

    let cluster_sas = k8s.list_service_accounts().await?;
    let cluster_keys: HashSet<String> = cluster_sas.iter().map(pylon_models::storeauth::ServiceAccountRef::key).collect();
    let desired_keys: HashSet<String> = deployment
        .service_accounts
        .iter()
        .map(|a| a.service_account.key())
        .collect();

    let to_configure: Vec<&ServiceAccountAccess> = deployment
        .service_accounts
        .iter()
        .filter(|a| !skip_missing_service_accounts || cluster_keys.contains(&a.service_account.key()))
        .collect();

    let configure_futures = to_configure
        .iter()
        .map(|access| configure_service_account(secret_client, admin.as_ref(), &root, access));
    futures::future::try_join_all(configure_futures).await?;

    let existing_paths = secret_client.list_secrets(USER_CREDENTIAL_PREFIX).await?;
    let existing_keys: HashSet<String> = existing_paths.iter().map(|p| p.trim_end_matches('/').to_owned()).collect();
    let stale_keys: Vec<&String> = existing_keys.difference(&desired_keys).collect();

    let removal_futures = stale_keys
        .iter()
        .map(|key| remove_stale_service_account(secret_client, admin.as_ref(), key));
    futures::future::try_join_all(removal_futures).await?;

    Ok(())
}

async fn configure_service_account(
    secret_client: &SecretClient,
    admin: &dyn ObjectStoreAdmin,
    root: &ObjectStoreCredential,
    access: &ServiceAccountAccess,
) -> Result<(), SecretServicesError> {
    let key = access.service_account.key();
    let user_path = format!("{USER_CREDENTIAL_PREFIX}{key}");

    let user = match get_credential(secret_client, &user_path).await? {
        Some(existing) => existing,
        None => {
            let generated = ObjectStoreCredential {
                url: root.url.clone(),
                access_key: key.clone(),
                secret_key: random_urlsafe_secret(16),
                secure: root.secure,
            };
            put_credential(secret_client, &user_path, &generated).await?;
            generated
        }
    };

    admin.create_user(&user.access_key, &user.secret_key).await.map_err(admin_err)?;

    let policy_name = format!("policy-{key}");
    admin.create_policy(&policy_name, &access.bucket_grants).await.map_err(admin_err)?;
    admin.attach_policy_to_user(&user.access_key, &policy_name).await.map_err(admin_err)?;

    let vault_policy_name = format!("objectstore-user-{key}");
    secret_client.create_read_only_policy(&vault_policy_name, &user_path).await?;

    let role_name = format!("role-objectstore-{key}");
    secret_client
        .create_k8s_role(
            &role_name,
            std::slice::from_ref(&access.service_account.name),
            std::slice::from_ref(&access.service_account.namespace),
            std::slice::from_ref(&vault_policy_name),
            "1h",
        )
        .await?;

    Ok(())
}

async fn remove_stale_service_account(secret_client: &SecretClient, admin: &dyn ObjectStoreAdmin, key: &str) -> Result<(), SecretServicesError> {
    admin.delete_user(key).await.map_err(admin_err)?;
    admin.delete_policy(&format!("policy-{key}")).await.map_err(admin_err)?;
    secret_client.delete_policy(&format!("objectstore-user-{key}")).await?;
    secret_client.delete_k8s_role(&format!("role-objectstore-{key}")).await?;
    secret_client
        .delete_secret(&format!("{USER_CREDENTIAL_PREFIX}{key}"), false)
        .await?;
    Ok(())
}

/// Rotates the root credential and every stored per-user credential,
/// reapplying the server infrastructure module for the new root password
/// and updating each user's password via [`ObjectStoreAdmin`] in parallel.
///
/// # Errors
///
/// Returns [`SecretServicesError::NoRootCredential`] if no root credential
/// has been deployed yet, or propagates the first downstream failure.
pub async fn rotate(
    secret_client: &SecretClient,
    k8s: Arc<K8sApiClient>,
    factory: &dyn ObjectStoreAdminFactory,
    iac_config: IacDriverConfig,
    workspace: &str,
) -> Result<(), SecretServicesError> {
    let old_root = get_credential(secret_client, ROOT_CREDENTIAL_PATH)
        .await?
        .ok_or_else(|| SecretServicesError::NoRootCredential {
            path: ROOT_CREDENTIAL_PATH.to_owned(),
        })?;

    let new_root = ObjectStoreCredential {
        url: old_root.url.clone(),
        access_key: "admin".to_owned(),
        secret_key: random_urlsafe_secret(16),
        secure: old_root.secure,
    };
    put_credential(secret_client, ROOT_CREDENTIAL_PATH, &new_root).await?;

    apply_server_infra(secret_client, Arc::clone(&k8s), iac_config, workspace, &new_root).await?;

    let admin = factory.connect(&new_root).await.map_err(admin_err)?;
    let user_paths = secret_client.list_secrets(USER_CREDENTIAL_PREFIX).await?;

    let rotate_futures = user_paths
        .iter()
        .map(|fragment| rotate_user(secret_client, admin.as_ref(), fragment));
    futures::future::try_join_all(rotate_futures).await?;

    Ok(())
}

async fn rotate_user(secret_client: &SecretClient, admin: &dyn ObjectStoreAdmin, path_fragment: &str) -> Result<(), SecretServicesError> {
    let user_path = format!("{USER_CREDENTIAL_PREFIX}{path_fragment}");
    let Some(existing) = get_credential(secret_client, &user_path).await? else {
        return Ok(());
    };

    let new_secret = random_urlsafe_secret(16);
    admin
        .update_user_password(&existing.access_key, &new_secret)
        .await
        .map_err(admin_err)?;

    let updated = ObjectStoreCredential {
        secret_key: new_secret,
        ..existing
    };
    put_credential(secret_client, &user_path, &updated).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeAdmin {
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStoreAdmin for FakeAdmin {
        async fn create_bucket(&self, bucket: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().unwrap().push(format!("create_bucket:{bucket}"));
            Ok(())
        }
        async fn create_user(&self, access_key: &str, _secret_key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().unwrap().push(format!("create_user:{access_key}"));
            Ok(())
        }
        async fn create_policy(&self, name: &str, _grants: &[BucketGrant]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().unwrap().push(format!("create_policy:{name}"));
            Ok(())
        }
        async fn attach_policy_to_user(&self, access_key: &str, policy_name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("attach:{access_key}:{policy_name}"));
            Ok(())
        }
        async fn delete_user(&self, access_key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().unwrap().push(format!("delete_user:{access_key}"));
            Ok(())
        }
        async fn delete_policy(&self, name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().unwrap().push(format!("delete_policy:{name}"));
            Ok(())
        }
        async fn update_user_password(&self, access_key: &str, _new_secret_key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.lock().unwrap().push(format!("update_password:{access_key}"));
            Ok(())
        }
    }

    #[test]
    fn generated_root_credential_has_admin_access_key() {
        let cred = generate_root_credential();
        assert_eq!(cred.access_key, "admin");
        assert!(!cred.secure);
        assert!(!cred.secret_key.is_empty());
    }

    #[tokio::test]
    async fn fake_admin_records_bucket_creation() {
        let admin = FakeAdmin { calls: StdMutex::new(Vec::new()) };
        admin.create_bucket("amoebius").await.unwrap();
        assert_eq!(admin.calls.lock().unwrap().as_slice(), ["create_bucket:amoebius"]);
    }
}
