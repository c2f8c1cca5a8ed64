//! Pluggable ciphertext storage for provisioning-tool state.
//!
//! Each [`StateStorage`] implementation knows where one backend file
//! lives; it takes the clients it needs (a secret client, an object-store
//! client) as call-time parameters rather than owning them, since those
//! clients are shared across many backends in one process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pylon_k8sapi::K8sApiClient;
use pylon_models::provisioning::ProvisioningBackendRef;
use pylon_secretclient::SecretClient;
use serde_json::json;

/// Failure reading or writing ciphertext through a [`StateStorage`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("state storage requires a secret client, but none was supplied")]
    MissingSecretClient,
    #[error("state storage requires an object-store client, but none was supplied")]
    MissingObjectClient,
    #[error("secret client error: {0}")]
    SecretClient(#[from] pylon_secretclient::SecretClientError),
    #[error("k8s api error: {0}")]
    K8sApi(#[from] pylon_k8sapi::K8sApiError),
    #[error("object store error: {0}")]
    ObjectStore(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("stored ciphertext envelope for {path} is missing its \"ciphertext\" field")]
    MalformedEnvelope { path: String },
}

/// Minimal object-store operations needed by the object-store backend and
/// the backend-listing helpers. A concrete client (e.g. backed by an
/// S3-compatible service) implements this elsewhere in the workspace.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, Box<dyn std::error::Error + Send + Sync>>;
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn delete_object(&self, key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>>;
}

fn wrap_object_err(e: Box<dyn std::error::Error + Send + Sync>) -> StateStoreError {
    StateStoreError::ObjectStore(e)
}

/// One backend's ciphertext read/write operations, plus the transit key
/// (if any) used to encrypt/decrypt the plaintext it wraps.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Name of the transit key used to encrypt plaintext before it reaches
    /// this backend. `None` disables ephemeral encryption for this backend.
    fn transit_key_name(&self) -> Option<&str>;

    /// Reads the stored ciphertext, or `None` if nothing is stored yet.
    async fn read_ciphertext(
        &self,
        vault: Option<&SecretClient>,
        object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<Option<String>, StateStoreError>;

    /// Writes `ciphertext`, replacing anything previously stored.
    async fn write_ciphertext(
        &self,
        ciphertext: &str,
        vault: Option<&SecretClient>,
        object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<(), StateStoreError>;
}

/// Backend that stores nothing: used when the provisioning tool's native
/// backend already encrypts state, or encryption is intentionally off.
#[derive(Debug, Clone, Default)]
pub struct NoStorage;

#[async_trait]
impl StateStorage for NoStorage {
    fn transit_key_name(&self) -> Option<&str> {
        None
    }

    async fn read_ciphertext(
        &self,
        _vault: Option<&SecretClient>,
        _object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<Option<String>, StateStoreError> {
        Ok(None)
    }

    async fn write_ciphertext(
        &self,
        _ciphertext: &str,
        _vault: Option<&SecretClient>,
        _object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<(), StateStoreError> {
        Ok(())
    }
}

/// Backend that stores `{ciphertext}` at
/// `amoebius/terraform-backends/<root>/<workspace>` in a Vault-compatible
/// secret manager.
#[derive(Debug, Clone)]
pub struct KvStorage {
    secret_path: String,
    transit_key_name: Option<String>,
}

impl KvStorage {
    #[must_use]
    pub fn new(backend: &ProvisioningBackendRef, transit_key_name: Option<String>) -> Self {
        Self {
            secret_path: format!(
                "amoebius/terraform-backends/{}/{}",
                backend.root, backend.workspace
            ),
            transit_key_name,
        }
    }
}

#[async_trait]
impl StateStorage for KvStorage {
    fn transit_key_name(&self) -> Option<&str> {
        self.transit_key_name.as_deref()
    }

    async fn read_ciphertext(
        &self,
        vault: Option<&SecretClient>,
        _object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<Option<String>, StateStoreError> {
        let vault = vault.ok_or(StateStoreError::MissingSecretClient)?;
        match vault.read_secret(&self.secret_path).await {
            Ok(value) => {
                let ciphertext = value
                    .get("ciphertext")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| StateStoreError::MalformedEnvelope {
                        path: self.secret_path.clone(),
                    })?;
                Ok(Some(ciphertext.to_owned()))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_ciphertext(
        &self,
        ciphertext: &str,
        vault: Option<&SecretClient>,
        _object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<(), StateStoreError> {
        let vault = vault.ok_or(StateStoreError::MissingSecretClient)?;
        vault
            .write_secret(&self.secret_path, &json!({ "ciphertext": ciphertext }))
            .await?;
        Ok(())
    }
}

/// Backend that stores a single `<root>/<workspace>.enc` object in an
/// object store.
#[derive(Debug, Clone)]
pub struct ObjectStoreStorage {
    object_key: String,
    transit_key_name: Option<String>,
}

impl ObjectStoreStorage {
    #[must_use]
    pub fn new(backend: &ProvisioningBackendRef, transit_key_name: Option<String>) -> Self {
        Self {
            object_key: format!("{}/{}.enc", backend.root, backend.workspace),
            transit_key_name,
        }
    }

    /// Builds the listing-variant key used by [`list_backends`]:
    /// `terraform-backends/<dotted root>/<workspace>.enc`.
    #[must_use]
    pub fn new_listed(backend: &ProvisioningBackendRef, transit_key_name: Option<String>) -> Self {
        Self {
            object_key: backend.to_object_name(),
            transit_key_name,
        }
    }
}

#[async_trait]
impl StateStorage for ObjectStoreStorage {
    fn transit_key_name(&self) -> Option<&str> {
        self.transit_key_name.as_deref()
    }

    async fn read_ciphertext(
        &self,
        _vault: Option<&SecretClient>,
        object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<Option<String>, StateStoreError> {
        let object = object.ok_or(StateStoreError::MissingObjectClient)?;
        let bytes = object
            .get_object(&self.object_key)
            .await
            .map_err(wrap_object_err)?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    async fn write_ciphertext(
        &self,
        ciphertext: &str,
        _vault: Option<&SecretClient>,
        object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<(), StateStoreError> {
        let object = object.ok_or(StateStoreError::MissingObjectClient)?;
        object
            .put_object(&self.object_key, ciphertext.as_bytes())
            .await
            .map_err(wrap_object_err)
    }
}

/// Backend that stores `{ciphertext}` in a Kubernetes secret named
/// `tf-backend-<root>-<workspace>`. Owns its own API client rather than
/// taking one as a call-time parameter, since it isn't part of the
/// `vault`/`object` pairing the other backends share.
#[derive(Clone)]
pub struct K8sSecretStorage {
    client: Arc<K8sApiClient>,
    namespace: String,
    secret_name: String,
    transit_key_name: Option<String>,
}

impl K8sSecretStorage {
    #[must_use]
    pub fn new(
        client: Arc<K8sApiClient>,
        namespace: impl Into<String>,
        backend: &ProvisioningBackendRef,
        transit_key_name: Option<String>,
    ) -> Self {
        let safe_root = backend.root.replace('/', "-");
        Self {
            client,
            namespace: namespace.into(),
            secret_name: format!("tf-backend-{safe_root}-{}", backend.workspace),
            transit_key_name,
        }
    }
}

#[async_trait]
impl StateStorage for K8sSecretStorage {
    fn transit_key_name(&self) -> Option<&str> {
        self.transit_key_name.as_deref()
    }

    async fn read_ciphertext(
        &self,
        _vault: Option<&SecretClient>,
        _object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<Option<String>, StateStoreError> {
        let data = self
            .client
            .get_secret_data(&self.namespace, &self.secret_name)
            .await?;
        Ok(data.and_then(|mut d| d.remove("ciphertext")).map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    async fn write_ciphertext(
        &self,
        ciphertext: &str,
        _vault: Option<&SecretClient>,
        _object: Option<&(dyn ObjectStoreClient)>,
    ) -> Result<(), StateStoreError> {
        let mut data = HashMap::new();
        data.insert("ciphertext".to_owned(), ciphertext.as_bytes().to_vec());
        self.client
            .put_secret_data(&self.namespace, &self.secret_name, &data)
            .await?;
        Ok(())
    }
}

/// Enumerates object-store entries matching the `terraform-backends/<dotted
/// root>/<workspace>.enc` pattern.
///
/// # Errors
///
/// Returns [`StateStoreError::ObjectStore`] if the underlying list call
/// fails.
pub async fn list_backends(
    object: &dyn ObjectStoreClient,
) -> Result<Vec<ProvisioningBackendRef>, StateStoreError> {
    let names = object
        .list_objects("terraform-backends/")
        .await
        .map_err(wrap_object_err)?;
    Ok(names
        .iter()
        .filter_map(|n| ProvisioningBackendRef::from_object_name(n))
        .collect())
}

/// Reads every ref in `refs` in parallel and deletes the ones that are
/// empty. A read failure is treated as "empty" so a partially-corrupted or
/// already-removed entry doesn't block cleanup of the rest.
///
/// Returns the refs that were deleted.
///
/// # Errors
///
/// Returns [`StateStoreError::ObjectStore`] if a delete call fails; reads
/// never fail this function (failures are folded into "empty").
pub async fn delete_empty_backends(
    object: &dyn ObjectStoreClient,
    refs: &[ProvisioningBackendRef],
) -> Result<Vec<ProvisioningBackendRef>, StateStoreError> {
    let checks = refs.iter().map(|r| async move {
        let key = r.to_object_name();
        let empty = !matches!(object.get_object(&key).await, Ok(Some(bytes)) if !bytes.is_empty());
        (r.clone(), key, empty)
    });
    let results = futures::future::join_all(checks).await;

    let mut deleted = Vec::new();
    for (r, key, empty) in results {
        if empty {
            object.delete_object(&key).await.map_err(wrap_object_err)?;
            deleted.push(r);
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeObjectStore {
        objects: StdMutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStoreClient for FakeObjectStore {
        async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.objects.lock().unwrap().get(key).cloned())
        }

        async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.objects.lock().unwrap().insert(key.to_owned(), data.to_vec());
            Ok(())
        }

        async fn delete_object(&self, key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn no_storage_always_reads_none_and_ignores_writes() {
        let storage = NoStorage;
        assert_eq!(storage.read_ciphertext(None, None).await.unwrap(), None);
        storage.write_ciphertext("x", None, None).await.unwrap();
    }

    #[tokio::test]
    async fn object_store_storage_roundtrips_ciphertext() {
        let backend = ProvisioningBackendRef::new("providers/aws", Some("dev".to_owned())).unwrap();
        let storage = ObjectStoreStorage::new(&backend, None);
        let fake = FakeObjectStore::default();

        assert_eq!(storage.read_ciphertext(None, Some(&fake)).await.unwrap(), None);
        storage.write_ciphertext("cipher-bytes", None, Some(&fake)).await.unwrap();
        assert_eq!(
            storage.read_ciphertext(None, Some(&fake)).await.unwrap(),
            Some("cipher-bytes".to_owned())
        );
    }

    #[tokio::test]
    async fn object_store_storage_requires_a_client() {
        let backend = ProvisioningBackendRef::new("providers/aws", None).unwrap();
        let storage = ObjectStoreStorage::new(&backend, None);
        let err = storage.read_ciphertext(None, None).await.unwrap_err();
        assert!(matches!(err, StateStoreError::MissingObjectClient));
    }

    #[tokio::test]
    async fn list_backends_parses_listing_keys() {
        let fake = FakeObjectStore::default();
        let backend = ProvisioningBackendRef::new("providers/aws", Some("dev".to_owned())).unwrap();
        let listed = ObjectStoreStorage::new_listed(&backend, None);
        listed.write_ciphertext("x", None, Some(&fake)).await.unwrap();

        let refs = list_backends(&fake).await.unwrap();
        assert_eq!(refs, vec![backend]);
    }

    #[tokio::test]
    async fn delete_empty_backends_removes_empty_and_unreadable_entries() {
        let fake = FakeObjectStore::default();
        let populated = ProvisioningBackendRef::new("providers/aws", Some("prod".to_owned())).unwrap();
        let empty = ProvisioningBackendRef::new("providers/aws", Some("stale".to_owned())).unwrap();
        let missing = ProvisioningBackendRef::new("providers/aws", Some("gone".to_owned())).unwrap();

        ObjectStoreStorage::new_listed(&populated, None)
            .write_ciphertext("non-empty", None, Some(&fake))
            .await
            .unwrap();
        ObjectStoreStorage::new_listed(&empty, None)
            .write_ciphertext("", None, Some(&fake))
            .await
            .unwrap();

        let deleted = delete_empty_backends(&fake, &[populated.clone(), empty.clone(), missing.clone()])
            .await
            .unwrap();

        assert_eq!(deleted.len(), 2);
        assert!(deleted.contains(&empty));
        assert!(deleted.contains(&missing));
        assert!(!deleted.contains(&populated));

        let remaining = list_backends(&fake).await.unwrap();
        assert_eq!(remaining, vec![populated]);
    }
}
