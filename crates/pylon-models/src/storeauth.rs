//! Object-store connection settings and declarative deployment shape.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Connection settings for one object-store identity (root or per-tenant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreCredential {
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_secure")]
    pub secure: bool,
}

fn default_secure() -> bool {
    true
}

/// Bucket-level permission granted to a service account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketPermission {
    None,
    Read,
    Write,
    ReadWrite,
}

/// A single bucket + permission pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketGrant {
    pub bucket_name: String,
    pub permission: BucketPermission,
}

/// Reference to a Kubernetes service account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceAccountRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceAccountRef {
    /// The `namespace:name` key used to address this SA's secret-manager path.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

/// One service account's intended bucket permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountAccess {
    pub service_account: ServiceAccountRef,
    pub bucket_grants: Vec<BucketGrant>,
}

/// Error validating an [`ObjectStoreDeployment`].
#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error("duplicate service account in deployment: {0}")]
    DuplicateServiceAccount(String),
}

/// A declarative, idempotent description of an object-store deployment:
/// which root bucket to create, and which service accounts get which
/// bucket permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreDeployment {
    #[serde(default = "default_root_bucket")]
    pub root_bucket: String,
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccountAccess>,
}

fn default_root_bucket() -> String {
    "amoebius".to_owned()
}

impl ObjectStoreDeployment {
    /// Validates that no `(namespace, name)` pair repeats across
    /// `service_accounts`.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::DuplicateServiceAccount`] naming the first
    /// repeated key found.
    pub fn validate(&self) -> Result<(), DeploymentError> {
        let mut seen = HashSet::new();
        for access in &self.service_accounts {
            let key = access.service_account.key();
            if !seen.insert(key.clone()) {
                return Err(DeploymentError::DuplicateServiceAccount(key));
            }
        }
        Ok(())
    }
}
