//! Cloud-provider credential envelopes and their derived environment maps.
//!
//! This is the canonical shape chosen for the provider-credential model: a
//! tagged union over per-provider credential structs, each able to derive
//! the environment variables the provisioning tool's provider plugin
//! expects. A second, near-identical hierarchy lacking this derivation
//! exists upstream and is intentionally not reproduced here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// AWS access-key credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsApiKey {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl AwsApiKey {
    /// Derives `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and (if present)
    /// `AWS_SESSION_TOKEN`.
    #[must_use]
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("AWS_ACCESS_KEY_ID".to_owned(), self.access_key_id.clone());
        env.insert(
            "AWS_SECRET_ACCESS_KEY".to_owned(),
            self.secret_access_key.clone(),
        );
        if let Some(token) = &self.session_token {
            env.insert("AWS_SESSION_TOKEN".to_owned(), token.clone());
        }
        env
    }
}

/// Azure service-principal credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub subscription_id: String,
}

impl AzureCredentials {
    /// Derives the `ARM_*` environment variables.
    #[must_use]
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("ARM_CLIENT_ID".to_owned(), self.client_id.clone()),
            ("ARM_CLIENT_SECRET".to_owned(), self.client_secret.clone()),
            ("ARM_TENANT_ID".to_owned(), self.tenant_id.clone()),
            (
                "ARM_SUBSCRIPTION_ID".to_owned(),
                self.subscription_id.clone(),
            ),
        ])
    }
}

/// A GCP service-account key, as downloaded from the console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub project_id: String,
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    pub client_id: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub auth_provider_x509_cert_url: String,
    pub client_x509_cert_url: String,
    pub universe_domain: String,
}

impl GcpServiceAccountKey {
    /// Derives `GOOGLE_CREDENTIALS` (the whole key, JSON-serialized) and
    /// `GOOGLE_PROJECT`.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if this key somehow fails to serialize,
    /// which cannot happen for a well-formed instance but is surfaced rather
    /// than unwrapped.
    pub fn to_env_map(&self) -> Result<BTreeMap<String, String>, serde_json::Error> {
        let mut env = BTreeMap::new();
        env.insert("GOOGLE_CREDENTIALS".to_owned(), serde_json::to_string(self)?);
        env.insert("GOOGLE_PROJECT".to_owned(), self.project_id.clone());
        Ok(env)
    }
}

/// A provider-tagged credential envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderCredential {
    Aws(AwsApiKey),
    Azure(AzureCredentials),
    Gcp(GcpServiceAccountKey),
}

impl ProviderCredential {
    /// Derives the environment map the provisioning tool's provider plugin
    /// expects for this credential.
    ///
    /// # Errors
    ///
    /// Propagates [`GcpServiceAccountKey::to_env_map`]'s serialization error
    /// for the `Gcp` variant; the other variants are infallible.
    pub fn to_env_map(&self) -> Result<BTreeMap<String, String>, serde_json::Error> {
        match self {
            Self::Aws(key) => Ok(key.to_env_map()),
            Self::Azure(creds) => Ok(creds.to_env_map()),
            Self::Gcp(key) => key.to_env_map(),
        }
    }

    /// The provider name, used to pick the provisioning-tool root directory.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Aws(_) => "aws",
            Self::Azure(_) => "azure",
            Self::Gcp(_) => "gcp",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aws_env_map_includes_session_token_when_present() {
        let key = AwsApiKey {
            access_key_id: "AKIA".to_owned(),
            secret_access_key: "secret".to_owned(),
            session_token: Some("token".to_owned()),
        };
        let env = key.to_env_map();
        assert_eq!(env.len(), 3);
        assert_eq!(env.get("AWS_SESSION_TOKEN").unwrap(), "token");
    }

    #[test]
    fn aws_env_map_omits_session_token_when_absent() {
        let key = AwsApiKey {
            access_key_id: "AKIA".to_owned(),
            secret_access_key: "secret".to_owned(),
            session_token: None,
        };
        assert_eq!(key.to_env_map().len(), 2);
    }

    #[test]
    fn azure_env_map_has_four_arm_vars() {
        let creds = AzureCredentials {
            client_id: "a".to_owned(),
            client_secret: "b".to_owned(),
            tenant_id: "c".to_owned(),
            subscription_id: "d".to_owned(),
        };
        let env = creds.to_env_map();
        assert_eq!(env.len(), 4);
        assert_eq!(env.get("ARM_CLIENT_ID").unwrap(), "a");
    }

    #[test]
    fn gcp_env_map_embeds_whole_key_as_json() {
        let key = GcpServiceAccountKey {
            key_type: "service_account".to_owned(),
            project_id: "proj".to_owned(),
            private_key_id: "kid".to_owned(),
            private_key: "pk".to_owned(),
            client_email: "a@b.iam.gserviceaccount.com".to_owned(),
            client_id: "cid".to_owned(),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".to_owned(),
            token_uri: "https://oauth2.googleapis.com/token".to_owned(),
            auth_provider_x509_cert_url: "https://www.googleapis.com/oauth2/v1/certs".to_owned(),
            client_x509_cert_url: "https://example.com/cert".to_owned(),
            universe_domain: "googleapis.com".to_owned(),
        };
        let env = key.to_env_map().unwrap();
        assert_eq!(env.get("GOOGLE_PROJECT").unwrap(), "proj");
        assert!(env.get("GOOGLE_CREDENTIALS").unwrap().contains("proj"));
    }

    #[test]
    fn provider_credential_dispatches_by_variant() {
        let cred = ProviderCredential::Aws(AwsApiKey {
            access_key_id: "id".to_owned(),
            secret_access_key: "secret".to_owned(),
            session_token: None,
        });
        assert_eq!(cred.provider_name(), "aws");
        assert!(cred.to_env_map().unwrap().contains_key("AWS_ACCESS_KEY_ID"));
    }
}
