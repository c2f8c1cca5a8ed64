//! Secret-client configuration and its environment-variable loading.

use std::env;
use std::time::Duration;

/// Error returned by [`SecretClientConfig::from_env`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable was set but could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

/// Configuration for a [`pylon_secretclient`](https://docs.rs) client instance.
///
/// Loaded from `VAULT_*` environment variables by convention, matching the
/// source deployment's settings layer. `vault_role_name` has no default and
/// must be supplied; every other field does.
#[derive(Debug, Clone)]
pub struct SecretClientConfig {
    /// Kubernetes-auth role name to authenticate as.
    pub vault_role_name: String,
    /// Secret manager base address.
    pub vault_addr: String,
    /// Path to the service-account JWT used for login.
    pub token_path: String,
    /// Whether to verify TLS certificates on the HTTP client.
    pub verify_ssl: bool,
    /// Seconds of remaining TTL below which the token is proactively renewed.
    pub renew_threshold_seconds: f64,
    /// Minimum seconds between token introspection calls.
    pub check_interval_seconds: f64,
}

impl Default for SecretClientConfig {
    fn default() -> Self {
        Self {
            vault_role_name: String::new(),
            vault_addr: "http://vault.vault.svc.cluster.local:8200".to_owned(),
            token_path: "/var/run/secrets/kubernetes.io/serviceaccount/token".to_owned(),
            verify_ssl: true,
            renew_threshold_seconds: 60.0,
            check_interval_seconds: 60.0,
        }
    }
}

impl SecretClientConfig {
    /// Loads configuration from `VAULT_*` environment variables, falling
    /// back to [`SecretClientConfig::default`] defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVar`] if `VAULT_ROLE_NAME` is unset, or
    /// [`ConfigError::InvalidValue`] if a numeric/boolean var fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self {
            vault_role_name: env::var("VAULT_ROLE_NAME")
                .map_err(|_| ConfigError::MissingVar("VAULT_ROLE_NAME"))?,
            ..Self::default()
        };

        if let Ok(v) = env::var("VAULT_ADDR") {
            cfg.vault_addr = v;
        }
        if let Ok(v) = env::var("VAULT_TOKEN_PATH") {
            cfg.token_path = v;
        }
        if let Ok(v) = env::var("VAULT_VERIFY_SSL") {
            cfg.verify_ssl = parse_bool("VAULT_VERIFY_SSL", &v)?;
        }
        if let Ok(v) = env::var("VAULT_RENEW_THRESHOLD_SECONDS") {
            cfg.renew_threshold_seconds = parse_f64("VAULT_RENEW_THRESHOLD_SECONDS", &v)?;
        }
        if let Ok(v) = env::var("VAULT_CHECK_INTERVAL_SECONDS") {
            cfg.check_interval_seconds = parse_f64("VAULT_CHECK_INTERVAL_SECONDS", &v)?;
        }

        Ok(cfg)
    }

    /// The renew threshold as a [`Duration`].
    #[must_use]
    pub fn renew_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.renew_threshold_seconds.max(0.0))
    }

    /// The check interval as a [`Duration`].
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_seconds.max(0.0))
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            var,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}

fn parse_f64(var: &'static str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim().parse::<f64>().map_err(|e| ConfigError::InvalidValue {
        var,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_shape() {
        let cfg = SecretClientConfig::default();
        assert_eq!(cfg.vault_addr, "http://vault.vault.svc.cluster.local:8200");
        assert!(cfg.verify_ssl);
        assert!((cfg.renew_threshold_seconds - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "false").unwrap());
        assert!(parse_bool("X", "nah").is_err());
    }
}
