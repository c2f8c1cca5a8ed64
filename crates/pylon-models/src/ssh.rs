//! SSH connection descriptors and the Vault envelope they're stored in.

use serde::{Deserialize, Serialize};

/// Error constructing an [`SshConfig`].
#[derive(Debug, thiserror::Error)]
pub enum SshConfigError {
    /// `private_key` was empty or all whitespace.
    #[error("private_key must be a non-empty string")]
    EmptyPrivateKey,
}

/// SSH configuration for connecting to a remote host.
///
/// `host_keys` empty means no pinned keys are known yet, so a TOFU pass is
/// required before any strict-mode operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub user: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub private_key: String,
    #[serde(default)]
    pub host_keys: Vec<String>,
}

fn default_port() -> u16 {
    22
}

impl SshConfig {
    /// Builds a new config, rejecting an empty private key.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::EmptyPrivateKey`] if `private_key` is blank.
    pub fn new(
        user: impl Into<String>,
        hostname: impl Into<String>,
        port: u16,
        private_key: impl Into<String>,
        host_keys: Vec<String>,
    ) -> Result<Self, SshConfigError> {
        let private_key = private_key.into();
        if private_key.trim().is_empty() {
            return Err(SshConfigError::EmptyPrivateKey);
        }
        Ok(Self {
            user: user.into(),
            hostname: hostname.into(),
            port,
            private_key,
            host_keys,
        })
    }

    /// Returns a copy of this config with `host_keys` replaced.
    #[must_use]
    pub fn with_host_keys(&self, host_keys: Vec<String>) -> Self {
        Self {
            host_keys,
            ..self.clone()
        }
    }

    /// `true` once at least one host key has been pinned (TOFU already ran).
    #[must_use]
    pub fn has_pinned_host_keys(&self) -> bool {
        !self.host_keys.is_empty()
    }
}

/// How [`SshConfig`] values are stored in the secret manager: the config
/// itself plus an optional expiry for TOFU-pending entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshVaultEnvelope {
    pub ssh_config: SshConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
}

impl SshVaultEnvelope {
    /// `true` if `expires_at` is set and is in the past relative to `now`.
    #[must_use]
    pub fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }
}

/// A `kubectl exec` invocation description, used by `sshcore`'s remote
/// kubectl helper to build the exact argv.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubectlCommand {
    pub namespace: String,
    pub pod: String,
    #[serde(default)]
    pub container: Option<String>,
    pub command: Vec<String>,
    #[serde(default)]
    pub env: Option<std::collections::BTreeMap<String, String>>,
}

impl KubectlCommand {
    /// Builds the full `kubectl exec` argv for this command.
    #[must_use]
    pub fn build_argv(&self) -> Vec<String> {
        let mut argv = vec![
            "kubectl".to_owned(),
            "exec".to_owned(),
            self.pod.clone(),
            "-n".to_owned(),
            self.namespace.clone(),
        ];
        if let Some(container) = &self.container {
            argv.push("-c".to_owned());
            argv.push(container.clone());
        }
        argv.push("--".to_owned());
        if let Some(env) = &self.env {
            if !env.is_empty() {
                argv.push("env".to_owned());
                for (k, v) in env {
                    argv.push(format!("{k}={v}"));
                }
            }
        }
        argv.extend(self.command.iter().cloned());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_private_key() {
        let err = SshConfig::new("root", "host", 22, "  ", vec![]).unwrap_err();
        assert!(matches!(err, SshConfigError::EmptyPrivateKey));
    }

    #[test]
    fn envelope_expiry_is_relative_to_now() {
        let cfg = SshConfig::new("root", "host", 22, "key", vec![]).unwrap();
        let envelope = SshVaultEnvelope {
            ssh_config: cfg,
            expires_at: Some(100.0),
        };
        assert!(envelope.is_expired(200.0));
        assert!(!envelope.is_expired(50.0));
    }

    #[test]
    fn kubectl_argv_includes_container_and_env() {
        let mut env = std::collections::BTreeMap::new();
        env.insert("FOO".to_owned(), "bar".to_owned());
        let cmd = KubectlCommand {
            namespace: "ns".to_owned(),
            pod: "pod".to_owned(),
            container: Some("main".to_owned()),
            command: vec!["ls".to_owned(), "-la".to_owned()],
            env: Some(env),
        };
        let argv = cmd.build_argv();
        assert_eq!(
            argv,
            vec![
                "kubectl", "exec", "pod", "-n", "ns", "-c", "main", "--", "env", "FOO=bar", "ls",
                "-la",
            ]
        );
    }
}
