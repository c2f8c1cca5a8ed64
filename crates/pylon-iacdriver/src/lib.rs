//! Driver for an external provisioning tool (a `terraform`-compatible
//! binary): ephemeral-state discipline, workspace handling, and typed
//! output retrieval.
//!
//! State never touches persistent disk in plaintext. Each command scopes
//! `terraform.tfstate`/`terraform.tfstate.backup` as symlinks into
//! `/dev/shm`, populated from (and, on success, written back to) a
//! [`pylon_statestore::StateStorage`] backend — optionally wrapped in the
//! secret manager's transit encryption.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pylon_ephemeral::EphemeralSymlinks;
use pylon_models::provisioning::{OutputError, ProvisioningBackendRef, ProvisioningState};
use pylon_secretclient::SecretClient;
use pylon_statestore::{ObjectStoreClient, StateStorage};
use serde_json::Value;

/// Failure running or managing the external provisioning tool.
#[derive(Debug, thiserror::Error)]
pub enum IacDriverError {
    #[error("working directory {0} does not exist")]
    WorkingDirMissing(String),
    #[error("ephemeral file setup failed: {0}")]
    Ephemeral(#[from] pylon_ephemeral::EphemeralError),
    #[error("provisioning tool invocation failed: {0}")]
    Command(#[from] pylon_cmd::CommandError),
    #[error("state storage error: {0}")]
    StateStore(#[from] pylon_statestore::StateStoreError),
    #[error("secret client error: {0}")]
    SecretClient(#[from] pylon_secretclient::SecretClientError),
    #[error("failed to read/write ephemeral state file {path}: {source}")]
    StateFileIo { path: String, source: std::io::Error },
    #[error("captured output was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("output lookup failed: {0}")]
    Output(#[from] OutputError),
}

/// Configuration for one [`IacDriver`] instance.
#[derive(Debug, Clone)]
pub struct IacDriverConfig {
    /// Binary name or path, e.g. `"terraform"` or `"tofu"`.
    pub tool_binary: String,
    /// Parent directory containing each provisioning root's module dir.
    pub base_path: PathBuf,
}

impl Default for IacDriverConfig {
    fn default() -> Self {
        Self {
            tool_binary: "terraform".to_owned(),
            base_path: PathBuf::from("."),
        }
    }
}

/// Drives the external provisioning tool against one root module,
/// maintaining ephemeral state and an optional workspace.
pub struct IacDriver<'a> {
    config: IacDriverConfig,
    secret_client: &'a SecretClient,
    storage: &'a dyn StateStorage,
    object: Option<&'a dyn ObjectStoreClient>,
}

impl<'a> IacDriver<'a> {
    #[must_use]
    pub fn new(
        config: IacDriverConfig,
        secret_client: &'a SecretClient,
        storage: &'a dyn StateStorage,
        object: Option<&'a dyn ObjectStoreClient>,
    ) -> Self {
        Self {
            config,
            secret_client,
            storage,
            object,
        }
    }

    fn working_dir(&self, root: &str) -> Result<PathBuf, IacDriverError> {
        let dir = self.config.base_path.join(root);
        if !dir.is_dir() {
            return Err(IacDriverError::WorkingDirMissing(dir.display().to_string()));
        }
        Ok(dir)
    }

    async fn load_plaintext_into(&self, ephemeral_state_path: &Path) -> Result<(), IacDriverError> {
        let Some(stored) = self
            .storage
            .read_ciphertext(Some(self.secret_client), self.object)
            .await?
        else {
            return Ok(());
        };

        let plaintext = if let Some(key) = self.storage.transit_key_name() {
            self.secret_client.decrypt_transit_data(key, &stored).await?
        } else {
            stored.into_bytes()
        };

        tokio::fs::write(ephemeral_state_path, &plaintext)
            .await
            .map_err(|source| IacDriverError::StateFileIo {
                path: ephemeral_state_path.display().to_string(),
                source,
            })
    }

    async fn save_plaintext_from(&self, ephemeral_state_path: &Path) -> Result<(), IacDriverError> {
        let plaintext = match tokio::fs::read(ephemeral_state_path).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(IacDriverError::StateFileIo {
                    path: ephemeral_state_path.display().to_string(),
                    source,
                })
            }
        };

        let stored = if let Some(key) = self.storage.transit_key_name() {
            self.secret_client.encrypt_transit_data(key, &plaintext).await?
        } else {
            String::from_utf8_lossy(&plaintext).into_owned()
        };

        self.storage
            .write_ciphertext(&stored, Some(self.secret_client), self.object)
            .await?;
        Ok(())
    }

    async fn scoped_state(&self, dir: &Path) -> Result<(EphemeralSymlinks, PathBuf), IacDriverError> {
        let map = HashMap::from([
            ("state".to_owned(), dir.join("terraform.tfstate")),
            ("backup".to_owned(), dir.join("terraform.tfstate.backup")),
        ]);
        let symlinks = EphemeralSymlinks::create(&map, "iacdriver-state-", Path::new("/dev/shm"))?;
        let state_path = symlinks.paths()["state"].clone();
        self.load_plaintext_into(&state_path).await?;
        Ok((symlinks, state_path))
    }

    async fn finish_state(&self, symlinks: EphemeralSymlinks, state_path: &Path) -> Result<(), IacDriverError> {
        self.save_plaintext_from(state_path).await?;
        symlinks.close().await?;
        Ok(())
    }

    async fn ephemeral_var_file(
        &self,
        vars: &HashMap<String, Value>,
    ) -> Result<Option<pylon_ephemeral::EphemeralFile>, IacDriverError> {
        if vars.is_empty() {
            return Ok(None);
        }
        let file = pylon_ephemeral::EphemeralFile::create_default("iacdriver-vars-")?;
        let json = serde_json::to_vec(vars)?;
        tokio::fs::write(file.path(), &json)
            .await
            .map_err(|source| IacDriverError::StateFileIo {
                path: file.path().display().to_string(),
                source,
            })?;
        Ok(Some(file))
    }

    fn workspace_env(&self, workspace: &str, base_env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = base_env.clone();
        if workspace != ProvisioningBackendRef::DEFAULT_WORKSPACE {
            env.insert("TF_WORKSPACE".to_owned(), workspace.to_owned());
        }
        env
    }

    /// Lists workspaces, suppressing any inherited `TF_WORKSPACE` so the
    /// tool can't reject the listing with an "override" error.
    ///
    /// # Errors
    ///
    /// Returns [`IacDriverError::Command`] on a non-zero exit.
    pub async fn list_workspaces(&self, root: &str) -> Result<Vec<String>, IacDriverError> {
        let dir = self.working_dir(root)?;
        let argv = vec![self.config.tool_binary.clone(), "workspace".to_owned(), "list".to_owned()];
        let mut opts = pylon_cmd::RunOptions::new();
        opts.cwd = Some(dir);
        opts.suppress_env_vars = vec!["TF_WORKSPACE".to_owned()];
        let out = pylon_cmd::run(&argv, &opts).await?;
        Ok(out
            .lines()
            .map(|l| l.trim_start_matches('*').trim().to_owned())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Ensures `workspace` exists under `root`, creating it if necessary.
    /// A no-op for the default workspace.
    ///
    /// # Errors
    ///
    /// Returns [`IacDriverError::Command`] if listing or creation fails.
    pub async fn ensure_workspace(&self, root: &str, workspace: &str) -> Result<(), IacDriverError> {
        if workspace == ProvisioningBackendRef::DEFAULT_WORKSPACE {
            return Ok(());
        }
        let existing = self.list_workspaces(root).await?;
        if existing.iter().any(|w| w == workspace) {
            return Ok(());
        }
        let dir = self.working_dir(root)?;
        let argv = vec![
            self.config.tool_binary.clone(),
            "workspace".to_owned(),
            "new".to_owned(),
            workspace.to_owned(),
        ];
        let mut opts = pylon_cmd::RunOptions::new();
        opts.cwd = Some(dir);
        opts.suppress_env_vars = vec!["TF_WORKSPACE".to_owned()];
        pylon_cmd::run(&argv, &opts).await?;
        Ok(())
    }

    /// Runs `init -no-color` (plus `-reconfigure` if requested).
    ///
    /// # Errors
    ///
    /// Returns [`IacDriverError::Command`] on a non-zero exit, or a state
    /// or working-directory error.
    pub async fn init(&self, root: &str, reconfigure: bool) -> Result<(), IacDriverError> {
        let dir = self.working_dir(root)?;
        let mut argv = vec![self.config.tool_binary.clone(), "init".to_owned(), "-no-color".to_owned()];
        if reconfigure {
            argv.push("-reconfigure".to_owned());
        }
        let mut opts = pylon_cmd::RunOptions::new();
        opts.cwd = Some(dir);
        pylon_cmd::run(&argv, &opts).await?;
        Ok(())
    }

    /// Runs `apply -no-color -auto-approve` (plus `-lock=false` if
    /// `lock_disabled`), scoping ephemeral state and, if `vars` is
    /// non-empty, an ephemeral `*.auto.tfvars.json` file.
    ///
    /// # Errors
    ///
    /// Returns [`IacDriverError::Command`] on a non-zero exit, and always
    /// attempts to save state back to storage even when apply fails.
    pub async fn apply(
        &self,
        backend: &ProvisioningBackendRef,
        vars: &HashMap<String, Value>,
        env: &HashMap<String, String>,
        lock_disabled: bool,
    ) -> Result<(), IacDriverError> {
        self.run_mutating("apply", backend, vars, env, lock_disabled).await
    }

    /// Runs `destroy -no-color -auto-approve` (plus `-lock=false` if
    /// `lock_disabled`). A no-op if `backend.workspace` does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`IacDriverError::Command`] on a non-zero exit.
    pub async fn destroy(
        &self,
        backend: &ProvisioningBackendRef,
        vars: &HashMap<String, Value>,
        env: &HashMap<String, String>,
        lock_disabled: bool,
    ) -> Result<(), IacDriverError> {
        if backend.workspace != ProvisioningBackendRef::DEFAULT_WORKSPACE {
            let existing = self.list_workspaces(&backend.root).await?;
            if !existing.iter().any(|w| w == &backend.workspace) {
                return Ok(());
            }
        }
        self.run_mutating("destroy", backend, vars, env, lock_disabled).await
    }

    async fn run_mutating(
        &self,
        action: &str,
        backend: &ProvisioningBackendRef,
        vars: &HashMap<String, Value>,
        env: &HashMap<String, String>,
        lock_disabled: bool,
    ) -> Result<(), IacDriverError> {
        let dir = self.working_dir(&backend.root)?;
        self.ensure_workspace(&backend.root, &backend.workspace).await?;

        let (symlinks, state_path) = self.scoped_state(&dir).await?;
        let var_file = self.ephemeral_var_file(vars).await?;

        let mut argv = vec![
            self.config.tool_binary.clone(),
            action.to_owned(),
            "-no-color".to_owned(),
            "-auto-approve".to_owned(),
        ];
        if lock_disabled {
            argv.push("-lock=false".to_owned());
        }
        if let Some(file) = &var_file {
            argv.push("-var-file".to_owned());
            argv.push(file.path().display().to_string());
        }

        let mut opts = pylon_cmd::RunOptions::new();
        opts.cwd = Some(dir);
        opts.env = Some(self.workspace_env(&backend.workspace, env));

        let result = pylon_cmd::run(&argv, &opts).await;
        self.finish_state(symlinks, &state_path).await?;
        if let Some(file) = var_file {
            file.close().await?;
        }
        result.map(|_| ()).map_err(IacDriverError::Command)
    }

    /// Runs `show -no-color -json` and parses the captured stdout into a
    /// [`ProvisioningState`].
    ///
    /// # Errors
    ///
    /// Returns [`IacDriverError::Command`] on a non-zero exit, or
    /// [`IacDriverError::InvalidJson`] if stdout isn't valid state JSON.
    pub async fn show(&self, backend: &ProvisioningBackendRef) -> Result<ProvisioningState, IacDriverError> {
        let dir = self.working_dir(&backend.root)?;
        let (symlinks, state_path) = self.scoped_state(&dir).await?;

        let argv = vec![self.config.tool_binary.clone(), "show".to_owned(), "-no-color".to_owned(), "-json".to_owned()];
        let mut opts = pylon_cmd::RunOptions::new();
        opts.cwd = Some(dir);
        opts.env = Some(self.workspace_env(&backend.workspace, &HashMap::new()));

        let result = pylon_cmd::run(&argv, &opts).await;
        self.finish_state(symlinks, &state_path).await?;
        let stdout = result?;
        Ok(serde_json::from_str(&stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_statestore::NoStorage;
    use pylon_models::config::SecretClientConfig;

    fn driver_config(base: &Path) -> IacDriverConfig {
        IacDriverConfig {
            tool_binary: "true".to_owned(),
            base_path: base.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn missing_working_dir_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let secret_client = SecretClient::new(SecretClientConfig {
            vault_role_name: "role".to_owned(),
            ..Default::default()
        })
        .unwrap();
        let storage = NoStorage;
        let driver = IacDriver::new(driver_config(tmp.path()), &secret_client, &storage, None);

        let err = driver.init("missing-root", false).await.unwrap_err();
        assert!(matches!(err, IacDriverError::WorkingDirMissing(_)));
    }

    #[tokio::test]
    async fn init_runs_the_configured_binary_in_the_working_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("root")).unwrap();
        let secret_client = SecretClient::new(SecretClientConfig {
            vault_role_name: "role".to_owned(),
            ..Default::default()
        })
        .unwrap();
        let storage = NoStorage;
        let driver = IacDriver::new(driver_config(tmp.path()), &secret_client, &storage, None);

        driver.init("root", false).await.unwrap();
    }

    #[tokio::test]
    async fn destroy_is_a_no_op_for_a_nonexistent_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("root")).unwrap();
        let secret_client = SecretClient::new(SecretClientConfig {
            vault_role_name: "role".to_owned(),
            ..Default::default()
        })
        .unwrap();
        let storage = NoStorage;
        let driver = IacDriver::new(
            IacDriverConfig {
                tool_binary: "false".to_owned(),
                base_path: tmp.path().to_path_buf(),
            },
            &secret_client,
            &storage,
            None,
        );

        let backend = ProvisioningBackendRef::new("root", Some("dev".to_owned())).unwrap();
        driver
            .destroy(&backend, &HashMap::new(), &HashMap::new(), false)
            .await
            .unwrap();
    }
}
