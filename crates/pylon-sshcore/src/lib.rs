//! TOFU and strict-mode SSH execution over ephemeral key/known-hosts files.
//!
//! Every operation here writes the private key and known-hosts file to
//! `/dev/shm` for the duration of one `ssh` invocation and relies on
//! [`pylon_ephemeral`] to guarantee they're gone afterward.

use std::path::Path;

use pylon_ephemeral::EphemeralSymlinks;
use pylon_models::ssh::{KubectlCommand, SshConfig};

/// Failure performing an SSH operation.
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("ephemeral file setup failed: {0}")]
    Ephemeral(#[from] pylon_ephemeral::EphemeralError),
    #[error("failed to write {path}: {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },
    #[error("ssh command failed: {0}")]
    Command(#[from] pylon_cmd::CommandError),
    #[error("ssh_get_server_key: no host keys were recorded")]
    NoHostKeys,
    #[error("strict SSH operations require ssh_config.host_keys to be non-empty (run TOFU first)")]
    HostKeysNotPinned,
}

fn shell_quote_join(argv: &[String]) -> String {
    argv.iter()
        .map(|token| shell_words::quote(token).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

async fn write_private_key(path: &Path, private_key: &str) -> Result<(), SshError> {
    tokio::fs::write(path, private_key.as_bytes())
        .await
        .map_err(|source| SshError::WriteFile {
            path: path.display().to_string(),
            source,
        })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|source| SshError::WriteFile {
                path: path.display().to_string(),
                source,
            })?;
    }
    Ok(())
}

async fn write_known_hosts(path: &Path, host_keys: &[String]) -> Result<(), SshError> {
    let content = host_keys
        .iter()
        .map(|line| format!("{line}\n"))
        .collect::<String>();
    tokio::fs::write(path, content)
        .await
        .map_err(|source| SshError::WriteFile {
            path: path.display().to_string(),
            source,
        })
}

fn scoped_files(cfg: &SshConfig) -> Result<(EphemeralSymlinks, std::path::PathBuf, std::path::PathBuf), SshError> {
    let tmp_targets = std::env::temp_dir();
    let kh_target = tmp_targets.join(format!("pylon-sshcore-kh-{}-{}", cfg.hostname, std::process::id()));
    let pk_target = tmp_targets.join(format!("pylon-sshcore-pk-{}-{}", cfg.hostname, std::process::id()));

    let map = std::collections::HashMap::from([
        ("known_hosts".to_owned(), kh_target.clone()),
        ("id_key".to_owned(), pk_target.clone()),
    ]);
    let symlinks = EphemeralSymlinks::create(&map, "sshcore-", Path::new("/dev/shm"))?;
    Ok((symlinks, kh_target, pk_target))
}

/// Performs a trust-on-first-use handshake, returning the server's
/// host-key lines as recorded into a fresh ephemeral known-hosts file.
///
/// # Errors
///
/// Returns [`SshError::Command`] if the handshake fails, or
/// [`SshError::NoHostKeys`] if it succeeds but no host-key lines were
/// captured.
pub async fn get_server_key(cfg: &SshConfig) -> Result<Vec<String>, SshError> {
    let (symlinks, kh_path, pk_path) = scoped_files(cfg)?;
    let ephemeral = symlinks.paths();
    let kh_ephemeral = &ephemeral["known_hosts"];
    let pk_ephemeral = &ephemeral["id_key"];

    write_private_key(pk_ephemeral, &cfg.private_key).await?;

    let argv: Vec<String> = vec![
        "ssh".to_owned(),
        "-p".to_owned(),
        cfg.port.to_string(),
        "-i".to_owned(),
        pk_ephemeral.to_string_lossy().into_owned(),
        "-o".to_owned(),
        "BatchMode=yes".to_owned(),
        "-o".to_owned(),
        "StrictHostKeyChecking=accept-new".to_owned(),
        "-o".to_owned(),
        format!("UserKnownHostsFile={}", kh_ephemeral.display()),
        "-o".to_owned(),
        "GlobalKnownHostsFile=/dev/null".to_owned(),
        format!("{}@{}", cfg.user, cfg.hostname),
        "exit".to_owned(),
        "0".to_owned(),
    ];

    let mut opts = pylon_cmd::RunOptions::new();
    opts.retries = 3;
    opts.retry_delay = std::time::Duration::from_secs(1);
    pylon_cmd::run(&argv, &opts).await?;

    let lines = if tokio::fs::try_exists(kh_ephemeral).await.unwrap_or(false) {
        tokio::fs::read_to_string(kh_ephemeral)
            .await
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    symlinks.close().await?;
    let _ = (kh_path, pk_path);

    if lines.is_empty() {
        return Err(SshError::NoHostKeys);
    }
    Ok(lines)
}

/// Options for [`run_ssh`].
#[derive(Debug, Clone, Default)]
pub struct RunSshOptions {
    pub env: Option<std::collections::BTreeMap<String, String>>,
    pub ok_codes: Vec<i32>,
    pub retries: u32,
    pub retry_delay: std::time::Duration,
    pub sensitive: bool,
}

impl RunSshOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ok_codes: vec![0],
            retries: 3,
            retry_delay: std::time::Duration::from_secs(1),
            sensitive: true,
            ..Default::default()
        }
    }
}

/// Runs `remote_command` over SSH in strict host-key-checking mode.
///
/// Requires `cfg.host_keys` to already be populated (via [`get_server_key`]
/// or a prior successful strict run) — no network contact is attempted
/// otherwise.
///
/// # Errors
///
/// Returns [`SshError::HostKeysNotPinned`] if `cfg.host_keys` is empty, or
/// [`SshError::Command`] if the remote command exits outside
/// `opts.ok_codes`.
pub async fn run_ssh(
    cfg: &SshConfig,
    remote_command: &[String],
    opts: &RunSshOptions,
) -> Result<String, SshError> {
    if !cfg.has_pinned_host_keys() {
        return Err(SshError::HostKeysNotPinned);
    }

    let (symlinks, ..) = scoped_files(cfg)?;
    let ephemeral = symlinks.paths();
    let kh_ephemeral = &ephemeral["known_hosts"];
    let pk_ephemeral = &ephemeral["id_key"];

    write_known_hosts(kh_ephemeral, &cfg.host_keys).await?;
    write_private_key(pk_ephemeral, &cfg.private_key).await?;

    let mut ssh_argv: Vec<String> = [
        "ssh", "-p",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect();
    ssh_argv.push(cfg.port.to_string());
    ssh_argv.push("-i".to_owned());
    ssh_argv.push(pk_ephemeral.to_string_lossy().into_owned());
    ssh_argv.push("-o".to_owned());
    ssh_argv.push("BatchMode=yes".to_owned());
    ssh_argv.push("-o".to_owned());
    ssh_argv.push("StrictHostKeyChecking=yes".to_owned());
    ssh_argv.push("-o".to_owned());
    ssh_argv.push(format!("UserKnownHostsFile={}", kh_ephemeral.display()));
    ssh_argv.push("-o".to_owned());
    ssh_argv.push("GlobalKnownHostsFile=/dev/null".to_owned());
    ssh_argv.push(format!("{}@{}", cfg.user, cfg.hostname));

    let mut remote = remote_command.to_vec();
    if let Some(env) = &opts.env {
        if !env.is_empty() {
            let mut prefixed = vec!["env".to_owned()];
            prefixed.extend(env.iter().map(|(k, v)| format!("{k}={v}")));
            prefixed.extend(remote);
            remote = prefixed;
        }
    }
    ssh_argv.push(shell_quote_join(&remote));

    let mut run_opts = pylon_cmd::RunOptions::new();
    run_opts.ok_codes = if opts.ok_codes.is_empty() {
        vec![0]
    } else {
        opts.ok_codes.clone()
    };
    run_opts.retries = opts.retries.max(1);
    run_opts.retry_delay = opts.retry_delay;
    run_opts.sensitive = opts.sensitive;

    let result = pylon_cmd::run(&ssh_argv, &run_opts).await;
    symlinks.close().await?;
    Ok(result?)
}

/// Opens an interactive SSH shell (`ssh -t`) in strict mode, returning the
/// session's exit code.
///
/// # Errors
///
/// Returns [`SshError::HostKeysNotPinned`] if `cfg.host_keys` is empty, or
/// [`SshError::Command`] if the SSH process could not be spawned.
pub async fn interactive_shell(cfg: &SshConfig) -> Result<i32, SshError> {
    if !cfg.has_pinned_host_keys() {
        return Err(SshError::HostKeysNotPinned);
    }

    let (symlinks, ..) = scoped_files(cfg)?;
    let ephemeral = symlinks.paths();
    let kh_ephemeral = &ephemeral["known_hosts"];
    let pk_ephemeral = &ephemeral["id_key"];

    write_known_hosts(kh_ephemeral, &cfg.host_keys).await?;
    write_private_key(pk_ephemeral, &cfg.private_key).await?;

    let argv: Vec<String> = vec![
        "ssh".to_owned(),
        "-t".to_owned(),
        "-p".to_owned(),
        cfg.port.to_string(),
        "-i".to_owned(),
        pk_ephemeral.to_string_lossy().into_owned(),
        "-o".to_owned(),
        "BatchMode=yes".to_owned(),
        "-o".to_owned(),
        "StrictHostKeyChecking=yes".to_owned(),
        "-o".to_owned(),
        format!("UserKnownHostsFile={}", kh_ephemeral.display()),
        "-o".to_owned(),
        "GlobalKnownHostsFile=/dev/null".to_owned(),
        format!("{}@{}", cfg.user, cfg.hostname),
    ];

    let result = pylon_cmd::run_interactive(&argv).await;
    symlinks.close().await?;
    Ok(result?)
}

/// Runs a `kubectl exec` command locally — no SSH involved.
///
/// # Errors
///
/// Returns [`SshError::Command`] if `kubectl` exits non-zero.
pub async fn run_kubectl(cmd: &KubectlCommand) -> Result<String, SshError> {
    let argv = cmd.build_argv();
    let opts = pylon_cmd::RunOptions::new();
    Ok(pylon_cmd::run(&argv, &opts).await?)
}

/// Runs a `kubectl exec` command on a remote host over strict-mode SSH.
///
/// # Errors
///
/// Returns [`SshError::HostKeysNotPinned`] if `cfg.host_keys` is empty, or
/// [`SshError::Command`] if the remote `kubectl` exits non-zero.
pub async fn run_ssh_kubectl(cfg: &SshConfig, cmd: &KubectlCommand) -> Result<String, SshError> {
    if !cfg.has_pinned_host_keys() {
        return Err(SshError::HostKeysNotPinned);
    }
    run_ssh(cfg, &cmd.build_argv(), &RunSshOptions::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_without_keys() -> SshConfig {
        SshConfig::new("root", "example.invalid", 22, "fake-key", vec![]).unwrap()
    }

    #[tokio::test]
    async fn run_ssh_requires_pinned_host_keys() {
        let cfg = cfg_without_keys();
        let err = run_ssh(&cfg, &["true".to_owned()], &RunSshOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::HostKeysNotPinned));
    }

    #[tokio::test]
    async fn interactive_shell_requires_pinned_host_keys() {
        let cfg = cfg_without_keys();
        let err = interactive_shell(&cfg).await.unwrap_err();
        assert!(matches!(err, SshError::HostKeysNotPinned));
    }

    #[tokio::test]
    async fn run_ssh_kubectl_requires_pinned_host_keys() {
        let cfg = cfg_without_keys();
        let cmd = KubectlCommand {
            namespace: "ns".to_owned(),
            pod: "pod".to_owned(),
            container: None,
            command: vec!["ls".to_owned()],
            env: None,
        };
        let err = run_ssh_kubectl(&cfg, &cmd).await.unwrap_err();
        assert!(matches!(err, SshError::HostKeysNotPinned));
    }
}
