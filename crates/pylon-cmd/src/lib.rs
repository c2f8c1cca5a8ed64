//! Asynchronous subprocess execution.
//!
//! Every external tool invocation in this workspace — the provisioning
//! CLI, `ssh`, `kubectl`, the RKE2 installer — goes through [`run`] or
//! [`run_interactive`] so that env handling, retries, and error redaction
//! are consistent in one place.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Non-zero exit or spawn failure from [`run`] / [`run_interactive`].
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Process exited with a code outside `ok_codes`. Carries the full
    /// command line and captured output only when the call was non-sensitive.
    #[error("command exited with code {return_code}")]
    Failed {
        return_code: i32,
        argv: Option<Vec<String>>,
        stdout: Option<String>,
        stderr: Option<String>,
    },
    /// The child process could not be spawned at all.
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

impl CommandError {
    /// The process exit code, when known.
    #[must_use]
    pub fn return_code(&self) -> Option<i32> {
        match self {
            Self::Failed { return_code, .. } => Some(*return_code),
            Self::Spawn(_) => None,
        }
    }
}

/// Options controlling one [`run`] invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Extra environment variables, merged over the inherited process env.
    pub env: Option<HashMap<String, String>>,
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
    /// Bytes written to the child's stdin, then the handle is closed.
    pub stdin: Option<Vec<u8>>,
    /// Number of attempts (not additional retries) — 1 means no retrying.
    pub retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Exit codes treated as success.
    pub ok_codes: Vec<i32>,
    /// When `true` (the default), a failure's `Display` omits the command
    /// line and captured output, leaving only the exit code.
    pub sensitive: bool,
    /// Environment variable names to strip from the child's environment,
    /// even if inherited from this process or present in `env`.
    pub suppress_env_vars: Vec<String>,
}

impl RunOptions {
    /// Sensible defaults: one attempt, `okCodes=[0]`, `sensitive=true`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            retries: 1,
            retry_delay: Duration::from_secs(1),
            ok_codes: vec![0],
            sensitive: true,
            ..Default::default()
        }
    }
}

fn build_command(argv: &[String], opts: &RunOptions) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }
    if let Some(env) = &opts.env {
        cmd.envs(env);
    }
    for var in &opts.suppress_env_vars {
        cmd.env_remove(var);
    }
    cmd.stdin(if opts.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd
}

async fn run_once(argv: &[String], opts: &RunOptions) -> Result<String, CommandError> {
    use tokio::io::AsyncWriteExt;

    let mut child = build_command(argv, opts).spawn()?;

    if let Some(input) = &opts.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
        }
    }

    let output = child.wait_with_output().await?;
    let code = output.status.code().unwrap_or(-1);

    if opts.ok_codes.contains(&code) {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned());
    }

    if opts.sensitive {
        Err(CommandError::Failed {
            return_code: code,
            argv: None,
            stdout: None,
            stderr: None,
        })
    } else {
        Err(CommandError::Failed {
            return_code: code,
            argv: Some(argv.to_vec()),
            stdout: Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        })
    }
}

/// Runs `argv` with the given options, retrying on failure up to
/// `opts.retries` attempts total.
///
/// Returns the trimmed stdout of the successful attempt.
///
/// # Errors
///
/// Returns [`CommandError::Failed`] if every attempt exits outside
/// `opts.ok_codes`, or [`CommandError::Spawn`] if the process could not be
/// started.
pub async fn run(argv: &[String], opts: &RunOptions) -> Result<String, CommandError> {
    assert!(!argv.is_empty(), "argv must contain at least a program name");

    let label = argv[0].clone();
    pylon_retry::retry(&label, opts.retries.max(1), opts.retry_delay, || {
        run_once(argv, opts)
    })
    .await
}

/// Runs `argv` with stdio inherited from this process (required for `ssh
/// -t` and other interactive tools), returning the child's exit code.
///
/// # Errors
///
/// Returns [`CommandError::Spawn`] if the process could not be started.
pub async fn run_interactive(argv: &[String]) -> Result<i32, CommandError> {
    assert!(!argv.is_empty(), "argv must contain at least a program name");

    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;

    Ok(status.code().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn captures_trimmed_stdout_on_success() {
        let out = run(&argv(&["echo", "hello"]), &RunOptions::new())
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let err = run(&argv(&["sh", "-c", "exit 3"]), &RunOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.return_code(), Some(3));
    }

    #[tokio::test]
    async fn ok_codes_allow_nonzero_exit() {
        let mut opts = RunOptions::new();
        opts.ok_codes = vec![0, 3];
        let result = run(&argv(&["sh", "-c", "exit 3"]), &opts).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn sensitive_error_omits_command_details() {
        let err = run(&argv(&["sh", "-c", "exit 1"]), &RunOptions::new())
            .await
            .unwrap_err();
        match err {
            CommandError::Failed { argv, stdout, stderr, .. } => {
                assert!(argv.is_none());
                assert!(stdout.is_none());
                assert!(stderr.is_none());
            }
            CommandError::Spawn(_) => panic!("expected Failed"),
        }
    }

    #[tokio::test]
    async fn non_sensitive_error_includes_command_details() {
        let mut opts = RunOptions::new();
        opts.sensitive = false;
        let err = run(&argv(&["sh", "-c", "exit 1"]), &opts).await.unwrap_err();
        match err {
            CommandError::Failed { argv, .. } => assert!(argv.is_some()),
            CommandError::Spawn(_) => panic!("expected Failed"),
        }
    }

    #[tokio::test]
    async fn suppress_env_vars_removes_inherited_variable() {
        std::env::set_var("PYLON_TEST_SUPPRESS_ME", "1");
        let mut opts = RunOptions::new();
        opts.suppress_env_vars = vec!["PYLON_TEST_SUPPRESS_ME".to_owned()];
        let out = run(
            &argv(&["sh", "-c", "echo ${PYLON_TEST_SUPPRESS_ME:-unset}"]),
            &opts,
        )
        .await
        .unwrap();
        assert_eq!(out, "unset");
        std::env::remove_var("PYLON_TEST_SUPPRESS_ME");
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut opts = RunOptions::new();
        opts.retries = 5;
        opts.retry_delay = Duration::from_millis(1);
        // `false` always fails; this just proves retries are attempted and
        // the final failure is still surfaced.
        let err = run(&argv(&["false"]), &opts).await.unwrap_err();
        assert_eq!(err.return_code(), Some(1));
    }
}
