//! Ephemeral tmpfs-backed files and symlinks.
//!
//! Two modes, both scoped by an RAII guard:
//!
//! - [`EphemeralFile`]: one uniquely-named file inside a fresh directory
//!   under `/dev/shm` (or an overridden parent, for tests).
//! - [`EphemeralSymlinks`]: one ephemeral directory holding one file per
//!   entry of a `{name -> target}` map, with each target (re)pointed at its
//!   ephemeral file via a symlink.
//!
//! On drop, every symlink, every ephemeral file, and the ephemeral directory
//! are removed best-effort (failures are logged, not propagated — `Drop`
//! cannot return a `Result`). Call [`EphemeralFile::close`] or
//! [`EphemeralSymlinks::close`] to perform the same cleanup and observe
//! errors explicitly.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const DEFAULT_PARENT_DIR: &str = "/dev/shm";
const FILE_MODE: u32 = 0o600;

/// Failure creating, symlinking, or cleaning up ephemeral state.
#[derive(Debug, thiserror::Error)]
pub enum EphemeralError {
    #[error("failed to create ephemeral directory under {parent}: {source}")]
    CreateDir { parent: PathBuf, source: io::Error },
    #[error("failed to create ephemeral file {path}: {source}")]
    CreateFile { path: PathBuf, source: io::Error },
    #[error("failed to symlink {target} to {source_path}: {source}")]
    Symlink {
        target: PathBuf,
        source_path: PathBuf,
        source: io::Error,
    },
    #[error("cleanup failed for {path}: {source}")]
    Cleanup { path: PathBuf, source: io::Error },
}

fn make_scoped_dir(prefix: &str, parent_dir: &Path) -> Result<PathBuf, EphemeralError> {
    let dir = parent_dir.join(format!("{prefix}{}", uuid::Uuid::new_v4()));
    fs::create_dir(&dir).map_err(|source| EphemeralError::CreateDir {
        parent: parent_dir.to_path_buf(),
        source,
    })?;
    Ok(dir)
}

fn create_empty_file(path: &Path) -> Result<(), EphemeralError> {
    let file = fs::File::create(path).map_err(|source| EphemeralError::CreateFile {
        path: path.to_path_buf(),
        source,
    })?;
    file.set_permissions(fs::Permissions::from_mode(FILE_MODE))
        .map_err(|source| EphemeralError::CreateFile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(())
}

fn remove_dir_contents_and_self(dir: &Path) -> io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() || path.is_symlink() {
            fs::remove_file(&path)?;
        }
    }
    fs::remove_dir(dir)
}

/// A single file created inside a fresh ephemeral directory.
pub struct EphemeralFile {
    dir: PathBuf,
    path: PathBuf,
    finished: bool,
}

impl EphemeralFile {
    /// Creates a fresh directory under `parent_dir` and one empty,
    /// mode-0600 file inside it named with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`EphemeralError::CreateDir`] or [`EphemeralError::CreateFile`]
    /// if the filesystem operations fail.
    pub fn create(prefix: &str, parent_dir: &Path) -> Result<Self, EphemeralError> {
        let dir = make_scoped_dir(prefix, parent_dir)?;
        let path = dir.join("data");
        create_empty_file(&path)?;
        Ok(Self {
            dir,
            path,
            finished: false,
        })
    }

    /// Creates the file under the default tmpfs location (`/dev/shm`).
    ///
    /// # Errors
    ///
    /// See [`EphemeralFile::create`].
    pub fn create_default(prefix: &str) -> Result<Self, EphemeralError> {
        Self::create(prefix, Path::new(DEFAULT_PARENT_DIR))
    }

    /// The absolute path to the ephemeral file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file and its scoping directory, returning any error
    /// instead of only logging it as `Drop` would.
    ///
    /// # Errors
    ///
    /// Returns [`EphemeralError::Cleanup`] if removal fails.
    pub async fn close(mut self) -> Result<(), EphemeralError> {
        self.finished = true;
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || remove_dir_contents_and_self(&dir))
            .await
            .unwrap_or_else(|join_err| {
                Err(io::Error::other(join_err.to_string()))
            })
            .map_err(|source| EphemeralError::Cleanup {
                path: self.dir.clone(),
                source,
            })
    }
}

impl Drop for EphemeralFile {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = remove_dir_contents_and_self(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %err, "ephemeral file cleanup failed");
        }
    }
}

/// An ephemeral directory holding one file per `symlink_map` entry, with
/// each map value (re)pointed at its ephemeral file via a symlink.
pub struct EphemeralSymlinks {
    dir: PathBuf,
    targets: Vec<PathBuf>,
    paths: HashMap<String, PathBuf>,
    finished: bool,
}

impl EphemeralSymlinks {
    /// Creates the ephemeral directory, one file per `symlink_map` entry,
    /// and symlinks each entry's target path at its ephemeral file —
    /// replacing whatever previously existed at that path.
    ///
    /// # Errors
    ///
    /// Returns [`EphemeralError::CreateDir`], [`EphemeralError::CreateFile`],
    /// or [`EphemeralError::Symlink`] if any step fails.
    pub fn create(
        symlink_map: &HashMap<String, PathBuf>,
        prefix: &str,
        parent_dir: &Path,
    ) -> Result<Self, EphemeralError> {
        let dir = make_scoped_dir(prefix, parent_dir)?;
        let mut targets = Vec::with_capacity(symlink_map.len());
        let mut paths = HashMap::with_capacity(symlink_map.len());

        for (name, target) in symlink_map {
            let ephemeral_path = dir.join(name);
            create_empty_file(&ephemeral_path)?;

            if target.exists() || target.is_symlink() {
                fs::remove_file(target).map_err(|source| EphemeralError::Symlink {
                    target: target.clone(),
                    source_path: ephemeral_path.clone(),
                    source,
                })?;
            }
            std::os::unix::fs::symlink(&ephemeral_path, target).map_err(|source| {
                EphemeralError::Symlink {
                    target: target.clone(),
                    source_path: ephemeral_path.clone(),
                    source,
                }
            })?;

            targets.push(target.clone());
            paths.insert(name.clone(), ephemeral_path);
        }

        Ok(Self {
            dir,
            targets,
            paths,
            finished: false,
        })
    }

    /// Creates the symlink set under the default tmpfs location
    /// (`/dev/shm`) with the conventional `ephemeral-` prefix.
    ///
    /// # Errors
    ///
    /// See [`EphemeralSymlinks::create`].
    pub fn create_default(symlink_map: &HashMap<String, PathBuf>) -> Result<Self, EphemeralError> {
        Self::create(symlink_map, "ephemeral-", Path::new(DEFAULT_PARENT_DIR))
    }

    /// The ephemeral file path for each `symlink_map` key.
    #[must_use]
    pub fn paths(&self) -> &HashMap<String, PathBuf> {
        &self.paths
    }

    /// Removes every symlink, every ephemeral file, and the ephemeral
    /// directory, returning any error instead of only logging it as
    /// `Drop` would.
    ///
    /// # Errors
    ///
    /// Returns [`EphemeralError::Cleanup`] if removal fails.
    pub async fn close(mut self) -> Result<(), EphemeralError> {
        self.finished = true;
        let dir = self.dir.clone();
        let targets = std::mem::take(&mut self.targets);
        tokio::task::spawn_blocking(move || cleanup_symlinks(&dir, &targets))
            .await
            .unwrap_or_else(|join_err| Err(io::Error::other(join_err.to_string())))
            .map_err(|source| EphemeralError::Cleanup {
                path: self.dir.clone(),
                source,
            })
    }
}

fn cleanup_symlinks(dir: &Path, targets: &[PathBuf]) -> io::Result<()> {
    for target in targets {
        if target.is_symlink() || target.exists() {
            fs::remove_file(target)?;
        }
    }
    remove_dir_contents_and_self(dir)
}

impl Drop for EphemeralSymlinks {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = cleanup_symlinks(&self.dir, &self.targets) {
            tracing::warn!(dir = %self.dir.display(), error = %err, "ephemeral symlink cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_parent() -> PathBuf {
        std::env::temp_dir()
    }

    #[test]
    fn ephemeral_file_creates_mode_0600_file() {
        let file = EphemeralFile::create("test-", &tmp_parent()).unwrap();
        let meta = fs::metadata(file.path()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, FILE_MODE);
    }

    #[tokio::test]
    async fn ephemeral_file_close_removes_file_and_dir() {
        let file = EphemeralFile::create("test-", &tmp_parent()).unwrap();
        let dir = file.dir.clone();
        file.close().await.unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn ephemeral_file_drop_removes_file_and_dir() {
        let dir = {
            let file = EphemeralFile::create("test-", &tmp_parent()).unwrap();
            file.dir.clone()
        };
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn symlinks_point_at_ephemeral_files_and_clean_up() {
        let scratch = tempfile_dir();
        let target = scratch.join("linked.txt");
        let map = HashMap::from([("linked.txt".to_owned(), target.clone())]);

        let symlinks = EphemeralSymlinks::create(&map, "test-", &tmp_parent()).unwrap();
        assert!(target.is_symlink());
        let ephemeral_path = symlinks.paths().get("linked.txt").unwrap().clone();
        assert_eq!(fs::read_link(&target).unwrap(), ephemeral_path);

        symlinks.close().await.unwrap();
        assert!(!target.exists());
        assert!(!ephemeral_path.exists());

        fs::remove_dir_all(&scratch).ok();
    }

    #[tokio::test]
    async fn symlinks_replace_preexisting_target() {
        let scratch = tempfile_dir();
        let target = scratch.join("existing.txt");
        fs::write(&target, b"old contents").unwrap();

        let map = HashMap::from([("existing.txt".to_owned(), target.clone())]);
        let symlinks = EphemeralSymlinks::create(&map, "test-", &tmp_parent()).unwrap();
        assert!(target.is_symlink());

        symlinks.close().await.unwrap();
        fs::remove_dir_all(&scratch).ok();
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pylon-ephemeral-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
