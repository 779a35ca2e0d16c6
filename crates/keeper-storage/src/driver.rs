use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use keeper_core::{KeeperError, Result};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::keyfile::{self, Groups};

/// File name of the account key-file inside the account directory.
pub const ACCOUNTS_FILE: &str = "accounts.cfg";

/// Loads and saves the account key-file.
///
/// Saves replace the file atomically (temp file in the same directory,
/// fsync, rename) so a crash mid-flush leaves either the old or the new
/// contents on disk, never a mix.
#[derive(Debug, Clone)]
pub struct PersistenceDriver {
    path: PathBuf,
}

impl PersistenceDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Driver for `accounts.cfg` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(ACCOUNTS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every group from disk. A missing file is an empty store.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Groups> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no account file yet, starting empty");
                return Ok(Groups::new());
            }
            Err(err) => return Err(storage_err(err)),
        };
        let groups = keyfile::parse(&contents)?;
        debug!(groups = groups.len(), "loaded account file");
        Ok(groups)
    }

    /// Atomically replace the file with `groups`.
    #[instrument(skip_all, fields(path = %self.path.display(), groups = groups.len()))]
    pub fn save(&self, groups: &Groups) -> Result<()> {
        write_atomic(&self.path, keyfile::serialize(groups).as_bytes())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| KeeperError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    // NamedTempFile is created with 0600 permissions on unix.
    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    tmp.write_all(contents).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;

    match tmp.persist(path) {
        Ok(_) => {}
        Err(err) if is_transient(&err.error) => {
            warn!(error = %err.error, "rename failed, retrying once");
            err.file.persist(path).map_err(|e| storage_err(e.error))?;
        }
        Err(err) => return Err(storage_err(err.error)),
    }

    sync_dir(parent);
    Ok(())
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::ResourceBusy
    )
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!(error = %err, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn storage_err<E: ToString>(err: E) -> KeeperError {
    KeeperError::storage(err)
}
