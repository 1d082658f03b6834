//! Repository layout: the well-known files in an IPFS repo root, the
//! version gate, and the advisory lock serializing access to it.

use fs2::FileExt;
use log::debug;
use serde_json::Value;
use snafu::{ensure, ResultExt};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{self, Result};

pub const LOCK_FILE: &str = "repo.lock";
pub const CONFIG_FILE: &str = "config";
pub const SPECS_FILE: &str = "datastore_spec";
pub const VERSION_FILE: &str = "version";
pub const CONFIG_OLD_FILE: &str = "config-old";

/// The only fsrepo layout this tool understands.
pub const SUPPORTED_REPO_VERSION: u64 = 6;

/// Exclusive advisory lock on the repository.  Held for the whole of a
/// convert or revert; dropped (and so released) on scope exit, including
/// after a panic.
#[derive(Debug)]
pub struct Lock {
    file: File,
    path: PathBuf,
}

impl Lock {
    pub fn acquire(repo: &Path) -> Result<Self> {
        let path = repo.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .context(error::ReadRepoFileSnafu { path: &path })?;

        file.try_lock_exclusive()
            .context(error::RepoLockedSnafu { path: &path })?;
        debug!("Acquired repo lock at {}", path.display());

        Ok(Self { file, path })
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

/// Confirms the repo's version file names the supported layout.
pub fn check_repo_version(repo: &Path) -> Result<()> {
    let path = repo.join(VERSION_FILE);
    let raw = read_file(&path)?;
    let trimmed = raw.trim();

    let version: u64 = trimmed.parse().map_err(|_| error::Error::UnsupportedRepoVersion {
        version: trimmed.to_string(),
    })?;
    ensure!(
        version == SUPPORTED_REPO_VERSION,
        error::UnsupportedRepoVersionSnafu {
            version: trimmed,
        }
    );

    Ok(())
}

/// Reads a repo file, mapping absence to its own error so callers can tell
/// a missing file from an unreadable one.
pub fn read_file(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            error::MissingRepoFileSnafu { path }.fail()
        }
        Err(e) => Err(e).context(error::ReadRepoFileSnafu { path }),
    }
}

/// Loads a repo file as JSON.
pub fn load_json(path: &Path) -> Result<Value> {
    let contents = read_file(path)?;
    serde_json::from_str(&contents).context(error::ParseJsonSnafu { path })
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn version_gate() {
        let repo = TempDir::new().unwrap();
        let path = repo.path();

        // Missing version file
        check_repo_version(path).unwrap_err();

        fs::write(path.join(VERSION_FILE), "6\n").unwrap();
        check_repo_version(path).unwrap();

        fs::write(path.join(VERSION_FILE), "5\n").unwrap();
        check_repo_version(path).unwrap_err();

        fs::write(path.join(VERSION_FILE), "not a number").unwrap();
        check_repo_version(path).unwrap_err();
    }

    #[test]
    fn lock_is_exclusive() {
        let repo = TempDir::new().unwrap();

        let held = Lock::acquire(repo.path()).unwrap();
        let err = Lock::acquire(repo.path()).unwrap_err();
        assert!(err.to_string().contains("lock is already held"));

        // Released on drop.
        drop(held);
        Lock::acquire(repo.path()).unwrap();
    }
}
