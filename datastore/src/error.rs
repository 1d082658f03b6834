use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Possible errors from datastore operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to create datastore directory '{}': {}", path.display(), source))]
    CreateStore { path: PathBuf, source: io::Error },

    #[snafu(display("Reading key '{}' failed: {}", key, source))]
    KeyRead { key: String, source: io::Error },

    #[snafu(display("Writing key '{}' failed: {}", key, source))]
    KeyWrite { key: String, source: io::Error },

    #[snafu(display("Writing key '{}' failed to persist: {}", key, source))]
    KeyPersist {
        key: String,
        source: tempfile::PersistError,
    },

    #[snafu(display("Removing key at '{}' failed: {}", path.display(), source))]
    DeleteKey { path: PathBuf, source: io::Error },

    #[snafu(display("IO error on '{}': {}", path.display(), source))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("Error listing datastore keys: {}", source))]
    ListKeys { source: walkdir::Error },

    #[snafu(display("Datastore integrity violation at {}: {}", path.display(), msg))]
    Corruption { msg: String, path: PathBuf },

    #[snafu(display("Key name '{}' has invalid format: {}", name, msg))]
    InvalidKey { name: String, msg: String },

    #[snafu(display("Unable to parse shard function '{}': {}", func, msg))]
    ShardFunc { func: String, msg: String },

    #[snafu(display(
        "Shard function mismatch at {}: store has '{}', spec wants '{}'",
        path.display(),
        found,
        expected
    ))]
    ShardingMismatch {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[snafu(display("No mount matches key '{}'", key))]
    NoMount { key: String },

    #[snafu(display("Datastore logic error: {}", msg))]
    Internal { msg: String },
}

impl Error {
    /// Returns whether the error is a transient "too many open files"
    /// condition that the retry layer is allowed to absorb.
    pub fn is_temporary(&self) -> bool {
        let source = match self {
            Error::CreateStore { source, .. } => source,
            Error::KeyRead { source, .. } => source,
            Error::KeyWrite { source, .. } => source,
            Error::DeleteKey { source, .. } => source,
            Error::Io { source, .. } => source,
            _ => return false,
        };

        source.raw_os_error() == Some(nix::errno::Errno::EMFILE as i32)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
