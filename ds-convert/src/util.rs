//! Small helpers shared by the conversion phases.

use rand::{distributions::Alphanumeric, thread_rng, Rng};
use snafu::{OptionExt, ResultExt};
use std::fs;
use std::path::Path;

use crate::error::{self, Result};

/// Generates a random ID that can be used to name unique temp directories
/// and backup files for a single conversion attempt.
pub(crate) fn rando() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Returns whether the given directory has no entries.
pub(crate) fn dir_is_empty(path: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(path).context(error::ReadRepoFileSnafu { path })?;
    match entries.next() {
        None => Ok(true),
        Some(Ok(_)) => Ok(false),
        Some(Err(e)) => Err(e).context(error::ReadRepoFileSnafu { path }),
    }
}

/// The journal stores paths as JSON strings, so they have to be valid
/// Unicode to round-trip.
pub(crate) fn path_str(path: &Path) -> Result<&str> {
    path.to_str().context(error::NonUnicodePathSnafu { path })
}
