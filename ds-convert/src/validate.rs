//! Spec validator: type-checks a datastore spec tree, collects the on-repo
//! directory paths it claims, and optionally injects defaults for runtime
//! fields the minimal on-disk form leaves out.

use snafu::ensure;

use crate::error::{self, Result};
use crate::spec::{Compression, Spec};

/// Validates the given spec, returning the leaf datastore paths it uses (in
/// encounter order).
///
/// With allow_defaults, missing runtime fields are populated in place:
/// flatfs 'sync' becomes true and levelds 'compression' becomes "none".
/// Without it, their absence is an error, so a spec validated once with
/// defaults re-validates unchanged.
///
/// An empty top-level 'mounts' array is accepted here; the planner applies
/// its own non-empty requirement to copy specs.
pub fn validate(spec: &mut Spec, allow_defaults: bool) -> Result<Vec<String>> {
    let mut ctx = Validator {
        allow_defaults,
        used_paths: Vec::new(),
    };
    ctx.validate(spec)?;

    Ok(ctx.used_paths)
}

struct Validator {
    allow_defaults: bool,
    used_paths: Vec<String>,
}

impl Validator {
    fn validate(&mut self, spec: &mut Spec) -> Result<()> {
        match spec {
            Spec::Flatfs { path, sync, .. } => {
                self.check_path(path)?;

                if sync.is_none() {
                    ensure!(self.allow_defaults, error::MissingSyncSnafu);
                    *sync = Some(true);
                }
                Ok(())
            }

            Spec::Levelds { path, compression } => {
                self.check_path(path)?;

                if compression.is_none() {
                    ensure!(self.allow_defaults, error::MissingCompressionSnafu);
                    *compression = Some(Compression::None);
                }
                Ok(())
            }

            // 'syncWrites' may stay absent; the factory defaults it.
            Spec::Badgerds { path, .. } | Spec::Badger2ds { path, .. } => self.check_path(path),

            Spec::Mount { mounts } => {
                let mut mountpoints = Vec::new();
                for entry in mounts {
                    ensure!(
                        !mountpoints.contains(&entry.mountpoint),
                        error::DuplicateMountpointSnafu {
                            mountpoint: &entry.mountpoint,
                        }
                    );
                    mountpoints.push(entry.mountpoint.clone());

                    self.validate(&mut entry.spec)?;
                }
                Ok(())
            }

            Spec::Measure { child, .. } => self.validate(child),
            Spec::Log { child, .. } => self.validate(child),

            Spec::Mem => error::MemNotConvertableSnafu.fail(),
        }
    }

    /// Checks that a leaf path stays inside the repo and hasn't been
    /// claimed by another leaf of this spec.
    fn check_path(&mut self, path: &str) -> Result<()> {
        let clean = clean_path(path);
        ensure!(
            !clean.starts_with('/') && !clean.starts_with('.'),
            error::PathOutsideRepoSnafu { path }
        );

        ensure!(
            !self.used_paths.iter().any(|used| used == path),
            error::PathInUseSnafu { path }
        );
        self.used_paths.push(path.to_string());

        Ok(())
    }
}

/// Lexically cleans a slash-separated path: drops empty and "." components
/// and resolves ".." against earlier components.  An escaping or empty path
/// cleans to something starting with "." so the caller can reject it; an
/// absolute path keeps its leading "/".
fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.last().map_or(true, |last| *last == "..") {
                    parts.push("..");
                } else {
                    parts.pop();
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
