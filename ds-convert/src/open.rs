//! Datastore factory: turns a validated spec into an opened batching
//! key-value handle rooted at a directory.
//!
//! Every opened composition is wrapped in the bounded-retry layer, so
//! transient "too many open files" failures during a long copy don't abort
//! the conversion.

use datastore::{
    Datastore, DirDatastore, FlatfsDatastore, Key, MemDatastore, MountDatastore, RetryDatastore,
    ShardFunc,
};
use snafu::ResultExt;
use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{self, Result};
use crate::spec::Spec;

pub fn open_datastore(root: &Path, spec: &Spec) -> Result<Box<dyn Datastore>> {
    let inner = build(root, spec)?;
    Ok(Box::new(RetryDatastore::new(inner)))
}

fn build(root: &Path, spec: &Spec) -> Result<Box<dyn Datastore>> {
    match spec {
        Spec::Flatfs {
            path,
            shard_func,
            sync,
        } => {
            let dir = resolve(root, path);
            let shard: ShardFunc = shard_func
                .parse()
                .context(error::OpenDatastoreSnafu { path: &dir })?;
            let store = FlatfsDatastore::open(&dir, shard, sync.unwrap_or(true))
                .context(error::OpenDatastoreSnafu { path: dir })?;
            Ok(Box::new(store))
        }

        // Our level engine stores values uncompressed; the compression
        // field only participates in spec identity.
        Spec::Levelds { path, .. } => {
            let dir = resolve(root, path);
            let store =
                DirDatastore::open(&dir, false).context(error::OpenDatastoreSnafu { path: dir })?;
            Ok(Box::new(store))
        }

        Spec::Badgerds { path, sync_writes } | Spec::Badger2ds { path, sync_writes } => {
            let dir = resolve(root, path);
            fs::create_dir_all(&dir).context(error::CreateDsDirSnafu { path: &dir })?;
            fs::set_permissions(&dir, Permissions::from_mode(0o755))
                .context(error::CreateDsDirSnafu { path: &dir })?;

            let store = DirDatastore::open(&dir, sync_writes.unwrap_or(true))
                .context(error::OpenDatastoreSnafu { path: dir })?;
            Ok(Box::new(store))
        }

        Spec::Mount { mounts } => {
            let mut children: Vec<(Key, Box<dyn Datastore>)> = Vec::with_capacity(mounts.len());
            for entry in mounts {
                children.push((Key::new(&entry.mountpoint), build(root, &entry.spec)?));
            }
            Ok(Box::new(MountDatastore::new(children)))
        }

        // Transparent wrappers don't change behavior here; observability
        // is the retry/log layer's concern.
        Spec::Measure { child, .. } => build(root, child),
        Spec::Log { child, .. } => build(root, child),

        Spec::Mem => Ok(Box::new(MemDatastore::new())),
    }
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_owned()
    } else {
        root.join(path)
    }
}
