//! This implementation of the Datastore trait relies on the filesystem for
//! storage.
//!
//! Values are kept in files with paths resembling the keys, e.g. a/b/c.data
//! for /a/b/c, with each path component percent-encoded so arbitrary key
//! segments stay filesystem-safe.  It backs the level/badger datastore
//! types, whose engines only have to honor the batching key-value contract.

use log::trace;
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::key::Key;
use super::pathenc::{decode_path_component, encode_path_component};
use super::{error, Batch, Datastore, Entries, Entry, Result};

/// File extension for stored values; also keeps a key's value file from
/// colliding with the directory holding its children.
const DATA_SUFFIX: &str = ".data";

#[derive(Debug)]
pub struct DirDatastore {
    root: PathBuf,
    sync: bool,
}

impl DirDatastore {
    /// Opens a datastore rooted at the given directory, creating it if
    /// necessary.  With sync set, every value write is fsynced before it
    /// becomes visible.
    pub fn open<P: AsRef<Path>>(root: P, sync: bool) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).context(error::CreateStoreSnafu { path: root })?;

        Ok(Self {
            root: root.to_owned(),
            sync,
        })
    }

    fn data_path(&self, key: &Key) -> Result<PathBuf> {
        data_path(&self.root, key)
    }
}

/// Returns the appropriate path on the filesystem for the given key.
fn data_path(root: &Path, key: &Key) -> Result<PathBuf> {
    ensure!(
        !key.is_root(),
        error::InvalidKeySnafu {
            name: key.name(),
            msg: "the root key cannot hold a value",
        }
    );

    let mut path = root.to_owned();
    let (last, parents) = key.segments().split_last().unwrap_or_else(|| {
        unreachable!("non-root key without segments: {}", key)
    });

    for segment in parents {
        path.push(encode_path_component(segment));
    }
    path.push(format!("{}{}", encode_path_component(last), DATA_SUFFIX));

    Ok(path)
}

/// Helper for writing a value file.  Makes the directory tree beforehand,
/// writes through a temp file in the target directory, and renames it into
/// place so readers never observe partial values.
fn write_value(root: &Path, sync: bool, key: &Key, value: &[u8]) -> Result<()> {
    let path = data_path(root, key)?;
    let dirname = path.parent().unwrap_or(root);
    fs::create_dir_all(dirname).context(error::IoSnafu { path: dirname })?;

    let mut temp =
        NamedTempFile::new_in(dirname).context(error::KeyWriteSnafu { key: key.name() })?;
    temp.write_all(value)
        .context(error::KeyWriteSnafu { key: key.name() })?;
    if sync {
        temp.as_file()
            .sync_all()
            .context(error::KeyWriteSnafu { key: key.name() })?;
    }
    temp.persist(&path)
        .context(error::KeyPersistSnafu { key: key.name() })?;

    Ok(())
}

/// Helper for reading a value file.  Returns Ok(None) if the file doesn't
/// exist rather than erroring.
fn read_value(key: &Key, path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            if e.kind() == io::ErrorKind::NotFound {
                return Ok(None);
            }

            Err(e).context(error::KeyReadSnafu { key: key.name() })
        }
    }
}

/// Turns the path of a value file, relative to the store root, back into a
/// Key.
fn key_from_path(path: &Path) -> Result<Key> {
    let mut segments = Vec::new();
    for component in path.components() {
        let raw = component
            .as_os_str()
            .to_str()
            .context(error::CorruptionSnafu {
                path,
                msg: "non-UTF8 path".to_string(),
            })?;

        let raw = match raw.strip_suffix(DATA_SUFFIX) {
            Some(stem) => stem,
            None => raw,
        };
        segments.push(decode_path_component(raw, path)?);
    }

    Key::from_segments(&segments)
}

impl Datastore for DirDatastore {
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let path = self.data_path(key)?;
        read_value(key, &path)
    }

    fn has(&self, key: &Key) -> Result<bool> {
        let path = self.data_path(key)?;
        Ok(path.exists())
    }

    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        write_value(&self.root, self.sync, key, value)
    }

    /// Also removes the parent directory if empty (repeatedly, up to the
    /// store root), so as to have consistent artifacts on the filesystem
    /// after adding and removing keys.
    fn delete(&mut self, key: &Key) -> Result<()> {
        let path = self.data_path(key)?;

        // Remove the file.  If it doesn't exist, we're still OK.
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e).context(error::DeleteKeySnafu { path });
                }
            }
        }

        if let Some(parent) = path.parent() {
            // Note: ancestors() includes 'parent' itself
            for parent in parent.ancestors() {
                // Stop at the store root; we don't expect it to be empty.
                if parent == self.root {
                    break;
                }
                // remove_dir fails on non-empty directories, which is when
                // we stop pruning.
                if fs::remove_dir(parent).is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    fn query(&self, prefix: &Key, keys_only: bool) -> Result<Entries> {
        let root = self.root.clone();
        let prefix = prefix.clone();

        trace!(
            "Starting walk of filesystem to list keys under {}",
            root.display()
        );
        let walker = WalkDir::new(&root)
            .follow_links(false) // shouldn't be links...
            .same_file_system(true) // shouldn't be filesystems to cross...
            .into_iter();

        let entries = walker.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e).context(error::ListKeysSnafu)),
            };
            if !entry.file_type().is_file() {
                return None;
            }
            // Skip anything that isn't a value file, e.g. temp files from
            // in-flight writes.
            if !entry.file_name().to_string_lossy().ends_with(DATA_SUFFIX) {
                return None;
            }

            let relative = match entry.path().strip_prefix(&root) {
                Ok(relative) => relative,
                Err(_) => {
                    return Some(
                        error::InternalSnafu {
                            msg: format!("walked outside store root: {}", entry.path().display()),
                        }
                        .fail(),
                    )
                }
            };

            let key = match key_from_path(relative) {
                Ok(key) => key,
                Err(e) => return Some(Err(e)),
            };
            if !key.starts_with(&prefix) {
                return None;
            }

            let value = if keys_only {
                None
            } else {
                match read_value(&key, entry.path()) {
                    Ok(value) => value,
                    Err(e) => return Some(Err(e)),
                }
            };

            Some(Ok(Entry { key, value }))
        });

        Ok(Box::new(entries))
    }

    fn batch(&self) -> Result<Box<dyn Batch>> {
        Ok(Box::new(DirBatch {
            root: self.root.clone(),
            sync: self.sync,
            entries: Vec::new(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        // Value writes are already durable per the put semantics.
        Ok(())
    }
}

pub struct DirBatch {
    root: PathBuf,
    sync: bool,
    entries: Vec<(Key, Vec<u8>)>,
}

impl Batch for DirBatch {
    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        self.entries.push((key.clone(), value.to_vec()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        for (key, value) in self.entries.drain(..) {
            write_value(&self.root, self.sync, &key, &value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn get_put_has_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = DirDatastore::open(dir.path(), false).unwrap();

        let key = Key::new("/a/b/c");
        assert_eq!(store.get(&key).unwrap(), None);
        assert!(!store.has(&key).unwrap());

        store.put(&key, b"value").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(b"value".to_vec()));
        assert!(store.has(&key).unwrap());

        store.delete(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
        // Empty parent directories are pruned.
        assert!(!dir.path().join("a").exists());

        // Deleting a missing key is fine.
        store.delete(&key).unwrap();
    }

    #[test]
    fn query_prefix() {
        let dir = TempDir::new().unwrap();
        let mut store = DirDatastore::open(dir.path(), false).unwrap();

        store.put(&Key::new("/blocks/x"), b"1").unwrap();
        store.put(&Key::new("/blocks/y"), b"2").unwrap();
        store.put(&Key::new("/pins/z"), b"3").unwrap();

        let mut keys: Vec<String> = store
            .query(&Key::new("/blocks"), true)
            .unwrap()
            .map(|e| e.unwrap().key.name().to_string())
            .collect();
        keys.sort();
        assert_eq!(keys, ["/blocks/x", "/blocks/y"]);

        let all: Vec<Entry> = store
            .query(&Key::root(), false)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|e| e.value.is_some()));
    }

    #[test]
    fn batch_commit() {
        let dir = TempDir::new().unwrap();
        let store = DirDatastore::open(dir.path(), false).unwrap();

        let mut batch = store.batch().unwrap();
        batch.put(&Key::new("/a"), b"1").unwrap();
        batch.put(&Key::new("/b"), b"2").unwrap();

        // Nothing visible before commit.
        assert_eq!(store.get(&Key::new("/a")).unwrap(), None);

        batch.commit().unwrap();
        assert_eq!(store.get(&Key::new("/a")).unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(&Key::new("/b")).unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn encoded_segments_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = DirDatastore::open(dir.path(), false).unwrap();

        let key = Key::new("/we ird/se.g%ment");
        store.put(&key, b"v").unwrap();

        let found: Vec<Entry> = store
            .query(&Key::root(), true)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, key);
    }
}
