//! Content-addressed flat-file datastore.
//!
//! Every key becomes a single file whose name encodes the full key, placed
//! in a shard directory chosen by the store's shard function.  The shard
//! function is recorded in a SHARDING file at the store root and verified
//! on reopen, so a store can't silently be opened with the wrong layout.

use log::trace;
use snafu::{ensure, ResultExt};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::key::Key;
use super::pathenc::{decode_path_component, encode_path_component};
use super::{error, Batch, Datastore, Entries, Entry, Result};

const SHARDING_FILE: &str = "SHARDING";
const SHARD_PREFIX: &str = "/repo/flatfs/shard/v1";
const DATA_SUFFIX: &str = ".data";
const PAD_CHAR: char = '_';

/// Shard function: given a key's encoded file name, picks the directory the
/// file lives in.  Parsed from the textual `/repo/flatfs/shard/v1/<fun>/<n>`
/// form used in datastore specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardFunc {
    /// First n characters of the name.
    Prefix(usize),
    /// Last n characters of the name.
    Suffix(usize),
    /// The n characters just before the last one.
    NextToLast(usize),
}

impl ShardFunc {
    /// Returns the shard directory name for the given encoded file name.
    /// Short names are padded with '_' so every name shards somewhere.
    fn dir(&self, name: &str) -> String {
        match *self {
            ShardFunc::Prefix(n) => {
                let mut padded: String = name.chars().take(n).collect();
                while padded.chars().count() < n {
                    padded.push(PAD_CHAR);
                }
                padded
            }
            ShardFunc::Suffix(n) => {
                let padded = pad_left(name, n);
                let chars: Vec<char> = padded.chars().collect();
                chars[chars.len() - n..].iter().collect()
            }
            ShardFunc::NextToLast(n) => {
                let padded = pad_left(name, n + 1);
                let chars: Vec<char> = padded.chars().collect();
                let end = chars.len() - 1;
                chars[end - n..end].iter().collect()
            }
        }
    }
}

fn pad_left(name: &str, min: usize) -> String {
    let len = name.chars().count();
    if len >= min {
        return name.to_string();
    }

    let mut padded = String::new();
    for _ in len..min {
        padded.push(PAD_CHAR);
    }
    padded.push_str(name);
    padded
}

impl FromStr for ShardFunc {
    type Err = super::Error;

    fn from_str(s: &str) -> Result<Self> {
        let fail = |msg: &str| {
            error::ShardFuncSnafu {
                func: s,
                msg: msg.to_string(),
            }
            .fail()
        };

        let rest = match s.trim().strip_prefix(SHARD_PREFIX) {
            Some(rest) => rest.trim_start_matches('/'),
            None => return fail("expected '/repo/flatfs/shard/v1' prefix"),
        };

        let mut parts = rest.split('/');
        let fun = parts.next().unwrap_or("");
        let param = match parts.next() {
            Some(param) => param,
            None => return fail("missing length parameter"),
        };
        if parts.next().is_some() {
            return fail("trailing components");
        }

        let n: usize = match param.parse() {
            Ok(n) if n > 0 => n,
            _ => return fail("length parameter is not a positive integer"),
        };

        match fun {
            "prefix" => Ok(ShardFunc::Prefix(n)),
            "suffix" => Ok(ShardFunc::Suffix(n)),
            "next-to-last" => Ok(ShardFunc::NextToLast(n)),
            other => {
                error::ShardFuncSnafu {
                    func: s,
                    msg: format!("unknown function '{}'", other),
                }
                .fail()
            }
        }
    }
}

impl fmt::Display for ShardFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ShardFunc::Prefix(n) => write!(f, "{}/prefix/{}", SHARD_PREFIX, n),
            ShardFunc::Suffix(n) => write!(f, "{}/suffix/{}", SHARD_PREFIX, n),
            ShardFunc::NextToLast(n) => write!(f, "{}/next-to-last/{}", SHARD_PREFIX, n),
        }
    }
}

#[derive(Debug)]
pub struct FlatfsDatastore {
    root: PathBuf,
    shard: ShardFunc,
    sync: bool,
}

impl FlatfsDatastore {
    /// Opens (or creates) a flatfs store at the given directory with the
    /// given shard function.  Reopening an existing store with a different
    /// shard function is an error.
    pub fn open<P: AsRef<Path>>(root: P, shard: ShardFunc, sync: bool) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).context(error::CreateStoreSnafu { path: root })?;

        let sharding_path = root.join(SHARDING_FILE);
        match fs::read_to_string(&sharding_path) {
            Ok(found) => {
                let found = found.trim();
                ensure!(
                    found == shard.to_string(),
                    error::ShardingMismatchSnafu {
                        path: root,
                        found,
                        expected: shard.to_string(),
                    }
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::write(&sharding_path, format!("{}\n", shard)).context(error::IoSnafu {
                    path: &sharding_path,
                })?;
            }
            Err(e) => {
                return Err(e).context(error::IoSnafu {
                    path: &sharding_path,
                })
            }
        }

        Ok(Self {
            root: root.to_owned(),
            shard,
            sync,
        })
    }

    fn data_path(&self, key: &Key) -> Result<PathBuf> {
        data_path(&self.root, self.shard, key)
    }
}

/// Encodes the full key (minus the leading separator) into a single
/// filesystem-safe file name; embedded separators encode as %2F.
fn file_name(key: &Key) -> Result<String> {
    ensure!(
        !key.is_root(),
        error::InvalidKeySnafu {
            name: key.name(),
            msg: "the root key cannot hold a value",
        }
    );

    Ok(encode_path_component(&key.name()[1..]))
}

fn data_path(root: &Path, shard: ShardFunc, key: &Key) -> Result<PathBuf> {
    let name = file_name(key)?;
    Ok(root
        .join(shard.dir(&name))
        .join(format!("{}{}", name, DATA_SUFFIX)))
}

fn write_value(root: &Path, shard: ShardFunc, sync: bool, key: &Key, value: &[u8]) -> Result<()> {
    let path = data_path(root, shard, key)?;
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

impl Datastore for FlatfsDatastore {
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let path = self.data_path(key)?;
        match fs::read(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(error::KeyReadSnafu { key: key.name() }),
        }
    }

    fn has(&self, key: &Key) -> Result<bool> {
        let path = self.data_path(key)?;
        Ok(path.exists())
    }

    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        write_value(&self.root, self.shard, self.sync, key, value)
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        let path = self.data_path(key)?;

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e).context(error::DeleteKeySnafu { path });
                }
            }
        }

        // Prune the shard directory if this was its last value.
        if let Some(parent) = path.parent() {
            if parent != self.root {
                let _ = fs::remove_dir(parent);
            }
        }
        Ok(())
    }

    fn query(&self, prefix: &Key, keys_only: bool) -> Result<Entries> {
        let prefix = prefix.clone();

        trace!(
            "Starting walk of flatfs shards to list keys under {}",
            self.root.display()
        );
        // Values all live exactly one shard directory deep, which also
        // keeps the SHARDING file out of the walk.
        let walker = WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .follow_links(false)
            .same_file_system(true)
            .into_iter();

        let entries = walker.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e).context(error::ListKeysSnafu)),
            };
            if !entry.file_type().is_file() {
                return None;
            }

            let raw = entry.file_name().to_string_lossy();
            let stem = match raw.strip_suffix(DATA_SUFFIX) {
                Some(stem) => stem.to_string(),
                None => return None,
            };

            let decoded = match decode_path_component(&stem, entry.path()) {
                Ok(decoded) => decoded,
                Err(e) => return Some(Err(e)),
            };
            let key = Key::new(&decoded);
            if !key.starts_with(&prefix) {
                return None;
            }

            let value = if keys_only {
                None
            } else {
                match fs::read(entry.path()) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        return Some(Err(e).context(error::KeyReadSnafu { key: key.name() }))
                    }
                }
            };

            Some(Ok(Entry { key, value }))
        });

        Ok(Box::new(entries))
    }

    fn batch(&self) -> Result<Box<dyn Batch>> {
        Ok(Box::new(FlatfsBatch {
            root: self.root.clone(),
            shard: self.shard,
            sync: self.sync,
            entries: Vec::new(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct FlatfsBatch {
    root: PathBuf,
    shard: ShardFunc,
    sync: bool,
    entries: Vec<(Key, Vec<u8>)>,
}

impl Batch for FlatfsBatch {
    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        self.entries.push((key.clone(), value.to_vec()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        for (key, value) in self.entries.drain(..) {
            write_value(&self.root, self.shard, self.sync, &key, &value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_shard_funcs() {
        assert_eq!(
            "/repo/flatfs/shard/v1/next-to-last/2"
                .parse::<ShardFunc>()
                .unwrap(),
            ShardFunc::NextToLast(2)
        );
        assert_eq!(
            "/repo/flatfs/shard/v1/prefix/5".parse::<ShardFunc>().unwrap(),
            ShardFunc::Prefix(5)
        );
        assert_eq!(
            "/repo/flatfs/shard/v1/suffix/3".parse::<ShardFunc>().unwrap(),
            ShardFunc::Suffix(3)
        );

        "/repo/flatfs/shard/v1/next-to-last/0"
            .parse::<ShardFunc>()
            .unwrap_err();
        "/repo/flatfs/shard/v2/prefix/2".parse::<ShardFunc>().unwrap_err();
        "prefix/2".parse::<ShardFunc>().unwrap_err();
    }

    #[test]
    fn shard_func_round_trips_display() {
        for s in [
            "/repo/flatfs/shard/v1/next-to-last/2",
            "/repo/flatfs/shard/v1/prefix/5",
            "/repo/flatfs/shard/v1/suffix/3",
        ] {
            assert_eq!(s.parse::<ShardFunc>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn shard_dirs() {
        assert_eq!(ShardFunc::NextToLast(2).dir("CIQABC"), "AB");
        assert_eq!(ShardFunc::Prefix(2).dir("CIQABC"), "CI");
        assert_eq!(ShardFunc::Suffix(2).dir("CIQABC"), "BC");

        // Short names pad with '_'.
        assert_eq!(ShardFunc::NextToLast(2).dir("X"), "__");
        assert_eq!(ShardFunc::Prefix(3).dir("X"), "X__");
    }

    #[test]
    fn put_get_query() {
        let dir = TempDir::new().unwrap();
        let shard = ShardFunc::NextToLast(2);
        let mut store = FlatfsDatastore::open(dir.path(), shard, true).unwrap();

        let key = Key::new("/CIQABC");
        store.put(&key, b"block data").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(b"block data".to_vec()));
        assert!(store.has(&key).unwrap());

        // The value landed inside the expected shard directory.
        assert!(dir.path().join("AB").join("CIQABC.data").exists());

        let keys: Vec<Key> = store
            .query(&Key::root(), true)
            .unwrap()
            .map(|e| e.unwrap().key)
            .collect();
        assert_eq!(keys, [key.clone()]);

        store.delete(&key).unwrap();
        assert!(!store.has(&key).unwrap());
    }

    #[test]
    fn multi_segment_keys() {
        let dir = TempDir::new().unwrap();
        let shard = ShardFunc::NextToLast(2);
        let mut store = FlatfsDatastore::open(dir.path(), shard, false).unwrap();

        let key = Key::new("/blocks/CIQABC");
        store.put(&key, b"v").unwrap();

        let found: Vec<Key> = store
            .query(&Key::new("/blocks"), true)
            .unwrap()
            .map(|e| e.unwrap().key)
            .collect();
        assert_eq!(found, [key]);
    }

    #[test]
    fn sharding_file_checked_on_reopen() {
        let dir = TempDir::new().unwrap();
        FlatfsDatastore::open(dir.path(), ShardFunc::NextToLast(2), false).unwrap();

        // Same function reopens fine.
        FlatfsDatastore::open(dir.path(), ShardFunc::NextToLast(2), false).unwrap();
        // A different function is rejected.
        FlatfsDatastore::open(dir.path(), ShardFunc::Prefix(4), false).unwrap_err();
    }
}
