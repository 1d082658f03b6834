//! Helpers for building and checking throwaway IPFS repos.
#![allow(dead_code)]

use datastore::{Datastore, Key};
use ds_convert::open::open_datastore;
use ds_convert::repo;
use ds_convert::spec::Spec;
use ds_convert::validate::validate;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// The stock go-ipfs composition: flatfs for /blocks, leveldb for the rest.
pub fn default_spec() -> Value {
    serde_json::json!({
        "type": "mount",
        "mounts": [
            {
                "mountpoint": "/blocks",
                "type": "measure",
                "prefix": "flatfs.datastore",
                "child": {
                    "type": "flatfs",
                    "path": "blocks",
                    "sync": true,
                    "shardFunc": "/repo/flatfs/shard/v1/next-to-last/2",
                },
            },
            {
                "mountpoint": "/",
                "type": "measure",
                "prefix": "leveldb.datastore",
                "child": {
                    "type": "levelds",
                    "path": "levelDatastore",
                    "compression": "none",
                },
            },
        ],
    })
}

/// Creates a repo directory with a version file, a datastore_spec matching
/// the given spec's on-disk form, and a config asking for the same spec.
pub fn new_test_repo(spec_value: &Value) -> TempDir {
    let dir = TempDir::new().unwrap();
    let spec = Spec::from_value(spec_value).unwrap();

    fs::write(dir.path().join(repo::VERSION_FILE), "6\n").unwrap();
    fs::write(dir.path().join(repo::SPECS_FILE), spec.disk_id()).unwrap();
    write_config_spec(dir.path(), spec_value);

    dir
}

/// Rewrites the repo config's Datastore.Spec, i.e. what the user edits to
/// request a conversion.
pub fn write_config_spec(repo_path: &Path, spec_value: &Value) {
    let config = serde_json::json!({"Datastore": {"Spec": spec_value}});
    fs::write(
        repo_path.join(repo::CONFIG_FILE),
        serde_json::to_string_pretty(&config).unwrap(),
    )
    .unwrap();
}

/// Opens the repo's active datastore the way the tool itself would: from
/// the datastore_spec file.
pub fn open_repo(repo_path: &Path) -> Box<dyn Datastore> {
    let raw = fs::read_to_string(repo_path.join(repo::SPECS_FILE)).unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();

    let mut spec = Spec::from_value(&value).unwrap();
    validate(&mut spec, true).unwrap();

    open_datastore(repo_path, &spec).unwrap()
}

fn test_key(prefix: &str, i: usize) -> Key {
    Key::new(&format!("/{}TESTKEY{:05}", prefix, i))
}

fn test_value(prefix: &str, i: usize) -> Vec<u8> {
    let mut value = format!("{} value {} ", prefix, i).into_bytes();
    value.resize(1024, b'x');
    value
}

/// Writes `count` deterministic 1 KiB key/value pairs under the given
/// prefix ("" or "blocks/").
pub fn insert_test_keys(repo_path: &Path, prefix: &str, count: usize) {
    let mut store = open_repo(repo_path);

    let mut batch = store.batch().unwrap();
    for i in 0..count {
        batch.put(&test_key(prefix, i), &test_value(prefix, i)).unwrap();
    }
    batch.commit().unwrap();

    store.close().unwrap();
}

/// Asserts every seeded pair is readable with its original value through
/// the repo's current composition.
pub fn verify_test_keys(repo_path: &Path, prefix: &str, count: usize) {
    let mut store = open_repo(repo_path);

    for i in 0..count {
        let key = test_key(prefix, i);
        let value = store
            .get(&key)
            .unwrap()
            .unwrap_or_else(|| panic!("key {} missing after conversion", key));
        assert_eq!(value, test_value(prefix, i), "value mismatch for {}", key);
    }

    store.close().unwrap();
}

/// Asserts the repo contains no conversion debris: temp directories, spec
/// backups, or the journal.
pub fn assert_no_leftovers(repo_path: &Path) {
    for entry in fs::read_dir(repo_path).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        assert!(
            !name.starts_with("ds-convert")
                && !name.starts_with("datastore_spec_backup")
                && name != "convertlog",
            "leftover conversion artifact: {}",
            name
        );
    }
}
