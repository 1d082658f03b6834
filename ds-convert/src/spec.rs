//! Typed model of a datastore spec.
//!
//! A spec is a recursive descriptor of a datastore composition, stored as
//! JSON in the repo config (under Datastore.Spec) and in the datastore_spec
//! file.  We convert from JSON at the boundary and reject unknown shapes
//! there; everything downstream dispatches on the enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;

use crate::error::{self, Result};

/// Compression setting for a levelds datastore.  The empty string selects
/// the engine's compiled-in default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "snappy")]
    Snappy,
    #[serde(rename = "")]
    Default,
}

/// One entry of a mount composite: a path-like prefix plus the child
/// datastore's fields inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountEntry {
    pub mountpoint: String,
    #[serde(flatten)]
    pub spec: Spec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Spec {
    #[serde(rename = "flatfs")]
    Flatfs {
        path: String,
        #[serde(rename = "shardFunc")]
        shard_func: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sync: Option<bool>,
    },

    #[serde(rename = "levelds")]
    Levelds {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        compression: Option<Compression>,
    },

    #[serde(rename = "badgerds")]
    Badgerds {
        path: String,
        #[serde(rename = "syncWrites", skip_serializing_if = "Option::is_none")]
        sync_writes: Option<bool>,
    },

    #[serde(rename = "badger2ds")]
    Badger2ds {
        path: String,
        #[serde(rename = "syncWrites", skip_serializing_if = "Option::is_none")]
        sync_writes: Option<bool>,
    },

    #[serde(rename = "mount")]
    Mount { mounts: Vec<MountEntry> },

    #[serde(rename = "measure")]
    Measure { prefix: String, child: Box<Spec> },

    #[serde(rename = "log")]
    Log { name: String, child: Box<Spec> },

    #[serde(rename = "mem")]
    Mem,
}

impl Spec {
    /// Parses a spec from its JSON form, rejecting unknown types and
    /// mistyped fields.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).context(error::ParseSpecSnafu)
    }

    /// Parses a spec from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context(error::ParseSpecSnafu)
    }

    /// The spec's type tag, as spelled in JSON.
    pub fn type_name(&self) -> &'static str {
        match self {
            Spec::Flatfs { .. } => "flatfs",
            Spec::Levelds { .. } => "levelds",
            Spec::Badgerds { .. } => "badgerds",
            Spec::Badger2ds { .. } => "badger2ds",
            Spec::Mount { .. } => "mount",
            Spec::Measure { .. } => "measure",
            Spec::Log { .. } => "log",
            Spec::Mem => "mem",
        }
    }

    /// Whether this is a simple leaf datastore owning one directory inside
    /// the repo.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Spec::Flatfs { .. } | Spec::Levelds { .. } | Spec::Badgerds { .. } | Spec::Badger2ds { .. }
        )
    }

    /// Canonical JSON form: minified, with map keys in sorted order.  Stable
    /// across runs, so it doubles as a fingerprint of the spec.
    pub fn to_canonical_json(&self) -> String {
        // A Spec always serializes; its maps are BTreeMap-backed Values,
        // which gives the sorted key order.
        serde_json::to_value(self)
            .unwrap_or_else(|e| unreachable!("spec failed to serialize: {}", e))
            .to_string()
    }

    /// DiskSpec: a minimal JSON form representing only what is stored on
    /// disk.  Runtime-only fields (sync, compression) are excluded, and the
    /// transparent measure/log wrappers disappear.  Two specs with equal
    /// DiskSpecs describe the same physical store.
    pub fn disk_spec(&self) -> Value {
        match self {
            Spec::Flatfs {
                path, shard_func, ..
            } => serde_json::json!({
                "type": "flatfs",
                "path": path,
                "shardFunc": shard_func,
            }),

            Spec::Levelds { path, .. } => serde_json::json!({
                "type": "levelds",
                "path": path,
            }),

            Spec::Badgerds { path, .. } => serde_json::json!({
                "type": "badgerds",
                "path": path,
            }),

            Spec::Badger2ds { path, .. } => serde_json::json!({
                "type": "badger2ds",
                "path": path,
            }),

            Spec::Mount { mounts } => {
                let mounts: Vec<Value> = mounts
                    .iter()
                    .map(|entry| {
                        let mut child = entry.spec.disk_spec();
                        if let Value::Object(map) = &mut child {
                            map.insert(
                                "mountpoint".to_string(),
                                Value::String(entry.mountpoint.clone()),
                            );
                        }
                        child
                    })
                    .collect();

                serde_json::json!({
                    "type": "mount",
                    "mounts": mounts,
                })
            }

            Spec::Measure { child, .. } => child.disk_spec(),
            Spec::Log { child, .. } => child.disk_spec(),

            // No persistence, no on-disk identity.
            Spec::Mem => Value::Null,
        }
    }

    /// The DiskSpec serialized to its canonical minified string, used as an
    /// equality key for "same physical store".
    pub fn disk_id(&self) -> String {
        self.disk_spec().to_string()
    }
}
