/*!
# Background

A 'datastore' is the key/value storage layer of an IPFS repository.  Repo
configurations compose several of them: leaf engines that own a directory on
disk, a mount composite that routes keys to children by prefix, and
transparent observability wrappers with no on-disk footprint.

# Library

This library provides a trait defining the exact requirements, along with
the engines the conversion tool needs: a sharded flat-file store, a
nested-directory key-file store, the prefix-routing mount composite, an
in-memory store for testing, and a bounded-retry wrapper that absorbs
transient "too many open files" errors.

Values are raw bytes; interpretation is left entirely to the caller.  Bulk
writes go through batches, which buffer puts until committed.

# Current limitations

* The user (e.g. the conversion tool) needs to handle locking.
* Batches are not atomic across engines; a failed commit may leave a prefix
  of its entries written.
*/

pub mod error;
pub mod flatfs;
pub mod key;
pub mod mem;
pub mod mount;
mod pathenc;
pub mod retry;
pub mod store;

pub use error::{Error, Result};
pub use flatfs::{FlatfsDatastore, ShardFunc};
pub use key::{Key, KEY_SEPARATOR, KEY_SEPARATOR_STR};
pub use mem::MemDatastore;
pub use mount::MountDatastore;
pub use retry::RetryDatastore;
pub use store::DirDatastore;

/// A single result from a query: the key, and the value unless the query
/// was keys-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub value: Option<Vec<u8>>,
}

/// Iterator over query results.  Errors encountered mid-iteration are
/// yielded in place so callers can decide whether to abort.
pub type Entries = Box<dyn Iterator<Item = Result<Entry>>>;

pub trait Datastore {
    /// Retrieve the value for a single key.  Returns Ok(None) if the key is
    /// not present.
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>>;

    /// Returns whether a key is present in the datastore.
    fn has(&self, key: &Key) -> Result<bool>;

    /// Set the value of a single key.
    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()>;

    /// Removes the given key.  If we succeeded, we return Ok(()); if the
    /// key didn't exist, we also return Ok(()); we return Err only if we
    /// failed to check or remove the key.
    fn delete(&mut self, key: &Key) -> Result<()>;

    /// Returns all entries whose keys start with the given prefix.  With
    /// keys_only, values are not read from disk and each Entry's value is
    /// None.  No ordering is guaranteed.
    fn query(&self, prefix: &Key, keys_only: bool) -> Result<Entries>;

    /// Creates a new write batch.  Puts into the batch are buffered and hit
    /// the store when the batch is committed.
    fn batch(&self) -> Result<Box<dyn Batch>>;

    /// Flushes and closes the datastore.  No operations may follow.
    fn close(&mut self) -> Result<()>;
}

pub trait Batch {
    /// Buffer a write of the given key and value.
    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()>;

    /// Apply all buffered writes to the store.
    fn commit(&mut self) -> Result<()>;
}
