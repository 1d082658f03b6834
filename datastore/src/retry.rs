//! Bounded-retry wrapper around a datastore.
//!
//! Operations that fail with a transient "too many open files" condition
//! are retried a fixed number of times with a fixed delay; all other errors
//! pass through unchanged.  This is intentionally not a general retry
//! mechanism.

use log::warn;
use std::thread::sleep;
use std::time::Duration;

use super::key::Key;
use super::{Batch, Datastore, Entries, Result};

const RETRIES: usize = 6;
const DELAY: Duration = Duration::from_millis(200);

macro_rules! retry {
    ($op:expr) => {{
        let mut attempt = 0;
        loop {
            match $op {
                Err(e) if e.is_temporary() && attempt < RETRIES => {
                    attempt += 1;
                    warn!("Temporary datastore error, retrying ({}): {}", attempt, e);
                    sleep(DELAY);
                }
                other => break other,
            }
        }
    }};
}

pub struct RetryDatastore {
    inner: Box<dyn Datastore>,
}

impl RetryDatastore {
    pub fn new(inner: Box<dyn Datastore>) -> Self {
        Self { inner }
    }
}

impl Datastore for RetryDatastore {
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        retry!(self.inner.get(key))
    }

    fn has(&self, key: &Key) -> Result<bool> {
        retry!(self.inner.has(key))
    }

    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        retry!(self.inner.put(key, value))
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        retry!(self.inner.delete(key))
    }

    fn query(&self, prefix: &Key, keys_only: bool) -> Result<Entries> {
        retry!(self.inner.query(prefix, keys_only))
    }

    fn batch(&self) -> Result<Box<dyn Batch>> {
        let inner = retry!(self.inner.batch())?;
        Ok(Box::new(RetryBatch { inner }))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

pub struct RetryBatch {
    inner: Box<dyn Batch>,
}

impl Batch for RetryBatch {
    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        retry!(self.inner.put(key, value))
    }

    fn commit(&mut self) -> Result<()> {
        retry!(self.inner.commit())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::MemDatastore;

    #[test]
    fn passes_through() {
        let mut store = RetryDatastore::new(Box::new(MemDatastore::new()));
        let key = Key::new("/a");
        store.put(&key, b"v").unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(b"v".to_vec()));

        let mut batch = store.batch().unwrap();
        batch.put(&Key::new("/b"), b"w").unwrap();
        batch.commit().unwrap();
        assert!(store.has(&Key::new("/b")).unwrap());

        store.close().unwrap();
    }
}
