//! In-memory datastore for use in testing other modules, and as the backing
//! for the 'mem' spec type.  Nothing persists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::key::Key;
use super::{Batch, Datastore, Entries, Entry, Result};

#[derive(Debug, Default, Clone)]
pub struct MemDatastore {
    // Shared with outstanding batches, which write through on commit.
    data: Arc<Mutex<HashMap<Key, Vec<u8>>>>,
}

impl MemDatastore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Datastore for MemDatastore {
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    fn has(&self, key: &Key) -> Result<bool> {
        Ok(self.data.lock().unwrap_or_else(|e| e.into_inner()).contains_key(key))
    }

    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }

    fn query(&self, prefix: &Key, keys_only: bool) -> Result<Entries> {
        let entries: Vec<Result<Entry>> = self
            .data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| {
                Ok(Entry {
                    key: key.clone(),
                    value: if keys_only { None } else { Some(value.clone()) },
                })
            })
            .collect();

        Ok(Box::new(entries.into_iter()))
    }

    fn batch(&self) -> Result<Box<dyn Batch>> {
        Ok(Box::new(MemBatch {
            data: Arc::clone(&self.data),
            entries: Vec::new(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct MemBatch {
    data: Arc<Mutex<HashMap<Key, Vec<u8>>>>,
    entries: Vec<(Key, Vec<u8>)>,
}

impl Batch for MemBatch {
    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        self.entries.push((key.clone(), value.to_vec()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        for (key, value) in self.entries.drain(..) {
            data.insert(key, value);
        }
        Ok(())
    }
}
