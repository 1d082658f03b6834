//! Composite datastore that routes each key to the child whose mount prefix
//! is the longest match.  Mirrors the repo-level 'mount' spec type: "/"
//! catches everything not claimed by a more specific mount.

use snafu::OptionExt;

use super::key::Key;
use super::{error, Batch, Datastore, Entries, Result};

pub struct MountDatastore {
    // Sorted by descending prefix depth so the first match wins.
    mounts: Vec<Mount>,
}

struct Mount {
    prefix: Key,
    store: Box<dyn Datastore>,
}

impl MountDatastore {
    pub fn new(mounts: Vec<(Key, Box<dyn Datastore>)>) -> Self {
        let mut mounts: Vec<Mount> = mounts
            .into_iter()
            .map(|(prefix, store)| Mount { prefix, store })
            .collect();
        mounts.sort_by_key(|m| std::cmp::Reverse(m.prefix.segments().len()));

        Self { mounts }
    }

    fn lookup(&self, key: &Key) -> Result<&Mount> {
        self.mounts
            .iter()
            .find(|m| key.starts_with(&m.prefix))
            .context(error::NoMountSnafu { key: key.name() })
    }

    fn lookup_mut(&mut self, key: &Key) -> Result<&mut Mount> {
        self.mounts
            .iter_mut()
            .find(|m| key.starts_with(&m.prefix))
            .context(error::NoMountSnafu { key: key.name() })
    }
}

impl Datastore for MountDatastore {
    fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let mount = self.lookup(key)?;
        mount.store.get(&key.strip_prefix(&mount.prefix))
    }

    fn has(&self, key: &Key) -> Result<bool> {
        let mount = self.lookup(key)?;
        mount.store.has(&key.strip_prefix(&mount.prefix))
    }

    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        let mount = self.lookup_mut(key)?;
        let child_key = key.strip_prefix(&mount.prefix);
        mount.store.put(&child_key, value)
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        let mount = self.lookup_mut(key)?;
        let child_key = key.strip_prefix(&mount.prefix);
        mount.store.delete(&child_key)
    }

    /// Queries every child, remapping child keys back under the mount
    /// prefix.  A key under a specific mount is never also reported by a
    /// more general one; each key belongs to exactly one child by routing,
    /// and the filter below drops child entries that a deeper mount shadows.
    fn query(&self, prefix: &Key, keys_only: bool) -> Result<Entries> {
        let mut all: Vec<Entries> = Vec::new();

        for (i, mount) in self.mounts.iter().enumerate() {
            let mount_prefix = mount.prefix.clone();
            // Prefixes of mounts deeper than this one; entries under them
            // were routed to those children, so this child's copy (if any)
            // is stale and must not surface.
            let shadows: Vec<Key> = self.mounts[..i].iter().map(|m| m.prefix.clone()).collect();
            let want = prefix.clone();

            let entries = mount.store.query(&Key::root(), keys_only)?;
            let remapped = entries.filter_map(move |entry| match entry {
                Ok(mut entry) => {
                    entry.key = entry.key.with_prefix(&mount_prefix);
                    if !entry.key.starts_with(&want) {
                        return None;
                    }
                    if shadows.iter().any(|s| entry.key.starts_with(s)) {
                        return None;
                    }
                    Some(Ok(entry))
                }
                Err(e) => Some(Err(e)),
            });
            all.push(Box::new(remapped));
        }

        Ok(Box::new(all.into_iter().flatten()))
    }

    fn batch(&self) -> Result<Box<dyn Batch>> {
        let mut batches = Vec::with_capacity(self.mounts.len());
        for mount in &self.mounts {
            batches.push((mount.prefix.clone(), mount.store.batch()?));
        }

        Ok(Box::new(MountBatch { batches }))
    }

    fn close(&mut self) -> Result<()> {
        for mount in &mut self.mounts {
            mount.store.close()?;
        }
        Ok(())
    }
}

pub struct MountBatch {
    // Sorted like the parent's mounts: deepest prefix first.
    batches: Vec<(Key, Box<dyn Batch>)>,
}

impl Batch for MountBatch {
    fn put(&mut self, key: &Key, value: &[u8]) -> Result<()> {
        let (prefix, batch) = self
            .batches
            .iter_mut()
            .find(|(prefix, _)| key.starts_with(prefix))
            .context(error::NoMountSnafu { key: key.name() })?;

        let child_key = key.strip_prefix(prefix);
        batch.put(&child_key, value)
    }

    fn commit(&mut self) -> Result<()> {
        for (_, batch) in &mut self.batches {
            batch.commit()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::MemDatastore;

    fn two_mounts() -> MountDatastore {
        MountDatastore::new(vec![
            (Key::new("/blocks"), Box::new(MemDatastore::new()) as Box<dyn Datastore>),
            (Key::root(), Box::new(MemDatastore::new()) as Box<dyn Datastore>),
        ])
    }

    #[test]
    fn routes_longest_prefix() {
        let mut m = two_mounts();
        m.put(&Key::new("/blocks/x"), b"block").unwrap();
        m.put(&Key::new("/pins/y"), b"pin").unwrap();

        assert_eq!(m.get(&Key::new("/blocks/x")).unwrap(), Some(b"block".to_vec()));
        assert_eq!(m.get(&Key::new("/pins/y")).unwrap(), Some(b"pin".to_vec()));

        // The root mount must not see the blocks key.
        assert!(!m.mounts.last().unwrap().store.has(&Key::new("/blocks/x")).unwrap());
    }

    #[test]
    fn query_remaps_and_merges() {
        let mut m = two_mounts();
        m.put(&Key::new("/blocks/x"), b"1").unwrap();
        m.put(&Key::new("/pins/y"), b"2").unwrap();
        m.put(&Key::new("/z"), b"3").unwrap();

        let mut keys: Vec<String> = m
            .query(&Key::root(), true)
            .unwrap()
            .map(|e| e.unwrap().key.name().to_string())
            .collect();
        keys.sort();
        assert_eq!(keys, ["/blocks/x", "/pins/y", "/z"]);

        let blocks: Vec<String> = m
            .query(&Key::new("/blocks"), true)
            .unwrap()
            .map(|e| e.unwrap().key.name().to_string())
            .collect();
        assert_eq!(blocks, ["/blocks/x"]);
    }

    #[test]
    fn batch_routes_to_children() {
        let m = two_mounts();
        let mut batch = m.batch().unwrap();
        batch.put(&Key::new("/blocks/x"), b"1").unwrap();
        batch.put(&Key::new("/y"), b"2").unwrap();
        batch.commit().unwrap();

        assert!(m.has(&Key::new("/blocks/x")).unwrap());
        assert!(m.has(&Key::new("/y")).unwrap());
    }

    #[test]
    fn no_mount_for_key() {
        // A mount table without a root entry can't route everything.
        let m = MountDatastore::new(vec![(
            Key::new("/blocks"),
            Box::new(MemDatastore::new()) as Box<dyn Datastore>,
        )]);
        m.get(&Key::new("/other")).unwrap_err();
    }
}
