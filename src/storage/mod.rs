//! Ordered byte-key storage seam. The query core only assumes prefix range
//! scans, point reads, snapshot reads, and atomic batch commit; a persistent
//! engine plugs in behind [`Store`]. [`MemStore`] is the in-process
//! implementation used by tests and embedded callers.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

/// A single write in an atomic batch.
#[derive(Clone, Debug)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Ordered writes applied atomically on commit.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(WriteOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(WriteOp::Delete(key));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// Consistent read view over the store.
pub trait StoreSnapshot: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Keys with the given prefix, in ascending byte order.
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }
}

/// Ordered byte-key store with snapshot reads and atomic batch commit.
pub trait Store: Send + Sync {
    fn snapshot(&self) -> Arc<dyn StoreSnapshot>;

    fn commit(&self, batch: WriteBatch) -> Result<()>;
}

/// In-memory ordered store. Snapshots clone the tree, which is cheap at the
/// scales the core's own tests run at; a production engine would supply
/// proper copy-on-write snapshots behind the same trait.
#[derive(Default)]
pub struct MemStore {
    tree: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemSnapshot {
    tree: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl StoreSnapshot for MemSnapshot {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.tree.get(key).cloned()
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.tree
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl Store for MemStore {
    fn snapshot(&self) -> Arc<dyn StoreSnapshot> {
        Arc::new(MemSnapshot {
            tree: self.tree.read().clone(),
        })
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut tree = self.tree.write();
        for op in batch.ops() {
            match op {
                WriteOp::Put(key, value) => {
                    tree.insert(key.clone(), value.clone());
                }
                WriteOp::Delete(key) => {
                    tree.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_isolated_from_later_commits() {
        let store = MemStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a/1".to_vec(), b"x".to_vec());
        store.commit(batch).unwrap();

        let before = store.snapshot();
        let mut batch = WriteBatch::new();
        batch.put(b"a/2".to_vec(), b"y".to_vec());
        store.commit(batch).unwrap();

        assert_eq!(before.scan_prefix(b"a/").len(), 1);
        assert_eq!(store.snapshot().scan_prefix(b"a/").len(), 2);
    }

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let store = MemStore::new();
        let mut batch = WriteBatch::new();
        for key in [&b"b/2"[..], b"a/2", b"a/10", b"c/1"] {
            batch.put(key.to_vec(), vec![]);
        }
        store.commit(batch).unwrap();

        let keys: Vec<Vec<u8>> = store
            .snapshot()
            .scan_prefix(b"a/")
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![b"a/10".to_vec(), b"a/2".to_vec()]);
    }

    #[test]
    fn batch_commit_is_atomic_over_put_and_delete() {
        let store = MemStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v1".to_vec());
        store.commit(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(b"k".to_vec());
        batch.put(b"k2".to_vec(), b"v2".to_vec());
        store.commit(batch).unwrap();

        let snap = store.snapshot();
        assert!(snap.get(b"k").is_none());
        assert_eq!(snap.get(b"k2"), Some(b"v2".to_vec()));
    }
}
