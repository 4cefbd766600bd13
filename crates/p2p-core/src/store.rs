//! The in-memory content store: a hash-to-bytes map shared by the Merkle
//! builder, the request handlers, and the downloader.
//!
//! Deliberately not persisted to disk — content reappears only by reloading
//! a local path or re-downloading it from a peer. [`DashMap`] gives us the
//! "store lock held only for a single insertion, lookup, or copy-out, never
//! across I/O" guarantee per entry without a coarse mutex around the whole map.

use crate::crypto::hash;
use crate::merkle::Hash;
use bytes::Bytes;
use dashmap::DashMap;

#[derive(Default)]
pub struct ContentStore {
    nodes: DashMap<Hash, Bytes>,
    root: std::sync::RwLock<Option<Hash>>,
}

impl ContentStore {
    pub fn new() -> Self {
        ContentStore::default()
    }

    pub fn has(&self, key: &Hash) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &Hash) -> Option<Bytes> {
        self.nodes.get(key).map(|entry| entry.clone())
    }

    pub fn insert(&self, key: Hash, data: Bytes) {
        self.nodes.insert(key, data);
    }

    /// Insert `data` only after confirming it hashes to `expected`. This is
    /// the integrity gate every remotely-received node must pass before it
    /// becomes visible to the rest of the system.
    pub fn insert_verified(&self, expected: &Hash, data: Bytes) -> Result<(), StoreError> {
        let actual = hash(&data);
        if &actual != expected {
            return Err(StoreError::HashMismatch {
                expected: *expected,
                actual,
            });
        }
        self.nodes.insert(*expected, data);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn set_root(&self, root: Hash) {
        *self.root.write().unwrap() = Some(root);
    }

    pub fn root(&self) -> Option<Hash> {
        *self.root.read().unwrap()
    }

    /// Replace the store's contents wholesale, as happens when a local path
    /// is (re)loaded — the previous local tree is dropped. Remote content
    /// fetched into the store via [`ContentStore::insert_verified`] is also
    /// cleared; the store represents one loaded tree at a time per the
    /// in-memory, non-resumable content model.
    pub fn load_tree(&self, nodes: impl IntoIterator<Item = (Hash, Bytes)>, root: Hash) {
        self.nodes.clear();
        for (h, data) in nodes {
            self.nodes.insert(h, data);
        }
        self.set_root(root);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("received node hash does not match the requested hash (expected {expected:02x?}, got {actual:02x?})", expected = &expected[..4], actual = &actual[..4])]
    HashMismatch { expected: Hash, actual: Hash },
}
