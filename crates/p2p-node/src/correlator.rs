//! The two keyed wait-tables that hand incoming replies to blocked senders.
//!
//! Each entry is a single-shot delivery slot, owned by the caller that is
//! currently waiting on it. A slot is removed on delivery, on explicit
//! closure (a NoDatum signal), or by the waiter itself on timeout — it never
//! outlives the one wait it serves.

use dashmap::DashMap;
use tokio::sync::oneshot;

/// A 32-byte correlation key. For id-keyed waits, the 4-byte request id
/// occupies the first four bytes of an otherwise zeroed key. For hash-keyed
/// waits, the key is the requested content hash itself.
pub type WaitKey = [u8; 32];

pub fn key_from_id(id: u32) -> WaitKey {
    let mut key = [0u8; 32];
    key[0..4].copy_from_slice(&id.to_be_bytes());
    key
}

#[derive(Default)]
pub struct Correlator {
    by_id: DashMap<WaitKey, oneshot::Sender<Vec<u8>>>,
    by_hash: DashMap<WaitKey, oneshot::Sender<Vec<u8>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator::default()
    }

    pub fn register_by_id(&self, id: u32) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.by_id.insert(key_from_id(id), tx);
        rx
    }

    pub fn register_by_hash(&self, hash: WaitKey) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.by_hash.insert(hash, tx);
        rx
    }

    /// Deliver a reply body to the id-keyed waiter, if one exists. Returns
    /// whether a waiter was found.
    pub fn deliver_by_id(&self, id: u32, body: Vec<u8>) -> bool {
        match self.by_id.remove(&key_from_id(id)) {
            Some((_, tx)) => tx.send(body).is_ok(),
            None => false,
        }
    }

    pub fn deliver_by_hash(&self, hash: WaitKey, body: Vec<u8>) -> bool {
        match self.by_hash.remove(&hash) {
            Some((_, tx)) => tx.send(body).is_ok(),
            None => false,
        }
    }

    /// Close the hash-keyed waiter without delivering data — this is how a
    /// NoDatum reply is turned into "the peer answered, it doesn't have
    /// this". Dropping the sender makes the receiver resolve to an error
    /// immediately, distinct from a timeout.
    pub fn close_by_hash(&self, hash: WaitKey) -> bool {
        self.by_hash.remove(&hash).is_some()
    }

    pub fn remove_by_id(&self, id: u32) {
        self.by_id.remove(&key_from_id(id));
    }

    pub fn remove_by_hash(&self, hash: WaitKey) {
        self.by_hash.remove(&hash);
    }

    pub fn pending_by_id_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn pending_by_hash_count(&self) -> usize {
        self.by_hash.len()
    }
}
