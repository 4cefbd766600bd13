//! Per-peer session state, keyed by the remote socket address string.
//!
//! A session records what a Hello/HelloReply/KeyExchange exchange has
//! established about a remote peer so far. There is no handshake state
//! machine beyond what these fields capture — a session is valid the moment
//! a Hello has been exchanged, and optionally encrypted once a KeyExchange
//! completes.

use dashmap::DashMap;
use p2p_core::crypto::EphemeralSecret;
use p256::ecdsa::VerifyingKey;
use std::time::Instant;

pub struct Session {
    pub last_seen: Instant,
    pub peer_name: Option<String>,
    pub verifying_key: Option<VerifyingKey>,
    /// Our own ephemeral secret for a KeyExchange in progress or completed;
    /// dropped once it's no longer needed beyond deriving `shared_key`.
    pub ephemeral_private: Option<EphemeralSecret>,
    /// Our ephemeral secret for a KeyExchange *we* initiated, held here
    /// until the peer's reply arrives so the shared key gets derived
    /// against the same keypair we advertised, not a freshly generated one.
    pub pending_ephemeral: Option<EphemeralSecret>,
    pub shared_key: Option<[u8; 32]>,
    pub encrypted: bool,
}

impl Session {
    fn fresh() -> Self {
        Session {
            last_seen: Instant::now(),
            peer_name: None,
            verifying_key: None,
            ephemeral_private: None,
            pending_ephemeral: None,
            shared_key: None,
            encrypted: false,
        }
    }
}

#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable::default()
    }

    /// Mark `addr` as seen just now, creating a session if none existed.
    pub fn touch(&self, addr: &str) {
        self.sessions
            .entry(addr.to_string())
            .and_modify(|s| s.last_seen = Instant::now())
            .or_insert_with(Session::fresh);
    }

    pub fn record_hello(&self, addr: &str, peer_name: String, key: VerifyingKey) {
        let mut session = self
            .sessions
            .entry(addr.to_string())
            .or_insert_with(Session::fresh);
        session.last_seen = Instant::now();
        session.peer_name = Some(peer_name);
        session.verifying_key = Some(key);
    }

    pub fn record_key_exchange(
        &self,
        addr: &str,
        ephemeral_private: EphemeralSecret,
        shared_key: [u8; 32],
        encrypted: bool,
    ) {
        let mut session = self
            .sessions
            .entry(addr.to_string())
            .or_insert_with(Session::fresh);
        session.last_seen = Instant::now();
        session.ephemeral_private = Some(ephemeral_private);
        session.shared_key = Some(shared_key);
        session.encrypted = encrypted;
    }

    pub fn has_session(&self, addr: &str) -> bool {
        self.sessions.contains_key(addr)
    }

    pub fn verifying_key(&self, addr: &str) -> Option<VerifyingKey> {
        self.sessions.get(addr).and_then(|s| s.verifying_key)
    }

    pub fn shared_key(&self, addr: &str) -> Option<[u8; 32]> {
        self.sessions.get(addr).and_then(|s| s.shared_key)
    }

    pub fn is_encrypted(&self, addr: &str) -> bool {
        self.sessions.get(addr).map(|s| s.encrypted).unwrap_or(false)
    }

    /// Stash an ephemeral secret for a KeyExchange we just initiated,
    /// keyed by the peer's address, so the eventual reply can be derived
    /// against it rather than a newly generated one.
    pub fn set_pending_ephemeral(&self, addr: &str, ephemeral: EphemeralSecret) {
        let mut session = self
            .sessions
            .entry(addr.to_string())
            .or_insert_with(Session::fresh);
        session.pending_ephemeral = Some(ephemeral);
    }

    /// Take back the ephemeral secret stashed by [`Self::set_pending_ephemeral`],
    /// if one is waiting — `None` means we never initiated a KeyExchange to
    /// this address, so an incoming one should be treated as a fresh request.
    pub fn take_pending_ephemeral(&self, addr: &str) -> Option<EphemeralSecret> {
        self.sessions.get_mut(addr).and_then(|mut s| s.pending_ephemeral.take())
    }

    pub fn remove(&self, addr: &str) {
        self.sessions.remove(addr);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Addresses idle for at least `idle` but with no entry returned by a
    /// prior call since their last touch — used by the maintenance sweep to
    /// decide who gets a keep-alive ping.
    pub fn idle_since(&self, idle: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        self.sessions
            .iter()
            .filter(|entry| now.duration_since(entry.last_seen) >= idle)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn remove_idle_since(&self, idle: std::time::Duration) -> Vec<String> {
        let expired = self.idle_since(idle);
        for addr in &expired {
            self.sessions.remove(addr);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn touch_creates_a_session() {
        let table = SessionTable::new();
        assert!(!table.has_session("1.2.3.4:9000"));
        table.touch("1.2.3.4:9000");
        assert!(table.has_session("1.2.3.4:9000"));
    }

    #[test]
    fn idle_since_zero_duration_returns_everything() {
        let table = SessionTable::new();
        table.touch("a");
        table.touch("b");
        let idle = table.idle_since(Duration::from_secs(0));
        assert_eq!(idle.len(), 2);
    }

    #[test]
    fn remove_idle_since_evicts_and_returns_the_expired_set() {
        let table = SessionTable::new();
        table.touch("stale");
        let expired = table.remove_idle_since(Duration::from_secs(0));
        assert_eq!(expired, vec!["stale".to_string()]);
        assert!(table.is_empty());
    }

    #[test]
    fn record_hello_sets_peer_name_and_key() {
        let table = SessionTable::new();
        let identity = p2p_core::crypto::Identity::generate();
        table.record_hello("peer", "alice".to_string(), *identity.verifying_key());
    }

    #[test]
    fn verifying_key_is_absent_until_a_hello_is_recorded() {
        let table = SessionTable::new();
        table.touch("peer");
        assert!(table.verifying_key("peer").is_none());

        let identity = p2p_core::crypto::Identity::generate();
        table.record_hello("peer", "alice".to_string(), *identity.verifying_key());
        assert_eq!(table.verifying_key("peer"), Some(*identity.verifying_key()));
    }

    #[test]
    fn pending_ephemeral_is_taken_exactly_once() {
        use p2p_core::crypto::EphemeralSecret;

        let table = SessionTable::new();
        let ephemeral = EphemeralSecret::generate();
        let public = ephemeral.public_key_bytes();
        table.set_pending_ephemeral("peer", ephemeral);

        let taken = table.take_pending_ephemeral("peer").unwrap();
        assert_eq!(taken.public_key_bytes(), public);
        assert!(table.take_pending_ephemeral("peer").is_none());
    }
}
