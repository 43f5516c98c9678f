//! Shared server state and the broadcast path.
//!
//! `ServerState` is one owned object handed around by `Arc` reference; there
//! are no process-wide singletons. It carries the registry, the per-room
//! chat sequence counters, the accepted-token set, and relay metrics.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use cmdchat_wire::Envelope;
use tracing::trace;

use crate::registry::SessionRegistry;
use crate::session::SessionConfig;

/// Shared server state: registry, room counters, auth tokens, metrics.
pub struct ServerState {
    /// Live sessions and rooms
    pub registry: SessionRegistry,
    /// Session tunables applied to every connection
    pub config: SessionConfig,
    room_seq: Mutex<HashMap<String, u64>>,
    tokens: HashSet<String>,
    relayed: AtomicU64,
}

impl ServerState {
    /// Build state with the given tunables and accepted tokens (empty set
    /// disables the auth gate).
    pub fn new(config: SessionConfig, tokens: HashSet<String>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            config,
            room_seq: Mutex::new(HashMap::new()),
            tokens,
            relayed: AtomicU64::new(0),
        }
    }

    /// Whether the auth gate admits this token.
    pub fn token_ok(&self, token: Option<&str>) -> bool {
        if self.tokens.is_empty() {
            return true;
        }
        token.is_some_and(|t| self.tokens.contains(t))
    }

    /// Whether the auth gate is active at all.
    pub fn auth_required(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Envelopes relayed since startup.
    pub fn relayed_count(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    /// Current server clock as UTC unix milliseconds.
    pub fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Broadcast an envelope to a room, optionally excluding one session.
    ///
    /// Ids are snapshotted under the registry lock, the lock is released,
    /// and each recipient gets a non-blocking enqueue; sessions removed in
    /// the meantime are skipped silently.
    pub fn broadcast(&self, room: &str, exclude: Option<u64>, envelope: Envelope) {
        self.enqueue_room(room, exclude, envelope);
        self.relayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Broadcast a chat line, stamping the per-room sequence number.
    ///
    /// The room counter lock is held across the enqueue pass so every
    /// recipient of the room observes chats in one `seq` order. Enqueues
    /// never suspend, so no I/O happens under the lock.
    pub fn broadcast_chat(&self, room: &str, sender: &str, sender_id: u64, text: String) -> u64 {
        let mut counters = self.room_seq.lock().expect("room counters poisoned");
        let counter = counters.entry(room.to_string()).or_insert(0);
        let seq = *counter;
        *counter += 1;

        let envelope = Envelope::Chat {
            sender: Some(sender.to_string()),
            room: Some(room.to_string()),
            text,
            ts: Some(self.now_ms()),
            seq: Some(seq),
        };
        trace!(room, seq, sender_id, "chat broadcast");
        self.enqueue_room(room, None, envelope);
        self.relayed.fetch_add(1, Ordering::Relaxed);
        seq
    }

    /// Broadcast a system notice to a room.
    pub fn broadcast_system(&self, room: &str, exclude: Option<u64>, text: String) {
        let envelope = Envelope::System {
            text,
            room: Some(room.to_string()),
            ts: Some(self.now_ms()),
        };
        self.enqueue_room(room, exclude, envelope);
    }

    fn enqueue_room(&self, room: &str, exclude: Option<u64>, envelope: Envelope) {
        let ids = self.registry.by_room(room);
        for id in ids {
            if Some(id) == exclude {
                continue;
            }
            if let Some(queue) = self.registry.queue(id) {
                queue.push(envelope.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SendQueue;
    use std::sync::Arc;

    fn state_with_tokens(tokens: &[&str]) -> ServerState {
        ServerState::new(
            SessionConfig::default(),
            tokens.iter().map(|t| t.to_string()).collect(),
        )
    }

    #[test]
    fn test_token_gate() {
        let open = state_with_tokens(&[]);
        assert!(open.token_ok(None));
        assert!(open.token_ok(Some("anything")));
        assert!(!open.auth_required());

        let gated = state_with_tokens(&["t1", "t2"]);
        assert!(gated.auth_required());
        assert!(gated.token_ok(Some("t1")));
        assert!(!gated.token_ok(Some("t3")));
        assert!(!gated.token_ok(None));
    }

    #[test]
    fn test_room_seq_starts_at_zero_and_is_per_room() {
        let state = state_with_tokens(&[]);
        assert_eq!(state.broadcast_chat("lobby", "a", 1, "x".into()), 0);
        assert_eq!(state.broadcast_chat("lobby", "b", 2, "y".into()), 1);
        assert_eq!(state.broadcast_chat("other", "c", 3, "z".into()), 0);
        assert_eq!(state.broadcast_chat("lobby", "a", 1, "w".into()), 2);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_room_members_only() {
        let state = state_with_tokens(&[]);
        let qa = Arc::new(SendQueue::new(16));
        let qb = Arc::new(SendQueue::new(16));
        let qc = Arc::new(SendQueue::new(16));
        state.registry.insert(1, "lobby", qa.clone());
        state.registry.insert(2, "lobby", qb.clone());
        state.registry.insert(3, "other", qc.clone());

        state.broadcast_chat("lobby", "alice", 1, "hello".into());

        assert_eq!(qa.len(), 1);
        assert_eq!(qb.len(), 1);
        assert_eq!(qc.len(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_exclusion() {
        let state = state_with_tokens(&[]);
        let qa = Arc::new(SendQueue::new(16));
        let qb = Arc::new(SendQueue::new(16));
        state.registry.insert(1, "lobby", qa.clone());
        state.registry.insert(2, "lobby", qb.clone());

        state.broadcast_system("lobby", Some(1), "bob joined the room".into());
        assert!(qa.is_empty());
        assert_eq!(qb.len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_sessions_are_skipped() {
        let state = state_with_tokens(&[]);
        let qa = Arc::new(SendQueue::new(16));
        state.registry.insert(1, "lobby", qa);
        state.registry.remove(1);
        // Must not panic or deliver
        state.broadcast_system("lobby", None, "ghost town".into());
    }
}
