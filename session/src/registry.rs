//! Concurrent session registry with a room index.
//!
//! One mutex serializes every mutation of the `id → entry` map and the
//! `room → id-set` index. The lock is never held across a suspension point:
//! callers get ids, snapshots, or cloned queue handles and do their I/O
//! afterwards. Rooms exist exactly as long as they have members.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::session::SendQueue;

struct Entry {
    room: String,
    queue: Arc<SendQueue>,
}

struct Inner {
    sessions: HashMap<u64, Entry>,
    rooms: HashMap<String, HashSet<u64>>,
    next_id: u64,
}

/// Registry of live sessions, keyed by client id and indexed by room.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                rooms: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Allocate the next client id, unique for process lifetime.
    pub fn next_client_id(&self) -> u64 {
        let mut inner = self.lock();
        inner.next_id += 1;
        inner.next_id
    }

    /// Insert a session into the id map and its room set.
    pub fn insert(&self, client_id: u64, room: &str, queue: Arc<SendQueue>) {
        let mut inner = self.lock();
        inner.sessions.insert(
            client_id,
            Entry {
                room: room.to_string(),
                queue,
            },
        );
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(client_id);
    }

    /// Remove a session; its room is destroyed if left empty. Returns the
    /// room the session was in.
    pub fn remove(&self, client_id: u64) -> Option<String> {
        let mut inner = self.lock();
        let entry = inner.sessions.remove(&client_id)?;
        if let Some(members) = inner.rooms.get_mut(&entry.room) {
            members.remove(&client_id);
            if members.is_empty() {
                inner.rooms.remove(&entry.room);
            }
        }
        Some(entry.room)
    }

    /// Atomically move a session between rooms. Returns the old room, or
    /// `None` when the session is gone or already there.
    pub fn rename_room(&self, client_id: u64, new_room: &str) -> Option<String> {
        let mut inner = self.lock();
        let old_room = {
            let entry = inner.sessions.get(&client_id)?;
            if entry.room == new_room {
                return None;
            }
            entry.room.clone()
        };

        if let Some(members) = inner.rooms.get_mut(&old_room) {
            members.remove(&client_id);
            if members.is_empty() {
                inner.rooms.remove(&old_room);
            }
        }
        inner
            .rooms
            .entry(new_room.to_string())
            .or_default()
            .insert(client_id);
        if let Some(entry) = inner.sessions.get_mut(&client_id) {
            entry.room = new_room.to_string();
        }
        Some(old_room)
    }

    /// Point-in-time list of the session ids in a room.
    pub fn by_room(&self, room: &str) -> Vec<u64> {
        let inner = self.lock();
        inner
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Clone the send-queue handle for a session, if it is still live.
    pub fn queue(&self, client_id: u64) -> Option<Arc<SendQueue>> {
        let inner = self.lock();
        inner.sessions.get(&client_id).map(|e| e.queue.clone())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("registry poisoned")
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let inner = self.lock();
        // Every session is in exactly the room its entry names, and the
        // registry id-set equals the union of all room sets.
        let mut union: HashSet<u64> = HashSet::new();
        for (room, members) in &inner.rooms {
            assert!(!members.is_empty(), "empty room {room} survived");
            for id in members {
                assert!(union.insert(*id), "session {id} in two rooms");
                assert_eq!(&inner.sessions[id].room, room);
            }
        }
        let ids: HashSet<u64> = inner.sessions.keys().copied().collect();
        assert_eq!(union, ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(reg: &SessionRegistry, room: &str) -> u64 {
        let id = reg.next_client_id();
        reg.insert(id, room, Arc::new(SendQueue::new(16)));
        id
    }

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let reg = SessionRegistry::new();
        let a = reg.next_client_id();
        let b = reg.next_client_id();
        assert!(b > a);
    }

    #[test]
    fn test_insert_remove_room_lifecycle() {
        let reg = SessionRegistry::new();
        let a = add(&reg, "lobby");
        let b = add(&reg, "lobby");
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.room_count(), 1);
        reg.check_invariants();

        assert_eq!(reg.remove(a).as_deref(), Some("lobby"));
        assert_eq!(reg.room_count(), 1);
        assert_eq!(reg.remove(b).as_deref(), Some("lobby"));
        // Last member gone, room destroyed
        assert_eq!(reg.room_count(), 0);
        reg.check_invariants();
    }

    #[test]
    fn test_remove_unknown_is_none() {
        let reg = SessionRegistry::new();
        assert!(reg.remove(99).is_none());
    }

    #[test]
    fn test_rename_room_moves_atomically() {
        let reg = SessionRegistry::new();
        let a = add(&reg, "lobby");
        assert_eq!(reg.rename_room(a, "dev").as_deref(), Some("lobby"));
        assert!(reg.by_room("lobby").is_empty());
        assert_eq!(reg.by_room("dev"), vec![a]);
        assert_eq!(reg.room_count(), 1);
        reg.check_invariants();
    }

    #[test]
    fn test_rename_to_same_room_is_noop() {
        let reg = SessionRegistry::new();
        let a = add(&reg, "lobby");
        assert!(reg.rename_room(a, "lobby").is_none());
        assert_eq!(reg.by_room("lobby"), vec![a]);
    }

    #[test]
    fn test_by_room_is_a_snapshot() {
        let reg = SessionRegistry::new();
        let a = add(&reg, "lobby");
        let snapshot = reg.by_room("lobby");
        reg.remove(a);
        assert_eq!(snapshot, vec![a]);
        assert!(reg.queue(a).is_none());
    }

    #[test]
    fn test_join_leave_storm_keeps_invariants() {
        // Deterministic pseudo-random churn across rooms
        let reg = SessionRegistry::new();
        let rooms = ["lobby", "dev", "ops", "random"];
        let mut live: Vec<u64> = Vec::new();
        let mut seed: u64 = 0x9E3779B97F4A7C15;

        for step in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let roll = (seed >> 33) as usize;
            match roll % 3 {
                0 => {
                    let id = add(&reg, rooms[roll % rooms.len()]);
                    live.push(id);
                }
                1 if !live.is_empty() => {
                    let id = live[roll % live.len()];
                    reg.rename_room(id, rooms[(roll / 7) % rooms.len()]);
                }
                _ if !live.is_empty() => {
                    let id = live.swap_remove(roll % live.len());
                    assert!(reg.remove(id).is_some());
                }
                _ => {}
            }
            if step % 25 == 0 {
                reg.check_invariants();
            }
        }
        reg.check_invariants();
        assert_eq!(reg.len(), live.len());
    }
}
