//! Local value store (C6, spec.md §4.6): key → value map with per-entry
//! expiry and republish timestamps.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kad_protocol::NodeId;
use tokio::sync::Mutex;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    last_republished: Instant,
}

/// In-memory key/value store with TTL-based expiry (spec.md Non-goals:
/// "no deletion of stored values; they expire by TTL").
pub struct ValueStore {
    entries: Mutex<HashMap<NodeId, Entry>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Overwrites any existing entry for `key`.
    pub async fn put(&self, key: NodeId, value: Vec<u8>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
                last_republished: now,
            },
        );
    }

    pub async fn get(&self, key: &NodeId) -> Option<Vec<u8>> {
        self.entries.lock().await.get(key).map(|e| e.value.clone())
    }

    /// Removes and returns every entry whose `expires_at` has passed.
    pub async fn expire_due(&self) -> Vec<NodeId> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let due: Vec<NodeId> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| *k)
            .collect();
        for key in &due {
            entries.remove(key);
        }
        due
    }

    /// Entries not republished within `interval`; marks them republished as
    /// of now (a republish that merely enumerates a key without retrying it
    /// on failure is still "attempted" per spec.md §4.9).
    pub async fn republish_due(&self, interval: Duration) -> Vec<(NodeId, Vec<u8>)> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let mut due = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if now.duration_since(entry.last_republished) >= interval {
                due.push((*key, entry.value.clone()));
                entry.last_republished = now;
            }
        }
        due
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        NodeId::from_bytes(bytes)
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = ValueStore::new();
        store.put(key(1), b"noodles".to_vec(), Duration::from_secs(60)).await;
        assert_eq!(store.get(&key(1)).await, Some(b"noodles".to_vec()));
    }

    #[tokio::test]
    async fn expire_due_removes_only_expired_entries() {
        let store = ValueStore::new();
        store.put(key(1), b"soon".to_vec(), Duration::from_millis(1)).await;
        store.put(key(2), b"later".to_vec(), Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let expired = store.expire_due().await;
        assert_eq!(expired, vec![key(1)]);
        assert_eq!(store.get(&key(1)).await, None);
        assert_eq!(store.get(&key(2)).await, Some(b"later".to_vec()));
    }

    #[tokio::test]
    async fn republish_due_reports_entries_older_than_interval() {
        let store = ValueStore::new();
        store.put(key(1), b"v".to_vec(), Duration::from_secs(60)).await;

        let due = store.republish_due(Duration::from_secs(0)).await;
        assert_eq!(due, vec![(key(1), b"v".to_vec())]);

        // Having just republished, it should not show up again immediately.
        let due_again = store.republish_due(Duration::from_secs(3600)).await;
        assert!(due_again.is_empty());
    }
}
