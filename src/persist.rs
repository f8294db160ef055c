//! Persisted client state.
//!
//! Only durable data is written: rooms and the focused room, message logs and
//! cursors, notifications, mentions and settings. Connection status, loading
//! flags and errors are transient and always start from defaults.

use serde::{Deserialize, Serialize};

use crate::offline_queue::QueuedMessage;
use crate::storage::{self, KeyValueStore};
use crate::stores::{PersistedMessages, PersistedNotifications, PersistedRooms};

pub const PERSIST_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedChatState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub rooms: PersistedRooms,
    #[serde(default)]
    pub messages: PersistedMessages,
    #[serde(default)]
    pub notifications: PersistedNotifications,
}

impl PersistedChatState {
    /// Load the snapshot under `key`. Missing, corrupt or foreign-version
    /// snapshots yield the default state.
    pub fn load(store: &dyn KeyValueStore, key: &str) -> Self {
        match storage::load::<Self>(store, key) {
            Some(state) if state.version == PERSIST_VERSION => state,
            Some(state) => {
                crate::log_warn!(
                    "Discarding chat snapshot with version {} (expected {})",
                    state.version,
                    PERSIST_VERSION
                );
                Self::default()
            }
            None => Self::default(),
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore, key: &str) -> bool {
        storage::save(store, key, self)
    }
}

pub fn load_queue(store: &dyn KeyValueStore, key: &str) -> Vec<QueuedMessage> {
    storage::load(store, key).unwrap_or_default()
}

pub fn save_queue(store: &dyn KeyValueStore, key: &str, entries: &[QueuedMessage]) -> bool {
    if entries.is_empty() {
        store.remove(key);
        return true;
    }
    storage::save(store, key, &entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chatsync_shared::Room;
    use chrono::Utc;

    #[test]
    fn snapshot_round_trips_through_storage() {
        let store = MemoryStorage::new();
        let mut state = PersistedChatState {
            version: PERSIST_VERSION,
            ..Default::default()
        };
        state.rooms.rooms.push(Room::new(1, "general", Utc::now()));
        state.notifications.total_unread_count = 3;

        assert!(state.save(&store, "chat-storage"));
        assert_eq!(PersistedChatState::load(&store, "chat-storage"), state);
    }

    #[test]
    fn corrupt_or_foreign_snapshots_fall_back() {
        let store = MemoryStorage::new();
        store.set("chat-storage", "{{{");
        assert_eq!(PersistedChatState::load(&store, "chat-storage"), PersistedChatState::default());

        store.set("chat-storage", r#"{"version": 99}"#);
        assert_eq!(PersistedChatState::load(&store, "chat-storage"), PersistedChatState::default());
    }

    #[test]
    fn empty_queue_removes_key() {
        let store = MemoryStorage::new();
        store.set("chat-offline-queue", "[]");
        assert!(save_queue(&store, "chat-offline-queue", &[]));
        assert!(store.get("chat-offline-queue").is_none());
        assert!(load_queue(&store, "chat-offline-queue").is_empty());
    }
}
