//! Per-room message logs with backward pagination.
//!
//! Each room's log is kept in non-decreasing `created_at` order and never holds
//! two messages with the same id. History pages replace (page 1) or prepend
//! (older pages) the log; realtime arrivals append.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chatsync_shared::{ChatMessage, MessagesResponse, PaginationInfo, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_PER_PAGE: u32 = 50;

/// Pagination bookkeeping for one room's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationCursor {
    pub current_page: u32,
    pub last_page: u32,
    pub per_page: u32,
    pub total: u64,
    pub has_more: bool,
}

impl PaginationCursor {
    /// Normalize the server's pagination block, filling gaps with defaults.
    pub fn from_server(info: &PaginationInfo, page_len: usize) -> Self {
        Self {
            current_page: info.current_page,
            last_page: info.last_page.unwrap_or(1),
            per_page: info.per_page.unwrap_or(DEFAULT_PER_PAGE),
            total: info.total.unwrap_or(page_len as u64),
            has_more: info.has_more_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CachedPage {
    messages: Vec<ChatMessage>,
    cursor: PaginationCursor,
    cached_at: DateTime<Utc>,
}

/// First-page cache with a fixed time-to-live.
#[derive(Debug, Clone)]
pub struct MessageCache {
    ttl: Duration,
    entries: HashMap<RoomId, CachedPage>,
}

impl MessageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Fresh cached page for a room. Expired entries are evicted.
    pub fn get(&mut self, room_id: RoomId, now: DateTime<Utc>) -> Option<(Vec<ChatMessage>, PaginationCursor)> {
        let entry = self.entries.get(&room_id)?;
        let age = (now - entry.cached_at).to_std().unwrap_or(Duration::ZERO);
        if age >= self.ttl {
            self.entries.remove(&room_id);
            return None;
        }
        Some((entry.messages.clone(), entry.cursor.clone()))
    }

    pub fn put(
        &mut self,
        room_id: RoomId,
        messages: Vec<ChatMessage>,
        cursor: PaginationCursor,
        now: DateTime<Utc>,
    ) {
        self.entries.insert(
            room_id,
            CachedPage {
                messages,
                cursor,
                cached_at: now,
            },
        );
    }

    /// Append to an existing entry. Rooms without an entry are left uncached.
    pub fn append(&mut self, room_id: RoomId, message: &ChatMessage) {
        if let Some(entry) = self.entries.get_mut(&room_id) {
            if !entry.messages.iter().any(|m| m.id == message.id) {
                entry.messages.push(message.clone());
            }
        }
    }

    pub fn remove(&mut self, room_id: RoomId) {
        self.entries.remove(&room_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Persisted slice of the message store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedMessages {
    #[serde(default)]
    pub messages: HashMap<RoomId, Vec<ChatMessage>>,
    #[serde(default)]
    pub pagination: HashMap<RoomId, PaginationCursor>,
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    logs: HashMap<RoomId, Vec<ChatMessage>>,
    cursors: HashMap<RoomId, PaginationCursor>,
    cache: MessageCache,
}

impl MessageStore {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            logs: HashMap::new(),
            cursors: HashMap::new(),
            cache: MessageCache::new(cache_ttl),
        }
    }

    pub fn messages(&self, room_id: RoomId) -> &[ChatMessage] {
        self.logs.get(&room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cursor(&self, room_id: RoomId) -> Option<&PaginationCursor> {
        self.cursors.get(&room_id)
    }

    pub fn has_more(&self, room_id: RoomId) -> bool {
        self.cursors.get(&room_id).is_some_and(|c| c.has_more)
    }

    pub fn contains(&self, room_id: RoomId, id: u64) -> bool {
        self.logs
            .get(&room_id)
            .is_some_and(|log| log.iter().any(|m| m.id == id))
    }

    /// Add a realtime or locally-sent message. Returns `false` for duplicates.
    pub fn add_message(&mut self, room_id: RoomId, message: ChatMessage) -> bool {
        let log = self.logs.entry(room_id).or_default();
        if log.iter().any(|m| m.id == message.id) {
            crate::log_debug!("Duplicate message {} in room {} ignored", message.id, room_id);
            return false;
        }

        self.cache.append(room_id, &message);

        let in_order = log.last().map_or(true, |tail| tail.created_at <= message.created_at);
        if in_order {
            log.push(message);
        } else {
            let pos = log.partition_point(|m| m.created_at <= message.created_at);
            log.insert(pos, message);
        }
        true
    }

    /// Serve page 1 from the cache. Returns `true` on a hit.
    pub fn load_cached_first_page(&mut self, room_id: RoomId, now: DateTime<Utc>) -> bool {
        match self.cache.get(room_id, now) {
            Some((messages, cursor)) => {
                self.logs.insert(room_id, messages);
                self.cursors.insert(room_id, cursor);
                true
            }
            None => false,
        }
    }

    /// Install a page from the server, replacing the room's log. Page 1 is
    /// also written to the cache.
    pub fn replace_page(&mut self, room_id: RoomId, response: MessagesResponse, now: DateTime<Utc>) {
        let cursor = PaginationCursor::from_server(&response.pagination, response.messages.len());
        let mut seen = HashSet::new();
        let messages: Vec<ChatMessage> = response
            .messages
            .into_iter()
            .filter(|m| seen.insert(m.id))
            .collect();

        if cursor.current_page == 1 {
            self.cache.put(room_id, messages.clone(), cursor.clone(), now);
        }
        self.logs.insert(room_id, messages);
        self.cursors.insert(room_id, cursor);
    }

    /// Page to request for "load more", if the room has older history.
    pub fn next_page(&self, room_id: RoomId) -> Option<u32> {
        self.cursors
            .get(&room_id)
            .filter(|c| c.has_more)
            .map(|c| c.current_page + 1)
    }

    /// Prepend an older page fetched for `requested_page`.
    ///
    /// The page is applied only if it is still the next one for the room's
    /// current cursor; late or repeated responses are discarded. Returns
    /// `true` if applied.
    pub fn apply_older_page(&mut self, room_id: RoomId, requested_page: u32, response: MessagesResponse) -> bool {
        if self.next_page(room_id) != Some(requested_page) {
            crate::log_debug!(
                "Discarding stale page {} for room {} (expected {:?})",
                requested_page,
                room_id,
                self.next_page(room_id)
            );
            return false;
        }

        let cursor = PaginationCursor::from_server(&response.pagination, response.messages.len());
        let log = self.logs.entry(room_id).or_default();
        let mut seen: HashSet<u64> = log.iter().map(|m| m.id).collect();
        let mut merged: Vec<ChatMessage> = response
            .messages
            .into_iter()
            .filter(|m| seen.insert(m.id))
            .collect();
        merged.append(log);
        *log = merged;

        self.cursors.insert(room_id, cursor);
        true
    }

    /// Remove a room's log, cursor and cache entry.
    pub fn clear_room(&mut self, room_id: RoomId) {
        self.logs.remove(&room_id);
        self.cursors.remove(&room_id);
        self.cache.remove(room_id);
    }

    pub fn to_persisted(&self) -> PersistedMessages {
        PersistedMessages {
            messages: self.logs.clone(),
            pagination: self.cursors.clone(),
        }
    }

    pub fn from_persisted(persisted: PersistedMessages, cache_ttl: Duration) -> Self {
        let mut store = Self::new(cache_ttl);
        store.logs = persisted.messages;
        store.cursors = persisted.pagination;
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_shared::{ChatUser, MessageType};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn msg(id: u64, secs: i64) -> ChatMessage {
        ChatMessage {
            id,
            room_id: 1,
            user_id: 2,
            body: format!("message {}", id),
            kind: MessageType::Text,
            created_at: at(secs),
            updated_at: at(secs),
            author: ChatUser {
                id: 2,
                name: "bob".into(),
                email: None,
            },
            reactions: Vec::new(),
        }
    }

    fn page(messages: Vec<ChatMessage>, current_page: u32, has_more: bool) -> MessagesResponse {
        MessagesResponse {
            messages,
            pagination: PaginationInfo {
                current_page,
                last_page: Some(3),
                per_page: Some(2),
                total: Some(6),
                has_more_pages: has_more,
            },
        }
    }

    fn ids(store: &MessageStore) -> Vec<u64> {
        store.messages(1).iter().map(|m| m.id).collect()
    }

    #[test]
    fn duplicate_ids_are_absorbed() {
        let mut store = MessageStore::new(Duration::from_secs(300));
        assert!(store.add_message(1, msg(5, 10)));
        assert!(!store.add_message(1, msg(5, 10)));
        assert_eq!(ids(&store), vec![5]);
    }

    #[test]
    fn late_arrival_is_inserted_in_order() {
        let mut store = MessageStore::new(Duration::from_secs(300));
        store.add_message(1, msg(1, 10));
        store.add_message(1, msg(3, 30));
        store.add_message(1, msg(2, 20));
        assert_eq!(ids(&store), vec![1, 2, 3]);
    }

    #[test]
    fn older_pages_prepend_without_touching_suffix() {
        let mut store = MessageStore::new(Duration::from_secs(300));
        store.replace_page(1, page(vec![msg(5, 50), msg(6, 60)], 1, true), at(0));
        let before: Vec<_> = store.messages(1).iter().map(|m| m.created_at).collect();

        assert_eq!(store.next_page(1), Some(2));
        assert!(store.apply_older_page(1, 2, page(vec![msg(3, 30), msg(4, 40), msg(5, 50)], 2, true)));

        assert_eq!(ids(&store), vec![3, 4, 5, 6]);
        let suffix: Vec<_> = store.messages(1)[2..].iter().map(|m| m.created_at).collect();
        assert_eq!(suffix, before);
        assert_eq!(store.cursor(1).map(|c| c.current_page), Some(2));
    }

    #[test]
    fn stale_older_page_is_discarded() {
        let mut store = MessageStore::new(Duration::from_secs(300));
        store.replace_page(1, page(vec![msg(5, 50)], 1, true), at(0));
        assert!(store.apply_older_page(1, 2, page(vec![msg(4, 40)], 2, true)));

        // A second response for page 2 arrives late.
        assert!(!store.apply_older_page(1, 2, page(vec![msg(4, 40)], 2, true)));
        assert_eq!(ids(&store), vec![4, 5]);
    }

    #[test]
    fn no_more_pages_means_no_next_page() {
        let mut store = MessageStore::new(Duration::from_secs(300));
        store.replace_page(1, page(vec![msg(1, 1)], 1, false), at(0));
        assert_eq!(store.next_page(1), None);
        assert!(!store.apply_older_page(1, 2, page(vec![msg(0, 0)], 2, false)));
    }

    #[test]
    fn cache_serves_first_page_until_ttl() {
        let mut store = MessageStore::new(Duration::from_secs(300));
        store.replace_page(1, page(vec![msg(1, 1)], 1, true), at(0));
        store.add_message(1, msg(2, 2));
        store.clear_room(1);
        assert!(!store.load_cached_first_page(1, at(10)));

        store.replace_page(1, page(vec![msg(1, 1)], 1, true), at(0));
        store.add_message(1, msg(2, 2));
        assert!(store.load_cached_first_page(1, at(299)));
        assert_eq!(ids(&store), vec![1, 2]);
        assert!(!store.load_cached_first_page(1, at(300)));
    }

    #[test]
    fn cursor_defaults_fill_missing_fields() {
        let info = PaginationInfo {
            current_page: 1,
            last_page: None,
            per_page: None,
            total: None,
            has_more_pages: false,
        };
        let cursor = PaginationCursor::from_server(&info, 7);
        assert_eq!(cursor.last_page, 1);
        assert_eq!(cursor.per_page, 50);
        assert_eq!(cursor.total, 7);
    }
}
