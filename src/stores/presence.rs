//! Presence tracker: online users per room.

use std::collections::HashMap;

use chatsync_shared::{OnlineUser, RoomId, UserId};

#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    rooms: HashMap<RoomId, Vec<OnlineUser>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn online_users(&self, room_id: RoomId) -> &[OnlineUser] {
        self.rooms.get(&room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tracked_rooms(&self) -> impl Iterator<Item = RoomId> + '_ {
        self.rooms.keys().copied()
    }

    /// Replace a room's list with a full snapshot, keeping the first entry per id.
    pub fn update_online_users(&mut self, room_id: RoomId, users: Vec<OnlineUser>) {
        let mut list: Vec<OnlineUser> = Vec::with_capacity(users.len());
        for user in users {
            if !list.iter().any(|u| u.id == user.id) {
                list.push(user);
            }
        }
        self.rooms.insert(room_id, list);
    }

    /// Returns `false` if the user was already listed.
    pub fn add_online_user(&mut self, room_id: RoomId, user: OnlineUser) -> bool {
        let list = self.rooms.entry(room_id).or_default();
        if list.iter().any(|u| u.id == user.id) {
            return false;
        }
        list.push(user);
        true
    }

    pub fn remove_online_user(&mut self, room_id: RoomId, user_id: UserId) -> bool {
        match self.rooms.get_mut(&room_id) {
            Some(list) => {
                let before = list.len();
                list.retain(|u| u.id != user_id);
                list.len() != before
            }
            None => false,
        }
    }

    pub fn clear_room(&mut self, room_id: RoomId) {
        self.rooms.remove(&room_id);
    }

    /// Drop every room's list, e.g. when the connection is lost.
    pub fn clear_all(&mut self) {
        if !self.rooms.is_empty() {
            crate::log_debug!("Clearing presence for {} room(s)", self.rooms.len());
        }
        self.rooms.clear();
    }

    /// Keep only the given room's list.
    pub fn retain_only(&mut self, room_id: RoomId) {
        self.rooms.retain(|id, _| *id == room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: UserId, name: &str) -> OnlineUser {
        OnlineUser {
            id,
            name: name.to_string(),
            email: None,
            joined_at: None,
            is_online: true,
        }
    }

    #[test]
    fn add_dedupes_by_id() {
        let mut presence = PresenceTracker::new();
        assert!(presence.add_online_user(1, user(3, "carol")));
        assert!(!presence.add_online_user(1, user(3, "carol again")));
        assert_eq!(presence.online_users(1).len(), 1);
    }

    #[test]
    fn snapshot_replaces_list() {
        let mut presence = PresenceTracker::new();
        presence.add_online_user(1, user(3, "carol"));
        presence.update_online_users(1, vec![user(4, "dave"), user(4, "dave"), user(5, "erin")]);
        let ids: Vec<_> = presence.online_users(1).iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn remove_and_retain() {
        let mut presence = PresenceTracker::new();
        presence.add_online_user(1, user(3, "carol"));
        presence.add_online_user(2, user(4, "dave"));

        assert!(presence.remove_online_user(1, 3));
        assert!(!presence.remove_online_user(1, 3));

        presence.retain_only(2);
        assert_eq!(presence.tracked_rooms().collect::<Vec<_>>(), vec![2]);

        presence.clear_all();
        assert!(presence.online_users(2).is_empty());
    }
}
