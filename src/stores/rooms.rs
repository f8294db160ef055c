//! Room directory: the room list and the focused room.

use std::collections::HashSet;

use chatsync_shared::{Room, RoomId};
use serde::{Deserialize, Serialize};

/// Persisted slice of the directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedRooms {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub current_room: Option<Room>,
}

/// Rooms keyed by id, in server order.
///
/// Invariants: ids are unique, and the current room, when set, is always in
/// the list.
#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    rooms: Vec<Room>,
    current: Option<RoomId>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: RoomId) -> bool {
        self.get(id).is_some()
    }

    pub fn current_room_id(&self) -> Option<RoomId> {
        self.current
    }

    pub fn current_room(&self) -> Option<&Room> {
        self.current.and_then(|id| self.get(id))
    }

    /// Replace the list wholesale. Duplicate ids keep their first occurrence.
    ///
    /// If the server omitted the current room it is carried over from the
    /// previous list. Returns `true` when that happened.
    pub fn set_rooms(&mut self, rooms: Vec<Room>) -> bool {
        let mut seen = HashSet::new();
        let mut next: Vec<Room> = rooms.into_iter().filter(|r| seen.insert(r.id)).collect();

        let mut healed = false;
        if let Some(current) = self.current {
            if !next.iter().any(|r| r.id == current) {
                if let Some(room) = self.get(current).cloned() {
                    crate::log_warn!("Room {} missing from server list, keeping it", current);
                    next.push(room);
                    healed = true;
                }
            }
        }

        self.rooms = next;
        healed
    }

    /// Focus a room, inserting it when the directory doesn't know it yet.
    pub fn set_current_room(&mut self, room: Option<Room>) {
        match room {
            Some(room) => {
                self.current = Some(room.id);
                if !self.contains(room.id) {
                    crate::log_warn!("Current room {} not in directory, adding it", room.id);
                    self.rooms.push(room);
                }
            }
            None => self.current = None,
        }
    }

    /// Insert a room or replace the entry with the same id.
    pub fn upsert_room(&mut self, room: Room) {
        match self.rooms.iter_mut().find(|r| r.id == room.id) {
            Some(existing) => *existing = room,
            None => self.rooms.push(room),
        }
    }

    pub fn update_online_count(&mut self, id: RoomId, online_count: u32) -> bool {
        match self.rooms.iter_mut().find(|r| r.id == id) {
            Some(room) => {
                room.online_count = online_count;
                true
            }
            None => false,
        }
    }

    /// Drop a room, clearing the focus if it pointed there.
    pub fn remove_room(&mut self, id: RoomId) -> bool {
        let before = self.rooms.len();
        self.rooms.retain(|r| r.id != id);
        self.clear_current_if(id);
        self.rooms.len() != before
    }

    pub fn clear_current_if(&mut self, id: RoomId) -> bool {
        if self.current == Some(id) {
            self.current = None;
            true
        } else {
            false
        }
    }

    pub fn to_persisted(&self) -> PersistedRooms {
        PersistedRooms {
            rooms: self.rooms.clone(),
            current_room: self.current_room().cloned(),
        }
    }

    /// Rebuild from a snapshot, re-establishing both invariants.
    pub fn from_persisted(persisted: PersistedRooms) -> Self {
        let mut directory = Self::new();
        directory.set_rooms(persisted.rooms);
        directory.set_current_room(persisted.current_room);
        directory
    }
}
