//! Realtime channel protocol: the JSON envelope pushed by the broker and the
//! typed events the engine dispatches on.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, OnlineUser, Room, RoomId, UserId};

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_USER_JOINED: &str = "user_joined";
pub const EVENT_USER_LEFT: &str = "user_left";
pub const EVENT_USER_MUTED: &str = "user_muted";
pub const EVENT_USER_UNMUTED: &str = "user_unmuted";
pub const EVENT_ROOM_USER_JOINED: &str = "user.joined.room";
pub const EVENT_ROOM_USER_LEFT: &str = "user.left.room";
pub const EVENT_ROOM_CREATED: &str = "room.created";

/// Action carried by presence envelopes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Here,
    Joining,
    Leaving,
}

/// Raw envelope as received from the realtime channel.
///
/// Every field but `type` is optional; which ones are present depends on the
/// event type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RealtimeEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<PresenceAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<OnlineUser>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<OnlineUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<Room>,
}

/// Presence change pushed for a room.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceChange {
    pub joined: bool,
    pub room_id: Option<RoomId>,
    pub action: Option<PresenceAction>,
    pub users: Vec<OnlineUser>,
    pub user: Option<OnlineUser>,
}

/// Typed realtime event.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Message(Box<ChatMessage>),
    Presence(PresenceChange),
    UserMuted {
        user_id: UserId,
        muted_until: Option<String>,
        reason: Option<String>,
    },
    UserUnmuted {
        user_id: UserId,
    },
    RoomOnlineCount {
        room_id: RoomId,
        online_count: u32,
    },
    RoomCreated(Box<Room>),
    /// Recognized type with a payload that is missing or does not decode.
    Malformed {
        kind: String,
        reason: String,
    },
    /// Type not handled by the engine; ignored.
    Unknown(String),
}

impl RealtimeEnvelope {
    /// Parse a text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn into_event(self) -> RealtimeEvent {
        let malformed = |kind: &str, reason: &str| RealtimeEvent::Malformed {
            kind: kind.to_string(),
            reason: reason.to_string(),
        };

        match self.kind.as_str() {
            EVENT_MESSAGE => match self.message {
                Some(value) => match serde_json::from_value::<ChatMessage>(value) {
                    Ok(message) => RealtimeEvent::Message(Box::new(message)),
                    Err(e) => malformed(&self.kind, &e.to_string()),
                },
                None => malformed(&self.kind, "missing message payload"),
            },
            EVENT_USER_JOINED | EVENT_USER_LEFT => RealtimeEvent::Presence(PresenceChange {
                joined: self.kind == EVENT_USER_JOINED,
                room_id: self.room_id,
                action: self.action,
                users: self.users.unwrap_or_default(),
                user: self.user,
            }),
            EVENT_USER_MUTED => match self.user_id {
                Some(user_id) => RealtimeEvent::UserMuted {
                    user_id,
                    muted_until: self.muted_until,
                    reason: self.reason,
                },
                None => malformed(&self.kind, "missing user_id"),
            },
            EVENT_USER_UNMUTED => match self.user_id {
                Some(user_id) => RealtimeEvent::UserUnmuted { user_id },
                None => malformed(&self.kind, "missing user_id"),
            },
            EVENT_ROOM_USER_JOINED | EVENT_ROOM_USER_LEFT => {
                match (self.room_id, self.online_count) {
                    (Some(room_id), Some(online_count)) => RealtimeEvent::RoomOnlineCount {
                        room_id,
                        online_count,
                    },
                    _ => malformed(&self.kind, "missing room_id or online_count"),
                }
            }
            EVENT_ROOM_CREATED => match self.room {
                Some(room) => RealtimeEvent::RoomCreated(Box::new(room)),
                None => malformed(&self.kind, "missing room payload"),
            },
            _ => RealtimeEvent::Unknown(self.kind),
        }
    }
}

/// Parse a broker timestamp: RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whether a REST error message reports that the sender is muted.
pub fn is_mute_message(message: &str) -> bool {
    message.to_lowercase().contains("mute")
}

/// Extract the `until <timestamp>` part of a mute rejection message.
pub fn mute_until_from_message(message: &str) -> Option<DateTime<Utc>> {
    let lower = message.to_ascii_lowercase();
    let start = lower.find("until")? + "until".len();
    let tail: String = message[start..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, ':' | '-'))
        .collect();
    parse_timestamp(tail.trim())
}
