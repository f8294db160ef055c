//! Stores owned by the chat client. Each owns a disjoint slice of state and is
//! mutated only through its own methods.

pub mod messages;
pub mod mute;
pub mod notifications;
pub mod presence;
pub mod rooms;

pub use messages::{MessageCache, MessageStore, PaginationCursor, PersistedMessages};
pub use mute::{MuteGate, MuteState};
pub use notifications::{
    extract_mentions, mentions_user, IncomingContext, Mention, NotificationEffect,
    NotificationRouter, NotificationSettings, NotificationSettingsPatch, PersistedNotifications,
    RoomNotification,
};
pub use presence::PresenceTracker;
pub use rooms::{PersistedRooms, RoomDirectory};
