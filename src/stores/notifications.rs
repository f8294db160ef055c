//! Notification router: unread counts, mentions and system notifications.

use std::collections::HashMap;

use chatsync_shared::{ChatMessage, MessageId, RoomId, UserId};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::notifier::{NotificationPermission, SystemNotification};

/// `@name` or `@"quoted name"`.
static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@(?:"([^"]+)"|(\w+))"#).expect("MENTION_RE: invalid regex pattern")
});

/// Names mentioned in a message body, in order of appearance.
pub fn extract_mentions(body: &str) -> Vec<String> {
    MENTION_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Whether `body` mentions `name`, ignoring case.
pub fn mentions_user(body: &str, name: &str) -> bool {
    let name = name.to_lowercase();
    extract_mentions(body)
        .iter()
        .any(|mentioned| mentioned.to_lowercase() == name)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationSettings {
    pub browser_notifications: bool,
    pub sound_notifications: bool,
    pub mention_notifications: bool,
    pub room_notifications: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            browser_notifications: true,
            sound_notifications: true,
            mention_notifications: true,
            room_notifications: true,
        }
    }
}

/// Partial settings update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationSettingsPatch {
    pub browser_notifications: Option<bool>,
    pub sound_notifications: Option<bool>,
    pub mention_notifications: Option<bool>,
    pub room_notifications: Option<bool>,
}

impl NotificationSettings {
    pub fn apply(&mut self, patch: NotificationSettingsPatch) {
        if let Some(v) = patch.browser_notifications {
            self.browser_notifications = v;
        }
        if let Some(v) = patch.sound_notifications {
            self.sound_notifications = v;
        }
        if let Some(v) = patch.mention_notifications {
            self.mention_notifications = v;
        }
        if let Some(v) = patch.room_notifications {
            self.room_notifications = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomNotification {
    pub room_id: RoomId,
    pub unread_count: u32,
    pub last_message_at: DateTime<Utc>,
    pub has_mentions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mention {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub mentioned_at: DateTime<Utc>,
    pub is_read: bool,
}

/// Host action requested by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEffect {
    Show(SystemNotification),
    PlaySound,
}

/// UI state an inbound message is judged against.
#[derive(Debug, Clone, Copy)]
pub struct IncomingContext<'a> {
    pub current_user_id: Option<UserId>,
    pub current_user_name: Option<&'a str>,
    pub focused_room: Option<RoomId>,
    pub tab_visible: bool,
    pub room_name: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedNotifications {
    #[serde(default)]
    pub notifications: HashMap<RoomId, RoomNotification>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    #[serde(default)]
    pub settings: NotificationSettings,
    #[serde(default)]
    pub total_unread_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationRouter {
    settings: NotificationSettings,
    notifications: HashMap<RoomId, RoomNotification>,
    mentions: Vec<Mention>,
    total_unread: u32,
    permission: NotificationPermission,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(&self) -> NotificationSettings {
        self.settings
    }

    pub fn update_settings(&mut self, patch: NotificationSettingsPatch) {
        self.settings.apply(patch);
    }

    pub fn permission(&self) -> NotificationPermission {
        self.permission
    }

    pub fn set_permission(&mut self, permission: NotificationPermission) {
        self.permission = permission;
    }

    pub fn notification(&self, room_id: RoomId) -> Option<&RoomNotification> {
        self.notifications.get(&room_id)
    }

    pub fn mentions(&self) -> &[Mention] {
        &self.mentions
    }

    pub fn total_unread_count(&self) -> u32 {
        self.total_unread
    }

    pub fn room_unread_count(&self, room_id: RoomId) -> u32 {
        self.notifications
            .get(&room_id)
            .map_or(0, |n| n.unread_count)
    }

    /// Unread mentions in one room, or anywhere when `room_id` is `None`.
    pub fn has_unread_mentions(&self, room_id: Option<RoomId>) -> bool {
        self.mentions
            .iter()
            .any(|m| !m.is_read && room_id.map_or(true, |id| m.room_id == id))
    }

    /// Route one inbound message. Returns what the host should do.
    ///
    /// Only text messages from other users count. A message yields at most
    /// one system notification; a mention wins over the room notification.
    pub fn on_incoming(
        &mut self,
        message: &ChatMessage,
        ctx: &IncomingContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<NotificationEffect> {
        let mut effects = Vec::new();
        if !message.is_text() || ctx.current_user_id == Some(message.user_id) {
            return effects;
        }

        let room_id = message.room_id;
        let unfocused = ctx.focused_room != Some(room_id);
        let hidden = !ctx.tab_visible;
        let can_show = self.settings.browser_notifications
            && self.permission == NotificationPermission::Granted
            && hidden;

        if unfocused || hidden {
            self.increment_unread_count(room_id, now);
            if self.settings.sound_notifications {
                effects.push(NotificationEffect::PlaySound);
            }
        }

        let mentioned = ctx
            .current_user_name
            .is_some_and(|name| mentions_user(&message.body, name));
        let mut shown = false;
        if mentioned && self.settings.mention_notifications {
            self.add_mention(Mention {
                message_id: message.id,
                room_id,
                mentioned_at: message.created_at,
                is_read: false,
            });
            if can_show {
                effects.push(NotificationEffect::Show(SystemNotification {
                    title: format!("{} mentioned you", message.author.name),
                    body: message.body.clone(),
                    tag: format!("mention-{}", message.id),
                }));
                shown = true;
            }
        }

        if !shown && unfocused && self.settings.room_notifications && can_show {
            if let Some(room_name) = ctx.room_name {
                effects.push(NotificationEffect::Show(SystemNotification {
                    title: format!("New message in {}", room_name),
                    body: format!("{}: {}", message.author.name, message.body),
                    tag: format!("room-{}", room_id),
                }));
            }
        }

        effects
    }

    pub fn increment_unread_count(&mut self, room_id: RoomId, now: DateTime<Utc>) {
        let record = self
            .notifications
            .entry(room_id)
            .or_insert_with(|| RoomNotification {
                room_id,
                unread_count: 0,
                last_message_at: now,
                has_mentions: false,
            });
        record.unread_count += 1;
        record.last_message_at = now;
        self.recompute_total();
    }

    /// Record a mention. Returns `false` if the message was already recorded.
    pub fn add_mention(&mut self, mention: Mention) -> bool {
        if self.mentions.iter().any(|m| m.message_id == mention.message_id) {
            return false;
        }
        let record = self
            .notifications
            .entry(mention.room_id)
            .or_insert_with(|| RoomNotification {
                room_id: mention.room_id,
                unread_count: 0,
                last_message_at: mention.mentioned_at,
                has_mentions: false,
            });
        record.has_mentions = true;
        record.last_message_at = mention.mentioned_at;
        self.mentions.push(mention);
        true
    }

    pub fn mark_mention_as_read(&mut self, message_id: MessageId) {
        for mention in self.mentions.iter_mut().filter(|m| m.message_id == message_id) {
            mention.is_read = true;
        }
    }

    pub fn mark_room_mentions_read(&mut self, room_id: RoomId) {
        for mention in self.mentions.iter_mut().filter(|m| m.room_id == room_id) {
            mention.is_read = true;
        }
    }

    /// Zero a room: drop its record and mentions.
    pub fn clear_room_notifications(&mut self, room_id: RoomId) {
        self.notifications.remove(&room_id);
        self.mentions.retain(|m| m.room_id != room_id);
        self.recompute_total();
    }

    pub fn clear_all_notifications(&mut self) {
        self.notifications.clear();
        self.mentions.clear();
        self.total_unread = 0;
    }

    fn recompute_total(&mut self) {
        self.total_unread = self.notifications.values().map(|n| n.unread_count).sum();
    }

    pub fn to_persisted(&self) -> PersistedNotifications {
        PersistedNotifications {
            notifications: self.notifications.clone(),
            mentions: self.mentions.clone(),
            settings: self.settings,
            total_unread_count: self.total_unread,
        }
    }

    /// Rebuild from a snapshot. The stored total is ignored and recomputed.
    pub fn from_persisted(persisted: PersistedNotifications) -> Self {
        let mut router = Self {
            settings: persisted.settings,
            notifications: persisted.notifications,
            mentions: persisted.mentions,
            total_unread: 0,
            permission: NotificationPermission::Default,
        };
        router.recompute_total();
        router
    }
}
