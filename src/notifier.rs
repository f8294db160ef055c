//! System notification sink.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Permission state for system notifications, as reported by the host.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPermission {
    #[default]
    Default,
    Granted,
    Denied,
}

/// A notification ready to be shown by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemNotification {
    pub title: String,
    pub body: String,
    /// Replacement tag: `mention-{message}` or `room-{room}`.
    pub tag: String,
}

/// Host integration for notifications and the notification sound.
#[async_trait(?Send)]
pub trait Notifier {
    fn permission(&self) -> NotificationPermission;

    async fn request_permission(&self) -> NotificationPermission;

    fn show(&self, notification: &SystemNotification);

    fn play_sound(&self) {}
}

/// Notifier for hosts without a notification system.
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait(?Send)]
impl Notifier for NullNotifier {
    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Denied
    }

    async fn request_permission(&self) -> NotificationPermission {
        NotificationPermission::Denied
    }

    fn show(&self, notification: &SystemNotification) {
        crate::log_debug!("Dropping notification '{}'", notification.tag);
    }
}
