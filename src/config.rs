//! Engine configuration from defaults and environment variables.

use std::time::Duration;

use crate::ws::ReconnectConfig;

/// Bounds for the outbound message buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineQueueConfig {
    /// Entries kept before the oldest is dropped.
    pub max_size: usize,
    /// Failed flush attempts before a retryable entry is given up.
    pub max_retries: u32,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            max_retries: 3,
        }
    }
}

/// Top-level configuration for a [`crate::ChatClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub api_base_url: String,
    pub ws_url: String,
    pub api_token: Option<String>,
    pub reconnect: ReconnectConfig,
    pub offline_queue: OfflineQueueConfig,
    /// How long a cached first page stays valid.
    pub message_cache_ttl: Duration,
    /// Minimum interval between room list fetches.
    pub rooms_throttle: Duration,
    /// Minimum interval between presence fetches for the same room.
    pub presence_throttle: Duration,
    pub storage_key: String,
    pub queue_storage_key: String,
    /// Write the persisted snapshot after every mutation.
    pub persist: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            ws_url: "ws://localhost:8080/app".to_string(),
            api_token: None,
            reconnect: ReconnectConfig::default(),
            offline_queue: OfflineQueueConfig::default(),
            message_cache_ttl: Duration::from_secs(5 * 60),
            rooms_throttle: Duration::from_secs(1),
            presence_throttle: Duration::from_secs(5),
            storage_key: "chat-storage".to_string(),
            queue_storage_key: "chat-offline-queue".to_string(),
            persist: true,
        }
    }
}

impl ChatConfig {
    /// Build configuration from the process environment.
    ///
    /// Environment variables:
    /// - `CHATSYNC_API_URL`: REST base URL
    /// - `CHATSYNC_WS_URL`: realtime endpoint
    /// - `CHATSYNC_API_TOKEN`: bearer token for REST calls
    /// - `CHATSYNC_MAX_RECONNECT_ATTEMPTS`: reconnect bound (default: 5)
    /// - `CHATSYNC_QUEUE_MAX_SIZE`: offline queue bound (default: 100)
    /// - `CHATSYNC_QUEUE_MAX_RETRIES`: flush attempts per queued message (default: 3)
    /// - `CHATSYNC_PERSIST`: "false" disables auto-persist
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ChatConfig::from_env`] with a caller-supplied variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CHATSYNC_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = lookup("CHATSYNC_WS_URL") {
            config.ws_url = url;
        }
        config.api_token = lookup("CHATSYNC_API_TOKEN").filter(|t| !t.is_empty());

        if let Some(attempts) = lookup("CHATSYNC_MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(size) = lookup("CHATSYNC_QUEUE_MAX_SIZE").and_then(|v| v.parse().ok()) {
            config.offline_queue.max_size = size;
        }
        if let Some(retries) = lookup("CHATSYNC_QUEUE_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            config.offline_queue.max_retries = retries;
        }
        if let Some(persist) = lookup("CHATSYNC_PERSIST") {
            config.persist = !matches!(persist.to_lowercase().as_str(), "false" | "0" | "off");
        }

        config
    }
}
