//! chatsync - client-side chat synchronization engine
//!
//! Keeps a local, persistent view of chat rooms, message history, presence,
//! unread counts and mute status consistent with a REST API and a realtime
//! WebSocket channel. Runs natively (tokio) and in the browser (wasm32).

pub mod logging;

pub mod api_client;
pub mod client;
pub mod config;
pub mod notifier;
pub mod offline_queue;
pub mod persist;
pub mod scheduler;
pub mod storage;
pub mod stores;
pub mod ws;

pub use api_client::{ChatApi, HttpChatApi};
pub use client::{
    ChatClient, ChatServices, ChatSnapshot, ClientEvent, CurrentUser, LastAction, SendOutcome,
};
pub use config::{ChatConfig, OfflineQueueConfig};
pub use notifier::{NotificationPermission, Notifier, NullNotifier, SystemNotification};
pub use offline_queue::{
    DroppedMessage, FlushReport, OfflineQueue, OutboundMessage, QueueFailure, QueuedMessage,
};
pub use scheduler::{ManualScheduler, Scheduler, Throttle, TimerId};
pub use storage::{KeyValueStore, MemoryStorage, PlatformStorage};
pub use ws::{ConnectionMonitor, ConnectionState, ReconnectConfig, Transport, TransportEvent};

#[cfg(not(target_arch = "wasm32"))]
pub use scheduler::TokioScheduler;
#[cfg(target_arch = "wasm32")]
pub use scheduler::TimeoutScheduler;

pub use chatsync_shared as shared;
