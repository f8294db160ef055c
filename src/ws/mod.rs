//! Realtime channel: transport abstraction and the connection state machine.
//!
//! ```text
//!   Transport (socket)  ──TransportEvent──▶  ChatClient::dispatch
//!                                                  │
//!                                                  ▼
//!                                        ConnectionMonitor
//!                                   (state, backoff, subscribers)
//!                                                  │
//!                       ┌──────────────────────────┼──────────────────┐
//!                       ▼                          ▼                  ▼
//!                 RoomDirectory             PresenceTracker      OfflineQueue
//!                 (resync)                  (clear / reload)     (flush)
//! ```
//!
//! The socket is receive-only. Outbound messages go over REST.

mod connection;

use chatsync_shared::{ChatError, RealtimeEnvelope};

pub use connection::{
    ConnectionEvent, ConnectionInfo, ConnectionMonitor, ConnectionState, ReconnectConfig,
    SubscriptionId, Transition, WsTransport,
};

/// Lifecycle and payload events produced by a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
    Failed(ChatError),
    Frame(RealtimeEnvelope),
}

/// A realtime session the monitor can open and close.
///
/// Implementations report back asynchronously through [`TransportEvent`]s.
/// After `close()` no further events from the closed session may be delivered.
pub trait Transport {
    fn open(&mut self);
    fn close(&mut self);
}
