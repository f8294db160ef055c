//! Connection state machine with bounded auto-reconnect.
//!
//! This module provides the shared types and conditionally includes
//! the platform-specific socket implementation.

use std::time::Duration;

use chatsync_shared::ChatError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Transport;
use crate::scheduler::{Scheduler, TimerId};

/// Connection state for the realtime channel
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        (delay as u32).min(self.max_delay_ms)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

/// Notification delivered to connection subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Error(ChatError),
}

/// A state change performed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl Transition {
    pub fn entered(&self, state: ConnectionState) -> bool {
        self.to == state && self.from != state
    }

    pub fn left(&self, state: ConnectionState) -> bool {
        self.from == state && self.to != state
    }
}

/// Read-only view of the monitor for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<ChatError>,
    pub is_retrying: bool,
}

pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&ConnectionEvent)>;

/// Owns the realtime session lifecycle.
///
/// The monitor never blocks or sleeps: reconnects are armed on the
/// [`Scheduler`] and resumed by [`ConnectionMonitor::handle_timer`]. Every
/// method that can change state returns the [`Transition`] it performed so the
/// caller can run the cross-store side effects.
pub struct ConnectionMonitor {
    config: ReconnectConfig,
    state: ConnectionState,
    attempts: u32,
    last_connected_at: Option<DateTime<Utc>>,
    last_error: Option<ChatError>,
    pending_timer: Option<TimerId>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
}

impl ConnectionMonitor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            attempts: 0,
            last_connected_at: None,
            last_error: None,
            pending_timer: None,
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            state: self.state,
            reconnect_attempts: self.attempts,
            max_reconnect_attempts: self.config.max_attempts,
            last_connected_at: self.last_connected_at,
            last_error: self.last_error.clone(),
            is_retrying: self.pending_timer.is_some() || self.state == ConnectionState::Reconnecting,
        }
    }

    pub fn subscribe(&mut self, subscriber: impl FnMut(&ConnectionEvent) + 'static) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub, _)| *sub != id);
    }

    /// Start a session. No-op unless disconnected or in error.
    pub fn connect(&mut self, transport: &mut dyn Transport) -> Option<Transition> {
        if !matches!(self.state, ConnectionState::Disconnected | ConnectionState::Error) {
            return None;
        }
        self.attempts = 0;
        self.last_error = None;
        transport.open();
        self.set_state(ConnectionState::Connecting)
    }

    /// Manual disconnect. Cancels any pending reconnect.
    pub fn disconnect(
        &mut self,
        transport: &mut dyn Transport,
        scheduler: &dyn Scheduler,
    ) -> Option<Transition> {
        self.cancel_timer(scheduler);
        self.attempts = 0;
        transport.close();
        self.set_state(ConnectionState::Disconnected)
    }

    /// Manual reconnect from any state: resets the attempt counter and reopens.
    pub fn reconnect(
        &mut self,
        transport: &mut dyn Transport,
        scheduler: &dyn Scheduler,
    ) -> Option<Transition> {
        self.cancel_timer(scheduler);
        self.attempts = 0;
        self.last_error = None;
        transport.close();
        transport.open();
        crate::log_info!("Manual reconnect requested");
        self.set_state(ConnectionState::Connecting)
    }

    pub fn handle_opened(&mut self, now: DateTime<Utc>, scheduler: &dyn Scheduler) -> Option<Transition> {
        if !self.state.is_connecting() {
            crate::log_debug!("Ignoring open event in state {:?}", self.state);
            return None;
        }
        self.cancel_timer(scheduler);
        self.attempts = 0;
        self.last_connected_at = Some(now);
        self.last_error = None;
        self.set_state(ConnectionState::Connected)
    }

    /// The session ended. Close codes in the 4000 range are classified; the
    /// rest count as an unexpected drop.
    pub fn handle_closed(
        &mut self,
        code: Option<u16>,
        reason: Option<&str>,
        scheduler: &dyn Scheduler,
    ) -> Option<Transition> {
        if !self.state.is_live() {
            return None;
        }
        match code {
            Some(code @ 4000..=4999) => {
                self.handle_failure(ChatError::from_close_code(code, reason), scheduler)
            }
            _ => {
                crate::log_info!(
                    "Realtime connection closed (code {:?}, reason {:?})",
                    code,
                    reason
                );
                self.schedule_reconnect(scheduler)
            }
        }
    }

    pub fn handle_failure(&mut self, err: ChatError, scheduler: &dyn Scheduler) -> Option<Transition> {
        if !self.state.is_live() {
            return None;
        }
        crate::logging::log_chat_error("Realtime connection", &err);
        let retryable = err.retryable;
        self.last_error = Some(err.clone());
        if !retryable {
            self.cancel_timer(scheduler);
            return self.enter_error(err);
        }
        self.schedule_reconnect(scheduler)
    }

    /// Resume a pending reconnect. Returns `false` for timers the monitor
    /// does not own.
    pub fn handle_timer(&mut self, id: TimerId, transport: &mut dyn Transport) -> bool {
        if self.pending_timer != Some(id) {
            return false;
        }
        self.pending_timer = None;
        if self.state == ConnectionState::Reconnecting {
            crate::log_info!(
                "Reconnect attempt {}/{}",
                self.attempts,
                self.config.max_attempts
            );
            transport.close();
            transport.open();
        }
        true
    }

    fn schedule_reconnect(&mut self, scheduler: &dyn Scheduler) -> Option<Transition> {
        if self.pending_timer.is_some() {
            return self.set_state(ConnectionState::Reconnecting);
        }
        if self.config.exhausted(self.attempts) {
            let err = ChatError::network(format!(
                "Max reconnect attempts ({}) exceeded",
                self.config.max_attempts
            ));
            self.last_error = Some(err.clone());
            return self.enter_error(err);
        }

        let delay = self.config.delay_for_attempt(self.attempts);
        self.attempts += 1;
        self.pending_timer = Some(scheduler.schedule(Duration::from_millis(u64::from(delay))));
        crate::log_info!(
            "Reconnecting in {}ms (attempt {})",
            delay,
            self.attempts
        );
        self.set_state(ConnectionState::Reconnecting)
    }

    fn enter_error(&mut self, err: ChatError) -> Option<Transition> {
        let transition = self.set_state(ConnectionState::Error);
        if transition.is_some() {
            self.notify(&ConnectionEvent::Error(err));
        }
        transition
    }

    fn cancel_timer(&mut self, scheduler: &dyn Scheduler) {
        if let Some(id) = self.pending_timer.take() {
            scheduler.cancel(id);
        }
    }

    fn set_state(&mut self, to: ConnectionState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        crate::log_info!("Connection state {:?} -> {:?}", from, to);

        if to == ConnectionState::Connected {
            self.notify(&ConnectionEvent::Connected);
        } else if from == ConnectionState::Connected || to == ConnectionState::Disconnected {
            self.notify(&ConnectionEvent::Disconnected);
        }
        Some(Transition { from, to })
    }

    fn notify(&mut self, event: &ConnectionEvent) {
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(event);
        }
    }
}

// Include platform-specific implementation
#[cfg(target_arch = "wasm32")]
mod connection_wasm;
#[cfg(target_arch = "wasm32")]
pub use connection_wasm::WsTransport;

#[cfg(not(target_arch = "wasm32"))]
mod connection_native;
#[cfg(not(target_arch = "wasm32"))]
pub use connection_native::WsTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use chatsync_shared::ErrorKind;
    use rstest::rstest;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct CountingTransport {
        opens: u32,
        closes: u32,
    }

    impl Transport for CountingTransport {
        fn open(&mut self) {
            self.opens += 1;
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    fn connected(monitor: &mut ConnectionMonitor, transport: &mut CountingTransport, scheduler: &ManualScheduler) {
        monitor.connect(transport);
        monitor.handle_opened(scheduler.now(), scheduler);
        assert_eq!(monitor.state(), ConnectionState::Connected);
    }

    #[rstest]
    #[case(0, 1000)]
    #[case(1, 2000)]
    #[case(2, 4000)]
    #[case(4, 16000)]
    #[case(5, 30000)]
    #[case(12, 30000)]
    fn backoff_doubles_up_to_cap(#[case] attempt: u32, #[case] expected: u32) {
        assert_eq!(ReconnectConfig::default().delay_for_attempt(attempt), expected);
    }

    #[test]
    fn connect_then_open_reaches_connected() {
        let scheduler = ManualScheduler::default();
        let mut transport = CountingTransport::default();
        let mut monitor = ConnectionMonitor::new(ReconnectConfig::default());

        let t = monitor.connect(&mut transport).unwrap();
        assert_eq!((t.from, t.to), (ConnectionState::Disconnected, ConnectionState::Connecting));
        assert!(monitor.connect(&mut transport).is_none());

        let t = monitor.handle_opened(scheduler.now(), &scheduler).unwrap();
        assert!(t.entered(ConnectionState::Connected));
        assert_eq!(transport.opens, 1);
        assert!(monitor.info().last_connected_at.is_some());
    }

    #[test]
    fn drops_retry_with_backoff_until_exhausted() {
        let scheduler = ManualScheduler::default();
        let mut transport = CountingTransport::default();
        let mut monitor = ConnectionMonitor::new(ReconnectConfig::default());
        connected(&mut monitor, &mut transport, &scheduler);

        let t = monitor.handle_closed(None, None, &scheduler).unwrap();
        assert!(t.left(ConnectionState::Connected));
        assert_eq!(monitor.state(), ConnectionState::Reconnecting);

        for attempt in 1..=5u32 {
            assert_eq!(monitor.reconnect_attempts(), attempt);
            assert_eq!(scheduler.pending(), 1);
            let fired = scheduler.advance(Duration::from_secs(30));
            assert_eq!(fired.len(), 1);
            assert!(monitor.handle_timer(fired[0], &mut transport));
            monitor.handle_closed(None, None, &scheduler);
        }

        assert_eq!(monitor.state(), ConnectionState::Error);
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(transport.opens, 6);
        assert!(!monitor.info().is_retrying);
    }

    #[test]
    fn only_one_reconnect_timer_is_pending() {
        let scheduler = ManualScheduler::default();
        let mut transport = CountingTransport::default();
        let mut monitor = ConnectionMonitor::new(ReconnectConfig::default());
        connected(&mut monitor, &mut transport, &scheduler);

        monitor.handle_closed(None, None, &scheduler);
        monitor.handle_failure(ChatError::network("reset"), &scheduler);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(monitor.reconnect_attempts(), 1);
    }

    #[test]
    fn manual_reconnect_cancels_timer_and_resets_attempts() {
        let scheduler = ManualScheduler::default();
        let mut transport = CountingTransport::default();
        let mut monitor = ConnectionMonitor::new(ReconnectConfig::default());
        connected(&mut monitor, &mut transport, &scheduler);
        monitor.handle_closed(None, None, &scheduler);

        let t = monitor.reconnect(&mut transport, &scheduler).unwrap();
        assert_eq!(t.to, ConnectionState::Connecting);
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(monitor.reconnect_attempts(), 0);
        assert!(monitor.last_error().is_none());
    }

    #[test]
    fn connect_from_error_clears_stale_error() {
        let scheduler = ManualScheduler::default();
        let mut transport = CountingTransport::default();
        let mut monitor = ConnectionMonitor::new(ReconnectConfig::default());
        connected(&mut monitor, &mut transport, &scheduler);
        monitor.handle_closed(Some(4000), Some("bad token"), &scheduler);
        assert!(monitor.last_error().is_some());

        let t = monitor.connect(&mut transport).unwrap();
        assert_eq!((t.from, t.to), (ConnectionState::Error, ConnectionState::Connecting));
        assert!(monitor.last_error().is_none());
        assert!(monitor.info().last_error.is_none());
    }

    #[test]
    fn non_retryable_close_code_enters_error() {
        let scheduler = ManualScheduler::default();
        let mut transport = CountingTransport::default();
        let mut monitor = ConnectionMonitor::new(ReconnectConfig::default());
        connected(&mut monitor, &mut transport, &scheduler);

        monitor.handle_closed(Some(4000), Some("bad token"), &scheduler);
        assert_eq!(monitor.state(), ConnectionState::Error);
        assert_eq!(monitor.last_error().map(|e| e.kind), Some(ErrorKind::Authentication));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn closes_after_manual_disconnect_are_ignored() {
        let scheduler = ManualScheduler::default();
        let mut transport = CountingTransport::default();
        let mut monitor = ConnectionMonitor::new(ReconnectConfig::default());
        connected(&mut monitor, &mut transport, &scheduler);

        monitor.disconnect(&mut transport, &scheduler);
        assert!(monitor.handle_closed(None, None, &scheduler).is_none());
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn subscribers_see_lifecycle_events() {
        let scheduler = ManualScheduler::default();
        let mut transport = CountingTransport::default();
        let mut monitor = ConnectionMonitor::new(ReconnectConfig {
            max_attempts: 1,
            ..ReconnectConfig::default()
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        monitor.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        connected(&mut monitor, &mut transport, &scheduler);
        monitor.handle_closed(None, None, &scheduler);
        let fired = scheduler.advance(Duration::from_secs(1));
        monitor.handle_timer(fired[0], &mut transport);
        monitor.handle_failure(ChatError::network("refused"), &scheduler);

        let seen = seen.borrow();
        assert_eq!(seen[0], ConnectionEvent::Connected);
        assert_eq!(seen[1], ConnectionEvent::Disconnected);
        assert!(matches!(seen[2], ConnectionEvent::Error(_)));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn stale_timer_ids_are_not_consumed() {
        let mut transport = CountingTransport::default();
        let mut monitor = ConnectionMonitor::new(ReconnectConfig::default());
        assert!(!monitor.handle_timer(42, &mut transport));
        assert_eq!(transport.opens, 0);
    }
}
