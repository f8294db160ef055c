//! Clock and cancelable delayed tasks.
//!
//! Reconnect backoff is the only timer-driven behaviour of the engine. Timers
//! don't run callbacks; a fired timer is reported back to the client as
//! [`ClientEvent::Timer`](crate::client::ClientEvent::Timer) so it is handled
//! in order with every other event.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub type TimerId = u64;

pub trait Scheduler {
    fn now(&self) -> DateTime<Utc>;

    /// Arm a one-shot timer.
    fn schedule(&self, delay: Duration) -> TimerId;

    /// Disarm a timer. Unknown or already-fired ids are ignored.
    fn cancel(&self, id: TimerId);
}

fn later(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// =========================================
// Virtual time
// =========================================

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    next_id: TimerId,
    pending: Vec<(DateTime<Utc>, TimerId)>,
}

/// Scheduler driven by hand. Time only moves through [`ManualScheduler::advance`]
/// and [`ManualScheduler::set_now`].
#[derive(Debug)]
pub struct ManualScheduler {
    state: RefCell<ManualState>,
}

impl ManualScheduler {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: RefCell::new(ManualState {
                now: start,
                next_id: 1,
                pending: Vec::new(),
            }),
        }
    }

    /// Move the clock forward and return the timers that came due, earliest first.
    pub fn advance(&self, by: Duration) -> Vec<TimerId> {
        let mut state = self.state.borrow_mut();
        state.now = later(state.now, by);
        let now = state.now;

        let mut due: Vec<(DateTime<Utc>, TimerId)> = Vec::new();
        state.pending.retain(|&(at, id)| {
            if at <= now {
                due.push((at, id));
                false
            } else {
                true
            }
        });
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state.borrow_mut().now = now;
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Delay until the given timer fires, if it is still armed.
    pub fn remaining(&self, id: TimerId) -> Option<Duration> {
        let state = self.state.borrow();
        state
            .pending
            .iter()
            .find(|(_, pending)| *pending == id)
            .and_then(|(at, _)| (*at - state.now).to_std().ok())
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.state.borrow().now
    }

    fn schedule(&self, delay: Duration) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        let at = later(state.now, delay);
        state.pending.push((at, id));
        id
    }

    fn cancel(&self, id: TimerId) {
        self.state.borrow_mut().pending.retain(|&(_, pending)| pending != id);
    }
}

// =========================================
// Native (tokio) implementation
// =========================================

#[cfg(not(target_arch = "wasm32"))]
pub use native::TokioScheduler;

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::*;
    use crate::client::ClientEvent;
    use futures_channel::mpsc::UnboundedSender;
    use tokio::task::JoinHandle;

    /// Real-time scheduler backed by `tokio::time::sleep`.
    ///
    /// Must be used from inside a tokio runtime.
    pub struct TokioScheduler {
        events: UnboundedSender<ClientEvent>,
        next_id: RefCell<TimerId>,
        tasks: RefCell<HashMap<TimerId, JoinHandle<()>>>,
    }

    impl TokioScheduler {
        pub fn new(events: UnboundedSender<ClientEvent>) -> Self {
            Self {
                events,
                next_id: RefCell::new(1),
                tasks: RefCell::new(HashMap::new()),
            }
        }
    }

    impl Scheduler for TokioScheduler {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }

        fn schedule(&self, delay: Duration) -> TimerId {
            let id = {
                let mut next = self.next_id.borrow_mut();
                let id = *next;
                *next += 1;
                id
            };

            let events = self.events.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.unbounded_send(ClientEvent::Timer(id));
            });

            let mut tasks = self.tasks.borrow_mut();
            tasks.retain(|_, task| !task.is_finished());
            tasks.insert(id, handle);
            id
        }

        fn cancel(&self, id: TimerId) {
            if let Some(task) = self.tasks.borrow_mut().remove(&id) {
                task.abort();
            }
        }
    }
}

// =========================================
// Web (WASM) implementation
// =========================================

#[cfg(target_arch = "wasm32")]
pub use wasm::TimeoutScheduler;

#[cfg(target_arch = "wasm32")]
mod wasm {
    use super::*;
    use crate::client::ClientEvent;
    use futures_channel::mpsc::UnboundedSender;
    use gloo_timers::callback::Timeout;

    /// Browser scheduler backed by `setTimeout`.
    pub struct TimeoutScheduler {
        events: UnboundedSender<ClientEvent>,
        next_id: RefCell<TimerId>,
        timeouts: RefCell<HashMap<TimerId, Timeout>>,
    }

    impl TimeoutScheduler {
        pub fn new(events: UnboundedSender<ClientEvent>) -> Self {
            Self {
                events,
                next_id: RefCell::new(1),
                timeouts: RefCell::new(HashMap::new()),
            }
        }
    }

    impl Scheduler for TimeoutScheduler {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }

        fn schedule(&self, delay: Duration) -> TimerId {
            let id = {
                let mut next = self.next_id.borrow_mut();
                let id = *next;
                *next += 1;
                id
            };

            let events = self.events.clone();
            let millis = delay.as_millis().min(u32::MAX as u128) as u32;
            let timeout = Timeout::new(millis, move || {
                let _ = events.unbounded_send(ClientEvent::Timer(id));
            });
            self.timeouts.borrow_mut().insert(id, timeout);
            id
        }

        fn cancel(&self, id: TimerId) {
            if let Some(timeout) = self.timeouts.borrow_mut().remove(&id) {
                timeout.cancel();
            }
        }
    }
}

// =========================================
// Throttle
// =========================================

/// Per-key minimum interval between calls. A zero window never throttles.
#[derive(Debug, Clone)]
pub struct Throttle<K> {
    window: Duration,
    last: HashMap<K, DateTime<Utc>>,
}

impl<K: Eq + Hash> Throttle<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// Record a call at `now` if the window since the previous one has passed.
    pub fn try_acquire(&mut self, key: K, now: DateTime<Utc>) -> bool {
        if self.window.is_zero() {
            return true;
        }
        if let Some(previous) = self.last.get(&key) {
            let elapsed = (now - *previous).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.window {
                return false;
            }
        }
        self.last.insert(key, now);
        true
    }

    /// Record a call that bypassed the throttle.
    pub fn touch(&mut self, key: K, now: DateTime<Utc>) {
        self.last.insert(key, now);
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }
}
