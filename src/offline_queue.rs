//! FIFO buffer of outbound messages awaiting delivery.

use std::collections::VecDeque;

use chatsync_shared::{ChatError, ChatMessage, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api_client::ChatApi;
use crate::config::OfflineQueueConfig;

/// A message the user asked to send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub room_id: RoomId,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub message: OutboundMessage,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

/// The entry that stopped a flush and why.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueFailure {
    pub entry: Uuid,
    pub error: ChatError,
}

/// An entry removed without delivery, with the error that gave it up.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedMessage {
    pub entry: QueuedMessage,
    pub error: ChatError,
}

/// Outcome of a [`OfflineQueue::flush`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Server copies of the delivered messages, in send order.
    pub sent: Vec<ChatMessage>,
    /// Entries given up on: non-retryable errors or `max_retries` reached.
    pub dropped: Vec<DroppedMessage>,
    pub failure: Option<QueueFailure>,
}

/// Outbound buffer. Entries leave on delivery, when given up by a flush, or on `clear()`.
#[derive(Debug, Clone)]
pub struct OfflineQueue {
    config: OfflineQueueConfig,
    entries: VecDeque<QueuedMessage>,
}

impl OfflineQueue {
    pub fn new(config: OfflineQueueConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.entries.iter()
    }

    /// Append to the tail. A full queue drops its oldest entry first.
    pub fn enqueue(&mut self, message: OutboundMessage, now: DateTime<Utc>) -> Uuid {
        self.push(message, now, 0)
    }

    /// Append a message whose direct send already failed once.
    pub fn enqueue_failed(&mut self, message: OutboundMessage, now: DateTime<Utc>) -> Uuid {
        self.push(message, now, 1)
    }

    fn push(&mut self, message: OutboundMessage, now: DateTime<Utc>, attempts: u32) -> Uuid {
        while !self.entries.is_empty() && self.entries.len() >= self.config.max_size {
            if let Some(dropped) = self.entries.pop_front() {
                crate::log_warn!(
                    "Offline queue is full ({}), dropping oldest message {}",
                    self.config.max_size,
                    dropped.id
                );
            }
        }

        let id = Uuid::new_v4();
        self.entries.push_back(QueuedMessage {
            id,
            message,
            enqueued_at: now,
            attempts,
        });
        crate::log_debug!("Queued message {} ({} pending)", id, self.entries.len());
        id
    }

    /// Send entries in order.
    ///
    /// A retryable failure under `max_retries`, or a mute rejection, stops the
    /// flush and keeps the entry at the head so nothing behind it goes first.
    /// Any other failure drops the head into the report and the flush goes on.
    pub async fn flush(&mut self, api: &dyn ChatApi) -> FlushReport {
        let mut report = FlushReport::default();

        while let Some(head) = self.entries.front() {
            let message = head.message.clone();
            let error = match api.send_message(message.room_id, &message.body).await {
                Ok(sent) => {
                    self.entries.pop_front();
                    report.sent.push(sent);
                    continue;
                }
                Err(error) => error,
            };

            let Some(head) = self.entries.front_mut() else {
                break;
            };
            head.attempts += 1;
            let keep = error.is_mute_rejection()
                || (error.retryable && head.attempts < self.config.max_retries);

            if keep {
                crate::log_warn!(
                    "Queued message {} failed (attempt {}): {}",
                    head.id,
                    head.attempts,
                    error
                );
                report.failure = Some(QueueFailure {
                    entry: head.id,
                    error,
                });
                break;
            }

            if let Some(entry) = self.entries.pop_front() {
                crate::log_warn!(
                    "Dropping queued message {} after {} attempt(s): {}",
                    entry.id,
                    entry.attempts,
                    error
                );
                report.dropped.push(DroppedMessage { entry, error });
            }
        }

        if !report.sent.is_empty() {
            crate::log_info!(
                "Flushed {} queued message(s), {} remaining",
                report.sent.len(),
                self.entries.len()
            );
        }
        report
    }

    /// Reset every entry's attempt counter and flush again.
    pub async fn retry_all(&mut self, api: &dyn ChatApi) -> FlushReport {
        for entry in self.entries.iter_mut() {
            entry.attempts = 0;
        }
        self.flush(api).await
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_persisted(&self) -> Vec<QueuedMessage> {
        self.entries.iter().cloned().collect()
    }

    /// Replace the contents with persisted entries, keeping the newest that fit.
    pub fn restore(&mut self, entries: Vec<QueuedMessage>) {
        let skip = entries.len().saturating_sub(self.config.max_size);
        self.entries = entries.into_iter().skip(skip).collect();
    }
}
