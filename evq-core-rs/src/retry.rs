//! Attempt budgets, reply timers and the retry/drop decision.
//!
//! Every failed attempt ends up in [`RetryScheduler::decide`], whether the
//! sink rejected the frame, the reply timed out or the Central System
//! answered with a CALLERROR.

use crate::codec::ErrorCode;
use crate::config::{instant_after, MessageQueueConfig};
use crate::types::{Category, MessageKind, QueuedMessage};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a single transmission attempt failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    #[error("transport sink rejected the frame")]
    SendRejected,

    #[error("no reply within the message timeout")]
    ReplyTimeout,

    #[error("CALLERROR {code:?}: {description}")]
    RemoteError { code: ErrorCode, description: String },
}

/// Why a message left the queue without being acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("attempts exhausted")]
    AttemptsExhausted,

    #[error("not queued while offline")]
    NotQueued,

    #[error("evicted under backpressure")]
    Evicted,
}

/// Outcome of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Back to the ledger head, not attempted before `at`
    Retry { at: Instant },
    Drop(DropReason),
}

/// Where an in-flight message is in its attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Handed to the sink, result not yet known
    Sending,
    AwaitingReply { deadline: Instant },
}

/// The single message a ledger currently has on the wire
#[derive(Debug)]
pub(crate) struct InFlight<K> {
    pub message: QueuedMessage<K>,
    pub wire_id: String,
    pub phase: Phase,
}

impl<K> InFlight<K> {
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Sending => None,
            Phase::AwaitingReply { deadline } => Some(deadline),
        }
    }
}

/// Retry policy derived from the queue configuration
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    attempts: u32,
    retry_interval: Duration,
    boot_retry_interval: Duration,
    message_timeout: Duration,
    queue_all_messages: bool,
}

impl RetryScheduler {
    pub fn new(config: &MessageQueueConfig) -> Self {
        let config = config.clone().clamped();
        Self {
            attempts: config.transaction_message_attempts,
            retry_interval: config.transaction_message_retry_interval,
            boot_retry_interval: config.boot_notification_retry_interval,
            message_timeout: config.message_timeout,
            queue_all_messages: config.queue_all_messages,
        }
    }

    /// Whether messages of `category` are persisted and retried
    pub fn is_durable(&self, category: Category) -> bool {
        category.is_transaction_related() || self.queue_all_messages
    }

    /// Prepare `msg` for its next attempt and return the wire id to send under.
    ///
    /// The first attempt reuses the message identity; retries mint a fresh id
    /// so replies to superseded attempts can never match.
    pub fn begin_attempt<K: MessageKind>(&self, msg: &mut QueuedMessage<K>) -> String {
        let wire_id = if msg.attempts_made == 0 {
            msg.identity.clone()
        } else {
            uuid::Uuid::new_v4().to_string()
        };
        msg.attempts_made += 1;
        msg.not_before = None;
        msg.current_wire_id = Some(wire_id.clone());
        wire_id
    }

    pub fn reply_deadline(&self, sent_at: Instant) -> Instant {
        instant_after(sent_at, self.message_timeout)
    }

    /// Retry or drop after a failed attempt
    pub fn decide<K: MessageKind>(
        &self,
        msg: &QueuedMessage<K>,
        _reason: &FailureReason,
        now: Instant,
    ) -> Verdict {
        if msg.is_boot_notification() {
            return Verdict::Retry {
                at: instant_after(now, self.boot_retry_interval),
            };
        }

        if !self.is_durable(msg.category) {
            return Verdict::Drop(DropReason::AttemptsExhausted);
        }

        if msg.attempts_made < self.attempts {
            Verdict::Retry {
                at: instant_after(now, self.retry_interval),
            }
        } else {
            Verdict::Drop(DropReason::AttemptsExhausted)
        }
    }
}
