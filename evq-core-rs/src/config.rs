//! Queue configuration

use std::time::{Duration, Instant};

/// Longest delay any queue timer is armed with
pub const MAX_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// `now + delay`, with `delay` capped at [`MAX_DELAY`]
pub(crate) fn instant_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now)
}

/// Message queue configuration, fixed for the life of a queue instance
#[derive(Debug, Clone)]
pub struct MessageQueueConfig {
    /// Max attempts before a transaction-related message is dropped
    pub transaction_message_attempts: u32,
    /// Delay before re-attempting after a failed send, CALLERROR or timeout
    pub transaction_message_retry_interval: Duration,
    /// Combined ledger size above which messages are evicted
    pub queues_total_size_threshold: usize,
    /// Persist and retry non-transactional messages like transactional ones
    pub queue_all_messages: bool,
    /// Time to wait for a CALLRESULT/CALLERROR after a successful send
    pub message_timeout: Duration,
    /// Delay before a failed BootNotification is sent again
    pub boot_notification_retry_interval: Duration,
}

impl Default for MessageQueueConfig {
    fn default() -> Self {
        Self {
            transaction_message_attempts: 3,
            transaction_message_retry_interval: Duration::from_secs(10),
            queues_total_size_threshold: 2000,
            queue_all_messages: false,
            message_timeout: Duration::from_secs(30),
            boot_notification_retry_interval: Duration::from_secs(60),
        }
    }
}

impl MessageQueueConfig {
    /// Copy with every duration capped at [`MAX_DELAY`]
    pub fn clamped(mut self) -> Self {
        self.transaction_message_retry_interval = self.transaction_message_retry_interval.min(MAX_DELAY);
        self.message_timeout = self.message_timeout.min(MAX_DELAY);
        self.boot_notification_retry_interval = self.boot_notification_retry_interval.min(MAX_DELAY);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.transaction_message_attempts = attempts;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.transaction_message_retry_interval = interval;
        self
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.queues_total_size_threshold = threshold;
        self
    }

    pub fn with_queue_all_messages(mut self, queue_all: bool) -> Self {
        self.queue_all_messages = queue_all;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn with_boot_retry_interval(mut self, interval: Duration) -> Self {
        self.boot_notification_retry_interval = interval;
        self
    }
}
