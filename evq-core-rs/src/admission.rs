//! Backpressure: keeps the combined ledger size under the configured threshold.
//!
//! Victims are chosen in two stages:
//! - Oldest NonTransactional messages, `max(threshold / 10, 1)` per round
//! - Every other TransactionUpdate between non-update messages, one walk of
//!   the Transaction ledger per round
//!
//! Transactional messages are never victims; when only they remain the bound
//! is allowed to stay exceeded.

use crate::types::{MessageKind, QueuedMessage};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Size bound enforcement over both ledgers
#[derive(Debug, Clone, Copy)]
pub struct AdmissionController {
    threshold: usize,
}

impl AdmissionController {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Normal-ledger messages removed per eviction round
    pub fn normal_batch(&self) -> usize {
        (self.threshold / 10).max(1)
    }

    pub fn exceeds(&self, total: usize) -> bool {
        total > self.threshold
    }

    /// Evict until the bound holds or nothing evictable is left.
    ///
    /// Returns the evicted messages in eviction order so the caller can
    /// drop them from persistence.
    pub fn enforce<K: MessageKind>(
        &self,
        transaction: &mut VecDeque<QueuedMessage<K>>,
        normal: &mut VecDeque<QueuedMessage<K>>,
    ) -> Vec<QueuedMessage<K>> {
        let mut evicted = Vec::new();
        if !self.exceeds(transaction.len() + normal.len()) {
            return evicted;
        }

        warn!(
            "AdmissionController: Queue sizes exceed threshold ({}) with {} transaction and {} normal messages",
            self.threshold,
            transaction.len(),
            normal.len()
        );

        while self.exceeds(transaction.len() + normal.len()) {
            let dropped = self.evict_normal(normal, &mut evicted);
            if dropped == 0 {
                break;
            }
            warn!("AdmissionController: Dropped {} messages from normal queue", dropped);
        }

        while self.exceeds(transaction.len() + normal.len()) {
            let dropped = thin_updates(transaction, &mut evicted);
            if dropped == 0 {
                warn!("AdmissionController: No further transaction update messages to drop");
                break;
            }
            warn!(
                "AdmissionController: Dropped {} transaction update messages to reduce queue size",
                dropped
            );
        }

        evicted
    }

    /// Remove up to one batch of the oldest evictable normal messages
    fn evict_normal<K: MessageKind>(
        &self,
        normal: &mut VecDeque<QueuedMessage<K>>,
        evicted: &mut Vec<QueuedMessage<K>>,
    ) -> usize {
        let mut budget = self.normal_batch();
        let mut kept = VecDeque::with_capacity(normal.len());
        let mut dropped = 0;

        while let Some(msg) = normal.pop_front() {
            // A pending BootNotification is the only way out of the registration gate
            if budget > 0 && !msg.is_boot_notification() {
                debug!("AdmissionController: Evicting {}", msg.identity);
                evicted.push(msg);
                budget -= 1;
                dropped += 1;
            } else {
                kept.push_back(msg);
            }
        }

        *normal = kept;
        dropped
    }
}

/// One thinning walk: drops the first, third, ... update of each run of
/// consecutive updates, never the last queued message.
fn thin_updates<K: MessageKind>(
    transaction: &mut VecDeque<QueuedMessage<K>>,
    evicted: &mut Vec<QueuedMessage<K>>,
) -> usize {
    let mut kept = VecDeque::with_capacity(transaction.len());
    let mut remove_next = true;
    let mut dropped = 0;

    while let Some(msg) = transaction.pop_front() {
        if remove_next && msg.is_transaction_update() && transaction.len() > 1 {
            debug!("AdmissionController: Evicting transaction update {}", msg.identity);
            evicted.push(msg);
            dropped += 1;
            remove_next = false;
        } else {
            remove_next = true;
            kept.push_back(msg);
        }
    }

    *transaction = kept;
    dropped
}
