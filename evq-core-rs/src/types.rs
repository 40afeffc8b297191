//! Core types for the outbound message queue

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Instant;

/// Which ledger (and which persistence partition) a message lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Transaction,
    Normal,
}

impl QueueKind {
    pub const ALL: [QueueKind; 2] = [QueueKind::Transaction, QueueKind::Normal];
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKind::Transaction => write!(f, "transaction"),
            QueueKind::Normal => write!(f, "normal"),
        }
    }
}

/// Retry and eviction class of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Opens, closes or otherwise anchors a transaction. Never evicted.
    Transactional,
    /// Interim report within an open transaction. Evictable.
    TransactionUpdate,
    /// Everything else. Evicted first.
    NonTransactional,
}

impl Category {
    pub fn is_transaction_related(self) -> bool {
        !matches!(self, Category::NonTransactional)
    }

    /// Ledger a message of this category is queued in
    pub fn queue_kind(self) -> QueueKind {
        if self.is_transaction_related() {
            QueueKind::Transaction
        } else {
            QueueKind::Normal
        }
    }
}

/// Application message-type enumeration of one protocol version.
///
/// Implemented once per OCPP version. `ACTIONS` is the wire-name table the
/// queue builds its [`ActionTable`] from; every variant that can be pushed
/// must appear in it exactly once.
pub trait MessageKind: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    const ACTIONS: &'static [(Self, &'static str)];

    /// Retry/eviction class; may depend on the payload (e.g. TransactionEvent)
    fn category(self, payload: &Value) -> Category;

    fn is_boot_notification(self) -> bool;

    /// Transaction the message belongs to, if the protocol carries one
    fn transaction_id(self, _payload: &Value) -> Option<String> {
        None
    }

    /// Transaction id the Central System assigned in its reply to this
    /// message, patched into the `transactionId` of every call queued with
    /// [`OutboundCall::awaiting`] on it
    fn assigned_transaction_id(self, _response: &Value) -> Option<Value> {
        None
    }

    /// Mark a payload whose send was rejected as recorded while offline.
    /// Returns whether the payload changed.
    fn mark_offline(self, _payload: &mut Value) -> bool {
        false
    }
}

/// Bidirectional kind <-> action name mapping, built once per queue
#[derive(Debug, Clone)]
pub struct ActionTable<K: MessageKind> {
    names: HashMap<K, &'static str>,
    kinds: HashMap<&'static str, K>,
}

impl<K: MessageKind> ActionTable<K> {
    pub fn new() -> Self {
        let mut names = HashMap::with_capacity(K::ACTIONS.len());
        let mut kinds = HashMap::with_capacity(K::ACTIONS.len());
        for (kind, name) in K::ACTIONS {
            names.insert(*kind, *name);
            kinds.insert(*name, *kind);
        }
        Self { names, kinds }
    }

    /// Wire name of `kind`; kinds missing from the table map to "InternalError"
    pub fn name(&self, kind: K) -> &'static str {
        self.names.get(&kind).copied().unwrap_or("InternalError")
    }

    pub fn parse(&self, name: &str) -> Option<K> {
        self.kinds.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<K: MessageKind> Default for ActionTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// An application-level call handed to [`crate::MessageQueue::push_call`]
#[derive(Debug, Clone)]
pub struct OutboundCall<K> {
    /// Caller-assigned, unique for the queue's lifetime
    pub identity: String,
    pub kind: K,
    pub payload: Value,
    /// Identity of the call whose reply carries this call's transaction id
    pub awaits: Option<String>,
}

impl<K: MessageKind> OutboundCall<K> {
    pub fn new(identity: impl Into<String>, kind: K, payload: Value) -> Self {
        Self {
            identity: identity.into(),
            kind,
            payload,
            awaits: None,
        }
    }

    /// Take the transaction id from the reply to `start_identity` once it
    /// arrives. The call is queued as transaction-related.
    pub fn awaiting(mut self, start_identity: impl Into<String>) -> Self {
        self.awaits = Some(start_identity.into());
        self
    }

    /// Call with a freshly generated identity
    pub fn generate(kind: K, payload: Value) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), kind, payload)
    }
}

/// One call awaiting delivery, as held in a ledger
#[derive(Debug, Clone)]
pub struct QueuedMessage<K> {
    pub identity: String,
    pub kind: K,
    pub category: Category,
    pub payload: Value,
    pub attempts_made: u32,
    pub queue_kind: QueueKind,
    /// Wire id of the most recent attempt; `None` until first sent
    pub current_wire_id: Option<String>,
    /// Whether a copy lives in the persistence gateway
    pub persisted: bool,
    /// Unresolved [`OutboundCall::awaits`]
    pub awaits: Option<String>,
    /// Enqueue order across both ledgers
    pub(crate) seq: u64,
    /// Earliest instant of the next attempt (retry interval)
    pub(crate) not_before: Option<Instant>,
    pub(crate) enqueued_at: chrono::DateTime<chrono::Utc>,
}

impl<K: MessageKind> QueuedMessage<K> {
    pub(crate) fn new(call: OutboundCall<K>, seq: u64) -> Self {
        let mut category = call.kind.category(&call.payload);
        if call.awaits.is_some() && category == Category::NonTransactional {
            category = Category::TransactionUpdate;
        }
        Self {
            identity: call.identity,
            kind: call.kind,
            category,
            payload: call.payload,
            attempts_made: 0,
            queue_kind: category.queue_kind(),
            current_wire_id: None,
            persisted: false,
            awaits: call.awaits,
            seq,
            not_before: None,
            enqueued_at: chrono::Utc::now(),
        }
    }

    pub fn is_transaction_update(&self) -> bool {
        self.category == Category::TransactionUpdate
    }

    pub fn is_boot_notification(&self) -> bool {
        self.kind.is_boot_notification()
    }

    pub(crate) fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
pub(crate) mod test_kind {
    use super::*;

    /// Minimal kind set used across the crate's unit tests
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum TestKind {
        Transactional,
        TransactionalUpdate,
        NonTransactional,
        BootNotification,
    }

    impl MessageKind for TestKind {
        const ACTIONS: &'static [(Self, &'static str)] = &[
            (TestKind::Transactional, "transactional"),
            (TestKind::TransactionalUpdate, "transactional_update"),
            (TestKind::NonTransactional, "non_transactional"),
            (TestKind::BootNotification, "boot_notification"),
        ];

        fn category(self, _payload: &Value) -> Category {
            match self {
                TestKind::Transactional => Category::Transactional,
                TestKind::TransactionalUpdate => Category::TransactionUpdate,
                _ => Category::NonTransactional,
            }
        }

        fn is_boot_notification(self) -> bool {
            self == TestKind::BootNotification
        }
    }
}
