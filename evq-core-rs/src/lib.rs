//! EVQ Core Library
//!
//! Reliable, ordered, crash-recoverable outbound message queue for OCPP
//! charging stations. Turns application calls into a stream of CALL frames
//! over an unreliable transport:
//! - Strict per-ledger ordering (Transaction / Normal)
//! - Attempt budgets, reply timeouts and retry intervals
//! - Size-bounded backlog with eviction while offline
//! - Durable storage of unacknowledged messages
//! - Registration gate until the BootNotification is accepted

pub mod admission;
pub mod codec;
pub mod config;
pub mod persistence;
pub mod queue;
pub mod retry;
pub mod transport;
pub mod types;

pub use admission::AdmissionController;
pub use codec::{Call, CallError, CallResult, CodecError, ErrorCode, Frame, MessageTypeId};
pub use config::{MessageQueueConfig, MAX_DELAY};
pub use persistence::{
    FileStore, FileStoreConfig, MemoryStore, PersistedMessage, PersistenceError, PersistenceGateway,
};
pub use queue::{Inbound, MessageQueue, QueueStats};
pub use retry::{DropReason, FailureReason, RetryScheduler, Verdict};
pub use transport::{ChannelSink, TransportSink};
pub use types::{ActionTable, Category, MessageKind, OutboundCall, QueueKind, QueuedMessage};
