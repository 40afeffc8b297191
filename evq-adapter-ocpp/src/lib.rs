//! # EVQ OCPP Adapter
//!
//! Charging station client for OCPP 1.6J and 2.0.1 built on the `evq-core`
//! outbound message queue.
//!
//! The adapter owns one [`evq_core::MessageQueue`] per station. Station logic
//! enqueues calls through typed helpers; the queue decides ordering, retries,
//! persistence and admission; the WebSocket client only carries frames.
//!
//! ## Message classes
//!
//! | OCPP 1.6 | OCPP 2.0.1 | Class |
//! |----------|------------|-------|
//! | StartTransaction, StopTransaction | TransactionEvent(Started/Ended) | transactional |
//! | MeterValues with transactionId | TransactionEvent(Updated) | transaction update |
//! | SecurityEventNotification | SecurityEventNotification | transactional |
//! | everything else | everything else | non-transactional |
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use evq_adapter_ocpp::{Adapter, AdapterConfig, V201};
//! use evq_core::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AdapterConfig::new(
//!         "CS001",
//!         "ws://localhost:8180/steve/websocket/CentralSystemService",
//!     );
//!
//!     let mut adapter = Adapter::<V201>::new(config, Arc::new(MemoryStore::new()))?;
//!     adapter.spawn()?.await??;
//!
//!     Ok(())
//! }
//! ```

pub mod ocpp;
pub mod config;
pub mod adapter;

pub use config::{AdapterConfig, OcppConfig};
pub use adapter::{Adapter, AdapterError};

// Re-export key types
pub use ocpp::v16::{TransactionRef, V16};
pub use ocpp::v201::V201;
pub use ocpp::{
    ClientError, ConnectorStatus, IncomingRequest, OcppClient, OcppProtocol, TransactionEventType,
    TriggerReason,
};
