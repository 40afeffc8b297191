//! OCPP protocol layer
//!
//! - `types`: payloads shared by 1.6 and 2.0.1, plus the 2.0.1 ones
//! - `protocol`: the version seam the client and adapter are generic over
//! - `v16` / `v201`: message kinds and builders per version
//! - `client`: WebSocket client for the CSMS connection
//! - `session`: registration and heartbeat state

pub mod types;
pub mod protocol;
pub mod v16;
pub mod v201;
pub mod client;
pub mod session;

pub use types::*;
pub use protocol::OcppProtocol;
pub use client::{build_ocpp_url, ClientError, IncomingRequest, OcppClient};
pub use session::{Session, SessionEvent, SessionState};
