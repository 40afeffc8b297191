//! Protocol-version seam
//!
//! The client and adapter are generic over an [`OcppProtocol`]; each OCPP
//! version supplies its message-kind enum, WebSocket subprotocol and the
//! payload builders for the messages every station sends.

use evq_core::MessageKind;
use serde_json::Value;

use super::types::{BootReason, ChargingStationInfo, ConnectorStatus};

/// One OCPP version as seen by the station
pub trait OcppProtocol: Send + Sync + 'static {
    type Kind: MessageKind;

    /// `Sec-WebSocket-Protocol` value
    const SUBPROTOCOL: &'static str;
    const BOOT_NOTIFICATION: Self::Kind;
    const HEARTBEAT: Self::Kind;
    const STATUS_NOTIFICATION: Self::Kind;
    const METER_VALUES: Self::Kind;

    fn boot_notification(
        info: &ChargingStationInfo,
        reason: BootReason,
    ) -> Result<Value, serde_json::Error>;

    fn status_notification(
        evse_id: i32,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> Result<Value, serde_json::Error>;

    /// Energy register sample, tied to `transaction_id` when charging
    fn meter_values(
        evse_id: i32,
        transaction_id: Option<&str>,
        energy_wh: f64,
    ) -> Result<Value, serde_json::Error>;

    fn heartbeat() -> Value {
        Value::Object(serde_json::Map::new())
    }
}
