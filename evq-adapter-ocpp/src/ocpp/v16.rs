//! OCPP 1.6J message kinds and payloads

use chrono::{DateTime, Utc};
use evq_core::{Category, MessageKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::protocol::OcppProtocol;
use super::types::{BootReason, ChargingStationInfo, ConnectorStatus, Measurand, ReadingContext};

/// Station-originated OCPP 1.6 actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Authorize,
    BootNotification,
    DataTransfer,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    Heartbeat,
    LogStatusNotification,
    MeterValues,
    SecurityEventNotification,
    SignCertificate,
    SignedFirmwareStatusNotification,
    StartTransaction,
    StatusNotification,
    StopTransaction,
}

impl MessageKind for MessageType {
    const ACTIONS: &'static [(Self, &'static str)] = &[
        (MessageType::Authorize, "Authorize"),
        (MessageType::BootNotification, "BootNotification"),
        (MessageType::DataTransfer, "DataTransfer"),
        (MessageType::DiagnosticsStatusNotification, "DiagnosticsStatusNotification"),
        (MessageType::FirmwareStatusNotification, "FirmwareStatusNotification"),
        (MessageType::Heartbeat, "Heartbeat"),
        (MessageType::LogStatusNotification, "LogStatusNotification"),
        (MessageType::MeterValues, "MeterValues"),
        (MessageType::SecurityEventNotification, "SecurityEventNotification"),
        (MessageType::SignCertificate, "SignCertificate"),
        (MessageType::SignedFirmwareStatusNotification, "SignedFirmwareStatusNotification"),
        (MessageType::StartTransaction, "StartTransaction"),
        (MessageType::StatusNotification, "StatusNotification"),
        (MessageType::StopTransaction, "StopTransaction"),
    ];

    fn category(self, payload: &Value) -> Category {
        match self {
            MessageType::StartTransaction
            | MessageType::StopTransaction
            | MessageType::SecurityEventNotification => Category::Transactional,
            MessageType::MeterValues if !payload["transactionId"].is_null() => {
                Category::TransactionUpdate
            }
            _ => Category::NonTransactional,
        }
    }

    fn is_boot_notification(self) -> bool {
        self == MessageType::BootNotification
    }

    fn transaction_id(self, payload: &Value) -> Option<String> {
        match self {
            MessageType::MeterValues | MessageType::StopTransaction => {
                payload["transactionId"].as_i64().map(|id| id.to_string())
            }
            _ => None,
        }
    }

    fn assigned_transaction_id(self, response: &Value) -> Option<Value> {
        if self != MessageType::StartTransaction {
            return None;
        }
        response.get("transactionId").filter(|id| id.is_i64()).cloned()
    }
}

/// A 1.6 transaction as the station knows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRef {
    /// Id assigned in the StartTransaction response
    Assigned(i32),
    /// StartTransaction still unanswered; holds its message identity
    Pending(String),
}

impl TransactionRef {
    pub fn assigned(&self) -> Option<i32> {
        match self {
            TransactionRef::Assigned(id) => Some(*id),
            TransactionRef::Pending(_) => None,
        }
    }

    /// Identity of the StartTransaction whose response carries the id
    pub fn start_identity(&self) -> Option<&str> {
        match self {
            TransactionRef::Assigned(_) => None,
            TransactionRef::Pending(identity) => Some(identity),
        }
    }
}

/// Connector status as reported by 1.6 StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl From<ConnectorStatus> for ChargePointStatus {
    fn from(status: ConnectorStatus) -> Self {
        match status {
            ConnectorStatus::Available => ChargePointStatus::Available,
            ConnectorStatus::Occupied => ChargePointStatus::Charging,
            ConnectorStatus::Reserved => ChargePointStatus::Reserved,
            ConnectorStatus::Unavailable => ChargePointStatus::Unavailable,
            ConnectorStatus::Faulted => ChargePointStatus::Faulted,
        }
    }
}

/// Stop reason (subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    EVDisconnected,
    Local,
    PowerLoss,
    Reboot,
    Remote,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: i32,
    pub error_code: String,
    pub status: ChargePointStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// 1.6 sampled values carry their reading as a string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ReadingContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub connector_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    pub meter_value: Vec<MeterValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionRequest {
    pub connector_id: i32,
    pub id_tag: String,
    pub meter_start: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionRequest {
    /// Filled in by the queue when the transaction is still pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_tag: Option<String>,
    pub meter_stop: i32,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StopReason>,
}

/// OCPP 1.6J
#[derive(Debug, Clone, Copy, Default)]
pub struct V16;

impl OcppProtocol for V16 {
    type Kind = MessageType;

    const SUBPROTOCOL: &'static str = "ocpp1.6";
    const BOOT_NOTIFICATION: MessageType = MessageType::BootNotification;
    const HEARTBEAT: MessageType = MessageType::Heartbeat;
    const STATUS_NOTIFICATION: MessageType = MessageType::StatusNotification;
    const METER_VALUES: MessageType = MessageType::MeterValues;

    fn boot_notification(
        info: &ChargingStationInfo,
        _reason: BootReason,
    ) -> Result<Value, serde_json::Error> {
        serde_json::to_value(BootNotificationRequest {
            charge_point_vendor: info.vendor_name.clone(),
            charge_point_model: info.model.clone(),
            charge_point_serial_number: info.serial_number.clone(),
            firmware_version: info.firmware_version.clone(),
        })
    }

    fn status_notification(
        _evse_id: i32,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> Result<Value, serde_json::Error> {
        serde_json::to_value(StatusNotificationRequest {
            connector_id,
            error_code: "NoError".to_string(),
            status: status.into(),
            timestamp: Some(Utc::now()),
        })
    }

    fn meter_values(
        evse_id: i32,
        transaction_id: Option<&str>,
        energy_wh: f64,
    ) -> Result<Value, serde_json::Error> {
        let transaction_id = transaction_id.and_then(|id| match id.parse::<i32>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("OCPP 1.6 transaction id must be an integer, got {}", id);
                None
            }
        });

        serde_json::to_value(MeterValuesRequest {
            connector_id: evse_id,
            transaction_id,
            meter_value: vec![MeterValue {
                timestamp: Utc::now(),
                sampled_value: vec![SampledValue {
                    value: format!("{:.0}", energy_wh),
                    context: Some(ReadingContext::SamplePeriodic),
                    measurand: Some(Measurand::EnergyActiveImportRegister),
                    unit: Some("Wh".to_string()),
                }],
            }],
        })
    }
}
