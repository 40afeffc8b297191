//! OCPP 2.0.1 message kinds

use chrono::Utc;
use evq_core::{Category, MessageKind};
use serde_json::Value;

use super::protocol::OcppProtocol;
use super::types::*;

/// Station-originated OCPP 2.0.1 actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Authorize,
    BootNotification,
    ClearedChargingLimit,
    DataTransfer,
    FirmwareStatusNotification,
    Get15118EVCertificate,
    GetCertificateStatus,
    Heartbeat,
    LogStatusNotification,
    MeterValues,
    NotifyChargingLimit,
    NotifyCustomerInformation,
    NotifyEVChargingNeeds,
    NotifyEvent,
    NotifyMonitoringReport,
    NotifyReport,
    ReservationStatusUpdate,
    SecurityEventNotification,
    SignCertificate,
    StatusNotification,
    TransactionEvent,
}

impl MessageKind for MessageType {
    const ACTIONS: &'static [(Self, &'static str)] = &[
        (MessageType::Authorize, "Authorize"),
        (MessageType::BootNotification, "BootNotification"),
        (MessageType::ClearedChargingLimit, "ClearedChargingLimit"),
        (MessageType::DataTransfer, "DataTransfer"),
        (MessageType::FirmwareStatusNotification, "FirmwareStatusNotification"),
        (MessageType::Get15118EVCertificate, "Get15118EVCertificate"),
        (MessageType::GetCertificateStatus, "GetCertificateStatus"),
        (MessageType::Heartbeat, "Heartbeat"),
        (MessageType::LogStatusNotification, "LogStatusNotification"),
        (MessageType::MeterValues, "MeterValues"),
        (MessageType::NotifyChargingLimit, "NotifyChargingLimit"),
        (MessageType::NotifyCustomerInformation, "NotifyCustomerInformation"),
        (MessageType::NotifyEVChargingNeeds, "NotifyEVChargingNeeds"),
        (MessageType::NotifyEvent, "NotifyEvent"),
        (MessageType::NotifyMonitoringReport, "NotifyMonitoringReport"),
        (MessageType::NotifyReport, "NotifyReport"),
        (MessageType::ReservationStatusUpdate, "ReservationStatusUpdate"),
        (MessageType::SecurityEventNotification, "SecurityEventNotification"),
        (MessageType::SignCertificate, "SignCertificate"),
        (MessageType::StatusNotification, "StatusNotification"),
        (MessageType::TransactionEvent, "TransactionEvent"),
    ];

    fn category(self, payload: &Value) -> Category {
        match self {
            MessageType::TransactionEvent => match payload["eventType"].as_str() {
                Some("Updated") => Category::TransactionUpdate,
                _ => Category::Transactional,
            },
            MessageType::SecurityEventNotification => Category::Transactional,
            _ => Category::NonTransactional,
        }
    }

    fn is_boot_notification(self) -> bool {
        self == MessageType::BootNotification
    }

    fn transaction_id(self, payload: &Value) -> Option<String> {
        if self != MessageType::TransactionEvent {
            return None;
        }
        payload["transactionInfo"]["transactionId"]
            .as_str()
            .map(str::to_string)
    }

    fn mark_offline(self, payload: &mut Value) -> bool {
        if self != MessageType::TransactionEvent || payload["offline"] == true {
            return false;
        }
        match payload.as_object_mut() {
            Some(fields) => {
                fields.insert("offline".to_string(), Value::Bool(true));
                true
            }
            None => false,
        }
    }
}

/// OCPP 2.0.1
#[derive(Debug, Clone, Copy, Default)]
pub struct V201;

impl OcppProtocol for V201 {
    type Kind = MessageType;

    const SUBPROTOCOL: &'static str = "ocpp2.0.1";
    const BOOT_NOTIFICATION: MessageType = MessageType::BootNotification;
    const HEARTBEAT: MessageType = MessageType::Heartbeat;
    const STATUS_NOTIFICATION: MessageType = MessageType::StatusNotification;
    const METER_VALUES: MessageType = MessageType::MeterValues;

    fn boot_notification(
        info: &ChargingStationInfo,
        reason: BootReason,
    ) -> Result<Value, serde_json::Error> {
        serde_json::to_value(BootNotificationRequest {
            charging_station: info.clone(),
            reason,
        })
    }

    fn status_notification(
        evse_id: i32,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> Result<Value, serde_json::Error> {
        serde_json::to_value(StatusNotificationRequest {
            timestamp: Utc::now(),
            connector_status: status,
            evse_id,
            connector_id,
        })
    }

    /// Outside a transaction only; in-transaction samples travel in
    /// TransactionEvent(Updated)
    fn meter_values(
        evse_id: i32,
        _transaction_id: Option<&str>,
        energy_wh: f64,
    ) -> Result<Value, serde_json::Error> {
        serde_json::to_value(MeterValuesRequest {
            evse_id,
            meter_value: vec![MeterValue::energy(energy_wh, ReadingContext::SamplePeriodic)],
        })
    }
}
