//! Configuration for the OCPP station adapter
//!
//! Combines the CSMS connection settings with the message queue tuning.

use std::time::Duration;

use evq_core::MessageQueueConfig;

use crate::ocpp::ChargingStationInfo;

/// Complete adapter configuration
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    // OCPP settings
    pub ocpp: OcppConfig,

    // Outbound queue settings
    pub queue: MessageQueueConfig,
}

/// OCPP connection configuration
#[derive(Debug, Clone)]
pub struct OcppConfig {
    /// CSMS WebSocket URL (without station ID)
    pub csms_url: String,

    /// Station ID (appended to URL)
    pub station_id: String,

    /// Vendor name for BootNotification
    pub vendor: String,

    /// Model name for BootNotification
    pub model: String,

    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,

    /// Number of EVSEs to report
    pub evse_count: u32,

    /// Initial reconnect delay
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay (exponential backoff cap)
    pub max_reconnect_delay: Duration,

    /// Delay before the queue resumes dispatch on reconnect
    pub resume_delay: Duration,

    /// Outgoing frame buffer between the queue worker and the socket
    pub channel_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            ocpp: OcppConfig::default(),
            queue: MessageQueueConfig::default(),
        }
    }
}

impl Default for OcppConfig {
    fn default() -> Self {
        Self {
            csms_url: "ws://localhost:8180/steve/websocket/CentralSystemService".to_string(),
            station_id: "EVQ-001".to_string(),
            vendor: "EVerest".to_string(),
            model: "EVQ-OCPP".to_string(),
            serial_number: None,
            firmware_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            evse_count: 1,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(300),
            resume_delay: Duration::from_secs(0),
            channel_capacity: evq_core::transport::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl OcppConfig {
    pub fn charging_station_info(&self) -> ChargingStationInfo {
        ChargingStationInfo {
            model: self.model.clone(),
            vendor_name: self.vendor.clone(),
            serial_number: self.serial_number.clone(),
            firmware_version: self.firmware_version.clone(),
        }
    }
}

impl AdapterConfig {
    /// Create config with basic parameters
    pub fn new(station_id: impl Into<String>, csms_url: impl Into<String>) -> Self {
        Self {
            ocpp: OcppConfig {
                csms_url: csms_url.into(),
                station_id: station_id.into(),
                ..Default::default()
            },
            queue: MessageQueueConfig::default(),
        }
    }

    /// Set vendor info
    pub fn with_vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.ocpp.vendor = vendor.into();
        self.ocpp.model = model.into();
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.ocpp.serial_number = Some(serial.into());
        self
    }

    pub fn with_firmware(mut self, version: impl Into<String>) -> Self {
        self.ocpp.firmware_version = Some(version.into());
        self
    }

    pub fn with_evse_count(mut self, count: u32) -> Self {
        self.ocpp.evse_count = count;
        self
    }

    pub fn with_resume_delay(mut self, delay: Duration) -> Self {
        self.ocpp.resume_delay = delay;
        self
    }

    /// Replace the queue tuning wholesale
    pub fn with_queue(mut self, queue: MessageQueueConfig) -> Self {
        self.queue = queue;
        self
    }
}
