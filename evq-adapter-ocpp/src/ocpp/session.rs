//! OCPP session state machine
//!
//! Tracks the station's standing with the CSMS across reconnects:
//! - Boot sequence (BootNotification → registration, Pending/Rejected back-off)
//! - Heartbeat schedule
//!
//! Delivery of the messages themselves is the queue's job; the session only
//! decides when the client should enqueue a boot or heartbeat.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Session state in the OCPP connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No WebSocket
    Disconnected,
    /// Connected but not registered
    Connected,
    /// CSMS answered Pending, boot repeats after its interval
    BootPending,
    /// Registered with CSMS
    Registered,
    /// CSMS answered Rejected, boot repeats after its interval
    Rejected,
}

/// Events that drive the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    /// A BootNotification was handed to the queue
    BootQueued,
    BootAccepted { interval: i32 },
    BootPending { interval: i32 },
    BootRejected { interval: i32 },
    /// A Heartbeat was handed to the queue
    HeartbeatQueued,
}

#[derive(Debug)]
pub struct Session {
    pub station_id: String,

    pub state: SessionState,
    pub registered_at: Option<DateTime<Utc>>,
    /// Seconds, as set by the last BootNotification response
    pub heartbeat_interval: i32,
    pub last_heartbeat: Option<DateTime<Utc>>,

    boot_outstanding: bool,
    next_boot_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(station_id: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            state: SessionState::Disconnected,
            registered_at: None,
            heartbeat_interval: 300, // Default 5 minutes
            last_heartbeat: None,
            boot_outstanding: false,
            next_boot_at: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered_at.is_some()
    }

    /// Whether a BootNotification is queued and unanswered
    pub fn boot_outstanding(&self) -> bool {
        self.boot_outstanding
    }

    /// Handle a session event at `now`
    pub fn handle_event(&mut self, event: SessionEvent, now: DateTime<Utc>) {
        debug!("Session event: {:?}", event);

        match event {
            SessionEvent::Connected => {
                self.state = if self.is_registered() {
                    SessionState::Registered
                } else {
                    SessionState::Connected
                };
                info!("Session {} connected ({:?})", self.station_id, self.state);
            }

            SessionEvent::Disconnected => {
                self.state = SessionState::Disconnected;
                warn!("Session {} disconnected", self.station_id);
            }

            SessionEvent::BootQueued => {
                self.boot_outstanding = true;
                self.next_boot_at = None;
            }

            SessionEvent::BootAccepted { interval } => {
                self.state = SessionState::Registered;
                self.registered_at = Some(now);
                self.boot_outstanding = false;
                if interval > 0 {
                    self.heartbeat_interval = interval;
                }
                // the boot itself counts as contact
                self.last_heartbeat = Some(now);
                info!("Session registered, heartbeat interval: {}s", self.heartbeat_interval);
            }

            SessionEvent::BootPending { interval } => {
                self.state = SessionState::BootPending;
                self.schedule_boot(interval, now);
                info!("Boot pending, will retry in {}s", interval);
            }

            SessionEvent::BootRejected { interval } => {
                self.state = SessionState::Rejected;
                self.schedule_boot(interval, now);
                warn!("Boot rejected by CSMS, will retry in {}s", interval);
            }

            SessionEvent::HeartbeatQueued => {
                self.last_heartbeat = Some(now);
            }
        }
    }

    fn schedule_boot(&mut self, interval: i32, now: DateTime<Utc>) {
        self.boot_outstanding = false;
        self.next_boot_at = Some(now + Duration::seconds(i64::from(interval.max(0))));
    }

    /// Check if heartbeat is due
    pub fn heartbeat_due(&self, now: DateTime<Utc>) -> bool {
        if self.state != SessionState::Registered || self.heartbeat_interval <= 0 {
            return false;
        }

        match self.last_heartbeat {
            None => true,
            Some(last) => {
                now.signed_duration_since(last).num_seconds() >= i64::from(self.heartbeat_interval)
            }
        }
    }

    /// Check if a BootNotification should be enqueued
    pub fn boot_due(&self, now: DateTime<Utc>) -> bool {
        if self.is_registered() || self.boot_outstanding || self.state == SessionState::Disconnected {
            return false;
        }
        self.next_boot_at.map_or(true, |at| now >= at)
    }
}
