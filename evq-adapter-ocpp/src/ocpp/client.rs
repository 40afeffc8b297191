//! OCPP WebSocket client
//!
//! Connects the station to its CSMS and drives the outbound queue:
//! - WebSocket connection with the protocol's OCPP subprotocol
//! - Automatic reconnection with exponential backoff
//! - Queue pause on disconnect, resume on reconnect
//! - BootNotification and Heartbeat scheduling
//!
//! Every outbound CALL travels through [`MessageQueue`]; the client only
//! moves encoded frames between the queue's channel and the socket and
//! feeds incoming text back into [`MessageQueue::receive`].

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use evq_core::{Inbound, MessageKind, MessageQueue, OutboundCall};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header, HeaderValue},
        protocol::WebSocketConfig,
        Message,
    },
};
use tracing::{debug, error, info, warn};

use super::protocol::OcppProtocol;
use super::session::{Session, SessionEvent, SessionState};
use super::types::*;
use crate::config::OcppConfig;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid CSMS URL: {0}")]
    InvalidUrl(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Incoming CSMS request for the adapter to handle
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

/// OCPP WebSocket client for one protocol version
pub struct OcppClient<P: OcppProtocol> {
    config: OcppConfig,
    station: ChargingStationInfo,
    boot_retry_interval: Duration,
    queue: Arc<MessageQueue<P::Kind>>,
    session: Arc<RwLock<Session>>,

    outgoing_rx: mpsc::Receiver<String>,
    incoming_tx: mpsc::Sender<IncomingRequest>,

    _protocol: PhantomData<fn() -> P>,
}

impl<P: OcppProtocol> OcppClient<P> {
    /// `outgoing_rx` is the receiving end of the queue's channel sink
    pub fn new(
        config: OcppConfig,
        queue: Arc<MessageQueue<P::Kind>>,
        outgoing_rx: mpsc::Receiver<String>,
        incoming_tx: mpsc::Sender<IncomingRequest>,
    ) -> Self {
        let session = Session::new(&config.station_id);
        let boot_retry_interval = queue.config().boot_notification_retry_interval;

        Self {
            station: config.charging_station_info(),
            config,
            boot_retry_interval,
            queue,
            session: Arc::new(RwLock::new(session)),
            outgoing_rx,
            incoming_tx,
            _protocol: PhantomData,
        }
    }

    /// Get a reference to the session
    pub fn session(&self) -> Arc<RwLock<Session>> {
        self.session.clone()
    }

    /// Run the client connection loop.
    ///
    /// Returns when the queue's channel closes, or with an error that no
    /// reconnect can fix.
    pub async fn run(mut self) -> Result<(), ClientError> {
        let mut reconnect_delay = self.config.reconnect_delay;

        loop {
            info!("Connecting to CSMS: {} ({})", self.config.csms_url, P::SUBPROTOCOL);

            match self.connect_and_run().await {
                Ok(()) => {
                    info!("Outgoing channel closed, client stopping");
                    self.queue.pause();
                    break Ok(());
                }
                Err(ClientError::InvalidUrl(url)) => {
                    error!("Invalid CSMS URL: {}", url);
                    break Err(ClientError::InvalidUrl(url));
                }
                Err(e) => {
                    error!("Connection error: {}", e);
                    self.queue.pause();

                    let was_connected = {
                        let mut session = self.session.write().await;
                        let was_connected = session.state != SessionState::Disconnected;
                        session.handle_event(SessionEvent::Disconnected, Utc::now());
                        was_connected
                    };
                    if was_connected {
                        reconnect_delay = self.config.reconnect_delay;
                    }

                    // Exponential backoff
                    info!("Reconnecting in {:?}", reconnect_delay);
                    tokio::time::sleep(reconnect_delay).await;
                    reconnect_delay = std::cmp::min(reconnect_delay * 2, self.config.max_reconnect_delay);
                }
            }
        }
    }

    /// Connect and run until disconnection
    async fn connect_and_run(&mut self) -> Result<(), ClientError> {
        let url = build_ocpp_url(&self.config.csms_url, &self.config.station_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|_| ClientError::InvalidUrl(url.clone()))?;
        request.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(P::SUBPROTOCOL),
        );

        let ws_config = WebSocketConfig {
            max_message_size: Some(64 * 1024),
            max_frame_size: Some(16 * 1024),
            ..Default::default()
        };

        let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), false).await?;

        // Verify subprotocol
        let accepted_protocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if accepted_protocol != Some(P::SUBPROTOCOL) {
            warn!(
                "CSMS did not accept {} subprotocol, got: {:?}",
                P::SUBPROTOCOL,
                accepted_protocol
            );
        }

        info!("WebSocket connected to {}", url);

        // Frames encoded for the previous socket; the queue retries what matters
        let mut stale = 0usize;
        while self.outgoing_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} frames queued before reconnect", stale);
        }

        self.session.write().await.handle_event(SessionEvent::Connected, Utc::now());
        self.queue.resume(self.config.resume_delay);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut tick = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(Message::Close(frame))) => {
                            info!("WebSocket closed by server: {:?}", frame);
                            return Err(ClientError::ConnectionClosed);
                        }
                        Some(Ok(Message::Ping(_))) => debug!("Received ping"),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(ClientError::ConnectionClosed),
                    }
                }

                frame = self.outgoing_rx.recv() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    debug!("Sending: {}", frame);
                    ws_tx.send(Message::Text(frame.into())).await?;
                }

                _ = tick.tick() => self.on_tick().await,
            }
        }
    }

    /// Route one text frame from the CSMS
    async fn handle_frame(&self, text: &str) {
        debug!("Received: {}", text);

        match self.queue.receive(text) {
            Inbound::Request(call) => {
                let request = IncomingRequest {
                    message_id: call.message_id,
                    action: call.action,
                    payload: call.payload,
                };
                if let Err(e) = self.incoming_tx.send(request).await {
                    error!("Failed to forward CSMS request: {}", e);
                    self.queue.reset_pending_request();
                }
            }
            Inbound::Acknowledged { kind, payload, .. } if kind.is_boot_notification() => {
                self.on_boot_response(payload).await;
            }
            Inbound::Acknowledged { kind, identity, .. } => {
                debug!("{} {} acknowledged", self.queue.actions().name(kind), identity);
            }
            Inbound::Rejected { kind, identity, error } => {
                warn!(
                    "{} {} rejected by CSMS: {:?} {}",
                    self.queue.actions().name(kind),
                    identity,
                    error.error_code,
                    error.error_description
                );
            }
            Inbound::Unmatched(message_id) => debug!("Ignoring reply to {}", message_id),
            Inbound::Malformed(reason) => warn!("Ignoring malformed frame: {}", reason),
        }
    }

    async fn on_boot_response(&self, payload: Value) {
        let fallback = i32::try_from(self.boot_retry_interval.as_secs()).unwrap_or(i32::MAX);
        let retry_in = |interval: i32| if interval > 0 { interval } else { fallback };
        let now = Utc::now();

        let mut session = self.session.write().await;
        match serde_json::from_value::<BootNotificationResponse>(payload) {
            Ok(response) => match response.status {
                RegistrationStatus::Accepted => {
                    self.queue.set_registration_status_accepted();
                    session.handle_event(SessionEvent::BootAccepted { interval: response.interval }, now);
                }
                RegistrationStatus::Pending => {
                    let interval = retry_in(response.interval);
                    session.handle_event(SessionEvent::BootPending { interval }, now);
                }
                RegistrationStatus::Rejected => {
                    let interval = retry_in(response.interval);
                    session.handle_event(SessionEvent::BootRejected { interval }, now);
                }
            },
            Err(e) => {
                warn!("Malformed BootNotification response: {}", e);
                session.handle_event(SessionEvent::BootRejected { interval: fallback }, now);
            }
        }
    }

    /// Once a second: enqueue a boot or heartbeat when one is due
    async fn on_tick(&self) {
        let now = Utc::now();
        let mut session = self.session.write().await;

        if session.boot_due(now) {
            match P::boot_notification(&self.station, BootReason::PowerUp) {
                Ok(payload) => {
                    self.queue.push_call(OutboundCall::generate(P::BOOT_NOTIFICATION, payload));
                    session.handle_event(SessionEvent::BootQueued, now);
                }
                Err(e) => error!("Failed to build BootNotification: {}", e),
            }
        }

        if session.heartbeat_due(now) {
            self.queue.push_call(OutboundCall::generate(P::HEARTBEAT, P::heartbeat()));
            session.handle_event(SessionEvent::HeartbeatQueued, now);
        }
    }
}

/// Build the full OCPP WebSocket URL
pub fn build_ocpp_url(base_url: &str, station_id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), station_id)
}
