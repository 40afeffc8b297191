//! Station-side OCPP adapter
//!
//! Owns the outbound [`MessageQueue`] and the WebSocket client, and gives
//! the station typed helpers for the messages it originates.
//!
//! ## Architecture
//!
//! ```text
//! Station logic
//!       │ transaction_event / status_notification / meter_values
//!       ▼
//! ┌─────────────────────────────────┐
//! │    Adapter                      │
//! │  ┌────────────┐  ┌───────────┐  │
//! │  │ Message    │─►│ OCPP WS   │  │
//! │  │ Queue      │◄─│ Client    │  │
//! │  └─────┬──────┘  └─────┬─────┘  │
//! └────────┼───────────────┼────────┘
//!          │ persistence   │ WebSocket JSON-RPC
//!          ▼               ▼
//!     WAL / memory    OCPP CSMS (Backend)
//! ```
//!
//! ## Message Flow
//!
//! 1. Station calls a helper, the adapter builds the payload
//! 2. The queue persists transaction messages and admits the call
//! 3. The queue worker hands the frame to the client's channel
//! 4. The client writes it to the socket and feeds the reply back
//! 5. On failure the queue retries or drops per its policy

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use evq_core::{
    CallError, CallResult, ChannelSink, CodecError, ErrorCode, MessageQueue, OutboundCall,
    PersistenceGateway,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AdapterConfig;
use crate::ocpp::v16::{self, StopReason, TransactionRef, V16};
use crate::ocpp::v201::V201;
use crate::ocpp::*;

const INCOMING_CAPACITY: usize = 64;

/// Adapter errors
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Failed to start queue worker: {0}")]
    Worker(#[from] std::io::Error),

    #[error("Client already running")]
    AlreadyRunning,

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// The station adapter for protocol `P`
pub struct Adapter<P: OcppProtocol> {
    config: AdapterConfig,
    queue: Arc<MessageQueue<P::Kind>>,
    session: Arc<RwLock<Session>>,

    client: Option<OcppClient<P>>,
    incoming_rx: Option<mpsc::Receiver<IncomingRequest>>,

    seq_no: AtomicU32,
}

impl<P: OcppProtocol> Adapter<P> {
    /// Build the queue on top of `store`, restore what it holds and start
    /// the delivery worker. The client connects on [`Adapter::spawn`].
    pub fn new(config: AdapterConfig, store: Arc<dyn PersistenceGateway>) -> Result<Self, AdapterError> {
        let (sink, outgoing_rx) = ChannelSink::channel(config.ocpp.channel_capacity);
        let queue = Arc::new(MessageQueue::new(config.queue.clone(), Arc::new(sink), store));

        let restored = queue.restore_persisted();
        if restored > 0 {
            info!("Restored {} unacknowledged messages", restored);
        }
        queue.start()?;

        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let client = OcppClient::<P>::new(config.ocpp.clone(), Arc::clone(&queue), outgoing_rx, incoming_tx);
        let session = client.session();

        Ok(Self {
            config,
            queue,
            session,
            client: Some(client),
            incoming_rx: Some(incoming_rx),
            seq_no: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<MessageQueue<P::Kind>> {
        &self.queue
    }

    pub fn session(&self) -> Arc<RwLock<Session>> {
        self.session.clone()
    }

    /// Take the CSMS request stream. Requests left untaken are answered
    /// with NotImplemented once the client runs.
    pub fn take_incoming(&mut self) -> Option<mpsc::Receiver<IncomingRequest>> {
        self.incoming_rx.take()
    }

    /// Spawn the client connection loop on the current runtime
    pub fn spawn(&mut self) -> Result<JoinHandle<Result<(), ClientError>>, AdapterError> {
        let client = self.client.take().ok_or(AdapterError::AlreadyRunning)?;

        info!(
            "Starting OCPP adapter: station={}, protocol={}",
            self.config.ocpp.station_id,
            P::SUBPROTOCOL
        );

        if let Some(mut incoming) = self.incoming_rx.take() {
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move {
                while let Some(request) = incoming.recv().await {
                    warn!("Unhandled CSMS request: {} ({})", request.action, request.message_id);
                    queue.push_call_error(CallError::new(
                        request.message_id,
                        ErrorCode::NotImplemented,
                        format!("{} is not implemented", request.action),
                    ));
                }
            });
        }

        Ok(tokio::spawn(client.run()))
    }

    /// Stop the delivery worker; unacknowledged messages stay persisted
    pub fn shutdown(&self) {
        self.queue.stop();
    }

    /// Enqueue a call; returns its identity
    pub fn push(&self, kind: P::Kind, payload: Value) -> String {
        let call = OutboundCall::generate(kind, payload);
        let identity = call.identity.clone();
        self.queue.push_call(call);
        identity
    }

    /// Answer a CSMS request
    pub fn respond(&self, message_id: &str, payload: impl Serialize) -> Result<bool, AdapterError> {
        Ok(self.queue.push_call_result(CallResult::new(message_id, payload)?))
    }

    /// Reject a CSMS request
    pub fn respond_error(&self, message_id: &str, code: ErrorCode, description: &str) -> bool {
        self.queue.push_call_error(CallError::new(message_id, code, description))
    }

    pub fn heartbeat(&self) -> String {
        self.push(P::HEARTBEAT, P::heartbeat())
    }

    pub fn status_notification(
        &self,
        evse_id: i32,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> Result<String, AdapterError> {
        let payload = P::status_notification(evse_id, connector_id, status)?;
        Ok(self.push(P::STATUS_NOTIFICATION, payload))
    }

    /// StatusNotification for every configured EVSE (connector 1)
    pub fn status_notification_all(&self, status: ConnectorStatus) -> Result<Vec<String>, AdapterError> {
        (1..=self.config.ocpp.evse_count as i32)
            .map(|evse_id| self.status_notification(evse_id, 1, status))
            .collect()
    }

    pub fn meter_values(
        &self,
        evse_id: i32,
        transaction_id: Option<&str>,
        energy_wh: f64,
    ) -> Result<String, AdapterError> {
        let payload = P::meter_values(evse_id, transaction_id, energy_wh)?;
        Ok(self.push(P::METER_VALUES, payload))
    }

    /// Whether messages of `transaction_id` still await delivery
    pub fn has_pending_transaction_messages(&self, transaction_id: &str) -> bool {
        self.queue.contains_transaction_messages(transaction_id)
    }

    fn next_seq_no(&self) -> u32 {
        self.seq_no.fetch_add(1, Ordering::Relaxed)
    }
}

impl Adapter<V201> {
    /// Station-generated transaction id
    pub fn new_transaction_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// TransactionEvent with an energy reading matching the event type
    pub fn transaction_event(
        &self,
        event_type: TransactionEventType,
        trigger_reason: TriggerReason,
        transaction_id: &str,
        evse_id: i32,
        energy_wh: f64,
    ) -> Result<String, AdapterError> {
        let (context, charging_state) = match event_type {
            TransactionEventType::Started => (ReadingContext::TransactionBegin, Some(ChargingState::Charging)),
            TransactionEventType::Updated => (ReadingContext::SamplePeriodic, Some(ChargingState::Charging)),
            TransactionEventType::Ended => (ReadingContext::TransactionEnd, None),
        };

        let request = TransactionEventRequest {
            event_type,
            timestamp: Utc::now(),
            trigger_reason,
            seq_no: self.next_seq_no(),
            transaction_info: TransactionInfo {
                transaction_id: transaction_id.to_string(),
                charging_state,
                stopped_reason: None,
            },
            evse: Some(EVSE {
                id: evse_id,
                connector_id: Some(1),
            }),
            id_token: None,
            meter_value: Some(vec![MeterValue::energy(energy_wh, context)]),
            offline: None,
        };

        Ok(self.push(v201::MessageType::TransactionEvent, serde_json::to_value(request)?))
    }
}

impl Adapter<V16> {
    /// Returns the message identity; until the response arrives the
    /// transaction is [`TransactionRef::Pending`] on it
    pub fn start_transaction(
        &self,
        connector_id: i32,
        id_tag: &str,
        meter_start_wh: i32,
    ) -> Result<String, AdapterError> {
        let request = v16::StartTransactionRequest {
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start: meter_start_wh,
            timestamp: Utc::now(),
        };
        Ok(self.push(v16::MessageType::StartTransaction, serde_json::to_value(request)?))
    }

    /// MeterValues within a transaction. For a pending transaction the
    /// queue fills in `transactionId` from the StartTransaction response.
    pub fn transaction_meter_values(
        &self,
        connector_id: i32,
        transaction: &TransactionRef,
        energy_wh: f64,
    ) -> Result<String, AdapterError> {
        let transaction_id = transaction.assigned().map(|id| id.to_string());
        let payload = V16::meter_values(connector_id, transaction_id.as_deref(), energy_wh)?;
        Ok(self.push_within(transaction, v16::MessageType::MeterValues, payload))
    }

    pub fn stop_transaction(
        &self,
        transaction: &TransactionRef,
        meter_stop_wh: i32,
        reason: Option<StopReason>,
    ) -> Result<String, AdapterError> {
        let request = v16::StopTransactionRequest {
            transaction_id: transaction.assigned(),
            id_tag: None,
            meter_stop: meter_stop_wh,
            timestamp: Utc::now(),
            reason,
        };
        Ok(self.push_within(transaction, v16::MessageType::StopTransaction, serde_json::to_value(request)?))
    }

    /// Whether a StopTransaction for `transaction_id` still awaits delivery
    pub fn has_pending_stop_transaction(&self, transaction_id: i32) -> bool {
        self.queue
            .contains_message(v16::MessageType::StopTransaction, &transaction_id.to_string())
    }

    fn push_within(&self, transaction: &TransactionRef, kind: v16::MessageType, payload: Value) -> String {
        let mut call = OutboundCall::generate(kind, payload);
        if let Some(start) = transaction.start_identity() {
            call = call.awaiting(start);
        }
        let identity = call.identity.clone();
        self.queue.push_call(call);
        identity
    }
}
