//! MessageQueue: the orchestrator.
//!
//! Owns the Transaction and Normal ledgers and one send slot per ledger.
//! A dedicated worker thread moves ledger heads into their slots, hands the
//! encoded CALL to the transport sink and runs reply/retry/resume timers.
//! Application threads call `push_call`, the network read path calls
//! `receive`; both serialize on the same mutex and wake the worker through
//! a condition variable.
//!
//! Ordering is strict within a ledger: the next message of a ledger is not
//! attempted until the one in its slot is acknowledged or dropped. The two
//! ledgers progress independently.

use crate::admission::AdmissionController;
use crate::codec::{Call, CallError, CallResult, Frame};
use crate::config::{instant_after, MessageQueueConfig};
use crate::persistence::{PersistedMessage, PersistenceGateway};
use crate::retry::{DropReason, FailureReason, InFlight, Phase, RetryScheduler, Verdict};
use crate::transport::TransportSink;
use crate::types::{ActionTable, Category, MessageKind, OutboundCall, QueueKind, QueuedMessage};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Assigned transaction ids remembered for calls pushed after the reply
const ASSIGNED_HISTORY: usize = 64;

/// What `receive()` made of an incoming frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<K> {
    /// CALL from the Central System. Outbound dispatch is held until it is
    /// answered or `reset_pending_request` is called.
    Request(Call),
    /// CALLRESULT for the message currently in flight under this wire id
    Acknowledged {
        kind: K,
        identity: String,
        payload: Value,
    },
    /// CALLERROR for the message currently in flight under this wire id
    Rejected {
        kind: K,
        identity: String,
        error: CallError,
    },
    /// Reply whose id matches no in-flight attempt (stale or unknown)
    Unmatched(String),
    Malformed(String),
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub attempts: u64,
    pub acknowledged: u64,
    /// Messages that failed out or were refused while offline
    pub dropped: u64,
    pub evicted: u64,
    pub transaction_len: usize,
    pub normal_len: usize,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Unregistered,
    Accepted,
}

struct State<K> {
    transaction: VecDeque<QueuedMessage<K>>,
    normal: VecDeque<QueuedMessage<K>>,
    transaction_slot: Option<InFlight<K>>,
    normal_slot: Option<InFlight<K>>,
    running: bool,
    paused: bool,
    /// Pending delayed resume
    resume_at: Option<Instant>,
    resumed_once: bool,
    registration: Registration,
    /// Message id of an unanswered incoming CALL
    pending_incoming: Option<String>,
    /// (start identity, transaction id) of recently answered starts
    assigned: VecDeque<(String, Value)>,
    next_seq: u64,
    stats: QueueStats,
}

impl<K: MessageKind> State<K> {
    fn new() -> Self {
        Self {
            transaction: VecDeque::new(),
            normal: VecDeque::new(),
            transaction_slot: None,
            normal_slot: None,
            running: false,
            paused: true,
            resume_at: None,
            resumed_once: false,
            registration: Registration::Unregistered,
            pending_incoming: None,
            assigned: VecDeque::new(),
            next_seq: 0,
            stats: QueueStats::default(),
        }
    }

    fn ledger_mut(&mut self, kind: QueueKind) -> &mut VecDeque<QueuedMessage<K>> {
        match kind {
            QueueKind::Transaction => &mut self.transaction,
            QueueKind::Normal => &mut self.normal,
        }
    }

    fn slot(&self, kind: QueueKind) -> &Option<InFlight<K>> {
        match kind {
            QueueKind::Transaction => &self.transaction_slot,
            QueueKind::Normal => &self.normal_slot,
        }
    }

    fn slot_mut(&mut self, kind: QueueKind) -> &mut Option<InFlight<K>> {
        match kind {
            QueueKind::Transaction => &mut self.transaction_slot,
            QueueKind::Normal => &mut self.normal_slot,
        }
    }

    /// Ledger whose slot is bound to `wire_id`
    fn find_in_flight(&self, wire_id: &str) -> Option<QueueKind> {
        QueueKind::ALL.into_iter().find(|kind| {
            self.slot(*kind)
                .as_ref()
                .map_or(false, |f| f.wire_id == wire_id)
        })
    }

    fn in_flight_count(&self) -> usize {
        QueueKind::ALL
            .into_iter()
            .filter(|kind| self.slot(*kind).is_some())
            .count()
    }

    fn contains_identity(&self, identity: &str) -> bool {
        self.transaction
            .iter()
            .chain(self.normal.iter())
            .chain(self.transaction_slot.iter().map(|f| &f.message))
            .chain(self.normal_slot.iter().map(|f| &f.message))
            .any(|m| m.identity == identity)
    }

    /// Put in-flight messages back at the front of their ledgers
    fn requeue_in_flight(&mut self) {
        for kind in QueueKind::ALL {
            if let Some(flight) = self.slot_mut(kind).take() {
                debug!("MessageQueue: Returning {} to {} ledger", flight.message.identity, kind);
                self.ledger_mut(kind).push_front(flight.message);
            }
        }
    }

    fn assigned_transaction_id(&self, start_identity: &str) -> Option<&Value> {
        self.assigned
            .iter()
            .find(|(identity, _)| identity == start_identity)
            .map(|(_, id)| id)
    }

    fn is_offline(&self) -> bool {
        self.paused && self.resume_at.is_none()
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

struct Shared<K: MessageKind> {
    state: Mutex<State<K>>,
    wakeup: Condvar,
    config: MessageQueueConfig,
    actions: ActionTable<K>,
    admission: AdmissionController,
    retry: RetryScheduler,
    sink: Arc<dyn TransportSink>,
    persistence: Arc<dyn PersistenceGateway>,
}

impl<K: MessageKind> Shared<K> {
    fn persist(&self, msg: &mut QueuedMessage<K>) {
        let record = PersistedMessage {
            identity: msg.identity.clone(),
            action: self.actions.name(msg.kind).to_string(),
            payload: msg.payload.clone(),
            attempts: msg.attempts_made,
            enqueued_at: msg.enqueued_at,
            awaits: msg.awaits.clone(),
        };
        match self.persistence.save(&record, msg.queue_kind) {
            Ok(()) => msg.persisted = true,
            Err(e) => warn!("MessageQueue: Could not persist {}: {}", msg.identity, e),
        }
    }

    fn unpersist(&self, msg: &QueuedMessage<K>) {
        if !msg.persisted {
            return;
        }
        if let Err(e) = self.persistence.remove(&msg.identity, msg.queue_kind) {
            warn!("MessageQueue: Could not remove {} from store: {}", msg.identity, e);
        }
    }

    /// Enforce the size bound after an enqueue
    fn admit(&self, state: &mut State<K>) {
        let evicted = self.admission.enforce(&mut state.transaction, &mut state.normal);
        for msg in &evicted {
            self.unpersist(msg);
        }
        state.stats.evicted += evicted.len() as u64;
    }

    /// Fill in the transaction id assigned to `start_identity` on every
    /// queued call awaiting it
    fn assign_transaction_id(&self, state: &mut State<K>, start_identity: &str, transaction_id: Value) {
        let mut patched = 0;
        for ledger in [&mut state.transaction, &mut state.normal] {
            for msg in ledger
                .iter_mut()
                .filter(|m| m.awaits.as_deref() == Some(start_identity))
            {
                set_transaction_id(&mut msg.payload, &transaction_id);
                msg.awaits = None;
                if msg.persisted {
                    self.persist(msg);
                }
                patched += 1;
            }
        }
        if patched > 0 {
            debug!(
                "MessageQueue: Set transactionId {} on {} calls awaiting {}",
                transaction_id, patched, start_identity
            );
        }

        state.assigned.push_back((start_identity.to_string(), transaction_id));
        if state.assigned.len() > ASSIGNED_HISTORY {
            state.assigned.pop_front();
        }
    }

    /// Route a failed attempt through the retry policy
    fn fail(&self, state: &mut State<K>, flight: InFlight<K>, reason: FailureReason, now: Instant) {
        let mut msg = flight.message;
        match self.retry.decide(&msg, &reason, now) {
            Verdict::Retry { at } => {
                let rejected = reason == FailureReason::SendRejected;
                if rejected && msg.kind.mark_offline(&mut msg.payload) && msg.persisted {
                    self.persist(&mut msg);
                }
                debug!(
                    "MessageQueue: {} attempt {} failed ({}), retrying in {:?}",
                    msg.identity,
                    msg.attempts_made,
                    reason,
                    at.saturating_duration_since(now)
                );
                msg.not_before = Some(at);
                let kind = msg.queue_kind;
                state.ledger_mut(kind).push_front(msg);
            }
            Verdict::Drop(drop_reason) => {
                warn!(
                    "MessageQueue: Dropping {} {} after {} attempts ({}): {}",
                    self.actions.name(msg.kind),
                    msg.identity,
                    msg.attempts_made,
                    reason,
                    drop_reason
                );
                self.unpersist(&msg);
                state.stats.dropped += 1;
            }
        }
    }

    /// Apply timers that have come due
    fn expire(&self, state: &mut State<K>, now: Instant) {
        if state.paused && state.resume_at.map_or(false, |at| at <= now) {
            info!("MessageQueue: Delayed resume elapsed");
            state.paused = false;
            state.resume_at = None;
        }

        for kind in QueueKind::ALL {
            let timed_out = state
                .slot(kind)
                .as_ref()
                .and_then(InFlight::deadline)
                .map_or(false, |deadline| deadline <= now);
            if timed_out {
                if let Some(flight) = state.slot_mut(kind).take() {
                    warn!("MessageQueue: Timeout waiting for reply to {}", flight.wire_id);
                    self.fail(state, flight, FailureReason::ReplyTimeout, now);
                }
            }
        }
    }

    /// Move one ready ledger head into its slot and encode it
    fn next_dispatch(&self, state: &mut State<K>, now: Instant) -> Option<(QueueKind, String, String)> {
        if state.paused || state.pending_incoming.is_some() {
            return None;
        }

        for kind in QueueKind::ALL {
            if state.slot(kind).is_some() {
                continue;
            }

            let registered = state.registration == Registration::Accepted;
            let ledger = state.ledger_mut(kind);
            let index = if registered {
                ledger.front().map(|_| 0)
            } else {
                ledger.iter().position(QueuedMessage::is_boot_notification)
            };
            let Some(index) = index else { continue };
            if !ledger[index].is_ready(now) {
                continue;
            }
            let Some(mut msg) = ledger.remove(index) else { continue };

            let wire_id = self.retry.begin_attempt(&mut msg);
            let frame = Call::new(wire_id.clone(), self.actions.name(msg.kind), msg.payload.clone()).encode();
            debug!(
                "MessageQueue: Sending {} {} as {} (attempt {})",
                self.actions.name(msg.kind),
                msg.identity,
                wire_id,
                msg.attempts_made
            );

            state.stats.attempts += 1;
            *state.slot_mut(kind) = Some(InFlight {
                message: msg,
                wire_id: wire_id.clone(),
                phase: Phase::Sending,
            });
            return Some((kind, wire_id, frame));
        }
        None
    }

    /// Record the sink's verdict for the attempt sent under `wire_id`
    fn after_send(&self, state: &mut State<K>, kind: QueueKind, wire_id: &str, accepted: bool, now: Instant) {
        let still_sending = state
            .slot(kind)
            .as_ref()
            .map_or(false, |f| f.wire_id == wire_id && f.phase == Phase::Sending);
        if !still_sending {
            // Reply already arrived, or stop() reclaimed the message
            return;
        }

        if accepted {
            if let Some(flight) = state.slot_mut(kind).as_mut() {
                flight.phase = Phase::AwaitingReply {
                    deadline: self.retry.reply_deadline(now),
                };
            }
        } else if let Some(flight) = state.slot_mut(kind).take() {
            self.fail(state, flight, FailureReason::SendRejected, now);
        }
    }

    /// Earliest future instant the worker has to act on
    fn next_wakeup(&self, state: &State<K>, now: Instant) -> Option<Instant> {
        let resume = state.resume_at;
        let replies = QueueKind::ALL
            .into_iter()
            .filter_map(|kind| state.slot(kind).as_ref().and_then(InFlight::deadline));
        let retries = [state.transaction.front(), state.normal.front()]
            .into_iter()
            .flatten()
            .filter_map(|m| m.not_before);

        resume
            .into_iter()
            .chain(replies)
            .chain(retries)
            .filter(|at| *at > now)
            .min()
    }

    fn run(self: Arc<Self>) {
        debug!("MessageQueue: Worker started");
        let _exit = WorkerExit(&*self);
        let mut state = self.state.lock();

        while state.running {
            let now = Instant::now();
            self.expire(&mut state, now);

            if let Some((kind, wire_id, frame)) = self.next_dispatch(&mut state, now) {
                let accepted = MutexGuard::unlocked(&mut state, || self.sink.send(&frame));
                self.after_send(&mut state, kind, &wire_id, accepted, Instant::now());
                continue;
            }

            match self.next_wakeup(&state, now) {
                Some(deadline) => {
                    self.wakeup.wait_until(&mut state, deadline);
                }
                None => self.wakeup.wait(&mut state),
            }
        }

        debug!("MessageQueue: Worker stopped");
    }
}

/// Clears `running` when the worker returns or unwinds, so `start()` can
/// spawn a new one
struct WorkerExit<'a, K: MessageKind>(&'a Shared<K>);

impl<K: MessageKind> Drop for WorkerExit<'_, K> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("MessageQueue: Worker panicked");
        }
        self.0.state.lock().running = false;
    }
}

fn set_transaction_id(payload: &mut Value, transaction_id: &Value) {
    if let Some(fields) = payload.as_object_mut() {
        fields.insert("transactionId".to_string(), transaction_id.clone());
    }
}

/// Reliable, ordered outbound queue for one protocol's message kinds
pub struct MessageQueue<K: MessageKind> {
    shared: Arc<Shared<K>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K: MessageKind> MessageQueue<K> {
    /// Create a stopped, paused queue in the unregistered state
    pub fn new(
        config: MessageQueueConfig,
        sink: Arc<dyn TransportSink>,
        persistence: Arc<dyn PersistenceGateway>,
    ) -> Self {
        let shared = Shared {
            state: Mutex::new(State::new()),
            wakeup: Condvar::new(),
            actions: ActionTable::new(),
            admission: AdmissionController::new(config.queues_total_size_threshold),
            retry: RetryScheduler::new(&config),
            config,
            sink,
            persistence,
        };
        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MessageQueueConfig {
        &self.shared.config
    }

    pub fn actions(&self) -> &ActionTable<K> {
        &self.shared.actions
    }

    /// Spawn the delivery worker. No-op if already running.
    pub fn start(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock();
        {
            let mut state = self.shared.state.lock();
            if state.running {
                return Ok(());
            }
            // a worker that died mid-send leaves its message in the slot
            state.requeue_in_flight();
            state.running = true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("evq-worker".to_string())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!("MessageQueue: Started");
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().running = false;
                error!("MessageQueue: Failed to spawn worker: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the worker and keep the ledgers.
    ///
    /// In-flight messages go back to the front of their ledgers and pending
    /// retry and resume timers are cleared. Safe to call repeatedly.
    pub fn stop(&self) {
        let handle = self.worker.lock().take();
        {
            let mut state = self.shared.state.lock();
            if !state.running && handle.is_none() {
                return;
            }
            state.running = false;
        }
        self.shared.wakeup.notify_all();

        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("MessageQueue: Worker panicked");
            }
        }

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        state.requeue_in_flight();
        for msg in state.transaction.iter_mut().chain(state.normal.iter_mut()) {
            msg.not_before = None;
        }
        state.resume_at = None;
        info!("MessageQueue: Stopped");
    }

    /// Mark the transport offline. No-op if already offline.
    ///
    /// An unanswered incoming CALL died with the connection, so its
    /// dispatch hold is released.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        state.pending_incoming = None;
        if state.is_offline() {
            return;
        }
        state.paused = true;
        state.resume_at = None;
        info!("MessageQueue: Paused");
        self.shared.wakeup.notify_all();
    }

    /// Mark the transport online, after `delay` unless this is the first
    /// connection. No-op if not paused.
    pub fn resume(&self, delay: Duration) {
        let mut state = self.shared.state.lock();
        if !state.paused {
            return;
        }

        let first = !state.resumed_once;
        state.resumed_once = true;
        if first || delay.is_zero() {
            state.paused = false;
            state.resume_at = None;
            info!("MessageQueue: Resumed");
        } else {
            state.resume_at = Some(instant_after(Instant::now(), delay));
            info!("MessageQueue: Resuming in {:?}", delay);
        }
        self.shared.wakeup.notify_all();
    }

    /// Open the registration gate. One-way.
    pub fn set_registration_status_accepted(&self) {
        let mut state = self.shared.state.lock();
        if state.registration == Registration::Accepted {
            return;
        }
        state.registration = Registration::Accepted;
        info!("MessageQueue: Registration accepted");
        self.shared.wakeup.notify_all();
    }

    pub fn is_registered(&self) -> bool {
        self.shared.state.lock().registration == Registration::Accepted
    }

    /// Whether a delivery worker is alive
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Enqueue a call for delivery. Never blocks on the network.
    pub fn push_call(&self, call: OutboundCall<K>) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let seq = state.next_seq();
        let mut msg = QueuedMessage::new(call, seq);
        let boot = msg.is_boot_notification();

        if !boot
            && msg.category == Category::NonTransactional
            && !shared.config.queue_all_messages
            && state.is_offline()
        {
            debug!(
                "MessageQueue: Offline, not queueing {} {} ({})",
                shared.actions.name(msg.kind),
                msg.identity,
                DropReason::NotQueued
            );
            state.stats.dropped += 1;
            return;
        }

        if let Some(start) = msg.awaits.clone() {
            if let Some(transaction_id) = state.assigned_transaction_id(&start) {
                set_transaction_id(&mut msg.payload, transaction_id);
                msg.awaits = None;
            } else if !state.contains_identity(&start) {
                warn!("MessageQueue: {} awaits unknown message {}", msg.identity, start);
            }
        }

        if !boot && shared.retry.is_durable(msg.category) {
            shared.persist(&mut msg);
        }

        debug!(
            "MessageQueue: Enqueued {} {} in {} ledger",
            shared.actions.name(msg.kind),
            msg.identity,
            msg.queue_kind
        );
        let kind = msg.queue_kind;
        if boot {
            state.ledger_mut(kind).push_front(msg);
        } else {
            state.ledger_mut(kind).push_back(msg);
        }
        state.stats.enqueued += 1;

        shared.admit(&mut state);
        shared.wakeup.notify_all();
    }

    /// Answer an incoming CALL. Bypasses the ledgers.
    pub fn push_call_result(&self, result: CallResult) -> bool {
        let sent = self.shared.sink.send(&result.encode());
        self.answered(&result.message_id);
        sent
    }

    /// Reject an incoming CALL. Bypasses the ledgers.
    pub fn push_call_error(&self, error: CallError) -> bool {
        let sent = self.shared.sink.send(&error.encode());
        self.answered(&error.message_id);
        sent
    }

    fn answered(&self, message_id: &str) {
        let mut state = self.shared.state.lock();
        if state.pending_incoming.as_deref() == Some(message_id) {
            state.pending_incoming = None;
            self.shared.wakeup.notify_all();
        }
    }

    /// Release the dispatch hold of an unanswered incoming CALL
    pub fn reset_pending_request(&self) {
        let mut state = self.shared.state.lock();
        if state.pending_incoming.take().is_some() {
            self.shared.wakeup.notify_all();
        }
    }

    /// Handle one frame from the transport's read path
    pub fn receive(&self, text: &str) -> Inbound<K> {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("MessageQueue: Discarding malformed frame: {}", e);
                return Inbound::Malformed(e.to_string());
            }
        };

        let shared = &self.shared;
        let mut state = shared.state.lock();
        if !matches!(frame, Frame::Call(_)) && state.pending_incoming.take().is_some() {
            shared.wakeup.notify_all();
        }
        match frame {
            Frame::Call(call) => {
                debug!("MessageQueue: Incoming {} request {}", call.action, call.message_id);
                state.pending_incoming = Some(call.message_id.clone());
                Inbound::Request(call)
            }
            Frame::CallResult(result) => {
                let Some(flight) = take_in_flight(&mut *state, &result.message_id) else {
                    debug!("MessageQueue: No in-flight message for reply {}", result.message_id);
                    return Inbound::Unmatched(result.message_id);
                };
                let msg = flight.message;
                debug!("MessageQueue: {} acknowledged", msg.identity);
                shared.unpersist(&msg);
                if let Some(transaction_id) = msg.kind.assigned_transaction_id(&result.payload) {
                    shared.assign_transaction_id(&mut state, &msg.identity, transaction_id);
                }
                state.stats.acknowledged += 1;
                shared.wakeup.notify_all();
                Inbound::Acknowledged {
                    kind: msg.kind,
                    identity: msg.identity,
                    payload: result.payload,
                }
            }
            Frame::CallError(error) => {
                let Some(flight) = take_in_flight(&mut *state, &error.message_id) else {
                    debug!("MessageQueue: No in-flight message for error {}", error.message_id);
                    return Inbound::Unmatched(error.message_id);
                };
                let kind = flight.message.kind;
                let identity = flight.message.identity.clone();
                let reason = FailureReason::RemoteError {
                    code: error.error_code,
                    description: error.error_description.clone(),
                };
                shared.fail(&mut state, flight, reason, Instant::now());
                shared.wakeup.notify_all();
                Inbound::Rejected {
                    kind,
                    identity,
                    error,
                }
            }
        }
    }

    /// Rehydrate the ledgers from the persistence gateway after a restart.
    ///
    /// Returns the number of messages restored.
    pub fn restore_persisted(&self) -> usize {
        let shared = &self.shared;
        let mut kinds = vec![QueueKind::Transaction];
        if shared.config.queue_all_messages {
            kinds.push(QueueKind::Normal);
        }

        let mut state = shared.state.lock();
        let mut restored = 0;
        for queue in kinds {
            let records = match shared.persistence.load(queue) {
                Ok(records) => records,
                Err(e) => {
                    warn!("MessageQueue: Could not load {} messages: {}", queue, e);
                    continue;
                }
            };

            for record in records {
                let Some(kind) = shared.actions.parse(&record.action) else {
                    warn!(
                        "MessageQueue: Discarding stored {} with unknown action {}",
                        record.identity, record.action
                    );
                    if let Err(e) = shared.persistence.remove(&record.identity, queue) {
                        warn!("MessageQueue: Could not remove {} from store: {}", record.identity, e);
                    }
                    continue;
                };
                if state.contains_identity(&record.identity) {
                    continue;
                }

                let seq = state.next_seq();
                let call = OutboundCall {
                    awaits: record.awaits,
                    ..OutboundCall::new(record.identity, kind, record.payload)
                };
                let mut msg = QueuedMessage::new(call, seq);
                msg.attempts_made = record.attempts;
                msg.enqueued_at = record.enqueued_at;
                msg.persisted = true;
                msg.queue_kind = queue;

                state.ledger_mut(queue).push_back(msg);
                state.stats.enqueued += 1;
                restored += 1;
            }
        }

        if restored > 0 {
            info!("MessageQueue: Restored {} persisted messages", restored);
            shared.admit(&mut state);
            shared.wakeup.notify_all();
        }
        restored
    }

    /// True if no transaction-related message is queued or in flight
    pub fn is_transaction_ledger_empty(&self) -> bool {
        let state = self.shared.state.lock();
        state.transaction.is_empty() && state.transaction_slot.is_none()
    }

    /// Whether any queued or in-flight message belongs to `transaction_id`
    pub fn contains_transaction_messages(&self, transaction_id: &str) -> bool {
        let state = self.shared.state.lock();
        state
            .transaction
            .iter()
            .chain(state.transaction_slot.iter().map(|f| &f.message))
            .any(|m| m.kind.transaction_id(&m.payload).as_deref() == Some(transaction_id))
    }

    /// Whether a queued or in-flight `kind` message belongs to `transaction_id`
    pub fn contains_message(&self, kind: K, transaction_id: &str) -> bool {
        let state = self.shared.state.lock();
        state
            .transaction
            .iter()
            .chain(state.transaction_slot.iter().map(|f| &f.message))
            .any(|m| m.kind == kind && m.kind.transaction_id(&m.payload).as_deref() == Some(transaction_id))
    }

    /// Messages held by the queue, in flight included
    pub fn len(&self) -> usize {
        let state = self.shared.state.lock();
        state.transaction.len() + state.normal.len() + state.in_flight_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        QueueStats {
            transaction_len: state.transaction.len(),
            normal_len: state.normal.len(),
            in_flight: state.in_flight_count(),
            ..state.stats
        }
    }
}

impl<K: MessageKind> Drop for MessageQueue<K> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn take_in_flight<K: MessageKind>(state: &mut State<K>, wire_id: &str) -> Option<InFlight<K>> {
    let kind = state.find_in_flight(wire_id)?;
    state.slot_mut(kind).take()
}
