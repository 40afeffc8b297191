//! Shared fixtures for the queue integration tests

#![allow(dead_code)]

use evq_core::{
    Category, MemoryStore, MessageKind, MessageQueue, MessageQueueConfig, OutboundCall,
    PersistedMessage, PersistenceError, PersistenceGateway, QueueKind, TransportSink,
};
use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKind {
    Transactional,
    TransactionalUpdate,
    NonTransactional,
    BootNotification,
    /// Transaction start; its reply assigns `transactionId`
    Start,
    /// Transaction event flagged `offline` when its send is rejected
    Event,
}

impl MessageKind for TestKind {
    const ACTIONS: &'static [(Self, &'static str)] = &[
        (TestKind::Transactional, "transactional"),
        (TestKind::TransactionalUpdate, "transactional_update"),
        (TestKind::NonTransactional, "non_transactional"),
        (TestKind::BootNotification, "boot_notification"),
        (TestKind::Start, "start"),
        (TestKind::Event, "event"),
    ];

    fn category(self, _payload: &Value) -> Category {
        match self {
            TestKind::Transactional | TestKind::Start | TestKind::Event => Category::Transactional,
            TestKind::TransactionalUpdate => Category::TransactionUpdate,
            _ => Category::NonTransactional,
        }
    }

    fn is_boot_notification(self) -> bool {
        self == TestKind::BootNotification
    }

    fn transaction_id(self, payload: &Value) -> Option<String> {
        payload["transactionId"].as_i64().map(|id| id.to_string())
    }

    fn assigned_transaction_id(self, response: &Value) -> Option<Value> {
        match self {
            TestKind::Start => response.get("transactionId").cloned(),
            _ => None,
        }
    }

    fn mark_offline(self, payload: &mut Value) -> bool {
        if self != TestKind::Event || payload["offline"] == true {
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

/// How the mock sink answers a CALL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Accept and answer with a CALLRESULT
    Ack,
    /// Sink rejects the frame
    Reject,
    /// Accept and answer with a CALLERROR
    Error,
    /// Accept and never answer
    Silent,
}

#[derive(Default)]
struct SinkState {
    frames: Vec<Value>,
    script: VecDeque<Reply>,
}

/// Records every frame and answers CALLs according to a script
pub struct MockSink {
    state: Mutex<SinkState>,
    sent: Condvar,
    default_reply: Reply,
    queue: Mutex<Weak<MessageQueue<TestKind>>>,
}

impl MockSink {
    pub fn new(default_reply: Reply) -> Self {
        Self {
            state: Mutex::new(SinkState::default()),
            sent: Condvar::new(),
            default_reply,
            queue: Mutex::new(Weak::new()),
        }
    }

    pub fn attach(&self, queue: &Arc<MessageQueue<TestKind>>) {
        *self.queue.lock() = Arc::downgrade(queue);
    }

    /// Replies used for the next CALLs, before falling back to the default
    pub fn script(&self, replies: &[Reply]) {
        self.state.lock().script.extend(replies.iter().copied());
    }

    pub fn frames(&self) -> Vec<Value> {
        self.state.lock().frames.clone()
    }

    pub fn calls(&self) -> Vec<Value> {
        self.frames().into_iter().filter(|f| f[0] == 2).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// `data` field of every CALL sent, in order
    pub fn sent_data(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|f| f[3]["data"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn wire_ids(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|f| f[1].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Block until at least `expected` CALLs were sent
    pub fn wait_for_calls(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let calls = state.frames.iter().filter(|f| f[0] == 2).count();
            if calls >= expected {
                return true;
            }
            if self.sent.wait_until(&mut state, deadline).timed_out() {
                return false;
            }
        }
    }

    fn respond(&self, text: String) {
        let queue = self.queue.lock().clone();
        thread::spawn(move || {
            if let Some(queue) = queue.upgrade() {
                queue.receive(&text);
            }
        });
    }
}

impl TransportSink for MockSink {
    fn send(&self, frame: &str) -> bool {
        let value: Value = serde_json::from_str(frame).expect("queue emits valid JSON");
        let is_call = value[0] == 2;
        let reply = {
            let mut state = self.state.lock();
            state.frames.push(value.clone());
            if is_call {
                state.script.pop_front().unwrap_or(self.default_reply)
            } else {
                Reply::Silent
            }
        };
        self.sent.notify_all();

        let wire_id = value[1].as_str().unwrap_or_default();
        match reply {
            Reply::Reject => false,
            Reply::Silent => true,
            Reply::Ack => {
                self.respond(json!([3, wire_id, {}]).to_string());
                true
            }
            Reply::Error => {
                self.respond(json!([4, wire_id, "InternalError", "", {}]).to_string());
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Save(String, QueueKind),
    Remove(String, QueueKind),
}

/// Memory store that keeps a log of every call
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    ops: Mutex<Vec<StoreOp>>,
    fail_saves: bool,
    fail_removes: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose `save` and/or `remove` always error, after logging the call
    pub fn failing(saves: bool, removes: bool) -> Self {
        Self {
            fail_saves: saves,
            fail_removes: removes,
            ..Self::default()
        }
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    pub fn saves(&self) -> usize {
        self.ops().iter().filter(|op| matches!(op, StoreOp::Save(..))).count()
    }

    pub fn removes(&self) -> usize {
        self.ops().iter().filter(|op| matches!(op, StoreOp::Remove(..))).count()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl PersistenceGateway for RecordingStore {
    fn load(&self, queue: QueueKind) -> Result<Vec<PersistedMessage>, PersistenceError> {
        self.inner.load(queue)
    }

    fn save(&self, message: &PersistedMessage, queue: QueueKind) -> Result<(), PersistenceError> {
        self.ops.lock().push(StoreOp::Save(message.identity.clone(), queue));
        if self.fail_saves {
            return Err(PersistenceError::Unavailable("disk full".into()));
        }
        self.inner.save(message, queue)
    }

    fn remove(&self, identity: &str, queue: QueueKind) -> Result<(), PersistenceError> {
        self.ops.lock().push(StoreOp::Remove(identity.to_string(), queue));
        if self.fail_removes {
            return Err(PersistenceError::Unavailable("disk full".into()));
        }
        self.inner.remove(identity, queue)
    }
}

/// Queue wired to a mock sink and a recording store
pub struct Harness {
    pub queue: Arc<MessageQueue<TestKind>>,
    pub sink: Arc<MockSink>,
    pub store: Arc<RecordingStore>,
    next_id: Mutex<usize>,
}

impl Harness {
    /// Started, registered and online
    pub fn new(config: MessageQueueConfig, default_reply: Reply) -> Self {
        Self::with_store(config, default_reply, Arc::new(RecordingStore::new()))
    }

    /// Started, registered and online, on top of `store`
    pub fn with_store(config: MessageQueueConfig, default_reply: Reply, store: Arc<RecordingStore>) -> Self {
        let harness = Self::stopped(config, default_reply, store);
        harness.queue.start().expect("spawn worker");
        harness.queue.set_registration_status_accepted();
        harness.queue.resume(Duration::ZERO);
        harness
    }

    /// Not started, unregistered, paused
    pub fn stopped(config: MessageQueueConfig, default_reply: Reply, store: Arc<RecordingStore>) -> Self {
        let sink = Arc::new(MockSink::new(default_reply));
        let queue = Arc::new(MessageQueue::new(
            config,
            Arc::clone(&sink) as Arc<dyn TransportSink>,
            Arc::clone(&store) as Arc<dyn PersistenceGateway>,
        ));
        sink.attach(&queue);
        Self {
            queue,
            sink,
            store,
            next_id: Mutex::new(0),
        }
    }

    /// Push a call identified as `test_call_<n>`, carrying its id as `data`
    pub fn push(&self, kind: TestKind) -> String {
        let identity = {
            let mut next = self.next_id.lock();
            let id = format!("test_call_{}", *next);
            *next += 1;
            id
        };
        self.push_as(kind, &identity);
        identity
    }

    pub fn push_as(&self, kind: TestKind, identity: &str) {
        self.queue
            .push_call(OutboundCall::new(identity, kind, json!({ "data": identity })));
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.queue.stop();
    }
}

/// Config used by most tests: one attempt, tiny threshold, no queue-all
pub fn config() -> MessageQueueConfig {
    MessageQueueConfig::default()
        .with_attempts(1)
        .with_retry_interval(Duration::from_secs(1))
        .with_threshold(2)
        .with_queue_all_messages(false)
        .with_message_timeout(Duration::from_secs(5))
}

pub const WAIT: Duration = Duration::from_secs(3);

/// Poll `cond` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
