//! End-to-end delivery scenarios against a scripted transport

mod common;

use common::{config, eventually, Harness, RecordingStore, Reply, StoreOp, TestKind, WAIT};
use evq_core::{Inbound, OutboundCall, PersistedMessage, PersistenceGateway, QueueKind};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_transactional_message_is_sent() {
    let h = Harness::new(config(), Reply::Silent);
    h.push_as(TestKind::Transactional, "0");

    assert!(h.sink.wait_for_calls(1, WAIT));
    assert_eq!(h.sink.calls()[0], json!([2, "0", "transactional", {"data": "0"}]));
    assert_eq!(h.store.ops(), vec![StoreOp::Save("0".into(), QueueKind::Transaction)]);
}

#[test]
fn test_non_transactional_message_is_sent() {
    let h = Harness::new(config(), Reply::Silent);
    h.push_as(TestKind::NonTransactional, "0");

    assert!(h.sink.wait_for_calls(1, WAIT));
    assert_eq!(h.sink.calls()[0], json!([2, "0", "non_transactional", {"data": "0"}]));
    assert_eq!(h.store.saves(), 0);
}

#[test]
fn test_queuing_up_of_transactional_messages() {
    let h = Harness::new(
        config()
            .with_attempts(2)
            .with_retry_interval(Duration::from_millis(50)),
        Reply::Ack,
    );
    let message_count = 5;

    h.sink.script(&[Reply::Reject]);
    h.push(TestKind::Transactional);
    assert!(h.sink.wait_for_calls(1, WAIT));
    for _ in 1..message_count {
        h.push(TestKind::Transactional);
    }

    assert!(h.sink.wait_for_calls(message_count + 1, WAIT));
    assert!(eventually(WAIT, || h.store.removes() == message_count));
    assert_eq!(h.store.saves(), message_count);

    let expected: Vec<String> = std::iter::once("test_call_0".to_string())
        .chain((0..message_count).map(|i| format!("test_call_{}", i)))
        .collect();
    assert_eq!(h.sink.sent_data(), expected);
}

#[test]
fn test_delivered_after_attempts_minus_one_failures() {
    let h = Harness::new(
        config().with_attempts(3).with_retry_interval(Duration::ZERO),
        Reply::Ack,
    );
    h.sink.script(&[Reply::Reject, Reply::Reject]);
    let id = h.push(TestKind::Transactional);

    assert!(h.sink.wait_for_calls(3, WAIT));
    assert!(eventually(WAIT, || h.queue.stats().acknowledged == 1));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(h.sink.call_count(), 3);
    assert_eq!(
        h.store.ops(),
        vec![
            StoreOp::Save(id.clone(), QueueKind::Transaction),
            StoreOp::Remove(id, QueueKind::Transaction),
        ]
    );
}

#[test]
fn test_message_dropped_after_max_retries_then_next_message_sent() {
    let h = Harness::new(
        config()
            .with_threshold(1)
            .with_attempts(2)
            .with_retry_interval(Duration::ZERO),
        Reply::Ack,
    );
    h.sink.script(&[Reply::Reject, Reply::Reject]);
    let first = h.push(TestKind::Transactional);
    let second = h.push(TestKind::Transactional);

    assert!(h.sink.wait_for_calls(3, WAIT));
    assert!(eventually(WAIT, || h.queue.is_transaction_ledger_empty()));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(h.sink.sent_data(), vec![first.clone(), first.clone(), second.clone()]);
    let stats = h.queue.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(h.store.saves(), 2);
    assert_eq!(
        h.store.ops().iter().filter(|op| **op == StoreOp::Remove(first.clone(), QueueKind::Transaction)).count(),
        1
    );
}

#[test]
fn test_non_transactional_not_retried_without_queue_all() {
    let h = Harness::new(
        config().with_attempts(3).with_retry_interval(Duration::ZERO),
        Reply::Reject,
    );
    h.push(TestKind::NonTransactional);

    assert!(h.sink.wait_for_calls(1, WAIT));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(h.sink.call_count(), 1);
    assert_eq!(h.queue.stats().dropped, 1);
    assert!(h.queue.is_empty());
}

#[test]
fn test_non_transactional_retried_with_queue_all() {
    let h = Harness::new(
        config()
            .with_attempts(3)
            .with_retry_interval(Duration::ZERO)
            .with_queue_all_messages(true),
        Reply::Reject,
    );
    let id = h.push(TestKind::NonTransactional);

    assert!(h.sink.wait_for_calls(3, WAIT));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.sink.call_count(), 3);
    assert_eq!(
        h.store.ops(),
        vec![StoreOp::Save(id.clone(), QueueKind::Normal), StoreOp::Remove(id, QueueKind::Normal)]
    );
}

#[test]
fn test_clean_up_non_transactional_queue() {
    let h = Harness::new(
        config().with_threshold(20).with_queue_all_messages(true),
        Reply::Ack,
    );
    h.queue.pause();

    let non_transactional: Vec<String> = (0..15).map(|_| h.push(TestKind::NonTransactional)).collect();
    let transactional: Vec<String> = (0..10).map(|_| h.push(TestKind::Transactional)).collect();
    assert_eq!(h.queue.stats().evicted, 6);

    h.queue.resume(Duration::ZERO);
    assert!(h.sink.wait_for_calls(19, WAIT));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.sink.call_count(), 19);

    let sent = h.sink.sent_data();
    let sent_normal: Vec<String> = sent.iter().filter(|d| non_transactional.contains(d)).cloned().collect();
    let sent_tx: Vec<String> = sent.iter().filter(|d| transactional.contains(d)).cloned().collect();
    assert_eq!(sent_normal, non_transactional[6..].to_vec());
    assert_eq!(sent_tx, transactional);

    assert!(eventually(WAIT, || h.store.removes() == 25));
    assert_eq!(h.store.saves(), 25);
}

#[test]
fn test_clean_up_transactional_queue() {
    let h = Harness::new(
        config().with_threshold(13).with_queue_all_messages(true),
        Reply::Ack,
    );
    h.queue.pause();

    for _ in 0..10 {
        h.push(TestKind::NonTransactional);
    }
    for updates in [0, 4, 6, 2] {
        h.push(TestKind::Transactional);
        for _ in 0..updates {
            h.push(TestKind::TransactionalUpdate);
        }
        h.push(TestKind::Transactional);
    }

    let dropped: HashSet<String> = [13, 15, 19, 21, 14, 20, 23]
        .iter()
        .map(|i| format!("test_call_{}", i))
        .collect();
    let expected: Vec<String> = (10..30)
        .map(|i| format!("test_call_{}", i))
        .filter(|id| !dropped.contains(id))
        .collect();

    h.queue.resume(Duration::ZERO);
    assert!(h.sink.wait_for_calls(13, WAIT));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.sink.sent_data(), expected);

    assert!(eventually(WAIT, || h.store.removes() == 30));
    assert_eq!(h.store.saves(), 30);
}

#[test]
fn test_stale_reply_is_ignored() {
    let h = Harness::new(
        config().with_attempts(3).with_retry_interval(Duration::ZERO),
        Reply::Silent,
    );
    let id = h.push(TestKind::Transactional);
    assert!(h.sink.wait_for_calls(1, WAIT));

    let rejected = h.queue.receive(&json!([4, id, "InternalError", "busy", {}]).to_string());
    assert!(matches!(rejected, Inbound::Rejected { ref identity, .. } if *identity == id));
    assert!(h.sink.wait_for_calls(2, WAIT));

    let wire_ids = h.sink.wire_ids();
    assert_eq!(wire_ids[0], id);
    assert_ne!(wire_ids[1], id);

    let stale = h.queue.receive(&json!([3, id, {}]).to_string());
    assert_eq!(stale, Inbound::Unmatched(id.clone()));
    assert_eq!(h.queue.stats().acknowledged, 0);
    assert_eq!(h.queue.len(), 1);

    let current = h.queue.receive(&json!([3, wire_ids[1], {"ok": true}]).to_string());
    assert_eq!(
        current,
        Inbound::Acknowledged {
            kind: TestKind::Transactional,
            identity: id,
            payload: json!({"ok": true}),
        }
    );
    assert!(h.queue.is_empty());
}

#[test]
fn test_reply_timeout_triggers_retry() {
    let h = Harness::new(
        config()
            .with_attempts(2)
            .with_retry_interval(Duration::ZERO)
            .with_message_timeout(Duration::from_millis(100)),
        Reply::Silent,
    );
    let id = h.push(TestKind::Transactional);

    assert!(h.sink.wait_for_calls(2, WAIT));
    assert!(eventually(WAIT, || h.queue.stats().dropped == 1));
    assert_eq!(h.sink.sent_data(), vec![id.clone(), id]);
    assert_eq!(h.store.removes(), 1);
}

#[test]
fn test_callerror_counts_as_failed_attempt() {
    let h = Harness::new(
        config().with_attempts(2).with_retry_interval(Duration::ZERO),
        Reply::Error,
    );
    h.push(TestKind::Transactional);

    assert!(h.sink.wait_for_calls(2, WAIT));
    assert!(eventually(WAIT, || h.queue.stats().dropped == 1));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.sink.call_count(), 2);
}

#[test]
fn test_registration_gate_only_allows_boot_notification() {
    let h = Harness::stopped(config().with_threshold(10), Reply::Ack, Arc::new(RecordingStore::new()));
    h.queue.start().unwrap();
    h.queue.resume(Duration::ZERO);

    let tx = h.push(TestKind::Transactional);
    let boot = h.push(TestKind::BootNotification);

    assert!(h.sink.wait_for_calls(1, WAIT));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.sink.sent_data(), vec![boot.clone()]);

    h.queue.set_registration_status_accepted();
    assert!(h.sink.wait_for_calls(2, WAIT));
    assert_eq!(h.sink.sent_data(), vec![boot, tx]);
}

#[test]
fn test_boot_notification_retried_past_attempt_budget() {
    let h = Harness::stopped(
        config()
            .with_attempts(1)
            .with_boot_retry_interval(Duration::from_millis(20)),
        Reply::Reject,
        Arc::new(RecordingStore::new()),
    );
    h.queue.start().unwrap();
    h.queue.resume(Duration::ZERO);
    h.push(TestKind::BootNotification);

    assert!(h.sink.wait_for_calls(3, WAIT));
    assert_eq!(h.queue.stats().dropped, 0);
}

#[test]
fn test_transactional_order_strictness() {
    let h = Harness::new(
        config()
            .with_threshold(20)
            .with_attempts(2)
            .with_retry_interval(Duration::ZERO),
        Reply::Ack,
    );
    h.sink.script(&[Reply::Reject, Reply::Reject]);

    let tx1 = h.push(TestKind::Transactional);
    let tx2 = h.push(TestKind::Transactional);
    let heartbeat = h.push(TestKind::NonTransactional);

    assert!(h.sink.wait_for_calls(4, WAIT));
    let sent = h.sink.sent_data();
    let tx_order: Vec<&String> = sent.iter().filter(|d| **d != heartbeat).collect();
    assert_eq!(tx_order, vec![&tx1, &tx1, &tx2]);
    assert!(sent.contains(&heartbeat));
}

#[test]
fn test_incoming_call_holds_dispatch() {
    let h = Harness::new(config(), Reply::Silent);
    let request = h.queue.receive(r#"[2, "csms-1", "GetVariables", {}]"#);
    assert!(matches!(request, Inbound::Request(_)));

    h.push(TestKind::Transactional);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.sink.call_count(), 0);

    let error = evq_core::CallError::new("csms-1", evq_core::ErrorCode::NotImplemented, "");
    assert!(h.queue.push_call_error(error));
    assert!(h.sink.wait_for_calls(1, WAIT));
    assert_eq!(h.sink.frames()[0][0], 4);
}

#[test]
fn test_stop_and_pause_are_idempotent() {
    let h = Harness::stopped(config(), Reply::Silent, Arc::new(RecordingStore::new()));
    h.queue.stop();
    h.queue.stop();
    h.queue.pause();
    h.queue.pause();
    assert_eq!(h.sink.call_count(), 0);
    assert!(h.store.ops().is_empty());
}

#[test]
fn test_restart_keeps_in_flight_message() {
    let h = Harness::new(config().with_attempts(3), Reply::Silent);
    let id = h.push(TestKind::Transactional);
    assert!(h.sink.wait_for_calls(1, WAIT));

    h.queue.stop();
    h.queue.stop();
    assert_eq!(h.queue.len(), 1);
    assert_eq!(h.queue.stats().in_flight, 0);

    h.queue.start().unwrap();
    assert!(h.sink.wait_for_calls(2, WAIT));
    assert_eq!(h.sink.sent_data(), vec![id.clone(), id]);
    assert_eq!(h.store.saves(), 1);
}

#[test]
fn test_restore_persisted_messages() {
    let store = Arc::new(RecordingStore::new());
    for (identity, action) in [("a", "transactional"), ("b", "unknown_action"), ("c", "transactional_update")] {
        let record = PersistedMessage {
            identity: identity.to_string(),
            action: action.to_string(),
            payload: json!({ "data": identity }),
            attempts: 0,
            enqueued_at: chrono::Utc::now(),
            awaits: None,
        };
        store.inner().save(&record, QueueKind::Transaction).unwrap();
    }

    let h = Harness::stopped(config().with_threshold(10), Reply::Ack, store);
    assert_eq!(h.queue.restore_persisted(), 2);
    assert!(!h.store.inner().contains("b", QueueKind::Transaction));

    h.queue.start().unwrap();
    h.queue.set_registration_status_accepted();
    h.queue.resume(Duration::ZERO);

    assert!(h.sink.wait_for_calls(2, WAIT));
    assert_eq!(h.sink.wire_ids(), vec!["a".to_string(), "c".to_string()]);
    assert!(eventually(WAIT, || h.store.inner().is_empty()));
}

#[test]
fn test_huge_timers_do_not_stall_delivery() {
    let h = Harness::new(
        config()
            .with_attempts(3)
            .with_message_timeout(Duration::MAX)
            .with_retry_interval(Duration::MAX),
        Reply::Silent,
    );
    h.sink.script(&[Reply::Reject]);

    h.push(TestKind::Transactional);
    assert!(h.sink.wait_for_calls(1, WAIT));
    let normal = h.push(TestKind::NonTransactional);
    assert!(h.sink.wait_for_calls(2, WAIT));

    assert!(h.queue.is_running());
    assert_eq!(h.sink.sent_data()[1], normal);

    h.queue.resume(Duration::MAX);
    h.queue.pause();
    h.queue.resume(Duration::MAX);
    assert!(h.queue.is_running());
}

#[test]
fn test_normal_ledger_progresses_during_transaction_retry_wait() {
    let h = Harness::new(
        config().with_attempts(2).with_retry_interval(Duration::from_secs(2)),
        Reply::Ack,
    );
    h.sink.script(&[Reply::Reject]);

    let tx = h.push(TestKind::Transactional);
    assert!(h.sink.wait_for_calls(1, WAIT));
    let normal = h.push(TestKind::NonTransactional);

    assert!(h.sink.wait_for_calls(2, Duration::from_millis(500)));
    assert_eq!(h.sink.sent_data(), vec![tx.clone(), normal]);

    assert!(h.sink.wait_for_calls(3, WAIT));
    assert_eq!(h.sink.sent_data()[2], tx);
}

#[test]
fn test_failing_save_does_not_block_delivery() {
    let store = Arc::new(RecordingStore::failing(true, false));
    let h = Harness::with_store(config(), Reply::Ack, store);

    let id = h.push(TestKind::Transactional);
    assert!(h.sink.wait_for_calls(1, WAIT));
    assert!(eventually(WAIT, || h.queue.stats().acknowledged == 1));

    assert!(h.queue.is_empty());
    assert!(h.store.inner().is_empty());
    // nothing was stored, so nothing is removed
    assert_eq!(h.store.ops(), vec![StoreOp::Save(id, QueueKind::Transaction)]);
}

#[test]
fn test_failing_remove_does_not_block_delivery() {
    let store = Arc::new(RecordingStore::failing(false, true));
    let h = Harness::with_store(config().with_threshold(10), Reply::Ack, store);

    let first = h.push(TestKind::Transactional);
    let second = h.push(TestKind::Transactional);
    assert!(h.sink.wait_for_calls(2, WAIT));
    assert!(eventually(WAIT, || h.queue.stats().acknowledged == 2));

    assert!(h.queue.is_empty());
    assert_eq!(h.sink.sent_data(), vec![first.clone(), second.clone()]);
    assert!(h.store.inner().contains(&first, QueueKind::Transaction));
    assert_eq!(h.store.removes(), 2);
}

#[test]
fn test_awaiting_calls_get_assigned_transaction_id() {
    let h = Harness::new(config().with_threshold(10), Reply::Silent);

    h.push_as(TestKind::Start, "start");
    assert!(h.sink.wait_for_calls(1, WAIT));

    let meter = OutboundCall::new("meter", TestKind::NonTransactional, json!({"data": "meter"})).awaiting("start");
    let stop = OutboundCall::new("stop", TestKind::Transactional, json!({"data": "stop"})).awaiting("start");
    h.queue.push_call(meter);
    h.queue.push_call(stop);
    assert_eq!(h.queue.stats().transaction_len, 2);
    assert!(h.store.inner().contains("meter", QueueKind::Transaction));

    let ack = h.queue.receive(&json!([3, "start", {"transactionId": 42}]).to_string());
    assert!(matches!(ack, Inbound::Acknowledged { kind: TestKind::Start, .. }));
    assert!(h.sink.wait_for_calls(2, WAIT));
    assert_eq!(h.sink.calls()[1], json!([2, "meter", "non_transactional", {"data": "meter", "transactionId": 42}]));

    let stored = h.store.inner().load(QueueKind::Transaction).unwrap();
    let stored_stop = stored.iter().find(|m| m.identity == "stop").unwrap();
    assert_eq!(stored_stop.payload["transactionId"], 42);
    assert_eq!(stored_stop.awaits, None);
    assert!(h.queue.contains_message(TestKind::Transactional, "42"));

    h.queue.receive(&json!([3, "meter", {}]).to_string());
    assert!(h.sink.wait_for_calls(3, WAIT));
    assert_eq!(h.sink.calls()[2][3]["transactionId"], 42);

    // a call pushed after the reply picks up the id right away
    h.queue.push_call(OutboundCall::new("late", TestKind::TransactionalUpdate, json!({})).awaiting("start"));
    assert!(h.queue.contains_message(TestKind::TransactionalUpdate, "42"));
    assert!(!h.queue.contains_message(TestKind::Transactional, "7"));
}

#[test]
fn test_rejected_event_is_flagged_offline() {
    let h = Harness::new(
        config().with_attempts(2).with_retry_interval(Duration::ZERO),
        Reply::Ack,
    );
    h.sink.script(&[Reply::Reject]);
    h.push_as(TestKind::Event, "ev");

    assert!(h.sink.wait_for_calls(2, WAIT));
    let calls = h.sink.calls();
    assert!(calls[0][3].get("offline").is_none());
    assert_eq!(calls[1][3]["offline"], true);
    assert_eq!(h.store.saves(), 2);
    assert!(eventually(WAIT, || h.queue.stats().acknowledged == 1));
}
