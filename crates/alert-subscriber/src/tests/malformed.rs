//! Invalid payloads are rejected without requeue and consumption goes on.

use super::harness::{payload, TestSubscriber, QUEUE};
use alert_core::AlertType;
use alert_queue::{JournalEntry, MemoryBroker};
use std::time::Duration;

#[tokio::test]
async fn invalid_json_is_rejected_without_requeue() {
    let broker = MemoryBroker::new();
    let subscriber = TestSubscriber::start(broker.clone()).await;

    let bad = broker.inject(QUEUE, b"not json at all");
    subscriber.wait_for_rejects(1).await;

    assert!(broker
        .journal()
        .iter()
        .any(|e| matches!(e, JournalEntry::Rejected { requeue: false, .. })));
    assert_eq!(broker.ready_count(QUEUE), 0);
    assert_eq!(broker.unacked_count(QUEUE), 0);
    assert_eq!(subscriber.total_count().await, 0);

    // The next valid alert is still processed.
    broker.inject(QUEUE, &payload("A1", AlertType::Info));
    subscriber.wait_for_acks(1).await;
    assert_eq!(subscriber.total_count().await, 1);
    assert_eq!(broker.deliveries_of(&bad), 1);

    let counters = subscriber.stop_counters().await;
    assert_eq!(counters.rejected, 1);
    assert_eq!(counters.received, 1);
    assert_eq!(counters.stored, 1);
}

#[tokio::test]
async fn contract_violations_are_not_redelivered() {
    let broker = MemoryBroker::new();
    let subscriber = TestSubscriber::start(broker.clone()).await;

    let ids = vec![
        // Unknown type
        broker.inject(
            QUEUE,
            br#"{"id":"X1","type":"PANIC","system":"Api","message":"m","timestamp":"2024-06-10T06:13:20Z"}"#,
        ),
        // Empty id
        broker.inject(
            QUEUE,
            br#"{"id":"","type":"INFO","system":"Api","message":"m","timestamp":"2024-06-10T06:13:20Z"}"#,
        ),
        // Missing system
        broker.inject(
            QUEUE,
            br#"{"id":"X3","type":"INFO","message":"m","timestamp":"2024-06-10T06:13:20Z"}"#,
        ),
        // Not UTF-8
        broker.inject(QUEUE, &[0xff, 0xfe, 0xfd]),
        // Empty body
        broker.inject(QUEUE, b""),
    ];

    subscriber.wait_for_rejects(ids.len()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(broker.reject_count(), ids.len());
    for id in &ids {
        assert_eq!(broker.deliveries_of(id), 1, "{id} was redelivered");
    }
    assert_eq!(subscriber.total_count().await, 0);

    subscriber.stop().await;
}
