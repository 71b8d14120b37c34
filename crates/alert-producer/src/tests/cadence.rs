//! Publish cadence and message durability.

use super::harness::{queued_ids, test_config, TestProducer, QUEUE};
use alert_core::Alert;
use alert_queue::MemoryBroker;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn publishes_immediately_on_startup() {
    let producer = TestProducer::start(MemoryBroker::new(), test_config());

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(queued_ids(&producer.broker), vec!["ALERT-TEST-1"]);
    assert_eq!(producer.stats().published, 1);

    producer.stop().await;
}

#[tokio::test(start_paused = true)]
async fn publishes_once_per_interval() {
    let producer = TestProducer::start(MemoryBroker::new(), test_config());

    // Ticks at 0s, 5s and 10s
    tokio::time::sleep(Duration::from_millis(12_500)).await;

    assert_eq!(
        queued_ids(&producer.broker),
        vec!["ALERT-TEST-1", "ALERT-TEST-2", "ALERT-TEST-3"]
    );

    let (report, stats) = producer.stop().await;
    assert_eq!(stats.published, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn custom_interval_is_honoured() {
    let mut config = test_config();
    config.publish_interval = Duration::from_millis(1000);
    let producer = TestProducer::start(MemoryBroker::new(), config);

    tokio::time::sleep(Duration::from_millis(4_500)).await;

    assert_eq!(producer.stats().published, 5);
    producer.stop().await;
}

#[tokio::test(start_paused = true)]
async fn declares_durable_queue_and_persistent_messages() {
    let broker = MemoryBroker::new();
    let producer = TestProducer::start(broker.clone(), test_config());

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    producer.stop().await;

    assert!(broker.is_durable(QUEUE));

    // Durable queue + persistent messages survive a broker restart.
    broker.restart();
    assert_eq!(queued_ids(&broker), vec!["ALERT-TEST-1", "ALERT-TEST-2"]);
}

#[tokio::test(start_paused = true)]
async fn payload_is_alert_json() {
    let broker = MemoryBroker::new();
    let producer = TestProducer::start(broker.clone(), test_config());

    tokio::time::sleep(Duration::from_millis(100)).await;
    producer.stop().await;

    let payloads = broker.ready_payloads(QUEUE);
    let json: serde_json::Value = serde_json::from_slice(&payloads[0]).unwrap();
    assert_eq!(json["id"], "ALERT-TEST-1");
    assert_eq!(json["type"], "CRITICAL");
    assert_eq!(json["metadata"]["hostname"], "server-1");
    assert_eq!(json["timestamp"], "2024-06-10T06:13:20.000Z");

    let alert = Alert::from_payload(&payloads[0]).unwrap();
    assert_eq!(alert.system, "Payments");
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_session() {
    let broker = MemoryBroker::new();
    let producer = TestProducer::start(broker.clone(), test_config());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (report, _) = producer.stop().await;

    // No further publishes after shutdown.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(broker.publish_count(), 1);
    assert_eq!(report.attempts, 1);
}
