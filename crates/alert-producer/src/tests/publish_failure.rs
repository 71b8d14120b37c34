//! A failed publish drops that alert and the loop keeps going.

use super::harness::{queued_ids, test_config, TestProducer};
use alert_queue::MemoryBroker;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn refused_publish_drops_alert_and_continues() {
    let broker = MemoryBroker::new();
    broker.fail_next_publishes(1);
    let producer = TestProducer::start(broker.clone(), test_config());

    tokio::time::sleep(Duration::from_millis(10_500)).await;

    // ALERT-TEST-1 was refused and is not retried.
    assert_eq!(queued_ids(&broker), vec!["ALERT-TEST-2", "ALERT-TEST-3"]);

    let (report, stats) = producer.stop().await;
    assert_eq!(stats.published, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(report.attempts, 1);
    assert_eq!(broker.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_publish_times_out() {
    let broker = MemoryBroker::new();
    broker.stall_publishes(true);
    let producer = TestProducer::start(broker.clone(), test_config());

    // Publishes at 0s and 5s each wait the full 5s publish timeout.
    tokio::time::sleep(Duration::from_millis(11_000)).await;

    let stats = producer.stats();
    assert_eq!(stats.published, 0);
    assert_eq!(stats.failed, 2);
    assert_eq!(broker.connect_attempts(), 1);
    assert!(queued_ids(&broker).is_empty());

    let (report, _) = producer.stop().await;
    assert_eq!(report.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn publishing_resumes_after_stall_clears() {
    let broker = MemoryBroker::new();
    broker.stall_publishes(true);
    let producer = TestProducer::start(broker.clone(), test_config());

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    broker.stall_publishes(false);
    tokio::time::sleep(Duration::from_millis(4_000)).await;

    assert_eq!(queued_ids(&broker), vec!["ALERT-TEST-2"]);

    let (_, stats) = producer.stop().await;
    assert_eq!(stats.published, 1);
    assert_eq!(stats.failed, 1);
}
