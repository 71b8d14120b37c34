//! Connection failures restart the whole producer session after a fixed delay.

use super::harness::{queued_ids, test_config, SequenceSource, TestProducer};
use crate::Producer;
use alert_core::{Shutdown, Supervisor};
use alert_queue::{Broker, MemoryBroker, QueueConnection, QueueResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::test(start_paused = true)]
async fn retries_until_broker_is_reachable() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let producer = TestProducer::start(broker.clone(), test_config());

    // Attempts at 0s, 5s, 10s
    tokio::time::sleep(Duration::from_millis(12_000)).await;
    assert_eq!(broker.connect_attempts(), 3);
    assert_eq!(producer.stats().published, 0);

    broker.set_available(true);
    tokio::time::sleep(Duration::from_millis(3_500)).await;

    // Fourth attempt at 15s succeeds and publishes immediately.
    assert_eq!(broker.connect_attempts(), 4);
    assert_eq!(queued_ids(&broker), vec!["ALERT-TEST-1"]);

    let (report, _) = producer.stop().await;
    assert_eq!(report.attempts, 4);
    assert_eq!(report.failures, 3);
}

#[tokio::test(start_paused = true)]
async fn connection_lost_mid_session_reconnects() {
    let broker = MemoryBroker::new();
    let producer = TestProducer::start(broker.clone(), test_config());

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    broker.drop_connections();

    // 5s: publish fails, alert dropped, session ends.
    // 10s: new session publishes immediately.
    tokio::time::sleep(Duration::from_millis(8_000)).await;

    assert_eq!(broker.connect_attempts(), 2);
    assert_eq!(queued_ids(&broker), vec!["ALERT-TEST-1", "ALERT-TEST-3"]);

    let (report, stats) = producer.stop().await;
    assert_eq!(stats.published, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.failures, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_retry_delay_stops_immediately() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let producer = TestProducer::start(broker.clone(), test_config());

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let started = tokio::time::Instant::now();
    let (report, _) = producer.stop().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.attempts, 1);
    assert_eq!(broker.connect_attempts(), 1);
}

/// Broker whose connect never completes.
struct HangingBroker {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Broker for HangingBroker {
    async fn connect(&self, _url: &str) -> QueueResult<Box<dyn QueueConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn hung_connect_is_bounded_by_connect_timeout() {
    let attempts = Arc::new(AtomicU32::new(0));
    let broker = HangingBroker {
        attempts: attempts.clone(),
    };
    let config = test_config();
    let supervisor = Supervisor::new("producer", config.reconnect_delay);
    let mut producer = Producer::new(Arc::new(broker), Box::new(SequenceSource::new()), config);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let shutdown = Shutdown::new(shutdown_rx);
    let handle = tokio::spawn(async move { supervisor.run(&mut producer, shutdown).await });

    // 10s timeout + 5s delay per attempt: starts at 0s, 15s, 30s
    tokio::time::sleep(Duration::from_millis(31_000)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    shutdown_tx.send(()).unwrap();
    let report = handle.await.unwrap();
    assert_eq!(report.failures, 2);
}
