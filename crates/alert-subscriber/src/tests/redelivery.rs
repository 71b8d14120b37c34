//! At-least-once delivery: unsettled messages come back and the duplicate
//! path absorbs them.

use super::harness::{alert, drain, payload, test_config, TestSubscriber, QUEUE};
use crate::SubscriberEvent;
use alert_core::{Alert, AlertType};
use alert_queue::{Broker, MemoryBroker};
use alert_store::{AlertStore, NewAlertRow};
use chrono::Utc;
use tempfile::tempdir;

#[tokio::test]
async fn stored_but_unacked_message_is_acked_as_duplicate() {
    let broker = MemoryBroker::new();
    let store = AlertStore::open_in_memory().await.unwrap();
    let message_id = broker.inject(QUEUE, &payload("A1", AlertType::Critical));

    // A previous subscriber stored A1 and died before acking.
    let connection = broker.connect("memory://test").await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    let delivery = channel.fetch(QUEUE).await.unwrap().unwrap();
    let first = Alert::from_payload(&delivery.payload).unwrap();
    store
        .insert(NewAlertRow::from_alert(&first, Utc::now()))
        .await
        .unwrap();
    connection.close().await.unwrap();
    assert_eq!(broker.ready_count(QUEUE), 1);

    let mut subscriber = TestSubscriber::start_with(broker.clone(), store, test_config());
    subscriber.wait_for_acks(1).await;

    assert_eq!(broker.deliveries_of(&message_id), 2);
    assert_eq!(subscriber.total_count().await, 1);
    assert_eq!(broker.reject_count(), 0);

    let events = drain(&mut subscriber.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SubscriberEvent::Received { redelivered: true, alert, .. } if alert.id == "A1"
    )));

    let counters = subscriber.stop_counters().await;
    assert_eq!(counters.duplicates, 1);
    assert_eq!(counters.stored, 0);
}

#[tokio::test]
async fn every_published_id_is_stored_exactly_once() {
    let broker = MemoryBroker::new();
    let ids: Vec<String> = (0..10).map(|i| format!("ALERT-{i}")).collect();
    for id in &ids {
        broker.inject(QUEUE, &payload(id, AlertType::Info));
    }
    // One simulated redelivery.
    broker.inject(QUEUE, &payload(&ids[3], AlertType::Info));

    let subscriber = TestSubscriber::start(broker.clone()).await;
    subscriber.wait_for_acks(ids.len() + 1).await;

    assert_eq!(subscriber.total_count().await, ids.len() as i64);
    for id in &ids {
        assert!(subscriber.store.get(id).await.unwrap().is_some(), "{id} missing");
    }

    subscriber.stop().await;
}

#[tokio::test]
async fn message_left_unsettled_by_shutdown_is_redelivered() {
    let broker = MemoryBroker::new();
    let store = AlertStore::open_in_memory().await.unwrap();

    // Hold a delivery on a connection that is torn down by a broker reset.
    let connection = broker.connect("memory://test").await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    broker.inject(QUEUE, &alert("A7", AlertType::Warning).to_payload().unwrap());
    let held = channel.fetch(QUEUE).await.unwrap().unwrap();
    assert!(!held.redelivered);
    broker.drop_connections();

    let subscriber = TestSubscriber::start_with(broker.clone(), store, test_config());
    subscriber.wait_for_acks(1).await;

    assert_eq!(subscriber.total_count().await, 1);
    let counters = subscriber.stop_counters().await;
    assert_eq!(counters.stored, 1);
}

#[tokio::test]
async fn duplicate_detected_across_store_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("data").join("alerts.db");
    let broker = MemoryBroker::new();

    let store = AlertStore::open(&db_path).await.unwrap();
    let subscriber = TestSubscriber::start_with(broker.clone(), store, test_config());
    broker.inject(QUEUE, &payload("A1", AlertType::Error));
    subscriber.wait_for_acks(1).await;
    let (_, first) = subscriber.stop().await;
    first.finish().await.unwrap();

    // Same alert arrives again after a restart.
    let store = AlertStore::open(&db_path).await.unwrap();
    let subscriber = TestSubscriber::start_with(broker.clone(), store, test_config());
    broker.inject(QUEUE, &payload("A1", AlertType::Error));
    subscriber.wait_for_acks(2).await;

    assert_eq!(subscriber.total_count().await, 1);
    let counters = subscriber.stop_counters().await;
    assert_eq!(counters.duplicates, 1);
}
