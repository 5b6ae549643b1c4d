//! Behavioral properties that need a live Redis-compatible server.
//!
//! Run with `REDIS_HOST`/`REDIS_PORT` pointed at a disposable instance and
//! `cargo test -- --ignored`; the default `cargo test` run skips these.

use std::time::Duration;

use imq::queue::Queue;
use imq::QueueConfig;
use serde_json::json;

fn test_config(prefix: &str) -> QueueConfig {
    let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("REDIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379);
    QueueConfig::new().host(host).port(port).prefix(prefix)
}

#[tokio::test]
#[ignore = "requires a local redis-compatible server on 127.0.0.1:6379"]
async fn fifo_single_producer() {
    let cfg = test_config("imq-test-fifo");
    let queue = Queue::new(cfg, "orders").unwrap();
    queue.start().await.unwrap();
    let mut events = queue.subscribe();

    queue.send("orders", json!({"seq": 1}), None, None).await.unwrap();
    queue.send("orders", json!({"seq": 2}), None, None).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("first message")
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("second message")
        .unwrap();

    match (first, second) {
        (
            imq::QueueEvent::Message { payload: p1, .. },
            imq::QueueEvent::Message { payload: p2, .. },
        ) => {
            assert_eq!(p1["seq"], 1);
            assert_eq!(p2["seq"], 2);
        }
        _ => panic!("expected two message events in order"),
    }

    queue.clear().await.unwrap();
    queue.destroy().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local redis-compatible server on 127.0.0.1:6379"]
async fn delayed_message_is_not_visible_before_due_time() {
    let cfg = test_config("imq-test-delayed");
    let queue = Queue::new(cfg, "scheduled").unwrap();
    queue.start().await.unwrap();
    let mut events = queue.subscribe();

    queue
        .send("scheduled", json!({"x": "hi"}), Some(Duration::from_millis(400)), None)
        .await
        .unwrap();

    let early = tokio::time::timeout(Duration::from_millis(250), events.recv()).await;
    assert!(early.is_err(), "message should not be visible before its due time");

    let late = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("message after due time")
        .unwrap();
    match late {
        imq::QueueEvent::Message { payload, .. } => assert_eq!(payload["x"], "hi"),
        imq::QueueEvent::Error { error, .. } => panic!("unexpected error event: {error}"),
    }

    queue.clear().await.unwrap();
    queue.destroy().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local redis-compatible server on 127.0.0.1:6379"]
async fn gzip_round_trips_between_matching_codecs() {
    let cfg = test_config("imq-test-gzip").use_gzip(true);
    let queue = Queue::new(cfg, "compressed").unwrap();
    queue.start().await.unwrap();
    let mut events = queue.subscribe();

    queue
        .send("compressed", json!({"payload": "z".repeat(256)}), None, None)
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("message")
        .unwrap();
    match received {
        imq::QueueEvent::Message { payload, .. } => {
            assert_eq!(payload["payload"], "z".repeat(256));
        }
        imq::QueueEvent::Error { error, .. } => panic!("unexpected error event: {error}"),
    }

    queue.clear().await.unwrap();
    queue.destroy().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local redis-compatible server on 127.0.0.1:6379"]
async fn start_is_idempotent() {
    let cfg = test_config("imq-test-idempotent");
    let queue = Queue::new(cfg, "idempotent").unwrap();
    queue.start().await.unwrap();
    queue.start().await.unwrap();
    queue.destroy().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local redis-compatible server on 127.0.0.1:6379"]
async fn clear_only_touches_this_queues_keys() {
    let cfg = test_config("imq-test-clear");
    let other_cfg = cfg.clone();
    let queue = Queue::new(cfg, "a").unwrap();
    let other = Queue::new(other_cfg, "b").unwrap();
    queue.start().await.unwrap();
    other.start().await.unwrap();

    queue.send("a", json!({"v": 1}), None, None).await.unwrap();
    other.send("b", json!({"v": 2}), None, None).await.unwrap();

    queue.clear().await.unwrap();

    let mut other_events = other.subscribe();
    let still_there = tokio::time::timeout(Duration::from_millis(500), other_events.recv()).await;
    assert!(still_there.is_ok(), "clearing queue 'a' must not affect queue 'b'");

    queue.destroy().await.unwrap();
    other.destroy().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a local redis-compatible server on 127.0.0.1:6379"]
async fn safe_delivery_rescues_after_consumer_crash() {
    let cfg = test_config("imq-test-safe").safe_delivery(true).safe_delivery_ttl(Duration::from_millis(300));
    let producer = Queue::new(cfg.clone(), "safe").unwrap();
    producer.start().await.unwrap();
    producer.send("safe", json!({"critical": true}), None, None).await.unwrap();

    // First consumer: starts the safe read loop, then is dropped mid-flight
    // (simulating a crash) before it can delete its worker list.
    {
        let consumer_a = Queue::new(cfg.clone(), "safe").unwrap();
        consumer_a.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Dropped without destroy(): its worker list is left stranded for
        // the sweeper to find.
    }

    let consumer_b = Queue::new(cfg, "safe").unwrap();
    consumer_b.start().await.unwrap();
    let mut events = consumer_b.subscribe();

    let rescued = tokio::time::timeout(Duration::from_millis(1200), events.recv()).await;
    assert!(rescued.is_ok(), "stalled envelope should be rescued within safe_delivery_ttl + epsilon");

    producer.destroy().await.unwrap();
    consumer_b.destroy().await.unwrap();
}
