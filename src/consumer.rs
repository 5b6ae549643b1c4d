//! Consumer (spec §4.E): dispatches to the unsafe or safe read loop and
//! surfaces decoded envelopes as [`crate::events::QueueEvent::Message`].
//!
//! Grounded on the teacher's `ipc::pubsub::Subscriber` read-loop shape
//! (spawn once, loop on a blocking receive, forward decoded payloads to a
//! channel) and on `jaymell-omniqueue-rs`'s `brpoplpush`-based safe-receive
//! pattern for the safe loop.

use std::time::{SystemTime, UNIX_EPOCH};

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::Codec;
use crate::events::{ErrorSource, EventBus};
use crate::keys::QueueKeys;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Owns the spawned read-loop task and the token used to cancel it on
/// `stop()`/`destroy()` (spec §5: cooperative cancellation, since the
/// async Redis client has no distinct "stream ended" error to break on).
pub struct Consumer {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Consumer {
    /// Starts the read loop appropriate for `safe_delivery` as a spawned
    /// task and returns immediately (spec §4.E, "start() returns before
    /// blocking begins").
    pub fn spawn(
        reader: MultiplexedConnection,
        keys: QueueKeys,
        codec: Codec,
        safe_delivery: bool,
        safe_delivery_ttl: std::time::Duration,
        events: EventBus,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();
        let task = if safe_delivery {
            tokio::spawn(safe_read_loop(reader, keys, codec, safe_delivery_ttl, events, task_shutdown))
        } else {
            tokio::spawn(unsafe_read_loop(reader, keys, codec, events, task_shutdown))
        };
        Self { shutdown, task }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}

/// Validates that `key` is this consumer's list key (otherwise the pop
/// raced with another queue sharing a connection and is silently
/// dropped), decodes `data`, and emits a `message` event. Decode failures
/// emit `error(_, OnMessage)` and are logged rather than propagated.
fn process(key: &str, data: &[u8], keys: &QueueKeys, codec: &Codec, events: &EventBus) {
    if key != keys.list() {
        return;
    }
    match codec.unpack(data) {
        Ok(envelope) => events.message(envelope.message, envelope.id, envelope.from),
        Err(err) => {
            tracing::warn!(%err, queue = keys.name(), "failed to decode envelope");
            events.error(err, ErrorSource::OnMessage);
        }
    }
}

async fn unsafe_read_loop(
    mut reader: MultiplexedConnection,
    keys: QueueKeys,
    codec: Codec,
    events: EventBus,
    shutdown: CancellationToken,
) {
    loop {
        let popped: redis::RedisResult<Option<(String, Vec<u8>)>> = tokio::select! {
            _ = shutdown.cancelled() => return,
            res = reader.brpop(keys.list(), 0.0) => res,
        };
        match popped {
            Ok(Some((key, data))) => process(&key, &data, &keys, &codec, &events),
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(%err, queue = keys.name(), "unsafe read loop error");
                events.error(err.into(), ErrorSource::OnReadUnsafe);
            }
        }
    }
}

async fn safe_read_loop(
    mut reader: MultiplexedConnection,
    keys: QueueKeys,
    codec: Codec,
    safe_delivery_ttl: std::time::Duration,
    events: EventBus,
    shutdown: CancellationToken,
) {
    loop {
        let expire_ms = now_ms() + safe_delivery_ttl.as_millis() as u64;
        let worker_key = keys.worker(&Uuid::new_v4(), expire_ms);

        let moved: redis::RedisResult<Option<Vec<u8>>> = tokio::select! {
            _ = shutdown.cancelled() => return,
            res = reader.brpoplpush(keys.list(), &worker_key, 0.0) => res,
        };

        let data = match moved {
            Ok(Some(data)) => data,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(%err, queue = keys.name(), "safe read loop error");
                events.error(err.into(), ErrorSource::OnReadSafe);
                continue;
            }
        };

        process(&keys.list(), &data, &keys, &codec, &events);

        let _: redis::RedisResult<()> = reader.del(&worker_key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn process_drops_mismatched_key() {
        let keys = QueueKeys::new("imq", "orders");
        let codec = Codec::Plain;
        let events = EventBus::new(4);
        let mut rx = events.subscribe();
        let envelope = crate::codec::Envelope::new(Uuid::new_v4(), "sender", json!({"a": 1}));
        let packed = codec.pack(&envelope).unwrap();

        process("imq:other", &packed, &keys, &codec, &events);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn process_emits_message_on_matching_key() {
        let keys = QueueKeys::new("imq", "orders");
        let codec = Codec::Plain;
        let events = EventBus::new(4);
        let mut rx = events.subscribe();
        let envelope = crate::codec::Envelope::new(Uuid::new_v4(), "sender", json!({"a": 1}));
        let packed = codec.pack(&envelope).unwrap();

        process(&keys.list(), &packed, &keys, &codec, &events);

        match rx.try_recv().unwrap() {
            crate::events::QueueEvent::Message { from, .. } => assert_eq!(from, "sender"),
            crate::events::QueueEvent::Error { .. } => panic!("expected message event"),
        }
    }

    #[test]
    fn process_emits_error_on_bad_payload() {
        let keys = QueueKeys::new("imq", "orders");
        let codec = Codec::Plain;
        let events = EventBus::new(4);
        let mut rx = events.subscribe();

        process(&keys.list(), b"not json", &keys, &codec, &events);

        match rx.try_recv().unwrap() {
            crate::events::QueueEvent::Error { source, .. } => {
                assert_eq!(source, ErrorSource::OnMessage)
            }
            crate::events::QueueEvent::Message { .. } => panic!("expected error event"),
        }
    }
}
