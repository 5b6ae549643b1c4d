use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Error;

/// Where an [`QueueEvent::Error`] originated, mirroring the `source` tag in
/// the distilled spec's event surface (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    OnMessage,
    OnWatch,
    OnConfig,
    OnSafeDelivery,
    OnScriptLoad,
    OnReadUnsafe,
    OnReadSafe,
    OnProcessDelayed,
}

impl ErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSource::OnMessage => "OnMessage",
            ErrorSource::OnWatch => "OnWatch",
            ErrorSource::OnConfig => "OnConfig",
            ErrorSource::OnSafeDelivery => "OnSafeDelivery",
            ErrorSource::OnScriptLoad => "OnScriptLoad",
            ErrorSource::OnReadUnsafe => "OnReadUnsafe",
            ErrorSource::OnReadSafe => "OnReadSafe",
            ErrorSource::OnProcessDelayed => "OnProcessDelayed",
        }
    }
}

/// The observable event surface embedders subscribe to via
/// [`crate::Queue::subscribe`]. There is no guaranteed-delivery channel
/// here: `broadcast` drops the oldest entries for a lagging subscriber
/// rather than blocking the queue on a slow embedder.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Message {
        payload: Value,
        id: Uuid,
        from: String,
    },
    Error {
        error: std::sync::Arc<Error>,
        source: ErrorSource,
    },
}

/// Fan-out broadcaster shared by the producer/consumer/watcher tasks of one
/// `Queue`. Kept as a thin wrapper so call sites read `events.message(..)`
/// / `events.error(..)` instead of constructing variants inline everywhere.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn message(&self, payload: Value, id: Uuid, from: String) {
        let _ = self.tx.send(QueueEvent::Message { payload, id, from });
    }

    pub fn error(&self, error: Error, source: ErrorSource) {
        let _ = self.tx.send(QueueEvent::Error {
            error: std::sync::Arc::new(error),
            source,
        });
    }
}
