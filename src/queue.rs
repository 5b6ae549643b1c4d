//! `Queue`: the public entry point, tying together the connection triad,
//! producer, consumer, watcher, and event bus behind `start`/`stop`/
//! `destroy`/`clear` (spec §4.G).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::codec::Codec;
use crate::config::QueueConfig;
use crate::connection::{Reader, WRITERS};
use crate::consumer::Consumer;
use crate::error::{Error, Result};
use crate::events::{ErrorSource, EventBus};
use crate::keys::QueueKeys;
use crate::producer::{OnSendError, Producer};
use crate::script::MoveDelayedScript;
use crate::signal;
use crate::watcher::WATCHERS;

struct Started {
    producer: Producer,
    consumer: Consumer,
}

/// One named queue. Wrap in an `Arc` to share a single queue instance
/// across tasks; `start`/`stop`/`destroy`/`clear` take `&self` and
/// serialize through an internal mutex.
pub struct Queue {
    cfg: QueueConfig,
    name: String,
    codec: Codec,
    events: EventBus,
    started: Mutex<Option<Started>>,
}

impl Queue {
    /// Builds a queue bound to `name`; nothing is connected until
    /// `start()` runs (spec §4.G step 1: a missing name is the only
    /// blocking error, enforced here by requiring it up front).
    pub fn new(cfg: QueueConfig, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Configuration("queue name must not be empty".to_string()));
        }
        let codec = Codec::from_use_gzip(cfg.use_gzip);
        Ok(Self {
            cfg,
            name,
            codec,
            events: EventBus::new(256),
            started: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to this queue's `message`/`error` event surface (spec
    /// §6). Lagging subscribers drop the oldest unread events rather than
    /// stalling the queue.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::events::QueueEvent> {
        self.events.subscribe()
    }

    /// Idempotent: a second `start()` while already started is a no-op
    /// and leaves connection counts unchanged (spec §8, "start idempotence").
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.started.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let keys = QueueKeys::new(self.cfg.prefix.clone(), self.name.clone());

        let (reader, writer) = tokio::try_join!(
            Reader::connect(&self.cfg, &self.name),
            WRITERS.acquire(&self.cfg, &self.name),
        )?;

        signal::install_once(Arc::clone(&WATCHERS));

        let _watcher_handle = WATCHERS.get_or_init(&self.cfg, self.events.clone()).await?;

        let mut flush_writer = writer.clone();
        let producer = Producer::new(writer, self.cfg.prefix.clone(), self.name.clone(), self.codec);

        let consumer = Consumer::spawn(
            reader.conn,
            keys.clone(),
            self.codec,
            self.cfg.safe_delivery,
            self.cfg.safe_delivery_ttl,
            self.events.clone(),
        );

        *guard = Some(Started { producer, consumer });
        drop(guard);

        // One-shot flush of anything already due before this process came
        // up (spec §4.G step 7).
        if let Err(err) = Self::process_delayed_once(&mut flush_writer, &keys).await {
            let source = match err {
                Error::ScriptLoad(_) => ErrorSource::OnScriptLoad,
                _ => ErrorSource::OnProcessDelayed,
            };
            self.events.error(err, source);
        }

        Ok(())
    }

    async fn process_delayed_once(writer: &mut redis::aio::ConnectionManager, keys: &QueueKeys) -> Result<()> {
        let script = MoveDelayedScript::new();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        script.invoke(writer, &keys.delayed(), &keys.list(), now).await?;
        Ok(())
    }

    /// Sends `message` to `to_queue` via this queue's shared writer,
    /// calling `start()` first if not already started (spec §4.D).
    pub async fn send(
        &self,
        to_queue: &str,
        message: serde_json::Value,
        delay: Option<Duration>,
        on_error: Option<OnSendError>,
    ) -> Result<uuid::Uuid> {
        self.start().await?;
        let guard = self.started.lock().await;
        let started = guard.as_ref().expect("start() just ensured Some");
        Ok(started.producer.send(to_queue, message, delay, on_error).await)
    }

    /// Tears down the reader only; the writer and watcher survive for the
    /// rest of the process (spec §4.G, `stop()`).
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.started.lock().await;
        if let Some(started) = guard.take() {
            started.consumer.stop();
        }
        Ok(())
    }

    /// Full teardown: stops the reader, releases this process's watcher
    /// lock if held, then releases this queue's reference to the shared
    /// writer (spec §4.G, `destroy()`).
    pub async fn destroy(&self) -> Result<()> {
        self.stop().await?;
        WATCHERS.remove(&self.cfg).await;
        WRITERS.release(&self.cfg).await;
        Ok(())
    }

    /// Deletes `LIST(q)` and `ZSET(q)` only; other queues sharing the
    /// writer are untouched (spec §8, "clear scope").
    pub async fn clear(&self) -> Result<()> {
        let keys = QueueKeys::new(self.cfg.prefix.clone(), self.name.clone());
        WRITERS
            .del(&self.cfg, &[keys.list(), keys.delayed()])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        let cfg = QueueConfig::default();
        assert!(Queue::new(cfg, "").is_err());
        assert!(Queue::new(QueueConfig::default(), "   ").is_err());
    }

    #[test]
    fn accepts_nonempty_name() {
        let cfg = QueueConfig::default();
        let queue = Queue::new(cfg, "orders").unwrap();
        assert_eq!(queue.name(), "orders");
    }
}
