//! The connection triad (spec §4.A): one blocking `reader` per queue
//! instance, one shared non-blocking `writer` per `host:port` address, and
//! a per-address `watcher` (the watcher's own connection lives in
//! [`crate::watcher`] since its lifecycle — election, pubsub subscription —
//! is a distinct component).
//!
//! Grounded on the teacher's `ipc::pubsub::{Publisher, Subscriber}` split
//! (one writer, many independent readers) generalized from a local mmap
//! directory to a shared Redis connection, and on `dimfeld-ergo`'s pattern
//! of holding one pool/connection object on the queue and cloning it.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::config::QueueConfig;
use crate::error::Result;

/// Sets a human-readable client name so watcher-count can be derived from
/// `CLIENT LIST` (spec §4.A).
pub async fn set_client_name<C>(conn: &mut C, prefix: &str, queue_name: &str, channel: &str) -> Result<()>
where
    C: redis::aio::ConnectionLike + Send,
{
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let name = format!(
        "{prefix}:{queue_name}:{channel}:pid:{pid}:host:{hostname}",
        pid = std::process::id()
    );
    let _: () = redis::cmd("CLIENT")
        .arg("SETNAME")
        .arg(name)
        .query_async(conn)
        .await?;
    Ok(())
}

/// The reader half of the triad: a dedicated connection, since blocking
/// commands (`BRPOP`, `BRPOPLPUSH`) monopolize whatever connection issues
/// them.
pub struct Reader {
    pub conn: MultiplexedConnection,
}

impl Reader {
    pub async fn connect(cfg: &QueueConfig, queue_name: &str) -> Result<Self> {
        let client = redis::Client::open(cfg.redis_url())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        set_client_name(&mut conn, &cfg.prefix, queue_name, "reader").await?;
        Ok(Self { conn })
    }
}

struct WriterEntry {
    manager: ConnectionManager,
    refcount: usize,
}

/// Process-wide registry of shared writer connections, keyed by
/// `"host:port"`. One logical writer connection is reused across every
/// queue in the process talking to the same address (spec §4.A/§9).
#[derive(Default)]
pub struct WriterRegistry {
    inner: Mutex<HashMap<String, WriterEntry>>,
}

pub static WRITERS: Lazy<WriterRegistry> = Lazy::new(WriterRegistry::default);

impl WriterRegistry {
    /// Returns the shared writer for `cfg`'s address, creating it (and
    /// setting its client name) on first use. `start()` is idempotent:
    /// repeat calls for an address already present just bump the refcount.
    pub async fn acquire(&self, cfg: &QueueConfig, queue_name: &str) -> Result<ConnectionManager> {
        let key = cfg.address_key();
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.get_mut(&key) {
            entry.refcount += 1;
            return Ok(entry.manager.clone());
        }

        let client = redis::Client::open(cfg.redis_url())?;
        let mut manager = ConnectionManager::new(client).await?;
        set_client_name(&mut manager, &cfg.prefix, queue_name, "writer").await?;
        let handle = manager.clone();
        guard.insert(
            key,
            WriterEntry {
                manager,
                refcount: 1,
            },
        );
        Ok(handle)
    }

    /// Releases one reference to the writer for `cfg`'s address; the last
    /// `destroy()` to empty the map drops the underlying connection (spec
    /// §4.G, `destroy()`: "tear down the writer and forget it from the
    /// global writer map").
    pub async fn release(&self, cfg: &QueueConfig) {
        let key = cfg.address_key();
        let mut guard = self.inner.lock().await;
        let Some(entry) = guard.get_mut(&key) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            guard.remove(&key);
        }
    }

    /// Deletes `key` via the shared writer for `cfg`'s address, used by
    /// `clear()` and by tests; returns `Ok(())` even if the writer is
    /// absent (a queue that never called `start()` has nothing to clear).
    pub async fn del(&self, cfg: &QueueConfig, keys: &[String]) -> Result<()> {
        let key = cfg.address_key();
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.get_mut(&key) {
            if !keys.is_empty() {
                let _: () = entry.manager.del(keys).await?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn refcount(&self, cfg: &QueueConfig) -> Option<usize> {
        self.inner
            .lock()
            .await
            .get(&cfg.address_key())
            .map(|e| e.refcount)
    }
}
