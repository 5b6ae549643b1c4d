//! Watcher election, delayed-message promotion, and safe-delivery rescue
//! (spec §4.F). Exactly one process per `(host, port, prefix)` owns the
//! watcher role at a time.
//!
//! Grounded on the teacher's `bus::ready::{mark_ready, is_ready}` —
//! generalized from a filesystem marker to a `SETNX`'d Redis key — and on
//! `bus::discovery`'s poll-and-diff shape for the sweeper's periodic
//! scan-and-act loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use once_cell::sync::Lazy;
use rand::Rng;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::events::{ErrorSource, EventBus};
use crate::keys::{parse_ttl_key, parse_worker_key};
use crate::script::MoveDelayedScript;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// State shared by everything that needs to know "does this process own
/// the watcher lock for this address+prefix".
pub struct WatcherHandle {
    lock_key: String,
    owner: AtomicBool,
    client: redis::Client,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WatcherHandle {
    pub fn is_owner(&self) -> bool {
        self.owner.load(Ordering::SeqCst)
    }

    /// Releases the lock if owned. Safe to call multiple times, and from
    /// both `destroy()` and the process signal handler.
    pub async fn release(&self) {
        if !self.owner.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        if let Ok(mut conn) = self.client.get_multiplexed_async_connection().await {
            let _: redis::RedisResult<()> = conn.del(&self.lock_key).await;
        }
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }
}

/// Process-wide registry of watcher handles, keyed by `"host:port:prefix"`
/// (one address can host multiple logical queue systems distinguished only
/// by `prefix`, and the election lock itself is prefix-scoped, so the
/// registry key includes the prefix even though §4.A describes the raw
/// connection map as keyed by address alone).
#[derive(Default)]
pub struct WatcherRegistry {
    inner: Mutex<HashMap<String, Arc<WatcherHandle>>>,
}

pub static WATCHERS: Lazy<Arc<WatcherRegistry>> = Lazy::new(|| Arc::new(WatcherRegistry::default()));

impl WatcherRegistry {
    fn registry_key(cfg: &QueueConfig) -> String {
        format!("{}:{}", cfg.address_key(), cfg.prefix)
    }

    /// Returns the existing handle for this address+prefix, or runs
    /// election and installs a new one. Multiple queues in the same
    /// process sharing an address+prefix therefore share one watcher.
    pub async fn get_or_init(
        &self,
        cfg: &QueueConfig,
        events: EventBus,
    ) -> Result<Arc<WatcherHandle>> {
        let reg_key = Self::registry_key(cfg);
        let mut guard = self.inner.lock().await;
        if let Some(handle) = guard.get(&reg_key) {
            return Ok(Arc::clone(handle));
        }

        let handle = init_watcher(cfg, events).await?;
        guard.insert(reg_key, Arc::clone(&handle));
        Ok(handle)
    }

    pub async fn remove(&self, cfg: &QueueConfig) {
        let reg_key = Self::registry_key(cfg);
        if let Some(handle) = self.inner.lock().await.remove(&reg_key) {
            handle.release().await;
        }
    }

    /// Releases every watcher lock this process currently owns, regardless
    /// of address/prefix — used by the SIGINT/SIGTERM handler (spec §4.G).
    pub async fn release_all_owned(&self) {
        let handles: Vec<_> = self.inner.lock().await.values().cloned().collect();
        for handle in handles {
            if handle.is_owner() {
                handle.release().await;
            }
        }
    }
}

/// Counts currently-connected clients whose name matches
/// `"<prefix>:*:watcher:*"`, by issuing `CLIENT LIST` and scanning the
/// `name=` field of each line (spec §4.F, election).
async fn count_watcher_clients<C>(conn: &mut C, prefix: &str) -> Result<usize>
where
    C: redis::aio::ConnectionLike + Send,
{
    let raw: String = redis::cmd("CLIENT")
        .arg("LIST")
        .query_async(conn)
        .await?;
    let prefix_tag = format!("{prefix}:");
    let count = raw
        .lines()
        .filter_map(|line| line.split_whitespace().find(|tok| tok.starts_with("name=")))
        .map(|tok| &tok["name=".len()..])
        .filter(|name| name.starts_with(&prefix_tag) && name.contains(":watcher:"))
        .count();
    Ok(count)
}

/// Attempts to become the watcher owner via `SETNX` on the lock key.
async fn try_own_lock<C>(conn: &mut C, lock_key: &str) -> Result<bool>
where
    C: redis::aio::ConnectionLike + Send,
{
    let acquired: bool = redis::cmd("SET")
        .arg(lock_key)
        .arg("")
        .arg("NX")
        .query_async::<_, Option<String>>(conn)
        .await
        .map(|res| res.is_some())?;
    Ok(acquired)
}

/// Runs the election state machine described in spec §4.F and, on success,
/// spawns the owner's subscription + sweeper task.
async fn init_watcher(cfg: &QueueConfig, events: EventBus) -> Result<Arc<WatcherHandle>> {
    let lock_key = format!("{}:watch:lock", cfg.prefix);
    let client = redis::Client::open(cfg.redis_url())?;
    let mut conn = client.get_multiplexed_async_connection().await?;

    let watcher_clients = count_watcher_clients(&mut conn, &cfg.prefix).await.unwrap_or(0);

    let mut owns = false;
    if watcher_clients == 0 {
        owns = try_own_lock(&mut conn, &lock_key).await?;
        if !owns {
            // Someone else holds the lock but no watcher client is visible:
            // back off a little, then assume a stale lock left by a crashed
            // owner and reclaim it (spec §4.F, §9).
            let backoff_ms = rand::thread_rng().gen_range(1..=50);
            tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            let still_absent = count_watcher_clients(&mut conn, &cfg.prefix).await.unwrap_or(0) == 0;
            if still_absent {
                let _: redis::RedisResult<()> = conn.del(&lock_key).await;
                owns = try_own_lock(&mut conn, &lock_key).await?;
            }
        }
    }

    let shutdown = CancellationToken::new();
    let handle = Arc::new(WatcherHandle {
        lock_key: lock_key.clone(),
        owner: AtomicBool::new(owns),
        client: client.clone(),
        shutdown: shutdown.clone(),
        task: Mutex::new(None),
    });

    if owns {
        let cfg = cfg.clone();
        let task_client = client;
        let task_shutdown = shutdown;
        let task_events = events;
        let join = tokio::spawn(async move {
            if let Err(err) = run_owner(cfg, task_client, task_shutdown, task_events.clone()).await {
                task_events.error(err, ErrorSource::OnWatch);
            }
        });
        *handle.task.lock().await = Some(join);
    }

    Ok(handle)
}

/// The owner's main loop: configure keyspace notifications, subscribe, and
/// run the safe-delivery sweeper alongside it until shutdown.
async fn run_owner(
    cfg: QueueConfig,
    client: redis::Client,
    shutdown: CancellationToken,
    events: EventBus,
) -> Result<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;

    if let Err(err) = configure_keyspace_notifications(&mut conn).await {
        events.error(err, ErrorSource::OnConfig);
        // Delayed promotion is disabled, but the owner stays subscribed —
        // the one-shot processDelayed() at start() is still the backstop.
    }

    let pubsub_conn = client.get_async_connection().await?;
    let mut pubsub = pubsub_conn.into_pubsub();
    pubsub.psubscribe("__keyevent@0__:expired").await?;
    pubsub.psubscribe(format!("{}:delayed:*", cfg.prefix)).await?;

    let script = MoveDelayedScript::new();
    let mut sweep_conn = client.get_multiplexed_async_connection().await?;
    let mut sweep_interval = tokio::time::interval(cfg.safe_delivery_ttl);
    let safe_delivery = cfg.safe_delivery;
    let prefix = cfg.prefix.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                return Ok(());
            }
            msg = pubsub.on_message().next() => {
                let Some(msg) = msg else { return Ok(()) };
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if let Some(list_key) = parse_ttl_key(&payload) {
                    if let Err(err) = process_delayed(&mut conn, &script, &list_key).await {
                        let source = match err {
                            Error::ScriptLoad(_) => ErrorSource::OnScriptLoad,
                            _ => ErrorSource::OnProcessDelayed,
                        };
                        events.error(err, source);
                    }
                }
            }
            _ = sweep_interval.tick(), if safe_delivery => {
                if let Err(err) = sweep_once(&mut sweep_conn, &prefix).await {
                    events.error(err, ErrorSource::OnSafeDelivery);
                    return Ok(());
                }
            }
        }
    }
}

async fn configure_keyspace_notifications<C>(conn: &mut C) -> Result<()>
where
    C: redis::aio::ConnectionLike + Send,
{
    let _: () = redis::cmd("CONFIG")
        .arg("SET")
        .arg("notify-keyspace-events")
        .arg("Ex")
        .query_async(conn)
        .await
        .map_err(Error::KeyspaceConfig)?;
    Ok(())
}

/// Moves every ready delayed envelope for `list_key` onto the ready list
/// (spec §4.F / §4.C).
pub async fn process_delayed<C>(conn: &mut C, script: &MoveDelayedScript, list_key: &str) -> Result<u64>
where
    C: redis::aio::ConnectionLike + Send,
{
    let delayed_key = format!("{list_key}:delayed");
    script.invoke(conn, &delayed_key, list_key, now_ms()).await
}

/// One pass of the safe-delivery sweeper: `SCAN`s worker keys in pages of
/// 1000 and returns the tail of any whose grace window has elapsed back
/// onto their parent list.
///
/// Per the open question in spec §9, this implements `expire_ms <= now`
/// (rescue stalled workers) rather than the original's likely-inverted
/// `>= now` comparison — the stated intent (rescue stalled work) is the
/// behavior implemented here.
async fn sweep_once<C>(conn: &mut C, prefix: &str) -> Result<()>
where
    C: redis::aio::ConnectionLike + Send,
{
    let pattern = format!("{prefix}:*:worker:*");
    let mut cursor: u64 = 0;
    let now = now_ms();
    loop {
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(&pattern)
            .arg("COUNT")
            .arg(1000)
            .query_async(conn)
            .await
            .map_err(Error::SafeDeliverySweep)?;

        for worker_key in keys {
            let Some((list_key, expire_ms)) = parse_worker_key(&worker_key) else {
                continue;
            };
            if expire_ms <= now {
                let _: redis::RedisResult<Option<String>> =
                    conn.rpoplpush(&worker_key, &list_key).await;
            }
        }

        cursor = next_cursor;
        if cursor == 0 {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_client_name_matches_election_filter() {
        let name = "imq:orders:watcher:pid:123:host:box";
        let prefix_tag = "imq:";
        assert!(name.starts_with(prefix_tag) && name.contains(":watcher:"));
    }

    #[test]
    fn non_watcher_client_name_does_not_match() {
        let name = "imq:orders:reader:pid:123:host:box";
        assert!(!name.contains(":watcher:"));
    }

    #[tokio::test]
    async fn registry_releases_all_owned_handles() {
        let registry = WatcherRegistry::default();
        let handle = Arc::new(WatcherHandle {
            lock_key: "imq:watch:lock".to_string(),
            owner: AtomicBool::new(true),
            client: redis::Client::open("redis://localhost:6399").unwrap(),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        });
        registry
            .inner
            .lock()
            .await
            .insert("localhost:6399:imq".to_string(), Arc::clone(&handle));

        // release() will fail to reach a real server (port 6399 is not
        // listening); it must still flip the owner flag so a second call
        // is a no-op, matching "safe to call multiple times".
        handle.release().await;
        assert!(!handle.is_owner());
        handle.release().await;
        assert!(!handle.is_owner());
    }
}
