use uuid::Uuid;

/// Derives the Redis key namespace for a queue, per the data model in §3.
///
/// Kept as a small typed helper rather than formatting strings at every
/// call site, following the teacher's preference for free functions over
/// a path/key type (`bus::ready::mark_ready`, `discovery::scan_ready_strategies`).
#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
    name: String,
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `"<prefix>:<name>"` — the ready FIFO list.
    pub fn list(&self) -> String {
        format!("{}:{}", self.prefix, self.name)
    }

    /// `"<prefix>:<name>:delayed"` — sorted set of scheduled envelopes.
    pub fn delayed(&self) -> String {
        format!("{}:{}:delayed", self.prefix, self.name)
    }

    /// `"<prefix>:<name>:<id>:ttl"` — the expiry beacon for one delayed message.
    pub fn ttl(&self, id: &Uuid) -> String {
        format!("{}:{}:{}:ttl", self.prefix, self.name, id)
    }

    /// `"<prefix>:<name>:worker:<uuid>:<expire_ms>"` — a safe-delivery worker list.
    pub fn worker(&self, worker_id: &Uuid, expire_ms: u64) -> String {
        format!(
            "{}:{}:worker:{}:{}",
            self.prefix, self.name, worker_id, expire_ms
        )
    }

    /// `"<prefix>:watch:lock"` — the watcher-election mutex, shared by every
    /// queue under this prefix regardless of queue name.
    pub fn lock(&self) -> String {
        format!("{}:watch:lock", self.prefix)
    }

    /// Glob pattern matching every worker key under this queue's list,
    /// used by the sweeper's `SCAN`.
    pub fn worker_scan_pattern(&self) -> String {
        format!("{}:{}:worker:*", self.prefix, self.name)
    }

    /// Glob pattern matching every worker key under this prefix, across all
    /// queue names — what the watcher owner actually scans, since one
    /// watcher serves every queue sharing its prefix.
    pub fn worker_scan_pattern_all(&self) -> String {
        format!("{}:*:worker:*", self.prefix)
    }
}

/// Derives the `list` key for a queue from a fully-qualified worker key,
/// `"<prefix>:<name>:worker:<uuid>:<expire_ms>"` -> `"<prefix>:<name>"`,
/// and the trailing `expire_ms`, or `None` if the key does not match that shape.
pub fn parse_worker_key(worker_key: &str) -> Option<(String, u64)> {
    let parts: Vec<&str> = worker_key.split(':').collect();
    if parts.len() < 4 {
        return None;
    }
    if parts[parts.len() - 3] != "worker" {
        return None;
    }
    let expire_ms: u64 = parts[parts.len() - 1].parse().ok()?;
    let list_key = parts[..parts.len() - 3].join(":");
    Some((list_key, expire_ms))
}

/// Derives the `list` key for a queue from an expired TTL beacon key,
/// `"<prefix>:<name>:<id>:ttl"` -> `"<prefix>:<name>"`, per §4.F's keyspace
/// notification handling (drop the last two segments, `ttl` and the id).
pub fn parse_ttl_key(expired_key: &str) -> Option<String> {
    let parts: Vec<&str> = expired_key.split(':').collect();
    if parts.len() < 3 || parts[parts.len() - 1] != "ttl" {
        return None;
    }
    Some(parts[..parts.len() - 2].join(":"))
}
