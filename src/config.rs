use std::time::Duration;

/// Configuration for a [`crate::Queue`].
///
/// Mirrors the teacher's convention of a plain-data config struct
/// separate from the runtime object it configures (`WriterConfig`,
/// `ReaderConfig`): nothing here holds a connection.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub prefix: String,
    pub use_gzip: bool,
    pub safe_delivery: bool,
    pub safe_delivery_ttl: Duration,
    /// Reserved for a future watcher heartbeat; not consulted anywhere yet.
    pub watcher_check_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            prefix: "imq".to_string(),
            use_gzip: false,
            safe_delivery: false,
            safe_delivery_ttl: Duration::from_millis(5000),
            watcher_check_delay: Duration::from_millis(5000),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn use_gzip(mut self, use_gzip: bool) -> Self {
        self.use_gzip = use_gzip;
        self
    }

    pub fn safe_delivery(mut self, safe_delivery: bool) -> Self {
        self.safe_delivery = safe_delivery;
        self
    }

    pub fn safe_delivery_ttl(mut self, ttl: Duration) -> Self {
        self.safe_delivery_ttl = ttl;
        self
    }

    /// `"host:port"`, the key under which the writer and watcher registries
    /// share connections for this address.
    pub fn address_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 6379);
        assert_eq!(cfg.prefix, "imq");
        assert!(!cfg.use_gzip);
        assert!(!cfg.safe_delivery);
        assert_eq!(cfg.safe_delivery_ttl, Duration::from_millis(5000));
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = QueueConfig::new()
            .host("redis.internal")
            .port(7000)
            .prefix("app")
            .use_gzip(true)
            .safe_delivery(true);
        assert_eq!(cfg.address_key(), "redis.internal:7000");
        assert_eq!(cfg.redis_url(), "redis://redis.internal:7000");
        assert!(cfg.use_gzip);
        assert!(cfg.safe_delivery);
    }
}
