use thiserror::Error;

/// Every failure mode `imq` surfaces, grouped by the kind taxonomy in the
/// design notes rather than by which internal module raised it.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing/invalid configuration discovered at `start()` (e.g. no queue name).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connection error, unexpected end, or reconnect signal from the driver.
    /// `ConnectionManager` absorbs most of these; this variant covers what
    /// still surfaces to callers (e.g. the initial connect).
    #[error("transport error: {0}")]
    Transport(#[source] redis::RedisError),

    /// A packed envelope failed to decode.
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// The server refused to cache or could not be asked for a script.
    #[error("script load error: {0}")]
    ScriptLoad(#[source] redis::RedisError),

    /// `CONFIG SET notify-keyspace-events` was refused by the server.
    #[error("keyspace-events config error: {0}")]
    KeyspaceConfig(#[source] redis::RedisError),

    /// The safe-delivery sweeper hit a server error during SCAN/RPOPLPUSH.
    #[error("safe-delivery sweep error: {0}")]
    SafeDeliverySweep(#[source] redis::RedisError),

    /// A producer `send` failed to reach the server.
    #[error("send error: {0}")]
    Send(#[source] redis::RedisError),

    /// An I/O failure outside of the Redis transport (e.g. hostname lookup).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<redis::RedisError> for Error {
    fn from(value: redis::RedisError) -> Self {
        Error::Transport(value)
    }
}
