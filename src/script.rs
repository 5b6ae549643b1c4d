use redis::aio::ConnectionLike;
use redis::Script;

use crate::error::{Error, Result};

/// `moveDelayed`: given the delayed zset and the ready list, atomically
/// move every envelope whose score (due-time-ms) has arrived onto the
/// ready list and return how many were moved.
///
/// `redis::Script` already implements the EVALSHA-then-EVAL-and-cache
/// protocol the distilled spec describes by hand (compute SHA1, ask the
/// server if it knows it, upload on a miss); that load-by-hash bookkeeping
/// is delegated to the driver rather than reimplemented here.
const MOVE_DELAYED_BODY: &str = r#"
local ready = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for i = 1, #ready do
    redis.call('LPUSH', KEYS[2], ready[i])
end
if #ready > 0 then
    redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
end
return #ready
"#;

#[derive(Debug, Clone)]
pub struct MoveDelayedScript {
    script: &'static Script,
}

impl Default for MoveDelayedScript {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveDelayedScript {
    pub fn new() -> Self {
        static SCRIPT: once_cell::sync::Lazy<Script> =
            once_cell::sync::Lazy::new(|| Script::new(MOVE_DELAYED_BODY));
        Self { script: &SCRIPT }
    }

    /// Invokes the script against `delayed_key`/`ready_key` with the given
    /// `now_ms`, returning the count of envelopes moved.
    pub async fn invoke<C>(&self, conn: &mut C, delayed_key: &str, ready_key: &str, now_ms: u64) -> Result<u64>
    where
        C: ConnectionLike + Send,
    {
        let count: u64 = self
            .script
            .key(delayed_key)
            .key(ready_key)
            .arg(now_ms)
            .invoke_async(conn)
            .await
            .map_err(Error::ScriptLoad)?;
        Ok(count)
    }
}
