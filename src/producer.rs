//! Producer (spec §4.D): pushes to the ready list, or schedules a delayed
//! envelope via the delayed zset + TTL beacon. Fire-and-forget: `send`
//! returns the envelope id before the server has acknowledged anything.
//!
//! Grounded on `dimfeld-ergo`'s queue module, which generates a job id up
//! front and issues the enqueue command without waiting on a reply channel.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::codec::{Codec, Envelope};
use crate::error::Error;
use crate::keys::QueueKeys;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Invoked on transport failure instead of propagating the error (spec
/// §4.D/§7.7). The id has already been generated and returned by the time
/// this fires, so it carries no message-identifying information beyond
/// what the caller already logged.
pub type OnSendError = Arc<dyn Fn(Error) + Send + Sync>;

/// Pushes envelopes from this process's perspective as `from`, against a
/// shared writer. `from` is the name of the local queue a producer is
/// attached to; the target queue (`to_queue`) need not exist locally
/// (spec §4.D, "cross-queue send").
pub struct Producer {
    writer: ConnectionManager,
    prefix: String,
    from: String,
    codec: Codec,
}

impl Producer {
    pub fn new(writer: ConnectionManager, prefix: impl Into<String>, from: impl Into<String>, codec: Codec) -> Self {
        Self {
            writer,
            prefix: prefix.into(),
            from: from.into(),
            codec,
        }
    }

    /// Sends `message` to `to_queue`, returning the generated id
    /// immediately. `delay` of `None`/zero pushes onto the ready list now;
    /// otherwise the envelope is scheduled via the delayed zset + TTL
    /// beacon and promoted once the beacon expires (spec §4.F).
    pub async fn send(
        &self,
        to_queue: &str,
        message: serde_json::Value,
        delay: Option<Duration>,
        on_error: Option<OnSendError>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let envelope = Envelope::new(id, self.from.clone(), message);
        let keys = QueueKeys::new(self.prefix.clone(), to_queue.to_string());

        if let Err(err) = self.send_inner(&keys, &envelope, delay).await {
            if let Some(cb) = on_error {
                cb(err);
            }
        }

        id
    }

    async fn send_inner(
        &self,
        keys: &QueueKeys,
        envelope: &Envelope,
        delay: Option<Duration>,
    ) -> crate::error::Result<()> {
        let packed = self.codec.pack(envelope)?;
        let mut writer = self.writer.clone();

        match delay.filter(|d| !d.is_zero()) {
            None => {
                let _: () = writer.lpush(keys.list(), packed).await.map_err(Error::Send)?;
            }
            Some(delay) => {
                let due_ms = now_ms() + delay.as_millis() as u64;
                let _: () = writer
                    .zadd(keys.delayed(), packed, due_ms)
                    .await
                    .map_err(Error::Send)?;

                let ttl_key = keys.ttl(&envelope.id);
                let _: Option<String> = redis::cmd("SET")
                    .arg(&ttl_key)
                    .arg("")
                    .arg("PX")
                    .arg(delay.as_millis() as u64)
                    .arg("NX")
                    .query_async(&mut writer)
                    .await
                    .map_err(Error::Send)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_increases() {
        let a = now_ms();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn zero_delay_is_treated_as_immediate() {
        let delay = Some(Duration::ZERO);
        assert!(delay.filter(|d| !d.is_zero()).is_none());
    }

    #[test]
    fn nonzero_delay_is_scheduled() {
        let delay = Some(Duration::from_millis(500));
        assert!(delay.filter(|d| !d.is_zero()).is_some());
    }
}
