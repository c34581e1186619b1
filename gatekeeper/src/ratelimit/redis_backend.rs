//! Window backend over Redis sorted sets.
//!
//! Each window is a sorted set at the rate-limit key itself
//! (`prefix:principal:route`). Members are unique per request and scored by
//! their timestamp in milliseconds. The purge, count, conditional insert and
//! expiry refresh run as one Lua script, so concurrent instances checking
//! the same key are serialized by Redis.

use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use redis::{RedisError, Script};

use super::backend::{BackendError, WindowBackend, WindowState};
use crate::shared_store::SharedStore;

/// `KEYS[1]` window; `ARGV` now, window, limit, member.
/// Replies `{count, recorded, oldest}` with `oldest = -1` when empty.
const RECORD_SCRIPT: &str = r"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
local recorded = 0
if count < limit then
  redis.call('ZADD', KEYS[1], now, ARGV[4])
  redis.call('PEXPIRE', KEYS[1], window)
  count = count + 1
  recorded = 1
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if oldest[2] then
  return {count, recorded, tonumber(oldest[2])}
end
return {count, recorded, -1}
";

/// `KEYS[1]` window; `ARGV` now, window. Read-only.
const INSPECT_SCRIPT: &str = r"
local floor = '(' .. (tonumber(ARGV[1]) - tonumber(ARGV[2]))
local count = redis.call('ZCOUNT', KEYS[1], floor, '+inf')
local oldest = redis.call('ZRANGEBYSCORE', KEYS[1], floor, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
if oldest[2] then
  return {count, 0, tonumber(oldest[2])}
end
return {count, 0, -1}
";

/// Sliding-window logs shared by every instance pointing at the same Redis.
pub struct RedisBackend {
    store: Arc<SharedStore>,
    record: Script,
    inspect: Script,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Create a backend over a shared store.
    #[must_use]
    pub fn new(store: Arc<SharedStore>) -> Self {
        Self {
            store,
            record: Script::new(RECORD_SCRIPT),
            inspect: Script::new(INSPECT_SCRIPT),
        }
    }
}

/// Arguments for the record script.
fn record_args(now_ms: u64, window_ms: u64, limit: u32, member: String) -> Vec<String> {
    vec![
        now_ms.to_string(),
        window_ms.to_string(),
        limit.to_string(),
        member,
    ]
}

/// A sorted-set member unique to one request at `now_ms`.
fn request_member(now_ms: u64) -> String {
    format!("{now_ms}-{:016x}", rand::rng().next_u64())
}

/// Decode a `{count, recorded, oldest}` script reply.
fn window_state((count, recorded, oldest): (i64, i64, i64)) -> WindowState {
    WindowState {
        count: u32::try_from(count.max(0)).unwrap_or(u32::MAX),
        recorded: recorded == 1,
        oldest_ms: u64::try_from(oldest).ok(),
    }
}

fn unavailable(error: &RedisError) -> BackendError {
    BackendError::Unavailable(error.to_string())
}

#[async_trait]
impl WindowBackend for RedisBackend {
    async fn record_if_below(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
    ) -> Result<WindowState, BackendError> {
        let args = record_args(now_ms, window_ms, limit, request_member(now_ms));
        let reply = self
            .store
            .run_script(&self.record, &[key], &args)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(window_state(reply))
    }

    async fn inspect(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<WindowState, BackendError> {
        let args = vec![now_ms.to_string(), window_ms.to_string()];
        let reply = self
            .store
            .run_script(&self.inspect, &[key], &args)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(window_state(reply))
    }

    async fn clear(&self, key: &str) -> Result<(), BackendError> {
        let _: i64 = self
            .store
            .run_command(redis::cmd("DEL").arg(key))
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(())
    }
}
