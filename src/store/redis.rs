//! Redis-backed counter store.
//!
//! Bucket updates run as a server-side Lua script and access records are
//! updated in a MULTI/EXEC transaction, so every operation is atomic on the
//! Redis side no matter how many gateway instances share the server.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisResult, Script};
use tracing::{debug, info};

use super::{access_key, CounterStore, StoreError};
use crate::ratelimit::{BucketBudget, BucketDecision, ScopeKey};

/// Continuous token bucket, mirrors `BucketState::refill_and_take`.
///
/// Non-numeric or negative stored values fall back to a fresh bucket. The
/// remaining token count is returned as a string because Redis truncates Lua
/// numbers to integers.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local tokens_key = KEYS[1]
local last_key = KEYS[2]
local now = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])

local tokens = tonumber(redis.call("GET", tokens_key))
if tokens == nil or tokens ~= tokens or tokens < 0 then
  tokens = capacity
end
local last = tonumber(redis.call("GET", last_key))
if last == nil or last ~= last or last < 0 then
  last = 0
end

local elapsed = math.max(0, now - last)
tokens = math.min(capacity, tokens + elapsed * refill_rate)

local granted = 0
if tokens >= 1 then
  tokens = tokens - 1
  granted = 1
end

redis.call("SET", tokens_key, tostring(tokens))
redis.call("SET", last_key, tostring(now))
return {granted, tostring(tokens)}
"#;

/// A counter store on a shared Redis server.
#[derive(Clone)]
pub struct RedisStore {
    /// Multiplexed connection, cloned per call
    conn: MultiplexedConnection,
    /// Upper bound for a single round-trip
    timeout: Duration,
    /// Loaded token bucket script
    bucket_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = bounded(timeout, client.get_multiplexed_async_connection()).await?;

        info!(timeout = ?timeout, "Connected to Redis counter store");

        Ok(Self {
            conn,
            timeout,
            bucket_script: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }

    /// Check that the server answers.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("PING");
        let reply: String = bounded(self.timeout, cmd.query_async(&mut conn)).await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!("PING answered {:?}", reply)))
        }
    }
}

/// Run a store call under the configured deadline.
async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn take_token(
        &self,
        scope: &ScopeKey,
        budget: &BucketBudget,
        now: f64,
    ) -> Result<BucketDecision, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.bucket_script.prepare_invoke();
        invocation
            .key(scope.tokens_key())
            .key(scope.last_key())
            .arg(now)
            .arg(budget.refill_per_second)
            .arg(budget.capacity);

        let (granted, remaining): (i64, String) =
            bounded(self.timeout, invocation.invoke_async(&mut conn)).await?;

        let tokens_remaining = remaining.parse::<f64>().map_err(|_| {
            StoreError::Protocol(format!("token count {:?} is not a number", remaining))
        })?;

        debug!(
            scope = %scope,
            granted = granted == 1,
            tokens_remaining = tokens_remaining,
            "Token bucket script returned"
        );

        Ok(BucketDecision {
            granted: granted == 1,
            tokens_remaining,
        })
    }

    async fn record_access(
        &self,
        client_id: &str,
        endpoint: &str,
        now: u64,
        window_secs: u64,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let key = access_key(client_id);
        let cutoff = now as i64 - window_secs as i64;

        // ZADD GT keeps the newest last-seen second for an endpoint
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg("GT")
            .arg(now)
            .arg(endpoint)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZCARD")
            .arg(&key)
            .cmd("EXPIRE")
            .arg(&key)
            .arg(window_secs)
            .ignore();

        let (distinct,): (u64,) = bounded(self.timeout, pipe.query_async(&mut conn)).await?;
        Ok(distinct)
    }
}
