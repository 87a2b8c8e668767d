//! Redis-backed [`KvStore`], executing the sliding-window and token-bucket
//! contracts of spec.md §4.B as real `EVAL`-ed Lua scripts so the
//! check-and-consume step is atomic across worker processes.

use crate::error::StoreError;
use crate::store::{KvStore, SlidingWindowResult, TokenBucketResult};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now_ms - window_ms)
local members = redis.call('ZRANGE', key, 0, -1, 'WITHSCORES')
local count = 0
for i = 2, #members, 2 do
  count = count + 1
end

if count + cost <= limit then
  redis.call('ZADD', key, now_ms, now_ms .. ':' .. cost .. ':' .. math.random())
  redis.call('PEXPIRE', key, window_ms)
  return {1, tostring(count + cost), tostring(limit), '0'}
else
  local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
  local retry_after = 0
  if #oldest >= 2 then
    local oldest_score = tonumber(oldest[2])
    retry_after = math.ceil((oldest_score - (now_ms - window_ms)) / 1000)
  end
  return {0, tostring(count), tostring(limit), tostring(retry_after)}
end
"#;

const TOKEN_BUCKET_SCRIPT: &str = r#"
local tokens_key = KEYS[1]
local last_key = KEYS[2]
local now_ms = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local refill_per_sec = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])
local ttl_secs = tonumber(ARGV[5])

local tokens = tonumber(redis.call('GET', tokens_key)) or capacity
local last = tonumber(redis.call('GET', last_key)) or now_ms

local elapsed = math.max(0, now_ms - last) / 1000
tokens = math.min(capacity, tokens + elapsed * refill_per_sec)

if tokens >= cost then
  tokens = tokens - cost
  redis.call('SET', tokens_key, tostring(tokens), 'EX', ttl_secs)
  redis.call('SET', last_key, tostring(now_ms), 'EX', ttl_secs)
  return {1, tostring(tokens), tostring(capacity), '0'}
else
  redis.call('SET', last_key, tostring(now_ms), 'EX', ttl_secs)
  local retry_after = 0
  if refill_per_sec > 0 then
    retry_after = math.ceil((cost - tokens) / refill_per_sec)
  end
  return {0, tostring(tokens), tostring(capacity), tostring(retry_after)}
end
"#;

/// A production [`KvStore`] backed by a Redis (or Redis-compatible) server.
pub struct RedisStore {
    client: Client,
    sliding_window_script: Script,
    token_bucket_script: Script,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            sliding_window_script: Script::new(SLIDING_WINDOW_SCRIPT),
            token_bucket_script: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

/// Converts a monotonic [`Instant`] into epoch milliseconds for the Lua
/// scripts, which need wall-clock time to compare against TTLs shared
/// across processes. Callers pass `Instant::now()`-derived values, so this
/// assumes the caller's clock is reasonably close to `now`.
fn epoch_ms(instant: Instant) -> i64 {
    let now_instant = Instant::now();
    let now_wall = SystemTime::now();
    let delta = if instant >= now_instant {
        instant - now_instant
    } else {
        now_instant - instant
    };
    let wall = if instant >= now_instant {
        now_wall + delta
    } else {
        now_wall - delta
    };
    wall.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[async_trait]
impl KvStore for RedisStore {
    async fn eval_sliding_window(
        &self,
        key: &str,
        now: Instant,
        window: Duration,
        limit: f64,
        cost: f64,
    ) -> Result<SlidingWindowResult, StoreError> {
        let mut conn = self.connection().await?;
        let result: Vec<String> = self
            .sliding_window_script
            .key(key)
            .arg(epoch_ms(now))
            .arg(window.as_millis() as i64)
            .arg(limit)
            .arg(cost)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        parse_sliding_window_result(&result)
    }

    async fn record_sliding_window(&self, key: &str, now: Instant, cost: f64) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        if cost >= 0.0 {
            let member = format!("{}:{}:reconcile", epoch_ms(now), cost);
            let _: () = conn
                .zadd(key, member, epoch_ms(now))
                .await
                .map_err(|e| StoreError::Command(e.to_string()))?;
        } else {
            // Negative reconciliation removes the most recent member; a
            // best-effort approximation since ZSET members aren't addressed
            // by cost once inserted.
            let _: Option<String> = conn
                .zpopmax(key, 1)
                .await
                .map_err(|e| StoreError::Command(e.to_string()))?;
        }
        Ok(())
    }

    async fn eval_token_bucket(
        &self,
        tokens_key: &str,
        last_key: &str,
        now: Instant,
        capacity: f64,
        refill_per_sec: f64,
        cost: f64,
        ttl: Duration,
    ) -> Result<TokenBucketResult, StoreError> {
        let mut conn = self.connection().await?;
        let result: Vec<String> = self
            .token_bucket_script
            .key(tokens_key)
            .key(last_key)
            .arg(epoch_ms(now))
            .arg(capacity)
            .arg(refill_per_sec)
            .arg(cost)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        parse_token_bucket_result(&result)
    }

    async fn record_token_bucket(
        &self,
        tokens_key: &str,
        _last_key: &str,
        _now: Instant,
        capacity: f64,
        _refill_per_sec: f64,
        cost: f64,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let current: Option<f64> = conn
            .get(tokens_key)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        let updated = (current.unwrap_or(capacity) - cost).min(capacity);
        let _: () = conn
            .set(tokens_key, updated)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let value: u64 = conn
            .incr(key, 1)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        if value == 1 {
            let _: () = conn
                .expire(key, ttl.as_secs() as i64)
                .await
                .map_err(|e| StoreError::Command(e.to_string()))?;
        }
        Ok(value)
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await.map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get(key).await.map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs())
                    .await
                    .map_err(|e| StoreError::Command(e.to_string()))?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(|e| StoreError::Command(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await.map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(())
    }
}

fn parse_sliding_window_result(raw: &[String]) -> Result<SlidingWindowResult, StoreError> {
    if raw.len() != 4 {
        return Err(StoreError::Command("malformed sliding window reply".into()));
    }
    Ok(SlidingWindowResult {
        allowed: raw[0] == "1",
        count: raw[1].parse().unwrap_or(0.0),
        limit: raw[2].parse().unwrap_or(0.0),
        retry_after_ms: raw[3].parse::<f64>().unwrap_or(0.0) as u64 * 1000,
    })
}

fn parse_token_bucket_result(raw: &[String]) -> Result<TokenBucketResult, StoreError> {
    if raw.len() != 4 {
        return Err(StoreError::Command("malformed token bucket reply".into()));
    }
    Ok(TokenBucketResult {
        allowed: raw[0] == "1",
        tokens_after: raw[1].parse().unwrap_or(0.0),
        capacity: raw[2].parse().unwrap_or(0.0),
        retry_after_ms: raw[3].parse::<f64>().unwrap_or(0.0) as u64 * 1000,
    })
}
