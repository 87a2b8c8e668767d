//! The key-value store seam behind the rate limiter's atomic primitives.
//!
//! [`KvStore`] is the trait every algorithm in [`crate::limiter`] is written
//! against. [`InMemoryStore`] backs it with a mutex-guarded map for tests
//! and single-process deployments; the `redis-store` feature adds a
//! [`crate::redis_store::RedisStore`] that executes the same contract as
//! real `EVAL`-ed Lua scripts so multiple worker processes share state.

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a sliding-window check, mirroring the script contract in
/// spec.md §4.B verbatim (counts and limits stay floats to preserve
/// fractional costs).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingWindowResult {
    pub allowed: bool,
    pub count: f64,
    pub limit: f64,
    pub retry_after_ms: u64,
}

/// Outcome of a token-bucket check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketResult {
    pub allowed: bool,
    pub tokens_after: f64,
    pub capacity: f64,
    pub retry_after_ms: u64,
}

/// Atomic primitives a rate-limit backend must provide.
///
/// Every method must behave as if it ran as a single atomic script: no
/// other caller's view of the same key may interleave with a partial
/// update. The in-memory implementation gets this for free from a mutex;
/// the Redis implementation gets it from `EVAL`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Sliding-window log check/consume at `key`, per spec.md §4.B.
    async fn eval_sliding_window(
        &self,
        key: &str,
        now: Instant,
        window: Duration,
        limit: f64,
        cost: f64,
    ) -> Result<SlidingWindowResult, StoreError>;

    /// Unconditionally records `cost` against the sliding window at `key`,
    /// bypassing the admit/deny gate. A negative `cost` removes entries
    /// instead, so `rollback` can be expressed as `record` with the cost
    /// negated, per spec.md §4.C.5.
    async fn record_sliding_window(&self, key: &str, now: Instant, cost: f64) -> Result<(), StoreError>;

    /// Token-bucket check/consume across the paired `tokens_key`/`last_key`.
    async fn eval_token_bucket(
        &self,
        tokens_key: &str,
        last_key: &str,
        now: Instant,
        capacity: f64,
        refill_per_sec: f64,
        cost: f64,
        ttl: Duration,
    ) -> Result<TokenBucketResult, StoreError>;

    /// Unconditionally subtracts `cost` tokens (or credits them back, for
    /// negative `cost`) from the bucket, bypassing the admit/deny gate.
    async fn record_token_bucket(
        &self,
        tokens_key: &str,
        last_key: &str,
        now: Instant,
        capacity: f64,
        refill_per_sec: f64,
        cost: f64,
    ) -> Result<(), StoreError>;

    /// Increments a counter at `key`, setting `ttl` only on first creation.
    /// Used for the backoff attempt counter (§4.C) and similar tallies.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Clears a counter, e.g. on `record_success`.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Reads a raw string value (adaptive backoff stats are serialized here).
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a raw string value with an optional TTL.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// `SET key value NX EX ttl` equivalent: true if the lock was acquired.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Releases a lock held via [`KvStore::acquire_lock`].
    async fn release_lock(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
struct SlidingWindowState {
    entries: VecDeque<(Instant, f64)>,
}

#[derive(Clone, Copy)]
struct TokenBucketState {
    tokens: f64,
    last: Instant,
}

#[derive(Default)]
struct Counter {
    value: u64,
    expires_at: Option<Instant>,
}

struct LockEntry {
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    windows: HashMap<String, SlidingWindowState>,
    buckets: HashMap<String, TokenBucketState>,
    counters: HashMap<String, Counter>,
    strings: HashMap<String, (String, Option<Instant>)>,
    locks: HashMap<String, LockEntry>,
}

/// Single-process [`KvStore`], grounded on the mutex-guarded state-machine
/// idiom used for the in-process shared rate limiter this crate's algorithm
/// shapes were adapted from.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn eval_sliding_window(
        &self,
        key: &str,
        now: Instant,
        window: Duration,
        limit: f64,
        cost: f64,
    ) -> Result<SlidingWindowResult, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.windows.entry(key.to_string()).or_default();

        while let Some(&(ts, _)) = state.entries.front() {
            if now.duration_since(ts) >= window {
                state.entries.pop_front();
            } else {
                break;
            }
        }

        let count: f64 = state.entries.iter().map(|(_, c)| c).sum();

        if count + cost <= limit {
            state.entries.push_back((now, cost));
            Ok(SlidingWindowResult {
                allowed: true,
                count: count + cost,
                limit,
                retry_after_ms: 0,
            })
        } else {
            let retry_after_ms = state
                .entries
                .front()
                .map(|&(oldest, _)| {
                    let expiry = oldest + window;
                    expiry.saturating_duration_since(now).as_millis() as u64
                })
                .unwrap_or(0);
            Ok(SlidingWindowResult {
                allowed: false,
                count,
                limit,
                retry_after_ms,
            })
        }
    }

    async fn record_sliding_window(&self, key: &str, now: Instant, cost: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.windows.entry(key.to_string()).or_default();

        if cost >= 0.0 {
            state.entries.push_back((now, cost));
            return Ok(());
        }

        let mut remaining = -cost;
        while remaining > 0.0 {
            match state.entries.pop_back() {
                Some((_, c)) if c <= remaining => {
                    remaining -= c;
                }
                Some((ts, c)) => {
                    state.entries.push_back((ts, c - remaining));
                    remaining = 0.0;
                }
                None => break,
            }
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
        _ttl: Duration,
    ) -> Result<TokenBucketResult, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let bucket_key = format!("{tokens_key}\0{last_key}");
        let state = inner.buckets.entry(bucket_key).or_insert(TokenBucketState {
            tokens: capacity,
            last: now,
        });

        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last = now;

        if state.tokens >= cost {
            state.tokens -= cost;
            Ok(TokenBucketResult {
                allowed: true,
                tokens_after: state.tokens,
                capacity,
                retry_after_ms: 0,
            })
        } else {
            let deficit = cost - state.tokens;
            let retry_after_secs = if refill_per_sec > 0.0 {
                (deficit / refill_per_sec).ceil()
            } else {
                f64::INFINITY
            };
            let retry_after_ms = if retry_after_secs.is_finite() {
                (retry_after_secs * 1000.0) as u64
            } else {
                u64::MAX
            };
            Ok(TokenBucketResult {
                allowed: false,
                tokens_after: state.tokens,
                capacity,
                retry_after_ms,
            })
        }
    }

    async fn record_token_bucket(
        &self,
        tokens_key: &str,
        last_key: &str,
        now: Instant,
        capacity: f64,
        refill_per_sec: f64,
        cost: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let bucket_key = format!("{tokens_key}\0{last_key}");
        let state = inner.buckets.entry(bucket_key).or_insert(TokenBucketState {
            tokens: capacity,
            last: now,
        });
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last = now;
        state.tokens = (state.tokens - cost).min(capacity);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let counter = inner.counters.entry(key.to_string()).or_default();

        if counter
            .expires_at
            .map(|exp| now >= exp)
            .unwrap_or(false)
        {
            counter.value = 0;
        }
        if counter.expires_at.is_none() {
            counter.expires_at = Some(now + ttl);
        }
        counter.value += 1;
        Ok(counter.value)
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().counters.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if let Some((_, Some(exp))) = inner.strings.get(key) {
            if now >= *exp {
                inner.strings.remove(key);
                return Ok(None);
            }
        }
        Ok(inner.strings.get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.inner
            .lock()
            .unwrap()
            .strings
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if let Some(existing) = inner.locks.get(key) {
            if now < existing.expires_at {
                return Ok(false);
            }
        }
        inner.locks.insert(
            key.to_string(),
            LockEntry {
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().locks.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sliding_window_admits_up_to_limit_then_denies() {
        let store = InMemoryStore::new();
        let now = Instant::now();
        let window = Duration::from_secs(1);

        let r1 = store
            .eval_sliding_window("rl:sw:llm:default", now, window, 2.0, 1.0)
            .await
            .unwrap();
        assert!(r1.allowed);

        let r2 = store
            .eval_sliding_window("rl:sw:llm:default", now, window, 2.0, 1.0)
            .await
            .unwrap();
        assert!(r2.allowed);

        let r3 = store
            .eval_sliding_window("rl:sw:llm:default", now, window, 2.0, 1.0)
            .await
            .unwrap();
        assert!(!r3.allowed);
        assert_eq!(r3.count, 2.0);
    }

    #[tokio::test]
    async fn sliding_window_preserves_fractional_cost() {
        let store = InMemoryStore::new();
        let now = Instant::now();
        let window = Duration::from_secs(1);

        let r1 = store
            .eval_sliding_window("rl:sw:vector:default", now, window, 1.5, 0.5)
            .await
            .unwrap();
        assert!(r1.allowed);
        assert_eq!(r1.count, 0.5);

        let r2 = store
            .eval_sliding_window("rl:sw:vector:default", now, window, 1.5, 1.0)
            .await
            .unwrap();
        assert!(r2.allowed);
        assert_eq!(r2.count, 1.5);

        let r3 = store
            .eval_sliding_window("rl:sw:vector:default", now, window, 1.5, 0.1)
            .await
            .unwrap();
        assert!(!r3.allowed);
    }

    #[tokio::test]
    async fn sliding_window_denial_does_not_record_partial_consumption() {
        let store = InMemoryStore::new();
        let now = Instant::now();
        let window = Duration::from_secs(1);

        store
            .eval_sliding_window("rl:sw:llm:k", now, window, 1.0, 1.0)
            .await
            .unwrap();
        let denied = store
            .eval_sliding_window("rl:sw:llm:k", now, window, 1.0, 1.0)
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 1.0);
    }

    #[tokio::test]
    async fn token_bucket_refills_fractionally_over_time() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();

        let r1 = store
            .eval_token_bucket("rl:tb:llm:k:tokens", "rl:tb:llm:k:last", t0, 10.0, 2.0, 10.0, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(r1.allowed);
        assert_eq!(r1.tokens_after, 0.0);

        let t1 = t0 + Duration::from_millis(500);
        let r2 = store
            .eval_token_bucket("rl:tb:llm:k:tokens", "rl:tb:llm:k:last", t1, 10.0, 2.0, 1.0, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(r2.allowed);
        assert!((r2.tokens_after - 0.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn record_token_bucket_credits_back_on_rollback() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();
        store
            .eval_token_bucket("k2:tokens", "k2:last", t0, 5.0, 0.0, 5.0, Duration::from_secs(60))
            .await
            .unwrap();
        store
            .record_token_bucket("k2:tokens", "k2:last", t0, 5.0, 0.0, -2.0)
            .await
            .unwrap();
        let r = store
            .eval_token_bucket("k2:tokens", "k2:last", t0, 5.0, 0.0, 2.0, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(r.allowed);
    }

    #[tokio::test]
    async fn token_bucket_never_deducts_on_refusal() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();
        store
            .eval_token_bucket("k:tokens", "k:last", t0, 5.0, 0.0, 5.0, Duration::from_secs(60))
            .await
            .unwrap();
        let before = store
            .eval_token_bucket("k:tokens", "k:last", t0, 5.0, 0.0, 0.0, Duration::from_secs(60))
            .await
            .unwrap();
        let denied = store
            .eval_token_bucket("k:tokens", "k:last", t0, 5.0, 0.0, 1.0, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.tokens_after, before.tokens_after);
    }

    #[tokio::test]
    async fn lock_acquire_is_exclusive_until_expiry() {
        let store = InMemoryStore::new();
        assert!(store.acquire_lock("lock:a", Duration::from_millis(50)).await.unwrap());
        assert!(!store.acquire_lock("lock:a", Duration::from_millis(50)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.acquire_lock("lock:a", Duration::from_millis(50)).await.unwrap());
    }
}
