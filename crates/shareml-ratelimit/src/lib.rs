//! Distributed rate limiting for the ML worker fabric: sliding-window and
//! token-bucket algorithms executed atomically against a shared store, plus
//! the backoff-delay API consulted between retries.

mod circuit;
pub mod config;
pub mod error;
pub mod events;
pub mod limiter;
pub mod store;

#[cfg(feature = "redis-store")]
pub mod redis_store;

pub use config::{BackoffPolicy, BackoffStrategy, Limit, RateLimitConfig, RateLimitConfigMap};
pub use error::{ConfigError, RateLimitError, StoreError};
pub use events::RateLimitEvent;
pub use limiter::{AdaptiveDelay, CheckResult, DistributedRateLimiter};
pub use store::{InMemoryStore, KvStore, SlidingWindowResult, TokenBucketResult};

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;
