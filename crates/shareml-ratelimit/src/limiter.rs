//! The distributed rate limiter façade: spec.md §4.C's `check_limit`/
//! `record_usage`/`rollback` plus the backoff delay API of the same
//! section (§D's adaptive strategy is delegated to [`crate::AdaptiveDelay`]).

use crate::circuit::{CircuitState, StoreCircuit};
use crate::config::{BackoffStrategy, RateLimitConfigMap};
use crate::error::{RateLimitError, StoreError};
use crate::events::RateLimitEvent;
use crate::store::KvStore;
use shareml_core::EventListeners;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Delegated to by [`DistributedRateLimiter::get_backoff_delay`] for the
/// `adaptive` strategy; implemented in `shareml-backoff` to keep the
/// per-hour/trend statistics in one place. Kept as a trait here so this
/// crate never depends on `shareml-backoff`.
#[async_trait::async_trait]
pub trait AdaptiveDelay: Send + Sync {
    async fn calculate_delay_ms(&self, service: &str, identifier: &str, attempt: u64) -> u64;
    async fn record_success(&self, service: &str, identifier: &str);
}

/// Outcome of [`DistributedRateLimiter::check_limit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckResult {
    pub allowed: bool,
    pub remaining: f64,
    pub limit: f64,
    pub retry_after: Duration,
    pub reset_at: Instant,
}

pub struct DistributedRateLimiter<S: KvStore> {
    store: Arc<S>,
    configs: RateLimitConfigMap,
    circuit: StoreCircuit,
    event_listeners: EventListeners<RateLimitEvent>,
    adaptive: Option<Arc<dyn AdaptiveDelay>>,
}

impl<S: KvStore> DistributedRateLimiter<S> {
    pub fn new(store: Arc<S>, configs: RateLimitConfigMap) -> Self {
        Self {
            store,
            configs,
            circuit: StoreCircuit::new(Duration::from_secs(30)),
            event_listeners: EventListeners::new(),
            adaptive: None,
        }
    }

    pub fn with_adaptive_delay(mut self, adaptive: Arc<dyn AdaptiveDelay>) -> Self {
        self.adaptive = Some(adaptive);
        self
    }

    pub fn event_listeners_mut(&mut self) -> &mut EventListeners<RateLimitEvent> {
        &mut self.event_listeners
    }

    fn sliding_window_key(service: &str, identifier: &str) -> String {
        format!("rl:sw:{service}:{identifier}")
    }

    fn token_bucket_keys(service: &str, identifier: &str) -> (String, String) {
        (
            format!("rl:tb:{service}:{identifier}:tokens"),
            format!("rl:tb:{service}:{identifier}:last"),
        )
    }

    /// Checks (and, on success, consumes) every configured limit for
    /// `service`. Refuses on the first denied limit, surfacing the smallest
    /// `retry_after`; a failed check never records partial consumption.
    pub async fn check_limit(
        &self,
        service: &str,
        identifier: &str,
        cost: f64,
    ) -> Result<CheckResult, RateLimitError> {
        if self.circuit.state() == CircuitState::Open {
            return Err(RateLimitError::Unavailable);
        }

        let Some(config) = self.configs.get(service) else {
            #[cfg(feature = "tracing")]
            tracing::warn!(service, "no rate limit config for service; allowing");
            return Ok(CheckResult {
                allowed: true,
                remaining: f64::INFINITY,
                limit: f64::INFINITY,
                retry_after: Duration::ZERO,
                reset_at: Instant::now(),
            });
        };

        if !config.enable_rate_limiting {
            return Ok(CheckResult {
                allowed: true,
                remaining: f64::INFINITY,
                limit: f64::INFINITY,
                retry_after: Duration::ZERO,
                reset_at: Instant::now(),
            });
        }

        let now = Instant::now();
        let mut tightest: Option<CheckResult> = None;

        for limit in &config.limits {
            let outcome = match limit {
                crate::config::Limit::SlidingWindow { window_secs, limit } => {
                    let key = Self::sliding_window_key(service, identifier);
                    let window = Duration::from_secs(*window_secs);
                    match self.store.eval_sliding_window(&key, now, window, *limit, cost).await {
                        Ok(r) => CheckResult {
                            allowed: r.allowed,
                            remaining: (r.limit - r.count).max(0.0),
                            limit: r.limit,
                            retry_after: Duration::from_millis(r.retry_after_ms),
                            reset_at: now + window,
                        },
                        Err(e) => return Err(self.trip_and_convert(e)),
                    }
                }
                crate::config::Limit::TokenBucket {
                    capacity,
                    refill_per_sec,
                    ttl_secs,
                } => {
                    let (tokens_key, last_key) = Self::token_bucket_keys(service, identifier);
                    let ttl = Duration::from_secs(*ttl_secs);
                    match self
                        .store
                        .eval_token_bucket(&tokens_key, &last_key, now, *capacity, *refill_per_sec, cost, ttl)
                        .await
                    {
                        Ok(r) => CheckResult {
                            allowed: r.allowed,
                            remaining: r.tokens_after,
                            limit: r.capacity,
                            retry_after: Duration::from_millis(r.retry_after_ms),
                            reset_at: now + ttl,
                        },
                        Err(e) => return Err(self.trip_and_convert(e)),
                    }
                }
            };

            if !outcome.allowed {
                self.event_listeners.emit(&RateLimitEvent::CheckDenied {
                    service: service.to_string(),
                    timestamp: now,
                    retry_after: outcome.retry_after,
                });
                #[cfg(feature = "metrics")]
                counter!(shareml_core::telemetry::RATE_LIMIT_CHECKS_TOTAL, "service" => service.to_string(), "result" => "denied").increment(1);

                return Err(RateLimitError::Denied {
                    retry_after_ms: outcome.retry_after.as_millis() as u64,
                });
            }

            tightest = Some(match tightest {
                Some(current) if current.remaining <= outcome.remaining => current,
                _ => outcome,
            });
        }

        let result = tightest.unwrap_or(CheckResult {
            allowed: true,
            remaining: f64::INFINITY,
            limit: f64::INFINITY,
            retry_after: Duration::ZERO,
            reset_at: now,
        });

        self.event_listeners.emit(&RateLimitEvent::CheckAllowed {
            service: service.to_string(),
            timestamp: now,
            remaining: result.remaining,
        });
        #[cfg(feature = "metrics")]
        counter!(shareml_core::telemetry::RATE_LIMIT_CHECKS_TOTAL, "service" => service.to_string(), "result" => "allowed").increment(1);

        Ok(result)
    }

    fn trip_and_convert(&self, err: StoreError) -> RateLimitError {
        self.circuit.trip();
        self.event_listeners.emit(&RateLimitEvent::CircuitOpened {
            service: "store".to_string(),
            timestamp: Instant::now(),
        });
        #[cfg(feature = "metrics")]
        gauge!(shareml_core::telemetry::RATE_LIMIT_CIRCUIT_BREAKER_OPEN).set(1.0);
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, "rate limit store error; opening circuit");
        let _ = err;
        RateLimitError::Unavailable
    }

    /// Directly records additional usage against `service`'s configured
    /// limits without gating — used for token-reconciliation top-ups.
    pub async fn record_usage(&self, service: &str, identifier: &str, cost: f64) -> Result<(), StoreError> {
        let Some(config) = self.configs.get(service) else {
            return Ok(());
        };
        let now = Instant::now();
        for limit in &config.limits {
            match limit {
                crate::config::Limit::SlidingWindow { .. } => {
                    let key = Self::sliding_window_key(service, identifier);
                    self.store.record_sliding_window(&key, now, cost).await?;
                }
                crate::config::Limit::TokenBucket {
                    capacity,
                    refill_per_sec,
                    ..
                } => {
                    let (tokens_key, last_key) = Self::token_bucket_keys(service, identifier);
                    self.store
                        .record_token_bucket(&tokens_key, &last_key, now, *capacity, *refill_per_sec, cost)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Undoes a successful [`Self::check_limit`] consumption; equivalent to
    /// `record_usage` with the cost negated, per spec.md §4.C.5.
    pub async fn rollback(&self, service: &str, identifier: &str, cost: f64) -> Result<(), StoreError> {
        self.record_usage(service, identifier, -cost).await
    }

    /// Increments the per-identifier attempt counter and returns the delay
    /// to wait before the next attempt, per spec.md §4.C's backoff API.
    pub async fn get_backoff_delay(&self, service: &str, identifier: &str) -> Result<u64, StoreError> {
        let key = format!("rl:backoff:{service}:{identifier}");
        let attempt = self.store.incr(&key, Duration::from_secs(3600)).await?;

        let Some(config) = self.configs.get(service) else {
            return Ok(1_000);
        };
        let policy = &config.backoff;

        let base_ms = match policy.strategy {
            BackoffStrategy::Exponential => {
                let scaled = policy.initial_ms as f64 * policy.multiplier.powi(attempt as i32 - 1);
                scaled.min(policy.max_ms as f64) as u64
            }
            BackoffStrategy::Linear => {
                (policy.initial_ms * attempt).min(policy.max_ms)
            }
            BackoffStrategy::Adaptive => {
                if let Some(adaptive) = &self.adaptive {
                    adaptive.calculate_delay_ms(service, identifier, attempt).await
                } else {
                    policy.initial_ms
                }
            }
        };

        let delay_ms = if policy.jitter {
            apply_jitter(base_ms)
        } else {
            base_ms
        };

        Ok(delay_ms)
    }

    /// Clears the attempt counter for `(service, identifier)` and notifies
    /// the adaptive delegate, if any.
    pub async fn record_success(&self, service: &str, identifier: &str) -> Result<(), StoreError> {
        let key = format!("rl:backoff:{service}:{identifier}");
        self.store.reset(&key).await?;
        if let Some(adaptive) = &self.adaptive {
            adaptive.record_success(service, identifier).await;
        }
        Ok(())
    }
}

fn apply_jitter(base_ms: u64) -> u64 {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let jitter_fraction: f64 = rng.gen_range(0.0..=0.10);
    let jittered = base_ms as f64 * (1.0 - jitter_fraction);
    jittered.max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn denies_without_recording_partial_consumption() {
        let store = Arc::new(InMemoryStore::new());
        let configs = RateLimitConfigMap::load(
            "svc:\n  limits:\n    - algorithm: sliding_window\n      window_secs: 60\n      limit: 2\n",
        )
        .unwrap();
        let limiter = DistributedRateLimiter::new(store, configs);

        assert!(limiter.check_limit("svc", "id", 1.0).await.unwrap().allowed);
        assert!(limiter.check_limit("svc", "id", 1.0).await.unwrap().allowed);
        let denied = limiter.check_limit("svc", "id", 1.0).await;
        assert!(matches!(denied, Err(RateLimitError::Denied { .. })));
    }

    #[tokio::test]
    async fn absent_config_allows_with_warning() {
        let store = Arc::new(InMemoryStore::new());
        let configs = RateLimitConfigMap::load("other_service:\n  limits: []\n").unwrap();
        let limiter = DistributedRateLimiter::new(store, configs);

        let result = limiter.check_limit("unconfigured", "id", 100.0).await.unwrap();
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn backoff_delay_escalates_exponentially() {
        let store = Arc::new(InMemoryStore::new());
        let configs = RateLimitConfigMap::load(
            "svc:\n  limits: []\n  backoff:\n    strategy: exponential\n    initial_ms: 100\n    multiplier: 2.0\n    max_ms: 10000\n    jitter: false\n",
        )
        .unwrap();
        let limiter = DistributedRateLimiter::new(store, configs);

        let d1 = limiter.get_backoff_delay("svc", "id").await.unwrap();
        let d2 = limiter.get_backoff_delay("svc", "id").await.unwrap();
        assert_eq!(d1, 100);
        assert_eq!(d2, 200);
    }

    #[tokio::test]
    async fn record_success_resets_attempt_counter() {
        let store = Arc::new(InMemoryStore::new());
        let configs = RateLimitConfigMap::load(
            "svc:\n  limits: []\n  backoff:\n    strategy: linear\n    initial_ms: 50\n    multiplier: 1.0\n    max_ms: 10000\n    jitter: false\n",
        )
        .unwrap();
        let limiter = DistributedRateLimiter::new(store, configs);

        limiter.get_backoff_delay("svc", "id").await.unwrap();
        limiter.get_backoff_delay("svc", "id").await.unwrap();
        limiter.record_success("svc", "id").await.unwrap();
        let delay = limiter.get_backoff_delay("svc", "id").await.unwrap();
        assert_eq!(delay, 50);
    }
}
