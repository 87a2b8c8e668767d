//! Wraps a single third-party provider call with the full protection stack:
//! concurrency limiter, dual rate-limit check, key rotation, and token
//! reconciliation (spec.md §4.G).

use crate::concurrency::ConcurrencyLimiter;
use crate::error::{DispatchError, ProviderCallError};
use crate::keypool::ApiKeyPool;
use shareml_ratelimit::{DistributedRateLimiter, KvStore, RateLimitError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

#[cfg(feature = "metrics")]
use metrics::counter;

/// The provider call's outcome, carrying the actual token usage so the
/// dispatcher can reconcile it against the pre-call estimate.
pub struct ProviderOutcome<T> {
    pub value: T,
    pub actual_tokens: f64,
}

/// Per-dispatcher cost-multiplier table, mapping model name to a
/// multiplier applied to the token cost (e.g. a premium tier ~10x a
/// baseline tier). Unknown models multiply by 1.0.
#[derive(Debug, Clone, Default)]
pub struct CostMultipliers(HashMap<String, f64>);

impl CostMultipliers {
    pub fn new(table: HashMap<String, f64>) -> Self {
        Self(table)
    }

    pub fn multiplier_for(&self, model: &str) -> f64 {
        self.0.get(model).copied().unwrap_or(1.0)
    }
}

pub struct ProviderDispatcher<S: KvStore> {
    pool: ApiKeyPool,
    concurrency: ConcurrencyLimiter,
    limiter: DistributedRateLimiter<S>,
    cost_multipliers: CostMultipliers,
    /// Process-local outstanding token deficit per identifier (§4.G).
    deficits: Mutex<HashMap<String, f64>>,
}

impl<S: KvStore> ProviderDispatcher<S> {
    pub fn new(
        pool: ApiKeyPool,
        concurrency: ConcurrencyLimiter,
        limiter: DistributedRateLimiter<S>,
        cost_multipliers: CostMultipliers,
    ) -> Self {
        Self {
            pool,
            concurrency,
            limiter,
            cost_multipliers,
            deficits: Mutex::new(HashMap::new()),
        }
    }

    /// Outstanding token deficit the caller should add to its next
    /// estimate for `identifier`.
    pub fn deficit_for(&self, identifier: &str) -> f64 {
        *self.deficits.lock().unwrap().get(identifier).unwrap_or(&0.0)
    }

    /// Runs `call` under the full protection stack. `call` receives the
    /// selected key's id/secret and is expected to return the actual token
    /// usage alongside its result.
    pub async fn dispatch<F, Fut, T>(
        &self,
        identifier: &str,
        model: &str,
        request_cost: f64,
        estimated_tokens: f64,
        call: F,
    ) -> Result<T, DispatchError>
    where
        F: Fn(String, String) -> Fut,
        Fut: Future<Output = Result<ProviderOutcome<T>, ProviderCallError>>,
    {
        let _permit = self.concurrency.try_acquire().ok_or(DispatchError::ConcurrencyExhausted {
            retry_after: Duration::from_secs(5),
        })?;

        let pool_size = self.pool.len().max(1);
        let max_attempts = pool_size * 2;
        let token_cost = estimated_tokens + self.deficit_for(identifier);
        let scaled_tokens = token_cost * self.cost_multipliers.multiplier_for(model);

        let mut last_error: Option<DispatchError> = None;

        for attempt in 0..max_attempts {
            let Some((key_id, key_secret)) = self.pool.next_available_key() else {
                return Err(DispatchError::PoolExhausted {
                    retry_after: Duration::from_secs(60),
                });
            };

            if let Err(err) = self.limiter.check_limit("provider", identifier, request_cost).await {
                return Err(self.convert_rate_limit_error(err));
            }

            if let Err(err) = self
                .limiter
                .check_limit("provider_tokens", identifier, scaled_tokens)
                .await
            {
                let _ = self.limiter.rollback("provider", identifier, request_cost).await;
                return Err(self.convert_rate_limit_error(err));
            }

            match call(key_id.clone(), key_secret).await {
                Ok(outcome) => {
                    self.pool.mark_success(&key_id);
                    self.reconcile_tokens(identifier, estimated_tokens, outcome.actual_tokens).await;
                    #[cfg(feature = "metrics")]
                    counter!(shareml_core::telemetry::API_KEY_ROTATIONS_TOTAL, "service" => "provider", "reason" => "success").increment(0);
                    return Ok(outcome.value);
                }
                Err(ProviderCallError::RateLimited { retry_after_ms }) => {
                    self.pool.mark_rate_limited(&key_id, Duration::from_millis(retry_after_ms));
                    #[cfg(feature = "metrics")]
                    counter!(shareml_core::telemetry::API_KEY_ROTATIONS_TOTAL, "service" => "provider", "reason" => "rate_limited").increment(1);
                    last_error = Some(DispatchError::RateLimited {
                        retry_after: Duration::from_millis(retry_after_ms),
                    });
                }
                Err(ProviderCallError::Transient(msg)) => {
                    self.pool.mark_error(&key_id);
                    #[cfg(feature = "metrics")]
                    counter!(shareml_core::telemetry::API_KEY_ROTATIONS_TOTAL, "service" => "provider", "reason" => "transient_error").increment(1);
                    last_error = Some(DispatchError::ProviderTransient(msg));
                }
                Err(ProviderCallError::Permanent(msg)) => {
                    self.pool.mark_error(&key_id);
                    #[cfg(feature = "metrics")]
                    counter!(shareml_core::telemetry::API_KEY_ROTATIONS_TOTAL, "service" => "provider", "reason" => "permanent_error").increment(1);
                    last_error = Some(DispatchError::ProviderPermanent(msg));
                }
            }

            let _ = attempt;
        }

        Err(last_error.unwrap_or(DispatchError::PoolExhausted {
            retry_after: Duration::from_secs(60),
        }))
    }

    fn convert_rate_limit_error(&self, err: RateLimitError) -> DispatchError {
        match err {
            RateLimitError::Denied { retry_after_ms } => DispatchError::RateLimited {
                retry_after: Duration::from_millis(retry_after_ms),
            },
            RateLimitError::Unavailable => DispatchError::RateLimiterUnavailable,
        }
    }

    async fn reconcile_tokens(&self, identifier: &str, estimated: f64, actual: f64) {
        let mut deficits = self.deficits.lock().unwrap();
        let entry = deficits.entry(identifier.to_string()).or_insert(0.0);

        if actual > estimated {
            let shortfall = actual - estimated;
            *entry += shortfall;
            let shortfall_for_limiter = shortfall;
            drop(deficits);
            let _ = self
                .limiter
                .record_usage("provider_tokens", identifier, shortfall_for_limiter)
                .await;
        } else {
            let overestimate = estimated - actual;
            *entry = (*entry - overestimate).max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypool::ApiKey;
    use shareml_ratelimit::{InMemoryStore, RateLimitConfigMap};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher() -> ProviderDispatcher<InMemoryStore> {
        let pool = ApiKeyPool::new(vec![ApiKey::new("k1", "s1"), ApiKey::new("k2", "s2")]);
        let concurrency = ConcurrencyLimiter::new(5);
        let configs = RateLimitConfigMap::load(
            "provider:\n  limits: []\nprovider_tokens:\n  limits: []\n",
        )
        .unwrap();
        let limiter = DistributedRateLimiter::new(Arc::new(InMemoryStore::new()), configs);
        ProviderDispatcher::new(pool, concurrency, limiter, CostMultipliers::default())
    }

    #[tokio::test]
    async fn successful_call_marks_key_success_and_returns_value() {
        let d = dispatcher();
        let result = d
            .dispatch("default", "gpt-3.5", 1.0, 100.0, |_id, _secret| async move {
                Ok(ProviderOutcome {
                    value: 42,
                    actual_tokens: 100.0,
                })
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn rotates_keys_on_rate_limit_then_succeeds() {
        let d = dispatcher();
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempt_count);

        let result = d
            .dispatch("default", "gpt-3.5", 1.0, 10.0, move |_id, _secret| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(ProviderCallError::RateLimited { retry_after_ms: 10 })
                    } else {
                        Ok(ProviderOutcome {
                            value: "ok",
                            actual_tokens: 10.0,
                        })
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausting_all_attempts_surfaces_last_error() {
        let d = dispatcher();
        let result: Result<(), _> = d
            .dispatch("default", "gpt-3.5", 1.0, 10.0, |_id, _secret| async move {
                Err(ProviderCallError::Transient("boom".into()))
            })
            .await;
        assert!(matches!(result, Err(DispatchError::ProviderTransient(_))));
    }

    #[tokio::test]
    async fn token_deficit_accumulates_when_actual_exceeds_estimate() {
        let d = dispatcher();
        let _ = d
            .dispatch("id1", "gpt-3.5", 1.0, 10.0, |_id, _secret| async move {
                Ok(ProviderOutcome {
                    value: (),
                    actual_tokens: 15.0,
                })
            })
            .await;
        assert_eq!(d.deficit_for("id1"), 5.0);
    }

    #[tokio::test]
    async fn token_deficit_never_goes_negative() {
        let d = dispatcher();
        let _ = d
            .dispatch("id2", "gpt-3.5", 1.0, 10.0, |_id, _secret| async move {
                Ok(ProviderOutcome {
                    value: (),
                    actual_tokens: 2.0,
                })
            })
            .await;
        assert_eq!(d.deficit_for("id2"), 0.0);
    }
}
