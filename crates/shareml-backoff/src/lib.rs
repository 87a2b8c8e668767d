//! Adaptive backoff: delay scales with recent success rate, a short-term
//! trend, and (optionally) the historical success rate for the current
//! hour of day, so a provider having a bad afternoon backs off harder
//! without penalizing the whole day.

mod stats;

use chrono::Timelike;
use shareml_ratelimit::{AdaptiveDelay, KvStore};
use stats::AdaptiveStats;
use std::sync::Arc;

pub use stats::HourlyStat;

const MIN_HOURLY_SAMPLES: u64 = 10;

/// Tunables for [`AdaptiveBackoff`] that aren't learned from history.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveBackoffConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub time_of_day_enabled: bool,
}

impl Default for AdaptiveBackoffConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 120_000,
            time_of_day_enabled: true,
        }
    }
}

/// Success-rate-driven backoff delay calculator, per spec.md §4.D.
pub struct AdaptiveBackoff<S: KvStore> {
    store: Arc<S>,
    config: AdaptiveBackoffConfig,
}

impl<S: KvStore> AdaptiveBackoff<S> {
    pub fn new(store: Arc<S>, config: AdaptiveBackoffConfig) -> Self {
        Self { store, config }
    }

    fn stats_key(service: &str, identifier: &str) -> String {
        format!("backoff:adaptive:{service}:{identifier}")
    }

    async fn load_stats(&self, service: &str, identifier: &str) -> AdaptiveStats {
        match self.store.get(&Self::stats_key(service, identifier)).await {
            Ok(Some(raw)) => AdaptiveStats::from_json(&raw),
            _ => AdaptiveStats::default(),
        }
    }

    async fn save_stats(&self, service: &str, identifier: &str, stats: &AdaptiveStats) {
        let _ = self
            .store
            .set(&Self::stats_key(service, identifier), stats.to_json(), None)
            .await;
    }

    /// Records a failed attempt so the next [`Self::calculate_delay`] call
    /// reflects it. The dispatcher calls this directly (distinct from
    /// `AdaptiveDelay::record_success`, which is driven through the rate
    /// limiter's `get_backoff_delay`/`record_success` pairing).
    pub async fn record_failure(&self, service: &str, identifier: &str) {
        let now = chrono::Utc::now();
        let mut stats = self.load_stats(service, identifier).await;
        stats.record_failure(now.timestamp(), now.hour() as usize);
        self.save_stats(service, identifier, &stats).await;
    }

    /// Computes the delay for `attempt`, per spec.md §4.D's five-step rule.
    pub async fn calculate_delay(&self, service: &str, identifier: &str, attempt: u64) -> u64 {
        let stats = self.load_stats(service, identifier).await;

        let base_multiplier = match stats.overall_success_rate() {
            rate if rate > 0.8 => 0.5,
            rate if rate > 0.5 => 1.0,
            rate if rate > 0.2 => 2.0,
            _ => 4.0,
        };

        let trend_multiplier = if stats.consecutive_successes() >= 3 {
            0.8
        } else if stats.consecutive_failures() >= 3 {
            1.5
        } else {
            1.0
        };

        let time_of_day_multiplier = if self.config.time_of_day_enabled {
            let hour = chrono::Utc::now().hour() as usize;
            let hourly = stats.hourly(hour);
            if hourly.samples() >= MIN_HOURLY_SAMPLES {
                let average = stats.average_hourly_success_rate();
                let ratio = if average > 0.0 {
                    hourly.success_rate() / average
                } else {
                    1.0
                };
                if ratio > 1.2 {
                    0.8
                } else if ratio < 0.8 {
                    1.5
                } else {
                    1.0
                }
            } else {
                1.0
            }
        } else {
            1.0
        };

        let escalation = 2f64
            .powi(stats.consecutive_failures().saturating_sub(1) as i32)
            .min(8.0);

        let delay_ms = self.config.min_delay_ms as f64
            * base_multiplier
            * trend_multiplier
            * time_of_day_multiplier
            * escalation;

        let _ = attempt;

        (delay_ms as u64).clamp(self.config.min_delay_ms, self.config.max_delay_ms)
    }
}

#[async_trait::async_trait]
impl<S: KvStore> AdaptiveDelay for AdaptiveBackoff<S> {
    async fn calculate_delay_ms(&self, service: &str, identifier: &str, attempt: u64) -> u64 {
        self.calculate_delay(service, identifier, attempt).await
    }

    async fn record_success(&self, service: &str, identifier: &str) {
        let now = chrono::Utc::now();
        let mut stats = self.load_stats(service, identifier).await;
        stats.record_success(now.timestamp(), now.hour() as usize);
        self.save_stats(service, identifier, &stats).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shareml_ratelimit::InMemoryStore;

    #[tokio::test]
    async fn high_success_rate_yields_small_multiplier() {
        let store = Arc::new(InMemoryStore::new());
        let backoff = AdaptiveBackoff::new(store, AdaptiveBackoffConfig {
            time_of_day_enabled: false,
            ..Default::default()
        });

        for _ in 0..9 {
            backoff.record_success("llm", "default").await;
        }
        backoff.record_failure("llm", "default").await;

        let delay = backoff.calculate_delay("llm", "default", 1).await;
        // success rate 0.9 > 0.8 -> base 0.5; 1 consecutive failure -> no
        // trend adjustment; escalation = 2^0 = 1.
        assert_eq!(delay, 250);
    }

    #[tokio::test]
    async fn three_consecutive_failures_trigger_trend_and_escalation() {
        let store = Arc::new(InMemoryStore::new());
        let backoff = AdaptiveBackoff::new(store, AdaptiveBackoffConfig {
            time_of_day_enabled: false,
            min_delay_ms: 1000,
            max_delay_ms: 120_000,
        });

        backoff.record_failure("llm", "default").await;
        backoff.record_failure("llm", "default").await;
        backoff.record_failure("llm", "default").await;

        // success rate 0.0 -> base 4.0; trend (>=3 consecutive failures) -> 1.5;
        // escalation = min(2^(3-1), 8) = 4.
        let delay = backoff.calculate_delay("llm", "default", 3).await;
        assert_eq!(delay, 24_000);
    }

    #[tokio::test]
    async fn result_is_clamped_to_configured_max() {
        let store = Arc::new(InMemoryStore::new());
        let backoff = AdaptiveBackoff::new(store, AdaptiveBackoffConfig {
            time_of_day_enabled: false,
            min_delay_ms: 1000,
            max_delay_ms: 5000,
        });

        for _ in 0..8 {
            backoff.record_failure("llm", "default").await;
        }

        let delay = backoff.calculate_delay("llm", "default", 8).await;
        assert_eq!(delay, 5000);
    }

    #[tokio::test]
    async fn record_success_resets_trend_via_adaptive_delay_trait() {
        let store = Arc::new(InMemoryStore::new());
        let backoff = AdaptiveBackoff::new(store, AdaptiveBackoffConfig {
            time_of_day_enabled: false,
            ..Default::default()
        });

        backoff.record_failure("llm", "default").await;
        backoff.record_failure("llm", "default").await;
        AdaptiveDelay::record_success(&backoff, "llm", "default").await;

        // 2 failures + 1 success -> success rate 1/3 (>0.2) -> base 2.0;
        // no active trend (only 1 consecutive success); no escalation.
        let delay = backoff.calculate_delay_ms("llm", "default", 1).await;
        assert_eq!(delay, 1000);
    }
}
