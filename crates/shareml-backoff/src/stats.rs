//! Per-`(service, identifier)` statistics the adaptive algorithm consults,
//! serialized into the shared store so the trend and hour-of-day history
//! survives across worker processes (spec.md §4.D).

use serde::{Deserialize, Serialize};

const HISTORY_RETENTION_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct HourlyStat {
    pub successes: u64,
    pub failures: u64,
}

impl HourlyStat {
    pub fn samples(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.samples();
        if total == 0 {
            0.0
        } else {
            self.successes as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Outcome {
    success: bool,
    at_epoch_secs: i64,
}

/// Rolling statistics for one `(service, identifier)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdaptiveStats {
    consecutive_successes: u32,
    consecutive_failures: u32,
    /// Outcomes within the last hour; pruned on every read.
    history: Vec<Outcome>,
    /// Indexed by hour-of-day (0-23), accumulated forever (not pruned —
    /// this is what lets the time-of-day multiplier learn over weeks).
    hourly: [HourlyStat; 24],
}

impl AdaptiveStats {
    pub fn record_failure(&mut self, now_epoch_secs: i64, hour_of_day: usize) {
        self.prune(now_epoch_secs);
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.history.push(Outcome {
            success: false,
            at_epoch_secs: now_epoch_secs,
        });
        self.hourly[hour_of_day % 24].failures += 1;
    }

    pub fn record_success(&mut self, now_epoch_secs: i64, hour_of_day: usize) {
        self.prune(now_epoch_secs);
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
        self.history.push(Outcome {
            success: true,
            at_epoch_secs: now_epoch_secs,
        });
        self.hourly[hour_of_day % 24].successes += 1;
    }

    fn prune(&mut self, now_epoch_secs: i64) {
        self.history
            .retain(|o| now_epoch_secs - o.at_epoch_secs <= HISTORY_RETENTION_SECS);
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Overall success rate over the retained (≤1h) history.
    pub fn overall_success_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 1.0;
        }
        let successes = self.history.iter().filter(|o| o.success).count();
        successes as f64 / self.history.len() as f64
    }

    pub fn hourly(&self, hour_of_day: usize) -> HourlyStat {
        self.hourly[hour_of_day % 24]
    }

    pub fn average_hourly_success_rate(&self) -> f64 {
        let with_samples: Vec<&HourlyStat> = self.hourly.iter().filter(|h| h.samples() > 0).collect();
        if with_samples.is_empty() {
            return 1.0;
        }
        let sum: f64 = with_samples.iter().map(|h| h.success_rate()).sum();
        sum / with_samples.len() as f64
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prunes_outcomes_older_than_an_hour() {
        let mut stats = AdaptiveStats::default();
        stats.record_success(0, 0);
        stats.record_success(HISTORY_RETENTION_SECS + 1, 1);
        assert_eq!(stats.history.len(), 1);
    }

    #[test]
    fn tracks_consecutive_runs_independently_per_outcome() {
        let mut stats = AdaptiveStats::default();
        stats.record_success(0, 0);
        stats.record_success(1, 0);
        stats.record_success(2, 0);
        assert_eq!(stats.consecutive_successes(), 3);
        stats.record_failure(3, 0);
        assert_eq!(stats.consecutive_failures(), 1);
        assert_eq!(stats.consecutive_successes(), 0);
    }

    #[test]
    fn json_round_trips() {
        let mut stats = AdaptiveStats::default();
        stats.record_success(0, 5);
        stats.record_failure(1, 5);
        let restored = AdaptiveStats::from_json(&stats.to_json());
        assert_eq!(restored.consecutive_failures(), 1);
        assert_eq!(restored.hourly(5).samples(), 2);
    }
}
