//! Per-service rate limit configuration, loaded from a YAML document with
//! an embedded fallback so a misconfigured or absent file never blocks a
//! worker from starting (spec.md §4.A).

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_CONFIG_YAML: &str = include_str!("default_config.yaml");

/// One rate-limiting algorithm attached to a service. Parsed out of the
/// looser [`RawLimit`] shape rather than derived directly, since the
/// `algorithm` tag determines which of the other fields are meaningful.
#[derive(Debug, Clone)]
pub enum Limit {
    SlidingWindow { window_secs: u64, limit: f64 },
    TokenBucket {
        capacity: f64,
        refill_per_sec: f64,
        ttl_secs: u64,
    },
}

fn default_window_secs() -> u64 {
    60
}

fn default_bucket_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    Adaptive,
}

/// Backoff policy attached to a service, consulted by
/// [`crate::limiter::DistributedRateLimiter::get_backoff_delay`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub initial_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial_ms: 1_000,
            multiplier: 2.0,
            max_ms: 60_000,
            jitter: true,
        }
    }
}

/// Configuration for a single service (`llm`, `whisper`, `vector`, ...).
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enable_rate_limiting: bool,
    pub limits: Vec<Limit>,
    pub backoff: BackoffPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            limits: Vec::new(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl Limit {
    pub fn window(&self) -> Option<Duration> {
        match self {
            Limit::SlidingWindow { window_secs, .. } => Some(Duration::from_secs(*window_secs)),
            Limit::TokenBucket { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(flatten)]
    services: HashMap<String, RawServiceConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawServiceConfig {
    enable_rate_limiting: bool,
    limits: Vec<RawLimit>,
    backoff: BackoffPolicy,
}

impl Default for RawServiceConfig {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            limits: Vec::new(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct RawLimit {
    algorithm: String,
    #[serde(default = "default_window_secs")]
    window_secs: u64,
    #[serde(default)]
    limit: f64,
    #[serde(default)]
    capacity: f64,
    #[serde(default)]
    refill_per_sec: f64,
    #[serde(default = "default_bucket_ttl_secs")]
    ttl_secs: u64,
}

/// The full, per-service map of rate-limit configs.
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfigMap {
    services: HashMap<String, RateLimitConfig>,
}

impl RateLimitConfigMap {
    /// Looks up config for a service. Absent config is not an error at
    /// this layer — spec.md §4.C treats an absent config as "allowed,
    /// log warning" at the limiter, not here.
    pub fn get(&self, service: &str) -> Option<&RateLimitConfig> {
        self.services.get(service)
    }

    /// Loads the embedded default set covering `llm`, `whisper`, `vector`.
    pub fn defaults() -> Self {
        Self::parse(DEFAULT_CONFIG_YAML).expect("embedded default rate limit config must parse")
    }

    /// Parses a YAML document, falling back to the embedded defaults if the
    /// document is empty or fails to parse — unknown algorithm names still
    /// fail fast since they indicate a real typo, not an absent file.
    pub fn load(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::defaults());
        }
        match Self::parse(yaml) {
            Ok(map) => Ok(map),
            Err(ConfigError::UnknownAlgorithm(name)) => Err(ConfigError::UnknownAlgorithm(name)),
            Err(_) => Ok(Self::defaults()),
        }
    }

    fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument = serde_yaml::from_str(yaml)?;
        let mut services = HashMap::new();

        for (name, raw_service) in raw.services {
            let mut limits = Vec::with_capacity(raw_service.limits.len());
            for raw_limit in raw_service.limits {
                let limit = match raw_limit.algorithm.as_str() {
                    "sliding_window" => Limit::SlidingWindow {
                        window_secs: raw_limit.window_secs,
                        limit: raw_limit.limit,
                    },
                    "token_bucket" => Limit::TokenBucket {
                        capacity: raw_limit.capacity,
                        refill_per_sec: raw_limit.refill_per_sec,
                        ttl_secs: raw_limit.ttl_secs,
                    },
                    other => return Err(ConfigError::UnknownAlgorithm(other.to_string())),
                };
                limits.push(limit);
            }

            services.insert(
                name,
                RateLimitConfig {
                    enable_rate_limiting: raw_service.enable_rate_limiting,
                    limits,
                    backoff: raw_service.backoff,
                },
            );
        }

        Ok(Self { services })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_cover_recognized_providers() {
        let defaults = RateLimitConfigMap::defaults();
        assert!(defaults.get("llm").is_some());
        assert!(defaults.get("whisper").is_some());
        assert!(defaults.get("vector").is_some());
    }

    #[test]
    fn unknown_algorithm_fails_fast() {
        let yaml = "llm:\n  limits:\n    - algorithm: made_up\n";
        let err = RateLimitConfigMap::load(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAlgorithm(_)));
    }

    #[test]
    fn empty_document_falls_back_to_defaults() {
        let map = RateLimitConfigMap::load("").unwrap();
        assert!(map.get("llm").is_some());
    }
}
