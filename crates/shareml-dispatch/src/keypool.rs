//! The API key pool: a round-robin-by-least-recently-used selector over a
//! set of keys with a small health state machine per key (spec.md §4.E).

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Active,
    RateLimited,
    Error,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: String,
    pub secret: String,
    status: KeyStatus,
    error_count: u32,
    rate_limited_until: Option<Instant>,
    last_used_at: Instant,
}

impl ApiKey {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            status: KeyStatus::Active,
            error_count: 0,
            rate_limited_until: None,
            // Far enough in the past that a brand-new key is always picked
            // before one that was just used.
            last_used_at: Instant::now() - Duration::from_secs(3600),
        }
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }
}

/// The ordered pool of [`ApiKey`] records, selected round-robin by oldest
/// `last_used_at` among currently-active keys.
pub struct ApiKeyPool {
    keys: Mutex<Vec<ApiKey>>,
}

impl ApiKeyPool {
    pub fn new(keys: Vec<ApiKey>) -> Self {
        Self {
            keys: Mutex::new(keys),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recovers any cooled-down `rate_limited` key, then picks the active
    /// key with the oldest `last_used_at`. Returns the key's id and secret
    /// so the caller doesn't hold the pool lock across the provider call.
    pub fn next_available_key(&self) -> Option<(String, String)> {
        let mut keys = self.keys.lock().unwrap();
        let now = Instant::now();

        for key in keys.iter_mut() {
            if key.status == KeyStatus::RateLimited {
                if let Some(until) = key.rate_limited_until {
                    if now >= until {
                        key.status = KeyStatus::Active;
                        key.error_count = 0;
                        key.rate_limited_until = None;
                    }
                }
            }
        }

        let chosen_index = keys
            .iter()
            .enumerate()
            .filter(|(_, key)| key.status == KeyStatus::Active)
            .min_by_key(|(_, key)| key.last_used_at)
            .map(|(index, _)| index)?;

        let key = &mut keys[chosen_index];
        key.last_used_at = now;
        Some((key.id.clone(), key.secret.clone()))
    }

    pub fn mark_rate_limited(&self, id: &str, retry_after: Duration) {
        let mut keys = self.keys.lock().unwrap();
        if let Some(key) = keys.iter_mut().find(|k| k.id == id) {
            key.status = KeyStatus::RateLimited;
            key.rate_limited_until = Some(Instant::now() + retry_after);
            key.error_count += 1;
        }
    }

    pub fn mark_error(&self, id: &str) {
        let mut keys = self.keys.lock().unwrap();
        if let Some(key) = keys.iter_mut().find(|k| k.id == id) {
            key.error_count += 1;
            if key.error_count >= 5 {
                key.status = KeyStatus::Error;
            }
        }
    }

    pub fn mark_success(&self, id: &str) {
        let mut keys = self.keys.lock().unwrap();
        if let Some(key) = keys.iter_mut().find(|k| k.id == id) {
            key.error_count = 0;
            if key.status != KeyStatus::Exhausted {
                key.status = KeyStatus::Active;
            }
        }
    }

    pub fn mark_exhausted(&self, id: &str) {
        let mut keys = self.keys.lock().unwrap();
        if let Some(key) = keys.iter_mut().find(|k| k.id == id) {
            key.status = KeyStatus::Exhausted;
        }
    }

    /// Snapshot of each key's status, for telemetry (spec.md §6.4
    /// `api_key_health_status{service,status}`).
    pub fn statuses(&self) -> Vec<(String, KeyStatus)> {
        self.keys
            .lock()
            .unwrap()
            .iter()
            .map(|k| (k.id.clone(), k.status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_least_recently_used_active_key() {
        let pool = ApiKeyPool::new(vec![ApiKey::new("a", "sa"), ApiKey::new("b", "sb")]);

        let (first, _) = pool.next_available_key().unwrap();
        let (second, _) = pool.next_available_key().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn rate_limited_key_recovers_after_cooldown() {
        let pool = ApiKeyPool::new(vec![ApiKey::new("only", "s")]);
        pool.next_available_key().unwrap();
        pool.mark_rate_limited("only", Duration::from_millis(10));
        assert!(pool.next_available_key().is_none());

        std::thread::sleep(Duration::from_millis(15));
        let recovered = pool.next_available_key();
        assert!(recovered.is_some());
    }

    #[test]
    fn five_errors_moves_key_to_error_status() {
        let pool = ApiKeyPool::new(vec![ApiKey::new("only", "s")]);
        for _ in 0..5 {
            pool.mark_error("only");
        }
        assert!(pool.next_available_key().is_none());
        let statuses = pool.statuses();
        assert_eq!(statuses[0].1, KeyStatus::Error);
    }

    #[test]
    fn success_clears_error_count_and_reactivates() {
        let pool = ApiKeyPool::new(vec![ApiKey::new("only", "s")]);
        for _ in 0..4 {
            pool.mark_error("only");
        }
        pool.mark_success("only");
        assert_eq!(pool.next_available_key().unwrap().0, "only");
    }

    #[test]
    fn exhausted_key_is_never_selected_even_after_success() {
        let pool = ApiKeyPool::new(vec![ApiKey::new("only", "s")]);
        pool.mark_exhausted("only");
        pool.mark_success("only");
        assert!(pool.next_available_key().is_none());
    }
}
