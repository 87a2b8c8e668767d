//! Process-local concurrency limiter bounding simultaneous outbound calls
//! to one provider, grounded on the bulkhead's `Arc<Semaphore>` idiom.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: AtomicUsize,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Non-blocking acquire; `None` means the caller should fail with
    /// `ConcurrencyExhausted`.
    pub fn try_acquire(&self) -> Option<ConcurrencyPermit<'_>> {
        let permit = self.semaphore.try_acquire().ok()?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(ConcurrencyPermit {
            _permit: permit,
            in_flight: &self.in_flight,
        })
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// RAII guard; releasing the slot on drop makes `release()` exit-guaranteed
/// regardless of which branch of the dispatch loop returns.
pub struct ConcurrencyPermit<'a> {
    _permit: SemaphorePermit<'a>,
    in_flight: &'a AtomicUsize,
}

impl Drop for ConcurrencyPermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_up_to_max_then_refuses() {
        let limiter = ConcurrencyLimiter::new(2);
        let p1 = limiter.try_acquire();
        let p2 = limiter.try_acquire();
        assert!(p1.is_some());
        assert!(p2.is_some());
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_flight(), 2);
    }

    #[test]
    fn dropping_permit_releases_the_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        {
            let _permit = limiter.try_acquire().unwrap();
            assert_eq!(limiter.available_slots(), 0);
        }
        assert_eq!(limiter.available_slots(), 1);
        assert_eq!(limiter.in_flight(), 0);
    }
}
