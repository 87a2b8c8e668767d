//! The store-level circuit breaker spec.md §4.C.1 requires: any store error
//! trips it, and it stays open for a fixed window regardless of how many
//! more errors arrive while it's open.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
}

pub(crate) struct StoreCircuit {
    state: AtomicU8,
    opened_at: Mutex<Option<Instant>>,
    open_for: Duration,
}

impl StoreCircuit {
    pub(crate) fn new(open_for: Duration) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            opened_at: Mutex::new(None),
            open_for,
        }
    }

    /// Checks whether the circuit has self-healed past its open window and
    /// returns the current state as of now.
    pub(crate) fn state(&self) -> CircuitState {
        if self.state.load(Ordering::Acquire) == CircuitState::Open as u8 {
            let mut opened_at = self.opened_at.lock().unwrap();
            if let Some(at) = *opened_at {
                if at.elapsed() >= self.open_for {
                    *opened_at = None;
                    self.state.store(CircuitState::Closed as u8, Ordering::Release);
                    return CircuitState::Closed;
                }
            }
            return CircuitState::Open;
        }
        CircuitState::Closed
    }

    pub(crate) fn trip(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        *self.opened_at.lock().unwrap() = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_open_on_demand_and_heals_after_window() {
        let circuit = StoreCircuit::new(Duration::from_millis(20));
        assert_eq!(circuit.state(), CircuitState::Closed);
        circuit.trip();
        assert_eq!(circuit.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(circuit.state(), CircuitState::Closed);
    }
}
