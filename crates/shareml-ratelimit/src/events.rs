use shareml_core::FabricEvent;
use std::time::{Duration, Instant};

/// Events emitted by [`crate::limiter::DistributedRateLimiter`].
#[derive(Debug, Clone)]
pub enum RateLimitEvent {
    CheckAllowed {
        service: String,
        timestamp: Instant,
        remaining: f64,
    },
    CheckDenied {
        service: String,
        timestamp: Instant,
        retry_after: Duration,
    },
    CircuitOpened {
        service: String,
        timestamp: Instant,
    },
}

impl FabricEvent for RateLimitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateLimitEvent::CheckAllowed { .. } => "check_allowed",
            RateLimitEvent::CheckDenied { .. } => "check_denied",
            RateLimitEvent::CircuitOpened { .. } => "circuit_opened",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimitEvent::CheckAllowed { timestamp, .. }
            | RateLimitEvent::CheckDenied { timestamp, .. }
            | RateLimitEvent::CircuitOpened { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            RateLimitEvent::CheckAllowed { service, .. }
            | RateLimitEvent::CheckDenied { service, .. }
            | RateLimitEvent::CircuitOpened { service, .. } => service,
        }
    }
}
