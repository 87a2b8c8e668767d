//! API key pooling, a per-provider concurrency limiter, and the dispatcher
//! that combines them with the distributed rate limiter into one
//! protected call path for third-party provider calls.

pub mod concurrency;
pub mod dispatcher;
pub mod error;
pub mod keypool;

pub use concurrency::{ConcurrencyLimiter, ConcurrencyPermit};
pub use dispatcher::{CostMultipliers, ProviderDispatcher, ProviderOutcome};
pub use error::{DispatchError, ProviderCallError};
pub use keypool::{ApiKey, ApiKeyPool, KeyStatus};
