//! Durable result/cost/embedding storage, budget enforcement, and the
//! singleton execution guard.

pub mod budget;
pub mod error;
pub mod lock;
pub mod models;
pub mod store;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use budget::{BudgetDecision, BudgetLimits};
pub use error::StoreError;
pub use models::{CostEntry, EmbeddingChunk, ResultRecord};
pub use store::{check_budget_fail_open, InMemoryResultStore, ResultStore};

#[cfg(feature = "postgres")]
pub use postgres::PgResultStore;
