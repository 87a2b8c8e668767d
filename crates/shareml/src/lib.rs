//! # ShareML Worker Fabric
//!
//! This crate is a thin facade over the individual stages of the ML
//! side-worker pipeline. Each stage is its own crate so a service that only
//! needs, say, content preflight can depend on `shareml-preflight` directly;
//! this crate exists for binaries that want the whole pipeline behind one
//! dependency and one set of feature flags.
//!
//! ## Pipeline
//!
//! A job moves through the stages in this order:
//!
//! ```text
//! ┌──────────────┐
//! │   Delivery   │  broker message, opaque bytes + headers
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │  contracts   │  ← parse envelope, validate payload shape
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │  preflight   │  ← reject spam/empty/oversized content before paying for a call
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │    store     │  ← budget check (fail-open) and singleton lock
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   dispatch   │  ← key pool + bulkhead + provider call
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │    store     │  ← persist result, cost, embeddings
//! └──────────────┘
//! ```
//!
//! `runner::process_delivery` drives this whole sequence for one broker
//! delivery: it owns trace extraction, the contracts and lock stages, and
//! the retry/ack decision around whatever closure you hand it for the
//! preflight/dispatch/store middle.
//!
//! ## Feature flags
//!
//! Every stage past `shareml-core` is optional. Enable only what a given
//! binary uses, or `full` for everything. `postgres` and `amqp` swap the
//! in-memory store/broker for their durable backends.
//!
//! ## Layer ordering
//!
//! Preflight runs before dispatch, not after: validating and truncating
//! content is cheap, a provider call is not. The singleton lock is acquired
//! before dispatch and released on every outcome, including a requeue — see
//! `shareml_runner::runner` for why a requeue can't hold the lock across
//! redelivery without risking a deadlock against its own retry.

pub use shareml_core as core;

#[cfg(feature = "ratelimit")]
pub use shareml_ratelimit as ratelimit;

#[cfg(feature = "backoff")]
pub use shareml_backoff as backoff;

#[cfg(feature = "dispatch")]
pub use shareml_dispatch as dispatch;

#[cfg(feature = "preflight")]
pub use shareml_preflight as preflight;

#[cfg(feature = "contracts")]
pub use shareml_contracts as contracts;

#[cfg(feature = "store")]
pub use shareml_store as store;

#[cfg(feature = "runner")]
pub use shareml_runner as runner;

#[cfg(feature = "full")]
pub mod composition;
