//! Metric, gauge, and histogram names shared across every fabric crate.
//!
//! Centralizing the label set here keeps a dashboard query stable even as
//! the component that emits a metric moves between crates during
//! refactors — every `metrics::counter!`/`gauge!`/`histogram!` call in the
//! workspace should reference one of these constants rather than a string
//! literal.

/// `task, status, worker` labels.
pub const ML_TASKS_TOTAL: &str = "ml_tasks_total";
/// `task, error_kind, worker` labels.
pub const ML_TASK_ERRORS_TOTAL: &str = "ml_task_errors_total";
/// `service, result` labels.
pub const RATE_LIMIT_CHECKS_TOTAL: &str = "rate_limit_checks_total";
/// `service, reason` labels.
pub const API_KEY_ROTATIONS_TOTAL: &str = "api_key_rotations_total";
/// `task, model, worker` labels.
pub const ML_COST_DOLLARS_TOTAL: &str = "ml_cost_dollars_total";

/// No labels.
pub const ML_ACTIVE_TASKS: &str = "ml_active_tasks";
/// `service` label.
pub const RATE_LIMIT_CIRCUIT_BREAKER_OPEN: &str = "rate_limit_circuit_breaker_open";
/// `service, status` labels.
pub const API_KEY_HEALTH_STATUS: &str = "api_key_health_status";
/// `window, service` labels.
pub const ML_BUDGET_REMAINING_DOLLARS: &str = "ml_budget_remaining_dollars";

/// `task, worker` labels.
pub const ML_TASK_DURATION_SECONDS: &str = "ml_task_duration_seconds";
/// `task, model` labels.
pub const ML_MODEL_LATENCY_SECONDS: &str = "ml_model_latency_seconds";
/// `service` label.
pub const RATE_LIMIT_BACKOFF_SECONDS: &str = "rate_limit_backoff_seconds";

/// Emitted internally by [`crate::events::EventListeners`] when a listener panics.
pub const FABRIC_EVENT_LISTENER_PANICS_TOTAL: &str = "fabric_event_listener_panics_total";
