//! Ambient crate for the ML worker fabric: the cross-component event bus,
//! the closed [`error::TaskError`] taxonomy the runner decides ack/retry on,
//! and the shared telemetry name constants.

pub mod error;
pub mod events;
pub mod telemetry;

pub use error::{RunnerAction, TaskError};
pub use events::{EventListener, EventListeners, FabricEvent};
