//! Event bus shared by every resilience component in the fabric.
//!
//! Rate limiter, key pool, dispatcher, and runner all emit events through
//! this same listener registry so a worker binary can wire one observability
//! story (metrics export, structured logs, a debug dashboard) across all of
//! them instead of inventing a bespoke hook per component.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::telemetry::FABRIC_EVENT_LISTENER_PANICS_TOTAL;

/// An event emitted by a fabric component.
pub trait FabricEvent: Send + Sync + fmt::Debug {
    /// Short event kind, e.g. `"permit_denied"`, `"key_rotated"`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred.
    fn timestamp(&self) -> Instant;

    /// Name of the component instance that emitted it (service name, pool name, ...).
    fn component(&self) -> &str;
}

/// Subscriber for a specific event type. Implement this directly for a
/// listener that carries its own state across events; for a one-off hook,
/// register a closure with [`EventListeners::add_fn`] instead.
pub trait EventListener<E: FabricEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

struct ClosureListener<F>(F);

impl<E, F> EventListener<E> for ClosureListener<F>
where
    E: FabricEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.0)(event)
    }
}

/// A registry of listeners for one event type, dispatched in registration order.
#[derive(Clone)]
pub struct EventListeners<E: FabricEvent> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
}

impl<E: FabricEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Registers a closure as a listener, without needing a named type.
    pub fn add_fn<F>(&mut self, f: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(ClosureListener(f));
    }

    /// Emits to every listener in order. A listener that panics is isolated:
    /// the panic is caught, reported, and the remaining listeners still run.
    pub fn emit(&self, event: &E) {
        for (index, listener) in self.listeners.iter().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                report_listener_panic(index, event, &payload);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: FabricEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(unused_variables)]
fn report_listener_panic<E: FabricEvent>(
    index: usize,
    event: &E,
    payload: &(dyn std::any::Any + Send),
) {
    #[cfg(feature = "tracing")]
    {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "listener panicked with a non-string payload".to_string());

        tracing::error!(
            listener_index = index,
            component = event.component(),
            event_type = event.event_type(),
            %message,
            "fabric event listener panicked"
        );
    }

    #[cfg(feature = "metrics")]
    metrics::counter!(
        FABRIC_EVENT_LISTENER_PANICS_TOTAL,
        "component" => event.component().to_string(),
        "event_type" => event.event_type().to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestEvent {
        name: String,
        timestamp: Instant,
    }

    impl FabricEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "test"
        }

        fn timestamp(&self) -> Instant {
            self.timestamp
        }

        fn component(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn listeners_all_receive_events() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut listeners = EventListeners::new();
        listeners.add_fn(move |_: &TestEvent| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        let event = TestEvent {
            name: "test".to_string(),
            timestamp: Instant::now(),
        };

        listeners.emit(&event);
        listeners.emit(&event);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let successful = Arc::new(AtomicUsize::new(0));
        let successful_clone = Arc::clone(&successful);

        let mut listeners = EventListeners::new();
        listeners.add_fn(|_: &TestEvent| panic!("boom"));
        listeners.add_fn(move |_: &TestEvent| {
            successful_clone.fetch_add(1, Ordering::SeqCst);
        });

        let event = TestEvent {
            name: "panic-test".to_string(),
            timestamp: Instant::now(),
        };

        listeners.emit(&event);
        assert_eq!(successful.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_and_len_track_registered_listeners() {
        let mut listeners: EventListeners<TestEvent> = EventListeners::new();
        assert!(listeners.is_empty());
        listeners.add_fn(|_: &TestEvent| {});
        assert_eq!(listeners.len(), 1);
        assert!(!listeners.is_empty());
    }
}
