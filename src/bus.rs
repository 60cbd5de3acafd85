//! Prioritized in-process event bus
//!
//! Delivers envelopes to subscribers in deterministic priority order with
//! per-handler error isolation. Handler failures are captured and re-emitted
//! as `system.handler_error` events; unsubscription by handler identity
//! supports runtime module detach.

use crate::error::{DispatchError, Result};
use crate::types::{EventEnvelope, EventKind};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Boxed future returned by event handlers
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// An async event handler with a stable identity
///
/// Clones share the same underlying function; identity (used by
/// [`EventBus::unsubscribe`]) is pointer identity of that function. The
/// label appears in logs and `system.handler_error` payloads.
#[derive(Clone)]
pub struct EventHandler {
    label: Arc<str>,
    func: Arc<dyn Fn(EventEnvelope) -> HandlerFuture + Send + Sync>,
}

impl EventHandler {
    /// Wrap an async function as an event handler
    pub fn new<F, Fut>(label: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            func: Arc::new(move |event| Box::pin(f(event))),
        }
    }

    /// Diagnostic label for logs and error payloads
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether two handles refer to the same underlying handler
    pub fn same_handler(&self, other: &EventHandler) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }

    fn invoke(&self, event: EventEnvelope) -> HandlerFuture {
        (self.func)(event)
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("label", &self.label)
            .finish()
    }
}

/// Registration of a handler under an event name
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Event name this subscription listens to
    pub name: String,

    /// The handler invoked on delivery
    pub handler: EventHandler,

    /// Lower runs earlier; ties break by registration order
    pub priority: i32,

    /// Skip remaining subscribers of the event after an isolated failure
    pub stop_on_error: bool,

    /// Capture failures and emit `system.handler_error` instead of
    /// propagating them to the publisher
    pub isolate_errors: bool,
}

impl Subscription {
    /// Create a subscription with default priority 100, isolated errors
    pub fn new(name: impl Into<String>, handler: EventHandler) -> Self {
        Self {
            name: name.into(),
            handler,
            priority: 100,
            stop_on_error: false,
            isolate_errors: true,
        }
    }

    /// Set the delivery priority (lower is earlier)
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Stop delivery to remaining subscribers after an isolated failure
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Control whether failures are isolated or propagate to the publisher
    pub fn with_isolate_errors(mut self, isolate_errors: bool) -> Self {
        self.isolate_errors = isolate_errors;
        self
    }
}

/// In-process pub/sub with deterministic delivery order
///
/// Within one `publish`, handlers run sequentially in priority order; a
/// handler completes before the next begins. Subscription changes during a
/// publish do not affect the in-flight delivery (snapshot semantics).
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription
    ///
    /// Duplicate handlers are allowed; each registration is independent.
    pub fn subscribe(&self, sub: Subscription) {
        tracing::debug!(
            event = %sub.name,
            handler = sub.handler.label(),
            priority = sub.priority,
            "Subscribed handler"
        );

        let mut map = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let subs = map.entry(sub.name.clone()).or_default();
        subs.push(sub);
        subs.sort_by_key(|s| s.priority);
    }

    /// Remove every subscription matching (name, handler identity)
    ///
    /// Returns the number of removed subscriptions.
    pub fn unsubscribe(&self, name: &str, handler: &EventHandler) -> usize {
        let mut map = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(subs) = map.get_mut(name) else {
            return 0;
        };

        let before = subs.len();
        subs.retain(|s| !s.handler.same_handler(handler));
        let removed = before - subs.len();

        if subs.is_empty() {
            map.remove(name);
        }

        if removed > 0 {
            tracing::debug!(event = %name, handler = handler.label(), removed, "Unsubscribed handler");
        }
        removed
    }

    /// Deliver an envelope to every subscriber of its name
    ///
    /// Failures in subscriptions with `isolate_errors` become
    /// `system.handler_error` events; a non-isolated failure aborts delivery
    /// and surfaces to the caller.
    pub async fn publish(&self, event: &EventEnvelope) -> Result<()> {
        let subs = self.snapshot(&event.name);
        if subs.is_empty() {
            tracing::debug!(event = %event.name, "No subscribers for event");
            return Ok(());
        }

        for sub in subs {
            let Err(err) = sub.handler.invoke(event.clone()).await else {
                continue;
            };

            tracing::error!(
                event = %event.name,
                handler = sub.handler.label(),
                error = %err,
                "Error in event handler"
            );

            if !sub.isolate_errors {
                return Err(DispatchError::Handler {
                    event: event.name.clone(),
                    handler: sub.handler.label().to_string(),
                    reason: err.to_string(),
                });
            }

            let mut err_event = EventEnvelope::new(
                "system.handler_error",
                EventKind::System,
                event.tenant_id.clone(),
                event.trace_id.clone(),
            )
            .with_payload(serde_json::json!({
                "failed_event": event.name,
                "handler": sub.handler.label(),
                "error_type": err.kind(),
                "error_message": err.to_string(),
            }));
            err_event.request_id = event.request_id.clone();
            err_event.ticket_id = event.ticket_id.clone();

            self.publish_internal(&err_event).await;

            if sub.stop_on_error {
                break;
            }
        }

        Ok(())
    }

    /// Deliver a system event, swallowing handler failures
    ///
    /// Used for `system.handler_error` so a failing system handler cannot
    /// recurse back into error emission.
    async fn publish_internal(&self, event: &EventEnvelope) {
        for sub in self.snapshot(&event.name) {
            if let Err(err) = sub.handler.invoke(event.clone()).await {
                tracing::error!(
                    event = %event.name,
                    handler = sub.handler.label(),
                    error = %err,
                    "Error in system event handler"
                );
            }
        }
    }

    fn snapshot(&self, name: &str) -> Vec<Subscription> {
        let map = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        map.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_handler(label: &str, log: Arc<Mutex<Vec<String>>>) -> EventHandler {
        let label_owned = label.to_string();
        EventHandler::new(label.to_string(), move |event: EventEnvelope| {
            let log = log.clone();
            let label = label_owned.clone();
            async move {
                log.lock().unwrap().push(format!("{}:{}", label, event.name));
                Ok(())
            }
        })
    }

    fn failing_handler(label: &str) -> EventHandler {
        EventHandler::new(label.to_string(), |_event: EventEnvelope| async {
            Err(DispatchError::Config("boom".to_string()))
        })
    }

    fn domain_event(name: &str) -> EventEnvelope {
        EventEnvelope::new(name, EventKind::Domain, "tenant-a", "trc-1").with_request_id("req-1")
    }

    #[tokio::test]
    async fn test_publish_priority_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            Subscription::new("demo.event", recording_handler("late", log.clone()))
                .with_priority(100),
        );
        bus.subscribe(
            Subscription::new("demo.event", recording_handler("early", log.clone()))
                .with_priority(10),
        );
        bus.subscribe(
            Subscription::new("demo.event", recording_handler("mid", log.clone()))
                .with_priority(50),
        );

        bus.publish(&domain_event("demo.event")).await.unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec!["early:demo.event", "mid:demo.event", "late:demo.event"]
        );
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["a", "b", "c"] {
            bus.subscribe(Subscription::new(
                "demo.event",
                recording_handler(label, log.clone()),
            ));
        }

        bus.publish(&domain_event("demo.event")).await.unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["a:demo.event", "b:demo.event", "c:demo.event"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_all_matching() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recording_handler("dup", log.clone());

        bus.subscribe(Subscription::new("demo.event", handler.clone()));
        bus.subscribe(Subscription::new("demo.event", handler.clone()).with_priority(10));

        assert_eq!(bus.unsubscribe("demo.event", &handler), 2);
        assert_eq!(bus.unsubscribe("demo.event", &handler), 0);

        bus.publish(&domain_event("demo.event")).await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_event_is_noop() {
        let bus = EventBus::new();
        let handler = failing_handler("nobody");
        assert_eq!(bus.unsubscribe("missing.event", &handler), 0);
    }

    #[tokio::test]
    async fn test_isolated_failure_emits_system_event() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            Subscription::new("demo.event", failing_handler("broken")).with_priority(10),
        );
        bus.subscribe(
            Subscription::new("demo.event", recording_handler("survivor", log.clone()))
                .with_priority(20),
        );

        let captured_clone = captured.clone();
        bus.subscribe(Subscription::new(
            "system.handler_error",
            EventHandler::new("sys-log", move |event: EventEnvelope| {
                let captured = captured_clone.clone();
                async move {
                    captured.lock().unwrap().push(event);
                    Ok(())
                }
            }),
        ));

        bus.publish(&domain_event("demo.event")).await.unwrap();

        // delivery continued past the failing handler
        assert_eq!(log.lock().unwrap().clone(), vec!["survivor:demo.event"]);

        let events = captured.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        let err_event = &events[0];
        assert_eq!(err_event.kind, EventKind::System);
        assert_eq!(err_event.tenant_id, "tenant-a");
        assert_eq!(err_event.trace_id, "trc-1");
        assert_eq!(err_event.request_id.as_deref(), Some("req-1"));
        assert_eq!(err_event.payload["failed_event"], "demo.event");
        assert_eq!(err_event.payload["handler"], "broken");
        assert_eq!(err_event.payload["error_type"], "config");
        assert!(err_event.payload["error_message"]
            .as_str()
            .unwrap()
            .contains("boom"));
    }

    #[tokio::test]
    async fn test_stop_on_error_skips_remaining() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            Subscription::new("demo.event", failing_handler("broken"))
                .with_priority(10)
                .with_stop_on_error(true),
        );
        bus.subscribe(
            Subscription::new("demo.event", recording_handler("skipped", log.clone()))
                .with_priority(20),
        );

        bus.publish(&domain_event("demo.event")).await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_isolated_failure_propagates() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            Subscription::new("demo.event", failing_handler("fatal"))
                .with_priority(10)
                .with_isolate_errors(false),
        );
        bus.subscribe(
            Subscription::new("demo.event", recording_handler("aborted", log.clone()))
                .with_priority(20),
        );

        let err = bus.publish(&domain_event("demo.event")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_system_handler_is_swallowed() {
        let bus = EventBus::new();

        bus.subscribe(Subscription::new("demo.event", failing_handler("broken")));
        bus.subscribe(Subscription::new(
            "system.handler_error",
            failing_handler("broken-sys"),
        ));

        // must not recurse or surface the system handler failure
        bus.publish(&domain_event("demo.event")).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_during_publish_misses_inflight_event() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let bus_clone = bus.clone();
        let log_clone = log.clone();
        bus.subscribe(Subscription::new(
            "demo.event",
            EventHandler::new("registrar", move |_event: EventEnvelope| {
                let bus = bus_clone.clone();
                let log = log_clone.clone();
                async move {
                    bus.subscribe(Subscription::new(
                        "demo.event",
                        recording_handler("latecomer", log),
                    ));
                    Ok(())
                }
            }),
        ));

        bus.publish(&domain_event("demo.event")).await.unwrap();
        assert!(log.lock().unwrap().is_empty(), "snapshot excludes latecomer");

        // the next publish reaches the newly registered handler
        bus.publish(&domain_event("demo.event")).await.unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec!["latecomer:demo.event"]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish(&domain_event("nobody.listens")).await.unwrap();
    }
}
