//! Core data types for the dispatch runtime
//!
//! All types use camelCase JSON serialization for wire compatibility.
//! Event payload keys follow the stable snake_case event contract.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Category of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Application-domain event
    Domain,
    /// Service lifecycle event emitted by the executor
    Service,
    /// Runtime-internal event (config updates, handler failures)
    System,
}

/// An immutable event record
///
/// Events are published under dotted names following the stable contract:
/// `service.{op_name}.{status}`, `config.tenant_updated`,
/// `system.handler_error`. Envelopes are append-only values; never mutated
/// after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Dotted event name (e.g., "service.text_compose.ok")
    pub name: String,

    /// Event category
    pub kind: EventKind,

    /// Tenant this event belongs to
    pub tenant_id: String,

    /// Unique event identifier (evt-<uuid>)
    pub event_id: String,

    /// Trace identifier linking a logical flow
    pub trace_id: String,

    /// Unix timestamp in milliseconds
    pub occurred_at_ms: u64,

    /// Event payload — arbitrary JSON object
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Optional correlation to the originating request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Optional correlation to a deferred ticket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
}

impl EventEnvelope {
    /// Create a new envelope with auto-generated id and timestamp
    pub fn new(
        name: impl Into<String>,
        kind: EventKind,
        tenant_id: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            tenant_id: tenant_id.into(),
            event_id: new_id("evt"),
            trace_id: trace_id.into(),
            occurred_at_ms: now_millis(),
            payload: serde_json::json!({}),
            request_id: None,
            ticket_id: None,
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Correlate with a request
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Correlate with a deferred ticket
    pub fn with_ticket_id(mut self, ticket_id: impl Into<String>) -> Self {
        self.ticket_id = Some(ticket_id.into());
        self
    }
}

/// Terminal status of a service result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// Operation succeeded; `data` is present
    Ok,
    /// Operation failed; `error` is present
    Error,
    /// Final result will arrive later under `ticket_id`
    Deferred,
    /// `data` is present; more values may arrive on the companion stream
    Partial,
}

impl ResultStatus {
    /// Stable wire name, used in service event names
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Ok => "ok",
            ResultStatus::Error => "error",
            ResultStatus::Deferred => "deferred",
            ResultStatus::Partial => "partial",
        }
    }
}

/// Machine-readable failure description carried by error results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Stable machine code (e.g., "timeout", "in_progress")
    pub code: String,

    /// Safe human-readable message
    pub message: String,

    /// Whether the caller may retry
    #[serde(default)]
    pub retryable: bool,

    /// Optional structured details
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ErrorInfo {
    /// Create an error description
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
            details: serde_json::json!({}),
        }
    }

    /// Executor deadline expiry
    pub fn timeout(retryable: bool) -> Self {
        Self::new("timeout", "Service timeout", retryable)
    }

    /// Uncaught failure surfaced from a terminal operation
    pub fn exception(message: impl Into<String>, retryable: bool) -> Self {
        Self::new("exception", message, retryable)
    }

    /// Idempotency lock contention
    pub fn in_progress() -> Self {
        Self::new("in_progress", "Operation in progress", true)
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Observability metadata attached to every service result
///
/// Never contains secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMeta {
    pub request_id: String,
    pub tenant_id: String,
    pub trace_id: String,
    pub started_at_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,

    /// Name of the provider that produced the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,

    /// Attempt number this result belongs to (1-based)
    #[serde(default = "default_attempt")]
    pub attempt: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Free-form diagnostic tags
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn default_attempt() -> u32 {
    1
}

impl ResultMeta {
    /// Build meta from a service call, copying its correlation fields
    pub fn for_call(call: &ServiceCall, started_at_ms: u64) -> Self {
        Self {
            request_id: call.request_id.clone(),
            tenant_id: call.tenant_id.clone(),
            trace_id: call.trace_id.clone(),
            started_at_ms,
            finished_at_ms: None,
            provider_name: None,
            attempt: 1,
            idempotency_key: call.idempotency_key.clone(),
            tags: call.tags.clone(),
        }
    }

    /// Record completion time
    pub fn with_finished_at(mut self, finished_at_ms: u64) -> Self {
        self.finished_at_ms = Some(finished_at_ms);
        self
    }

    /// Record the producing provider
    pub fn with_provider(mut self, provider_name: impl Into<String>) -> Self {
        self.provider_name = Some(provider_name.into());
        self
    }

    /// Record the attempt number
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Companion stream of additional partial values
///
/// Finite and non-restartable: the underlying stream can be taken exactly
/// once. Clones share the same stream, so a cached partial result hands the
/// stream to whichever consumer takes it first.
#[derive(Clone)]
pub struct ResultStream {
    inner: Arc<Mutex<Option<BoxStream<'static, serde_json::Value>>>>,
}

impl ResultStream {
    /// Wrap a finite stream of additional values
    pub fn new(stream: impl futures::Stream<Item = serde_json::Value> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::pin(stream)))),
        }
    }

    /// Take the underlying stream; returns `None` if already consumed
    pub fn take(&self) -> Option<BoxStream<'static, serde_json::Value>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResultStream")
    }
}

/// Outcome of a service operation
///
/// Shape invariants are enforced by the constructors:
/// - `ok` carries `data`, never `error`
/// - `error` carries `error`, never `data`
/// - `deferred` carries `ticket_id`; the final result arrives later via the
///   deferred store and a `*.completed` event
/// - `partial` carries `data` and may carry a companion stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResult {
    pub status: ResultStatus,
    pub meta: ResultMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,

    /// Companion stream for partial results; not serialized
    #[serde(skip)]
    pub stream: Option<ResultStream>,
}

impl ServiceResult {
    /// Successful result with data
    pub fn ok(meta: ResultMeta, data: serde_json::Value) -> Self {
        Self {
            status: ResultStatus::Ok,
            meta,
            data: Some(data),
            error: None,
            ticket_id: None,
            stream: None,
        }
    }

    /// Failed result with error description
    pub fn error(meta: ResultMeta, error: ErrorInfo) -> Self {
        Self {
            status: ResultStatus::Error,
            meta,
            data: None,
            error: Some(error),
            ticket_id: None,
            stream: None,
        }
    }

    /// Deferred result referencing a ticket
    pub fn deferred(meta: ResultMeta, ticket_id: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Deferred,
            meta,
            data: None,
            error: None,
            ticket_id: Some(ticket_id.into()),
            stream: None,
        }
    }

    /// Partial result with initial data
    pub fn partial(meta: ResultMeta, data: serde_json::Value) -> Self {
        Self {
            status: ResultStatus::Partial,
            meta,
            data: Some(data),
            error: None,
            ticket_id: None,
            stream: None,
        }
    }

    /// Attach a companion stream (partial results)
    pub fn with_stream(mut self, stream: ResultStream) -> Self {
        self.stream = Some(stream);
        self
    }
}

/// Parameters of one service invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCall {
    pub tenant_id: String,
    pub request_id: String,
    pub trace_id: String,

    /// Wall-clock deadline per attempt, must be > 0
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempt budget, must be ≥ 1
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Optional key scoping the idempotent-coalescing contract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Arbitrary safe metadata (no secrets)
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_max_attempts() -> u32 {
    2
}

impl ServiceCall {
    /// Create a call with default timeout and attempt budget
    pub fn new(
        tenant_id: impl Into<String>,
        request_id: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            request_id: request_id.into(),
            trace_id: trace_id.into(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            idempotency_key: None,
            tags: HashMap::new(),
        }
    }

    /// Set the per-attempt timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Add a diagnostic tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Per-request runtime context constructed by transports
///
/// Carries tenant identity, correlation ids, and locale through a logical
/// flow; service calls are derived from it.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub tenant_id: String,
    pub request_id: String,
    pub trace_id: String,
    pub started_at_ms: u64,
    pub locale: String,
    pub tags: HashMap<String, String>,
}

impl RuntimeContext {
    /// Mint a fresh context with generated request and trace ids
    pub fn new(tenant_id: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            request_id: new_id("req"),
            trace_id: new_id("trc"),
            started_at_ms: now_millis(),
            locale: locale.into(),
            tags: HashMap::new(),
        }
    }

    /// Add a diagnostic tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Derive a service call sharing this context's correlation fields
    pub fn service_call(&self) -> ServiceCall {
        ServiceCall {
            tenant_id: self.tenant_id.clone(),
            request_id: self.request_id.clone(),
            trace_id: self.trace_id.clone(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            idempotency_key: None,
            tags: self.tags.clone(),
        }
    }
}

/// Generate a prefixed unique id (e.g., "req-<uuid>")
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Current time in Unix milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_envelope_creation() {
        let evt = EventEnvelope::new("demo.event", EventKind::Domain, "tenant-a", "trc-1");

        assert!(evt.event_id.starts_with("evt-"));
        assert_eq!(evt.name, "demo.event");
        assert_eq!(evt.kind, EventKind::Domain);
        assert_eq!(evt.tenant_id, "tenant-a");
        assert!(evt.occurred_at_ms > 0);
        assert!(evt.request_id.is_none());
        assert!(evt.ticket_id.is_none());
    }

    #[test]
    fn test_envelope_builder() {
        let evt = EventEnvelope::new("service.op.ok", EventKind::Service, "tenant-a", "trc-1")
            .with_payload(serde_json::json!({"service_key": "TextComposer"}))
            .with_request_id("req-1")
            .with_ticket_id("tkt-1");

        assert_eq!(evt.payload["service_key"], "TextComposer");
        assert_eq!(evt.request_id.as_deref(), Some("req-1"));
        assert_eq!(evt.ticket_id.as_deref(), Some("tkt-1"));
    }

    #[test]
    fn test_envelope_serialization_roundtrip() {
        let evt = EventEnvelope::new("config.tenant_updated", EventKind::System, "t1", "trc-9")
            .with_payload(serde_json::json!({"services": {}}));

        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains("\"kind\":\"system\""));
        assert!(json.contains("\"tenantId\":\"t1\""));

        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_id, evt.event_id);
        assert_eq!(parsed.kind, EventKind::System);
    }

    #[test]
    fn test_result_status_wire_names() {
        assert_eq!(ResultStatus::Ok.as_str(), "ok");
        assert_eq!(ResultStatus::Error.as_str(), "error");
        assert_eq!(ResultStatus::Deferred.as_str(), "deferred");
        assert_eq!(ResultStatus::Partial.as_str(), "partial");
    }

    #[test]
    fn test_service_result_shapes() {
        let call = ServiceCall::new("t1", "req-1", "trc-1");
        let meta = ResultMeta::for_call(&call, now_millis());

        let ok = ServiceResult::ok(meta.clone(), serde_json::json!({"text": "hi"}));
        assert_eq!(ok.status, ResultStatus::Ok);
        assert!(ok.data.is_some());
        assert!(ok.error.is_none());

        let err = ServiceResult::error(meta.clone(), ErrorInfo::timeout(false));
        assert_eq!(err.status, ResultStatus::Error);
        assert!(err.data.is_none());
        assert_eq!(err.error.as_ref().unwrap().code, "timeout");

        let deferred = ServiceResult::deferred(meta.clone(), "tkt-1");
        assert_eq!(deferred.status, ResultStatus::Deferred);
        assert_eq!(deferred.ticket_id.as_deref(), Some("tkt-1"));
        assert!(deferred.data.is_none());

        let partial = ServiceResult::partial(meta, serde_json::json!({"chunk": 1}));
        assert_eq!(partial.status, ResultStatus::Partial);
        assert!(partial.data.is_some());
    }

    #[test]
    fn test_error_info_constructors() {
        let timeout = ErrorInfo::timeout(true);
        assert_eq!(timeout.code, "timeout");
        assert_eq!(timeout.message, "Service timeout");
        assert!(timeout.retryable);

        let in_progress = ErrorInfo::in_progress();
        assert_eq!(in_progress.code, "in_progress");
        assert!(in_progress.retryable);

        let exc = ErrorInfo::exception("boom", false);
        assert_eq!(exc.code, "exception");
        assert_eq!(exc.message, "boom");
        assert!(!exc.retryable);
    }

    #[test]
    fn test_meta_for_call_copies_correlation() {
        let call = ServiceCall::new("t1", "req-1", "trc-1")
            .with_idempotency_key("K")
            .with_tag("channel", "http");
        let meta = ResultMeta::for_call(&call, 42).with_attempt(3).with_provider("p1");

        assert_eq!(meta.request_id, "req-1");
        assert_eq!(meta.tenant_id, "t1");
        assert_eq!(meta.started_at_ms, 42);
        assert_eq!(meta.attempt, 3);
        assert_eq!(meta.idempotency_key.as_deref(), Some("K"));
        assert_eq!(meta.provider_name.as_deref(), Some("p1"));
        assert_eq!(meta.tags["channel"], "http");
    }

    #[test]
    fn test_service_call_defaults_and_builders() {
        let call = ServiceCall::new("t1", "req-1", "trc-1");
        assert_eq!(call.timeout_ms, 3_000);
        assert_eq!(call.max_attempts, 2);
        assert!(call.idempotency_key.is_none());

        let tuned = call.with_timeout_ms(50).with_max_attempts(5);
        assert_eq!(tuned.timeout_ms, 50);
        assert_eq!(tuned.max_attempts, 5);
    }

    #[test]
    fn test_runtime_context_derives_call() {
        let ctx = RuntimeContext::new("tenant-a", "en").with_tag("channel", "cli");
        assert!(ctx.request_id.starts_with("req-"));
        assert!(ctx.trace_id.starts_with("trc-"));

        let call = ctx.service_call().with_idempotency_key("K");
        assert_eq!(call.tenant_id, "tenant-a");
        assert_eq!(call.request_id, ctx.request_id);
        assert_eq!(call.trace_id, ctx.trace_id);
        assert_eq!(call.tags["channel"], "cli");
        assert_eq!(call.idempotency_key.as_deref(), Some("K"));
    }

    #[tokio::test]
    async fn test_result_stream_take_once() {
        let stream = ResultStream::new(futures::stream::iter(vec![
            serde_json::json!({"chunk": 2}),
            serde_json::json!({"chunk": 3}),
        ]));
        let clone = stream.clone();

        let mut taken = stream.take().expect("first take yields the stream");
        assert!(clone.take().is_none(), "stream is non-restartable");

        let first = taken.next().await.unwrap();
        assert_eq!(first["chunk"], 2);
        let second = taken.next().await.unwrap();
        assert_eq!(second["chunk"], 3);
        assert!(taken.next().await.is_none());
    }

    #[test]
    fn test_result_serialization_skips_stream() {
        let call = ServiceCall::new("t1", "req-1", "trc-1");
        let meta = ResultMeta::for_call(&call, now_millis());
        let res = ServiceResult::partial(meta, serde_json::json!({"chunk": 1}))
            .with_stream(ResultStream::new(futures::stream::empty()));

        let json = serde_json::to_string(&res).unwrap();
        assert!(json.contains("\"status\":\"partial\""));
        assert!(!json.contains("stream"));

        let parsed: ServiceResult = serde_json::from_str(&json).unwrap();
        assert!(parsed.stream.is_none());
        assert_eq!(parsed.status, ResultStatus::Partial);
    }

    #[test]
    fn test_new_id_prefixes() {
        let id = new_id("tkt");
        assert!(id.starts_with("tkt-"));
        assert_ne!(new_id("tkt"), id);
    }
}
