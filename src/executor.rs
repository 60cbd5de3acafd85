//! Service executor — the single call site for all service operations
//!
//! Wraps a terminal operation in the middleware chain and a per-attempt
//! deadline, retries on retryable failures, emits a lifecycle event per
//! attempt, and registers deferred tickets for later completion.
//!
//! Retry is budgeted by count only; backoff, if wanted, belongs in a
//! middleware. The executor never rewrites `res.meta` — providers populate
//! `provider_name`, timings, and attempt themselves.

use crate::bus::EventBus;
use crate::deferred::DeferredStore;
use crate::error::Result;
use crate::middleware::{MiddlewareChain, ServiceOp, Terminal};
use crate::types::{
    now_millis, ErrorInfo, EventEnvelope, EventKind, ResultMeta, ResultStatus, ServiceCall,
    ServiceResult,
};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Dispatches service operations with timeouts, retries, and events
pub struct ServiceExecutor {
    bus: Arc<EventBus>,
    chain: Option<MiddlewareChain>,
    deferred: Option<Arc<dyn DeferredStore>>,
    deferred_ttl_seconds: u64,
}

impl ServiceExecutor {
    /// Create an executor publishing lifecycle events on the given bus
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            chain: None,
            deferred: None,
            deferred_ttl_seconds: 3_600,
        }
    }

    /// Wrap every terminal in the given middleware chain
    pub fn with_chain(mut self, chain: MiddlewareChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Track deferred tickets in the given store
    pub fn with_deferred_store(mut self, store: Arc<dyn DeferredStore>) -> Self {
        self.deferred = Some(store);
        self
    }

    /// TTL for pending tickets and completed deferred results
    pub fn with_deferred_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.deferred_ttl_seconds = ttl_seconds;
        self
    }

    /// Execute a service operation
    ///
    /// `terminal` is invoked once per attempt and must produce a fresh
    /// future each time. Failures surfacing as `Err` become `error/exception`
    /// results; deadline expiry becomes `error/timeout`; both are retried
    /// while the attempt budget lasts. A result returned normally — whatever
    /// its status — ends the call.
    pub async fn call<F, Fut>(
        &self,
        service_key: &str,
        call: &ServiceCall,
        op_name: &str,
        terminal: F,
    ) -> Result<ServiceResult>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServiceResult>> + Send + 'static,
    {
        let started = now_millis();
        let attempts = call.max_attempts.max(1);
        let deadline = Duration::from_millis(call.timeout_ms);
        let terminal = Arc::new(terminal);

        let mut attempt: u32 = 1;
        loop {
            let op = ServiceOp::new(service_key, op_name, call.clone());

            let outcome = match &self.chain {
                Some(chain) => {
                    let fresh = terminal.clone();
                    let term: Terminal = Box::new(move || {
                        Box::pin((*fresh)()) as BoxFuture<'static, Result<ServiceResult>>
                    });
                    tokio::time::timeout(deadline, chain.run(&op, &term)).await
                }
                None => tokio::time::timeout(deadline, (*terminal)()).await,
            };

            let error_result = match outcome {
                Ok(Ok(res)) => {
                    if res.status == ResultStatus::Deferred {
                        if let (Some(ticket_id), Some(store)) = (&res.ticket_id, &self.deferred) {
                            store
                                .put_pending(ticket_id, self.deferred_ttl_seconds)
                                .await?;
                        }
                    }

                    self.publish_service_event(
                        call,
                        format!("service.{}.{}", op_name, res.status.as_str()),
                        serde_json::json!({
                            "service_key": service_key,
                            "attempt": attempt,
                            "provider": res.meta.provider_name.clone(),
                            "ticket_id": res.ticket_id.clone(),
                        }),
                    )
                    .await?;
                    return Ok(res);
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        op = %op_name,
                        tenant = %call.tenant_id,
                        attempt,
                        error = %err,
                        "Service attempt failed"
                    );
                    let meta = self.attempt_meta(call, started, attempt);
                    ServiceResult::error(
                        meta,
                        ErrorInfo::exception(err.to_string(), attempt < attempts),
                    )
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        op = %op_name,
                        tenant = %call.tenant_id,
                        attempt,
                        timeout_ms = call.timeout_ms,
                        "Service attempt timed out"
                    );
                    let meta = self.attempt_meta(call, started, attempt);
                    ServiceResult::error(meta, ErrorInfo::timeout(attempt < attempts))
                }
            };

            let error_code = error_result
                .error
                .as_ref()
                .map(|e| e.code.clone())
                .unwrap_or_else(|| "unknown".to_string());
            self.publish_service_event(
                call,
                format!("service.{}.error", op_name),
                serde_json::json!({
                    "service_key": service_key,
                    "attempt": attempt,
                    "provider": null,
                    "error_code": error_code,
                }),
            )
            .await?;

            let retryable = error_result
                .error
                .as_ref()
                .map(|e| e.retryable)
                .unwrap_or(false);
            if !retryable {
                return Ok(error_result);
            }
            attempt += 1;
        }
    }

    /// Store the final result for a deferred ticket and announce completion
    ///
    /// Publishes `service.{op_name}.completed` whether or not a deferred
    /// store is configured; callers correlate by the ticket id they kept
    /// from the initial deferred result.
    pub async fn complete_deferred(
        &self,
        tenant_id: &str,
        trace_id: &str,
        request_id: &str,
        op_name: &str,
        ticket_id: &str,
        result: ServiceResult,
    ) -> Result<()> {
        let status = result.status;
        let provider = result.meta.provider_name.clone();

        if let Some(store) = &self.deferred {
            store
                .complete(ticket_id, Arc::new(result), self.deferred_ttl_seconds)
                .await?;
        }

        let evt = EventEnvelope::new(
            format!("service.{}.completed", op_name),
            EventKind::Service,
            tenant_id,
            trace_id,
        )
        .with_request_id(request_id)
        .with_ticket_id(ticket_id)
        .with_payload(serde_json::json!({
            "ticket_id": ticket_id,
            "status": status.as_str(),
            "provider": provider,
        }));
        self.bus.publish(&evt).await
    }

    fn attempt_meta(&self, call: &ServiceCall, started: u64, attempt: u32) -> ResultMeta {
        ResultMeta::for_call(call, started)
            .with_finished_at(now_millis())
            .with_attempt(attempt)
    }

    async fn publish_service_event(
        &self,
        call: &ServiceCall,
        name: String,
        payload: serde_json::Value,
    ) -> Result<()> {
        let evt = EventEnvelope::new(
            name,
            EventKind::Service,
            call.tenant_id.clone(),
            call.trace_id.clone(),
        )
        .with_request_id(call.request_id.clone())
            .with_payload(payload);
        self.bus.publish(&evt).await
    }
}
