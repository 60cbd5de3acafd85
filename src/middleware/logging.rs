//! Call-scoped logging middleware

use crate::error::Result;
use crate::middleware::{Middleware, Next, ServiceOp};
use crate::types::now_millis;
use async_trait::async_trait;

/// Logs the start and outcome of every operation passing through the chain
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, op: &ServiceOp, next: Next<'_>) -> Result<crate::ServiceResult> {
        let started = now_millis();
        tracing::debug!(
            op = %op.op_name,
            service_key = %op.service_key,
            tenant = %op.call.tenant_id,
            request = %op.call.request_id,
            "Service operation started"
        );

        let res = next.run(op).await;

        let duration_ms = now_millis().saturating_sub(started);
        match &res {
            Ok(result) => tracing::info!(
                op = %op.op_name,
                tenant = %op.call.tenant_id,
                status = result.status.as_str(),
                provider = result.meta.provider_name.as_deref().unwrap_or("-"),
                duration_ms,
                "Service operation finished"
            ),
            Err(err) => tracing::warn!(
                op = %op.op_name,
                tenant = %op.call.tenant_id,
                error = %err,
                duration_ms,
                "Service operation failed"
            ),
        }

        res
    }
}
