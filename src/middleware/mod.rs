//! Middleware chain — onion composition around a terminal operation
//!
//! Each middleware wraps everything that follows it; insertion order is
//! onion order. A middleware either forwards to [`Next::run`] exactly once
//! and returns its (possibly transformed) result, or synthesizes a result
//! without forwarding. Calling `next` twice is forbidden (not enforced).

use crate::error::Result;
use crate::types::{ServiceCall, ServiceResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

pub mod idempotency;
pub mod logging;

pub use idempotency::{IdempotencyMiddleware, IdempotencyStore, InMemoryIdempotencyStore};
pub use logging::LoggingMiddleware;

/// Inert descriptor of the operation being executed
#[derive(Debug, Clone)]
pub struct ServiceOp {
    /// Stable capability identity being dispatched
    pub service_key: String,

    /// Operation name used in service event names
    pub op_name: String,

    /// Call parameters
    pub call: ServiceCall,
}

impl ServiceOp {
    /// Describe an operation
    pub fn new(
        service_key: impl Into<String>,
        op_name: impl Into<String>,
        call: ServiceCall,
    ) -> Self {
        Self {
            service_key: service_key.into(),
            op_name: op_name.into(),
            call,
        }
    }
}

/// The terminal operation at the center of the onion
///
/// Invoked at most once per chain run; must produce a fresh future each
/// call (the executor re-runs it on retry).
pub type Terminal = Box<dyn Fn() -> BoxFuture<'static, Result<ServiceResult>> + Send + Sync>;

/// A single middleware layer
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle the operation, optionally forwarding to the rest of the chain
    async fn handle(&self, op: &ServiceOp, next: Next<'_>) -> Result<ServiceResult>;
}

/// Continuation of the chain from a middleware's point of view
///
/// Consumed by [`Next::run`]; the move makes a second invocation a type
/// error rather than undefined behavior.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    terminal: &'a Terminal,
}

impl<'a> Next<'a> {
    /// Run the remaining middlewares and finally the terminal
    pub async fn run(self, op: &ServiceOp) -> Result<ServiceResult> {
        match self.middlewares.split_first() {
            Some((mw, rest)) => {
                mw.handle(
                    op,
                    Next {
                        middlewares: rest,
                        terminal: self.terminal,
                    },
                )
                .await
            }
            None => (self.terminal)().await,
        }
    }
}

/// Ordered middleware composition
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; it wraps everything added after it
    pub fn add(&mut self, mw: impl Middleware + 'static) {
        self.middlewares.push(Arc::new(mw));
    }

    /// Builder-style [`MiddlewareChain::add`]
    pub fn with(mut self, mw: impl Middleware + 'static) -> Self {
        self.add(mw);
        self
    }

    /// Number of middlewares in the chain
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the chain around a terminal operation
    pub async fn run(&self, op: &ServiceOp, terminal: &Terminal) -> Result<ServiceResult> {
        Next {
            middlewares: &self.middlewares,
            terminal,
        }
        .run(op)
        .await
    }
}
