//! # dispatch-core
//!
//! Multi-tenant service dispatch runtime: a language-neutral core that
//! routes named service operations through per-tenant provider bindings,
//! wraps each call in a composable middleware chain with timeouts, retries,
//! idempotency and deferred-completion handling, and publishes lifecycle
//! events on an in-process bus.
//!
//! ## Overview
//!
//! A transport constructs a [`RuntimeContext`], derives a [`ServiceCall`],
//! resolves a provider via the [`ServiceRegistry`], and invokes the
//! [`ServiceExecutor`] with a terminal closure running the provider. The
//! executor wraps the terminal in the middleware chain and a deadline,
//! retries retryable failures, and emits a `service.{op}.{status}` event per
//! attempt. Tenant bindings, providers, and subscriptions hot-swap at
//! runtime through the [`ConfigManager`] and pluggable [`CoreModule`]s.
//!
//! ## Quick Start
//!
//! ```rust
//! use dispatch_core::{CoreApp, EventEnvelope, EventHandler, EventKind, Subscription};
//!
//! # async fn example() -> dispatch_core::Result<()> {
//! let app = CoreApp::new();
//!
//! // observe service lifecycle events
//! app.bus.subscribe(Subscription::new(
//!     "service.text_compose.ok",
//!     EventHandler::new("audit", |event: EventEnvelope| async move {
//!         println!("observed {} for {}", event.name, event.tenant_id);
//!         Ok(())
//!     }),
//! ));
//!
//! let event = EventEnvelope::new(
//!     "service.text_compose.ok",
//!     EventKind::Service,
//!     "tenant-a",
//!     "trc-demo",
//! );
//! app.bus.publish(&event).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **EventBus** — prioritized in-process pub/sub with per-handler error
//!   isolation and `system.handler_error` emission
//! - **ServiceRegistry** — (tenant, service key) → provider instance, with
//!   atomic per-tenant binding replacement
//! - **MiddlewareChain** — onion composition around a terminal operation;
//!   idempotency and logging middlewares included
//! - **ServiceExecutor** — the single call site: deadlines, retry budget,
//!   lifecycle events, deferred tickets
//! - **ModuleManager / ConfigManager** — atomic runtime reconfiguration of
//!   bindings, providers, and subscriptions per tenant

pub mod app;
pub mod bus;
pub mod config;
pub mod deferred;
pub mod error;
pub mod executor;
pub mod middleware;
pub mod modules;
pub mod provider;
pub mod registry;
pub mod types;

// Re-export core types
pub use app::{CoreApp, CoreAppBuilder};
pub use bus::{EventBus, EventHandler, HandlerFuture, Subscription};
pub use config::{ConfigManager, TenantConfig, TenantConfigStore};
pub use deferred::{DeferredEntry, DeferredStore, InMemoryDeferredStore};
pub use error::{DispatchError, Result};
pub use executor::ServiceExecutor;
pub use middleware::{
    IdempotencyMiddleware, IdempotencyStore, InMemoryIdempotencyStore, LoggingMiddleware,
    Middleware, MiddlewareChain, Next, ServiceOp, Terminal,
};
pub use modules::{CoreModule, ModuleHandle, ModuleManager, TextTemplatesModule};
pub use registry::{ServiceBinding, ServiceRegistry};
pub use types::{
    new_id, now_millis, ErrorInfo, EventEnvelope, EventKind, ResultMeta, ResultStatus,
    ResultStream, RuntimeContext, ServiceCall, ServiceResult,
};

// Re-export capability contracts for convenience
pub use provider::{
    keys, IntentResolveIn, IntentResolveOut, IntentResolver, KnowledgeRespondIn,
    KnowledgeRespondOut, KnowledgeResponder, TemplateTextComposer, TemplateTextComposerConfig,
    TextComposeIn, TextComposeOut, TextComposer,
};
