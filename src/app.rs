//! Core runtime container
//!
//! Wires the bus, registry, and executor together. Providers and modules
//! are attached from outside via runtime configuration; the container
//! itself performs no IO.

use crate::bus::EventBus;
use crate::deferred::DeferredStore;
use crate::executor::ServiceExecutor;
use crate::middleware::MiddlewareChain;
use crate::registry::ServiceRegistry;
use std::sync::Arc;

/// The core runtime: bus + registry + executor
///
/// Cheap to clone; clones share the same underlying components.
#[derive(Clone)]
pub struct CoreApp {
    pub bus: Arc<EventBus>,
    pub registry: Arc<ServiceRegistry>,
    pub executor: Arc<ServiceExecutor>,
}

impl CoreApp {
    /// Build a bare core without middleware or deferred tracking
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a core
    pub fn builder() -> CoreAppBuilder {
        CoreAppBuilder::default()
    }
}

impl Default for CoreApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder wiring optional executor features into a [`CoreApp`]
#[derive(Default)]
pub struct CoreAppBuilder {
    chain: Option<MiddlewareChain>,
    deferred: Option<Arc<dyn DeferredStore>>,
    deferred_ttl_seconds: Option<u64>,
}

impl CoreAppBuilder {
    /// Wrap every service call in the given middleware chain
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
        self.deferred_ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Assemble the core
    pub fn build(self) -> CoreApp {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ServiceRegistry::new());

        let mut executor = ServiceExecutor::new(bus.clone());
        if let Some(chain) = self.chain {
            executor = executor.with_chain(chain);
        }
        if let Some(store) = self.deferred {
            executor = executor.with_deferred_store(store);
        }
        if let Some(ttl) = self.deferred_ttl_seconds {
            executor = executor.with_deferred_ttl_seconds(ttl);
        }

        CoreApp {
            bus,
            registry,
            executor: Arc::new(executor),
        }
    }
}
