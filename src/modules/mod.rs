//! Modules — pluggable bundles of providers, subscriptions, and bindings
//!
//! A module attaches to a tenant by registering resources through the core
//! and recording every effect in the returned handle; detach undoes each
//! recorded effect so nothing from the module survives: subscriptions are
//! removed, providers deregistered, bound service keys cleared.

use crate::app::CoreApp;
use crate::bus::Subscription;
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

pub mod text_templates;

pub use text_templates::TextTemplatesModule;

/// Record of what a module attached, enabling clean detach
///
/// A plain value, not a back-reference into the bus or registry.
#[derive(Debug, Clone)]
pub struct ModuleHandle {
    pub module_key: String,
    pub tenant_id: String,

    /// Subscriptions the module registered
    pub subscriptions: Vec<Subscription>,

    /// Provider names the module registered
    pub provider_names: Vec<String>,

    /// Service keys the module bound for the tenant
    pub service_keys: Vec<String>,
}

impl ModuleHandle {
    /// Empty handle for a (module, tenant) pair
    pub fn new(module_key: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            module_key: module_key.into(),
            tenant_id: tenant_id.into(),
            subscriptions: Vec::new(),
            provider_names: Vec::new(),
            service_keys: Vec::new(),
        }
    }

    /// Undo every recorded effect against the core
    pub fn release(&self, app: &CoreApp) {
        for sub in &self.subscriptions {
            app.bus.unsubscribe(&sub.name, &sub.handler);
        }
        for name in &self.provider_names {
            app.registry.deregister_provider(name);
        }
        for key in &self.service_keys {
            app.registry.remove_binding(&self.tenant_id, key);
        }
    }
}

/// A pluggable module with a stable key
///
/// `cfg` is an opaque blob the core passes through unmodified; its schema
/// is the module's concern.
#[async_trait]
pub trait CoreModule: Send + Sync {
    /// Stable identity used in tenant configuration
    fn module_key(&self) -> &str;

    /// Register resources for a tenant and record them in the handle
    async fn attach(
        &self,
        app: &CoreApp,
        tenant_id: &str,
        cfg: &serde_json::Value,
    ) -> Result<ModuleHandle>;

    /// Undo every effect recorded in the handle
    async fn detach(&self, app: &CoreApp, handle: &ModuleHandle) -> Result<()>;
}

/// Attaches/detaches modules per tenant and tracks their handles
pub struct ModuleManager {
    app: CoreApp,
    modules: RwLock<HashMap<String, Arc<dyn CoreModule>>>,

    /// tenant_id → module_key → handle
    handles: Mutex<HashMap<String, HashMap<String, ModuleHandle>>>,
}

impl ModuleManager {
    /// Create a manager operating on the given core
    pub fn new(app: CoreApp) -> Self {
        Self {
            app,
            modules: RwLock::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Add a module to the catalog by its key
    pub fn register(&self, module: Arc<dyn CoreModule>) {
        let key = module.module_key().to_string();
        tracing::debug!(module = %key, "Registered module");
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, module);
    }

    /// Whether a module is currently attached for a tenant
    pub fn is_attached(&self, tenant_id: &str, module_key: &str) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id)
            .map(|modules| modules.contains_key(module_key))
            .unwrap_or(false)
    }

    /// Keys of the modules currently attached for a tenant
    pub fn attached_modules(&self, tenant_id: &str) -> Vec<String> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id)
            .map(|modules| modules.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Attach a registered module for a tenant
    pub async fn attach(
        &self,
        tenant_id: &str,
        module_key: &str,
        cfg: &serde_json::Value,
    ) -> Result<()> {
        let module = self
            .module(module_key)
            .ok_or_else(|| DispatchError::ModuleNotFound(module_key.to_string()))?;

        let handle = module.attach(&self.app, tenant_id, cfg).await?;
        tracing::info!(tenant = %tenant_id, module = %module_key, "Module attached");

        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id.to_string())
            .or_default()
            .insert(module_key.to_string(), handle);
        Ok(())
    }

    /// Detach a module from a tenant; no-op when not attached
    pub async fn detach(&self, tenant_id: &str, module_key: &str) -> Result<()> {
        let handle = {
            let map = self
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            map.get(tenant_id)
                .and_then(|modules| modules.get(module_key))
                .cloned()
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        let module = self
            .module(module_key)
            .ok_or_else(|| DispatchError::ModuleNotFound(module_key.to_string()))?;
        module.detach(&self.app, &handle).await?;
        tracing::info!(tenant = %tenant_id, module = %module_key, "Module detached");

        let mut map = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(modules) = map.get_mut(tenant_id) {
            modules.remove(module_key);
            if modules.is_empty() {
                map.remove(tenant_id);
            }
        }
        Ok(())
    }

    /// Reconcile a tenant's attached modules with the desired set
    ///
    /// Detaches modules absent from `desired`; every desired module with a
    /// catalog entry is (re)attached unconditionally — a conservative
    /// strategy that trades churn for correctness. Unknown module keys are
    /// skipped.
    pub async fn refresh(
        &self,
        tenant_id: &str,
        desired: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        for module_key in self.attached_modules(tenant_id) {
            if !desired.contains_key(&module_key) {
                self.detach(tenant_id, &module_key).await?;
            }
        }

        for (module_key, cfg) in desired {
            if self.module(module_key).is_none() {
                tracing::warn!(tenant = %tenant_id, module = %module_key, "Skipping unknown module");
                continue;
            }

            if self.is_attached(tenant_id, module_key) {
                self.detach(tenant_id, module_key).await?;
            }
            self.attach(tenant_id, module_key, cfg).await?;
        }
        Ok(())
    }

    fn module(&self, module_key: &str) -> Option<Arc<dyn CoreModule>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module_key)
            .cloned()
    }
}
