//! Tenant configuration — values, sources, and the runtime apply step
//!
//! The core does not assume where tenant configs live (database, file,
//! remote service); a [`TenantConfigStore`] supplies them and the
//! [`ConfigManager`] applies them to the running core without restart.

use crate::app::CoreApp;
use crate::error::Result;
use crate::modules::ModuleManager;
use crate::registry::ServiceBinding;
use crate::types::{EventEnvelope, EventKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Full runtime configuration of one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    pub tenant_id: String,
    pub locale: String,

    /// service_key → provider_name
    #[serde(default)]
    pub services: HashMap<String, String>,

    /// module_key → module cfg blob (module decides the schema)
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
}

/// Source of tenant configurations
#[async_trait]
pub trait TenantConfigStore: Send + Sync {
    async fn get_tenant_config(&self, tenant_id: &str) -> Result<TenantConfig>;
}

/// Applies tenant configuration to the running core
///
/// Binding replacement is atomic per tenant; the three apply steps
/// (bindings, modules, event) are deliberately not jointly atomic — a
/// service call racing an apply may observe `ServiceNotConfigured` or a
/// stale provider and should retry at the transport layer.
pub struct ConfigManager {
    app: CoreApp,
    modules: Arc<ModuleManager>,
}

impl ConfigManager {
    /// Create a manager applying configs through the given module manager
    pub fn new(app: CoreApp, modules: Arc<ModuleManager>) -> Self {
        Self { app, modules }
    }

    /// Apply runtime config for a tenant without restart
    ///
    /// 1. Replace the tenant's binding map.
    /// 2. Refresh the tenant's module set.
    /// 3. Publish `config.tenant_updated` with config snapshots.
    pub async fn apply_tenant_config(
        &self,
        tenant_id: &str,
        trace_id: &str,
        request_id: &str,
        services: &HashMap<String, String>,
        modules: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let bindings = services
            .iter()
            .map(|(key, provider)| (key.clone(), ServiceBinding::new(provider)))
            .collect();
        self.app.registry.set_tenant_bindings(tenant_id, bindings);

        self.modules.refresh(tenant_id, modules).await?;

        tracing::info!(
            tenant = %tenant_id,
            services = services.len(),
            modules = modules.len(),
            "Tenant configuration applied"
        );

        let evt = EventEnvelope::new(
            "config.tenant_updated",
            EventKind::System,
            tenant_id,
            trace_id,
        )
        .with_request_id(request_id)
        .with_payload(serde_json::json!({
            "services": services,
            "modules": modules,
        }));
        self.app.bus.publish(&evt).await
    }

    /// Apply a full [`TenantConfig`] value
    pub async fn apply(
        &self,
        config: &TenantConfig,
        trace_id: &str,
        request_id: &str,
    ) -> Result<()> {
        self.apply_tenant_config(
            &config.tenant_id,
            trace_id,
            request_id,
            &config.services,
            &config.modules,
        )
        .await
    }
}
