//! Per-tenant service registry
//!
//! Two disjoint maps: provider instances by name, and per-tenant bindings
//! from service key to provider name. Providers are opaque to the registry;
//! callers recover the capability type via [`ServiceRegistry::resolve_typed`].
//! Binding keys are explicit strings — the capability's declared name is the
//! conventional default (see [`crate::provider::keys`]).

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Binding of a service key to a provider instance name for one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBinding {
    /// Name of the provider instance serving this key
    pub provider: String,
}

impl ServiceBinding {
    /// Create a binding to the named provider
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

/// In-memory registry of providers and tenant bindings
///
/// The registry does not assume where configuration lives; bindings are
/// replaced at runtime by the config manager. Mutations are synchronous and
/// observed atomically by subsequent resolves.
#[derive(Default)]
pub struct ServiceRegistry {
    /// provider_name → provider instance (opaque)
    providers: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,

    /// tenant_id → (service_key → binding)
    bindings: RwLock<HashMap<String, HashMap<String, ServiceBinding>>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider instance by name
    ///
    /// Overwrites any previous registration under the same name. Providers
    /// live in external modules; the registry only stores references.
    pub fn register_provider<P>(&self, name: impl Into<String>, provider: P)
    where
        P: Any + Send + Sync,
    {
        let name = name.into();
        tracing::debug!(provider = %name, "Registered provider");
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(provider));
    }

    /// Remove a provider registration; no-op if absent
    pub fn deregister_provider(&self, name: &str) -> bool {
        let removed = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            tracing::debug!(provider = %name, "Deregistered provider");
        }
        removed
    }

    /// Whether a provider is registered under the given name
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Atomically replace a tenant's binding map
    pub fn set_tenant_bindings(
        &self,
        tenant_id: impl Into<String>,
        bindings: HashMap<String, ServiceBinding>,
    ) {
        let tenant_id = tenant_id.into();
        tracing::debug!(tenant = %tenant_id, count = bindings.len(), "Applied tenant bindings");
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant_id, bindings);
    }

    /// Insert or update a single binding without touching the rest of the
    /// tenant's map
    ///
    /// Used by module attach to bind the keys it serves.
    pub fn set_binding(
        &self,
        tenant_id: impl Into<String>,
        service_key: impl Into<String>,
        binding: ServiceBinding,
    ) {
        let tenant_id = tenant_id.into();
        let service_key = service_key.into();
        tracing::debug!(tenant = %tenant_id, service_key = %service_key, provider = %binding.provider, "Bound service key");
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id)
            .or_default()
            .insert(service_key, binding);
    }

    /// Remove one binding from a tenant's map; no-op if absent
    ///
    /// Used by module detach to clear the keys a module bound.
    pub fn remove_binding(&self, tenant_id: &str, service_key: &str) -> bool {
        let mut map = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(tenant_map) = map.get_mut(tenant_id) else {
            return false;
        };
        let removed = tenant_map.remove(service_key).is_some();
        if tenant_map.is_empty() {
            map.remove(tenant_id);
        }
        removed
    }

    /// Snapshot of a tenant's current bindings
    pub fn tenant_bindings(&self, tenant_id: &str) -> Option<HashMap<String, ServiceBinding>> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id)
            .cloned()
    }

    /// Resolve the provider bound to (tenant, service key)
    ///
    /// Fails with `ServiceNotConfigured` when the tenant has no map or no
    /// entry for the key, and `ServiceNotRegistered` when the binding names
    /// a provider absent from the provider map.
    pub fn resolve(&self, tenant_id: &str, service_key: &str) -> Result<Arc<dyn Any + Send + Sync>> {
        let provider_name = {
            let map = self
                .bindings
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            map.get(tenant_id)
                .and_then(|tenant_map| tenant_map.get(service_key))
                .map(|binding| binding.provider.clone())
                .ok_or_else(|| DispatchError::ServiceNotConfigured {
                    tenant_id: tenant_id.to_string(),
                    service_key: service_key.to_string(),
                })?
        };

        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&provider_name)
            .cloned()
            .ok_or(DispatchError::ServiceNotRegistered {
                provider: provider_name,
            })
    }

    /// Resolve and downcast to the registered capability handle
    ///
    /// `T` is the exact type passed to `register_provider`, typically
    /// `Arc<dyn Capability>`.
    pub fn resolve_typed<T>(&self, tenant_id: &str, service_key: &str) -> Result<T>
    where
        T: Any + Clone,
    {
        let provider = self.resolve(tenant_id, service_key)?;
        provider
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| DispatchError::ProviderMismatch {
                provider: self
                    .tenant_bindings(tenant_id)
                    .and_then(|map| map.get(service_key).map(|b| b.provider.clone()))
                    .unwrap_or_default(),
            })
    }
}
