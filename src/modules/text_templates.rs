//! Text templates module — reference module implementation
//!
//! Bundles a [`TemplateTextComposer`] provider with the tenant binding for
//! the `TextComposer` key and a pair of observing subscriptions. Everything
//! the module attaches is recorded in the handle and removed on detach.

use crate::app::CoreApp;
use crate::bus::{EventHandler, Subscription};
use crate::error::Result;
use crate::modules::{CoreModule, ModuleHandle};
use crate::provider::{keys, TemplateTextComposer, TemplateTextComposerConfig, TextComposer};
use crate::registry::ServiceBinding;
use crate::types::EventEnvelope;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Module cfg blob schema
///
/// Keys are snake_case in the blob itself; the core passes it through
/// unmodified.
#[derive(Debug, Clone, Deserialize)]
struct TextTemplatesConfig {
    #[serde(default = "default_provider_name")]
    provider_name: String,

    #[serde(default)]
    templates: HashMap<String, String>,
}

fn default_provider_name() -> String {
    "template_text_v1".to_string()
}

/// Module providing template-based text composition per tenant
#[derive(Debug, Default, Clone, Copy)]
pub struct TextTemplatesModule;

/// Stable module key used in tenant configuration
pub const MODULE_KEY: &str = "text_templates";

fn observing_handler() -> EventHandler {
    EventHandler::new("text_templates:observer", |event: EventEnvelope| async move {
        tracing::debug!(
            event = %event.name,
            tenant = %event.tenant_id,
            payload = %event.payload,
            "Text compose lifecycle event"
        );
        Ok(())
    })
}

#[async_trait]
impl CoreModule for TextTemplatesModule {
    fn module_key(&self) -> &str {
        MODULE_KEY
    }

    async fn attach(
        &self,
        app: &CoreApp,
        tenant_id: &str,
        cfg: &serde_json::Value,
    ) -> Result<ModuleHandle> {
        let typed: TextTemplatesConfig = serde_json::from_value(cfg.clone())?;
        let mut handle = ModuleHandle::new(MODULE_KEY, tenant_id);

        let provider_name = typed.provider_name;
        let provider = TemplateTextComposer::new(
            TemplateTextComposerConfig {
                templates: typed.templates,
            },
            provider_name.clone(),
        );
        app.registry.register_provider(
            provider_name.clone(),
            Arc::new(provider) as Arc<dyn TextComposer>,
        );
        handle.provider_names.push(provider_name.clone());

        app.registry.set_binding(
            tenant_id,
            keys::TEXT_COMPOSER,
            ServiceBinding::new(provider_name),
        );
        handle.service_keys.push(keys::TEXT_COMPOSER.to_string());

        for event_name in ["service.text_compose.ok", "service.text_compose.error"] {
            let sub = Subscription::new(event_name, observing_handler()).with_priority(50);
            app.bus.subscribe(sub.clone());
            handle.subscriptions.push(sub);
        }

        Ok(handle)
    }

    async fn detach(&self, app: &CoreApp, handle: &ModuleHandle) -> Result<()> {
        handle.release(app);
        Ok(())
    }
}
