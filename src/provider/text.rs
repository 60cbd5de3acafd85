//! Template-backed TextComposer reference provider
//!
//! Deterministic rendering from an in-memory template map. No external IO;
//! safe to register with the core registry. Undefined template variables
//! are strict errors rather than silent blanks.

use crate::error::Result;
use crate::provider::{TextComposeIn, TextComposeOut, TextComposer};
use crate::types::{now_millis, ErrorInfo, ResultMeta, ServiceCall, ServiceResult};
use async_trait::async_trait;
use minijinja::{Environment, UndefinedBehavior};
use std::collections::HashMap;

/// Configuration for [`TemplateTextComposer`]
#[derive(Debug, Clone, Default)]
pub struct TemplateTextComposerConfig {
    /// template_key → template source
    pub templates: HashMap<String, String>,
}

/// TextComposer rendering minijinja templates from configuration
pub struct TemplateTextComposer {
    cfg: TemplateTextComposerConfig,
    provider_name: String,
    env: Environment<'static>,
}

impl TemplateTextComposer {
    /// Create a provider over the configured templates
    pub fn new(cfg: TemplateTextComposerConfig, provider_name: impl Into<String>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self {
            cfg,
            provider_name: provider_name.into(),
            env,
        }
    }

    /// Name this provider registers under
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

#[async_trait]
impl TextComposer for TemplateTextComposer {
    async fn compose(&self, call: &ServiceCall, input: TextComposeIn) -> Result<ServiceResult> {
        let meta = ResultMeta::for_call(call, now_millis()).with_provider(self.provider_name.clone());

        let Some(source) = self.cfg.templates.get(&input.template_key) else {
            return Ok(ServiceResult::error(
                meta,
                ErrorInfo::new(
                    "template_not_found",
                    format!("Template '{}' not found", input.template_key),
                    false,
                ),
            ));
        };

        let ctx = minijinja::Value::from_serialize(&input.variables);
        match self.env.render_str(source, ctx) {
            Ok(text) => {
                let data = serde_json::to_value(TextComposeOut::new(text))?;
                Ok(ServiceResult::ok(meta.with_finished_at(now_millis()), data))
            }
            Err(err) => Ok(ServiceResult::error(
                meta.with_finished_at(now_millis()),
                ErrorInfo::new("render_failed", err.to_string(), false),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResultStatus;

    fn provider() -> TemplateTextComposer {
        TemplateTextComposer::new(
            TemplateTextComposerConfig {
                templates: HashMap::from([
                    (
                        "hello".to_string(),
                        "Hello, {{ name }}! Order #{{ order_id }} accepted.".to_string(),
                    ),
                    ("static".to_string(), "No variables here.".to_string()),
                ]),
            },
            "template_text_v1",
        )
    }

    fn call() -> ServiceCall {
        ServiceCall::new("tenant-a", "req-1", "trc-1")
    }

    #[tokio::test]
    async fn test_compose_renders_variables() {
        let input = TextComposeIn::new("en", "hello")
            .with_variable("name", serde_json::json!("Ada"))
            .with_variable("order_id", serde_json::json!(123));

        let res = provider().compose(&call(), input).await.unwrap();

        assert_eq!(res.status, ResultStatus::Ok);
        let data = res.data.unwrap();
        assert_eq!(data["text"], "Hello, Ada! Order #123 accepted.");
        assert_eq!(data["format"], "plain");
        assert_eq!(res.meta.provider_name.as_deref(), Some("template_text_v1"));
        assert!(res.meta.finished_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_compose_static_template() {
        let res = provider()
            .compose(&call(), TextComposeIn::new("en", "static"))
            .await
            .unwrap();
        assert_eq!(res.status, ResultStatus::Ok);
        assert_eq!(res.data.unwrap()["text"], "No variables here.");
    }

    #[tokio::test]
    async fn test_compose_template_not_found() {
        let res = provider()
            .compose(&call(), TextComposeIn::new("en", "missing"))
            .await
            .unwrap();

        assert_eq!(res.status, ResultStatus::Error);
        let error = res.error.unwrap();
        assert_eq!(error.code, "template_not_found");
        assert!(!error.retryable);
        assert!(error.message.contains("missing"));
    }

    #[tokio::test]
    async fn test_compose_undefined_variable_fails_render() {
        // "hello" references name and order_id; provide neither
        let res = provider()
            .compose(&call(), TextComposeIn::new("en", "hello"))
            .await
            .unwrap();

        assert_eq!(res.status, ResultStatus::Error);
        let error = res.error.unwrap();
        assert_eq!(error.code, "render_failed");
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn test_meta_copies_call_correlation() {
        let call = ServiceCall::new("tenant-a", "req-9", "trc-9").with_idempotency_key("K");
        let res = provider()
            .compose(&call, TextComposeIn::new("en", "static"))
            .await
            .unwrap();

        assert_eq!(res.meta.request_id, "req-9");
        assert_eq!(res.meta.trace_id, "trc-9");
        assert_eq!(res.meta.idempotency_key.as_deref(), Some("K"));
        assert_eq!(res.meta.attempt, 1);
    }
}
