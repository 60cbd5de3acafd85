//! Capability contracts — the neutral service interfaces the core dispatches
//!
//! Providers implement these traits and are registered by name in the
//! [`ServiceRegistry`](crate::ServiceRegistry); per-tenant bindings
//! associate a service key with a provider name. Keys are explicit strings;
//! the capability's declared name (see [`keys`]) is the conventional
//! default, so call sites are not coupled to type names.

use crate::error::Result;
use crate::types::{ServiceCall, ServiceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod text;

pub use text::{TemplateTextComposer, TemplateTextComposerConfig};

/// Stable service keys used as binding identities
pub mod keys {
    /// Key for [`TextComposer`](super::TextComposer) bindings
    pub const TEXT_COMPOSER: &str = "TextComposer";

    /// Key for [`IntentResolver`](super::IntentResolver) bindings
    pub const INTENT_RESOLVER: &str = "IntentResolver";

    /// Key for [`KnowledgeResponder`](super::KnowledgeResponder) bindings
    pub const KNOWLEDGE_RESPONDER: &str = "KnowledgeResponder";
}

/// Input for a text composition operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextComposeIn {
    pub locale: String,
    pub template_key: String,

    /// Variables substituted into the template
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

impl TextComposeIn {
    /// Create an input for the given template
    pub fn new(locale: impl Into<String>, template_key: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            template_key: template_key.into(),
            variables: HashMap::new(),
        }
    }

    /// Add a template variable
    pub fn with_variable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }
}

/// Composed text; the core passes `format` through untouched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextComposeOut {
    pub text: String,

    /// "plain" | "markdown" | "html"
    #[serde(default = "default_text_format")]
    pub format: String,
}

fn default_text_format() -> String {
    "plain".to_string()
}

impl TextComposeOut {
    /// Plain-format output
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: default_text_format(),
        }
    }
}

/// Renders localized text from templates
#[async_trait]
pub trait TextComposer: Send + Sync {
    async fn compose(&self, call: &ServiceCall, input: TextComposeIn) -> Result<ServiceResult>;
}

impl std::fmt::Debug for dyn TextComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn TextComposer").finish()
    }
}

/// Input for intent resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResolveIn {
    pub text: String,
    pub locale: String,

    /// Transport channel the text arrived on
    #[serde(default = "default_channel")]
    pub channel: String,

    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

fn default_channel() -> String {
    "chat".to_string()
}

/// Resolved intent with confidence and extracted slots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResolveOut {
    pub intent: String,
    pub confidence: f64,

    #[serde(default)]
    pub slots: HashMap<String, serde_json::Value>,
}

/// Maps free text to a named intent
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve(&self, call: &ServiceCall, input: IntentResolveIn) -> Result<ServiceResult>;
}

/// Input for a knowledge lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeRespondIn {
    pub question: String,
    pub locale: String,

    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

/// Answer text plus source ids/keys only — never raw documents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeRespondOut {
    pub answer_text: String,

    #[serde(default)]
    pub sources: Vec<String>,
}

/// Answers questions from a knowledge base
#[async_trait]
pub trait KnowledgeResponder: Send + Sync {
    async fn respond(&self, call: &ServiceCall, input: KnowledgeRespondIn) -> Result<ServiceResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_keys_are_stable() {
        assert_eq!(keys::TEXT_COMPOSER, "TextComposer");
        assert_eq!(keys::INTENT_RESOLVER, "IntentResolver");
        assert_eq!(keys::KNOWLEDGE_RESPONDER, "KnowledgeResponder");
    }

    #[test]
    fn test_text_compose_in_builder() {
        let input = TextComposeIn::new("en", "hello")
            .with_variable("name", serde_json::json!("World"));
        assert_eq!(input.template_key, "hello");
        assert_eq!(input.variables["name"], "World");
    }

    #[test]
    fn test_text_compose_out_defaults() {
        let out = TextComposeOut::new("hi");
        assert_eq!(out.format, "plain");

        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["text"], "hi");
        assert_eq!(value["format"], "plain");
    }

    #[test]
    fn test_intent_resolve_in_channel_default() {
        let input: IntentResolveIn =
            serde_json::from_value(serde_json::json!({"text": "hi", "locale": "en"})).unwrap();
        assert_eq!(input.channel, "chat");
        assert!(input.context.is_empty());
    }

    #[test]
    fn test_knowledge_respond_out_roundtrip() {
        let out = KnowledgeRespondOut {
            answer_text: "42".to_string(),
            sources: vec!["kb-1".to_string()],
        };
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("\"answerText\":\"42\""));

        let parsed: KnowledgeRespondOut = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sources, vec!["kb-1"]);
    }
}
