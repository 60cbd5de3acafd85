//! Error types for dispatch-core

use thiserror::Error;

/// Errors that can occur in the dispatch runtime
///
/// These represent misconfiguration or infrastructure failures. Runtime
/// service failures (timeouts, provider errors) travel inside
/// [`ServiceResult`](crate::ServiceResult) as `ErrorInfo` values instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No binding for (tenant, service key)
    #[error("Service '{service_key}' not configured for tenant '{tenant_id}'")]
    ServiceNotConfigured {
        tenant_id: String,
        service_key: String,
    },

    /// A binding names a provider absent from the provider map
    #[error("Provider '{provider}' not registered")]
    ServiceNotRegistered { provider: String },

    /// A provider is registered but not of the requested capability type
    #[error("Provider '{provider}' does not implement the requested capability")]
    ProviderMismatch { provider: String },

    /// An event handler failed and was not isolated
    #[error("Handler '{handler}' failed for event '{event}': {reason}")]
    Handler {
        event: String,
        handler: String,
        reason: String,
    },

    /// Module key not present in the module catalog
    #[error("Module not registered: {0}")]
    ModuleNotFound(String),
}

impl DispatchError {
    /// Stable machine code for this error, used in system event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Config(_) => "config",
            DispatchError::Serialization(_) => "serialization",
            DispatchError::ServiceNotConfigured { .. } => "service_not_configured",
            DispatchError::ServiceNotRegistered { .. } => "service_not_registered",
            DispatchError::ProviderMismatch { .. } => "provider_mismatch",
            DispatchError::Handler { .. } => "handler_failed",
            DispatchError::ModuleNotFound(_) => "module_not_found",
        }
    }
}

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
