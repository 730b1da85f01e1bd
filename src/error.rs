//! Unified error handling for modelmesh.
//!
//! Every failure a backend, the manager or the router can surface maps onto
//! one [`ProviderError`] variant. Each variant carries the label of the
//! backend that produced it and a human readable message.

use serde::Serialize;
use thiserror::Error;

/// Label used for errors raised by the router itself.
pub const ROUTER_LABEL: &str = "router";

/// Label used for errors raised by the backend manager itself.
pub const MANAGER_LABEL: &str = "manager";

/// Coarse classification of a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    RateLimit,
    Connection,
    ModelNotFound,
    Config,
    Backend,
    NoAvailableModel,
    UnknownBackend,
}

/// Error taxonomy shared by every backend, the manager and the router.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Credential missing, invalid or expired.
    #[error("[{backend}] authentication failed: {message}")]
    Authentication { backend: String, message: String },
    /// Upstream quota or request rate exceeded.
    #[error("[{backend}] rate limit exceeded: {message}")]
    RateLimit { backend: String, message: String },
    /// Network failure, non-success status or timeout.
    #[error("[{backend}] connection error: {message}")]
    Connection { backend: String, message: String },
    /// Requested model is not served by the backend.
    #[error("[{backend}] model not found: {message}")]
    ModelNotFound { backend: String, message: String },
    /// Local configuration is missing or implausible.
    #[error("[{backend}] configuration error: {message}")]
    Config { backend: String, message: String },
    /// Anything the backend reported that fits no other category.
    #[error("[{backend}] {message}")]
    Backend { backend: String, message: String },
    /// The router had no available model to try.
    #[error("[{backend}] no available model: {message}")]
    NoAvailableModel { backend: String, message: String },
    /// A backend or model name did not resolve.
    #[error("[{backend}] unknown backend: {message}")]
    UnknownBackend { backend: String, message: String },
}

impl ProviderError {
    pub fn authentication(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication { backend: backend.into(), message: message.into() }
    }

    pub fn rate_limit(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RateLimit { backend: backend.into(), message: message.into() }
    }

    pub fn connection(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection { backend: backend.into(), message: message.into() }
    }

    pub fn model_not_found(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelNotFound { backend: backend.into(), message: message.into() }
    }

    pub fn config(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { backend: backend.into(), message: message.into() }
    }

    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend { backend: backend.into(), message: message.into() }
    }

    pub fn no_available_model(message: impl Into<String>) -> Self {
        Self::NoAvailableModel { backend: ROUTER_LABEL.to_string(), message: message.into() }
    }

    pub fn unknown_backend(name: impl Into<String>) -> Self {
        Self::UnknownBackend { backend: MANAGER_LABEL.to_string(), message: name.into() }
    }

    /// Label of the backend (or component) that raised the error.
    pub fn backend_label(&self) -> &str {
        match self {
            Self::Authentication { backend, .. }
            | Self::RateLimit { backend, .. }
            | Self::Connection { backend, .. }
            | Self::ModelNotFound { backend, .. }
            | Self::Config { backend, .. }
            | Self::Backend { backend, .. }
            | Self::NoAvailableModel { backend, .. }
            | Self::UnknownBackend { backend, .. } => backend,
        }
    }

    /// Human readable message without the backend prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Authentication { message, .. }
            | Self::RateLimit { message, .. }
            | Self::Connection { message, .. }
            | Self::ModelNotFound { message, .. }
            | Self::Config { message, .. }
            | Self::Backend { message, .. }
            | Self::NoAvailableModel { message, .. }
            | Self::UnknownBackend { message, .. } => message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            Self::Config { .. } => ErrorKind::Config,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::NoAvailableModel { .. } => ErrorKind::NoAvailableModel,
            Self::UnknownBackend { .. } => ErrorKind::UnknownBackend,
        }
    }

    /// Whether the router should try another model after this error.
    ///
    /// Name resolution failures are caller mistakes and never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownBackend { .. })
    }
}

/// Errors raised while reading or writing persisted backend configuration.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_backend_label_and_message() {
        let err = ProviderError::rate_limit("OpenRouter", "slow down");
        assert_eq!(err.to_string(), "[OpenRouter] rate limit exceeded: slow down");
    }

    #[test]
    fn accessors_expose_label_message_and_kind() {
        let err = ProviderError::model_not_found("GLM", "glm-9");
        assert_eq!(err.backend_label(), "GLM");
        assert_eq!(err.message(), "glm-9");
        assert_eq!(err.kind(), ErrorKind::ModelNotFound);
    }

    #[test]
    fn router_errors_use_router_label() {
        let err = ProviderError::no_available_model("all models disabled");
        assert_eq!(err.backend_label(), ROUTER_LABEL);
        assert_eq!(err.kind(), ErrorKind::NoAvailableModel);
    }

    #[test]
    fn unknown_backend_is_not_retryable() {
        assert!(!ProviderError::unknown_backend("nope").is_retryable());
        assert!(ProviderError::connection("x", "reset").is_retryable());
        assert!(ProviderError::authentication("x", "bad key").is_retryable());
    }

    #[test]
    fn error_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
    }
}
