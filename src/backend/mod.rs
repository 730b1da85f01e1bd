//! Backend contract and concrete backends.
//!
//! Every backend implements [`Backend`]:
//! - `chat_completion`: one fresh, single-consumption [`UnitStream`] per call
//! - `validate_config`: cheap local checks only
//! - `supported_models`: cached after first build, predefined catalog on fetch failure
//! - `test_connection`: reachability probe that never fails, only returns `false`
//!
//! Two transports exist:
//! - [`SdkBackend`] over the typed [`client::ChatClient`] (OpenAI, DeepSeek, GLM)
//! - [`RawHttpBackend`] over raw HTTP with hand-rolled event parsing
//!   (OpenRouter and custom OpenAI-compatible endpoints)
//!
//! Model precedence for one request: explicit per-call model, then a pinned
//! model, then the configured default.

pub mod catalog;
pub mod client;
pub mod event_stream;
pub mod raw_http;
pub mod sdk;

#[cfg(test)]
pub(crate) mod mock;

pub use raw_http::{RawHttpBackend, Variant};
pub use sdk::{Flavor, SdkBackend};

use crate::error::ProviderError;
use crate::stream::UnitStream;
use crate::types::{BackendConfig, BackendKind, ChatRequest, ModelDescriptor};
use async_trait::async_trait;
use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;

/// Registration name that selects the free-only OpenRouter variant.
pub const OPENROUTER_OFFICIAL_NAME: &str = "openrouter_official";

/// Uniform contract for a chat-completion backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registration name.
    fn name(&self) -> &str;

    /// Display label carried by units and errors.
    fn label(&self) -> &str;

    fn kind(&self) -> BackendKind;

    fn config(&self) -> &BackendConfig;

    /// Model used when a request names none.
    fn default_model(&self) -> &str;

    /// Start a completion. Setup failures (status, auth) are returned
    /// directly; failures after the first byte end the stream with `Err`.
    async fn chat_completion(&self, request: ChatRequest) -> Result<UnitStream, ProviderError>;

    /// Local plausibility checks, no network.
    fn validate_config(&self) -> Result<(), ProviderError>;

    /// Models served by this backend, cached until [`Backend::invalidate_models`].
    async fn supported_models(&self) -> Arc<Vec<ModelDescriptor>>;

    fn invalidate_models(&self);

    async fn test_connection(&self) -> bool;

    /// Optional capability: target a specific model without reconstruction.
    fn as_pinner(&self) -> Option<&dyn ModelPinner> {
        None
    }

    async fn model_info(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.supported_models().await.iter().find(|m| m.id == model_id).cloned()
    }
}

/// Capability of backends that can hand out an instance bound to one model.
pub trait ModelPinner {
    /// Independent instance targeting `model`. The receiver is unchanged.
    fn pin_model(&self, model: &str) -> Arc<dyn Backend>;
}

/// Pick the model for one request.
pub(crate) fn resolve_model(request: &ChatRequest, default_model: &str) -> String {
    match request.model.as_deref() {
        Some(model) if !model.trim().is_empty() => model.to_string(),
        _ => default_model.to_string(),
    }
}

// ============================================================================
// Model cache
// ============================================================================

/// Per-instance model list cache. No TTL; rebuilt only after invalidation.
#[derive(Clone)]
pub struct ModelCache {
    inner: Cache<(), Arc<Vec<ModelDescriptor>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self { inner: Cache::builder().build() }
    }

    /// Cached list, or the result of `load` stored for later calls.
    pub async fn get_or_load<F>(&self, load: F) -> Arc<Vec<ModelDescriptor>>
    where
        F: Future<Output = Vec<ModelDescriptor>>,
    {
        self.inner.get_with((), async move { Arc::new(load.await) }).await
    }

    pub fn invalidate(&self) {
        self.inner.invalidate_all();
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Model override pair
// ============================================================================

/// A shared backend paired with a model override.
///
/// Used for composite `backend:model` lookups on backends without the
/// [`ModelPinner`] capability. The wrapped instance is never mutated.
pub struct ModelOverride {
    inner: Arc<dyn Backend>,
    model: String,
}

impl ModelOverride {
    pub fn new(inner: Arc<dyn Backend>, model: &str) -> Self {
        Self { inner, model: model.to_string() }
    }
}

#[async_trait]
impl Backend for ModelOverride {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn label(&self) -> &str {
        self.inner.label()
    }

    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn config(&self) -> &BackendConfig {
        self.inner.config()
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(&self, mut request: ChatRequest) -> Result<UnitStream, ProviderError> {
        if request.model.is_none() {
            request.model = Some(self.model.clone());
        }
        self.inner.chat_completion(request).await
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.inner.validate_config()
    }

    async fn supported_models(&self) -> Arc<Vec<ModelDescriptor>> {
        self.inner.supported_models().await
    }

    fn invalidate_models(&self) {
        self.inner.invalidate_models()
    }

    async fn test_connection(&self) -> bool {
        self.inner.test_connection().await
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Construct the backend implementation for a config.
///
/// Does not validate; callers decide whether to run [`Backend::validate_config`].
pub fn create_backend(name: &str, config: BackendConfig) -> Result<Arc<dyn Backend>, ProviderError> {
    let backend: Arc<dyn Backend> = match config.kind {
        BackendKind::OpenAi => Arc::new(SdkBackend::openai(name, config)),
        BackendKind::Glm => Arc::new(SdkBackend::glm(name, config)),
        BackendKind::OpenRouter if name == OPENROUTER_OFFICIAL_NAME => {
            Arc::new(RawHttpBackend::new(name, Variant::OpenRouterOfficial, config))
        }
        BackendKind::OpenRouter => Arc::new(RawHttpBackend::new(name, Variant::OpenRouter, config)),
        BackendKind::Custom => Arc::new(RawHttpBackend::new(name, Variant::Custom, config)),
        BackendKind::Anthropic => {
            return Err(ProviderError::config(name, "anthropic backends are not supported"));
        }
    };
    Ok(backend)
}
