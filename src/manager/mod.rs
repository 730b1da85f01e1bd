//! Backend manager.
//!
//! Owns the named backend instances and answers "which backend serves this request":
//! - Bootstrap from the config store, with an environment fallback
//! - Register / unregister with default promotion
//! - Composite `backend:model` lookups that never touch the stored instance
//! - Fan-out status, model listing and connection tests
//! - Configure: build, validate, register and persist in one step
//!
//! Constructed once at startup and shared behind an `Arc`.

mod env;
mod race;

#[cfg(test)]
mod tests;

pub use env::BackendEnv;
pub use race::RaceOutcome;

use crate::backend::{create_backend, Backend, ModelOverride};
use crate::error::ProviderError;
use crate::free_models::{Capabilities, FreeModelRegistry, UseCase};
use crate::store::ConfigStore;
use crate::stream::UnitStream;
use crate::types::{BackendConfig, BackendKind, ChatMessage, ChatRequest, ModelDescriptor, SamplingParams};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Store entry reserved for connection tests; never bootstrapped.
pub const RESERVED_TEST_ENTRY: &str = "test_provider";

/// Live status of one backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BackendStatus {
    pub connected: bool,
    pub kind: BackendKind,
    pub endpoint: String,
    pub default_model: String,
    pub has_credential: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Static description of one backend, no probing.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BackendInfo {
    pub kind: BackendKind,
    pub endpoint: String,
    pub default_model: String,
    pub has_credential: bool,
    pub is_default: bool,
}

#[derive(Default)]
struct Registry {
    backends: HashMap<String, Arc<dyn Backend>>,
    /// Registration order.
    order: Vec<String>,
    default: Option<String>,
    /// Explicit model id -> backend name.
    model_map: HashMap<String, String>,
}

impl Registry {
    fn insert(&mut self, name: &str, backend: Arc<dyn Backend>) {
        if self.backends.insert(name.to_string(), backend).is_none() {
            self.order.push(name.to_string());
        }
        if self.default.is_none() {
            self.default = Some(name.to_string());
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        if self.backends.remove(name).is_none() {
            return false;
        }
        self.order.retain(|n| n != name);
        self.model_map.retain(|_, backend| backend != name);
        if self.default.as_deref() == Some(name) {
            self.default = self.order.first().cloned();
        }
        true
    }

    fn ordered(&self) -> Vec<(String, Arc<dyn Backend>)> {
        self.order
            .iter()
            .filter_map(|name| self.backends.get(name).map(|b| (name.clone(), b.clone())))
            .collect()
    }
}

pub struct BackendManager {
    registry: RwLock<Registry>,
    store: Arc<dyn ConfigStore>,
    free_models: FreeModelRegistry,
}

impl BackendManager {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            store,
            free_models: FreeModelRegistry::new(),
        }
    }

    pub fn with_free_models(mut self, free_models: FreeModelRegistry) -> Self {
        self.free_models = free_models;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Bootstrap and registration
    // ========================================================================

    /// Register every stored backend; fall back to `env` only when none was produced.
    ///
    /// Stored entries skip validation so unconfigured backends stay visible.
    /// Returns the number of registered backends.
    pub fn bootstrap(&self, env: &BackendEnv) -> usize {
        let entries = match self.store.entries() {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to read backend store: {}", e);
                Vec::new()
            }
        };
        info!(count = entries.len(), "Loading backends from store");

        for (name, config) in entries {
            if name == RESERVED_TEST_ENTRY {
                continue;
            }
            if let Err(e) = self.register(&name, config, true) {
                error!(backend = %name, "Failed to load stored backend: {}", e);
            }
        }

        if self.is_empty() {
            info!("No stored backends, falling back to environment");
            for (name, config) in env.backend_configs() {
                if let Err(e) = self.register(&name, config, false) {
                    error!(backend = %name, "Failed to load backend from environment: {}", e);
                }
            }
        }

        let registry = self.read();
        info!(backends = ?registry.order, default = ?registry.default, "Backends loaded");
        registry.backends.len()
    }

    /// Build and register a backend from a config. Replaces an existing entry in place.
    pub fn register(&self, name: &str, config: BackendConfig, skip_validation: bool) -> Result<(), ProviderError> {
        let kind = config.kind;
        let backend = create_backend(name, config)?;
        self.register_backend(name, backend, skip_validation)?;
        info!(backend = %name, kind = %kind, "Registered backend");
        Ok(())
    }

    /// Register an already constructed backend. The first registration becomes the default.
    pub fn register_backend(
        &self,
        name: &str,
        backend: Arc<dyn Backend>,
        skip_validation: bool,
    ) -> Result<(), ProviderError> {
        if !skip_validation {
            backend.validate_config()?;
        }
        self.write().insert(name, backend);
        Ok(())
    }

    /// Remove a backend. Removing the default promotes the earliest remaining one.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.write().remove(name);
        if removed {
            info!(backend = %name, "Unregistered backend");
        } else {
            warn!(backend = %name, "Backend not registered");
        }
        removed
    }

    /// Unregister and delete the persisted entry.
    pub fn remove(&self, name: &str) -> Result<bool, ProviderError> {
        let unregistered = self.unregister(name);
        let persisted = self
            .store
            .remove(name)
            .map_err(|e| ProviderError::config(name, format!("failed to remove stored config: {}", e)))?;
        Ok(unregistered || persisted)
    }

    /// Fill the default model, build, validate, register and persist.
    pub fn configure(&self, name: &str, mut config: BackendConfig) -> Result<(), ProviderError> {
        let missing_model = config.default_model.as_deref().map_or(true, |m| m.trim().is_empty());
        if missing_model {
            let base_url = config.resolved_base_url().to_lowercase();
            config.default_model = Some(config.kind.default_model(name, &base_url).to_string());
        }

        let backend = create_backend(name, config.clone())?;
        backend.validate_config()?;

        self.store
            .save(name, &config)
            .map_err(|e| ProviderError::config(name, format!("failed to persist config: {}", e)))?;
        self.write().insert(name, backend);

        info!(backend = %name, kind = %config.kind, "Configured backend");
        Ok(())
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Named backend, or for `backend:model` an independent handle targeting `model`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        if let Some((base, model)) = name.split_once(':') {
            let stored = self.read().backends.get(base).cloned();
            if let Some(stored) = stored {
                return Some(pin(stored, model));
            }
        }
        self.read().backends.get(name).cloned()
    }

    /// Backend for a model id, without a backend name.
    ///
    /// Order: explicit mapping, id shape, default backend, first registered.
    pub fn resolve_for_model(&self, model: &str) -> Option<Arc<dyn Backend>> {
        let name = self.backend_name_for_model(model)?;
        self.read().backends.get(&name).cloned()
    }

    pub fn backend_name_for_model(&self, model: &str) -> Option<String> {
        let registry = self.read();

        if let Some(name) = registry.model_map.get(model) {
            if registry.backends.contains_key(name) {
                return Some(name.clone());
            }
        }

        if model.starts_with("gpt-") || model.starts_with("openai/") {
            if registry.backends.contains_key("openai") {
                return Some("openai".to_string());
            }
        } else if model.contains('/') && registry.backends.contains_key("openrouter") {
            return Some("openrouter".to_string());
        }

        if let Some(name) = &registry.default {
            return Some(name.clone());
        }
        registry.order.first().cloned()
    }

    /// Backend and model for a router entry: `backend:model` when the prefix is a
    /// registered backend, otherwise a plain model id resolved by shape.
    pub fn resolve_target(&self, entry: &str) -> Option<(Arc<dyn Backend>, String)> {
        if let Some((base, model)) = entry.split_once(':') {
            let stored = self.read().backends.get(base).cloned();
            if let Some(stored) = stored {
                return Some((stored, model.to_string()));
            }
        }
        self.resolve_for_model(entry).map(|backend| (backend, entry.to_string()))
    }

    /// Registration name that would serve a router entry.
    pub fn target_name(&self, entry: &str) -> Option<String> {
        self.resolve_target(entry).map(|(backend, _)| backend.name().to_string())
    }

    pub fn set_model_mapping(&self, model: &str, backend: &str) -> bool {
        let mut registry = self.write();
        if !registry.backends.contains_key(backend) {
            warn!(backend = %backend, "Cannot map model to unknown backend");
            return false;
        }
        registry.model_map.insert(model.to_string(), backend.to_string());
        info!(model = %model, backend = %backend, "Mapped model");
        true
    }

    pub fn set_default(&self, name: &str) -> bool {
        let mut registry = self.write();
        if !registry.backends.contains_key(name) {
            warn!(backend = %name, "Cannot set unknown backend as default");
            return false;
        }
        registry.default = Some(name.to_string());
        true
    }

    pub fn default_name(&self) -> Option<String> {
        self.read().default.clone()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.read().backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().backends.is_empty()
    }

    pub fn info(&self) -> BTreeMap<String, BackendInfo> {
        let registry = self.read();
        registry
            .ordered()
            .into_iter()
            .map(|(name, backend)| {
                let config = backend.config();
                let info = BackendInfo {
                    kind: backend.kind(),
                    endpoint: config.resolved_base_url(),
                    default_model: backend.default_model().to_string(),
                    has_credential: config.has_credential(),
                    is_default: registry.default.as_deref() == Some(name.as_str()),
                };
                (name, info)
            })
            .collect()
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Send one chat request.
    ///
    /// With a backend name (plain or composite) that backend answers; an
    /// explicit `model` still wins over its pinned and default models.
    /// Without one, the backend is resolved from `model`.
    pub async fn route(
        &self,
        backend: Option<&str>,
        model: Option<&str>,
        messages: Vec<ChatMessage>,
        params: SamplingParams,
    ) -> Result<UnitStream, ProviderError> {
        let model = model.filter(|m| !m.trim().is_empty());
        let target = match backend {
            Some(name) => self.get(name).ok_or_else(|| ProviderError::unknown_backend(name))?,
            None => self
                .resolve_for_model(model.unwrap_or_default())
                .ok_or_else(|| ProviderError::no_available_model("no backend registered"))?,
        };

        let mut request = ChatRequest::new(messages).with_params(params);
        request.model = model.map(str::to_string);
        info!(
            backend = %target.name(),
            model = %request.model.as_deref().unwrap_or(target.default_model()),
            "Routing request"
        );
        target.chat_completion(request).await
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    /// Probe every backend concurrently. A failing probe only marks its own entry.
    pub async fn status(&self) -> BTreeMap<String, BackendStatus> {
        let ordered = self.read().ordered();
        let backends: HashMap<String, Arc<dyn Backend>> = ordered.iter().cloned().collect();
        let results = fan_out(ordered, |backend| async move { backend.test_connection().await }).await;

        results
            .into_iter()
            .filter_map(|(name, result)| {
                let backend = backends.get(&name)?;
                let config = backend.config();
                let (connected, error) = match result {
                    Ok(connected) => (connected, None),
                    Err(e) => (false, Some(e)),
                };
                let status = BackendStatus {
                    connected,
                    kind: backend.kind(),
                    endpoint: config.resolved_base_url(),
                    default_model: backend.default_model().to_string(),
                    has_credential: config.has_credential(),
                    error,
                };
                Some((name, status))
            })
            .collect()
    }

    /// Supported models of every backend. A failing backend reports an empty list.
    pub async fn list_models(&self) -> BTreeMap<String, Vec<ModelDescriptor>> {
        let ordered = self.read().ordered();
        fan_out(ordered, |backend| async move { backend.supported_models().await })
            .await
            .into_iter()
            .map(|(name, result)| {
                let models = result.map(|models| models.as_ref().clone()).unwrap_or_default();
                (name, models)
            })
            .collect()
    }

    pub async fn test_all(&self) -> BTreeMap<String, bool> {
        let ordered = self.read().ordered();
        fan_out(ordered, |backend| async move { backend.test_connection().await })
            .await
            .into_iter()
            .map(|(name, result)| (name, result.unwrap_or(false)))
            .collect()
    }

    pub async fn test_connection(&self, name: &str) -> bool {
        match self.get(name) {
            Some(backend) => backend.test_connection().await,
            None => false,
        }
    }

    // ========================================================================
    // Free models
    // ========================================================================

    pub fn free_registry(&self) -> &FreeModelRegistry {
        &self.free_models
    }

    /// Free model descriptors grouped by backend name.
    ///
    /// Free models are served through OpenRouter, so only OpenRouter-kind
    /// backends list any.
    pub fn free_models(&self, backend: Option<&str>) -> BTreeMap<String, Vec<ModelDescriptor>> {
        let descriptors = || self.free_models.descriptors(Some("OpenRouter"));
        let mut grouped = BTreeMap::new();
        match backend {
            Some(name) => {
                let serves_free = self.read().backends.get(name).map(|b| b.kind()) == Some(BackendKind::OpenRouter)
                    || BackendKind::from_backend_name(name) == Some(BackendKind::OpenRouter);
                if serves_free {
                    grouped.insert(name.to_string(), descriptors());
                }
            }
            None => {
                grouped.insert("openrouter".to_string(), descriptors());
            }
        }
        grouped
    }

    pub fn recommended(&self, use_case: UseCase) -> Vec<String> {
        self.free_models.recommended_ids(use_case).iter().map(|id| id.to_string()).collect()
    }

    pub fn is_free_model(&self, model: &str) -> bool {
        self.free_models.is_free(model)
    }

    /// Catalog capabilities, or a guess from the id for unknown models.
    pub fn model_capabilities(&self, model: &str) -> Capabilities {
        if let Some(caps) = self.free_models.capabilities(model) {
            return caps;
        }
        let id = model.to_lowercase();
        Capabilities {
            reasoning: id.contains("deepseek") || id.contains("qwen"),
            vision: id.contains("vision") || id.contains("gemma"),
            function_calling: id.contains("coder") || id.contains("devstral"),
            free: self.free_models.is_free(model),
            context_length: 0,
        }
    }
}

/// Composite lookup: pin when the backend supports it, otherwise pair it with the model.
fn pin(stored: Arc<dyn Backend>, model: &str) -> Arc<dyn Backend> {
    if let Some(pinner) = stored.as_pinner() {
        return pinner.pin_model(model);
    }
    debug!(backend = %stored.name(), model = %model, "Backend cannot pin, using override pair");
    Arc::new(ModelOverride::new(stored, model))
}

/// Run `op` against every backend on its own task. Panics become per-backend errors.
async fn fan_out<T, F, Fut>(backends: Vec<(String, Arc<dyn Backend>)>, op: F) -> Vec<(String, Result<T, String>)>
where
    T: Send + 'static,
    F: Fn(Arc<dyn Backend>) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let handles: Vec<_> = backends
        .into_iter()
        .map(|(name, backend)| (name, tokio::spawn(op(backend))))
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        match handle.await {
            Ok(value) => results.push((name, Ok(value))),
            Err(e) => {
                error!(backend = %name, "Backend task failed: {}", e);
                results.push((name, Err(e.to_string())));
            }
        }
    }
    results
}
