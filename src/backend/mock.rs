//! Mock backend for testing
//!
//! Scriptable per model: fail a number of times, always fail, respond slowly.
//! Every call is recorded so tests can assert routing decisions.

use super::Backend;
use crate::error::ProviderError;
use crate::stream::{unit_channel, UnitStream};
use crate::types::{BackendConfig, BackendKind, ChatRequest, ModelDescriptor, Usage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MockBackend {
    name: String,
    config: BackendConfig,
    /// Remaining failures per model (`usize::MAX` = always).
    failures: Mutex<HashMap<String, usize>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
    connected: bool,
    valid: bool,
    model_fetches: AtomicUsize,
}

impl MockBackend {
    /// A backend that answers every model successfully.
    pub fn always_succeeds(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: BackendConfig::new(BackendKind::Custom, "mock-key").with_default_model("mock-model"),
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            connected: true,
            valid: true,
            model_fetches: AtomicUsize::new(0),
        }
    }

    /// Fail `n` requests for `model` with a connection error, then succeed.
    pub fn fails_then_succeeds(self, model: &str, n: usize) -> Self {
        self.failures.lock().unwrap().insert(model.to_string(), n);
        self
    }

    /// Fail every request for `model`.
    pub fn always_fails(self, model: &str) -> Self {
        self.fails_then_succeeds(model, usize::MAX)
    }

    /// Delay the first unit for `model`.
    pub fn with_delay(self, model: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(model.to_string(), delay);
        self
    }

    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.config.kind = kind;
        self
    }

    pub fn with_default_model(mut self, model: &str) -> Self {
        self.config.default_model = Some(model.to_string());
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Models requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn model_fetches(&self) -> usize {
        self.model_fetches.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        self.config.kind
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("mock-model")
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<UnitStream, ProviderError> {
        let model = super::resolve_model(&request, self.default_model());
        self.calls.lock().unwrap().push(model.clone());

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&model) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(ProviderError::connection(&self.name, format!("{} unavailable", model)));
        }

        let delay = self.delays.lock().unwrap().get(&model).copied();
        let (mut emitter, units) = unit_channel(&self.name, &model);
        let reply = format!("reply from {}", model);
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            for word in reply.split_inclusive(' ') {
                if !emitter.emit(word).await {
                    return;
                }
            }
            emitter.emit_usage(Usage { prompt_tokens: 1, completion_tokens: 3, total_tokens: 4, ..Usage::default() }).await;
        });
        Ok(units)
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        if self.valid {
            Ok(())
        } else {
            Err(ProviderError::config(&self.name, "mock config rejected"))
        }
    }

    async fn supported_models(&self) -> Arc<Vec<ModelDescriptor>> {
        self.model_fetches.fetch_add(1, Ordering::SeqCst);
        Arc::new(vec![ModelDescriptor::derived(self.default_model(), "Mock", &self.name, 4096)])
    }

    fn invalidate_models(&self) {}

    async fn test_connection(&self) -> bool {
        self.connected
    }
}
