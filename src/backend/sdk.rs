//! Backends for official chat APIs, driven through the typed client.
//!
//! One implementation covers three flavors:
//! - OpenAI (`sk-` keys, GPT catalog)
//! - DeepSeek (OpenAI wire format, detected from the endpoint)
//! - GLM (Zhipu's OpenAI-compatible v4 API)

use super::catalog::{self, DEEPSEEK_LABEL, GLM_LABEL, OPENAI_LABEL};
use super::client::{ChatClient, ChatCompletionRequest, ClientError};
use super::{resolve_model, Backend, ModelCache};
use crate::error::ProviderError;
use crate::stream::{unit_channel, UnitStream};
use crate::types::{BackendConfig, BackendKind, ChatRequest, ModelDescriptor};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which official API an [`SdkBackend`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    OpenAi,
    DeepSeek,
    Glm,
}

impl Flavor {
    /// OpenAI-kind configs pointing at DeepSeek are the DeepSeek flavor.
    pub fn detect(config: &BackendConfig) -> Self {
        match config.kind {
            BackendKind::Glm => Flavor::Glm,
            _ if config.resolved_base_url().contains("deepseek") => Flavor::DeepSeek,
            _ => Flavor::OpenAi,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Flavor::OpenAi => OPENAI_LABEL,
            Flavor::DeepSeek => DEEPSEEK_LABEL,
            Flavor::Glm => GLM_LABEL,
        }
    }

    fn builtin_default_model(&self) -> &'static str {
        match self {
            Flavor::OpenAi => "gpt-3.5-turbo",
            Flavor::DeepSeek => "deepseek-chat",
            Flavor::Glm => "glm-4",
        }
    }

    fn predefined_models(&self) -> Vec<ModelDescriptor> {
        match self {
            Flavor::OpenAi => catalog::openai_models(),
            Flavor::DeepSeek => catalog::deepseek_models(),
            Flavor::Glm => catalog::glm_models(),
        }
    }

    fn unlisted_price(&self) -> f64 {
        match self {
            Flavor::Glm => 0.01,
            _ => 0.002,
        }
    }
}

/// Map a client error onto the taxonomy by message substring.
///
/// Best effort: this depends on the wording of upstream error messages and
/// falls back to [`ProviderError::Backend`] when nothing matches.
pub fn classify_error(label: &str, message: &str) -> ProviderError {
    let lowered = message.to_lowercase();
    if lowered.contains("authentication") || lowered.contains("api_key") || lowered.contains("unauthorized") {
        ProviderError::authentication(label, message)
    } else if lowered.contains("rate_limit") || lowered.contains("ratelimit") || lowered.contains("quota") {
        ProviderError::rate_limit(label, message)
    } else if lowered.contains("model") && (lowered.contains("not found") || lowered.contains("does not exist")) {
        ProviderError::model_not_found(label, message)
    } else if lowered.contains("connection") || lowered.contains("timeout") || lowered.contains("timed out") {
        ProviderError::connection(label, message)
    } else {
        ProviderError::backend(label, message)
    }
}

fn classify(label: &str, err: &ClientError) -> ProviderError {
    classify_error(label, &err.to_string())
}

/// Backend over an official chat API.
pub struct SdkBackend {
    name: String,
    flavor: Flavor,
    config: BackendConfig,
    default_model: String,
    client: ChatClient,
    models: ModelCache,
}

impl SdkBackend {
    pub fn new(name: &str, flavor: Flavor, config: BackendConfig) -> Self {
        let default_model = config
            .default_model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| flavor.builtin_default_model().to_string());
        let client = ChatClient::new(&config.resolved_base_url(), &config.api_key, config.timeout())
            .with_headers(&config.extra_headers);

        Self {
            name: name.to_string(),
            flavor,
            config,
            default_model,
            client,
            models: ModelCache::new(),
        }
    }

    /// OpenAI-kind backend; DeepSeek endpoints are detected automatically.
    pub fn openai(name: &str, config: BackendConfig) -> Self {
        let flavor = Flavor::detect(&config);
        Self::new(name, flavor, config)
    }

    pub fn glm(name: &str, config: BackendConfig) -> Self {
        Self::new(name, Flavor::Glm, config)
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    fn descriptor_for(&self, id: &str) -> ModelDescriptor {
        self.flavor
            .predefined_models()
            .into_iter()
            .find(|m| m.id == id)
            .unwrap_or_else(|| catalog::unlisted_model(id, self.flavor.label(), self.flavor.unlisted_price()))
    }

    async fn fetch_models(&self) -> Vec<ModelDescriptor> {
        match self.client.list_models().await {
            Ok(entries) if !entries.is_empty() => {
                debug!(backend = %self.name, count = entries.len(), "Listed models");
                entries.iter().map(|entry| self.descriptor_for(&entry.id)).collect()
            }
            Ok(_) => self.flavor.predefined_models(),
            Err(e) => {
                warn!(backend = %self.name, "Model listing failed, using predefined catalog: {}", e);
                self.flavor.predefined_models()
            }
        }
    }
}

#[async_trait]
impl Backend for SdkBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        self.flavor.label()
    }

    fn kind(&self) -> BackendKind {
        self.config.kind
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<UnitStream, ProviderError> {
        let label = self.label().to_string();
        let model = resolve_model(&request, &self.default_model);
        let stream = request.params.stream;
        let body = ChatCompletionRequest {
            model: model.clone(),
            messages: request.messages,
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
            stream,
            extra: request.params.extra,
        };

        let (mut emitter, units) = unit_channel(&label, &model);
        info!(backend = %self.name, request_id = %emitter.request_id(), %model, stream, "Chat request");

        if !stream {
            let completion = self.client.create_chat(&body).await.map_err(|e| classify(&label, &e))?;
            let content = completion
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            emitter.emit_with_usage(content, completion.usage).await;
            return Ok(units);
        }

        let mut chunks = self.client.create_chat_stream(&body).await.map_err(|e| classify(&label, &e))?;

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = emitter.closed() => return,
                    next = chunks.next() => next,
                };
                let chunk = match next {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        emitter.fail(classify(&label, &e)).await;
                        return;
                    }
                    None => return,
                };
                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };
                if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                    if !emitter.emit(content).await {
                        return;
                    }
                }
                if choice.finish_reason.is_some() {
                    debug!(backend = %label, units = emitter.emitted(), "Stream finished");
                    return;
                }
            }
        });

        Ok(units)
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        let key = self.config.api_key.trim();
        if key.is_empty() {
            return Err(ProviderError::config(self.label(), "API key must not be empty"));
        }
        if self.flavor != Flavor::Glm && !key.starts_with("sk-") {
            return Err(ProviderError::config(self.label(), "API key must start with 'sk-'"));
        }
        Ok(())
    }

    async fn supported_models(&self) -> Arc<Vec<ModelDescriptor>> {
        self.models.get_or_load(self.fetch_models()).await
    }

    fn invalidate_models(&self) {
        self.models.invalidate();
    }

    async fn test_connection(&self) -> bool {
        if !self.config.has_credential() {
            return false;
        }
        match self.client.list_models().await {
            Ok(_) => true,
            Err(e) => {
                warn!(backend = %self.name, "Connection test failed: {}", e);
                false
            }
        }
    }
}
