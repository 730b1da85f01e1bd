//! Raw HTTP backend with incremental event parsing.
//!
//! Used where no official client exists:
//! - OpenRouter (general catalog, usage reporting requested)
//! - OpenRouter free-only variant (free catalog, dynamic free detection)
//! - Custom OpenAI-compatible endpoints (local servers, proxies)
//!
//! Requests are a single POST; streamed bodies go through
//! [`LineBuffer`] and [`parse_event_line`] so one malformed line never aborts
//! a response.

use super::catalog::{self, OPENROUTER_LABEL};
use super::event_stream::{interpret_chunk, parse_event_line, EventLine, LineBuffer};
use super::{resolve_model, Backend, ModelCache, ModelPinner};
use crate::error::ProviderError;
use crate::http::{create_client_with_timeout, PROBE_TIMEOUT, USER_AGENT};
use crate::stream::{unit_channel, UnitEmitter, UnitStream};
use crate::types::{split_budget, BackendConfig, BackendKind, ChatRequest, ModelDescriptor, Usage};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Placeholder credential accepted for browsing the free catalog offline.
pub const PLACEHOLDER_KEY: &str = "sk-or-v1-placeholder";

const REFERER: &str = "https://github.com/modelmesh/modelmesh";
const TITLE: &str = "modelmesh";

/// Which service a [`RawHttpBackend`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    OpenRouter,
    /// OpenRouter restricted to zero-priced models.
    OpenRouterOfficial,
    Custom,
}

impl Variant {
    fn builtin_default_model(&self) -> &'static str {
        match self {
            Variant::OpenRouter => "deepseek/deepseek-r1-0528:free",
            Variant::OpenRouterOfficial => "deepseek/deepseek-r1:free",
            Variant::Custom => "default",
        }
    }

    fn is_openrouter(&self) -> bool {
        matches!(self, Variant::OpenRouter | Variant::OpenRouterOfficial)
    }
}

/// Whether a `/models` entry is zero-priced.
fn is_zero_priced(model: &Value) -> bool {
    let price = |field: &str| {
        model["pricing"][field]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| model["pricing"][field].as_f64())
    };
    price("prompt") == Some(0.0) && price("completion").unwrap_or(0.0) == 0.0
}

/// Backend speaking raw HTTP with an event-stream body.
#[derive(Clone)]
pub struct RawHttpBackend {
    name: String,
    label: String,
    variant: Variant,
    config: BackendConfig,
    default_model: String,
    pinned_model: Option<String>,
    http: Client,
    models: ModelCache,
}

impl RawHttpBackend {
    pub fn new(name: &str, variant: Variant, config: BackendConfig) -> Self {
        let default_model = config
            .default_model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| variant.builtin_default_model().to_string());
        let label = if variant.is_openrouter() { OPENROUTER_LABEL.to_string() } else { name.to_string() };
        let http = create_client_with_timeout(config.timeout());

        Self {
            name: name.to_string(),
            label,
            variant,
            config,
            default_model,
            pinned_model: None,
            http,
            models: ModelCache::new(),
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn pinned_model(&self) -> Option<&str> {
        self.pinned_model.as_deref()
    }

    /// `:free` ids, or ids the model listing reports as zero-priced.
    pub async fn is_free_model(&self, model_id: &str) -> bool {
        if model_id.ends_with(":free") {
            return true;
        }
        self.supported_models().await.iter().any(|m| m.id == model_id && m.is_free())
    }

    /// Zero-priced entries of the model listing.
    pub async fn free_models(&self) -> Vec<ModelDescriptor> {
        self.supported_models()
            .await
            .iter()
            .filter(|m| m.is_free())
            .cloned()
            .collect()
    }

    fn uses_placeholder(&self) -> bool {
        self.variant.is_openrouter() && self.config.api_key == PLACEHOLDER_KEY
    }

    fn base_url(&self) -> String {
        self.config.resolved_base_url()
    }

    fn apply_headers(&self, mut builder: RequestBuilder) -> RequestBuilder {
        if self.config.has_credential() {
            builder = builder.bearer_auth(&self.config.api_key);
        }
        builder = builder.header("Content-Type", "application/json");
        if self.variant.is_openrouter() {
            builder = builder.header("HTTP-Referer", REFERER).header("X-Title", TITLE);
        }
        if self.variant == Variant::OpenRouterOfficial {
            builder = builder.header("User-Agent", USER_AGENT);
        }
        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    fn build_payload(&self, request: &ChatRequest, model: &str) -> Value {
        let mut payload = json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_tokens,
            "stream": request.params.stream,
        });
        if self.variant == Variant::OpenRouter {
            payload["usage"] = json!({"include": true});
        }
        if let Some(body) = payload.as_object_mut() {
            for (key, value) in &request.params.extra {
                if !matches!(key.as_str(), "model" | "messages" | "stream" | "temperature" | "max_tokens") {
                    body.insert(key.clone(), value.clone());
                }
            }
        }
        payload
    }

    fn status_error(&self, status: StatusCode, body: String) -> ProviderError {
        match status {
            StatusCode::UNAUTHORIZED => {
                ProviderError::authentication(&self.label, "API key is invalid or expired")
            }
            StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::rate_limit(&self.label, "request rate exceeded, retry later")
            }
            StatusCode::NOT_FOUND if body.to_lowercase().contains("model") => {
                ProviderError::model_not_found(&self.label, body)
            }
            _ => ProviderError::connection(&self.label, format!("API request failed: {} - {}", status.as_u16(), body)),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::connection(&self.label, format!("request timed out: {}", e))
        } else {
            ProviderError::connection(&self.label, e.to_string())
        }
    }

    fn predefined_models(&self) -> Vec<ModelDescriptor> {
        match self.variant {
            Variant::OpenRouter => catalog::openrouter_models(),
            Variant::OpenRouterOfficial => catalog::openrouter_free_models(),
            Variant::Custom => vec![ModelDescriptor::derived(&self.default_model, &self.default_model, &self.label, 4096)],
        }
    }

    /// Turn one `/models` entry into a descriptor, or drop it.
    fn descriptor_from_listing(&self, model: &Value) -> Option<ModelDescriptor> {
        let id = model["id"].as_str()?;
        let free = is_zero_priced(model) || id.ends_with(":free");
        if self.variant == Variant::OpenRouterOfficial && !free {
            return None;
        }
        let name = model["name"].as_str().unwrap_or(id);
        let context = model["context_length"].as_u64().map(|c| c as u32).unwrap_or(4096);

        if let Some(known) = self.predefined_models().into_iter().find(|m| m.id == id) {
            return Some(known);
        }
        let (input, output) = split_budget(context);
        let per_token = |field: &str| {
            model["pricing"][field].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0)
        };
        Some(
            ModelDescriptor::new(id, name, &self.label, context, input, output)
                .with_pricing(per_token("prompt") * 1000.0, per_token("completion") * 1000.0),
        )
    }

    async fn list_models_raw(&self) -> Result<Vec<Value>, ProviderError> {
        let url = format!("{}/models", self.base_url());
        let response = self.apply_headers(self.http.get(&url)).send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, body));
        }
        let data: Value = response.json().await.map_err(|e| self.transport_error(e))?;
        Ok(data["data"].as_array().cloned().unwrap_or_default())
    }

    async fn fetch_models(&self) -> Vec<ModelDescriptor> {
        if self.uses_placeholder() {
            return self.predefined_models();
        }
        match self.list_models_raw().await {
            Ok(listing) => {
                let models: Vec<ModelDescriptor> =
                    listing.iter().filter_map(|m| self.descriptor_from_listing(m)).collect();
                if models.is_empty() {
                    self.predefined_models()
                } else {
                    models
                }
            }
            Err(e) => {
                warn!(backend = %self.name, "Model listing failed, using predefined catalog: {}", e);
                self.predefined_models()
            }
        }
    }
}

/// Handle one body line. Returns `false` when the stream is complete or the
/// consumer went away.
async fn handle_line(emitter: &mut UnitEmitter, line: &str, finished: &mut bool) -> bool {
    let chunk = match parse_event_line(line) {
        EventLine::Skip => return true,
        EventLine::Done => return false,
        EventLine::Malformed(reason) => {
            debug!("Skipping malformed event line: {}", reason);
            return true;
        }
        EventLine::Json(chunk) => chunk,
    };

    // After the finish chunk only a trailing usage chunk is still read.
    let view = interpret_chunk(&chunk);
    if let Some(text) = view.text.filter(|_| !*finished) {
        if !emitter.emit(text).await {
            return false;
        }
    }
    if let Some(usage) = view.usage {
        emitter.emit_usage(usage).await;
        return false;
    }
    if view.finished && !*finished {
        debug!(units = emitter.emitted(), "Stream finished");
        *finished = true;
    }
    true
}

#[async_trait]
impl Backend for RawHttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> BackendKind {
        self.config.kind
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn default_model(&self) -> &str {
        self.pinned_model.as_deref().unwrap_or(&self.default_model)
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<UnitStream, ProviderError> {
        let model = resolve_model(&request, self.default_model());
        let payload = self.build_payload(&request, &model);
        let url = format!("{}/chat/completions", self.base_url());

        let (mut emitter, units) = unit_channel(&self.label, &model);
        info!(backend = %self.name, request_id = %emitter.request_id(), %model, stream = request.params.stream, "Chat request");

        let response = self
            .apply_headers(self.http.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, body));
        }

        if !request.params.stream {
            let body: Value = response.json().await.map_err(|e| self.transport_error(e))?;
            let content = body["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| ProviderError::backend(&self.label, "response has no message content"))?
                .to_string();
            let usage = body.get("usage").and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());
            emitter.emit_with_usage(content, usage).await;
            return Ok(units);
        }

        let label = self.label.clone();
        let mut body = response.bytes_stream();
        tokio::spawn(async move {
            let mut buffer = LineBuffer::new();
            let mut finished = false;
            loop {
                let next = tokio::select! {
                    _ = emitter.closed() => return,
                    next = body.next() => next,
                };
                match next {
                    Some(Ok(bytes)) => {
                        for line in buffer.push(&bytes) {
                            if !handle_line(&mut emitter, &line, &mut finished).await {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let message = if e.is_timeout() { format!("request timed out: {}", e) } else { e.to_string() };
                        emitter.fail(ProviderError::connection(&label, message)).await;
                        return;
                    }
                    None => {
                        if let Some(line) = buffer.finish() {
                            handle_line(&mut emitter, &line, &mut finished).await;
                        }
                        return;
                    }
                }
            }
        });

        Ok(units)
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        let key = self.config.api_key.trim();
        if key.is_empty() {
            return Err(ProviderError::config(&self.label, "API key must not be empty"));
        }
        if self.variant.is_openrouter() && !key.starts_with("sk-or-") {
            return Err(ProviderError::config(&self.label, "OpenRouter API key must start with 'sk-or-'"));
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
        if self.uses_placeholder() {
            return true;
        }
        if !self.config.has_credential() {
            return false;
        }
        let url = format!("{}/models", self.base_url());
        let probe = self.apply_headers(self.http.get(&url)).timeout(PROBE_TIMEOUT).send().await;
        match probe {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(backend = %self.name, status = response.status().as_u16(), "Connection test failed");
                false
            }
            Err(e) => {
                warn!(backend = %self.name, "Connection test failed: {}", e);
                false
            }
        }
    }

    fn as_pinner(&self) -> Option<&dyn ModelPinner> {
        Some(self)
    }
}

impl ModelPinner for RawHttpBackend {
    fn pin_model(&self, model: &str) -> Arc<dyn Backend> {
        let mut pinned = self.clone();
        pinned.pinned_model = Some(model.to_string());
        Arc::new(pinned)
    }
}
