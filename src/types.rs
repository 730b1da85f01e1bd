//! Shared data model.
//!
//! - [`BackendConfig`]: how to reach one backend
//! - [`ModelDescriptor`]: metadata for one model a backend serves
//! - [`StreamUnit`]: one increment of a streamed response
//! - [`ChatRequest`]: messages plus sampling parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default request timeout for a backend, in seconds.
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

// ============================================================================
// Backend kinds and configuration
// ============================================================================

/// Family of chat-completion service a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAi,
    OpenRouter,
    Glm,
    /// Any endpoint speaking the OpenAI-compatible event-stream wire format.
    #[serde(alias = "http-compatible")]
    Custom,
    /// Recognised so stored entries parse; no transport is implemented.
    Anthropic,
}

impl BackendKind {
    pub const OPENAI_URL: &'static str = "https://api.openai.com/v1";
    pub const OPENROUTER_URL: &'static str = "https://openrouter.ai/api/v1";
    pub const GLM_URL: &'static str = "https://open.bigmodel.cn/api/paas/v4";
    pub const CUSTOM_URL: &'static str = "http://127.0.0.1:11434/v1";
    pub const ANTHROPIC_URL: &'static str = "https://api.anthropic.com/v1";

    /// Base endpoint used when the config leaves it empty.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => Self::OPENAI_URL,
            Self::OpenRouter => Self::OPENROUTER_URL,
            Self::Glm => Self::GLM_URL,
            Self::Custom => Self::CUSTOM_URL,
            Self::Anthropic => Self::ANTHROPIC_URL,
        }
    }

    /// Default model filled in when a backend is configured without one.
    ///
    /// `name` is the registration name; an OpenAI-kind backend registered as
    /// `deepseek` (or pointed at a DeepSeek endpoint) defaults to DeepSeek's
    /// chat model.
    pub fn default_model(&self, name: &str, base_url: &str) -> &'static str {
        match self {
            Self::OpenRouter => "deepseek/deepseek-r1-0528:free",
            Self::OpenAi if name == "deepseek" || base_url.contains("deepseek") => "deepseek-chat",
            Self::OpenAi if name == "glm" => "glm-4",
            Self::OpenAi => "gpt-3.5-turbo",
            Self::Glm => "glm-4",
            Self::Custom => "default",
            Self::Anthropic => "claude-3-haiku-20240307",
        }
    }

    /// Infer a kind from a conventional registration name.
    pub fn from_backend_name(name: &str) -> Option<Self> {
        match name {
            "openrouter" | "openrouter_compatible" | "openrouter_official" => Some(Self::OpenRouter),
            "openai" | "deepseek" => Some(Self::OpenAi),
            "glm" => Some(Self::Glm),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::OpenRouter => write!(f, "openrouter"),
            Self::Glm => write!(f, "glm"),
            Self::Custom => write!(f, "custom"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            "glm" => Ok(Self::Glm),
            "custom" | "http-compatible" => Ok(Self::Custom),
            "anthropic" => Ok(Self::Anthropic),
            _ => Err(format!("Invalid backend kind: {}", s)),
        }
    }
}

/// Connection settings for one backend instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub kind: BackendKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_BACKEND_TIMEOUT_SECS
}

impl BackendConfig {
    pub fn new(kind: BackendKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            extra_headers: BTreeMap::new(),
            timeout_secs: DEFAULT_BACKEND_TIMEOUT_SECS,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }

    pub fn with_default_model(mut self, model: &str) -> Self {
        self.default_model = Some(model.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Base endpoint without a trailing slash, falling back to the kind default.
    pub fn resolved_base_url(&self) -> String {
        let url = match self.base_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.trim(),
            _ => self.kind.default_base_url(),
        };
        url.trim_end_matches('/').to_string()
    }

    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

// ============================================================================
// Model metadata
// ============================================================================

/// Metadata for a model served by a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub backend: String,
    pub max_context_length: u32,
    pub max_input_tokens: u32,
    pub max_output_tokens: u32,
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
    pub supports_streaming: bool,
}

impl ModelDescriptor {
    /// Free, streaming-capable model with an explicit token split.
    pub fn new(
        id: &str,
        name: &str,
        backend: &str,
        context: u32,
        max_input: u32,
        max_output: u32,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            backend: backend.to_string(),
            max_context_length: context,
            max_input_tokens: max_input.min(context),
            max_output_tokens: max_output.min(context - max_input.min(context)),
            input_price_per_1k: 0.0,
            output_price_per_1k: 0.0,
            supports_streaming: true,
        }
    }

    /// Descriptor with the 75/25 input/output budget heuristic.
    pub fn derived(id: &str, name: &str, backend: &str, context: u32) -> Self {
        let (input, output) = split_budget(context);
        Self::new(id, name, backend, context, input, output)
    }

    pub fn with_pricing(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_price_per_1k = input_per_1k;
        self.output_price_per_1k = output_per_1k;
        self
    }

    pub fn is_free(&self) -> bool {
        self.input_price_per_1k == 0.0 && self.output_price_per_1k == 0.0
    }

    /// Listed price for a request of the given size.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_price_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_price_per_1k
    }
}

/// Split a context window 75/25 into input and output budgets.
pub fn split_budget(context: u32) -> (u32, u32) {
    let input = (context as u64 * 3 / 4) as u32;
    (input, context - input)
}

// ============================================================================
// Streaming
// ============================================================================

/// Token counters reported by a backend, usually on the final unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// One increment of a response.
///
/// `sequence` starts at 1 for every request and increases by one per unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamUnit {
    pub content: String,
    pub sequence: u64,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Concatenate the text of a sequence of units.
pub fn join_content(units: &[StreamUnit]) -> String {
    units.iter().map(|u| u.content.as_str()).collect()
}

// ============================================================================
// Requests
// ============================================================================

/// Message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Sampling parameters and transport pass-through options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingParams {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// Extra body fields forwarded verbatim (e.g. `models`, `provider`, `route`).
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_temperature() -> f64 { DEFAULT_TEMPERATURE }
fn default_max_tokens() -> u32 { DEFAULT_MAX_TOKENS }
fn default_stream() -> bool { true }

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            stream: true,
            extra: serde_json::Map::new(),
        }
    }
}

/// A chat completion request handed to a backend.
///
/// `model` is the explicit per-call model and wins over any pinned or
/// configured default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub params: SamplingParams,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, model: None, params: SamplingParams::default() }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.params.stream = stream;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_falls_back_to_kind_default() {
        let config = BackendConfig::new(BackendKind::Glm, "key");
        assert_eq!(config.resolved_base_url(), "https://open.bigmodel.cn/api/paas/v4");

        let blank = BackendConfig::new(BackendKind::OpenRouter, "key").with_base_url("  ");
        assert_eq!(blank.resolved_base_url(), "https://openrouter.ai/api/v1");
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let config = BackendConfig::new(BackendKind::Custom, "k").with_base_url("http://localhost:8080/v1/");
        assert_eq!(config.resolved_base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn parses_http_compatible_alias() {
        let config: BackendConfig = serde_json::from_value(serde_json::json!({
            "kind": "http-compatible",
            "api_key": "k"
        }))
        .unwrap();
        assert_eq!(config.kind, BackendKind::Custom);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!("http-compatible".parse::<BackendKind>().unwrap(), BackendKind::Custom);
    }

    #[test]
    fn default_model_depends_on_name_and_endpoint() {
        assert_eq!(BackendKind::OpenAi.default_model("openai", BackendKind::OPENAI_URL), "gpt-3.5-turbo");
        assert_eq!(BackendKind::OpenAi.default_model("deepseek", ""), "deepseek-chat");
        assert_eq!(
            BackendKind::OpenAi.default_model("work", "https://api.deepseek.com/v1"),
            "deepseek-chat"
        );
        assert_eq!(BackendKind::OpenAi.default_model("glm", ""), "glm-4");
        assert_eq!(BackendKind::OpenRouter.default_model("openrouter", ""), "deepseek/deepseek-r1-0528:free");
    }

    #[test]
    fn infers_kind_from_backend_name() {
        assert_eq!(BackendKind::from_backend_name("openrouter_official"), Some(BackendKind::OpenRouter));
        assert_eq!(BackendKind::from_backend_name("deepseek"), Some(BackendKind::OpenAi));
        assert_eq!(BackendKind::from_backend_name("glm"), Some(BackendKind::Glm));
        assert_eq!(BackendKind::from_backend_name("mystery"), None);
    }

    #[test]
    fn derived_descriptor_splits_budget_75_25() {
        let model = ModelDescriptor::derived("a/b:free", "B", "OpenRouter", 163840);
        assert_eq!(model.max_input_tokens, 122880);
        assert_eq!(model.max_output_tokens, 40960);
        assert!(model.max_input_tokens + model.max_output_tokens <= model.max_context_length);
        assert!(model.is_free());
    }

    #[test]
    fn explicit_budget_never_exceeds_context() {
        let model = ModelDescriptor::new("m", "M", "X", 1000, 900, 900);
        assert_eq!(model.max_input_tokens, 900);
        assert_eq!(model.max_output_tokens, 100);
    }

    #[test]
    fn estimates_cost_from_per_1k_pricing() {
        let model = ModelDescriptor::new("gpt-4", "GPT-4", "OpenAI", 8192, 6144, 2048).with_pricing(0.03, 0.06);
        let cost = model.estimate_cost(1000, 500);
        assert!((cost - 0.06).abs() < 1e-9);
    }

    #[test]
    fn usage_parses_partial_objects() {
        let usage: Usage = serde_json::from_str(r#"{"prompt_tokens": 3, "total_tokens": 5}"#).unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 5);
    }

    #[test]
    fn sampling_params_have_defaults() {
        let params = SamplingParams::default();
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 2000);
        assert!(params.stream);
    }
}
