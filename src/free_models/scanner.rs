//! FreeModelScanner - discovers free models from the OpenRouter listing.
//!
//! A model is free when both `pricing.prompt` and `pricing.completion` parse to zero.
//! Capabilities are read from the listing where present:
//! - `architecture.input_modalities` containing `image` means vision
//! - `supported_parameters` containing `tools` means function calling
//! - `supported_parameters` containing `reasoning` means reasoning
//!
//! Results are cached for an hour.

use super::FreeModel;
use crate::http::create_client;
use moka::future::Cache;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

const HOST_LABEL: &str = "OpenRouter";
const FALLBACK_CONTEXT: u32 = 4096;

#[derive(Clone)]
pub struct FreeModelScanner {
    client: Client,
    openrouter_url: String,
    cache: Cache<String, Arc<Vec<FreeModel>>>,
}

impl FreeModelScanner {
    const DEFAULT_OPENROUTER_URL: &'static str = "https://openrouter.ai/api/v1/models";
    const CACHE_KEY: &'static str = "openrouter_free_models";

    pub fn new() -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(3600)) // 1 hour - model lists rarely change
            .build();

        Self {
            client: create_client(),
            openrouter_url: Self::DEFAULT_OPENROUTER_URL.to_string(),
            cache,
        }
    }

    pub fn with_openrouter_url(mut self, url: &str) -> Self {
        self.openrouter_url = url.to_string();
        self
    }

    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache = Cache::builder()
            .time_to_live(Duration::from_secs(secs))
            .build();
        self
    }

    /// Fetch free models from the OpenRouter API.
    pub async fn fetch_openrouter(&self) -> Result<Vec<FreeModel>, reqwest::Error> {
        let response = self.client.get(&self.openrouter_url).send().await?;
        let response = response.error_for_status()?;

        let data: Value = response.json().await?;
        let models = data["data"].as_array().cloned().unwrap_or_default();

        Ok(self.filter_openrouter_free(&models))
    }

    /// Keep only zero-priced entries and read their capabilities.
    pub fn filter_openrouter_free(&self, models: &[Value]) -> Vec<FreeModel> {
        models
            .iter()
            .filter_map(|model| {
                let id = model["id"].as_str()?;
                let pricing = &model["pricing"];

                let prompt_price = parse_price(&pricing["prompt"]);
                let completion_price = parse_price(&pricing["completion"]);
                if prompt_price != 0.0 || completion_price != 0.0 {
                    return None;
                }

                let name = model["name"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| display_name(id));
                let context_length = model["context_length"]
                    .as_u64()
                    .and_then(|c| u32::try_from(c).ok())
                    .unwrap_or(FALLBACK_CONTEXT);

                let mut free = FreeModel::new(id, &name, HOST_LABEL, context_length);
                free.vision = array_contains(&model["architecture"]["input_modalities"], "image");
                free.function_calling = array_contains(&model["supported_parameters"], "tools");
                free.reasoning = array_contains(&model["supported_parameters"], "reasoning");
                if let Some(description) = model["description"].as_str() {
                    free.description = description.to_string();
                }
                Some(free)
            })
            .collect()
    }

    /// Free models from the listing (cached). Failures yield an empty list and are not cached.
    pub async fn get_free_models(&self, force_refresh: bool) -> Arc<Vec<FreeModel>> {
        if !force_refresh {
            if let Some(cached) = self.cache.get(Self::CACHE_KEY).await {
                return cached;
            }
        }

        match self.fetch_openrouter().await {
            Ok(models) => {
                debug!(count = models.len(), "Discovered free models");
                let models = Arc::new(models);
                self.cache.insert(Self::CACHE_KEY.to_string(), models.clone()).await;
                models
            }
            Err(e) => {
                warn!("Free model discovery failed: {}", e);
                Arc::new(Vec::new())
            }
        }
    }
}

impl Default for FreeModelScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Prices arrive as strings (`"0"`) or numbers. Missing means paid.
fn parse_price(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.parse::<f64>().unwrap_or(1.0),
        Value::Number(n) => n.as_f64().unwrap_or(1.0),
        _ => 1.0,
    }
}

fn array_contains(value: &Value, needle: &str) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().any(|item| item.as_str() == Some(needle)))
}

/// Display name for a listing entry without one.
/// "qwen/qwen3-8b:free" -> "Qwen3 8b (Free)", "z-ai/glm-4-5-air:free" -> "GLM 4.5 Air (Free)"
pub fn display_name(id: &str) -> String {
    // Consecutive digit groups separated by spaces (version numbers)
    static VERSION_REGEX: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d+)((?:\s+\d+)+)").unwrap());

    static ACRONYMS: &[&str] = &["glm", "gpt", "llm", "ai", "r1"];

    let (base, free) = match id.strip_suffix(":free") {
        Some(base) => (base, true),
        None => (id, false),
    };
    let base = base.rsplit('/').next().unwrap_or(base);

    let spaced = base
        .split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part.chars().all(|c| c.is_ascii_digit()) {
                part.to_string()
            } else if ACRONYMS.contains(&part.to_lowercase().as_str()) {
                part.to_uppercase()
            } else {
                let mut chars = part.chars();
                match chars.next() {
                    None => String::new(),
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    let name = VERSION_REGEX
        .replace_all(&spaced, |caps: &regex::Captures| {
            format!("{}{}", &caps[1], caps[2].replace(' ', "."))
        })
        .to_string();

    if free {
        format!("{} (Free)", name)
    } else {
        name
    }
}
