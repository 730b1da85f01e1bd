//! Environment fallback inputs for bootstrap.

use crate::types::{BackendConfig, BackendKind};

/// Backend settings read from environment-style variables.
///
/// Only consulted when the config store produced no backend at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendEnv {
    pub openrouter_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_default_model: Option<String>,
    pub glm_api_key: Option<String>,
    pub glm_base_url: Option<String>,
    pub glm_default_model: Option<String>,
}

impl BackendEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any lookup function. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            openai_default_model: get("OPENAI_DEFAULT_MODEL"),
            glm_api_key: get("GLM_API_KEY"),
            glm_base_url: get("GLM_BASE_URL"),
            glm_default_model: get("GLM_DEFAULT_MODEL"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.openrouter_api_key.is_none() && self.openai_api_key.is_none() && self.glm_api_key.is_none()
    }

    /// Backend configs in registration order: openrouter, openai, glm.
    pub fn backend_configs(&self) -> Vec<(String, BackendConfig)> {
        let mut configs = Vec::new();

        if let Some(key) = &self.openrouter_api_key {
            let config = BackendConfig::new(BackendKind::OpenRouter, key.as_str())
                .with_base_url(BackendKind::OPENROUTER_URL)
                .with_default_model(BackendKind::OpenRouter.default_model("openrouter", ""));
            configs.push(("openrouter".to_string(), config));
        }

        if let Some(key) = &self.openai_api_key {
            let base_url = self.openai_base_url.as_deref().unwrap_or("");
            let model = self
                .openai_default_model
                .clone()
                .unwrap_or_else(|| BackendKind::OpenAi.default_model("openai", &base_url.to_lowercase()).to_string());
            let mut config = BackendConfig::new(BackendKind::OpenAi, key.as_str()).with_default_model(&model);
            if !base_url.is_empty() {
                config = config.with_base_url(base_url);
            }
            configs.push(("openai".to_string(), config));
        }

        if let Some(key) = &self.glm_api_key {
            let config = BackendConfig::new(BackendKind::Glm, key.as_str())
                .with_base_url(self.glm_base_url.as_deref().unwrap_or(BackendKind::GLM_URL))
                .with_default_model(self.glm_default_model.as_deref().unwrap_or("glm-4"));
            configs.push(("glm".to_string(), config));
        }

        configs
    }
}
