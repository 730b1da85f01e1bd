//! Predefined model catalogs.
//!
//! Served when a backend cannot list its models, and used to enrich listed
//! ids with context and pricing data the listing endpoint omits.

use crate::types::ModelDescriptor;

pub const OPENAI_LABEL: &str = "OpenAI";
pub const DEEPSEEK_LABEL: &str = "DeepSeek";
pub const GLM_LABEL: &str = "GLM";
pub const OPENROUTER_LABEL: &str = "OpenRouter";

pub fn openai_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gpt-4", "GPT-4", OPENAI_LABEL, 8192, 6144, 2048).with_pricing(0.03, 0.06),
        ModelDescriptor::new("gpt-4-turbo", "GPT-4 Turbo", OPENAI_LABEL, 128000, 120000, 4096)
            .with_pricing(0.01, 0.03),
        ModelDescriptor::new("gpt-4-turbo-preview", "GPT-4 Turbo Preview", OPENAI_LABEL, 128000, 120000, 4096)
            .with_pricing(0.01, 0.03),
        ModelDescriptor::new("gpt-3.5-turbo", "GPT-3.5 Turbo", OPENAI_LABEL, 16385, 12000, 4096)
            .with_pricing(0.0015, 0.002),
        ModelDescriptor::new("gpt-3.5-turbo-16k", "GPT-3.5 Turbo 16K", OPENAI_LABEL, 16385, 12000, 4096)
            .with_pricing(0.003, 0.004),
    ]
}

pub fn deepseek_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("deepseek-chat", "DeepSeek Chat", DEEPSEEK_LABEL, 32768, 30000, 2768)
            .with_pricing(0.0001, 0.0002),
        ModelDescriptor::new("deepseek-coder", "DeepSeek Coder", DEEPSEEK_LABEL, 32768, 30000, 2768)
            .with_pricing(0.0001, 0.0002),
    ]
}

pub fn glm_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("glm-4.5", "GLM-4.5", GLM_LABEL, 128000, 120000, 4096).with_pricing(0.001, 0.001),
        ModelDescriptor::new("glm-4.5-flash", "GLM-4.5 Flash", GLM_LABEL, 128000, 120000, 4096)
            .with_pricing(0.001, 0.001),
        ModelDescriptor::new("glm-4", "GLM-4", GLM_LABEL, 128000, 120000, 4096).with_pricing(0.01, 0.02),
        ModelDescriptor::new("glm-3-turbo", "GLM-3 Turbo", GLM_LABEL, 32000, 28000, 4096).with_pricing(0.005, 0.005),
    ]
}

/// Fallback list for the general-purpose OpenRouter backend.
pub fn openrouter_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "deepseek/deepseek-r1-0528:free",
            "DeepSeek R1 0528 (Free)",
            OPENROUTER_LABEL,
            32000,
            24000,
            8000,
        ),
        ModelDescriptor::new("deepseek/deepseek-r1:free", "DeepSeek R1 (Free)", OPENROUTER_LABEL, 32000, 24000, 8000),
        ModelDescriptor::new("openai/gpt-oss-20b:free", "GPT-OSS 20B (Free)", OPENROUTER_LABEL, 8192, 6144, 2048),
    ]
}

/// Fallback list for the free-only OpenRouter backend, with explicit budgets.
pub fn openrouter_free_models() -> Vec<ModelDescriptor> {
    [
        ("deepseek/deepseek-r1:free", "DeepSeek R1 (Free)", 163840, 120000, 43840),
        ("deepseek/deepseek-r1-0528:free", "DeepSeek R1 0528 (Free)", 163840, 120000, 43840),
        ("qwen/qwen3-8b:free", "Qwen3 8B (Free)", 40960, 30000, 10960),
        ("qwen/qwen3-30b-a3b:free", "Qwen3 30B A3B (Free)", 40960, 30000, 10960),
        ("qwen/qwen3-235b-a22b:free", "Qwen3 235B A22B (Free)", 131072, 100000, 31072),
        ("qwen/qwq-32b:free", "QwQ 32B (Free)", 32768, 24000, 8768),
        (
            "cognitivecomputations/dolphin3.0-mistral-24b:free",
            "Dolphin 3.0 Mistral 24B (Free)",
            32768,
            24000,
            8768,
        ),
        ("mistralai/devstral-small-2505:free", "Devstral Small (Free)", 32768, 24000, 8768),
        ("google/gemma-3n-e4b-it:free", "Gemma 3n E4B (Free)", 8192, 6144, 2048),
    ]
    .into_iter()
    .map(|(id, name, context, input, output)| ModelDescriptor::new(id, name, OPENROUTER_LABEL, context, input, output))
    .collect()
}

/// Entry for a listed model missing from the predefined catalog.
pub fn unlisted_model(id: &str, label: &str, price_per_1k: f64) -> ModelDescriptor {
    ModelDescriptor::new(id, id, label, 4096, 3000, 1000).with_pricing(price_per_1k, price_per_1k)
}
