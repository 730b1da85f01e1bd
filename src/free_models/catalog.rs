//! Built-in free model catalog and curated recommendations.

use super::{FreeModel, UseCase};

const OPENROUTER: &str = "OpenRouter";

/// Hand-curated zero-cost models served through OpenRouter.
pub fn builtin_models() -> Vec<FreeModel> {
    vec![
        FreeModel::new("deepseek/deepseek-r1:free", "DeepSeek R1 (Free)", OPENROUTER, 163840)
            .with_reasoning()
            .with_function_calling()
            .with_description("Open reasoning model on par with o1, with fully visible reasoning tokens"),
        FreeModel::new("deepseek/deepseek-r1-0528:free", "DeepSeek R1 0528 (Free)", OPENROUTER, 163840)
            .with_reasoning()
            .with_function_calling()
            .with_description("May 28 update of DeepSeek R1 with improved reasoning"),
        FreeModel::new("qwen/qwen3-8b:free", "Qwen3 8B (Free)", OPENROUTER, 40960)
            .with_reasoning()
            .with_function_calling()
            .with_description("8.2B parameter causal model with switchable thinking and chat modes"),
        FreeModel::new("qwen/qwen3-30b-a3b:free", "Qwen3 30B A3B (Free)", OPENROUTER, 40960)
            .with_reasoning()
            .with_function_calling()
            .with_description("30.5B parameter MoE model, 3.3B active, multilingual with reasoning"),
        FreeModel::new("qwen/qwen3-235b-a22b:free", "Qwen3 235B A22B (Free)", OPENROUTER, 131072)
            .with_reasoning()
            .with_function_calling()
            .with_description("235B parameter MoE model, 22B active, top-tier reasoning"),
        FreeModel::new("qwen/qwq-32b:free", "Qwen QwQ 32B (Free)", OPENROUTER, 32768)
            .with_reasoning()
            .with_description("Qwen reasoning model that excels at hard problems"),
        FreeModel::new(
            "cognitivecomputations/dolphin3.0-mistral-24b:free",
            "Dolphin3.0 Mistral 24B (Free)",
            OPENROUTER,
            32768,
        )
        .with_function_calling()
        .with_description("General instruction-tuned model for coding, math and agent use"),
        FreeModel::new("mistralai/devstral-small-2505:free", "Mistral Devstral Small 2505 (Free)", OPENROUTER, 32768)
            .with_function_calling()
            .with_description("24B agentic model tuned for software engineering tasks"),
        FreeModel::new("google/gemma-3n-e4b-it:free", "Google Gemma 3n 4B (Free)", OPENROUTER, 8192)
            .with_vision()
            .with_description("Gemma 3n tuned for mobile and low-resource devices, multimodal input"),
    ]
}

/// Recommended model ids per use case. Order is significant.
pub fn recommended_ids(use_case: UseCase) -> &'static [&'static str] {
    match use_case {
        UseCase::Reasoning => &[
            "deepseek/deepseek-r1:free",
            "qwen/qwen3-235b-a22b:free",
            "qwen/qwq-32b:free",
        ],
        UseCase::Coding => &[
            "mistralai/devstral-small-2505:free",
            "deepseek/deepseek-r1:free",
            "cognitivecomputations/dolphin3.0-mistral-24b:free",
        ],
        UseCase::Chat => &[
            "qwen/qwen3-8b:free",
            "qwen/qwen3-30b-a3b:free",
            "cognitivecomputations/dolphin3.0-mistral-24b:free",
        ],
        UseCase::Multimodal => &["google/gemma-3n-e4b-it:free"],
        UseCase::General => &[
            "deepseek/deepseek-r1:free",
            "qwen/qwen3-30b-a3b:free",
            "qwen/qwen3-8b:free",
        ],
    }
}
