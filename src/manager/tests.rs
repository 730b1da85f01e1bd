//! Tests for BackendManager.

use super::*;
use crate::backend::mock::MockBackend;
use crate::error::ErrorKind;
use crate::store::MemoryConfigStore;
use crate::stream::collect_units;
use crate::types::join_content;
use mockito::Matcher;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

fn empty_manager() -> BackendManager {
    BackendManager::new(Arc::new(MemoryConfigStore::new()))
}

fn env(pairs: &[(&str, &str)]) -> BackendEnv {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    BackendEnv::from_lookup(|key| map.get(key).cloned())
}

fn hi() -> Vec<ChatMessage> {
    vec![ChatMessage::user("hi")]
}

fn event_body(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("{}\n\n", l)).collect()
}

// ============================================================================
// Bootstrap
// ============================================================================

#[test]
fn bootstrap_loads_stored_backends_and_skips_test_entry() {
    let store = MemoryConfigStore::new()
        .with_entry("echo", BackendConfig::new(BackendKind::Custom, "k").with_default_model("m1"))
        .with_entry(RESERVED_TEST_ENTRY, BackendConfig::new(BackendKind::Custom, "k"))
        .with_entry("openrouter", BackendConfig::new(BackendKind::OpenRouter, ""));
    let manager = BackendManager::new(Arc::new(store));

    let count = manager.bootstrap(&env(&[("OPENAI_API_KEY", "sk-env")]));

    assert_eq!(count, 2);
    assert_eq!(manager.names(), vec!["echo".to_string(), "openrouter".to_string()]);
    assert_eq!(manager.default_name().as_deref(), Some("echo"));
    assert!(!manager.info()["openrouter"].has_credential);
}

#[test]
fn bootstrap_falls_back_to_environment_only_when_store_is_empty() {
    let manager = empty_manager();

    let count = manager.bootstrap(&env(&[
        ("OPENROUTER_API_KEY", "sk-or-v1-env"),
        ("GLM_API_KEY", "glm-key"),
    ]));

    assert_eq!(count, 2);
    assert_eq!(manager.names(), vec!["openrouter".to_string(), "glm".to_string()]);
    assert_eq!(manager.default_name().as_deref(), Some("openrouter"));
    assert_eq!(manager.get("openrouter").unwrap().default_model(), "deepseek/deepseek-r1-0528:free");
}

#[test]
fn environment_backends_are_validated() {
    let manager = empty_manager();

    let count = manager.bootstrap(&env(&[("OPENAI_API_KEY", "not-a-key"), ("GLM_API_KEY", "glm-key")]));

    assert_eq!(count, 1);
    assert_eq!(manager.names(), vec!["glm".to_string()]);
}

#[test]
fn bootstrap_with_nothing_configured_registers_nothing() {
    let manager = empty_manager();

    assert_eq!(manager.bootstrap(&BackendEnv::default()), 0);
    assert!(manager.is_empty());
    assert_eq!(manager.default_name(), None);
}

// ============================================================================
// Registration and lookup
// ============================================================================

#[test]
fn unregistering_default_promotes_remaining_backend() {
    let manager = empty_manager();
    manager.register_backend("a", MockBackend::always_succeeds("a").into_arc(), false).unwrap();
    manager.register_backend("b", MockBackend::always_succeeds("b").into_arc(), false).unwrap();
    assert_eq!(manager.default_name().as_deref(), Some("a"));

    assert!(manager.unregister("a"));
    assert_eq!(manager.default_name().as_deref(), Some("b"));

    assert!(manager.unregister("b"));
    assert_eq!(manager.default_name(), None);
    assert!(!manager.unregister("b"));
}

#[test]
fn registration_can_skip_validation() {
    let manager = empty_manager();

    let rejected = manager.register_backend("bad", MockBackend::always_succeeds("bad").invalid().into_arc(), false);
    assert_eq!(rejected.unwrap_err().kind(), ErrorKind::Config);
    assert!(manager.is_empty());

    manager
        .register_backend("bad", MockBackend::always_succeeds("bad").invalid().into_arc(), true)
        .unwrap();
    assert_eq!(manager.len(), 1);
}

#[test]
fn composite_lookup_pins_without_touching_stored_instance() {
    let manager = empty_manager();
    let config = BackendConfig::new(BackendKind::Custom, "k").with_default_model("m1");
    manager.register("echo", config, false).unwrap();

    let pinned = manager.get("echo:modelY").unwrap();

    assert_eq!(pinned.default_model(), "modelY");
    assert_eq!(manager.get("echo").unwrap().default_model(), "m1");
}

#[test]
fn composite_lookup_keeps_colons_in_model_id() {
    let manager = empty_manager();
    manager.register("openrouter", BackendConfig::new(BackendKind::OpenRouter, "sk-or-v1-x"), false).unwrap();

    let pinned = manager.get("openrouter:qwen/qwen3-8b:free").unwrap();

    assert_eq!(pinned.default_model(), "qwen/qwen3-8b:free");
}

#[tokio::test]
async fn composite_lookup_on_non_pinning_backend_uses_override_pair() {
    let manager = empty_manager();
    let mock = MockBackend::always_succeeds("mock").with_default_model("base").into_arc();
    manager.register_backend("mock", mock.clone(), false).unwrap();

    let overridden = manager.get("mock:special").unwrap();
    let units = collect_units(overridden.chat_completion(ChatRequest::new(hi())).await.unwrap())
        .await
        .unwrap();

    assert_eq!(join_content(&units), "reply from special");
    assert_eq!(mock.calls(), vec!["special".to_string()]);
    assert_eq!(overridden.default_model(), "special");
    assert_eq!(manager.get("mock").unwrap().default_model(), "base");
}

#[test]
fn unknown_names_resolve_to_nothing() {
    let manager = empty_manager();
    manager.register_backend("a", MockBackend::always_succeeds("a").into_arc(), false).unwrap();

    assert!(manager.get("missing").is_none());
    assert!(manager.get("missing:model").is_none());
}

#[test]
fn resolve_for_model_follows_mapping_shape_default_then_first() {
    let manager = empty_manager();
    for name in ["glm", "openai", "openrouter"] {
        manager.register_backend(name, MockBackend::always_succeeds(name).into_arc(), false).unwrap();
    }
    let resolved = |model: &str| manager.backend_name_for_model(model);

    assert_eq!(resolved("gpt-4o").as_deref(), Some("openai"));
    assert_eq!(resolved("openai/gpt-4o").as_deref(), Some("openai"));
    assert_eq!(resolved("qwen/qwen3-8b:free").as_deref(), Some("openrouter"));
    assert_eq!(resolved("glm-4").as_deref(), Some("glm"));

    assert!(manager.set_model_mapping("qwen/qwen3-8b:free", "glm"));
    assert_eq!(resolved("qwen/qwen3-8b:free").as_deref(), Some("glm"));
    assert!(!manager.set_model_mapping("x", "missing"));

    assert!(manager.set_default("openrouter"));
    assert_eq!(resolved("plain-model").as_deref(), Some("openrouter"));
    assert!(!manager.set_default("missing"));
}

#[test]
fn openai_shaped_ids_fall_back_to_default_without_openai_backend() {
    let manager = empty_manager();
    manager.register_backend("glm", MockBackend::always_succeeds("glm").into_arc(), false).unwrap();
    manager.register_backend("openrouter", MockBackend::always_succeeds("openrouter").into_arc(), false).unwrap();

    assert_eq!(manager.backend_name_for_model("openai/gpt-4o").as_deref(), Some("glm"));
}

#[test]
fn resolve_target_splits_registered_prefix_only() {
    let manager = empty_manager();
    manager.register_backend("echo", MockBackend::always_succeeds("echo").into_arc(), false).unwrap();

    let (backend, model) = manager.resolve_target("echo:m2").unwrap();
    assert_eq!((backend.name(), model.as_str()), ("echo", "m2"));

    let (backend, model) = manager.resolve_target("qwen/qwen3-8b:free").unwrap();
    assert_eq!((backend.name(), model.as_str()), ("echo", "qwen/qwen3-8b:free"));
}

// ============================================================================
// Configure and remove
// ============================================================================

#[test]
fn configure_fills_default_model_persists_and_promotes() {
    let store = Arc::new(MemoryConfigStore::new());
    let manager = BackendManager::new(store.clone());

    manager.configure("deepseek", BackendConfig::new(BackendKind::OpenAi, "sk-ds")).unwrap();

    let stored = store.load("deepseek").unwrap().unwrap();
    assert_eq!(stored.default_model.as_deref(), Some("deepseek-chat"));
    assert_eq!(manager.default_name().as_deref(), Some("deepseek"));
    assert_eq!(manager.get("deepseek").unwrap().default_model(), "deepseek-chat");
}

#[test]
fn configure_rejects_invalid_config_without_persisting() {
    let store = Arc::new(MemoryConfigStore::new());
    let manager = BackendManager::new(store.clone());

    let err = manager.configure("openai", BackendConfig::new(BackendKind::OpenAi, "nope")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(manager.is_empty());
    assert_eq!(store.load("openai").unwrap(), None);
}

#[test]
fn configure_is_idempotent_and_replaces_in_place() {
    let manager = empty_manager();
    manager.configure("a", BackendConfig::new(BackendKind::Custom, "k").with_default_model("m1")).unwrap();
    manager.configure("b", BackendConfig::new(BackendKind::Custom, "k")).unwrap();

    manager.configure("a", BackendConfig::new(BackendKind::Custom, "k").with_default_model("m2")).unwrap();

    assert_eq!(manager.names(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(manager.get("a").unwrap().default_model(), "m2");
    assert_eq!(manager.get("b").unwrap().default_model(), "default");
    assert_eq!(manager.default_name().as_deref(), Some("a"));
}

#[test]
fn remove_deletes_persisted_entry() {
    let store = Arc::new(MemoryConfigStore::new());
    let manager = BackendManager::new(store.clone());
    manager.configure("glm", BackendConfig::new(BackendKind::Glm, "glm-key")).unwrap();

    assert!(manager.remove("glm").unwrap());

    assert!(manager.is_empty());
    assert_eq!(store.load("glm").unwrap(), None);
    assert!(!manager.remove("glm").unwrap());
}

#[test]
fn anthropic_kind_cannot_be_configured() {
    let manager = empty_manager();

    let err = manager.configure("anthropic", BackendConfig::new(BackendKind::Anthropic, "key")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn status_reports_each_backend_independently() {
    let manager = empty_manager();
    manager.register_backend("up", MockBackend::always_succeeds("up").into_arc(), false).unwrap();
    manager
        .register_backend("down", MockBackend::always_succeeds("down").disconnected().into_arc(), false)
        .unwrap();

    let status = manager.status().await;

    assert_eq!(status.len(), 2);
    assert!(status["up"].connected);
    assert!(!status["down"].connected);
    assert_eq!(status["up"].default_model, "mock-model");
    assert!(status["up"].has_credential);

    let tests = manager.test_all().await;
    assert_eq!(tests.get("up"), Some(&true));
    assert_eq!(tests.get("down"), Some(&false));
    assert!(!manager.test_connection("missing").await);
}

#[tokio::test]
async fn list_models_groups_by_backend() {
    let manager = empty_manager();
    let a = MockBackend::always_succeeds("a").into_arc();
    manager.register_backend("a", a.clone(), false).unwrap();
    manager.register_backend("b", MockBackend::always_succeeds("b").with_default_model("b-1").into_arc(), false).unwrap();

    let models = manager.list_models().await;

    assert_eq!(models.len(), 2);
    assert_eq!(models["a"][0].id, "mock-model");
    assert_eq!(models["b"][0].id, "b-1");
    assert_eq!(a.model_fetches(), 1);
}

#[test]
fn info_marks_default_backend() {
    let manager = empty_manager();
    manager.register("echo", BackendConfig::new(BackendKind::Custom, "k"), false).unwrap();
    manager.register("glm", BackendConfig::new(BackendKind::Glm, "key"), false).unwrap();

    let info = manager.info();

    assert!(info["echo"].is_default);
    assert!(!info["glm"].is_default);
    assert_eq!(info["glm"].endpoint, BackendKind::GLM_URL);
    assert_eq!(info["echo"].kind, BackendKind::Custom);
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn routes_to_named_http_compatible_backend() {
    let mut server = mockito::Server::new_async().await;
    let body = event_body(&[
        r#"data: {"choices":[{"delta":{"content":"hello "},"finish_reason":null}]}"#,
        r#"data: {"choices":[{"delta":{"content":"there"},"finish_reason":null}]}"#,
        r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#,
    ]);
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"model": "m1"})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let manager = empty_manager();
    let config = BackendConfig::new(BackendKind::Custom, "k")
        .with_base_url(&format!("{}/v1", server.url()))
        .with_default_model("m1");
    manager.register("echo", config, false).unwrap();

    let stream = manager.route(Some("echo"), Some("m1"), hi(), SamplingParams::default()).await.unwrap();
    let units = collect_units(stream).await.unwrap();

    mock.assert_async().await;
    assert!(!join_content(&units).is_empty());
    let sequences: Vec<u64> = units.iter().map(|u| u.sequence).collect();
    assert_eq!(sequences, (1..=units.len() as u64).collect::<Vec<_>>());
    let last = units.last().unwrap();
    assert_eq!(last.usage.as_ref().map(|u| u.total_tokens), Some(3));
}

#[tokio::test]
async fn explicit_model_wins_on_named_backend() {
    let manager = empty_manager();
    let mock = MockBackend::always_succeeds("mock").into_arc();
    manager.register_backend("mock", mock.clone(), false).unwrap();

    let stream = manager.route(Some("mock:pinned"), Some("explicit"), hi(), SamplingParams::default()).await.unwrap();
    collect_units(stream).await.unwrap();
    let stream = manager.route(Some("mock:pinned"), None, hi(), SamplingParams::default()).await.unwrap();
    collect_units(stream).await.unwrap();
    let stream = manager.route(Some("mock"), None, hi(), SamplingParams::default()).await.unwrap();
    collect_units(stream).await.unwrap();

    assert_eq!(mock.calls(), vec!["explicit".to_string(), "pinned".to_string(), "mock-model".to_string()]);
}

#[tokio::test]
async fn route_without_backend_resolves_from_model() {
    let manager = empty_manager();
    let openai = MockBackend::always_succeeds("openai").into_arc();
    let openrouter = MockBackend::always_succeeds("openrouter").into_arc();
    manager.register_backend("openai", openai.clone(), false).unwrap();
    manager.register_backend("openrouter", openrouter.clone(), false).unwrap();

    let stream = manager.route(None, Some("qwen/qwen3-8b:free"), hi(), SamplingParams::default()).await.unwrap();
    collect_units(stream).await.unwrap();

    assert_eq!(openrouter.calls(), vec!["qwen/qwen3-8b:free".to_string()]);
    assert_eq!(openai.call_count(), 0);
}

#[tokio::test]
async fn route_to_unknown_backend_fails_immediately() {
    let manager = empty_manager();
    manager.register_backend("a", MockBackend::always_succeeds("a").into_arc(), false).unwrap();

    let err = manager.route(Some("missing"), None, hi(), SamplingParams::default()).await.err().unwrap();

    assert_eq!(err.kind(), ErrorKind::UnknownBackend);
}

#[tokio::test]
async fn route_with_no_backends_reports_no_available_model() {
    let manager = empty_manager();

    let err = manager.route(None, Some("m1"), hi(), SamplingParams::default()).await.err().unwrap();

    assert_eq!(err.kind(), ErrorKind::NoAvailableModel);
}

// ============================================================================
// Race
// ============================================================================

#[tokio::test]
async fn race_returns_first_finisher() {
    let manager = empty_manager();
    let slow = MockBackend::always_succeeds("slow")
        .with_delay("mock-model", Duration::from_secs(5))
        .into_arc();
    manager.register_backend("slow", slow, false).unwrap();
    manager.register_backend("fast", MockBackend::always_succeeds("fast").into_arc(), false).unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        manager.race(&[], hi(), SamplingParams::default()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome.backend, "fast");
    assert_eq!(outcome.content(), "reply from mock-model");
}

#[tokio::test]
async fn race_skips_failures() {
    let manager = empty_manager();
    manager
        .register_backend("broken", MockBackend::always_succeeds("broken").always_fails("mock-model").into_arc(), false)
        .unwrap();
    manager.register_backend("ok", MockBackend::always_succeeds("ok").into_arc(), false).unwrap();

    let names = vec!["broken".to_string(), "ok".to_string()];
    let outcome = manager.race(&names, hi(), SamplingParams::default()).await.unwrap();

    assert_eq!(outcome.backend, "ok");
}

#[tokio::test]
async fn race_with_all_failing_returns_an_error() {
    let manager = empty_manager();
    for name in ["a", "b"] {
        manager
            .register_backend(name, MockBackend::always_succeeds(name).always_fails("mock-model").into_arc(), false)
            .unwrap();
    }

    let err = manager.race(&[], hi(), SamplingParams::default()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.message().contains("mock-model unavailable"));
}

#[tokio::test]
async fn race_rejects_unknown_names() {
    let manager = empty_manager();
    manager.register_backend("a", MockBackend::always_succeeds("a").into_arc(), false).unwrap();

    let err = manager
        .race(&["a".to_string(), "ghost".to_string()], hi(), SamplingParams::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnknownBackend);
    assert!(matches!(empty_manager().race(&[], hi(), SamplingParams::default()).await, Err(ProviderError::NoAvailableModel { .. })));
}

// ============================================================================
// Free models
// ============================================================================

#[test]
fn free_model_passthroughs() {
    let manager = empty_manager();
    manager.register("openrouter", BackendConfig::new(BackendKind::OpenRouter, "sk-or-v1-x"), false).unwrap();
    manager.register("glm", BackendConfig::new(BackendKind::Glm, "key"), false).unwrap();

    assert_eq!(manager.free_models(None)["openrouter"].len(), 9);
    assert_eq!(manager.free_models(Some("openrouter")).len(), 1);
    assert!(manager.free_models(Some("glm")).is_empty());
    assert!(manager.free_models(Some("missing")).is_empty());
    assert_eq!(manager.recommended(UseCase::Multimodal), vec!["google/gemma-3n-e4b-it:free".to_string()]);
    assert!(manager.is_free_model("anything:free"));
    assert!(!manager.is_free_model("gpt-4o"));
}

#[test]
fn free_models_follow_backend_kind_not_name() {
    let manager = empty_manager();
    let gateway = MockBackend::always_succeeds("gateway").with_kind(BackendKind::OpenRouter).into_arc();
    manager.register_backend("gateway", gateway, false).unwrap();
    manager.register_backend("local", MockBackend::always_succeeds("local").into_arc(), false).unwrap();

    assert_eq!(manager.free_models(Some("gateway"))["gateway"].len(), 9);
    assert!(manager.free_models(Some("local")).is_empty());
}

#[test]
fn capabilities_fall_back_to_id_heuristics() {
    let manager = empty_manager();

    let known = manager.model_capabilities("qwen/qwq-32b:free");
    assert!(known.reasoning && known.free);
    assert_eq!(known.context_length, 32768);

    let guessed = manager.model_capabilities("mistralai/devstral-medium");
    assert!(guessed.function_calling);
    assert!(!guessed.free);
    assert_eq!(guessed.context_length, 0);
}
