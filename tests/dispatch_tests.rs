// Dispatcher and selector behaviour against mocked backends

use mockito::{Matcher, Server};
use serde_json::json;
use sight_hoster_node::config::BackendConfig;
use sight_hoster_node::settings::{ACTIVE_BACKEND_KEY, OLLAMA_BASE_URL_KEY, VLLM_BASE_URL_KEY};
use sight_hoster_node::{
    BackendSelector, BufferedSink, DispatchOutcome, MemorySettings, RequestKind, StaticModelDirectory,
};
use std::sync::Arc;
use tokio_test::assert_ok;

fn ollama_selector(url: &str) -> (BackendSelector, MemorySettings) {
    let settings = MemorySettings::new();
    settings.set(ACTIVE_BACKEND_KEY, "ollama");
    settings.set(OLLAMA_BASE_URL_KEY, url);
    let selector = BackendSelector::new(Arc::new(settings.clone()), BackendConfig::default()).unwrap();
    (selector, settings)
}

fn vllm_selector(url: &str) -> BackendSelector {
    let settings = MemorySettings::new();
    settings.set(ACTIVE_BACKEND_KEY, "vllm");
    settings.set(VLLM_BASE_URL_KEY, url);
    BackendSelector::new(Arc::new(settings), BackendConfig::default()).unwrap()
}

#[tokio::test]
async fn test_chat_without_model_uses_live_default() {
    let mut server = Server::new_async().await;
    let tags = server
        .mock("GET", "/api/tags")
        .with_header("content-type", "application/json")
        .with_body(r#"{"models":[{"name":"llama3.2:latest"},{"name":"qwen2.5:7b"}]}"#)
        .create_async()
        .await;
    let backend_body = r#"{"model":"llama3.2:latest","message":{"role":"assistant","content":"hello"},"done":true,"total_duration":123}"#;
    let chat = server
        .mock("POST", "/api/chat")
        .match_body(Matcher::PartialJson(json!({
            "model": "llama3.2:latest",
            "stream": false,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .with_header("content-type", "application/json")
        .with_body(backend_body)
        .expect(1)
        .create_async()
        .await;

    let (selector, _settings) = ollama_selector(&server.url());
    let mut sink = BufferedSink::new();
    let outcome = selector
        .dispatch(
            RequestKind::Chat,
            json!({"messages": [{"role": "user", "content": "hi"}], "stream": false}),
            Some("/api/chat"),
            &mut sink,
        )
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Responded);
    assert_eq!(sink.status_code(), 200);
    let expected: serde_json::Value = serde_json::from_str(backend_body).unwrap();
    assert_eq!(sink.body_json(), Some(expected));
    tags.assert_async().await;
    chat.assert_async().await;
}

#[tokio::test]
async fn test_unknown_model_is_substituted() {
    let mut server = Server::new_async().await;
    let chat = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"model": "llama3.2:latest"})))
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"chatcmpl-1","choices":[]}"#)
        .expect(1)
        .create_async()
        .await;

    let (selector, _settings) = ollama_selector(&server.url());
    let selector = selector.with_model_directory(Arc::new(StaticModelDirectory::new(
        &["llama3.2:latest"],
        "llama3.2:latest",
    )));
    let mut sink = BufferedSink::new();
    assert_ok!(
        selector
            .dispatch(
                RequestKind::Chat,
                json!({"model": "does-not-exist", "messages": []}),
                None,
                &mut sink,
            )
            .await
    );

    chat.assert_async().await;
}

#[tokio::test]
async fn test_directory_failure_passes_model_through() {
    let mut server = Server::new_async().await;
    let _tags = server.mock("GET", "/api/tags").with_status(500).create_async().await;
    let generate = server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({"model": "mistral"})))
        .with_header("content-type", "application/json")
        .with_body(r#"{"response":"ok","done":true}"#)
        .expect(1)
        .create_async()
        .await;

    let (selector, _settings) = ollama_selector(&server.url());
    let mut sink = BufferedSink::new();
    selector
        .dispatch(
            RequestKind::Completion,
            json!({"model": "mistral", "prompt": "hi", "stream": false}),
            None,
            &mut sink,
        )
        .await
        .unwrap();

    generate.assert_async().await;
    assert_eq!(sink.body_json().unwrap()["response"], "ok");
}

#[tokio::test]
async fn test_model_info_unsupported_on_vllm_without_network() {
    let mut server = Server::new_async().await;
    let any = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let any_post = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let selector = vllm_selector(&server.url());
    let mut sink = BufferedSink::new();
    let err = selector
        .dispatch(RequestKind::ModelInfo, json!({"name": "m"}), None, &mut sink)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "UNSUPPORTED_REQUEST_TYPE");
    any.assert_async().await;
    any_post.assert_async().await;
}

#[test]
fn test_unknown_kind_name_is_rejected() {
    let err = "transcribe".parse::<RequestKind>().unwrap_err();
    assert_eq!(err.code(), "UNSUPPORTED_REQUEST_TYPE");
}

#[tokio::test]
async fn test_backend_switch_takes_effect_next_call() {
    let mut ollama = Server::new_async().await;
    let mut vllm = Server::new_async().await;
    let _ov = ollama
        .mock("GET", "/api/version")
        .with_body(r#"{"version":"0.5.1"}"#)
        .create_async()
        .await;
    let _vv = vllm
        .mock("GET", "/version")
        .with_body(r#"{"version":"0.6.3"}"#)
        .create_async()
        .await;

    let (selector, settings) = ollama_selector(&ollama.url());
    settings.set(VLLM_BASE_URL_KEY, &vllm.url());

    let mut sink = BufferedSink::new();
    let first = selector
        .dispatch(RequestKind::Version, json!({}), None, &mut sink)
        .await
        .unwrap();
    settings.set(ACTIVE_BACKEND_KEY, "vllm");
    let second = selector
        .dispatch(RequestKind::Version, json!({}), None, &mut sink)
        .await
        .unwrap();

    assert_eq!(first.into_json().unwrap(), json!({"version": "0.5.1", "backend": "ollama"}));
    assert_eq!(second.into_json().unwrap(), json!({"version": "0.6.3", "backend": "vllm"}));
}

#[tokio::test]
async fn test_vllm_sends_bearer_and_openai_paths() {
    let mut server = Server::new_async().await;
    let completions = server
        .mock("POST", "/v1/completions")
        .match_header("authorization", "Bearer secret")
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"cmpl-1","object":"text_completion","choices":[]}"#)
        .expect(1)
        .create_async()
        .await;

    let settings = MemorySettings::new();
    settings.set(ACTIVE_BACKEND_KEY, "vllm");
    settings.set(VLLM_BASE_URL_KEY, &server.url());
    let config = BackendConfig {
        vllm_api_key: Some("secret".to_string()),
        ..BackendConfig::default()
    };
    let selector = BackendSelector::new(Arc::new(settings), config)
        .unwrap()
        .with_model_directory(Arc::new(StaticModelDirectory::new(&["m"], "m")));

    let mut sink = BufferedSink::new();
    selector
        .dispatch(
            RequestKind::Completion,
            json!({"model": "m", "prompt": "hi"}),
            Some("/api/generate"),
            &mut sink,
        )
        .await
        .unwrap();

    completions.assert_async().await;
}

#[tokio::test]
async fn test_backend_errors_are_classified() {
    let mut server = Server::new_async().await;
    let _busy = server
        .mock("POST", "/api/embeddings")
        .with_status(503)
        .with_body("loading model")
        .create_async()
        .await;
    let _bad = server
        .mock("GET", "/api/tags")
        .with_status(404)
        .with_body("not found")
        .create_async()
        .await;

    let (selector, _settings) = ollama_selector(&server.url());
    let selector = selector.with_model_directory(Arc::new(StaticModelDirectory::new(&["m"], "m")));
    let mut sink = BufferedSink::new();

    let err = selector
        .dispatch(RequestKind::Embeddings, json!({"model": "m", "prompt": "x"}), None, &mut sink)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BACKEND_UNAVAILABLE");
    assert!(err.is_recoverable());

    let err = selector
        .dispatch(RequestKind::ModelList, json!({}), None, &mut sink)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BACKEND_REQUEST_ERROR");
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_unreachable_backend() {
    // Nothing listens on this port
    let (selector, _settings) = ollama_selector("http://127.0.0.1:9");
    let mut sink = BufferedSink::new();

    let err = selector
        .dispatch(RequestKind::Version, json!({}), None, &mut sink)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BACKEND_UNAVAILABLE");

    let outcome = selector
        .dispatch(RequestKind::HealthCheck, json!({}), None, &mut sink)
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Health { healthy: false });
}

#[tokio::test]
async fn test_chat_messages_without_path_use_openai_route() {
    // Only the native route's path marker selects /api/chat; a bare
    // messages body falls to the OpenAI-compatible endpoint
    let mut server = Server::new_async().await;
    let _tags = server
        .mock("GET", "/api/tags")
        .with_body(r#"{"models":[{"name":"llama3.2:latest"}]}"#)
        .create_async()
        .await;
    let native = server.mock("POST", "/api/chat").expect(0).create_async().await;
    let openai = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"model": "llama3.2:latest"})))
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"chatcmpl-2","object":"chat.completion","choices":[]}"#)
        .expect(1)
        .create_async()
        .await;

    let (selector, _settings) = ollama_selector(&server.url());
    let mut sink = BufferedSink::new();
    selector
        .dispatch(
            RequestKind::Chat,
            json!({"messages": [{"role": "user", "content": "hi"}], "stream": false}),
            None,
            &mut sink,
        )
        .await
        .unwrap();

    openai.assert_async().await;
    native.assert_async().await;
    assert_eq!(sink.body_json().unwrap()["id"], "chatcmpl-2");
}
