// Local HTTP API served on an ephemeral port

use mockito::{Matcher, Server};
use serde_json::{json, Value};
use sight_hoster_node::api::{create_router, AppState};
use sight_hoster_node::config::BackendConfig;
use sight_hoster_node::settings::{ACTIVE_BACKEND_KEY, OLLAMA_BASE_URL_KEY, VLLM_BASE_URL_KEY};
use sight_hoster_node::{BackendSelector, InferenceEvent, MemorySettings, TaskFlavor};
use std::sync::Arc;
use tokio::sync::mpsc;

struct TestApi {
    base: String,
    events: mpsc::UnboundedReceiver<InferenceEvent>,
}

async fn spawn_api(settings: MemorySettings) -> TestApi {
    let selector = Arc::new(BackendSelector::new(Arc::new(settings), BackendConfig::default()).unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    let app = create_router(AppState {
        selector,
        events: tx,
        publisher: None,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    TestApi {
        base: format!("http://{}", addr),
        events: rx,
    }
}

fn ollama_at(url: &str) -> MemorySettings {
    let settings = MemorySettings::new();
    settings.set(OLLAMA_BASE_URL_KEY, url);
    settings
}

#[tokio::test]
async fn test_native_chat_end_to_end() {
    let mut backend = Server::new_async().await;
    let _tags = backend
        .mock("GET", "/api/tags")
        .with_header("content-type", "application/json")
        .with_body(r#"{"models":[{"name":"llama3.2:latest","size":2019393189}]}"#)
        .create_async()
        .await;
    let reply = json!({
        "model": "llama3.2:latest",
        "created_at": "2024-10-01T12:00:00Z",
        "message": {"role": "assistant", "content": "Hi there"},
        "done": true
    });
    let chat = backend
        .mock("POST", "/api/chat")
        .match_body(Matcher::PartialJson(json!({"model": "llama3.2:latest"})))
        .with_header("content-type", "application/json")
        .with_body(reply.to_string())
        .expect(1)
        .create_async()
        .await;

    let api = spawn_api(ollama_at(&backend.url())).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/chat", api.base))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}], "stream": false}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, reply);
    chat.assert_async().await;
}

#[tokio::test]
async fn test_sse_stream_passes_through() {
    let mut backend = Server::new_async().await;
    let _tags = backend
        .mock("GET", "/api/tags")
        .with_body(r#"{"models":[{"name":"m"}]}"#)
        .create_async()
        .await;
    let stream_body = "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[]}\n\ndata: [DONE]\n\n";
    let _chat = backend
        .mock("POST", "/v1/chat/completions")
        .with_header("content-type", "text/event-stream")
        .with_body(stream_body)
        .create_async()
        .await;

    let api = spawn_api(ollama_at(&backend.url())).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", api.base))
        .json(&json!({"model": "m", "messages": [], "stream": true}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .starts_with("text/event-stream"));
    assert_eq!(resp.text().await.unwrap(), stream_body);
}

#[tokio::test]
async fn test_dispatch_errors_map_to_status() {
    let mut backend = Server::new_async().await;
    let _show = backend.mock("POST", Matcher::Any).expect(0).create_async().await;

    let settings = MemorySettings::new();
    settings.set(ACTIVE_BACKEND_KEY, "vllm");
    settings.set(VLLM_BASE_URL_KEY, &backend.url());
    let api = spawn_api(settings).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/show", api.base))
        .json(&json!({"name": "m"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNSUPPORTED_REQUEST_TYPE");
}

#[tokio::test]
async fn test_backend_unavailable_on_chat() {
    let mut backend = Server::new_async().await;
    let _tags = backend.mock("GET", "/api/tags").with_status(503).create_async().await;
    let _chat = backend
        .mock("POST", "/api/chat")
        .with_status(503)
        .with_body("busy")
        .create_async()
        .await;

    let api = spawn_api(ollama_at(&backend.url())).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/chat", api.base))
        .json(&json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BACKEND_UNAVAILABLE");
}

#[tokio::test]
async fn test_openai_model_listing() {
    let mut backend = Server::new_async().await;
    let _tags = backend
        .mock("GET", "/api/tags")
        .with_body(r#"{"models":[{"name":"llama3.2:latest"},{"name":"qwen2.5:7b"}]}"#)
        .create_async()
        .await;

    let api = spawn_api(ollama_at(&backend.url())).await;
    let body: Value = reqwest::get(format!("{}/v1/models", api.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][1]["id"], "qwen2.5:7b");
    assert_eq!(body["data"][0]["owned_by"], "ollama");
}

#[tokio::test]
async fn test_health_reports_backend() {
    let mut backend = Server::new_async().await;
    let _version = backend
        .mock("GET", "/api/version")
        .with_body(r#"{"version":"0.5.1"}"#)
        .create_async()
        .await;

    let api = spawn_api(ollama_at(&backend.url())).await;
    let resp = reqwest::get(format!("{}/health", api.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["healthy"], true);
    assert_eq!(body["backend"], "ollama");
}

#[tokio::test]
async fn test_tunnel_ingress_emits_event() {
    let mut api = spawn_api(MemorySettings::new()).await;
    let envelope = json!({
        "to": "did:sight:hoster:me",
        "payload": {
            "type": "completion_request",
            "from": "gateway",
            "to": "did:sight:hoster:me",
            "payload": {
                "taskId": "task-42",
                "requestParams": {"prompt": "hello"},
                "isStream": true
            }
        }
    });

    let resp = reqwest::Client::new()
        .post(format!("{}/tunnel/message", api.base))
        .json(&envelope)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let event = api.events.recv().await.unwrap();
    assert_eq!(event.flavor(), TaskFlavor::Completion);
    assert_eq!(event.request().task_id, "task-42");
    assert!(event.request().from_device_id.is_gateway());
    assert!(event.request().is_stream);
}

#[tokio::test]
async fn test_tunnel_ingress_rejects_garbage() {
    let api = spawn_api(MemorySettings::new()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/tunnel/message", api.base))
        .json(&json!({"to": "gateway", "payload": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "TRANSPORT_DECODE_ERROR");
}

#[tokio::test]
async fn test_publish_without_transport() {
    let api = spawn_api(MemorySettings::new()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/tunnel/publish", api.base))
        .json(&json!({"type": "chat_request", "from": "gateway", "to": "did:sight:hoster:x", "payload": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn test_metrics_exported() {
    sight_hoster_node::metrics::init_metrics();
    let api = spawn_api(MemorySettings::new()).await;
    let text = reqwest::get(format!("{}/metrics", api.base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("tunnel_tasks_in_flight"));
}
