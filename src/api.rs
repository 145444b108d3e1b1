//! Local HTTP API: the backend surface served directly, plus the tunnel
//! ingress the relay forwards into.

use crate::bridge::MessagePublisher;
use crate::context::RequestKind;
use crate::dispatcher::DispatchOutcome;
use crate::error::HosterError;
use crate::metrics;
use crate::protocol::{InferenceEvent, RelayEnvelope, TunnelMessage};
use crate::selector::BackendSelector;
use crate::sink::{BufferedSink, ChannelSink, ResponseSink};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const STREAM_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub selector: Arc<BackendSelector>,
    /// Inference events decoded from the tunnel ingress.
    pub events: mpsc::UnboundedSender<InferenceEvent>,
    /// Overlay publisher, absent when the node runs without a transport.
    pub publisher: Option<Arc<dyn MessagePublisher>>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_native))
        .route("/v1/chat/completions", post(chat_openai))
        .route("/api/generate", post(completion_native))
        .route("/v1/completions", post(completion_openai))
        .route("/api/tags", get(list_models_native))
        .route("/v1/models", get(list_models_openai))
        .route("/api/show", post(show_model))
        .route("/api/embeddings", post(embeddings))
        .route("/v1/embeddings", post(embeddings))
        .route("/api/version", get(version))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/tunnel/message", post(tunnel_message))
        .route("/tunnel/publish", post(tunnel_publish))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_body(err: &HosterError) -> Value {
    json!({ "error": { "code": err.code(), "message": err.to_string() } })
}

fn error_response(err: &HosterError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_body(err))).into_response()
}

async fn chat_native(state: State<AppState>, body: Json<Value>) -> Response {
    proxy(state, RequestKind::Chat, "/api/chat", body).await
}

async fn chat_openai(state: State<AppState>, body: Json<Value>) -> Response {
    proxy(state, RequestKind::Chat, "/v1/chat/completions", body).await
}

async fn completion_native(state: State<AppState>, body: Json<Value>) -> Response {
    proxy(state, RequestKind::Completion, "/api/generate", body).await
}

async fn completion_openai(state: State<AppState>, body: Json<Value>) -> Response {
    proxy(state, RequestKind::Completion, "/v1/completions", body).await
}

/// Chat and completion: the backend response is streamed through as produced.
async fn proxy(
    State(state): State<AppState>,
    kind: RequestKind,
    path: &'static str,
    Json(args): Json<Value>,
) -> Response {
    let (mut sink, head_rx, body_rx) = ChannelSink::new(STREAM_BUFFER);
    let selector = state.selector.clone();

    tokio::spawn(async move {
        let timer = metrics::Timer::new();
        let result = selector.dispatch(kind, args, Some(path), &mut sink).await;
        match result {
            Ok(DispatchOutcome::Responded) => {}
            Ok(other) => {
                if let Some(value) = other.into_json() {
                    if let Err(e) = sink.json(value).await {
                        debug!("Client went away before response: {}", e);
                    }
                }
            }
            Err(e) if !sink.head_sent() => {
                warn!(kind = %kind, code = e.code(), "Dispatch failed: {}", e);
                if let Err(send_err) = sink.status(e.http_status()).json(error_body(&e)).await {
                    debug!("Could not deliver error response: {}", send_err);
                }
            }
            Err(e) => {
                // Status already went out; the client sees a truncated body
                warn!(kind = %kind, code = e.code(), "Stream aborted mid-response: {}", e);
                let _ = sink.end(None).await;
            }
        }
        timer.observe_duration_seconds(&metrics::API_REQUEST_LATENCY);
    });

    let head = match head_rx.await {
        Ok(head) => head,
        Err(_) => {
            return error_response(&HosterError::Internal(
                "dispatch ended without a response".to_string(),
            ))
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(head.status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in &head.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from_stream(ReceiverStream::new(body_rx)))
        .unwrap_or_else(|e| error_response(&HosterError::Internal(e.to_string())))
}

/// Value-returning kinds: dispatch, then render the outcome.
async fn dispatch_value(state: &AppState, kind: RequestKind, args: Value) -> Result<DispatchOutcome, Response> {
    let mut sink = BufferedSink::new();
    state
        .selector
        .dispatch(kind, args, None, &mut sink)
        .await
        .map_err(|e| {
            warn!(kind = %kind, code = e.code(), "Dispatch failed: {}", e);
            error_response(&e)
        })
}

async fn list_models_native(State(state): State<AppState>) -> Response {
    match dispatch_value(&state, RequestKind::ModelList, json!({})).await {
        Ok(outcome) => Json(outcome.into_json().unwrap_or_else(|| json!({"models": []}))).into_response(),
        Err(resp) => resp,
    }
}

async fn list_models_openai(State(state): State<AppState>) -> Response {
    match dispatch_value(&state, RequestKind::ModelList, json!({})).await {
        Ok(DispatchOutcome::Models(list)) => {
            let owner = state.selector.current_backend().await.kind.as_str();
            let data: Vec<Value> = list
                .models
                .iter()
                .map(|m| json!({"id": m.name, "object": "model", "owned_by": owner}))
                .collect();
            Json(json!({"object": "list", "data": data})).into_response()
        }
        Ok(_) => Json(json!({"object": "list", "data": []})).into_response(),
        Err(resp) => resp,
    }
}

async fn show_model(State(state): State<AppState>, Json(args): Json<Value>) -> Response {
    render(dispatch_value(&state, RequestKind::ModelInfo, args).await)
}

async fn embeddings(State(state): State<AppState>, Json(args): Json<Value>) -> Response {
    render(dispatch_value(&state, RequestKind::Embeddings, args).await)
}

async fn version(State(state): State<AppState>) -> Response {
    render(dispatch_value(&state, RequestKind::Version, json!({})).await)
}

fn render(result: Result<DispatchOutcome, Response>) -> Response {
    match result {
        Ok(outcome) => match outcome.into_json() {
            Some(value) => Json(value).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
        Err(resp) => resp,
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let backend = state.selector.current_backend().await;
    let healthy = match dispatch_value(&state, RequestKind::HealthCheck, json!({})).await {
        Ok(DispatchOutcome::Health { healthy }) => healthy,
        _ => false,
    };
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "backend": backend.kind.as_str(),
            "baseUrl": backend.base_url,
            "healthy": healthy,
        })),
    )
        .into_response()
}

async fn metrics_handler() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::export_metrics(),
    )
        .into_response()
}

/// Relay ingress: `{to, payload}` where payload is the whole tunnel message.
async fn tunnel_message(State(state): State<AppState>, Json(envelope): Json<RelayEnvelope>) -> Response {
    let message: TunnelMessage = match serde_json::from_value(envelope.payload) {
        Ok(m) => m,
        Err(e) => {
            return error_response(&HosterError::TransportDecode(format!(
                "Relay payload is not a tunnel message: {}",
                e
            )))
        }
    };

    match InferenceEvent::from_message(&message) {
        Ok(Some(event)) => {
            let task_id = event.request().task_id.clone();
            if state.events.send(event).is_err() {
                return error_response(&HosterError::Internal("inference event loop stopped".to_string()));
            }
            info!(task_id = %task_id, to = %envelope.to, "Accepted tunnel request");
            (StatusCode::ACCEPTED, Json(json!({"accepted": true, "taskId": task_id}))).into_response()
        }
        Ok(None) => {
            debug!(message_type = %message.message_type, from = %message.from, "Tunnel message needs no local handling");
            (StatusCode::ACCEPTED, Json(json!({"accepted": false, "type": message.message_type}))).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Inject an addressed message into the overlay.
async fn tunnel_publish(State(state): State<AppState>, Json(message): Json<TunnelMessage>) -> Response {
    let Some(publisher) = state.publisher.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": {"code": "NETWORK_ERROR", "message": "transport not running"}})),
        )
            .into_response();
    };
    match publisher.publish(&message).await {
        Ok(()) => {
            metrics::TUNNEL_MESSAGES_SENT
                .with_label_values(&[message.message_type.as_str()])
                .inc();
            (StatusCode::ACCEPTED, Json(json!({"published": true}))).into_response()
        }
        Err(e) => error_response(&e),
    }
}
