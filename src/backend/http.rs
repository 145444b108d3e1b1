//! HTTP plumbing shared by the backend adapters.

use crate::error::{BackendErrorCode, HosterError, Result};
use crate::sink::{ResponseSink, StreamChunk};
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Thin wrapper over a shared `reqwest::Client` bound to one backend base URL.
#[derive(Clone)]
pub struct BackendHttp {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BackendHttp {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.client.request(method, self.url(path));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn send(&self, req: RequestBuilder, path: &str) -> Result<Response> {
        let url = self.url(path);
        let response = req
            .send()
            .await
            .map_err(|e| HosterError::from_reqwest(&url, e))?;
        ensure_success(response).await
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self.send(self.request(Method::GET, path), path).await?;
        read_json(response).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .send(self.request(Method::POST, path).json(body), path)
            .await?;
        read_json(response).await
    }

    /// GET `path` under the health-check deadline; any failure means unhealthy.
    pub async fn probe(&self, path: &str, timeout: Duration) -> bool {
        match self.request(Method::GET, path).timeout(timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Health probe {} failed: {}", self.url(path), e);
                false
            }
        }
    }

    /// POST `body` to `path` and relay the response into `sink`.
    ///
    /// Streamed responses (SSE or NDJSON) are forwarded chunk by chunk exactly as
    /// the backend produced them; single-shot JSON bodies go out through `json`.
    pub async fn forward(&self, path: &str, body: &Value, sink: &mut dyn ResponseSink) -> Result<()> {
        let req = self.request(Method::POST, path).json(body);
        let response = self.send(req, path).await?;
        let status = response.status().as_u16();

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if is_stream_content_type(&content_type) {
            debug!(url = %self.url(path), content_type = %content_type, "Forwarding streamed backend response");
            sink.set_header("content-type", &content_type);
            sink.set_header("cache-control", "no-cache");
            sink.status(status);

            let url = self.url(path);
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| {
                    warn!("Backend stream from {} broke off: {}", url, e);
                    HosterError::Network(e.to_string())
                })?;
                sink.write(StreamChunk::Binary(chunk)).await?;
            }
            sink.end(None).await
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| HosterError::Network(e.to_string()))?;
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(json) => sink.status(status).json(json).await,
                Err(_) => {
                    if !content_type.is_empty() {
                        sink.set_header("content-type", &content_type);
                    }
                    sink.status(status).send(StreamChunk::Binary(bytes)).await
                }
            }
        }
    }
}

fn is_stream_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/event-stream") || ct.starts_with("application/x-ndjson")
}

/// Turn any non-2xx response into a backend error carrying status, reason and body.
pub async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
    let body = response.text().await.unwrap_or_default();
    Err(HosterError::Backend {
        code: BackendErrorCode::from_status(status.as_u16()),
        status: status.as_u16(),
        reason,
        body,
    })
}

async fn read_json(response: Response) -> Result<Value> {
    response
        .json::<Value>()
        .await
        .map_err(|e| HosterError::Network(format!("Invalid JSON from backend: {}", e)))
}
