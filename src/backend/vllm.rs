use super::http::BackendHttp;
use super::{BackendClient, BackendKind, ModelInfo, ModelList, ModelSummary, VersionInfo, HEALTH_CHECK_TIMEOUT};
use crate::context::RequestKind;
use crate::error::{HosterError, Result};
use crate::sink::ResponseSink;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Adapter for vLLM's OpenAI-compatible server.
///
/// Every body is OpenAI-shaped; path hints are ignored. When an API key is
/// configured it is sent as a bearer token on every call.
pub struct VllmClient {
    http: BackendHttp,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl VllmClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: BackendHttp::new(client, base_url, api_key),
        }
    }
}

#[async_trait]
impl BackendClient for VllmClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Vllm
    }

    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    fn supports(&self, kind: RequestKind) -> bool {
        // vLLM has no per-model detail endpoint
        kind != RequestKind::ModelInfo
    }

    async fn chat(
        &self,
        args: &Value,
        sink: &mut dyn ResponseSink,
        _path_hint: Option<&str>,
    ) -> Result<()> {
        debug!(model = ?args.get("model"), "vLLM chat");
        self.http.forward("/v1/chat/completions", args, sink).await
    }

    async fn complete(
        &self,
        args: &Value,
        sink: &mut dyn ResponseSink,
        _path_hint: Option<&str>,
    ) -> Result<()> {
        debug!(model = ?args.get("model"), "vLLM completion");
        self.http.forward("/v1/completions", args, sink).await
    }

    async fn check_status(&self) -> bool {
        self.http.probe("/health", HEALTH_CHECK_TIMEOUT).await
    }

    async fn list_models(&self) -> Result<ModelList> {
        let raw = self.http.get_json("/v1/models").await?;
        let models: ModelsResponse = serde_json::from_value(raw)
            .map_err(|e| HosterError::Network(format!("Unexpected /v1/models payload: {}", e)))?;
        Ok(ModelList {
            models: models
                .data
                .into_iter()
                .map(|m| ModelSummary {
                    name: m.id,
                    size: None,
                    modified_at: None,
                    digest: None,
                })
                .collect(),
        })
    }

    async fn get_model_info(&self, name: &str) -> Result<ModelInfo> {
        Err(HosterError::UnsupportedRequestType(format!(
            "model_info ({}) is not available on vllm",
            name
        )))
    }

    async fn generate_embeddings(&self, args: &Value) -> Result<Value> {
        self.http.post_json("/v1/embeddings", args).await
    }

    async fn get_version(&self) -> Result<VersionInfo> {
        let raw = self.http.get_json("/version").await?;
        let version = raw
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok(VersionInfo {
            version,
            backend: BackendKind::Vllm,
        })
    }
}
