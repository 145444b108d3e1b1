use super::format::{chat_body_is_openai, completion_body_is_openai, select_format, WireFormat};
use super::http::BackendHttp;
use super::{
    BackendClient, BackendKind, ModelInfo, ModelList, ModelSummary, VersionInfo,
    HEALTH_CHECK_TIMEOUT,
};
use crate::context::RequestKind;
use crate::error::{HosterError, Result};
use crate::sink::ResponseSink;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const NATIVE_CHAT_PATH: &str = "/api/chat";
const NATIVE_GENERATE_PATH: &str = "/api/generate";
const OPENAI_CHAT_PATH: &str = "/v1/chat/completions";
const OPENAI_COMPLETIONS_PATH: &str = "/v1/completions";

/// Adapter for Ollama, which serves its native `/api/*` format and an
/// OpenAI-compatible `/v1/*` surface side by side.
pub struct OllamaClient {
    http: BackendHttp,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    digest: Option<String>,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http: BackendHttp::new(client, base_url, None),
        }
    }
}

#[async_trait]
impl BackendClient for OllamaClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    fn supports(&self, _kind: RequestKind) -> bool {
        true
    }

    async fn chat(
        &self,
        args: &Value,
        sink: &mut dyn ResponseSink,
        path_hint: Option<&str>,
    ) -> Result<()> {
        let path = match select_format(path_hint, chat_body_is_openai(args)) {
            WireFormat::OpenAi => OPENAI_CHAT_PATH,
            WireFormat::Native => NATIVE_CHAT_PATH,
        };
        debug!(path, model = ?args.get("model"), "Ollama chat");
        self.http.forward(path, args, sink).await
    }

    async fn complete(
        &self,
        args: &Value,
        sink: &mut dyn ResponseSink,
        path_hint: Option<&str>,
    ) -> Result<()> {
        let path = match select_format(path_hint, completion_body_is_openai(args)) {
            WireFormat::OpenAi => OPENAI_COMPLETIONS_PATH,
            WireFormat::Native => NATIVE_GENERATE_PATH,
        };
        debug!(path, model = ?args.get("model"), "Ollama completion");
        self.http.forward(path, args, sink).await
    }

    async fn check_status(&self) -> bool {
        self.http.probe("/api/version", HEALTH_CHECK_TIMEOUT).await
    }

    async fn list_models(&self) -> Result<ModelList> {
        let raw = self.http.get_json("/api/tags").await?;
        let tags: TagsResponse = serde_json::from_value(raw)
            .map_err(|e| HosterError::Network(format!("Unexpected /api/tags payload: {}", e)))?;
        Ok(ModelList {
            models: tags
                .models
                .into_iter()
                .map(|m| ModelSummary {
                    name: m.name,
                    size: m.size,
                    modified_at: m.modified_at,
                    digest: m.digest,
                })
                .collect(),
        })
    }

    async fn get_model_info(&self, name: &str) -> Result<ModelInfo> {
        let details = self.http.post_json("/api/show", &json!({ "name": name })).await?;
        Ok(ModelInfo {
            name: name.to_string(),
            details,
        })
    }

    async fn generate_embeddings(&self, args: &Value) -> Result<Value> {
        self.http.post_json("/api/embeddings", args).await
    }

    async fn get_version(&self) -> Result<VersionInfo> {
        let raw = self.http.get_json("/api/version").await?;
        let version = raw
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok(VersionInfo {
            version,
            backend: BackendKind::Ollama,
        })
    }
}
