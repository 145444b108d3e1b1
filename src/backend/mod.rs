//! Backend clients: one adapter per inference-server wire protocol.

pub mod format;
pub mod http;
pub mod ollama;
pub mod vllm;

use crate::context::RequestKind;
use crate::error::Result;
use crate::sink::ResponseSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub use ollama::OllamaClient;
pub use vllm::VllmClient;

/// Deadline for health probes. Ordinary dispatches carry no timeout.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Serves both its native `/api/*` format and OpenAI-compatible `/v1/*`.
    Ollama,
    /// OpenAI-compatible only.
    Vllm,
}

impl BackendKind {
    /// Unknown or missing names fall back to Ollama.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "vllm" => BackendKind::Vllm,
            _ => BackendKind::Ollama,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::Vllm => "vllm",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<ModelSummary>,
}

impl ModelList {
    pub fn contains(&self, name: &str) -> bool {
        self.models.iter().any(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// Backend-specific detail document, passed through as returned.
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub backend: BackendKind,
}

/// Common contract implemented by every backend adapter.
///
/// `chat` and `complete` write their result into the sink (streamed or whole);
/// the remaining calls return typed values.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn base_url(&self) -> &str;

    /// Whether this backend has an endpoint for the given request kind.
    fn supports(&self, kind: RequestKind) -> bool;

    async fn chat(
        &self,
        args: &Value,
        sink: &mut dyn ResponseSink,
        path_hint: Option<&str>,
    ) -> Result<()>;

    async fn complete(
        &self,
        args: &Value,
        sink: &mut dyn ResponseSink,
        path_hint: Option<&str>,
    ) -> Result<()>;

    async fn check_status(&self) -> bool;

    async fn list_models(&self) -> Result<ModelList>;

    async fn get_model_info(&self, name: &str) -> Result<ModelInfo>;

    async fn generate_embeddings(&self, args: &Value) -> Result<Value>;

    async fn get_version(&self) -> Result<VersionInfo>;
}
