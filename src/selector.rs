//! Picks the active backend per call and resolves model names against it.

use crate::backend::{BackendClient, BackendKind, ModelList, OllamaClient, VllmClient};
use crate::config::BackendConfig;
use crate::context::{RequestContext, RequestKind};
use crate::dispatcher::{DispatchOutcome, RequestDispatcher};
use crate::error::{HosterError, Result};
use crate::settings::{SettingsStore, ACTIVE_BACKEND_KEY, OLLAMA_BASE_URL_KEY, VLLM_BASE_URL_KEY};
use crate::sink::ResponseSink;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The backend in effect for one call.
#[derive(Clone)]
pub struct ActiveBackend {
    pub kind: BackendKind,
    pub base_url: String,
    pub client: Arc<dyn BackendClient>,
    pub dispatcher: RequestDispatcher,
}

/// What models a backend currently has, and which one to use by default.
#[derive(Debug, Clone, Default)]
pub struct ModelDirectorySnapshot {
    pub models: ModelList,
    pub default_model: Option<String>,
}

#[async_trait]
pub trait ModelDirectory: Send + Sync {
    async fn snapshot(&self, client: &dyn BackendClient) -> Result<ModelDirectorySnapshot>;
}

/// Asks the backend itself; the first model it reports is the default.
pub struct LiveModelDirectory;

#[async_trait]
impl ModelDirectory for LiveModelDirectory {
    async fn snapshot(&self, client: &dyn BackendClient) -> Result<ModelDirectorySnapshot> {
        let models = client.list_models().await?;
        let default_model = models.models.first().map(|m| m.name.clone());
        Ok(ModelDirectorySnapshot {
            models,
            default_model,
        })
    }
}

/// A fixed model set, independent of what the backend reports.
pub struct StaticModelDirectory {
    snapshot: ModelDirectorySnapshot,
}

impl StaticModelDirectory {
    pub fn new(models: &[&str], default_model: &str) -> Self {
        Self {
            snapshot: ModelDirectorySnapshot {
                models: ModelList {
                    models: models
                        .iter()
                        .map(|name| crate::backend::ModelSummary {
                            name: name.to_string(),
                            size: None,
                            modified_at: None,
                            digest: None,
                        })
                        .collect(),
                },
                default_model: Some(default_model.to_string()),
            },
        }
    }
}

#[async_trait]
impl ModelDirectory for StaticModelDirectory {
    async fn snapshot(&self, _client: &dyn BackendClient) -> Result<ModelDirectorySnapshot> {
        Ok(self.snapshot.clone())
    }
}

/// Resolves the active backend from live settings on every call.
///
/// Nothing is cached: switching `model_inference_framework` in the settings
/// store takes effect on the very next request.
pub struct BackendSelector {
    settings: Arc<dyn SettingsStore>,
    backend_config: BackendConfig,
    http: reqwest::Client,
    directory: Arc<dyn ModelDirectory>,
}

impl BackendSelector {
    pub fn new(settings: Arc<dyn SettingsStore>, backend_config: BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| HosterError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            settings,
            backend_config,
            http,
            directory: Arc::new(LiveModelDirectory),
        })
    }

    pub fn with_model_directory(mut self, directory: Arc<dyn ModelDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub async fn current_backend(&self) -> ActiveBackend {
        let kind = BackendKind::from_setting(self.settings.get(ACTIVE_BACKEND_KEY).await.as_deref());

        let client: Arc<dyn BackendClient> = match kind {
            BackendKind::Ollama => {
                let base_url = self
                    .settings
                    .get(OLLAMA_BASE_URL_KEY)
                    .await
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| self.backend_config.ollama_base_url.clone());
                Arc::new(OllamaClient::new(self.http.clone(), base_url))
            }
            BackendKind::Vllm => {
                let base_url = self
                    .settings
                    .get(VLLM_BASE_URL_KEY)
                    .await
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| self.backend_config.vllm_base_url.clone());
                Arc::new(VllmClient::new(
                    self.http.clone(),
                    base_url,
                    self.backend_config.vllm_api_key.clone(),
                ))
            }
        };

        debug!(backend = %kind, base_url = client.base_url(), "Resolved active backend");
        ActiveBackend {
            kind,
            base_url: client.base_url().to_string(),
            dispatcher: RequestDispatcher::new(client.clone()),
            client,
        }
    }

    /// Pick the model to run.
    ///
    /// No model requested means the directory default; a model the directory
    /// does not know is swapped for the default with a warning. If the
    /// directory cannot be read the request goes through as asked.
    pub async fn resolve_model(&self, backend: &ActiveBackend, requested: Option<&str>) -> Option<String> {
        let requested = requested.filter(|m| !m.trim().is_empty());
        let snapshot = match self.directory.snapshot(backend.client.as_ref()).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Model directory unavailable on {}: {}", backend.kind, e);
                return requested.map(str::to_string);
            }
        };

        match requested {
            None => snapshot.default_model,
            Some(name) if snapshot.models.contains(name) => Some(name.to_string()),
            Some(name) => match snapshot.default_model {
                Some(default) => {
                    warn!(
                        "Model {} not found on {}, falling back to default model {}",
                        name, backend.kind, default
                    );
                    Some(default)
                }
                None => Some(name.to_string()),
            },
        }
    }

    /// Build the context for one call against `backend`.
    pub async fn build_context(
        &self,
        backend: &ActiveBackend,
        kind: RequestKind,
        args: Value,
        path_hint: Option<&str>,
    ) -> Result<RequestContext> {
        let mut builder = RequestContext::builder(kind, backend.base_url.clone());

        if matches!(kind, RequestKind::Chat | RequestKind::Completion | RequestKind::Embeddings) {
            let requested = args.get("model").and_then(Value::as_str);
            if let Some(model) = self.resolve_model(backend, requested).await {
                builder = builder.effective_model(model);
            }
        }
        if let Some(path) = path_hint {
            builder = builder.path_hint(path);
        }
        builder.args(args).build()
    }

    /// Resolve the backend, build the context and dispatch, in one go.
    pub async fn dispatch(
        &self,
        kind: RequestKind,
        args: Value,
        path_hint: Option<&str>,
        sink: &mut dyn ResponseSink,
    ) -> Result<DispatchOutcome> {
        let backend = self.current_backend().await;
        if !backend.client.supports(kind) {
            return Err(HosterError::UnsupportedRequestType(format!(
                "{} is not supported by {}",
                kind, backend.kind
            )));
        }
        let ctx = self.build_context(&backend, kind, args, path_hint).await?;
        backend.dispatcher.dispatch(&ctx, sink).await
    }
}
