use crate::backend::{BackendClient, BackendKind, ModelInfo, ModelList, VersionInfo};
use crate::context::{RequestContext, RequestKind};
use crate::error::{HosterError, Result};
use crate::metrics;
use crate::sink::ResponseSink;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Result of a dispatch. Chat and completion write straight into the sink;
/// the other kinds hand back a value for the caller to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DispatchOutcome {
    Responded,
    Models(ModelList),
    ModelInfo(ModelInfo),
    Embeddings(Value),
    Health { healthy: bool },
    Version(VersionInfo),
}

impl DispatchOutcome {
    /// JSON rendering for outcomes that carry a value.
    pub fn into_json(self) -> Option<Value> {
        match self {
            DispatchOutcome::Responded => None,
            other => serde_json::to_value(other).ok(),
        }
    }
}

/// Routes a [`RequestContext`] to the matching operation on one backend client.
#[derive(Clone)]
pub struct RequestDispatcher {
    client: Arc<dyn BackendClient>,
}

impl RequestDispatcher {
    pub fn new(client: Arc<dyn BackendClient>) -> Self {
        Self { client }
    }

    pub fn backend(&self) -> BackendKind {
        self.client.kind()
    }

    pub fn client(&self) -> &Arc<dyn BackendClient> {
        &self.client
    }

    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        sink: &mut dyn ResponseSink,
    ) -> Result<DispatchOutcome> {
        let result = self.route(ctx, sink).await;
        if let Err(e) = &result {
            metrics::DISPATCH_ERRORS.with_label_values(&[e.code()]).inc();
        }
        result
    }

    async fn route(
        &self,
        ctx: &RequestContext,
        sink: &mut dyn ResponseSink,
    ) -> Result<DispatchOutcome> {
        let kind = ctx.kind();
        if !self.client.supports(kind) {
            return Err(HosterError::UnsupportedRequestType(format!(
                "{} is not supported by {}",
                kind,
                self.client.kind()
            )));
        }

        debug!(kind = %kind, backend = %self.client.kind(), base_url = ctx.base_url(), "Dispatching request");
        metrics::DISPATCHES
            .with_label_values(&[kind.as_str(), self.client.kind().as_str()])
            .inc();

        let outcome = match kind {
            RequestKind::Chat => {
                self.client
                    .chat(&ctx.args_with_model(), sink, ctx.path_hint())
                    .await?;
                DispatchOutcome::Responded
            }
            RequestKind::Completion => {
                self.client
                    .complete(&ctx.args_with_model(), sink, ctx.path_hint())
                    .await?;
                DispatchOutcome::Responded
            }
            RequestKind::Embeddings => {
                DispatchOutcome::Embeddings(self.client.generate_embeddings(&ctx.args_with_model()).await?)
            }
            RequestKind::ModelList => DispatchOutcome::Models(self.client.list_models().await?),
            RequestKind::ModelInfo => {
                let name = ctx.model_name().ok_or_else(|| {
                    HosterError::InvalidRequest("model_info requires a model name".to_string())
                })?;
                DispatchOutcome::ModelInfo(self.client.get_model_info(&name).await?)
            }
            RequestKind::HealthCheck => DispatchOutcome::Health {
                healthy: self.client.check_status().await,
            },
            RequestKind::Version => DispatchOutcome::Version(self.client.get_version().await?),
        };
        Ok(outcome)
    }
}
