//! Tunnel bridge: runs inference requests that arrived over the overlay and
//! sends the results back the same way.
//!
//! The bridge is the error boundary for network-originated work. Whatever
//! happens during a dispatch, the requesting peer receives either a response
//! (single message or stream ending in one terminal chunk) or an
//! `error_response` carrying the task id and a message.

pub mod sink;
pub mod stream;

use crate::context::RequestKind;
use crate::error::Result;
use crate::identity::PeerIdentity;
use crate::metrics;
use crate::protocol::{InferenceEvent, TaskFlavor, TunnelMessage};
use crate::selector::BackendSelector;
use crate::sink::ResponseSink;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use sink::TunnelSink;

/// Anything that can put a tunnel message on the overlay.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Identity stamped into `from` of outgoing messages.
    fn local_id(&self) -> &PeerIdentity;

    async fn publish(&self, message: &TunnelMessage) -> Result<()>;
}

pub struct TunnelBridge {
    selector: Arc<BackendSelector>,
    publisher: Arc<dyn MessagePublisher>,
}

impl TunnelBridge {
    pub fn new(selector: Arc<BackendSelector>, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self {
            selector,
            publisher,
        }
    }

    /// Consume events until the channel closes, one task per event.
    pub fn spawn_event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<InferenceEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let bridge = Arc::clone(&self);
                tokio::spawn(async move {
                    bridge.handle_event(event).await;
                });
            }
            info!("Tunnel event channel closed");
        })
    }

    /// Execute one inference request and publish its result. Never fails:
    /// errors are reported to the requesting peer instead.
    pub async fn handle_event(&self, event: InferenceEvent) {
        let flavor = event.flavor();
        let request = event.request().clone();
        let timer = metrics::Timer::new();
        metrics::TUNNEL_TASKS_IN_FLIGHT.inc();

        info!(
            task_id = %request.task_id,
            from = %request.from_device_id,
            stream = request.is_stream,
            "Tunnel {} request received",
            match flavor {
                TaskFlavor::Chat => "chat",
                TaskFlavor::Completion => "completion",
            }
        );

        let mut sink = TunnelSink::new(
            self.publisher.clone(),
            request.task_id.clone(),
            request.from_device_id.clone(),
            flavor,
        )
        .with_model_hint(
            request
                .request_params
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string),
        );

        let result = self.run(flavor, &request.request_params, request.path.as_deref(), request.is_stream, &mut sink).await;

        let result = match result {
            // Streams must always end with a terminal chunk, even if the
            // backend stopped without [DONE] or never called end().
            Ok(()) if !sink.is_finished() => sink.end(None).await,
            other => other,
        };

        if let Err(e) = result {
            warn!(task_id = %request.task_id, code = e.code(), "Tunnel task failed: {}", e);
            let message = TunnelMessage::error_response(
                self.publisher.local_id().clone(),
                request.from_device_id.clone(),
                &request.task_id,
                &e.to_string(),
            );
            match self.publisher.publish(&message).await {
                Ok(()) => {
                    metrics::TUNNEL_MESSAGES_SENT
                        .with_label_values(&[message.message_type.as_str()])
                        .inc();
                }
                Err(publish_err) => error!(
                    task_id = %request.task_id,
                    "Could not deliver error_response: {}",
                    publish_err
                ),
            }
        }

        metrics::TUNNEL_TASKS_IN_FLIGHT.dec();
        timer.observe_duration_seconds(&metrics::TUNNEL_TASK_LATENCY);
        debug!(task_id = %request.task_id, "Tunnel task finished");
    }

    async fn run(
        &self,
        flavor: TaskFlavor,
        params: &Value,
        path: Option<&str>,
        is_stream: bool,
        sink: &mut dyn ResponseSink,
    ) -> Result<()> {
        let mut args = match params {
            Value::Object(_) => params.clone(),
            Value::Null => Value::Object(Default::default()),
            other => {
                return Err(crate::error::HosterError::InvalidRequest(format!(
                    "requestParams must be an object, got {}",
                    other
                )))
            }
        };
        if let Some(obj) = args.as_object_mut() {
            obj.insert("stream".to_string(), Value::Bool(is_stream));
        }

        // Streamed chunks travel in the OpenAI dialect; only single-shot
        // responses may use a backend's native format.
        let path = match path {
            Some(p) if !is_stream || p.contains("/v1/") => p,
            Some(p) => {
                debug!("Streaming request for native path {} rerouted to OpenAI dialect", p);
                flavor.default_path()
            }
            None => flavor.default_path(),
        };

        let kind = match flavor {
            TaskFlavor::Chat => RequestKind::Chat,
            TaskFlavor::Completion => RequestKind::Completion,
        };
        self.selector.dispatch(kind, args, Some(path), sink).await?;
        Ok(())
    }
}
