use super::stream::{terminal_chunk, validate_chunk, SseLineBuffer, StreamLine};
use super::MessagePublisher;
use crate::error::{HosterError, Result};
use crate::identity::PeerIdentity;
use crate::metrics;
use crate::protocol::{message_type, TaskFlavor, TunnelMessage};
use crate::sink::{ResponseSink, StreamChunk};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// A [`ResponseSink`] that turns a backend response into tunnel messages
/// addressed to the requesting peer.
pub struct TunnelSink {
    publisher: Arc<dyn MessagePublisher>,
    task_id: String,
    to: PeerIdentity,
    flavor: TaskFlavor,
    status: u16,
    headers: Vec<(String, String)>,
    lines: SseLineBuffer,
    /// Set once a single-shot response or a terminal stream chunk has gone out.
    finished: bool,
    last_id: Option<String>,
    last_model: Option<String>,
    last_created: Option<i64>,
    model_hint: Option<String>,
    forwarded: usize,
}

impl TunnelSink {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        task_id: impl Into<String>,
        to: PeerIdentity,
        flavor: TaskFlavor,
    ) -> Self {
        Self {
            publisher,
            task_id: task_id.into(),
            to,
            flavor,
            status: 200,
            headers: Vec::new(),
            lines: SseLineBuffer::new(),
            finished: false,
            last_id: None,
            last_model: None,
            last_created: None,
            model_hint: None,
            forwarded: 0,
        }
    }

    /// Model name to put in a synthetic terminal chunk if no chunk carried one.
    pub fn with_model_hint(mut self, model: Option<String>) -> Self {
        self.model_hint = model;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of stream chunks forwarded so far, terminal included.
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    async fn publish(&self, message_type: &str, payload: Value) -> Result<()> {
        let message = TunnelMessage::new(
            message_type,
            self.publisher.local_id().clone(),
            self.to.clone(),
            payload,
        );
        self.publisher.publish(&message).await?;
        metrics::TUNNEL_MESSAGES_SENT.with_label_values(&[message_type]).inc();
        Ok(())
    }

    async fn respond(&mut self, data: Value) -> Result<()> {
        if self.finished {
            debug!(task_id = %self.task_id, "Response already sent; dropping extra body");
            return Ok(());
        }
        self.finished = true;
        if self.status >= 400 {
            let error = data
                .get("error")
                .map(|e| match e {
                    Value::String(s) => s.clone(),
                    other => other
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                })
                .unwrap_or_else(|| format!("Backend responded with status {}", self.status));
            return self
                .publish(
                    message_type::ERROR_RESPONSE,
                    json!({ "taskId": self.task_id, "error": error }),
                )
                .await;
        }
        let response_type = self.flavor.response_type();
        self.publish(response_type, json!({ "taskId": self.task_id, "data": data }))
            .await
    }

    async fn handle_line(&mut self, line: StreamLine) -> Result<()> {
        match line {
            StreamLine::Done => self.emit_terminal().await,
            StreamLine::Malformed { line, reason } => {
                let err = HosterError::MalformedStreamChunk(format!("{} in {:?}", reason, truncate(&line, 120)));
                warn!(task_id = %self.task_id, code = err.code(), "Dropping stream line: {}", err);
                metrics::STREAM_CHUNKS_DROPPED.with_label_values(&["malformed"]).inc();
                Ok(())
            }
            StreamLine::Data(value) => self.forward_chunk(value).await,
        }
    }

    async fn forward_chunk(&mut self, value: Value) -> Result<()> {
        if self.finished {
            debug!(task_id = %self.task_id, "Chunk after stream completion dropped");
            metrics::STREAM_CHUNKS_DROPPED.with_label_values(&["after_done"]).inc();
            return Ok(());
        }
        if let Err(reason) = validate_chunk(&value, self.flavor) {
            let err = HosterError::MalformedStreamChunk(reason);
            warn!(task_id = %self.task_id, code = err.code(), "Dropping stream chunk with unexpected shape: {}", err);
            metrics::STREAM_CHUNKS_DROPPED.with_label_values(&["shape"]).inc();
            return Ok(());
        }

        self.last_id = value.get("id").and_then(Value::as_str).map(str::to_string);
        self.last_model = value.get("model").and_then(Value::as_str).map(str::to_string);
        self.last_created = value.get("created").and_then(Value::as_i64);

        self.publish(
            self.flavor.stream_type(),
            json!({ "taskId": self.task_id, "data": value }),
        )
        .await?;
        self.forwarded += 1;
        Ok(())
    }

    /// Emit the one terminal chunk for this task, if it has not gone out yet.
    async fn emit_terminal(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let id = self.last_id.clone().unwrap_or_else(|| {
            let prefix = match self.flavor {
                TaskFlavor::Chat => "chatcmpl",
                TaskFlavor::Completion => "cmpl",
            };
            format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
        });
        let model = self
            .last_model
            .clone()
            .or_else(|| self.model_hint.clone())
            .unwrap_or_default();
        let created = self.last_created.unwrap_or_else(|| chrono::Utc::now().timestamp());

        let chunk = terminal_chunk(self.flavor, &id, &model, created);
        self.publish(
            self.flavor.stream_type(),
            json!({ "taskId": self.task_id, "data": chunk }),
        )
        .await?;
        self.forwarded += 1;
        debug!(task_id = %self.task_id, chunks = self.forwarded, "Stream completed");
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl ResponseSink for TunnelSink {
    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn status(&mut self, code: u16) -> &mut dyn ResponseSink {
        self.status = code;
        self
    }

    async fn json(&mut self, data: Value) -> Result<()> {
        self.respond(data).await
    }

    async fn write(&mut self, chunk: StreamChunk) -> Result<()> {
        let lines = match chunk {
            // An already-structured chunk is one complete SSE payload
            StreamChunk::Json(value) => vec![StreamLine::Data(value)],
            StreamChunk::Text(text) => self.lines.push(&text),
            StreamChunk::Binary(bytes) => self.lines.push_bytes(&bytes),
        };
        for line in lines {
            self.handle_line(line).await?;
        }
        Ok(())
    }

    async fn end(&mut self, chunk: Option<StreamChunk>) -> Result<()> {
        if let Some(chunk) = chunk {
            self.write(chunk).await?;
        }
        if let Some(line) = self.lines.finish() {
            self.handle_line(line).await?;
        }
        self.emit_terminal().await
    }

    async fn send(&mut self, data: StreamChunk) -> Result<()> {
        let value = match data {
            StreamChunk::Json(v) => v,
            other => {
                let text = other.into_text();
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
        };
        self.respond(value).await
    }
}
