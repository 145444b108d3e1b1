//! The response surface a backend client writes into.
//!
//! Backend clients never talk to a socket directly; they write through a
//! [`ResponseSink`]. The local HTTP API hands them a [`ChannelSink`] feeding an
//! axum body, the tunnel bridge hands them a sink that re-emits everything as
//! overlay messages, and tests use a [`BufferedSink`].

use crate::error::{HosterError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// One fragment handed to a sink, in whichever encoding the writer had at hand.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    Binary(Bytes),
    Json(Value),
}

impl StreamChunk {
    /// Normalize to text. Invalid UTF-8 is replaced rather than rejected.
    pub fn into_text(self) -> String {
        match self {
            StreamChunk::Text(s) => s,
            StreamChunk::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            StreamChunk::Json(v) => v.to_string(),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            StreamChunk::Text(s) => Bytes::from(s),
            StreamChunk::Binary(b) => b,
            StreamChunk::Json(v) => Bytes::from(v.to_string()),
        }
    }
}

impl From<&str> for StreamChunk {
    fn from(value: &str) -> Self {
        StreamChunk::Text(value.to_string())
    }
}

impl From<String> for StreamChunk {
    fn from(value: String) -> Self {
        StreamChunk::Text(value)
    }
}

impl From<Bytes> for StreamChunk {
    fn from(value: Bytes) -> Self {
        StreamChunk::Binary(value)
    }
}

impl From<Value> for StreamChunk {
    fn from(value: Value) -> Self {
        StreamChunk::Json(value)
    }
}

#[async_trait]
pub trait ResponseSink: Send {
    fn set_header(&mut self, name: &str, value: &str);

    /// Set the status for the response that follows; chain with `json`/`send`.
    fn status(&mut self, code: u16) -> &mut dyn ResponseSink;

    /// Send a complete JSON body and finish the response.
    async fn json(&mut self, data: Value) -> Result<()>;

    /// Append one streamed fragment.
    async fn write(&mut self, chunk: StreamChunk) -> Result<()>;

    /// Finish the response, optionally writing a final fragment first.
    async fn end(&mut self, chunk: Option<StreamChunk>) -> Result<()>;

    /// Send a complete body of any encoding and finish the response.
    async fn send(&mut self, data: StreamChunk) -> Result<()>;
}

/// Collects everything in memory.
#[derive(Debug, Default)]
pub struct BufferedSink {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<StreamChunk>,
    pub ended: bool,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        self.chunks
            .iter()
            .cloned()
            .map(StreamChunk::into_text)
            .collect::<String>()
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_str(&self.body_text()).ok()
    }
}

#[async_trait]
impl ResponseSink for BufferedSink {
    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn status(&mut self, code: u16) -> &mut dyn ResponseSink {
        self.status = Some(code);
        self
    }

    async fn json(&mut self, data: Value) -> Result<()> {
        if self.header("content-type").is_none() {
            self.set_header("content-type", "application/json");
        }
        self.chunks.push(StreamChunk::Json(data));
        self.ended = true;
        Ok(())
    }

    async fn write(&mut self, chunk: StreamChunk) -> Result<()> {
        self.chunks.push(chunk);
        Ok(())
    }

    async fn end(&mut self, chunk: Option<StreamChunk>) -> Result<()> {
        if let Some(chunk) = chunk {
            self.chunks.push(chunk);
        }
        self.ended = true;
        Ok(())
    }

    async fn send(&mut self, data: StreamChunk) -> Result<()> {
        self.chunks.push(data);
        self.ended = true;
        Ok(())
    }
}

/// Status line and headers, released to the HTTP layer before the first body byte.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

pub type BodyReceiver = mpsc::Receiver<std::result::Result<Bytes, std::io::Error>>;

/// Streams a response to an HTTP client through channels.
pub struct ChannelSink {
    status: u16,
    headers: Vec<(String, String)>,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: Option<mpsc::Sender<std::result::Result<Bytes, std::io::Error>>>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, oneshot::Receiver<ResponseHead>, BodyReceiver) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(buffer);
        let sink = Self {
            status: 200,
            headers: Vec::new(),
            head_tx: Some(head_tx),
            body_tx: Some(body_tx),
        };
        (sink, head_rx, body_rx)
    }

    /// Whether the status line has already gone out.
    pub fn head_sent(&self) -> bool {
        self.head_tx.is_none()
    }

    fn flush_head(&mut self) {
        if let Some(tx) = self.head_tx.take() {
            let _ = tx.send(ResponseHead {
                status: self.status,
                headers: std::mem::take(&mut self.headers),
            });
        }
    }

    async fn push(&mut self, bytes: Bytes) -> Result<()> {
        self.flush_head();
        match &self.body_tx {
            Some(tx) => tx
                .send(Ok(bytes))
                .await
                .map_err(|_| HosterError::Network("HTTP client went away".to_string())),
            None => Err(HosterError::Internal("write after end".to_string())),
        }
    }

    fn close(&mut self) {
        self.flush_head();
        self.body_tx = None;
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    fn set_header(&mut self, name: &str, value: &str) {
        if self.head_sent() {
            tracing::debug!("Header {} set after response head was sent; ignored", name);
            return;
        }
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn status(&mut self, code: u16) -> &mut dyn ResponseSink {
        self.status = code;
        self
    }

    async fn json(&mut self, data: Value) -> Result<()> {
        if !self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            self.set_header("content-type", "application/json");
        }
        let body = serde_json::to_vec(&data)?;
        self.push(Bytes::from(body)).await?;
        self.close();
        Ok(())
    }

    async fn write(&mut self, chunk: StreamChunk) -> Result<()> {
        self.push(chunk.into_bytes()).await
    }

    async fn end(&mut self, chunk: Option<StreamChunk>) -> Result<()> {
        if let Some(chunk) = chunk {
            self.push(chunk.into_bytes()).await?;
        }
        self.close();
        Ok(())
    }

    async fn send(&mut self, data: StreamChunk) -> Result<()> {
        self.push(data.into_bytes()).await?;
        self.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_normalization() {
        assert_eq!(StreamChunk::from("abc").into_text(), "abc");
        assert_eq!(
            StreamChunk::from(Bytes::from_static(b"data: 1\n")).into_text(),
            "data: 1\n"
        );
        assert_eq!(StreamChunk::from(json!({"a": 1})).into_text(), r#"{"a":1}"#);
        // Invalid UTF-8 is replaced, never an error
        let text = StreamChunk::Binary(Bytes::from_static(&[0xff, b'a'])).into_text();
        assert!(text.ends_with('a'));
    }

    #[tokio::test]
    async fn test_buffered_sink_status_chain() {
        let mut sink = BufferedSink::new();
        sink.status(201).json(json!({"ok": true})).await.unwrap();
        assert_eq!(sink.status_code(), 201);
        assert_eq!(sink.header("Content-Type"), Some("application/json"));
        assert_eq!(sink.body_json(), Some(json!({"ok": true})));
        assert!(sink.ended);
    }

    #[tokio::test]
    async fn test_channel_sink_streams_in_order() {
        let (mut sink, head_rx, mut body_rx) = ChannelSink::new(8);
        sink.set_header("content-type", "text/event-stream");
        sink.write(StreamChunk::from("a")).await.unwrap();
        sink.write(StreamChunk::from(Bytes::from_static(b"b"))).await.unwrap();
        sink.end(Some(StreamChunk::from("c"))).await.unwrap();

        let head = head_rx.await.unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.headers[0].1, "text/event-stream");

        let mut collected = Vec::new();
        while let Some(Ok(bytes)) = body_rx.recv().await {
            collected.extend_from_slice(&bytes);
        }
        assert_eq!(collected, b"abc");
    }

    #[tokio::test]
    async fn test_channel_sink_write_after_end_fails() {
        let (mut sink, _head_rx, _body_rx) = ChannelSink::new(1);
        sink.end(None).await.unwrap();
        tokio_test::assert_err!(sink.write(StreamChunk::from("late")).await);
    }
}
