//! Server-sent-event reassembly for tunnelled streams.

use crate::protocol::TaskFlavor;
use serde_json::{json, Value};

/// One complete line recovered from a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamLine {
    Data(Value),
    Done,
    Malformed { line: String, reason: String },
}

/// Splits arbitrarily fragmented bytes into SSE lines.
///
/// Backends flush on their own schedule, so a single `data:` line can arrive
/// split across several writes and one write can carry several lines. Bytes
/// are buffered and only complete lines are decoded, so a multi-byte
/// character split between two writes survives intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every line it completed.
    pub fn push(&mut self, text: &str) -> Vec<StreamLine> {
        self.push_bytes(text.as_bytes())
    }

    /// Append raw bytes and return every line they completed.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<StreamLine> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(idx) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=idx).collect();
            if let Some(parsed) = parse_line(&String::from_utf8_lossy(&line)) {
                lines.push(parsed);
            }
        }
        lines
    }

    /// Treat whatever is left as a final line.
    pub fn finish(&mut self) -> Option<StreamLine> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(&String::from_utf8_lossy(&rest))
    }
}

/// Parse one SSE line. Blank lines, comments and non-data fields yield `None`.
pub fn parse_line(line: &str) -> Option<StreamLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        // event:/id:/retry: fields carry nothing we forward
        None if is_sse_field(trimmed) => return None,
        // bare JSON lines (NDJSON) are accepted as data
        None => trimmed,
    };

    if payload == "[DONE]" {
        return Some(StreamLine::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(v) => Some(StreamLine::Data(v)),
        Err(e) => Some(StreamLine::Malformed {
            line: payload.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"].iter().any(|f| line.starts_with(f))
}

/// Check the minimal OpenAI chunk shape for `flavor`.
pub fn validate_chunk(value: &Value, flavor: TaskFlavor) -> Result<(), String> {
    let obj = value.as_object().ok_or_else(|| "chunk is not a JSON object".to_string())?;

    if !obj.get("id").map(Value::is_string).unwrap_or(false) {
        return Err("missing string `id`".to_string());
    }
    match obj.get("object").and_then(Value::as_str) {
        Some(o) if o == flavor.chunk_object() => {}
        Some(o) => return Err(format!("`object` is {:?}, expected {:?}", o, flavor.chunk_object())),
        None => return Err("missing string `object`".to_string()),
    }
    if !obj.get("created").map(Value::is_number).unwrap_or(false) {
        return Err("missing numeric `created`".to_string());
    }
    if !obj.get("model").map(Value::is_string).unwrap_or(false) {
        return Err("missing string `model`".to_string());
    }
    if !obj.get("choices").map(Value::is_array).unwrap_or(false) {
        return Err("missing array `choices`".to_string());
    }
    Ok(())
}

/// Synthetic final chunk: empty content with a stop marker.
pub fn terminal_chunk(flavor: TaskFlavor, id: &str, model: &str, created: i64) -> Value {
    match flavor {
        TaskFlavor::Chat => json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": "stop"
            }]
        }),
        TaskFlavor::Completion => json!({
            "id": id,
            "object": "text_completion",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "text": "",
                "logprobs": null,
                "finish_reason": "stop"
            }]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_chunk(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "created": 1700000000,
            "model": "llama3.2:latest",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        })
    }

    #[test]
    fn test_lines_split_across_writes() {
        let mut buf = SseLineBuffer::new();
        let line = format!("data: {}\n\n", chat_chunk("hel"));
        let (a, b) = line.split_at(10);
        assert!(buf.push(a).is_empty());
        let lines = buf.push(b);
        assert_eq!(lines, vec![StreamLine::Data(chat_chunk("hel"))]);
    }

    #[test]
    fn test_multibyte_char_split_across_writes() {
        let mut buf = SseLineBuffer::new();
        let line = format!("data: {}\n", chat_chunk("🦀 crab"));
        let bytes = line.as_bytes();
        let crab = line.find('🦀').unwrap();
        // Split inside the 4-byte sequence
        let (a, b) = bytes.split_at(crab + 2);
        assert!(buf.push_bytes(a).is_empty());
        let lines = buf.push_bytes(b);
        assert_eq!(lines, vec![StreamLine::Data(chat_chunk("🦀 crab"))]);
    }

    #[test]
    fn test_multiple_lines_in_one_write() {
        let mut buf = SseLineBuffer::new();
        let text = format!(
            "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
            chat_chunk("a"),
            chat_chunk("b")
        );
        let lines = buf.push(&text);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], StreamLine::Done);
    }

    #[test]
    fn test_comments_and_fields_ignored() {
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(parse_line("event: message"), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("data:[DONE]"), Some(StreamLine::Done));
    }

    #[test]
    fn test_malformed_line() {
        match parse_line("data: {not json") {
            Some(StreamLine::Malformed { line, .. }) => assert_eq!(line, "{not json"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push("data: [DONE]").is_empty());
        assert_eq!(buf.finish(), Some(StreamLine::Done));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_validate_chunk() {
        assert!(validate_chunk(&chat_chunk("x"), TaskFlavor::Chat).is_ok());
        assert!(validate_chunk(&chat_chunk("x"), TaskFlavor::Completion).is_err());

        let mut missing_created = chat_chunk("x");
        missing_created.as_object_mut().unwrap().remove("created");
        assert!(validate_chunk(&missing_created, TaskFlavor::Chat).is_err());

        // Ollama native chunks do not pass
        let native = json!({"model": "m", "message": {"content": "x"}, "done": false});
        assert!(validate_chunk(&native, TaskFlavor::Chat).is_err());
    }

    #[test]
    fn test_terminal_chunks_validate() {
        let chat = terminal_chunk(TaskFlavor::Chat, "chatcmpl-1", "m", 1);
        assert!(validate_chunk(&chat, TaskFlavor::Chat).is_ok());
        assert_eq!(chat["choices"][0]["finish_reason"], "stop");

        let completion = terminal_chunk(TaskFlavor::Completion, "cmpl-1", "m", 1);
        assert!(validate_chunk(&completion, TaskFlavor::Completion).is_ok());
        assert_eq!(completion["choices"][0]["text"], "");
    }
}
