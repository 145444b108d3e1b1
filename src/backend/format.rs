//! Wire-format selection for backends that speak more than one dialect.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `/api/chat`, `/api/generate` bodies and NDJSON streams.
    Native,
    /// `/v1/chat/completions`, `/v1/completions` bodies and SSE streams.
    OpenAi,
}

const OPENAI_PATH_MARKER: &str = "/v1/";
const NATIVE_PATH_MARKER: &str = "/api/";

/// Pick the wire format for a request.
///
/// An OpenAI path marker wins over a native one, which wins over body shape.
/// Without any path hint a `messages` array means OpenAI; for completions
/// the caller passes `body_is_openai = false` unless it has other evidence.
pub fn select_format(path_hint: Option<&str>, body_is_openai: bool) -> WireFormat {
    if let Some(path) = path_hint {
        if path.contains(OPENAI_PATH_MARKER) {
            return WireFormat::OpenAi;
        }
        if path.contains(NATIVE_PATH_MARKER) {
            return WireFormat::Native;
        }
    }
    if body_is_openai {
        WireFormat::OpenAi
    } else {
        WireFormat::Native
    }
}

/// Body-shape inference for chat requests.
pub fn chat_body_is_openai(args: &Value) -> bool {
    args.get("messages").map(Value::is_array).unwrap_or(false)
}

/// Native completion bodies carry `prompt` plus Ollama-only fields such as
/// `options`, `system` or `template`; anything else with a `prompt` and an
/// OpenAI-only field (`max_tokens`, `n`, `logprobs`) is treated as OpenAI.
pub fn completion_body_is_openai(args: &Value) -> bool {
    ["max_tokens", "n", "logprobs", "echo", "best_of"]
        .iter()
        .any(|k| args.get(*k).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_marker_beats_everything() {
        assert_eq!(
            select_format(Some("/v1/chat/completions"), false),
            WireFormat::OpenAi
        );
        // Contains both markers: OpenAI still wins
        assert_eq!(select_format(Some("/api/v1/chat"), false), WireFormat::OpenAi);
    }

    #[test]
    fn test_native_marker_beats_body_shape() {
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert_eq!(
            select_format(Some("/api/chat"), chat_body_is_openai(&body)),
            WireFormat::Native
        );
    }

    #[test]
    fn test_body_shape_fallback() {
        let openai = json!({"messages": []});
        let native = json!({"prompt": "hi"});
        assert_eq!(select_format(None, chat_body_is_openai(&openai)), WireFormat::OpenAi);
        assert_eq!(select_format(None, chat_body_is_openai(&native)), WireFormat::Native);
        // A path without either marker falls through to the body
        assert_eq!(
            select_format(Some("/chat"), chat_body_is_openai(&openai)),
            WireFormat::OpenAi
        );
        // messages must be an array
        assert!(!chat_body_is_openai(&json!({"messages": "hi"})));
    }

    #[test]
    fn test_completion_shape() {
        assert!(completion_body_is_openai(&json!({"prompt": "x", "max_tokens": 5})));
        assert!(!completion_body_is_openai(&json!({"prompt": "x", "options": {}})));
    }
}
