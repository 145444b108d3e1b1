//! Messages carried over the tunnel topic.
//!
//! Every message is broadcast to every subscriber; `to` is an
//! application-level address that receivers filter on.

use crate::error::{HosterError, Result};
use crate::identity::PeerIdentity;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub mod message_type {
    pub const CHAT_REQUEST: &str = "chat_request";
    pub const COMPLETION_REQUEST: &str = "completion_request";
    pub const CHAT_RESPONSE: &str = "chat_response";
    pub const CHAT_RESPONSE_STREAM: &str = "chat_response_stream";
    pub const COMPLETION_RESPONSE: &str = "completion_response";
    pub const COMPLETION_RESPONSE_STREAM: &str = "completion_response_stream";
    pub const ERROR_RESPONSE: &str = "error_response";
}

/// The addressed envelope published on the gossip topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub from: PeerIdentity,
    pub to: PeerIdentity,
    #[serde(default)]
    pub payload: Value,
}

impl TunnelMessage {
    pub fn new(message_type: &str, from: PeerIdentity, to: PeerIdentity, payload: Value) -> Self {
        Self {
            message_type: message_type.to_string(),
            from,
            to,
            payload,
        }
    }

    pub fn error_response(from: PeerIdentity, to: PeerIdentity, task_id: &str, error: &str) -> Self {
        Self::new(
            message_type::ERROR_RESPONSE,
            from,
            to,
            json!({ "taskId": task_id, "error": error }),
        )
    }

    pub fn is_stream(&self) -> bool {
        self.message_type.ends_with("_stream")
    }
}

/// Body POSTed to the relay endpoint for a message addressed to this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub to: PeerIdentity,
    pub payload: Value,
}

/// Which response family a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFlavor {
    Chat,
    Completion,
}

impl TaskFlavor {
    pub fn response_type(&self) -> &'static str {
        match self {
            TaskFlavor::Chat => message_type::CHAT_RESPONSE,
            TaskFlavor::Completion => message_type::COMPLETION_RESPONSE,
        }
    }

    pub fn stream_type(&self) -> &'static str {
        match self {
            TaskFlavor::Chat => message_type::CHAT_RESPONSE_STREAM,
            TaskFlavor::Completion => message_type::COMPLETION_RESPONSE_STREAM,
        }
    }

    /// `object` literal every streamed chunk of this flavor must carry.
    pub fn chunk_object(&self) -> &'static str {
        match self {
            TaskFlavor::Chat => "chat.completion.chunk",
            TaskFlavor::Completion => "text_completion",
        }
    }

    /// OpenAI-dialect path used when a request arrives without one.
    pub fn default_path(&self) -> &'static str {
        match self {
            TaskFlavor::Chat => "/v1/chat/completions",
            TaskFlavor::Completion => "/v1/completions",
        }
    }
}

/// An inference request that arrived over the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub task_id: String,
    pub from_device_id: PeerIdentity,
    #[serde(default)]
    pub request_params: Value,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub is_stream: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceEvent {
    ChatRequested(InferenceRequest),
    CompletionRequested(InferenceRequest),
}

impl InferenceEvent {
    pub fn flavor(&self) -> TaskFlavor {
        match self {
            InferenceEvent::ChatRequested(_) => TaskFlavor::Chat,
            InferenceEvent::CompletionRequested(_) => TaskFlavor::Completion,
        }
    }

    pub fn request(&self) -> &InferenceRequest {
        match self {
            InferenceEvent::ChatRequested(r) | InferenceEvent::CompletionRequested(r) => r,
        }
    }

    /// Turn an inbound request message into an event.
    ///
    /// Returns `Ok(None)` for message types that are not inference requests.
    /// `fromDeviceId` is taken from the payload when present, otherwise from
    /// the envelope's `from`.
    pub fn from_message(message: &TunnelMessage) -> Result<Option<Self>> {
        let wrap: fn(InferenceRequest) -> InferenceEvent = match message.message_type.as_str() {
            message_type::CHAT_REQUEST => InferenceEvent::ChatRequested,
            message_type::COMPLETION_REQUEST => InferenceEvent::CompletionRequested,
            _ => return Ok(None),
        };

        let mut payload = message.payload.clone();
        let obj = payload.as_object_mut().ok_or_else(|| {
            HosterError::TransportDecode(format!("{} payload is not an object", message.message_type))
        })?;
        obj.entry("fromDeviceId")
            .or_insert_with(|| Value::String(message.from.to_string()));

        let request: InferenceRequest = serde_json::from_value(payload).map_err(|e| {
            HosterError::TransportDecode(format!("Invalid {} payload: {}", message.message_type, e))
        })?;
        Ok(Some(wrap(request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let msg = TunnelMessage::error_response(
            PeerIdentity::from("did:sight:hoster:abc"),
            PeerIdentity::gateway(),
            "task-1",
            "boom",
        );
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            wire,
            json!({
                "type": "error_response",
                "from": "did:sight:hoster:abc",
                "to": "gateway",
                "payload": {"taskId": "task-1", "error": "boom"}
            })
        );
    }

    #[test]
    fn test_request_message_to_event() {
        let msg = TunnelMessage::new(
            message_type::CHAT_REQUEST,
            PeerIdentity::gateway(),
            PeerIdentity::from("did:sight:hoster:abc"),
            json!({
                "taskId": "t-9",
                "requestParams": {"messages": [{"role": "user", "content": "hi"}]},
                "path": "/v1/chat/completions",
                "isStream": true
            }),
        );
        let event = InferenceEvent::from_message(&msg).unwrap().unwrap();
        assert_eq!(event.flavor(), TaskFlavor::Chat);
        let req = event.request();
        assert_eq!(req.task_id, "t-9");
        assert_eq!(req.from_device_id, PeerIdentity::gateway());
        assert!(req.is_stream);
    }

    #[test]
    fn test_non_request_messages_are_not_events() {
        let msg = TunnelMessage::new(
            message_type::CHAT_RESPONSE,
            PeerIdentity::gateway(),
            PeerIdentity::gateway(),
            json!({}),
        );
        assert!(InferenceEvent::from_message(&msg).unwrap().is_none());
    }

    #[test]
    fn test_bad_request_payload() {
        let msg = TunnelMessage::new(
            message_type::COMPLETION_REQUEST,
            PeerIdentity::gateway(),
            PeerIdentity::gateway(),
            json!("nope"),
        );
        let err = InferenceEvent::from_message(&msg).unwrap_err();
        assert_eq!(err.code(), "TRANSPORT_DECODE_ERROR");
    }
}
