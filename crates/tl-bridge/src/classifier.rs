//! Parse step for chat payloads arriving on the `update` topic.
//!
//! Classification is the only place an untyped payload is inspected. Callers
//! get an [`InboundMessage`] back and route on the variant; nothing downstream
//! looks at raw JSON again.

use serde_json::{Map, Value};
use tl_core::types::{ChatMessage, MessageData, Role, StreamingMessage};

/// A classified inbound chat payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A complete message that is not part of any stream.
    Regular(ChatMessage),
    /// One chunk of a message still being streamed.
    StreamingChunk(StreamingMessage),
    /// Closes the stream named by its `data.stream_id`.
    StreamComplete(ChatMessage),
    /// Not a chat message. Callers drop it without further processing.
    Invalid,
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Regular(_) => "regular",
            InboundMessage::StreamingChunk(_) => "streaming_chunk",
            InboundMessage::StreamComplete(_) => "stream_complete",
            InboundMessage::Invalid => "invalid",
        }
    }

    /// Stream id carried by streaming chunks and completions.
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            InboundMessage::StreamingChunk(m) | InboundMessage::StreamComplete(m) => m.stream_id(),
            _ => None,
        }
    }
}

/// Classify an arbitrary decoded payload.
///
/// - valid: `role` is `user`/`assistant`, `type` is a string, `data` is an object
/// - streaming: valid, `data.isStreaming` is exactly `true`, `data.streamId`
///   is a non-empty string
/// - stream-complete: valid, `data.streamId` is a non-empty string, and
///   `data.isStreaming` is absent or `false`
///
/// A stream id without an `isStreaming` flag therefore closes the stream.
pub fn classify(payload: &Value) -> InboundMessage {
    let Some(obj) = payload.as_object() else {
        return InboundMessage::Invalid;
    };
    let Some(role) = obj.get("role").and_then(Value::as_str).and_then(Role::from_wire) else {
        return InboundMessage::Invalid;
    };
    let Some(message_type) = obj.get("type").and_then(Value::as_str) else {
        return InboundMessage::Invalid;
    };
    let Some(raw_data) = obj.get("data").and_then(Value::as_object) else {
        return InboundMessage::Invalid;
    };

    let streaming_flag = raw_data.get("isStreaming");
    let has_stream_id = raw_data
        .get("streamId")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());

    let message = ChatMessage::new(role, message_type, lift_data(raw_data));

    if has_stream_id && streaming_flag == Some(&Value::Bool(true)) {
        InboundMessage::StreamingChunk(message)
    } else if has_stream_id && matches!(streaming_flag, None | Some(Value::Bool(false))) {
        InboundMessage::StreamComplete(message)
    } else {
        InboundMessage::Regular(message)
    }
}

/// Move the well-known keys into typed fields when they have the expected
/// JSON type; everything else (including mistyped known keys) stays in
/// `extra` untouched.
fn lift_data(raw: &Map<String, Value>) -> MessageData {
    let mut data = MessageData::default();
    for (key, value) in raw {
        let lifted = match (key.as_str(), value) {
            ("text", Value::String(s)) => {
                data.text = Some(s.clone());
                true
            }
            ("streamId", Value::String(s)) if !s.is_empty() => {
                data.stream_id = Some(s.clone());
                true
            }
            ("isStreaming", Value::Bool(b)) => {
                data.is_streaming = Some(*b);
                true
            }
            ("chunkIndex", v) if v.is_u64() => {
                data.chunk_index = v.as_u64();
                true
            }
            ("totalChunks", v) if v.is_u64() => {
                data.total_chunks = v.as_u64();
                true
            }
            _ => false,
        };
        if !lifted {
            data.extra.insert(key.clone(), value.clone());
        }
    }
    data
}
