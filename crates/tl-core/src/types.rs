use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    Paused,
    Cancelled,
    Done,
    Merged,
}

impl TaskStatus {
    /// Returns `true` for states no further work is expected from.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Done | TaskStatus::Merged
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Done => "done",
            TaskStatus::Merged => "merged",
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            TaskStatus::InProgress => "@",
            TaskStatus::Paused => "=",
            TaskStatus::Cancelled => "x",
            TaskStatus::Done => "*",
            TaskStatus::Merged => "+",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parse the wire form. Anything other than `user` / `assistant` is rejected.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Payload of a chat message.
///
/// The well-known keys are lifted into typed fields; every other key is kept
/// verbatim in `extra` so nothing the sender attached is lost on the way into
/// the message list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessageData {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Text content, treating a missing `text` as empty.
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// A finalized chat message. Immutable once it is in a task's message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: MessageData,
}

impl ChatMessage {
    pub fn new(role: Role, message_type: impl Into<String>, data: MessageData) -> Self {
        Self {
            role,
            message_type: message_type.into(),
            data,
        }
    }

    pub fn text(&self) -> &str {
        self.data.text_or_empty()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.data.stream_id.as_deref()
    }
}

/// A message still receiving chunks. Same shape as [`ChatMessage`]; the
/// `data.stream_id` is always set for entries of an [`InFlight`] map.
pub type StreamingMessage = ChatMessage;

/// In-progress streaming messages keyed by stream id.
///
/// Treated as immutable: every change produces a new `Arc`, so observers can
/// detect updates with [`Arc::ptr_eq`]. Keys iterate in sorted order.
pub type InFlight = Arc<BTreeMap<String, StreamingMessage>>;

/// Append-only list of finalized messages, replaced wholesale on change.
pub type MessageLog = Arc<Vec<ChatMessage>>;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub messages: MessageLog,
    pub status: TaskStatus,
    pub status_message: Option<String>,
    pub branch: Option<String>,
    pub session_id: Option<String>,
    pub repo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), title)
    }

    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            messages: Arc::new(Vec::new()),
            status: TaskStatus::InProgress,
            status_message: None,
            branch: None,
            session_id: None,
            repo_url: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}
