use serde::{Deserialize, Serialize};

/// Sub-channel of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Status,
    Update,
    #[serde(other)]
    Unknown,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Status => "status",
            Topic::Update => "update",
            Topic::Unknown => "unknown",
        }
    }
}

/// An event delivered by the pub/sub source.
///
/// `data` stays untyped until it is routed: the topic decides which payload
/// shape to expect, and the message inside an update is only trusted after
/// classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub channel: String,
    pub topic: Topic,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundEvent {
    pub fn status(channel: impl Into<String>, payload: &StatusPayload) -> Self {
        Self {
            channel: channel.into(),
            topic: Topic::Status,
            data: serde_json::to_value(payload).unwrap_or_default(),
        }
    }

    pub fn update(channel: impl Into<String>, task_id: &str, message: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            topic: Topic::Update,
            data: serde_json::json!({ "taskId": task_id, "message": message }),
        }
    }

    /// Decode the payload of a `status` event. `None` when malformed.
    pub fn status_payload(&self) -> Option<StatusPayload> {
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Decode the payload of an `update` event. `None` when malformed.
    pub fn update_payload(&self) -> Option<UpdatePayload> {
        serde_json::from_value(self.data.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: serde_json::Value,
}

/// Frames exchanged with the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum BridgeMessage {
    // Client -> bridge
    CreateTask {
        title: String,
        description: Option<String>,
        repo_url: Option<String>,
        branch: Option<String>,
    },
    PauseTask { task_id: String },
    ResumeTask { task_id: String },
    CancelTask { task_id: String },
    CreatePullRequest {
        task_id: String,
        title: Option<String>,
        body: Option<String>,
    },

    // Bridge -> client
    Event(InboundEvent),
    Error { code: String, message: String },
}

impl BridgeMessage {
    /// Name of the frame as it appears in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeMessage::CreateTask { .. } => "create_task",
            BridgeMessage::PauseTask { .. } => "pause_task",
            BridgeMessage::ResumeTask { .. } => "resume_task",
            BridgeMessage::CancelTask { .. } => "cancel_task",
            BridgeMessage::CreatePullRequest { .. } => "create_pull_request",
            BridgeMessage::Event(_) => "event",
            BridgeMessage::Error { .. } => "error",
        }
    }
}
