use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tl_core::config::ReconcileConfig;
use tl_core::types::{InFlight, MessageLog, Task, TaskStatus};

use crate::accumulator::{self, AccumulateOptions, AccumulateOutcome};
use crate::classifier::{classify, InboundMessage};
use crate::finalizer::finalize;
use crate::protocol::{InboundEvent, StatusPayload, Topic, UpdatePayload};
use crate::status::{self, StatusOutcome};

/// Why an event left the view untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Payload did not match the shape its topic requires.
    MalformedPayload,
    /// Update message failed classification.
    InvalidMessage,
    /// Event addressed to another task.
    OtherTask,
    UnknownStatus(String),
    UnknownTopic,
    /// Completion for a stream that is not in flight.
    UnknownStream(String),
    /// Chunk rejected by the ordering or capacity rules.
    ChunkDropped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Complete message appended directly.
    Appended,
    Accumulated { stream_id: String },
    Finalized { stream_id: String },
    StatusChanged(TaskStatus),
    Ignored(IgnoreReason),
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, ApplyOutcome::Ignored(_))
    }
}

/// Point-in-time copy of a view, cheap to clone (containers are shared).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task: Task,
    pub in_flight: InFlight,
}

/// Reconciled state of one observed task.
///
/// Owns the task (with its finalized message list) and the in-flight stream
/// map. Every change replaces the affected container with a new `Arc`, so a
/// caller holding an old snapshot can compare with [`Arc::ptr_eq`].
#[derive(Debug, Clone)]
pub struct TaskView {
    task: Task,
    in_flight: InFlight,
    options: AccumulateOptions,
}

impl TaskView {
    pub fn new(task: Task) -> Self {
        Self::with_options(task, AccumulateOptions::default())
    }

    pub fn with_options(task: Task, options: AccumulateOptions) -> Self {
        Self {
            task,
            in_flight: accumulator::empty(),
            options,
        }
    }

    pub fn from_config(task: Task, cfg: &ReconcileConfig) -> Self {
        Self::with_options(
            task,
            AccumulateOptions {
                ordering: cfg.chunk_ordering,
                max_in_flight: cfg.max_in_flight,
            },
        )
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn messages(&self) -> &MessageLog {
        &self.task.messages
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task: self.task.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Route one inbound event by topic.
    pub fn apply(&mut self, event: &InboundEvent) -> ApplyOutcome {
        let outcome = match event.topic {
            Topic::Status => match event.status_payload() {
                Some(payload) => self.apply_status(&payload),
                None => ApplyOutcome::Ignored(IgnoreReason::MalformedPayload),
            },
            Topic::Update => match event.update_payload() {
                Some(payload) => self.apply_update(&payload),
                None => ApplyOutcome::Ignored(IgnoreReason::MalformedPayload),
            },
            Topic::Unknown => ApplyOutcome::Ignored(IgnoreReason::UnknownTopic),
        };
        tracing::trace!(task_id = %self.task.id, ?outcome, "event applied");
        outcome
    }

    pub fn apply_status(&mut self, payload: &StatusPayload) -> ApplyOutcome {
        match status::reconcile(&self.task, payload, Utc::now()) {
            StatusOutcome::Applied(task) => {
                let status = task.status;
                self.task = task;
                ApplyOutcome::StatusChanged(status)
            }
            StatusOutcome::OtherTask => ApplyOutcome::Ignored(IgnoreReason::OtherTask),
            StatusOutcome::Unknown(s) => ApplyOutcome::Ignored(IgnoreReason::UnknownStatus(s)),
        }
    }

    /// Classify the update's message and fold it in. Updates tagged with a
    /// different task id are ignored; untagged ones are accepted.
    pub fn apply_update(&mut self, payload: &UpdatePayload) -> ApplyOutcome {
        if payload.task_id.as_deref().is_some_and(|id| id != self.task.id) {
            return ApplyOutcome::Ignored(IgnoreReason::OtherTask);
        }
        self.apply_message(classify(&payload.message))
    }

    /// Fold an already classified message into the view.
    pub fn apply_message(&mut self, message: InboundMessage) -> ApplyOutcome {
        match message {
            InboundMessage::Regular(msg) => {
                let mut next = Vec::with_capacity(self.task.messages.len() + 1);
                next.extend(self.task.messages.iter().cloned());
                next.push(msg);
                self.task.messages = Arc::new(next);
                self.task.updated_at = Utc::now();
                ApplyOutcome::Appended
            }
            InboundMessage::StreamingChunk(chunk) => {
                let Some(stream_id) = chunk.data.stream_id.clone() else {
                    return ApplyOutcome::Ignored(IgnoreReason::InvalidMessage);
                };
                let (next, outcome) =
                    accumulator::accumulate_with(&self.in_flight, &stream_id, chunk, self.options);
                match outcome {
                    AccumulateOutcome::Started | AccumulateOutcome::Appended => {
                        self.in_flight = next;
                        ApplyOutcome::Accumulated { stream_id }
                    }
                    AccumulateOutcome::Stale | AccumulateOutcome::AtCapacity => {
                        ApplyOutcome::Ignored(IgnoreReason::ChunkDropped(stream_id))
                    }
                }
            }
            InboundMessage::StreamComplete(completion) => {
                let Some(stream_id) = completion.data.stream_id.clone() else {
                    return ApplyOutcome::Ignored(IgnoreReason::InvalidMessage);
                };
                let out = finalize(&stream_id, &completion, &self.in_flight, &self.task.messages);
                if !out.appended {
                    return ApplyOutcome::Ignored(IgnoreReason::UnknownStream(stream_id));
                }
                self.in_flight = out.in_flight;
                self.task.messages = out.messages;
                self.task.updated_at = Utc::now();
                tracing::debug!(task_id = %self.task.id, %stream_id, "stream finalized");
                ApplyOutcome::Finalized { stream_id }
            }
            InboundMessage::Invalid => ApplyOutcome::Ignored(IgnoreReason::InvalidMessage),
        }
    }

    /// Drop every open stream, as on unmount.
    pub fn discard_in_flight(&mut self) -> usize {
        let dropped = self.in_flight.len();
        if dropped > 0 {
            self.in_flight = accumulator::empty();
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view() -> TaskView {
        TaskView::new(Task::with_id("t1", "Demo"))
    }

    #[test]
    fn regular_message_appended() {
        let mut v = view();
        let event = InboundEvent::update(
            "task-t1",
            "t1",
            json!({ "role": "user", "type": "text", "data": { "text": "hi" } }),
        );
        assert_eq!(v.apply(&event), ApplyOutcome::Appended);
        assert_eq!(v.messages().len(), 1);
    }

    #[test]
    fn update_for_other_task_ignored() {
        let mut v = view();
        let event = InboundEvent::update(
            "task-t2",
            "t2",
            json!({ "role": "user", "type": "text", "data": { "text": "hi" } }),
        );
        assert_eq!(v.apply(&event), ApplyOutcome::Ignored(IgnoreReason::OtherTask));
        assert!(v.messages().is_empty());
    }

    #[test]
    fn malformed_status_payload_ignored() {
        let mut v = view();
        let event = InboundEvent {
            channel: "task-t1".into(),
            topic: Topic::Status,
            data: json!({ "state": "PAUSED" }),
        };
        assert_eq!(
            v.apply(&event),
            ApplyOutcome::Ignored(IgnoreReason::MalformedPayload)
        );
        assert_eq!(v.task().status, TaskStatus::InProgress);
    }

    #[test]
    fn unknown_topic_ignored() {
        let event: InboundEvent =
            serde_json::from_value(json!({ "channel": "c", "topic": "presence", "data": {} }))
                .unwrap();
        assert_eq!(event.topic, Topic::Unknown);
        assert_eq!(
            view().apply(&event),
            ApplyOutcome::Ignored(IgnoreReason::UnknownTopic)
        );
    }

    #[test]
    fn discard_drops_open_streams() {
        let mut v = view();
        let event = InboundEvent::update(
            "task-t1",
            "t1",
            json!({ "role": "assistant", "type": "text",
                    "data": { "text": "x", "streamId": "s1", "isStreaming": true } }),
        );
        v.apply(&event);
        assert_eq!(v.discard_in_flight(), 1);
        assert!(v.in_flight().is_empty());
    }
}
