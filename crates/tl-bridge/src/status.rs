use chrono::{DateTime, Utc};
use tl_core::types::{Task, TaskStatus};

use crate::protocol::StatusPayload;

/// What a wire status does to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub target: TaskStatus,
    pub message: &'static str,
    /// Stamp `completed_at` when applied.
    pub completes: bool,
}

impl StatusTransition {
    /// Look up the transition for a wire status. Unknown statuses have none.
    ///
    /// `MERGED` lands on [`TaskStatus::Done`]: a merge is a successful finish
    /// from the task's point of view.
    pub fn from_wire(status: &str) -> Option<Self> {
        let (target, message, completes) = match status {
            "PAUSED" => (TaskStatus::Paused, "Task paused", false),
            "IN_PROGRESS" => (TaskStatus::InProgress, "Task in progress", false),
            "CANCELLED" => (TaskStatus::Cancelled, "Task cancelled", false),
            "DONE" => (TaskStatus::Done, "Task completed", true),
            "MERGED" => (TaskStatus::Done, "Task merged", true),
            _ => return None,
        };
        Some(Self {
            target,
            message,
            completes,
        })
    }

    /// Apply to a copy of `task`. No guard on the current status: the event
    /// source decides, and re-applying the same transition is harmless.
    pub fn apply(&self, task: &Task, now: DateTime<Utc>) -> Task {
        let mut next = task.clone();
        next.status = self.target;
        next.status_message = Some(self.message.to_string());
        next.updated_at = now;
        if self.completes {
            next.completed_at = Some(now);
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    Applied(Task),
    /// Event is for a different task.
    OtherTask,
    /// Status value has no transition; the task is left as it was.
    Unknown(String),
}

/// Reconcile a status event against the observed task.
pub fn reconcile(task: &Task, event: &StatusPayload, now: DateTime<Utc>) -> StatusOutcome {
    if event.task_id != task.id {
        return StatusOutcome::OtherTask;
    }
    match StatusTransition::from_wire(&event.status) {
        Some(transition) => {
            tracing::info!(
                task_id = %task.id,
                from = %task.status,
                to = %transition.target,
                "task status changed"
            );
            StatusOutcome::Applied(transition.apply(task, now))
        }
        None => {
            tracing::warn!(task_id = %task.id, status = %event.status, "unknown task status ignored");
            StatusOutcome::Unknown(event.status.clone())
        }
    }
}
