use crate::protocol::BridgeMessage;
use crate::transport::{ProxyTransport, Result};

/// Fields for a new task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
}

/// Write-only task controls.
///
/// Each call sends one frame and returns as soon as the transport accepted
/// it. Replies come back later as `status` / `update` events on the task's
/// channel.
pub struct TaskActions<'a> {
    transport: &'a dyn ProxyTransport,
}

impl<'a> TaskActions<'a> {
    pub fn new(transport: &'a dyn ProxyTransport) -> Self {
        Self { transport }
    }

    pub async fn create_task(&self, task: NewTask) -> Result<()> {
        self.send(BridgeMessage::CreateTask {
            title: task.title,
            description: task.description,
            repo_url: task.repo_url,
            branch: task.branch,
        })
        .await
    }

    pub async fn pause(&self, task_id: &str) -> Result<()> {
        self.send(BridgeMessage::PauseTask {
            task_id: task_id.to_string(),
        })
        .await
    }

    pub async fn resume(&self, task_id: &str) -> Result<()> {
        self.send(BridgeMessage::ResumeTask {
            task_id: task_id.to_string(),
        })
        .await
    }

    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        self.send(BridgeMessage::CancelTask {
            task_id: task_id.to_string(),
        })
        .await
    }

    pub async fn create_pull_request(
        &self,
        task_id: &str,
        title: Option<String>,
        body: Option<String>,
    ) -> Result<()> {
        self.send(BridgeMessage::CreatePullRequest {
            task_id: task_id.to_string(),
            title,
            body,
        })
        .await
    }

    async fn send(&self, msg: BridgeMessage) -> Result<()> {
        let kind = msg.kind();
        match self.transport.send(msg).await {
            Ok(()) => {
                tracing::info!(action = kind, transport = %self.transport.kind(), "task action sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(action = kind, error = %e, "task action failed");
                Err(e)
            }
        }
    }
}
