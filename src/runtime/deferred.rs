//! Deferred work scheduled by the request/response adapter
//!
//! Each task runs independently of the request that scheduled it. Failures
//! are logged here and never reach the request that scheduled the task.

use super::SurveyRuntime;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredTask {
    /// Send the first question of a new conversation
    SendOpening { conversation_id: String },
    /// Process a user message that is already in the transcript
    ProcessTurn {
        conversation_id: String,
        content: String,
    },
    /// Re-send the pending prompt of a resumed conversation
    ResendPrompt { conversation_id: String },
}

impl DeferredTask {
    pub fn kind(&self) -> &'static str {
        match self {
            DeferredTask::SendOpening { .. } => "send_opening",
            DeferredTask::ProcessTurn { .. } => "process_turn",
            DeferredTask::ResendPrompt { .. } => "resend_prompt",
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            DeferredTask::SendOpening { conversation_id }
            | DeferredTask::ProcessTurn {
                conversation_id, ..
            }
            | DeferredTask::ResendPrompt { conversation_id } => conversation_id,
        }
    }
}

/// Runs deferred tasks on the tokio runtime and keeps track of them so
/// shutdown can wait for in-flight work
#[derive(Clone)]
pub struct DeferredQueue {
    runtime: SurveyRuntime,
    tracker: TaskTracker,
}

impl DeferredQueue {
    pub fn new(runtime: SurveyRuntime) -> Self {
        Self {
            runtime,
            tracker: TaskTracker::new(),
        }
    }

    pub fn schedule(&self, task: DeferredTask) {
        tracing::debug!(kind = task.kind(), conv_id = %task.conversation_id(), "Scheduling deferred task");
        let runtime = self.runtime.clone();
        self.tracker.spawn(async move {
            run(&runtime, &task).await;
        });
    }

    /// Number of tasks still running
    #[allow(dead_code)] // Exposed for diagnostics
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every scheduled task has finished. The queue accepts new
    /// work again afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

async fn run(runtime: &SurveyRuntime, task: &DeferredTask) {
    let conv_id = task.conversation_id();
    let result = match task {
        DeferredTask::SendOpening { conversation_id } => {
            runtime.send_opening(conversation_id).await.map(|_| ())
        }
        DeferredTask::ProcessTurn {
            conversation_id,
            content,
        } => runtime
            .process_turn(conversation_id, content)
            .await
            .map(|outcome| {
                if let Some(response) = outcome.survey_response() {
                    tracing::info!(
                        conv_id = %conversation_id,
                        answers = response.answers.len(),
                        "Deferred turn completed the survey"
                    );
                }
            }),
        DeferredTask::ResendPrompt { conversation_id } => {
            runtime.resend_prompt(conversation_id).await.map(|_| ())
        }
    };

    match result {
        Ok(()) => tracing::debug!(kind = task.kind(), conv_id = %conv_id, "Deferred task finished"),
        Err(e) => tracing::error!(
            kind = task.kind(),
            conv_id = %conv_id,
            transient = e.is_transient(),
            error = %e,
            "Deferred task failed"
        ),
    }
}
