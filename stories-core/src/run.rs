//! Run lifecycle: classifying run statuses and polling a run until it
//! reaches a point where the client must act.

use crate::gateway::Gateway;
use assistants::{RequiredAction, Run, RunStatus, ToolCall};
use std::time::Duration;
use thiserror::Error;

/// A run status as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Still working; keep polling.
    Pending,
    /// Waiting for the client to execute tool calls.
    NeedsToolOutput,
    /// Finished successfully.
    Completed,
    /// Finished without success. Any status not recognized above lands here.
    Failed,
}

impl From<RunStatus> for RunState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling => RunState::Pending,
            RunStatus::RequiresAction => RunState::NeedsToolOutput,
            RunStatus::Completed => RunState::Completed,
            _ => RunState::Failed,
        }
    }
}

/// Errors from driving a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Run {run_id} {status}: {code}: {message}")]
    Failed {
        run_id: String,
        status: RunStatus,
        code: String,
        message: String,
    },

    #[error("Run {run_id} still {last_status} after {attempts} attempts")]
    Timeout {
        run_id: String,
        attempts: u32,
        last_status: RunStatus,
    },

    #[error("Unsupported required action: {0}")]
    UnsupportedAction(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] assistants::Error),
}

/// How long to keep polling a pending run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total status fetches, including the first.
    pub max_attempts: u32,
    /// Wait between fetches.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(1500),
        }
    }
}

impl PollPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Poll a run until it completes or needs tool output.
///
/// A failed run is reported immediately and never polled again. Transient
/// gateway errors use up an attempt and are retried; any other gateway
/// error is returned as is. Running out of attempts while the run is still
/// pending is a [`RunError::Timeout`].
pub async fn wait_for_run<G: Gateway + ?Sized>(
    gateway: &G,
    thread_id: &str,
    run_id: &str,
    policy: &PollPolicy,
) -> Result<Run, RunError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_status = None;

    for attempt in 1..=max_attempts {
        match gateway.run(thread_id, run_id).await {
            Ok(run) => {
                tracing::debug!(attempt, run_id, status = %run.status, "polled run");
                match RunState::from(run.status) {
                    RunState::Completed | RunState::NeedsToolOutput => return Ok(run),
                    RunState::Failed => return Err(failure(run)),
                    RunState::Pending => last_status = Some(run.status),
                }
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(attempt, run_id, error = %e, "transient error while polling run");
            }
            Err(e) => return Err(e.into()),
        }

        if attempt < max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(RunError::Timeout {
        run_id: run_id.to_string(),
        attempts: max_attempts,
        last_status: last_status.unwrap_or(RunStatus::Unknown),
    })
}

fn failure(run: Run) -> RunError {
    let (code, message) = run
        .last_error
        .map(|e| (e.code, e.message))
        .unwrap_or_default();
    tracing::error!(run_id = %run.id, status = %run.status, %code, %message, "run failed");
    RunError::Failed {
        run_id: run.id,
        status: run.status,
        code,
        message,
    }
}

/// The tool calls a run is waiting on.
///
/// Anything other than a tool-output request is a protocol violation.
pub fn required_tool_calls(run: &Run) -> Result<&[ToolCall], RunError> {
    let action = run
        .required_action
        .as_ref()
        .ok_or_else(|| RunError::UnsupportedAction("none".to_string()))?;
    action
        .tool_calls()
        .ok_or_else(|| RunError::UnsupportedAction(unsupported_kind(action)))
}

fn unsupported_kind(action: &RequiredAction) -> String {
    if action.kind == RequiredAction::SUBMIT_TOOL_OUTPUTS {
        format!("{} without tool calls", action.kind)
    } else {
        action.kind.clone()
    }
}
