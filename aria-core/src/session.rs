use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AriaError, ErrorKind};

pub type SessionId = uuid::Uuid;

const MAX_TASK_LEN: usize = 4096;

/// Lifecycle state of a session. Terminal states admit no further mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Running,
    Waiting,
    Done,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Waiting => "WAITING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hard limits enforced at every step boundary.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_steps: u32,
    pub max_cost_usd: f64,
    pub deadline: Option<Duration>,
}

impl Limits {
    pub fn new(max_steps: u32, max_cost_usd: f64) -> Self {
        Self {
            max_steps,
            max_cost_usd,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub session_id: SessionId,
    pub task: String,
    pub provider_override: Option<String>,
    pub model_override: Option<String>,
}

impl SessionRequest {
    pub fn new(task: impl Into<String>) -> Result<Self, AriaError> {
        let task = task.into();
        if task.trim().is_empty() {
            return Err(AriaError::Config("task must not be empty".into()));
        }
        if task.len() > MAX_TASK_LEN {
            return Err(AriaError::Config(format!(
                "task too long ({} > {MAX_TASK_LEN} bytes)",
                task.len()
            )));
        }
        Ok(Self {
            session_id: uuid::Uuid::new_v4(),
            task,
            provider_override: None,
            model_override: None,
        })
    }
}

/// Terminal result of a session, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Completed { answer: String },
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } => 0,
            Self::Failed { kind, .. } => kind.exit_code(),
            Self::Cancelled => ErrorKind::Cancelled.exit_code(),
        }
    }
}

/// Everything the kernel reports when a session finishes.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub state: SessionState,
    pub outcome: Outcome,
    pub steps_taken: u32,
    pub total_cost_usd: f64,
    pub duration_ms: u64,
}

/// Per-session summary persisted to the memory store; drives `audit list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: SessionId,
    pub task: String,
    pub state: SessionState,
    pub total_steps: u32,
    pub total_cost_usd: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_kind: Option<ErrorKind>,
}

impl SessionMeta {
    pub fn started(session_id: SessionId, task: &str) -> Self {
        Self {
            session_id,
            task: task.to_string(),
            state: SessionState::Idle,
            total_steps: 0,
            total_cost_usd: 0.0,
            started_at: Utc::now(),
            finished_at: None,
            error_kind: None,
        }
    }
}
