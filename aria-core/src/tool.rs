use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Result of executing a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolOutput {
    Success(serde_json::Value),
    Error(String),
}

impl ToolOutput {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// One sandbox execution, as recorded for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: ToolOutput,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub exit_status: Option<i32>,
}
