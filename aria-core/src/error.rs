use serde::{Deserialize, Serialize};

use crate::session::SessionState;

/// Flat, copyable view of the error taxonomy. Carried in audit payloads,
/// session outcomes, and the CLI exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ToolInputValidation,
    ToolOutputValidation,
    ToolTimeout,
    ToolCrashed,
    PathTraversal,
    PermissionDenied,
    UnknownTool,
    ManifestInvalid,
    ModelProvider,
    ModelRateLimit,
    ModelResponseMalformed,
    CircuitBreakerOpen,
    ModelProviderExhausted,
    StepLimitExceeded,
    CostLimitExceeded,
    DeadlineExceeded,
    InvalidStateTransition,
    AuditWriteFailure,
    StoreCorruption,
    ScrubberFailure,
    Config,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolInputValidation => "tool_input_validation",
            Self::ToolOutputValidation => "tool_output_validation",
            Self::ToolTimeout => "tool_timeout",
            Self::ToolCrashed => "tool_crashed",
            Self::PathTraversal => "path_traversal",
            Self::PermissionDenied => "permission_denied",
            Self::UnknownTool => "unknown_tool",
            Self::ManifestInvalid => "manifest_invalid",
            Self::ModelProvider => "model_provider",
            Self::ModelRateLimit => "model_rate_limit",
            Self::ModelResponseMalformed => "model_response_malformed",
            Self::CircuitBreakerOpen => "circuit_breaker_open",
            Self::ModelProviderExhausted => "model_provider_exhausted",
            Self::StepLimitExceeded => "step_limit_exceeded",
            Self::CostLimitExceeded => "cost_limit_exceeded",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::InvalidStateTransition => "invalid_state_transition",
            Self::AuditWriteFailure => "audit_write_failure",
            Self::StoreCorruption => "store_corruption",
            Self::ScrubberFailure => "scrubber_failure",
            Self::Config => "config",
            Self::Cancelled => "cancelled",
        }
    }

    /// Critical kinds violate a core invariant and must halt the process.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            Self::InvalidStateTransition
                | Self::AuditWriteFailure
                | Self::StoreCorruption
                | Self::ScrubberFailure
        )
    }

    /// Process exit code for a session that ended with this kind.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Config => 2,
            Self::StepLimitExceeded | Self::CostLimitExceeded | Self::DeadlineExceeded => 3,
            Self::ToolInputValidation
            | Self::ToolOutputValidation
            | Self::ToolTimeout
            | Self::ToolCrashed
            | Self::PathTraversal
            | Self::PermissionDenied
            | Self::UnknownTool
            | Self::ManifestInvalid => 4,
            Self::ModelProvider
            | Self::ModelRateLimit
            | Self::ModelResponseMalformed
            | Self::CircuitBreakerOpen
            | Self::ModelProviderExhausted => 5,
            Self::InvalidStateTransition
            | Self::AuditWriteFailure
            | Self::StoreCorruption
            | Self::ScrubberFailure => 10,
            Self::Cancelled => 130,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AriaError {
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("limit error: {0}")]
    Limit(#[from] LimitError),

    #[error("state machine error: {0}")]
    State(#[from] StateError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),
}

impl AriaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Tool(e) => e.kind(),
            Self::Security(e) => e.kind(),
            Self::Model(e) => e.kind(),
            Self::Limit(e) => e.kind(),
            Self::State(_) => ErrorKind::InvalidStateTransition,
            Self::Store(e) => e.kind(),
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.kind().is_critical()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{tool}' input validation failed: {reason}")]
    InputValidation { tool: String, reason: String },

    #[error("tool '{tool}' output validation failed: {reason}")]
    OutputValidation { tool: String, reason: String },

    #[error("tool '{tool}' exceeded timeout of {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("tool '{tool}' crashed: {message}")]
    Crashed { tool: String, message: String },

    #[error("tool '{tool}' is not registered")]
    Unknown { tool: String },

    #[error("invalid manifest: {reason}")]
    ManifestInvalid { reason: String },
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputValidation { .. } => ErrorKind::ToolInputValidation,
            Self::OutputValidation { .. } => ErrorKind::ToolOutputValidation,
            Self::Timeout { .. } => ErrorKind::ToolTimeout,
            Self::Crashed { .. } => ErrorKind::ToolCrashed,
            Self::Unknown { .. } => ErrorKind::UnknownTool,
            Self::ManifestInvalid { .. } => ErrorKind::ManifestInvalid,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("path '{path}' escapes the allowed roots: {detail}")]
    PathTraversal { path: String, detail: String },

    #[error("tool '{tool}' requires disallowed permissions: {missing}")]
    PermissionDenied { tool: String, missing: String },
}

impl SecurityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathTraversal { .. } => ErrorKind::PathTraversal,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("provider '{provider}' error (status {status:?}): {message}")]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("provider '{provider}' rate limited: {message}")]
    RateLimit { provider: String, message: String },

    #[error("provider '{provider}' returned a malformed response: {reason}")]
    Malformed { provider: String, reason: String },

    #[error("circuit breaker open for provider '{provider}'")]
    BreakerOpen { provider: String },

    #[error("provider '{provider}' failed after {attempts} attempts, last: {last}")]
    Exhausted {
        provider: String,
        attempts: u32,
        last: String,
    },
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider { .. } => ErrorKind::ModelProvider,
            Self::RateLimit { .. } => ErrorKind::ModelRateLimit,
            Self::Malformed { .. } => ErrorKind::ModelResponseMalformed,
            Self::BreakerOpen { .. } => ErrorKind::CircuitBreakerOpen,
            Self::Exhausted { .. } => ErrorKind::ModelProviderExhausted,
        }
    }

    /// Transient failures are retried and advance the circuit breaker.
    /// A 5xx status or a transport-level failure (no status) is transient;
    /// 4xx responses and malformed output are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimit { .. } => true,
            Self::Provider { status, .. } => match status {
                Some(code) => *code >= 500,
                None => true,
            },
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    #[error("exceeded max_steps={max_steps}")]
    StepLimitExceeded { max_steps: u32 },

    #[error("cost ${cost:.4} exceeded budget ${max_cost:.2}")]
    CostLimitExceeded { cost: f64, max_cost: f64 },

    #[error("deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },
}

impl LimitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StepLimitExceeded { .. } => ErrorKind::StepLimitExceeded,
            Self::CostLimitExceeded { .. } => ErrorKind::CostLimitExceeded,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid session transition: {from} -> {to}")]
pub struct StateError {
    pub from: SessionState,
    pub to: SessionState,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("audit write failure: {0}")]
    AuditWriteFailure(String),

    #[error("store corruption: {0}")]
    Corruption(String),

    #[error("scrubber failure: {0}")]
    Scrubber(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuditWriteFailure(_) => ErrorKind::AuditWriteFailure,
            Self::Corruption(_) => ErrorKind::StoreCorruption,
            Self::Scrubber(_) => ErrorKind::ScrubberFailure,
        }
    }
}
