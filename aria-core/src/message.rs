use serde::{Deserialize, Serialize};

use crate::tool::ToolOutput;

/// Deterministic length-based token estimate (~4 bytes per token).
pub fn estimate_tokens(text: &str) -> u32 {
    ((text.len() / 4).max(1)) as u32
}

/// One entry in a session's conversation history. Ordering within a session
/// is total and append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        text: String,
    },
    User {
        text: String,
    },
    Assistant {
        text: String,
    },
    ToolCall {
        tool_name: String,
        call_id: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_name: String,
        call_id: String,
        output: ToolOutput,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant { text: text.into() }
    }

    pub fn tool_call(tool_name: impl Into<String>, call_id: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::ToolCall {
            tool_name: tool_name.into(),
            call_id: call_id.into(),
            arguments,
        }
    }

    pub fn tool_result(tool_name: impl Into<String>, call_id: impl Into<String>, output: ToolOutput) -> Self {
        Self::ToolResult {
            tool_name: tool_name.into(),
            call_id: call_id.into(),
            output,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn token_estimate(&self) -> u32 {
        match self {
            Self::System { text } | Self::User { text } | Self::Assistant { text } => {
                estimate_tokens(text)
            }
            Self::ToolCall { arguments, .. } => estimate_tokens(&arguments.to_string()) + 16,
            Self::ToolResult { output, .. } => match output {
                ToolOutput::Success(v) => estimate_tokens(&v.to_string()) + 16,
                ToolOutput::Error(e) => estimate_tokens(e) + 16,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_positive_and_scales() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert!(estimate_tokens(&"x".repeat(4000)) >= 1000);
    }

    #[test]
    fn message_serde_uses_role_tag() {
        let msg = Message::user("hello");
        let encoded = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(encoded["role"], "user");
        assert_eq!(encoded["text"], "hello");

        let call = Message::tool_call("read_file", "call-1", serde_json::json!({"path": "/tmp/x"}));
        let encoded = serde_json::to_value(&call).expect("serialize");
        assert_eq!(encoded["role"], "tool_call");
        assert_eq!(encoded["tool_name"], "read_file");

        let round: Message = serde_json::from_value(encoded).expect("deserialize");
        assert!(matches!(round, Message::ToolCall { .. }));
    }

    #[test]
    fn tool_messages_estimate_from_payload() {
        let result = Message::tool_result(
            "read_file",
            "call-1",
            ToolOutput::Success(serde_json::json!({"content": "hello world"})),
        );
        assert!(result.token_estimate() > 16);
    }
}
