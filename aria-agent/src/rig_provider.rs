use async_trait::async_trait;

use aria_core::error::ModelError;
use aria_core::message::{estimate_tokens, Message};
use aria_core::tool::{ToolCall, ToolOutput};

use crate::provider::{ModelAction, ModelProvider, ModelRequest, ProviderResponse};

/// Cost per 1M tokens (USD), keyed by model id. Unmetered models cost 0.
const COST_TABLE: &[(&str, f64, f64)] = &[
    ("claude-haiku-4-5-20251001", 0.80, 4.00),
    ("claude-sonnet-4-6", 3.00, 15.00),
    ("claude-opus-4-6", 15.00, 75.00),
];

/// Adapter from a rig `CompletionModel` to the router's provider interface.
/// rig types stay inside this module; the rest of the runtime only sees the
/// normalized request/response contracts.
pub struct RigProvider<M: rig::completion::CompletionModel> {
    provider_name: String,
    metered: bool,
    model: M,
}

impl<M: rig::completion::CompletionModel> RigProvider<M> {
    pub fn new(provider_name: impl Into<String>, model: M, metered: bool) -> Self {
        Self {
            provider_name: provider_name.into(),
            metered,
            model,
        }
    }
}

#[async_trait]
impl<M> ModelProvider for RigProvider<M>
where
    M: rig::completion::CompletionModel + Send + Sync + 'static,
    M::Response: Send + Sync,
{
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn send(&self, request: &ModelRequest) -> Result<ProviderResponse, ModelError> {
        let rig_messages = to_rig_messages(&request.messages);
        let (current_prompt, chat_history) = split_prompt_and_history(rig_messages);

        let tool_definitions: Vec<rig::completion::ToolDefinition> = request
            .tools
            .iter()
            .map(|t| rig::completion::ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            })
            .collect();

        let rig_request = self
            .model
            .completion_request(current_prompt)
            .preamble(request.system_prompt.clone())
            .messages(chat_history)
            .tools(tool_definitions)
            .temperature(request.temperature as f64)
            .max_tokens(request.max_tokens as u64)
            .build();

        let response = self
            .model
            .completion(rig_request)
            .await
            .map_err(|e| classify_transport_error(&self.provider_name, &e.to_string()))?;

        let input_tokens = estimate_request_tokens(request);
        let mut text: Option<String> = None;
        let mut tool_call: Option<ToolCall> = None;

        for content in response.choice.iter() {
            match content {
                rig::message::AssistantContent::Text(t) => {
                    text = Some(t.text.clone());
                }
                rig::message::AssistantContent::ToolCall(tc) => {
                    if tool_call.is_none() {
                        tool_call = Some(ToolCall {
                            call_id: tc.id.clone(),
                            tool_name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        if let Some(call) = tool_call {
            let output_tokens = estimate_tokens(&call.arguments.to_string());
            return Ok(ProviderResponse {
                action: ModelAction::ToolCall(call),
                input_tokens,
                output_tokens,
            });
        }

        match text {
            Some(answer) if !answer.trim().is_empty() => {
                let output_tokens = estimate_tokens(&answer);
                Ok(ProviderResponse {
                    action: ModelAction::Finalize(answer),
                    input_tokens,
                    output_tokens,
                })
            }
            _ => Err(ModelError::Malformed {
                provider: self.provider_name.clone(),
                reason: "model returned neither text nor a tool call".into(),
            }),
        }
    }

    fn estimate_cost(&self, request: &ModelRequest, response: &ProviderResponse) -> f64 {
        if !self.metered {
            return 0.0;
        }
        let (input_rate, output_rate) = cost_rates(&request.model);
        (response.input_tokens as f64 * input_rate + response.output_tokens as f64 * output_rate)
            / 1_000_000.0
    }
}

fn cost_rates(model: &str) -> (f64, f64) {
    COST_TABLE
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or((3.00, 15.00))
}

fn estimate_request_tokens(request: &ModelRequest) -> u32 {
    let mut total = estimate_tokens(&request.system_prompt);
    for message in &request.messages {
        total += message.token_estimate();
    }
    total
}

/// Convert runtime messages into rig's chat format. System messages are
/// carried via the request preamble, not the history.
fn to_rig_messages(messages: &[Message]) -> Vec<rig::completion::Message> {
    let mut out = Vec::new();
    for message in messages {
        match message {
            Message::System { .. } => {}
            Message::User { text } => {
                out.push(rig::completion::Message::user(text.clone()));
            }
            Message::Assistant { text } => {
                out.push(rig::completion::Message::assistant(text.clone()));
            }
            Message::ToolCall {
                tool_name,
                call_id,
                arguments,
            } => {
                out.push(rig::completion::Message::Assistant {
                    content: rig::OneOrMany::one(rig::message::AssistantContent::tool_call(
                        call_id,
                        tool_name,
                        arguments.clone(),
                    )),
                });
            }
            Message::ToolResult {
                call_id, output, ..
            } => {
                let text = match output {
                    ToolOutput::Success(value) => value.to_string(),
                    ToolOutput::Error(error) => format!("Error: {error}"),
                };
                out.push(rig::completion::Message::User {
                    content: rig::OneOrMany::one(rig::message::UserContent::tool_result(
                        call_id,
                        rig::OneOrMany::one(rig::message::ToolResultContent::text(text)),
                    )),
                });
            }
        }
    }
    out
}

/// rig expects the latest user text as the prompt and everything before it
/// as chat history.
fn split_prompt_and_history(
    messages: Vec<rig::completion::Message>,
) -> (String, Vec<rig::completion::Message>) {
    let Some(last) = messages.last() else {
        return (String::new(), vec![]);
    };

    if let Some(text) = extract_user_text(last) {
        let history = if messages.len() > 1 {
            messages[..messages.len() - 1].to_vec()
        } else {
            vec![]
        };
        return (text, history);
    }

    (String::new(), messages)
}

fn extract_user_text(message: &rig::completion::Message) -> Option<String> {
    match message {
        rig::completion::Message::User { content } => content.iter().find_map(|part| {
            if let rig::message::UserContent::Text(text) = part {
                Some(text.text.clone())
            } else {
                None
            }
        }),
        _ => None,
    }
}

/// Map a transport failure onto the taxonomy using the status code embedded
/// in the provider error text. Rate limits and 5xx are transient;
/// connection-level failures carry no status at all.
fn classify_transport_error(provider: &str, message: &str) -> ModelError {
    if message.contains("429") || message.to_ascii_lowercase().contains("rate limit") {
        return ModelError::RateLimit {
            provider: provider.to_string(),
            message: message.to_string(),
        };
    }
    if let Some(status) = find_status_code(message) {
        return ModelError::Provider {
            provider: provider.to_string(),
            status: Some(status),
            message: message.to_string(),
        };
    }
    let lower = message.to_ascii_lowercase();
    if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("connect")
    {
        return ModelError::Provider {
            provider: provider.to_string(),
            status: None,
            message: message.to_string(),
        };
    }
    ModelError::Malformed {
        provider: provider.to_string(),
        reason: message.to_string(),
    }
}

fn find_status_code(message: &str) -> Option<u16> {
    let bytes = message.as_bytes();
    for (i, window) in bytes.windows(3).enumerate() {
        if window.iter().all(|b| b.is_ascii_digit()) {
            let before_ok = i == 0 || !bytes[i - 1].is_ascii_digit();
            let after_ok = i + 3 >= bytes.len() || !bytes[i + 3].is_ascii_digit();
            if before_ok && after_ok {
                let code: u16 = message[i..i + 3].parse().ok()?;
                if (400..600).contains(&code) {
                    return Some(code);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_prompt_uses_last_user_text() {
        let messages = vec![
            rig::completion::Message::assistant("hello"),
            rig::completion::Message::user("what now"),
        ];
        let (prompt, history) = split_prompt_and_history(messages);
        assert_eq!(prompt, "what now");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn tool_result_stays_in_history() {
        let messages = to_rig_messages(&[
            Message::user("question"),
            Message::tool_call("read_file", "call-1", serde_json::json!({"path": "/tmp/x"})),
            Message::tool_result(
                "read_file",
                "call-1",
                ToolOutput::Success(serde_json::json!({"content": "hello"})),
            ),
        ]);
        assert_eq!(messages.len(), 3);

        let (prompt, history) = split_prompt_and_history(messages);
        assert_eq!(prompt, "");
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn system_messages_are_excluded_from_history() {
        let messages = to_rig_messages(&[Message::system("rules"), Message::user("task")]);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn classification_of_transport_errors() {
        let err = classify_transport_error("anthropic", "API error 429: rate limited");
        assert!(matches!(err, ModelError::RateLimit { .. }));

        let err = classify_transport_error("anthropic", "API error (503): overloaded");
        assert!(matches!(
            err,
            ModelError::Provider {
                status: Some(503),
                ..
            }
        ));
        assert!(err.is_transient());

        let err = classify_transport_error("anthropic", "API error (400): bad request");
        assert!(!err.is_transient());

        let err = classify_transport_error("ollama", "connection refused");
        assert!(matches!(err, ModelError::Provider { status: None, .. }));
        assert!(err.is_transient());

        let err = classify_transport_error("ollama", "response body was not valid");
        assert!(matches!(err, ModelError::Malformed { .. }));
    }

    #[test]
    fn cost_rates_fall_back_for_unknown_models() {
        assert_eq!(cost_rates("claude-opus-4-6"), (15.00, 75.00));
        assert_eq!(cost_rates("some-new-model"), (3.00, 15.00));
    }
}
