use std::sync::Mutex;

use async_trait::async_trait;

use aria_core::error::ModelError;
use aria_core::manifest::ToolManifest;
use aria_core::message::Message;
use aria_core::tool::ToolCall;

/// Tool description as presented to the model: name, description, and the
/// input schema, nothing more.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl From<&ToolManifest> for ToolDescriptor {
    fn from(manifest: &ToolManifest) -> Self {
        Self {
            name: manifest.name.clone(),
            description: manifest.description.clone(),
            input_schema: manifest.input_schema.clone(),
        }
    }
}

/// Normalized model request. Providers translate this into their native
/// wire format; the kernel never sees provider-native structures.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// What the model decided: a textual finalization or a tool-call directive.
#[derive(Debug, Clone)]
pub enum ModelAction {
    Finalize(String),
    ToolCall(ToolCall),
}

/// Normalized provider response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub action: ModelAction,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ProviderResponse {
    pub fn finalize(text: impl Into<String>) -> Self {
        Self {
            action: ModelAction::Finalize(text.into()),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            action: ModelAction::ToolCall(call),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// Capability interface every provider adapter implements.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, request: &ModelRequest) -> Result<ProviderResponse, ModelError>;

    fn estimate_cost(&self, request: &ModelRequest, response: &ProviderResponse) -> f64;
}

/// Scripted provider for tests and offline smoke runs: returns its queued
/// responses/errors in order, then finalizes with a fixed notice.
pub struct MockProvider {
    script: Mutex<Vec<Result<ProviderResponse, ModelError>>>,
    cost_per_call: f64,
}

impl MockProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script),
            cost_per_call: 0.0,
        }
    }

    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, _request: &ModelRequest) -> Result<ProviderResponse, ModelError> {
        let mut script = self.script.lock().expect("mock script lock");
        if script.is_empty() {
            Ok(ProviderResponse::finalize("mock script exhausted"))
        } else {
            script.remove(0)
        }
    }

    fn estimate_cost(&self, _request: &ModelRequest, _response: &ProviderResponse) -> f64 {
        self.cost_per_call
    }
}

/// Offline provider that finalizes immediately by echoing the task back.
/// Selectable as the `mock` provider for end-to-end smoke runs.
pub struct EchoProvider;

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, request: &ModelRequest) -> Result<ProviderResponse, ModelError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "no task provided".into());
        Ok(ProviderResponse::finalize(format!("Echo: {last_user}")))
    }

    fn estimate_cost(&self, _request: &ModelRequest, _response: &ProviderResponse) -> f64 {
        0.0
    }
}
