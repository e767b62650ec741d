use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use aria_core::error::{AriaError, ModelError};

use crate::breaker::{BreakerState, CircuitBreaker, DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use crate::provider::{ModelAction, ModelProvider, ModelRequest, ProviderResponse};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Additional attempts after the first, for transient failures only.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub fallback_provider: Option<String>,
    pub fallback_model: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            breaker_threshold: DEFAULT_FAILURE_THRESHOLD,
            breaker_cooldown: DEFAULT_COOLDOWN,
            fallback_provider: None,
            fallback_model: None,
        }
    }
}

/// Router result: the model's decision plus accounting.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub action: ModelAction,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
}

/// Provider-abstracted model invocation: bounded retry with jittered
/// backoff, per-provider circuit breakers, optional fallback provider.
pub struct ModelRouter {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    config: RouterConfig,
}

impl ModelRouter {
    pub fn new(
        providers: HashMap<String, Arc<dyn ModelProvider>>,
        config: RouterConfig,
    ) -> Result<Self, AriaError> {
        if providers.is_empty() {
            return Err(AriaError::Config(
                "model router requires at least one provider".into(),
            ));
        }
        Ok(Self {
            providers,
            breakers: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Invoke the named provider. While its breaker is open the call fails
    /// immediately; a configured fallback provider is then tried once.
    pub async fn invoke(
        &self,
        provider_name: &str,
        request: &ModelRequest,
    ) -> Result<RoutedResponse, AriaError> {
        match self.call_provider(provider_name, request).await {
            Err(ModelError::BreakerOpen { .. }) => {
                let fallback = self
                    .config
                    .fallback_provider
                    .as_deref()
                    .filter(|name| *name != provider_name);
                match fallback {
                    Some(fallback_name) => {
                        warn!(
                            provider = provider_name,
                            fallback = fallback_name,
                            "circuit breaker open, trying fallback provider"
                        );
                        let mut fallback_request = request.clone();
                        if let Some(model) = &self.config.fallback_model {
                            fallback_request.model = model.clone();
                        }
                        self.call_provider(fallback_name, &fallback_request)
                            .await
                            .map_err(AriaError::Model)
                    }
                    None => Err(AriaError::Model(ModelError::BreakerOpen {
                        provider: provider_name.to_string(),
                    })),
                }
            }
            other => other.map_err(AriaError::Model),
        }
    }

    async fn call_provider(
        &self,
        provider_name: &str,
        request: &ModelRequest,
    ) -> Result<RoutedResponse, ModelError> {
        let provider = self.providers.get(provider_name).ok_or_else(|| {
            ModelError::Provider {
                provider: provider_name.to_string(),
                status: Some(0),
                message: format!(
                    "provider '{provider_name}' not registered; available: {:?}",
                    self.providers.keys().collect::<Vec<_>>()
                ),
            }
        })?;

        let mut last_transient: Option<ModelError> = None;

        for attempt in 0..=self.config.max_retries {
            self.with_breaker(provider_name, |b| b.try_acquire())?;

            info!(
                provider = provider_name,
                model = %request.model,
                attempt,
                "model call attempt"
            );

            match provider.send(request).await {
                Ok(response) => {
                    self.with_breaker(provider_name, |b| {
                        b.record_success();
                        Ok(())
                    })?;
                    return self.normalize(provider_name, provider.as_ref(), request, response);
                }
                Err(err) if err.is_transient() => {
                    self.with_breaker(provider_name, |b| {
                        b.record_failure();
                        Ok(())
                    })?;
                    warn!(
                        provider = provider_name,
                        attempt,
                        error = %err,
                        "transient model failure"
                    );
                    if attempt == self.config.max_retries {
                        return Err(ModelError::Exhausted {
                            provider: provider_name.to_string(),
                            attempts: attempt + 1,
                            last: err.to_string(),
                        });
                    }
                    last_transient = Some(err);
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }

        // The loop always returns; keep the compiler and the invariant honest.
        Err(ModelError::Exhausted {
            provider: provider_name.to_string(),
            attempts: self.config.max_retries + 1,
            last: last_transient
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".into()),
        })
    }

    /// Validate the provider's decision and attach cost accounting. A tool
    /// call naming a tool absent from the request, or with non-object
    /// arguments, is a malformed response.
    fn normalize(
        &self,
        provider_name: &str,
        provider: &dyn ModelProvider,
        request: &ModelRequest,
        response: ProviderResponse,
    ) -> Result<RoutedResponse, ModelError> {
        if let ModelAction::ToolCall(call) = &response.action {
            if !request.tools.iter().any(|t| t.name == call.tool_name) {
                return Err(ModelError::Malformed {
                    provider: provider_name.to_string(),
                    reason: format!("tool call names unknown tool '{}'", call.tool_name),
                });
            }
            if !call.arguments.is_object() {
                return Err(ModelError::Malformed {
                    provider: provider_name.to_string(),
                    reason: format!(
                        "tool call arguments for '{}' are not an object",
                        call.tool_name
                    ),
                });
            }
        }

        let cost_usd = provider.estimate_cost(request, &response);
        Ok(RoutedResponse {
            provider: provider_name.to_string(),
            model: request.model.clone(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost_usd,
            action: response.action,
        })
    }

    /// Exponential backoff with full jitter: up to half the nominal delay
    /// is shaved off at random.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let nominal = self
            .config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.max_backoff);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..0.5);
        nominal.mul_f64(1.0 - jitter)
    }

    fn with_breaker<T>(
        &self,
        provider_name: &str,
        f: impl FnOnce(&mut CircuitBreaker) -> Result<T, ModelError>,
    ) -> Result<T, ModelError> {
        let mut breakers = self.breakers.lock().expect("breaker table lock");
        let breaker = breakers.entry(provider_name.to_string()).or_insert_with(|| {
            CircuitBreaker::new(
                provider_name,
                self.config.breaker_threshold,
                self.config.breaker_cooldown,
            )
        });
        f(breaker)
    }

    pub fn breaker_state(&self, provider_name: &str) -> Option<BreakerState> {
        let mut breakers = self.breakers.lock().expect("breaker table lock");
        breakers.get_mut(provider_name).map(|b| b.state())
    }

    pub fn breaker_status(&self) -> Vec<serde_json::Value> {
        let mut breakers = self.breakers.lock().expect("breaker table lock");
        breakers.values_mut().map(|b| b.status()).collect()
    }
}

#[cfg(test)]
mod tests {
    use aria_core::message::Message;
    use aria_core::tool::ToolCall;

    use super::*;
    use crate::provider::{MockProvider, ToolDescriptor};

    fn request_with_tools(tools: Vec<ToolDescriptor>) -> ModelRequest {
        ModelRequest {
            system_prompt: "system".into(),
            messages: vec![Message::user("task")],
            tools,
            model: "test-model".into(),
            temperature: 0.0,
            max_tokens: 256,
        }
    }

    fn request() -> ModelRequest {
        request_with_tools(vec![])
    }

    fn transient() -> ModelError {
        ModelError::Provider {
            provider: "mock".into(),
            status: Some(503),
            message: "overloaded".into(),
        }
    }

    fn router_with(
        script: Vec<Result<ProviderResponse, ModelError>>,
        config: RouterConfig,
    ) -> ModelRouter {
        let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
        providers.insert("mock".into(), Arc::new(MockProvider::new(script).with_cost(0.001)));
        ModelRouter::new(providers, config).expect("router")
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_to_success() {
        let router = router_with(
            vec![
                Err(transient()),
                Err(transient()),
                Ok(ProviderResponse::finalize("recovered")),
            ],
            RouterConfig::default(),
        );

        let routed = router.invoke("mock", &request()).await.expect("recovered");
        assert!(matches!(routed.action, ModelAction::Finalize(ref t) if t == "recovered"));
        assert_eq!(routed.cost_usd, 0.001);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_into_a_terminal_error() {
        let router = router_with(
            vec![
                Err(transient()),
                Err(transient()),
                Err(transient()),
                Err(transient()),
            ],
            RouterConfig::default(),
        );

        let err = router.invoke("mock", &request()).await.expect_err("exhausted");
        match err {
            AriaError::Model(ModelError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let router = router_with(
            vec![
                Err(ModelError::Malformed {
                    provider: "mock".into(),
                    reason: "unparseable".into(),
                }),
                Ok(ProviderResponse::finalize("never reached")),
            ],
            RouterConfig::default(),
        );

        let err = router.invoke("mock", &request()).await.expect_err("no retry");
        assert!(matches!(err, AriaError::Model(ModelError::Malformed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_after_threshold_and_rejects_immediately() {
        let config = RouterConfig {
            max_retries: 0,
            breaker_threshold: 5,
            ..RouterConfig::default()
        };
        let script: Vec<Result<ProviderResponse, ModelError>> =
            (0..5).map(|_| Err(transient())).collect();
        let router = router_with(script, config);

        for _ in 0..5 {
            let err = router.invoke("mock", &request()).await.expect_err("transient");
            assert!(matches!(
                err,
                AriaError::Model(ModelError::Exhausted { .. })
            ));
        }
        assert_eq!(router.breaker_state("mock"), Some(BreakerState::Open));

        // Sixth call fails fast without touching the provider script.
        let err = router.invoke("mock", &request()).await.expect_err("open");
        assert!(matches!(
            err,
            AriaError::Model(ModelError::BreakerOpen { .. })
        ));
    }

    #[tokio::test]
    async fn cooled_breaker_admits_a_probe_that_closes_it() {
        let config = RouterConfig {
            max_retries: 0,
            breaker_threshold: 2,
            breaker_cooldown: Duration::from_millis(10),
            ..RouterConfig::default()
        };
        let router = router_with(
            vec![
                Err(transient()),
                Err(transient()),
                Ok(ProviderResponse::finalize("probe ok")),
            ],
            config,
        );

        for _ in 0..2 {
            let _ = router.invoke("mock", &request()).await;
        }
        assert_eq!(router.breaker_state("mock"), Some(BreakerState::Open));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let routed = router.invoke("mock", &request()).await.expect("probe");
        assert!(matches!(routed.action, ModelAction::Finalize(_)));
        assert_eq!(router.breaker_state("mock"), Some(BreakerState::Closed));
    }

    #[tokio::test]
    async fn open_breaker_falls_back_to_configured_provider() {
        let config = RouterConfig {
            max_retries: 0,
            breaker_threshold: 1,
            fallback_provider: Some("backup".into()),
            fallback_model: Some("backup-model".into()),
            ..RouterConfig::default()
        };

        let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
        providers.insert(
            "mock".into(),
            Arc::new(MockProvider::new(vec![Err(transient())])),
        );
        providers.insert(
            "backup".into(),
            Arc::new(MockProvider::new(vec![Ok(ProviderResponse::finalize(
                "from backup",
            ))])),
        );
        let router = ModelRouter::new(providers, config).expect("router");

        // Trip the primary breaker.
        let _ = router.invoke("mock", &request()).await;
        assert_eq!(router.breaker_state("mock"), Some(BreakerState::Open));

        let routed = router.invoke("mock", &request()).await.expect("fallback");
        assert_eq!(routed.provider, "backup");
        assert_eq!(routed.model, "backup-model");
        assert!(matches!(routed.action, ModelAction::Finalize(ref t) if t == "from backup"));
    }

    #[tokio::test]
    async fn unknown_tool_in_response_is_malformed() {
        let call = ToolCall {
            call_id: "call-1".into(),
            tool_name: "not_a_tool".into(),
            arguments: serde_json::json!({}),
        };
        let router = router_with(
            vec![Ok(ProviderResponse::tool_call(call))],
            RouterConfig::default(),
        );

        let tools = vec![ToolDescriptor {
            name: "read_file".into(),
            description: "reads".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let err = router
            .invoke("mock", &request_with_tools(tools))
            .await
            .expect_err("malformed");
        assert!(matches!(
            err,
            AriaError::Model(ModelError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn non_object_arguments_are_malformed() {
        let call = ToolCall {
            call_id: "call-1".into(),
            tool_name: "read_file".into(),
            arguments: serde_json::json!("just a string"),
        };
        let router = router_with(
            vec![Ok(ProviderResponse::tool_call(call))],
            RouterConfig::default(),
        );
        let tools = vec![ToolDescriptor {
            name: "read_file".into(),
            description: "reads".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let err = router
            .invoke("mock", &request_with_tools(tools))
            .await
            .expect_err("malformed");
        assert!(matches!(
            err,
            AriaError::Model(ModelError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn unregistered_provider_is_an_error() {
        let router = router_with(vec![], RouterConfig::default());
        assert!(router.invoke("missing", &request()).await.is_err());
    }
}
