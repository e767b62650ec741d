use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{error, info, warn};

use aria_core::audit::AuditKind;
use aria_core::config::{AuditVerbosity, KernelConfig};
use aria_core::error::{AriaError, ErrorKind};
use aria_core::message::Message;
use aria_core::session::{Limits, Outcome, SessionMeta, SessionReport, SessionRequest, SessionState};
use aria_core::tool::ToolOutput;
use aria_secrets::InjectionScanner;
use aria_store::{SqliteStore, CONVERSATION_KEY};
use aria_tools::{run_tool, ToolRegistry};

use crate::context::StepContext;
use crate::conversation::Conversation;
use crate::fsm::SessionFsm;
use crate::provider::{ModelAction, ModelRequest, ToolDescriptor};
use crate::router::ModelRouter;

const SYSTEM_PROMPT: &str = "\
You are a task execution agent. Complete the given task using the available tools.

Rules:
1. Think step by step before acting.
2. Use tools when needed to gather information or take actions.
3. When the task is complete, provide your final answer as plain text.
4. Only use tool names listed in the API tool definitions - never invent tool names.
5. Be precise and factual. Do not invent information.
";

const MODEL_MAX_TOKENS: u32 = 4096;

struct RunState {
    fsm: SessionFsm,
    steps_taken: u32,
    total_cost_usd: f64,
    conversation: Conversation,
}

/// Single-session, sequential kernel. Drives the FSM through the
/// think / call-tool / observe loop under hard step, cost, and time limits,
/// emitting one audit record per observable event.
pub struct AgentKernel {
    router: ModelRouter,
    registry: Arc<ToolRegistry>,
    store: Arc<SqliteStore>,
    scanner: InjectionScanner,
    config: KernelConfig,
}

impl AgentKernel {
    pub fn new(
        router: ModelRouter,
        registry: Arc<ToolRegistry>,
        store: Arc<SqliteStore>,
        config: KernelConfig,
    ) -> Self {
        Self {
            router,
            registry,
            store,
            scanner: InjectionScanner::new(),
            config,
        }
    }

    /// Execute one session to a terminal state. Recoverable failures are
    /// folded into the returned report; only critical invariant violations
    /// surface as `Err`, and the process must halt on them.
    pub async fn run(
        &self,
        request: SessionRequest,
        limits: Limits,
        cancel: watch::Receiver<bool>,
    ) -> Result<SessionReport, AriaError> {
        let session_id = request.session_id;
        let started = Instant::now();
        let mut meta = SessionMeta::started(session_id, &request.task);
        self.store.upsert_session_meta(&meta).await?;

        let task_scan = self.scanner.scan(&request.task);
        if !task_scan.is_clean() {
            warn!(
                session_id = %session_id,
                patterns = ?task_scan.matched,
                "injection heuristics matched task input"
            );
        }

        let provider = request
            .provider_override
            .clone()
            .unwrap_or_else(|| self.config.primary_provider.clone());
        let model = request
            .model_override
            .clone()
            .unwrap_or_else(|| self.config.primary_model.clone());

        self.store
            .append(
                session_id,
                AuditKind::SessionStart,
                serde_json::json!({
                    "task_len": request.task.len(),
                    "provider": provider,
                    "model": model,
                }),
            )
            .await?;

        let mut state = RunState {
            fsm: SessionFsm::new(),
            steps_taken: 0,
            total_cost_usd: 0.0,
            conversation: Conversation::new(),
        };

        let drive_result = self
            .drive(&request, &provider, &model, limits, started, &mut state, &cancel)
            .await;

        let outcome = match drive_result {
            Ok(outcome) => outcome,
            Err(err) if err.is_critical() => {
                error!(session_id = %session_id, error = %err, "critical failure, halting");
                if err.kind() != ErrorKind::AuditWriteFailure {
                    let _ = self
                        .store
                        .append(
                            session_id,
                            AuditKind::Error,
                            serde_json::json!({
                                "error_kind": err.kind(),
                                "message": err.to_string(),
                            }),
                        )
                        .await;
                }
                return Err(err);
            }
            Err(err) => {
                let kind = err.kind();
                let message = err.to_string();
                error!(session_id = %session_id, error_kind = %kind, error = %message, "session failed");
                self.store
                    .append(
                        session_id,
                        AuditKind::Error,
                        serde_json::json!({"error_kind": kind, "message": message}),
                    )
                    .await?;
                if !state.fsm.is_terminal() {
                    self.transition(session_id, &mut state.fsm, SessionState::Failed)
                        .await?;
                }
                Outcome::Failed { kind, message }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let error_kind = match &outcome {
            Outcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        };

        self.store
            .append(
                session_id,
                AuditKind::SessionEnd,
                serde_json::json!({
                    "state": state.fsm.state(),
                    "steps": state.steps_taken,
                    "cost_usd": state.total_cost_usd,
                    "duration_ms": duration_ms,
                    "error_kind": error_kind,
                }),
            )
            .await?;

        meta.state = state.fsm.state();
        meta.total_steps = state.steps_taken;
        meta.total_cost_usd = state.total_cost_usd;
        meta.finished_at = Some(chrono::Utc::now());
        meta.error_kind = error_kind;
        self.store.upsert_session_meta(&meta).await?;

        info!(
            session_id = %session_id,
            state = %state.fsm.state(),
            steps = state.steps_taken,
            cost_usd = state.total_cost_usd,
            duration_ms,
            "session finished"
        );

        Ok(SessionReport {
            session_id,
            state: state.fsm.state(),
            outcome,
            steps_taken: state.steps_taken,
            total_cost_usd: state.total_cost_usd,
            duration_ms,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        request: &SessionRequest,
        provider: &str,
        model: &str,
        limits: Limits,
        started: Instant,
        state: &mut RunState,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Outcome, AriaError> {
        let session_id = request.session_id;
        self.transition(session_id, &mut state.fsm, SessionState::Running)
            .await?;

        state.conversation.push(Message::system(SYSTEM_PROMPT));
        state.conversation.push(Message::user(&request.task));
        self.persist_conversation(session_id, state).await?;

        let mut ctx = StepContext::initial(session_id, limits, started);
        let tools: Vec<ToolDescriptor> = self
            .registry
            .manifests()
            .into_iter()
            .map(ToolDescriptor::from)
            .collect();

        loop {
            if *cancel.borrow() {
                return self.cancel_session(session_id, state).await;
            }

            ctx = ctx.next_step(state.steps_taken, state.total_cost_usd);
            if let Err(limit) = ctx.check_budgets(Instant::now(), started) {
                self.store
                    .append(
                        session_id,
                        AuditKind::BudgetCheck,
                        serde_json::json!({
                            "check": limit.kind(),
                            "steps_taken": state.steps_taken,
                            "max_steps": limits.max_steps,
                            "cost_usd": state.total_cost_usd,
                            "max_cost_usd": limits.max_cost_usd,
                            "exceeded": true,
                        }),
                    )
                    .await?;
                return Err(AriaError::Limit(limit));
            }
            if self.config.audit_verbosity == AuditVerbosity::Verbose {
                self.store
                    .append(
                        session_id,
                        AuditKind::BudgetCheck,
                        serde_json::json!({
                            "steps_taken": state.steps_taken,
                            "max_steps": limits.max_steps,
                            "cost_usd": state.total_cost_usd,
                            "max_cost_usd": limits.max_cost_usd,
                            "exceeded": false,
                        }),
                    )
                    .await?;
            }

            // History stays append-only; truncation shapes the request only.
            let mut prompt_window = state.conversation.clone();
            prompt_window.truncate_to(self.config.max_context_tokens);
            let model_request = ModelRequest {
                system_prompt: SYSTEM_PROMPT.to_string(),
                messages: prompt_window.messages().to_vec(),
                tools: tools.clone(),
                model: model.to_string(),
                temperature: 0.0,
                max_tokens: MODEL_MAX_TOKENS,
            };

            if self.config.audit_verbosity == AuditVerbosity::Verbose {
                self.store
                    .append(
                        session_id,
                        AuditKind::ModelRequest,
                        serde_json::json!({
                            "prompt_sha256": prompt_digest(&model_request),
                            "message_count": model_request.messages.len(),
                            "tool_count": model_request.tools.len(),
                        }),
                    )
                    .await?;
            }

            if *cancel.borrow() {
                return self.cancel_session(session_id, state).await;
            }

            let routed = self.router.invoke(provider, &model_request).await?;
            state.total_cost_usd += routed.cost_usd;

            match routed.action {
                ModelAction::Finalize(answer) => {
                    self.store
                        .append(
                            session_id,
                            AuditKind::ModelResponse,
                            serde_json::json!({
                                "action": "final_answer",
                                "provider": routed.provider,
                                "model": routed.model,
                                "input_tokens": routed.input_tokens,
                                "output_tokens": routed.output_tokens,
                                "cost_usd": routed.cost_usd,
                            }),
                        )
                        .await?;

                    state.conversation.push(Message::assistant(&answer));
                    self.persist_conversation(session_id, state).await?;
                    self.transition(session_id, &mut state.fsm, SessionState::Done)
                        .await?;
                    return Ok(Outcome::Completed { answer });
                }

                ModelAction::ToolCall(call) => {
                    self.store
                        .append(
                            session_id,
                            AuditKind::ModelResponse,
                            serde_json::json!({
                                "action": "tool_call",
                                "tool": call.tool_name,
                                "call_id": call.call_id,
                                "provider": routed.provider,
                                "model": routed.model,
                                "input_tokens": routed.input_tokens,
                                "output_tokens": routed.output_tokens,
                                "cost_usd": routed.cost_usd,
                            }),
                        )
                        .await?;

                    let tool = self.registry.get(&call.tool_name).map_err(AriaError::Tool)?;

                    state.conversation.push(Message::tool_call(
                        &call.tool_name,
                        &call.call_id,
                        call.arguments.clone(),
                    ));
                    self.persist_conversation(session_id, state).await?;

                    self.transition(session_id, &mut state.fsm, SessionState::Waiting)
                        .await?;

                    let argument_scan = self.scanner.scan_value(&call.arguments);
                    if !argument_scan.is_clean() {
                        warn!(
                            session_id = %session_id,
                            tool = %call.tool_name,
                            patterns = ?argument_scan.matched,
                            "injection heuristics matched tool arguments"
                        );
                    }

                    self.store
                        .append(
                            session_id,
                            AuditKind::ToolCall,
                            serde_json::json!({
                                "tool": call.tool_name,
                                "call_id": call.call_id,
                                "arguments": call.arguments,
                            }),
                        )
                        .await?;

                    if *cancel.borrow() {
                        return self.cancel_session(session_id, state).await;
                    }

                    let sandboxed =
                        run_tool(tool, &call.arguments, &self.config.allowed_permissions).await?;

                    self.store
                        .append(
                            session_id,
                            AuditKind::ToolResult,
                            serde_json::json!({
                                "tool": call.tool_name,
                                "call_id": call.call_id,
                                "ok": true,
                                "duration_ms": sandboxed.record.duration_ms,
                                "exit_status": sandboxed.record.exit_status,
                            }),
                        )
                        .await?;

                    state.conversation.push(Message::tool_result(
                        &call.tool_name,
                        &call.call_id,
                        ToolOutput::Success(sandboxed.data),
                    ));
                    self.persist_conversation(session_id, state).await?;

                    self.transition(session_id, &mut state.fsm, SessionState::Running)
                        .await?;
                    state.steps_taken += 1;
                }
            }
        }
    }

    async fn cancel_session(
        &self,
        session_id: aria_core::session::SessionId,
        state: &mut RunState,
    ) -> Result<Outcome, AriaError> {
        info!(session_id = %session_id, "cancellation observed at step boundary");
        self.transition(session_id, &mut state.fsm, SessionState::Cancelled)
            .await?;
        Ok(Outcome::Cancelled)
    }

    async fn transition(
        &self,
        session_id: aria_core::session::SessionId,
        fsm: &mut SessionFsm,
        to: SessionState,
    ) -> Result<(), AriaError> {
        let from = fsm.state();
        fsm.transition(to)?;
        if self.config.audit_verbosity == AuditVerbosity::Verbose {
            self.store
                .append(
                    session_id,
                    AuditKind::StateTransition,
                    serde_json::json!({"from": from, "to": to}),
                )
                .await?;
        }
        Ok(())
    }

    async fn persist_conversation(
        &self,
        session_id: aria_core::session::SessionId,
        state: &RunState,
    ) -> Result<(), AriaError> {
        let value = serde_json::to_value(state.conversation.messages())
            .map_err(|e| AriaError::Config(format!("conversation serialization failed: {e}")))?;
        self.store
            .set_memory(session_id, CONVERSATION_KEY, &value)
            .await
    }
}

fn prompt_digest(request: &ModelRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.system_prompt.as_bytes());
    if let Ok(bytes) = serde_json::to_vec(&request.messages) {
        hasher.update(&bytes);
    }
    hex::encode(hasher.finalize())
}
