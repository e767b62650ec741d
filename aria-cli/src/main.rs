mod bootstrap;
mod cli;
mod output;
mod telemetry;

use std::time::Duration;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;

use aria_core::config::KernelConfig;
use aria_core::error::{AriaError, ErrorKind};
use aria_core::session::{Limits, SessionId, SessionRequest};
use aria_store::{ChainStatus, ExportFormat};

use cli::{AuditCommand, Cli, Command, RunArgs, ToolsCommand};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("{message}")]
    Runtime { message: String, code: i32 },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Runtime { code, .. } => *code,
        }
    }
}

impl From<AriaError> for CliError {
    fn from(err: AriaError) -> Self {
        match err.kind() {
            ErrorKind::Config => Self::Usage(err.to_string()),
            kind => Self::Runtime {
                message: err.to_string(),
                code: kind.exit_code(),
            },
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The builtin-exec mode is a sandbox child: its stdout carries only the
    // structured reply, so it must run before any logging is installed.
    if let Command::BuiltinExec { name } = &cli.command {
        let code = aria_tools::builtin::run_builtin_stdio(name).await;
        std::process::exit(code);
    }

    let json_mode = cli.json;
    match run(cli).await {
        Ok((payload, code)) => {
            output::print_success(json_mode, &payload);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Err(err) => {
            let code = err.exit_code();
            output::print_error(json_mode, &err.to_string(), code);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> Result<(serde_json::Value, i32), CliError> {
    let config = KernelConfig::from_env()?;
    telemetry::init_telemetry(&config.log_path, &config.log_level)
        .map_err(|e| CliError::Usage(e.to_string()))?;

    match cli.command {
        Command::Run(args) => run_session(config, args).await,
        Command::Tools {
            command: ToolsCommand::List,
        } => {
            let registry = bootstrap::build_registry(&config)?;
            let tools: Vec<serde_json::Value> = registry
                .manifests()
                .into_iter()
                .map(|m| {
                    serde_json::json!({
                        "name": m.name,
                        "version": m.version,
                        "description": m.description,
                        "permissions": m.permissions,
                        "timeout_secs": m.timeout_secs,
                    })
                })
                .collect();
            Ok((serde_json::Value::Array(tools), 0))
        }
        Command::Audit { command } => audit_command(config, command).await,
        Command::BuiltinExec { .. } => {
            Err(CliError::Usage("builtin-exec is an internal mode".into()))
        }
    }
}

async fn run_session(
    mut config: KernelConfig,
    args: RunArgs,
) -> Result<(serde_json::Value, i32), CliError> {
    if let Some(provider) = &args.provider {
        config.primary_provider = provider.clone();
    }
    if let Some(model) = &args.model {
        config.primary_model = model.clone();
    }

    let request = SessionRequest::new(args.task)?;
    let mut limits = Limits::new(
        args.max_steps.unwrap_or(config.max_steps),
        args.max_cost_usd.unwrap_or(config.max_cost_usd),
    );
    if let Some(secs) = args.deadline_secs {
        limits = limits.with_deadline(Duration::from_secs(secs));
    }

    let runtime = bootstrap::build_runtime(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(signal_listener(shutdown_tx));

    info!(session_id = %request.session_id, "session starting");
    let report = runtime.kernel.run(request, limits, shutdown_rx).await?;

    let code = report.outcome.exit_code();
    let payload = serde_json::to_value(&report)
        .map_err(|e| CliError::Usage(format!("report serialization failed: {e}")))?;
    Ok((payload, code))
}

async fn audit_command(
    config: KernelConfig,
    command: AuditCommand,
) -> Result<(serde_json::Value, i32), CliError> {
    let store = bootstrap::build_store(&config).await?;

    match command {
        AuditCommand::List { limit } => {
            let sessions = store.list_sessions(limit).await?;
            let payload = serde_json::to_value(sessions)
                .map_err(|e| CliError::Usage(format!("listing serialization failed: {e}")))?;
            Ok((payload, 0))
        }
        AuditCommand::Export { session_id, format } => {
            let session_id = parse_session_id(&session_id)?;
            let format: ExportFormat = format.parse()?;
            let bytes = store.export(session_id, format).await?;
            let payload = match format {
                ExportFormat::Json => serde_json::from_slice(&bytes)
                    .map_err(|e| CliError::Usage(format!("export is not valid JSON: {e}")))?,
                ExportFormat::Text => {
                    serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
            };
            Ok((payload, 0))
        }
        AuditCommand::Verify { session_id } => {
            let session_id = parse_session_id(&session_id)?;
            match store.verify(session_id).await? {
                ChainStatus::Ok => Ok((
                    serde_json::json!({"session_id": session_id, "status": "ok"}),
                    0,
                )),
                ChainStatus::BrokenAt(seq) => Ok((
                    serde_json::json!({
                        "session_id": session_id,
                        "status": "broken",
                        "broken_at": seq,
                    }),
                    10,
                )),
            }
        }
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, CliError> {
    raw.parse()
        .map_err(|_| CliError::Usage(format!("'{raw}' is not a valid session id")))
}

/// SIGTERM / SIGINT set the shutdown flag; the kernel observes it at the
/// next step boundary and cancels the session.
async fn signal_listener(shutdown_tx: watch::Sender<bool>) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM, cancelling session");
        }
        _ = sigint.recv() => {
            info!("received SIGINT, cancelling session");
        }
    }
    let _ = shutdown_tx.send(true);
}
