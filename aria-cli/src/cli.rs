use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "aria",
    version,
    about = "Local-first, auditable single-agent runtime"
)]
pub struct Cli {
    /// Emit stable JSON envelopes.
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a task to completion.
    Run(RunArgs),

    /// Inspect registered tools.
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },

    /// Inspect, export, and verify audit trails.
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },

    /// Sandbox entry point for builtin tools; not part of the public surface.
    #[command(name = "builtin-exec", hide = true)]
    BuiltinExec { name: String },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// The task to execute.
    pub task: String,

    /// Override the configured primary provider for this run.
    #[arg(long)]
    pub provider: Option<String>,

    /// Override the configured model for this run.
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub max_steps: Option<u32>,

    #[arg(long)]
    pub max_cost_usd: Option<f64>,

    /// Wall-clock deadline for the whole session.
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum ToolsCommand {
    List,
}

#[derive(Debug, Subcommand)]
pub enum AuditCommand {
    /// List recent sessions.
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Export one session's audit trail.
    Export {
        session_id: String,

        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Recompute and check one session's hash chain.
    Verify { session_id: String },
}
