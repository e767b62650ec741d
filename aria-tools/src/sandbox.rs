use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error, info};

use aria_core::error::{AriaError, SecurityError, ToolError};
use aria_core::manifest::ToolPermission;
use aria_core::tool::{InvocationRecord, ToolOutput};

use crate::path_policy;
use crate::registry::{RegisteredTool, ToolRegistry};

const STDERR_SNIPPET_LEN: usize = 500;

/// Successful sandbox execution: validated output plus its invocation record.
#[derive(Debug)]
pub struct SandboxOutcome {
    pub data: serde_json::Value,
    pub record: InvocationRecord,
}

/// Structured reply every tool writes to stdout.
#[derive(Debug, Deserialize)]
struct ReplyEnvelope {
    ok: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Execute a tool in a child process. The enforcement pipeline is ordered
/// and each stage must pass before the next runs:
/// input schema, permissions, path policy, spawn, timeout, output schema.
pub async fn run_tool(
    tool: &RegisteredTool,
    arguments: &serde_json::Value,
    granted: &BTreeSet<ToolPermission>,
) -> Result<SandboxOutcome, AriaError> {
    let manifest = &tool.manifest;
    let started_at = Utc::now();
    let started = std::time::Instant::now();

    tool.validate_input(arguments).map_err(AriaError::Tool)?;

    let missing = ToolRegistry::missing_permissions(manifest, granted);
    if !missing.is_empty() {
        return Err(AriaError::Security(SecurityError::PermissionDenied {
            tool: manifest.name.clone(),
            missing: missing
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(","),
        }));
    }

    enforce_path_policy(tool, arguments)?;

    debug!(
        tool = %manifest.name,
        timeout_secs = manifest.timeout_secs,
        "sandbox spawn"
    );

    let payload = serde_json::json!({
        "tool": manifest.name,
        "input": arguments,
    });
    let payload_bytes = serde_json::to_vec(&payload).map_err(|e| crashed(manifest, format!("payload encoding failed: {e}")))?;

    let mut child = Command::new(&tool.argv[0])
        .args(&tool.argv[1..])
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| crashed(manifest, format!("failed to start '{}': {e}", tool.argv[0])))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| crashed(manifest, "child stdin unavailable".into()))?;
    stdin
        .write_all(&payload_bytes)
        .await
        .map_err(|e| crashed(manifest, format!("failed to write input: {e}")))?;
    drop(stdin);

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| crashed(manifest, "child stdout unavailable".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| crashed(manifest, "child stderr unavailable".into()))?;

    let stdout_task = tokio::spawn(async move {
        let mut buffer = Vec::new();
        stdout.read_to_end(&mut buffer).await.map(|_| buffer)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buffer = Vec::new();
        stderr.read_to_end(&mut buffer).await.map(|_| buffer)
    });

    let timeout = Duration::from_secs(manifest.timeout_secs);
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(waited) => {
            waited.map_err(|e| crashed(manifest, format!("failed waiting for child: {e}")))?
        }
        Err(_) => {
            // SIGKILL-equivalent; the child is reaped before we return.
            let _ = child.start_kill();
            let _ = child.wait().await;
            error!(tool = %manifest.name, timeout_secs = manifest.timeout_secs, "sandbox timeout");
            return Err(AriaError::Tool(ToolError::Timeout {
                tool: manifest.name.clone(),
                timeout_secs: manifest.timeout_secs,
            }));
        }
    };

    let stdout_bytes = stdout_task
        .await
        .map_err(|e| crashed(manifest, format!("stdout reader failed: {e}")))?
        .map_err(|e| crashed(manifest, format!("stdout read failed: {e}")))?;
    let stderr_bytes = stderr_task
        .await
        .map_err(|e| crashed(manifest, format!("stderr reader failed: {e}")))?
        .map_err(|e| crashed(manifest, format!("stderr read failed: {e}")))?;
    let stderr_text = String::from_utf8_lossy(&stderr_bytes);

    if !status.success() {
        let snippet: String = stderr_text.chars().take(STDERR_SNIPPET_LEN).collect();
        error!(tool = %manifest.name, status = %status, "sandbox crash");
        return Err(crashed(
            manifest,
            format!("exited with {status}: {}", snippet.trim()),
        ));
    }

    let stdout_text = String::from_utf8(stdout_bytes)
        .map_err(|e| crashed(manifest, format!("non-utf8 stdout: {e}")))?;
    let reply: ReplyEnvelope = serde_json::from_str(stdout_text.trim()).map_err(|e| {
        crashed(
            manifest,
            format!("malformed reply: {e}; stderr='{}'", stderr_text.trim()),
        )
    })?;

    if !reply.ok {
        return Err(crashed(
            manifest,
            reply.error.unwrap_or_else(|| "unknown tool error".into()),
        ));
    }

    let data = reply.data.unwrap_or(serde_json::Value::Object(Default::default()));
    tool.validate_output(&data).map_err(AriaError::Tool)?;

    let duration_ms = started.elapsed().as_millis() as u64;
    info!(
        tool = %manifest.name,
        duration_ms,
        "sandbox finished"
    );

    Ok(SandboxOutcome {
        record: InvocationRecord {
            tool_name: manifest.name.clone(),
            input: arguments.clone(),
            output: ToolOutput::Success(data.clone()),
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            exit_status: status.code(),
        },
        data,
    })
}

/// Canonicalize every manifest-marked path field and test allowlist
/// membership. Runs before the child process exists.
fn enforce_path_policy(
    tool: &RegisteredTool,
    arguments: &serde_json::Value,
) -> Result<(), AriaError> {
    let manifest = &tool.manifest;
    if manifest.path_fields.is_empty() || manifest.allowed_paths.is_empty() {
        return Ok(());
    }

    for field in &manifest.path_fields {
        let Some(value) = arguments.get(field) else {
            continue;
        };
        let Some(raw) = value.as_str() else {
            continue;
        };
        let resolved = path_policy::resolve_path(raw).map_err(AriaError::Security)?;
        path_policy::ensure_allowed(raw, &resolved, &manifest.allowed_paths)
            .map_err(AriaError::Security)?;
    }
    Ok(())
}

fn crashed(manifest: &aria_core::manifest::ToolManifest, message: String) -> AriaError {
    AriaError::Tool(ToolError::Crashed {
        tool: manifest.name.clone(),
        message,
    })
}
