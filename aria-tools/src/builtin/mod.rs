//! Builtin tools. They run out-of-process like every other tool: the
//! sandbox re-invokes the host binary in its hidden builtin-exec mode, which
//! calls [`run_builtin_stdio`] to speak the sandbox pipe protocol.

mod read_file;
mod write_file;

use std::path::Path;

use aria_core::manifest::ToolManifest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub fn builtin_manifests(workspace_dir: &Path) -> Vec<ToolManifest> {
    vec![
        read_file::manifest(workspace_dir),
        write_file::manifest(workspace_dir),
    ]
}

pub fn execute_builtin(name: &str, input: &serde_json::Value) -> Result<serde_json::Value, String> {
    match name {
        "read_file" => read_file::execute(input),
        "write_file" => write_file::execute(input),
        other => Err(format!("unknown builtin tool '{other}'")),
    }
}

/// Entry point for the hidden CLI mode: read the payload envelope from
/// stdin, execute, and reply on stdout. Failures are structured replies,
/// never a non-zero exit; the parent classifies them.
pub async fn run_builtin_stdio(name: &str) -> i32 {
    let mut raw = Vec::new();
    if tokio::io::stdin().read_to_end(&mut raw).await.is_err() {
        print_reply(Err("failed to read stdin".into())).await;
        return 0;
    }

    let reply = serde_json::from_slice::<serde_json::Value>(&raw)
        .map_err(|e| format!("malformed payload: {e}"))
        .and_then(|payload| {
            let input = payload.get("input").cloned().unwrap_or_default();
            execute_builtin(name, &input)
        });

    print_reply(reply).await;
    0
}

async fn print_reply(result: Result<serde_json::Value, String>) {
    let envelope = match result {
        Ok(data) => serde_json::json!({"ok": true, "data": data, "error": null}),
        Err(error) => serde_json::json!({"ok": false, "data": null, "error": error}),
    };
    let mut line = envelope.to_string();
    line.push('\n');
    let _ = tokio::io::stdout().write_all(line.as_bytes()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifests_are_valid_and_workspace_scoped() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let manifests = builtin_manifests(workspace.path());
        assert_eq!(manifests.len(), 2);
        for manifest in &manifests {
            manifest.validate().expect("builtin manifest must validate");
            assert_eq!(manifest.allowed_paths, vec![workspace.path().to_path_buf()]);
            assert_eq!(manifest.path_fields, vec!["path".to_string()]);
        }
    }

    #[test]
    fn unknown_builtin_is_an_error() {
        let err = execute_builtin("no_such_tool", &serde_json::json!({})).expect_err("unknown");
        assert!(err.contains("no_such_tool"));
    }
}
