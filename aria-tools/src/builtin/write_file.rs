use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use aria_core::manifest::{ToolManifest, ToolPermission};

pub fn manifest(workspace_dir: &Path) -> ToolManifest {
    ToolManifest {
        name: "write_file".into(),
        version: "1.0.0".into(),
        description: "Write text content to a file within the allowed workspace.".into(),
        permissions: BTreeSet::from([ToolPermission::FilesystemWrite]),
        allowed_paths: vec![workspace_dir.to_path_buf()],
        path_fields: vec!["path".into()],
        timeout_secs: 10,
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1, "maxLength": 4096},
                "content": {"type": "string"},
                "mode": {"type": "string", "enum": ["overwrite", "append"]},
                "create_dirs": {"type": "boolean"},
            },
            "required": ["path", "content"],
            "additionalProperties": false,
        }),
        output_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "bytes_written": {"type": "integer"},
                "mode": {"type": "string"},
            },
            "required": ["path", "bytes_written", "mode"],
            "additionalProperties": false,
        }),
        entry: vec![],
    }
}

pub fn execute(input: &serde_json::Value) -> Result<serde_json::Value, String> {
    let path = input
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or("missing 'path'")?;
    let content = input
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or("missing 'content'")?;
    let mode = input
        .get("mode")
        .and_then(|v| v.as_str())
        .unwrap_or("overwrite");
    let create_dirs = input
        .get("create_dirs")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let target = Path::new(path);
    if let Some(parent) = target.parent() {
        if create_dirs {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create '{}': {e}", parent.display()))?;
        } else if !parent.exists() {
            return Err(format!("parent dir does not exist: '{}'", parent.display()));
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .append(mode == "append")
        .truncate(mode != "append")
        .open(target)
        .map_err(|e| format!("cannot open '{path}': {e}"))?;
    file.write_all(content.as_bytes())
        .map_err(|e| format!("cannot write '{path}': {e}"))?;

    Ok(serde_json::json!({
        "path": path,
        "bytes_written": content.len(),
        "mode": mode,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("out.txt");
        let path = file.to_str().expect("utf8");

        let out = execute(&serde_json::json!({"path": path, "content": "first"}))
            .expect("execute");
        assert_eq!(out["bytes_written"], 5);
        assert_eq!(std::fs::read_to_string(&file).expect("read"), "first");

        execute(&serde_json::json!({"path": path, "content": "second"})).expect("execute");
        assert_eq!(std::fs::read_to_string(&file).expect("read"), "second");
    }

    #[test]
    fn appends_when_requested() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("log.txt");
        let path = file.to_str().expect("utf8");

        execute(&serde_json::json!({"path": path, "content": "a"})).expect("execute");
        execute(&serde_json::json!({"path": path, "content": "b", "mode": "append"}))
            .expect("execute");
        assert_eq!(std::fs::read_to_string(&file).expect("read"), "ab");
    }

    #[test]
    fn missing_parent_is_an_error_without_create_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("missing/out.txt");
        let path = file.to_str().expect("utf8");

        let err = execute(&serde_json::json!({"path": path, "content": "x"}))
            .expect_err("missing parent");
        assert!(err.contains("parent dir does not exist"));

        execute(&serde_json::json!({"path": path, "content": "x", "create_dirs": true}))
            .expect("create_dirs");
        assert_eq!(std::fs::read_to_string(&file).expect("read"), "x");
    }
}
