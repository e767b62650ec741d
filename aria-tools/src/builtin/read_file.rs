use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use aria_core::manifest::{ToolManifest, ToolPermission};

const DEFAULT_MAX_BYTES: u64 = 1_048_576;

pub fn manifest(workspace_dir: &Path) -> ToolManifest {
    ToolManifest {
        name: "read_file".into(),
        version: "1.0.0".into(),
        description: "Read the text contents of a file within the allowed workspace.".into(),
        permissions: BTreeSet::from([ToolPermission::FilesystemRead]),
        allowed_paths: vec![workspace_dir.to_path_buf()],
        path_fields: vec!["path".into()],
        timeout_secs: 10,
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1, "maxLength": 4096},
                "max_bytes": {"type": "integer", "minimum": 1, "maximum": 10485760},
            },
            "required": ["path"],
            "additionalProperties": false,
        }),
        output_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "size_bytes": {"type": "integer"},
                "truncated": {"type": "boolean"},
            },
            "required": ["content", "size_bytes", "truncated"],
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
    let max_bytes = input
        .get("max_bytes")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_MAX_BYTES);

    let metadata = std::fs::metadata(path).map_err(|e| format!("cannot stat '{path}': {e}"))?;
    if !metadata.is_file() {
        return Err(format!("not a regular file: '{path}'"));
    }
    let size_bytes = metadata.len();

    let file = std::fs::File::open(path).map_err(|e| format!("cannot open '{path}': {e}"))?;
    let mut buffer = Vec::new();
    file.take(max_bytes)
        .read_to_end(&mut buffer)
        .map_err(|e| format!("cannot read '{path}': {e}"))?;
    let content = String::from_utf8_lossy(&buffer).into_owned();

    Ok(serde_json::json!({
        "content": content,
        "size_bytes": size_bytes,
        "truncated": size_bytes > max_bytes,
    }))
}
