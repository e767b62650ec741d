use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use jsonschema::Validator;
use tracing::{info, warn};

use aria_core::error::{AriaError, ToolError};
use aria_core::manifest::{ToolManifest, ToolPermission};

use crate::builtin;

/// A manifest plus everything compiled from it at registration time.
pub struct RegisteredTool {
    pub manifest: ToolManifest,
    /// Child process argv. Never passed through a shell.
    pub argv: Vec<String>,
    input_validator: Validator,
    output_validator: Validator,
}

impl RegisteredTool {
    pub fn validate_input(&self, arguments: &serde_json::Value) -> Result<(), ToolError> {
        let errors: Vec<String> = self
            .input_validator
            .iter_errors(arguments)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ToolError::InputValidation {
                tool: self.manifest.name.clone(),
                reason: errors.join("; "),
            })
        }
    }

    pub fn validate_output(&self, data: &serde_json::Value) -> Result<(), ToolError> {
        let errors: Vec<String> = self
            .output_validator
            .iter_errors(data)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ToolError::OutputValidation {
                tool: self.manifest.name.clone(),
                reason: errors.join("; "),
            })
        }
    }
}

/// Immutable-after-load registry of tool manifests. Duplicate or invalid
/// manifests are rejected; tools registered earlier stay usable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, manifest: ToolManifest, argv: Vec<String>) -> Result<(), AriaError> {
        manifest.validate().map_err(AriaError::Tool)?;

        if argv.is_empty() {
            return Err(AriaError::Tool(ToolError::ManifestInvalid {
                reason: format!("tool '{}' has an empty entry", manifest.name),
            }));
        }
        if self.tools.contains_key(&manifest.name) {
            return Err(AriaError::Tool(ToolError::ManifestInvalid {
                reason: format!("duplicate tool name '{}'", manifest.name),
            }));
        }

        let input_validator = jsonschema::validator_for(&manifest.input_schema).map_err(|e| {
            AriaError::Tool(ToolError::ManifestInvalid {
                reason: format!("tool '{}' input_schema is malformed: {e}", manifest.name),
            })
        })?;
        let output_validator = jsonschema::validator_for(&manifest.output_schema).map_err(|e| {
            AriaError::Tool(ToolError::ManifestInvalid {
                reason: format!("tool '{}' output_schema is malformed: {e}", manifest.name),
            })
        })?;

        info!(tool = %manifest.name, version = %manifest.version, "tool registered");
        self.tools.insert(
            manifest.name.clone(),
            RegisteredTool {
                manifest,
                argv,
                input_validator,
                output_validator,
            },
        );
        Ok(())
    }

    /// Register the builtin tools, executed by re-invoking `runner` in its
    /// hidden builtin-exec mode. Their path allowlist is the workspace dir.
    pub fn register_builtins(
        &mut self,
        runner: &Path,
        workspace_dir: &Path,
    ) -> Result<(), AriaError> {
        for manifest in builtin::builtin_manifests(workspace_dir) {
            let argv = vec![
                runner.to_string_lossy().into_owned(),
                "builtin-exec".to_string(),
                manifest.name.clone(),
            ];
            self.register(manifest, argv)?;
        }
        Ok(())
    }

    /// Scan a plugin directory for `*.json` manifests. Invalid candidates
    /// are rejected and reported; loading continues.
    pub fn load_plugin_dir(&mut self, dir: &Path) -> Vec<(PathBuf, AriaError)> {
        let mut rejected = Vec::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                rejected.push((
                    dir.to_path_buf(),
                    AriaError::Tool(ToolError::ManifestInvalid {
                        reason: format!("plugin dir '{}' unreadable: {e}", dir.display()),
                    }),
                ));
                return rejected;
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        candidates.sort();

        for path in candidates {
            if let Err(err) = self.load_manifest_file(&path) {
                warn!(path = %path.display(), error = %err, "plugin rejected");
                rejected.push((path, err));
            }
        }
        rejected
    }

    fn load_manifest_file(&mut self, path: &Path) -> Result<(), AriaError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AriaError::Tool(ToolError::ManifestInvalid {
                reason: format!("cannot read '{}': {e}", path.display()),
            })
        })?;
        let manifest: ToolManifest = serde_json::from_str(&raw).map_err(|e| {
            AriaError::Tool(ToolError::ManifestInvalid {
                reason: format!("cannot parse '{}': {e}", path.display()),
            })
        })?;

        if manifest.entry.is_empty() {
            return Err(AriaError::Tool(ToolError::ManifestInvalid {
                reason: format!("plugin '{}' declares no entry", path.display()),
            }));
        }

        // A relative entry program is resolved against the plugin dir.
        let mut argv = manifest.entry.clone();
        let program = Path::new(&argv[0]);
        if program.is_relative() {
            if let Some(parent) = path.parent() {
                argv[0] = parent.join(program).to_string_lossy().into_owned();
            }
        }

        self.register(manifest, argv)
    }

    pub fn get(&self, name: &str) -> Result<&RegisteredTool, ToolError> {
        self.tools.get(name).ok_or_else(|| ToolError::Unknown {
            tool: name.to_string(),
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn manifests(&self) -> Vec<&ToolManifest> {
        self.tools.values().map(|tool| &tool.manifest).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Permissions declared by a manifest but not granted to the session.
    pub fn missing_permissions(
        manifest: &ToolManifest,
        granted: &std::collections::BTreeSet<ToolPermission>,
    ) -> Vec<ToolPermission> {
        manifest
            .permissions
            .iter()
            .filter(|p| !granted.contains(p))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn manifest(name: &str) -> ToolManifest {
        ToolManifest {
            name: name.into(),
            version: "1.0.0".into(),
            description: "A tool used only in registry tests.".into(),
            permissions: BTreeSet::from([ToolPermission::None]),
            allowed_paths: vec![],
            path_fields: vec![],
            timeout_secs: 5,
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"q": {"type": "string"}},
                "required": ["q"],
                "additionalProperties": false,
            }),
            output_schema: serde_json::json!({
                "type": "object",
                "properties": {"answer": {"type": "string"}},
                "required": ["answer"],
            }),
            entry: vec![],
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry
            .register(manifest("echo_tool"), vec!["/bin/true".into()])
            .expect("register");

        assert!(registry.has("echo_tool"));
        assert!(registry.get("echo_tool").is_ok());
        assert!(matches!(
            registry.get("missing_tool"),
            Err(ToolError::Unknown { .. })
        ));
        assert_eq!(registry.manifests().len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ToolRegistry::new();
        registry
            .register(manifest("echo_tool"), vec!["/bin/true".into()])
            .expect("first");
        let err = registry
            .register(manifest("echo_tool"), vec!["/bin/true".into()])
            .expect_err("duplicate");
        assert!(matches!(
            err,
            AriaError::Tool(ToolError::ManifestInvalid { .. })
        ));
        // The first registration survives.
        assert!(registry.has("echo_tool"));
    }

    #[test]
    fn malformed_schema_is_rejected() {
        let mut registry = ToolRegistry::new();
        let mut bad = manifest("bad_schema");
        bad.input_schema = serde_json::json!({"type": "not-a-type"});
        assert!(registry.register(bad, vec!["/bin/true".into()]).is_err());
    }

    #[test]
    fn input_and_output_validation() {
        let mut registry = ToolRegistry::new();
        registry
            .register(manifest("echo_tool"), vec!["/bin/true".into()])
            .expect("register");
        let tool = registry.get("echo_tool").expect("present");

        tool.validate_input(&serde_json::json!({"q": "hi"})).expect("valid input");
        assert!(tool.validate_input(&serde_json::json!({"q": 7})).is_err());
        assert!(tool.validate_input(&serde_json::json!({})).is_err());
        assert!(tool
            .validate_input(&serde_json::json!({"q": "hi", "extra": true}))
            .is_err());

        tool.validate_output(&serde_json::json!({"answer": "ok"})).expect("valid output");
        assert!(tool.validate_output(&serde_json::json!({"answer": 1})).is_err());
    }

    #[test]
    fn plugin_dir_loading_keeps_going_past_bad_manifests() {
        let dir = tempfile::tempdir().expect("tempdir");

        let good = manifest("plugin_ok");
        let mut good_json = serde_json::to_value(&good).expect("serialize");
        good_json["entry"] = serde_json::json!(["/bin/true"]);
        std::fs::write(
            dir.path().join("a_good.json"),
            serde_json::to_string(&good_json).expect("render"),
        )
        .expect("write");

        std::fs::write(dir.path().join("b_broken.json"), "{not json").expect("write");

        let mut no_entry = serde_json::to_value(manifest("plugin_no_entry")).expect("serialize");
        no_entry["entry"] = serde_json::json!([]);
        std::fs::write(
            dir.path().join("c_no_entry.json"),
            serde_json::to_string(&no_entry).expect("render"),
        )
        .expect("write");

        let mut registry = ToolRegistry::new();
        let rejected = registry.load_plugin_dir(dir.path());

        assert!(registry.has("plugin_ok"));
        assert!(!registry.has("plugin_no_entry"));
        assert_eq!(rejected.len(), 2);
    }

    #[test]
    fn relative_entry_resolves_against_plugin_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut m = serde_json::to_value(manifest("rel_entry")).expect("serialize");
        m["entry"] = serde_json::json!(["tool.py"]);
        std::fs::write(
            dir.path().join("rel.json"),
            serde_json::to_string(&m).expect("render"),
        )
        .expect("write");

        let mut registry = ToolRegistry::new();
        let rejected = registry.load_plugin_dir(dir.path());
        assert!(rejected.is_empty());
        let tool = registry.get("rel_entry").expect("present");
        assert!(tool.argv[0].starts_with(dir.path().to_str().expect("utf8")));
    }

    #[test]
    fn builtins_register_with_runner_argv() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let mut registry = ToolRegistry::new();
        registry
            .register_builtins(Path::new("/usr/local/bin/aria"), workspace.path())
            .expect("builtins");

        assert!(registry.has("read_file"));
        assert!(registry.has("write_file"));
        let tool = registry.get("read_file").expect("present");
        assert_eq!(tool.argv[1], "builtin-exec");
        assert_eq!(tool.argv[2], "read_file");
        assert_eq!(tool.manifest.allowed_paths, vec![workspace.path().to_path_buf()]);
    }

    #[test]
    fn missing_permissions_are_computed() {
        let mut m = manifest("needs_net");
        m.permissions = BTreeSet::from([ToolPermission::Network, ToolPermission::FilesystemRead]);
        let granted = BTreeSet::from([ToolPermission::FilesystemRead]);
        let missing = ToolRegistry::missing_permissions(&m, &granted);
        assert_eq!(missing, vec![ToolPermission::Network]);
    }
}
