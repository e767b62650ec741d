use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

const MIN_DESCRIPTION_LEN: usize = 10;
const MAX_NAME_LEN: usize = 64;
const MAX_TIMEOUT_SECS: u64 = 300;

/// Closed set of capabilities a tool may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPermission {
    None,
    FilesystemRead,
    FilesystemWrite,
    Network,
    Subprocess,
}

impl ToolPermission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FilesystemRead => "filesystem_read",
            Self::FilesystemWrite => "filesystem_write",
            Self::Network => "network",
            Self::Subprocess => "subprocess",
        }
    }
}

impl std::fmt::Display for ToolPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of a tool: schemas, permissions, paths, timeout.
/// Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub version: String,
    /// Injected into the model prompt.
    pub description: String,
    #[serde(default)]
    pub permissions: BTreeSet<ToolPermission>,
    /// Absolute path prefixes the tool may touch. Only meaningful with a
    /// filesystem permission.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    /// Names of input properties that are filesystem paths and subject to
    /// the allowlist.
    #[serde(default)]
    pub path_fields: Vec<String>,
    pub timeout_secs: u64,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    /// Child process argv for plugin tools. Empty for builtins, whose argv
    /// the registry supplies.
    #[serde(default)]
    pub entry: Vec<String>,
}

impl ToolManifest {
    /// Structural validation. Schema well-formedness is checked separately,
    /// where the validators are compiled.
    pub fn validate(&self) -> Result<(), ToolError> {
        if !valid_tool_name(&self.name) {
            return Err(ToolError::ManifestInvalid {
                reason: format!(
                    "tool name '{}' must be [a-z][a-z0-9_]{{1,{}}}",
                    self.name,
                    MAX_NAME_LEN - 1
                ),
            });
        }
        if semver::Version::parse(&self.version).is_err() {
            return Err(ToolError::ManifestInvalid {
                reason: format!("version '{}' is not valid semver", self.version),
            });
        }
        if self.description.len() < MIN_DESCRIPTION_LEN {
            return Err(ToolError::ManifestInvalid {
                reason: format!("description must be at least {MIN_DESCRIPTION_LEN} characters"),
            });
        }
        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ToolError::ManifestInvalid {
                reason: format!("timeout_secs must be 1-{MAX_TIMEOUT_SECS}"),
            });
        }
        for path in &self.allowed_paths {
            if !path.is_absolute() {
                return Err(ToolError::ManifestInvalid {
                    reason: format!("allowed_paths entries must be absolute, got '{}'", path.display()),
                });
            }
        }
        if !self.input_schema.is_object() || !self.output_schema.is_object() {
            return Err(ToolError::ManifestInvalid {
                reason: "input_schema and output_schema must be objects".into(),
            });
        }
        Ok(())
    }

    pub fn has_filesystem_permission(&self) -> bool {
        self.permissions.contains(&ToolPermission::FilesystemRead)
            || self.permissions.contains(&ToolPermission::FilesystemWrite)
    }
}

fn valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    if name.len() < 2 || name.len() > MAX_NAME_LEN {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
