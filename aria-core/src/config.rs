use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AriaError;
use crate::manifest::ToolPermission;

/// Which optional audit records the kernel emits.
///
/// `Minimal` records only the events that change the outcome of a session;
/// `Verbose` additionally records MODEL_REQUEST digests, STATE_TRANSITIONs,
/// and passing BUDGET_CHECKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditVerbosity {
    #[default]
    Minimal,
    Verbose,
}

/// Runtime configuration, resolved from the environment by the composition
/// root and treated as immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    pub primary_provider: String,
    pub primary_model: String,
    pub fallback_provider: Option<String>,
    pub fallback_model: Option<String>,
    pub max_steps: u32,
    pub max_cost_usd: f64,
    pub max_context_tokens: u32,
    pub allowed_permissions: BTreeSet<ToolPermission>,
    pub plugin_dirs: Vec<PathBuf>,
    pub workspace_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub log_level: String,
    pub audit_verbosity: AuditVerbosity,
    pub ollama_base_url: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            primary_provider: "ollama".into(),
            primary_model: "tinyllama".into(),
            fallback_provider: None,
            fallback_model: None,
            max_steps: 20,
            max_cost_usd: 1.0,
            max_context_tokens: 80_000,
            allowed_permissions: BTreeSet::from([
                ToolPermission::None,
                ToolPermission::FilesystemRead,
                ToolPermission::FilesystemWrite,
            ]),
            plugin_dirs: Vec::new(),
            workspace_dir: home_relative(".aria/workspace"),
            db_path: home_relative(".aria/aria.db"),
            log_path: home_relative(".aria/logs/aria.jsonl"),
            log_level: "INFO".into(),
            audit_verbosity: AuditVerbosity::Minimal,
            ollama_base_url: "http://localhost:11434".into(),
        }
    }
}

impl KernelConfig {
    pub fn from_env() -> Result<Self, AriaError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. `from_env` is the production
    /// path; tests inject their own lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AriaError> {
        let mut config = Self::default();

        if let Some(v) = lookup("ARIA_PRIMARY_PROVIDER") {
            config.primary_provider = v;
        }
        if let Some(v) = lookup("ARIA_PRIMARY_MODEL") {
            config.primary_model = v;
        }
        config.fallback_provider = lookup("ARIA_FALLBACK_PROVIDER");
        config.fallback_model = lookup("ARIA_FALLBACK_MODEL");

        if let Some(v) = lookup("ARIA_MAX_STEPS") {
            config.max_steps = parse_positive_int(&v, "ARIA_MAX_STEPS")?;
        }
        if let Some(v) = lookup("ARIA_MAX_COST_USD") {
            config.max_cost_usd = parse_non_negative_real(&v, "ARIA_MAX_COST_USD")?;
        }
        if let Some(v) = lookup("ARIA_MAX_CONTEXT_TOKENS") {
            config.max_context_tokens = parse_positive_int(&v, "ARIA_MAX_CONTEXT_TOKENS")?;
        }
        if let Some(v) = lookup("ARIA_PLUGIN_DIRS") {
            config.plugin_dirs = v
                .split(':')
                .filter(|part| !part.is_empty())
                .map(|part| expand_tilde(part))
                .collect();
        }
        if let Some(v) = lookup("ARIA_WORKSPACE_DIR") {
            config.workspace_dir = expand_tilde(&v);
        }
        if let Some(v) = lookup("ARIA_DB_PATH") {
            config.db_path = expand_tilde(&v);
        }
        if let Some(v) = lookup("ARIA_LOG_PATH") {
            config.log_path = expand_tilde(&v);
        }
        if let Some(v) = lookup("ARIA_LOG_LEVEL") {
            match v.as_str() {
                "DEBUG" | "INFO" | "WARN" | "ERROR" => config.log_level = v,
                other => {
                    return Err(AriaError::Config(format!(
                        "ARIA_LOG_LEVEL must be DEBUG|INFO|WARN|ERROR, got '{other}'"
                    )))
                }
            }
        }
        if let Some(v) = lookup("ARIA_AUDIT_VERBOSITY") {
            config.audit_verbosity = match v.as_str() {
                "minimal" => AuditVerbosity::Minimal,
                "verbose" => AuditVerbosity::Verbose,
                other => {
                    return Err(AriaError::Config(format!(
                        "ARIA_AUDIT_VERBOSITY must be minimal|verbose, got '{other}'"
                    )))
                }
            };
        }
        if let Some(v) = lookup("OLLAMA_BASE_URL") {
            config.ollama_base_url = v;
        }

        Ok(config)
    }
}

fn parse_positive_int(value: &str, var: &str) -> Result<u32, AriaError> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AriaError::Config(format!(
            "{var} must be a positive integer, got '{value}'"
        ))),
    }
}

fn parse_non_negative_real(value: &str, var: &str) -> Result<f64, AriaError> {
    match value.parse::<f64>() {
        Ok(n) if n >= 0.0 && n.is_finite() => Ok(n),
        _ => Err(AriaError::Config(format!(
            "{var} must be a non-negative number, got '{value}'"
        ))),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_relative(rest: &str) -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => PathBuf::from(rest),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_apply_with_empty_environment() {
        let config = KernelConfig::from_lookup(|_| None).expect("defaults");
        assert_eq!(config.primary_provider, "ollama");
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.max_cost_usd, 1.0);
        assert_eq!(config.audit_verbosity, AuditVerbosity::Minimal);
        assert!(config
            .allowed_permissions
            .contains(&ToolPermission::FilesystemRead));
        assert!(!config
            .allowed_permissions
            .contains(&ToolPermission::Network));
    }

    #[test]
    fn environment_overrides_are_parsed() {
        let config = KernelConfig::from_lookup(lookup_from(&[
            ("ARIA_PRIMARY_PROVIDER", "anthropic"),
            ("ARIA_PRIMARY_MODEL", "claude-sonnet-4-6"),
            ("ARIA_MAX_STEPS", "7"),
            ("ARIA_MAX_COST_USD", "0.25"),
            ("ARIA_DB_PATH", "/var/lib/aria/aria.db"),
            ("ARIA_PLUGIN_DIRS", "/opt/aria/plugins:/usr/share/aria"),
            ("ARIA_AUDIT_VERBOSITY", "verbose"),
        ]))
        .expect("parse");

        assert_eq!(config.primary_provider, "anthropic");
        assert_eq!(config.primary_model, "claude-sonnet-4-6");
        assert_eq!(config.max_steps, 7);
        assert_eq!(config.max_cost_usd, 0.25);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/aria/aria.db"));
        assert_eq!(config.plugin_dirs.len(), 2);
        assert_eq!(config.audit_verbosity, AuditVerbosity::Verbose);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(KernelConfig::from_lookup(lookup_from(&[("ARIA_MAX_STEPS", "0")])).is_err());
        assert!(KernelConfig::from_lookup(lookup_from(&[("ARIA_MAX_STEPS", "ten")])).is_err());
        assert!(
            KernelConfig::from_lookup(lookup_from(&[("ARIA_MAX_COST_USD", "-1.0")])).is_err()
        );
    }

    #[test]
    fn invalid_enums_are_rejected() {
        assert!(KernelConfig::from_lookup(lookup_from(&[("ARIA_LOG_LEVEL", "TRACE")])).is_err());
        assert!(
            KernelConfig::from_lookup(lookup_from(&[("ARIA_AUDIT_VERBOSITY", "loud")])).is_err()
        );
    }
}
