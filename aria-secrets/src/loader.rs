use std::collections::BTreeMap;

use crate::SecretError;

const MIN_SECRET_LEN: usize = 8;

/// Env-backed secrets loader. Every value it hands out is remembered so the
/// scrubber can be built over the full set of known secrets.
#[derive(Debug, Default)]
pub struct SecretsLoader {
    loaded: BTreeMap<String, String>,
}

impl SecretsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a required secret. Short values are rejected as likely
    /// placeholders.
    pub fn require(&mut self, env_key: &str) -> Result<String, SecretError> {
        if let Some(value) = self.loaded.get(env_key) {
            return Ok(value.clone());
        }
        let value = std::env::var(env_key)
            .map_err(|_| SecretError::NotFound(env_key.to_string()))?;
        let value = value.trim().to_string();
        if value.len() < MIN_SECRET_LEN {
            return Err(SecretError::Invalid {
                key: env_key.to_string(),
                reason: format!("length {} < {MIN_SECRET_LEN}", value.len()),
            });
        }
        self.loaded.insert(env_key.to_string(), value.clone());
        Ok(value)
    }

    pub fn optional(&mut self, env_key: &str) -> Option<String> {
        if let Some(value) = self.loaded.get(env_key) {
            return Some(value.clone());
        }
        let value = std::env::var(env_key).ok()?.trim().to_string();
        if value.is_empty() {
            return None;
        }
        self.loaded.insert(env_key.to_string(), value.clone());
        Some(value)
    }

    /// (id, value) pairs for scrubber construction.
    pub fn known_secrets(&self) -> Vec<(String, String)> {
        self.loaded
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
