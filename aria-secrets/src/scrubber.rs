use aho_corasick::AhoCorasick;
use base64::Engine;
use regex::Regex;

use crate::SecretError;

const REDACTED: &str = "[REDACTED]";
const MIN_PATTERN_LEN: usize = 8;

/// Payload key names whose values are redacted wholesale.
const SECRET_KEY_MARKERS: &[&str] = &[
    "api_key",
    "apikey",
    "secret",
    "password",
    "token",
    "authorization",
    "auth",
    "credential",
    "private_key",
    "access_key",
];

/// Redacts sensitive material from anything bound for persistence or logs.
///
/// Three layers: an Aho-Corasick automaton over every registered secret
/// value (raw, base64, and URL-encoded variants), a regex for common API-key
/// shapes, and key-name redaction for secret-shaped payload keys.
pub struct Scrubber {
    automaton: AhoCorasick,
    replacements: Vec<String>,
    api_key_re: Regex,
}

impl Scrubber {
    /// Build from registered (id, value) pairs. Values shorter than
    /// 8 characters are skipped to avoid redacting ordinary text.
    pub fn build(secrets: &[(String, String)]) -> Result<Self, SecretError> {
        let mut patterns: Vec<String> = Vec::new();
        let mut replacements: Vec<String> = Vec::new();

        for (id, value) in secrets {
            if value.len() < MIN_PATTERN_LEN {
                continue;
            }
            let marker = format!("[REDACTED:{id}]");

            patterns.push(value.clone());
            replacements.push(marker.clone());

            let b64 = base64::engine::general_purpose::STANDARD.encode(value.as_bytes());
            patterns.push(b64);
            replacements.push(marker.clone());

            let url_encoded = urlencoding::encode(value).into_owned();
            if url_encoded != *value {
                patterns.push(url_encoded);
                replacements.push(marker);
            }
        }

        let automaton = AhoCorasick::new(&patterns)
            .map_err(|e| SecretError::ScrubberBuild(e.to_string()))?;
        let api_key_re =
            Regex::new(r"(sk-ant-[A-Za-z0-9_\-]{20,}|sk-[A-Za-z0-9_\-]{20,}|Bearer [A-Za-z0-9._\-]{20,})")
                .map_err(|e| SecretError::ScrubberBuild(e.to_string()))?;

        Ok(Self {
            automaton,
            replacements,
            api_key_re,
        })
    }

    /// A scrubber with no registered secrets; pattern layers still apply.
    pub fn empty() -> Result<Self, SecretError> {
        Self::build(&[])
    }

    pub fn scrub_text(&self, text: &str) -> String {
        let replaced = self.automaton.replace_all(text, &self.replacements);
        self.api_key_re.replace_all(&replaced, REDACTED).into_owned()
    }

    /// Recursively scrub a JSON payload: secret-shaped keys are replaced
    /// wholesale, every string value goes through the text layers.
    pub fn scrub_value(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.scrub_text(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.scrub_value(v)).collect())
            }
            serde_json::Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    if is_secret_key(key) {
                        out.insert(key.clone(), serde_json::Value::String(REDACTED.into()));
                    } else {
                        out.insert(key.clone(), self.scrub_value(v));
                    }
                }
                serde_json::Value::Object(out)
            }
            other => other.clone(),
        }
    }
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_KEY_MARKERS.iter().any(|marker| lower.contains(marker))
}
