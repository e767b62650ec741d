use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::session::SessionId;

pub const HASH_LEN: usize = 32;

/// Closed set of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    SessionStart,
    StateTransition,
    ModelRequest,
    ModelResponse,
    ToolCall,
    ToolResult,
    BudgetCheck,
    Error,
    SessionEnd,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "SESSION_START",
            Self::StateTransition => "STATE_TRANSITION",
            Self::ModelRequest => "MODEL_REQUEST",
            Self::ModelResponse => "MODEL_RESPONSE",
            Self::ToolCall => "TOOL_CALL",
            Self::ToolResult => "TOOL_RESULT",
            Self::BudgetCheck => "BUDGET_CHECK",
            Self::Error => "ERROR",
            Self::SessionEnd => "SESSION_END",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SESSION_START" => Some(Self::SessionStart),
            "STATE_TRANSITION" => Some(Self::StateTransition),
            "MODEL_REQUEST" => Some(Self::ModelRequest),
            "MODEL_RESPONSE" => Some(Self::ModelResponse),
            "TOOL_CALL" => Some(Self::ToolCall),
            "TOOL_RESULT" => Some(Self::ToolResult),
            "BUDGET_CHECK" => Some(Self::BudgetCheck),
            "ERROR" => Some(Self::Error),
            "SESSION_END" => Some(Self::SessionEnd),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hash-chained entry in a session's audit log.
///
/// Invariant: for seq n > 0, `prev_hash` equals the hash of the record at
/// seq n-1 in the same session; `hash` is SHA-256 over the canonical
/// serialization of (session_id, seq, kind, payload, prev_hash). Timestamps
/// are recorded but deliberately excluded from the hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub session_id: SessionId,
    pub seq: i64,
    pub kind: AuditKind,
    pub payload: serde_json::Value,
    pub ts: DateTime<Utc>,
    #[serde(with = "hex_bytes")]
    pub prev_hash: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub hash: Vec<u8>,
}

impl AuditRecord {
    /// Recompute the hash from stored fields and compare.
    pub fn hash_matches(&self) -> bool {
        chain_hash(&self.session_id, self.seq, self.kind, &self.payload, &self.prev_hash)
            .as_slice()
            == self.hash.as_slice()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash input for a record: the canonical JSON array
/// `[session_id, seq, kind, payload, hex(prev_hash)]`.
pub fn chain_hash(
    session_id: &SessionId,
    seq: i64,
    kind: AuditKind,
    payload: &serde_json::Value,
    prev_hash: &[u8],
) -> [u8; HASH_LEN] {
    let mut buf = String::new();
    buf.push('[');
    push_json_string(&session_id.to_string(), &mut buf);
    buf.push(',');
    buf.push_str(&seq.to_string());
    buf.push(',');
    push_json_string(kind.as_str(), &mut buf);
    buf.push(',');
    write_canonical(payload, &mut buf);
    buf.push(',');
    push_json_string(&hex::encode(prev_hash), &mut buf);
    buf.push(']');

    let mut hasher = Sha256::new();
    hasher.update(buf.as_bytes());
    hasher.finalize().into()
}

/// Canonical JSON: object keys sorted, no insignificant whitespace,
/// serde_json's shortest round-trip number rendering.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::String(s) => push_json_string(s, out),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_json_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn push_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
