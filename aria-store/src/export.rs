use std::str::FromStr;

use aria_core::audit::AuditRecord;
use aria_core::error::{AriaError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
}

impl FromStr for ExportFormat {
    type Err = AriaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(AriaError::Config(format!(
                "export format must be json|text, got '{other}'"
            ))),
        }
    }
}

pub(crate) fn render(records: &[AuditRecord], format: ExportFormat) -> Result<Vec<u8>, AriaError> {
    match format {
        ExportFormat::Json => serde_json::to_vec_pretty(records)
            .map_err(|e| AriaError::Store(StoreError::Corruption(e.to_string()))),
        ExportFormat::Text => Ok(render_text(records).into_bytes()),
    }
}

fn render_text(records: &[AuditRecord]) -> String {
    let mut out = String::new();
    match records.first() {
        Some(first) => {
            out.push_str(&format!(
                "audit trail for session {} ({} records)\n",
                first.session_id,
                records.len()
            ));
        }
        None => out.push_str("no audit records\n"),
    }

    for record in records {
        out.push_str(&format!(
            "[{:>4}] {} {:<16} hash={} prev={} {}\n",
            record.seq,
            record.ts.to_rfc3339(),
            record.kind.as_str(),
            fragment(&record.hash),
            fragment(&record.prev_hash),
            record.payload
        ));
    }
    out
}

fn fragment(hash: &[u8]) -> String {
    hex::encode(&hash[..hash.len().min(4)])
}
