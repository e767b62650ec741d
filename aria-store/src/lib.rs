//! SQLite-backed audit and memory storage.
//!
//! One database file, WAL journaling, two tables: the hash-chained `audit`
//! log and the per-session `memory` KV. Every payload is scrubbed before it
//! is hashed or written; there is no unscrubbed write path.

mod export;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use aria_core::audit::{chain_hash, AuditKind, AuditRecord, HASH_LEN};
use aria_core::error::{AriaError, StoreError};
use aria_core::session::{SessionId, SessionMeta};
use aria_secrets::Scrubber;

pub use export::ExportFormat;

/// Reserved memory key holding the session summary.
const SESSION_META_KEY: &str = "session_meta";
/// Reserved memory key holding the persisted conversation transcript.
pub const CONVERSATION_KEY: &str = "conversation";

/// Outcome of a chain verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Ok,
    BrokenAt(i64),
}

pub struct SqliteStore {
    pool: SqlitePool,
    scrubber: Arc<Scrubber>,
    // Serializes read-head + insert so sequence numbers stay dense even if a
    // future host runs concurrent appenders.
    append_lock: Mutex<()>,
}

#[derive(Debug, FromRow)]
struct AuditRow {
    session_id: String,
    seq: i64,
    kind: String,
    payload_json: String,
    ts: String,
    prev_hash: Vec<u8>,
    hash: Vec<u8>,
}

#[derive(Debug, FromRow)]
struct HeadRow {
    seq: i64,
    hash: Vec<u8>,
}

impl SqliteStore {
    pub async fn open(path: &Path, scrubber: Arc<Scrubber>) -> Result<Self, AriaError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AriaError::Store(StoreError::Corruption(format!(
                    "cannot create database directory '{}': {e}",
                    parent.display()
                )))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| AriaError::Store(StoreError::Corruption(format!("invalid sqlite options: {e}"))))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AriaError::Store(StoreError::Corruption(e.to_string())))?;

        let store = Self {
            pool,
            scrubber,
            append_lock: Mutex::new(()),
        };
        store.migrate().await?;
        info!(db_path = %path.display(), "audit store opened");
        Ok(store)
    }

    /// In-memory store for tests and smoke runs.
    pub async fn in_memory(scrubber: Arc<Scrubber>) -> Result<Self, AriaError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| AriaError::Store(StoreError::Corruption(e.to_string())))?;
        let store = Self {
            pool,
            scrubber,
            append_lock: Mutex::new(()),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), AriaError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit (
                session_id   TEXT NOT NULL,
                seq          INTEGER NOT NULL,
                kind         TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                ts           TEXT NOT NULL,
                prev_hash    BLOB NOT NULL,
                hash         BLOB NOT NULL,
                PRIMARY KEY (session_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AriaError::Store(StoreError::Corruption(e.to_string())))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory (
                session_id TEXT NOT NULL,
                key        TEXT NOT NULL,
                value_json TEXT NOT NULL,
                updated_ts TEXT NOT NULL,
                PRIMARY KEY (session_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AriaError::Store(StoreError::Corruption(e.to_string())))?;

        Ok(())
    }

    // ── Audit ────────────────────────────────────────────────────────────

    /// Append one record to a session's chain. Scrubs the payload, links it
    /// to the current chain head, and commits atomically. Any failure on
    /// this path is an `AuditWriteFailure` and the caller must halt.
    pub async fn append(
        &self,
        session_id: SessionId,
        kind: AuditKind,
        payload: serde_json::Value,
    ) -> Result<i64, AriaError> {
        let _guard = self.append_lock.lock().await;

        let payload = self.scrubber.scrub_value(&payload);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AriaError::Store(StoreError::AuditWriteFailure(e.to_string())))?;

        let head: Option<HeadRow> =
            sqlx::query_as("SELECT seq, hash FROM audit WHERE session_id = ? ORDER BY seq DESC LIMIT 1")
                .bind(session_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| AriaError::Store(StoreError::AuditWriteFailure(e.to_string())))?;

        let (seq, prev_hash) = match head {
            Some(row) => (row.seq + 1, row.hash),
            None => (0, vec![0u8; HASH_LEN]),
        };

        let hash = chain_hash(&session_id, seq, kind, &payload, &prev_hash);
        let ts = Utc::now();

        sqlx::query(
            "INSERT INTO audit (session_id, seq, kind, payload_json, ts, prev_hash, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(seq)
        .bind(kind.as_str())
        .bind(payload.to_string())
        .bind(ts.to_rfc3339())
        .bind(&prev_hash)
        .bind(hash.as_slice())
        .execute(&mut *tx)
        .await
        .map_err(|e| AriaError::Store(StoreError::AuditWriteFailure(e.to_string())))?;

        tx.commit()
            .await
            .map_err(|e| AriaError::Store(StoreError::AuditWriteFailure(e.to_string())))?;

        debug!(session_id = %session_id, seq, kind = %kind, "audit record appended");
        Ok(seq)
    }

    /// All records for a session in sequence order. Callers get copies.
    pub async fn records(&self, session_id: SessionId) -> Result<Vec<AuditRecord>, AriaError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT session_id, seq, kind, payload_json, ts, prev_hash, hash \
             FROM audit WHERE session_id = ? ORDER BY seq",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AriaError::Store(StoreError::Corruption(e.to_string())))?;

        rows.into_iter().map(|row| row.into_record()).collect()
    }

    /// Walk a session's chain, recomputing every hash and checking linkage.
    /// Side-effect free; returns the first offending sequence number.
    pub async fn verify(&self, session_id: SessionId) -> Result<ChainStatus, AriaError> {
        let records = self.records(session_id).await?;
        let mut expected_prev = vec![0u8; HASH_LEN];

        for record in &records {
            if record.prev_hash != expected_prev {
                return Ok(ChainStatus::BrokenAt(record.seq));
            }
            if !record.hash_matches() {
                return Ok(ChainStatus::BrokenAt(record.seq));
            }
            expected_prev = record.hash.clone();
        }
        Ok(ChainStatus::Ok)
    }

    pub async fn export(
        &self,
        session_id: SessionId,
        format: ExportFormat,
    ) -> Result<Vec<u8>, AriaError> {
        let records = self.records(session_id).await?;
        export::render(&records, format)
    }

    // ── Memory ───────────────────────────────────────────────────────────

    pub async fn set_memory(
        &self,
        session_id: SessionId,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), AriaError> {
        let value = self.scrubber.scrub_value(value);
        sqlx::query(
            "INSERT INTO memory (session_id, key, value_json, updated_ts) VALUES (?, ?, ?, ?) \
             ON CONFLICT (session_id, key) DO UPDATE SET value_json = excluded.value_json, \
             updated_ts = excluded.updated_ts",
        )
        .bind(session_id.to_string())
        .bind(key)
        .bind(value.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AriaError::Store(StoreError::AuditWriteFailure(e.to_string())))?;
        Ok(())
    }

    pub async fn get_memory(
        &self,
        session_id: SessionId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, AriaError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value_json FROM memory WHERE session_id = ? AND key = ?")
                .bind(session_id.to_string())
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AriaError::Store(StoreError::Corruption(e.to_string())))?;

        match row {
            Some((json,)) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| AriaError::Store(StoreError::Corruption(format!("bad value_json: {e}")))),
            None => Ok(None),
        }
    }

    pub async fn upsert_session_meta(&self, meta: &SessionMeta) -> Result<(), AriaError> {
        let value = serde_json::to_value(meta)
            .map_err(|e| AriaError::Store(StoreError::AuditWriteFailure(e.to_string())))?;
        self.set_memory(meta.session_id, SESSION_META_KEY, &value).await
    }

    /// Recent sessions, newest first.
    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<SessionMeta>, AriaError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT value_json FROM memory WHERE key = ? ORDER BY updated_ts DESC LIMIT ?",
        )
        .bind(SESSION_META_KEY)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AriaError::Store(StoreError::Corruption(e.to_string())))?;

        Ok(rows
            .into_iter()
            .filter_map(|(json,)| serde_json::from_str(&json).ok())
            .collect())
    }

    /// Test/diagnostic access to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl AuditRow {
    fn into_record(self) -> Result<AuditRecord, AriaError> {
        let session_id: SessionId = self
            .session_id
            .parse()
            .map_err(|e| AriaError::Store(StoreError::Corruption(format!("bad session_id: {e}"))))?;
        let kind = AuditKind::parse(&self.kind).ok_or_else(|| {
            AriaError::Store(StoreError::Corruption(format!("unknown audit kind '{}'", self.kind)))
        })?;
        let payload = serde_json::from_str(&self.payload_json)
            .map_err(|e| AriaError::Store(StoreError::Corruption(format!("bad payload_json: {e}"))))?;
        let ts = DateTime::parse_from_rfc3339(&self.ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AriaError::Store(StoreError::Corruption(format!("bad ts: {e}"))))?;

        Ok(AuditRecord {
            session_id,
            seq: self.seq,
            kind,
            payload,
            ts,
            prev_hash: self.prev_hash,
            hash: self.hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aria_core::session::SessionState;

    async fn store() -> SqliteStore {
        let scrubber = Arc::new(Scrubber::empty().expect("scrubber"));
        SqliteStore::in_memory(scrubber).await.expect("store")
    }

    async fn store_with_secret(id: &str, value: &str) -> SqliteStore {
        let scrubber =
            Arc::new(Scrubber::build(&[(id.to_string(), value.to_string())]).expect("scrubber"));
        SqliteStore::in_memory(scrubber).await.expect("store")
    }

    #[tokio::test]
    async fn append_assigns_dense_sequence_numbers() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();

        for expected in 0..4 {
            let seq = store
                .append(session, AuditKind::BudgetCheck, serde_json::json!({"n": expected}))
                .await
                .expect("append");
            assert_eq!(seq, expected);
        }

        let records = store.records(session).await.expect("records");
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].prev_hash, vec![0u8; HASH_LEN]);
        for pair in records.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].hash);
        }
    }

    #[tokio::test]
    async fn sessions_have_independent_chains() {
        let store = store().await;
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();

        store.append(a, AuditKind::SessionStart, serde_json::json!({})).await.expect("a0");
        store.append(b, AuditKind::SessionStart, serde_json::json!({})).await.expect("b0");
        let seq = store.append(a, AuditKind::SessionEnd, serde_json::json!({})).await.expect("a1");
        assert_eq!(seq, 1);

        assert_eq!(store.verify(a).await.expect("verify"), ChainStatus::Ok);
        assert_eq!(store.verify(b).await.expect("verify"), ChainStatus::Ok);
    }

    #[tokio::test]
    async fn verify_detects_payload_tampering() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();
        for i in 0..5 {
            store
                .append(session, AuditKind::BudgetCheck, serde_json::json!({"step": i}))
                .await
                .expect("append");
        }
        assert_eq!(store.verify(session).await.expect("verify"), ChainStatus::Ok);

        sqlx::query("UPDATE audit SET payload_json = ? WHERE session_id = ? AND seq = 2")
            .bind(r#"{"step":99}"#)
            .bind(session.to_string())
            .execute(store.pool())
            .await
            .expect("tamper");

        assert_eq!(
            store.verify(session).await.expect("verify"),
            ChainStatus::BrokenAt(2)
        );
    }

    #[tokio::test]
    async fn verify_detects_hash_tampering() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();
        for i in 0..3 {
            store
                .append(session, AuditKind::BudgetCheck, serde_json::json!({"step": i}))
                .await
                .expect("append");
        }

        let records = store.records(session).await.expect("records");
        let mut flipped = records[1].hash.clone();
        flipped[0] ^= 0x01;

        sqlx::query("UPDATE audit SET hash = ? WHERE session_id = ? AND seq = 1")
            .bind(&flipped)
            .bind(session.to_string())
            .execute(store.pool())
            .await
            .expect("tamper");

        assert_eq!(
            store.verify(session).await.expect("verify"),
            ChainStatus::BrokenAt(1)
        );
    }

    #[tokio::test]
    async fn verify_empty_session_is_ok() {
        let store = store().await;
        assert_eq!(
            store.verify(uuid::Uuid::new_v4()).await.expect("verify"),
            ChainStatus::Ok
        );
    }

    #[tokio::test]
    async fn payloads_are_scrubbed_before_hashing() {
        let secret = "extremely-secret-value-42";
        let store = store_with_secret("api", secret).await;
        let session = uuid::Uuid::new_v4();

        store
            .append(
                session,
                AuditKind::ToolCall,
                serde_json::json!({"arguments": {"query": format!("use {secret} for auth")}}),
            )
            .await
            .expect("append");

        let records = store.records(session).await.expect("records");
        let rendered = records[0].payload.to_string();
        assert!(!rendered.contains(secret));
        assert!(rendered.contains("[REDACTED:api]"));
        // Hash was computed over the scrubbed payload, so the chain verifies.
        assert_eq!(store.verify(session).await.expect("verify"), ChainStatus::Ok);
    }

    #[tokio::test]
    async fn export_json_round_trips() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();
        store
            .append(session, AuditKind::SessionStart, serde_json::json!({"task_len": 9}))
            .await
            .expect("append");
        store
            .append(session, AuditKind::SessionEnd, serde_json::json!({"state": "DONE"}))
            .await
            .expect("append");

        let bytes = store.export(session, ExportFormat::Json).await.expect("export");
        let parsed: Vec<AuditRecord> = serde_json::from_slice(&bytes).expect("reparse");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].kind, AuditKind::SessionStart);
        assert_eq!(parsed[1].seq, 1);
        assert!(parsed[1].hash_matches());
    }

    #[tokio::test]
    async fn export_text_mentions_kind_and_hash_fragment() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();
        store
            .append(session, AuditKind::SessionStart, serde_json::json!({}))
            .await
            .expect("append");

        let bytes = store.export(session, ExportFormat::Text).await.expect("export");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.contains("SESSION_START"));
        assert!(text.contains("hash="));
    }

    #[tokio::test]
    async fn memory_kv_round_trips_and_overwrites() {
        let store = store().await;
        let session = uuid::Uuid::new_v4();

        store
            .set_memory(session, "note", &serde_json::json!({"v": 1}))
            .await
            .expect("set");
        store
            .set_memory(session, "note", &serde_json::json!({"v": 2}))
            .await
            .expect("overwrite");

        let value = store.get_memory(session, "note").await.expect("get").expect("some");
        assert_eq!(value["v"], 2);
        assert!(store
            .get_memory(session, "absent")
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn session_meta_listing() {
        let store = store().await;
        let mut meta = SessionMeta::started(uuid::Uuid::new_v4(), "first task");
        store.upsert_session_meta(&meta).await.expect("upsert");

        meta.state = SessionState::Done;
        meta.total_steps = 3;
        store.upsert_session_meta(&meta).await.expect("update");

        let other = SessionMeta::started(uuid::Uuid::new_v4(), "second task");
        store.upsert_session_meta(&other).await.expect("upsert");

        let sessions = store.list_sessions(10).await.expect("list");
        assert_eq!(sessions.len(), 2);
        let ours = sessions
            .iter()
            .find(|m| m.session_id == meta.session_id)
            .expect("present");
        assert_eq!(ours.state, SessionState::Done);
        assert_eq!(ours.total_steps, 3);

        let limited = store.list_sessions(1).await.expect("list");
        assert_eq!(limited.len(), 1);
    }
}
