//! Append-only audit ledger.
//!
//! Audit entries describe governance transitions (direct writes, reviews,
//! corridor promotions, contradiction links). They are written after the
//! primary operation commits and never roll it back: a failed audit write is
//! logged with `tracing::warn!` and swallowed. UPDATE and DELETE on
//! `audit_log` are rejected by triggers.

use crate::core::broker::DbBroker;
use crate::core::caller::Caller;
use crate::core::db;
use crate::core::error::PalaceError;
use crate::core::model::{ActorType, AuditAction};
use crate::core::store::Store;
use crate::core::time;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub action: AuditAction,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub target_id: String,
    pub target_kind: String,
    pub details: JsonValue,
    pub created_at: String,
}

/// SHA-256 hex digest of record content, stored with direct writes.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn append_audit(
    store: &Store,
    action: AuditAction,
    caller: &Caller,
    target_id: &str,
    target_kind: &str,
    details: JsonValue,
) -> Result<AuditLogEntry, PalaceError> {
    let entry = AuditLogEntry {
        id: time::new_id("a"),
        action,
        actor_type: caller.actor_type,
        actor_id: caller.actor_id.clone(),
        target_id: target_id.to_string(),
        target_kind: target_kind.to_string(),
        details,
        created_at: time::now_epoch_z(),
    };

    let broker = DbBroker::new(&store.root);
    let db_path = db::palace_db_path(&store.root);
    broker.with_write(&db_path, &caller.actor_id, "audit.append", |conn| {
        conn.execute(
            "INSERT INTO audit_log(id, action, actor_type, actor_id, target_id, target_kind, details, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.action,
                entry.actor_type,
                entry.actor_id,
                entry.target_id,
                entry.target_kind,
                serde_json::to_string(&entry.details)?,
                entry.created_at,
            ],
        )?;
        Ok(())
    })?;

    Ok(entry)
}

/// Record an audit entry without letting a failure reach the caller.
pub fn record_best_effort(
    store: &Store,
    action: AuditAction,
    caller: &Caller,
    target_id: &str,
    target_kind: &str,
    details: JsonValue,
) -> Option<AuditLogEntry> {
    match append_audit(store, action, caller, target_id, target_kind, details) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(
                action = action.as_str(),
                target = target_id,
                error = %e,
                "audit write failed; primary operation kept"
            );
            None
        }
    }
}

/// Audit entries, oldest first; restricted to one target when given.
pub fn list_audit(
    store: &Store,
    target_id: Option<&str>,
) -> Result<Vec<AuditLogEntry>, PalaceError> {
    let broker = DbBroker::new(&store.root);
    let db_path = db::palace_db_path(&store.root);

    broker.with_read(&db_path, |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, action, actor_type, actor_id, target_id, target_kind, details, created_at
             FROM audit_log
             WHERE (?1 IS NULL OR target_id = ?1)
             ORDER BY CAST(RTRIM(created_at, 'Z') AS INTEGER) ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![target_id], |row| {
            let details: String = row.get(6)?;
            Ok((
                AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    actor_type: row.get(2)?,
                    actor_id: row.get(3)?,
                    target_id: row.get(4)?,
                    target_kind: row.get(5)?,
                    details: JsonValue::Null,
                    created_at: row.get(7)?,
                },
                details,
            ))
        })?;

        let mut out = Vec::new();
        for r in rows {
            let (mut entry, details) = r?;
            entry.details = serde_json::from_str(&details)?;
            out.push(entry);
        }
        Ok(out)
    })
}
