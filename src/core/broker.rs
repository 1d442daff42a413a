use crate::core::error;
use crate::core::pool;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const BROKER_EVENTS_NAME: &str = "broker.events.jsonl";

/// The DB Broker is the thin waist for state access.
///
/// Writes are serialized per database through the global [`pool::SqlitePool`]
/// and recorded in an append-only mutation log; reads go straight to a WAL
/// reader connection.
pub struct DbBroker {
    op_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            op_log_path: root.join(BROKER_EVENTS_NAME),
        }
    }

    /// Execute a closure with a serialized write connection to the specified DB.
    pub fn with_write<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        op_name: &str,
        f: F,
    ) -> Result<R, error::PalaceError>
    where
        F: FnOnce(&mut Connection) -> Result<R, error::PalaceError>,
    {
        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let result = pool::global_pool().with_write(db_path, f);

        let status = if result.is_ok() { "success" } else { "error" };
        if let Err(e) = self.log_event(actor, op_name, &db_id, status) {
            tracing::warn!(op = op_name, error = %e, "failed to append broker event");
        }

        result
    }

    /// Execute a closure with a read connection. Reads are not logged.
    pub fn with_read<F, R>(&self, db_path: &Path, f: F) -> Result<R, error::PalaceError>
    where
        F: FnOnce(&Connection) -> Result<R, error::PalaceError>,
    {
        pool::global_pool().with_read(db_path, f)
    }

    fn log_event(
        &self,
        actor: &str,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::PalaceError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: ulid::Ulid::new().to_string(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.op_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}
