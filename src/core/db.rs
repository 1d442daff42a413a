use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn db_connect(db_path: &str) -> Result<Connection, error::PalaceError> {
    db_connect_pooled(db_path, 5)
}

pub fn db_connect_pooled(
    db_path: &str,
    busy_timeout_secs: u32,
) -> Result<Connection, error::PalaceError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(u64::from(busy_timeout_secs)))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

pub fn palace_db_path(root: &Path) -> PathBuf {
    root.join(schemas::PALACE_DB_NAME)
}

/// Create (idempotently) every table and index of a workspace or corridor store.
pub fn initialize_palace_db(root: &Path) -> Result<(), error::PalaceError> {
    fs::create_dir_all(root)?;
    let db_path = palace_db_path(root);

    let broker = DbBroker::new(root);
    broker.with_write(&db_path, "palace", "palace.init", |conn| {
        for ddl in schemas::PALACE_DB_SCHEMA {
            conn.execute_batch(ddl)?;
        }
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES('schema_version', ?1)",
            params![schemas::PALACE_SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    })?;

    tracing::debug!(path = %db_path.display(), "palace database initialized");
    Ok(())
}
