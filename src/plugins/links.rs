//! Typed links between records, code files and URLs.
//!
//! Links are the only entity that may be hard-deleted. A link to a `code`
//! target remembers the file's modification time at creation; reading it back
//! reports `is_stale` when the file has changed or disappeared since.

use crate::core::broker::DbBroker;
use crate::core::caller::Caller;
use crate::core::error::PalaceError;
use crate::core::model::{LinkKind, RecordKind, Relation};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::records;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Confirms a code target exists and reports its modification time.
pub trait CodeTargetValidator: Send + Sync {
    /// Modification time (unix nanoseconds) of `target`, or `NotFound`.
    fn modified_time(&self, target: &str) -> Result<i64, PalaceError>;
}

/// Resolves code targets against a workspace directory on disk.
pub struct FsCodeValidator {
    workspace_root: PathBuf,
}

impl FsCodeValidator {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            workspace_root: workspace_root.to_path_buf(),
        }
    }
}

/// Strip a `#symbol` or `:line` suffix from a code target.
fn code_path(target: &str) -> &str {
    let path = target.split('#').next().unwrap_or(target);
    match path.rsplit_once(':') {
        Some((file, line)) if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) => {
            file
        }
        _ => path,
    }
}

impl CodeTargetValidator for FsCodeValidator {
    fn modified_time(&self, target: &str) -> Result<i64, PalaceError> {
        let rel = Path::new(code_path(target).trim_start_matches("./"));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(PalaceError::ValidationError(format!(
                "Code target '{}' must be a path inside the workspace",
                target
            )));
        }
        let path = self.workspace_root.join(rel);
        let meta = std::fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                PalaceError::NotFound(format!("Code target '{}' does not exist", target))
            }
            _ => PalaceError::IoError(e),
        })?;
        if !meta.is_file() {
            return Err(PalaceError::ValidationError(format!(
                "Code target '{}' is not a file",
                target
            )));
        }
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Ok(i64::try_from(mtime).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub id: String,
    pub source_id: String,
    pub source_kind: LinkKind,
    pub target_id: String,
    pub target_kind: LinkKind,
    pub relation: Relation,
    pub target_mtime: Option<i64>,
    pub actor_id: String,
    pub created_at: String,
    /// Only computed for `code` targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_stale: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLink {
    pub source_id: String,
    pub target_id: String,
    pub target_kind: LinkKind,
    pub relation: Relation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkFilter {
    #[serde(default)]
    pub relation: Option<Relation>,
    #[serde(default)]
    pub target_kind: Option<LinkKind>,
    #[serde(default)]
    pub limit: Option<usize>,
}

const LINK_COLUMNS: &str =
    "id, source_id, source_kind, target_id, target_kind, relation, target_mtime, actor_id, created_at";

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get(0)?,
        source_id: row.get(1)?,
        source_kind: row.get(2)?,
        target_id: row.get(3)?,
        target_kind: row.get(4)?,
        relation: row.get(5)?,
        target_mtime: row.get(6)?,
        actor_id: row.get(7)?,
        created_at: row.get(8)?,
        is_stale: None,
    })
}

fn validate_url(target: &str) -> Result<(), PalaceError> {
    if target.starts_with("http://") || target.starts_with("https://") {
        Ok(())
    } else {
        Err(PalaceError::ValidationError(format!(
            "url target '{}' must start with http:// or https://",
            target
        )))
    }
}

fn existing_link(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    relation: Relation,
) -> Result<Option<String>, PalaceError> {
    // `contradicts` is symmetric: B -> A duplicates an existing A -> B.
    let sql = if relation == Relation::Contradicts {
        "SELECT id FROM links WHERE relation = ?3
         AND ((source_id = ?1 AND target_id = ?2) OR (source_id = ?2 AND target_id = ?1))
         ORDER BY id ASC LIMIT 1"
    } else {
        "SELECT id FROM links WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3"
    };
    Ok(conn
        .query_row(sql, params![source_id, target_id, relation], |row| row.get(0))
        .optional()?)
}

/// Insert a link inside an open write connection. Returns the existing link id
/// as a `Conflict` when the same (source, target, relation) already exists, in
/// either direction for `contradicts`.
pub(crate) fn insert_link(
    conn: &Connection,
    link: &Link,
) -> Result<(), PalaceError> {
    if let Some(existing) = existing_link(conn, &link.source_id, &link.target_id, link.relation)? {
        return Err(PalaceError::conflict(
            format!(
                "link {} -[{}]-> {} already exists",
                link.source_id, link.relation, link.target_id
            ),
            existing,
        ));
    }
    conn.execute(
        "INSERT INTO links(id, source_id, source_kind, target_id, target_kind, relation, target_mtime, actor_id, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            link.id,
            link.source_id,
            link.source_kind,
            link.target_id,
            link.target_kind,
            link.relation,
            link.target_mtime,
            link.actor_id,
            link.created_at
        ],
    )?;
    Ok(())
}

pub(crate) fn build_link(
    source_id: &str,
    source_kind: RecordKind,
    target_id: &str,
    target_kind: LinkKind,
    relation: Relation,
    target_mtime: Option<i64>,
    actor_id: &str,
) -> Link {
    Link {
        id: time::new_id("k"),
        source_id: source_id.to_string(),
        source_kind: source_kind.into(),
        target_id: target_id.to_string(),
        target_kind,
        relation,
        target_mtime,
        actor_id: actor_id.to_string(),
        created_at: time::now_epoch_z(),
        is_stale: None,
    }
}

/// Create a link from a record to another record, a code file or a URL.
pub fn add_link(
    store: &Store,
    caller: &Caller,
    req: &NewLink,
    validator: &dyn CodeTargetValidator,
) -> Result<Link, PalaceError> {
    let source_kind = RecordKind::from_id(&req.source_id).ok_or_else(|| {
        PalaceError::ValidationError(format!(
            "source_id '{}' is not a record id (i_, d_, l_)",
            req.source_id
        ))
    })?;
    let target_id = req.target_id.trim();
    if target_id.is_empty() {
        return Err(PalaceError::ValidationError(
            "target_id must not be empty".to_string(),
        ));
    }
    if target_id == req.source_id {
        return Err(PalaceError::ValidationError(
            "a record cannot link to itself".to_string(),
        ));
    }

    let target_mtime = match req.target_kind {
        LinkKind::Code => Some(validator.modified_time(target_id)?),
        LinkKind::Url => {
            validate_url(target_id)?;
            None
        }
        LinkKind::Idea | LinkKind::Decision | LinkKind::Learning => {
            if RecordKind::from_id(target_id).map(LinkKind::from) != Some(req.target_kind) {
                return Err(PalaceError::ValidationError(format!(
                    "target_id '{}' is not a {} id",
                    target_id, req.target_kind
                )));
            }
            None
        }
    };

    let link = build_link(
        &req.source_id,
        source_kind,
        target_id,
        req.target_kind,
        req.relation,
        target_mtime,
        &caller.actor_id,
    );

    let broker = DbBroker::new(&store.root);
    broker.with_write(&records::palace_db(store), &caller.actor_id, "link.add", |conn| {
        let tx = conn.transaction()?;
        if !records::record_exists(&tx, source_kind, &req.source_id)? {
            return Err(PalaceError::NotFound(format!(
                "Source record '{}' not found",
                req.source_id
            )));
        }
        if let Some(kind) = req.target_kind.record_kind()
            && !records::record_exists(&tx, kind, target_id)?
        {
            return Err(PalaceError::NotFound(format!(
                "Target record '{}' not found",
                target_id
            )));
        }
        insert_link(&tx, &link)?;
        tx.commit()?;
        Ok(())
    })?;

    let mut link = link;
    if link.target_kind == LinkKind::Code {
        link.is_stale = Some(false);
    }
    Ok(link)
}

/// Annotate code links with staleness against the current file state.
fn annotate_staleness(links: &mut [Link], validator: &dyn CodeTargetValidator) {
    for link in links.iter_mut().filter(|l| l.target_kind == LinkKind::Code) {
        let stale = match validator.modified_time(&link.target_id) {
            Ok(current) => link.target_mtime != Some(current),
            Err(PalaceError::NotFound(_)) => true,
            Err(e) => {
                tracing::warn!(link = %link.id, error = %e, "could not stat code target");
                true
            }
        };
        link.is_stale = Some(stale);
    }
}

/// Links touching a record, newest first.
pub fn get_links_for(
    store: &Store,
    record_id: &str,
    direction: Direction,
    validator: &dyn CodeTargetValidator,
) -> Result<Vec<Link>, PalaceError> {
    let condition = match direction {
        Direction::Outgoing => "source_id = ?1",
        Direction::Incoming => "target_id = ?1",
        Direction::Both => "(source_id = ?1 OR target_id = ?1)",
    };
    let mut links = DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        let sql = format!(
            "SELECT {} FROM links WHERE {} ORDER BY CAST(RTRIM(created_at, 'Z') AS INTEGER) DESC, id DESC",
            LINK_COLUMNS, condition
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![record_id], link_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })?;
    annotate_staleness(&mut links, validator);
    Ok(links)
}

pub fn get_link(
    store: &Store,
    id: &str,
    validator: &dyn CodeTargetValidator,
) -> Result<Link, PalaceError> {
    let link = DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        let sql = format!("SELECT {} FROM links WHERE id = ?1", LINK_COLUMNS);
        conn.query_row(&sql, params![id], link_from_row)
            .optional()?
            .ok_or_else(|| PalaceError::NotFound(format!("Link '{}' not found", id)))
    })?;
    let mut links = [link];
    annotate_staleness(&mut links, validator);
    let [link] = links;
    Ok(link)
}

pub fn list_links(
    store: &Store,
    filter: &LinkFilter,
    validator: &dyn CodeTargetValidator,
) -> Result<Vec<Link>, PalaceError> {
    let mut links = DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        let mut query = format!("SELECT {} FROM links WHERE 1=1", LINK_COLUMNS);
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(relation) = filter.relation {
            query.push_str(" AND relation = ?");
            params.push(Box::new(relation));
        }
        if let Some(kind) = filter.target_kind {
            query.push_str(" AND target_kind = ?");
            params.push(Box::new(kind));
        }
        query.push_str(" ORDER BY CAST(RTRIM(created_at, 'Z') AS INTEGER) DESC, id DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&query)?;
        let params_as_dyn: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(&params_as_dyn[..], link_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })?;
    annotate_staleness(&mut links, validator);
    Ok(links)
}

pub fn delete_link(store: &Store, caller: &Caller, id: &str) -> Result<(), PalaceError> {
    let broker = DbBroker::new(&store.root);
    broker.with_write(&records::palace_db(store), &caller.actor_id, "link.delete", |conn| {
        let deleted = conn.execute("DELETE FROM links WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(PalaceError::NotFound(format!("Link '{}' not found", id)));
        }
        Ok(())
    })
}

/// Every `contradicts` link, oldest first.
pub(crate) fn contradiction_links(store: &Store) -> Result<Vec<Link>, PalaceError> {
    DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        let sql = format!(
            "SELECT {} FROM links WHERE relation = 'contradicts'
             ORDER BY CAST(RTRIM(created_at, 'Z') AS INTEGER) ASC, id ASC",
            LINK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], link_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "links",
        "version": "0.1.0",
        "description": "Typed relations between records, code locations and URLs",
        "commands": [
            { "name": "add", "parameters": ["source_id", "target_id", "target_kind", "relation"] },
            { "name": "get", "parameters": ["id"] },
            { "name": "for_record", "parameters": ["id", "direction"] },
            { "name": "list", "parameters": ["relation", "target_kind", "limit"] },
            { "name": "delete", "parameters": ["id"] }
        ],
        "storage": ["palace.db"],
        "notes": ["code links are stale when the target file changed or disappeared"]
    })
}
