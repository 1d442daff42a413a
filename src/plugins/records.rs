//! Record Store: durable CRUD for ideas, decisions and learnings.
//!
//! Every write assigns a kind-prefixed id (`i_`, `d_`, `l_`) and sets
//! `created_at`. Records are never hard-deleted; they retire through their
//! status fields. Storage errors propagate unchanged.

use crate::core::audit;
use crate::core::broker::DbBroker;
use crate::core::caller::Caller;
use crate::core::db;
use crate::core::error::PalaceError;
use crate::core::model::{
    self, Authority, AuditAction, DecisionStatus, IdeaStatus, LifecycleStatus, Outcome,
    RecordKind, Scope, Source,
};
use crate::core::store::Store;
use crate::core::time;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LEARNING_CONFIDENCE: f64 = 0.5;

/// Numeric ordering of `NNNZ` timestamps, newest first.
const ORDER_NEWEST: &str = "CAST(RTRIM(created_at, 'Z') AS INTEGER) DESC, id DESC";

// --- Data Types ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Idea {
    pub id: String,
    pub content: String,
    pub context: String,
    pub status: IdeaStatus,
    pub scope: Scope,
    pub scope_path: String,
    pub source: Source,
    pub authority: Authority,
    pub actor_id: String,
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub id: String,
    pub content: String,
    pub rationale: String,
    pub context: String,
    pub status: DecisionStatus,
    pub outcome: Outcome,
    pub scope: Scope,
    pub scope_path: String,
    pub source: Source,
    pub authority: Authority,
    pub actor_id: String,
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Learning {
    pub id: String,
    pub content: String,
    pub context: String,
    pub confidence: f64,
    pub use_count: i64,
    pub last_used: String,
    /// Decay periods already charged since `last_used`.
    pub decay_periods_applied: i64,
    pub lifecycle_status: LifecycleStatus,
    pub scope: Scope,
    pub scope_path: String,
    pub source: Source,
    pub authority: Authority,
    pub origin_workspace: Option<String>,
    pub actor_id: String,
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Any governed record, matched exhaustively by kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Idea(Idea),
    Decision(Decision),
    Learning(Learning),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Idea(_) => RecordKind::Idea,
            Record::Decision(_) => RecordKind::Decision,
            Record::Learning(_) => RecordKind::Learning,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Idea(r) => &r.id,
            Record::Decision(r) => &r.id,
            Record::Learning(r) => &r.id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Record::Idea(r) => &r.content,
            Record::Decision(r) => &r.content,
            Record::Learning(r) => &r.content,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Record::Idea(r) => r.scope,
            Record::Decision(r) => r.scope,
            Record::Learning(r) => r.scope,
        }
    }

    pub fn scope_path(&self) -> &str {
        match self {
            Record::Idea(r) => &r.scope_path,
            Record::Decision(r) => &r.scope_path,
            Record::Learning(r) => &r.scope_path,
        }
    }

    pub fn authority(&self) -> Authority {
        match self {
            Record::Idea(r) => r.authority,
            Record::Decision(r) => r.authority,
            Record::Learning(r) => r.authority,
        }
    }

    /// Whether the record is still in force (not dropped, superseded or retired).
    pub fn is_live(&self) -> bool {
        match self {
            Record::Idea(r) => matches!(r.status, IdeaStatus::Active | IdeaStatus::Exploring),
            Record::Decision(r) => r.status == DecisionStatus::Active,
            Record::Learning(r) => r.lifecycle_status == LifecycleStatus::Active,
        }
    }

    /// Text the classifier and similarity search see: content plus rationale/context.
    pub fn full_text(&self) -> String {
        let (content, extra): (&str, Vec<&str>) = match self {
            Record::Idea(r) => (r.content.as_str(), vec![r.context.as_str()]),
            Record::Decision(r) => (
                r.content.as_str(),
                vec![r.rationale.as_str(), r.context.as_str()],
            ),
            Record::Learning(r) => (r.content.as_str(), vec![r.context.as_str()]),
        };
        let mut text = content.to_string();
        for part in extra.into_iter().filter(|p| !p.trim().is_empty()) {
            text.push('\n');
            text.push_str(part);
        }
        text
    }

    pub fn created_at(&self) -> &str {
        match self {
            Record::Idea(r) => &r.created_at,
            Record::Decision(r) => &r.created_at,
            Record::Learning(r) => &r.created_at,
        }
    }
}

// --- Requests ---

fn default_scope() -> Scope {
    Scope::Palace
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIdea {
    pub content: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub status: Option<IdeaStatus>,
    #[serde(default = "default_scope")]
    pub scope: Scope,
    #[serde(default)]
    pub scope_path: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDecision {
    pub content: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub context: String,
    #[serde(default = "default_scope")]
    pub scope: Scope,
    #[serde(default)]
    pub scope_path: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLearning {
    pub content: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default = "default_scope")]
    pub scope: Scope,
    #[serde(default)]
    pub scope_path: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Attribution and authority stamped on a newly written record.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub source: Source,
    pub authority: Authority,
    pub actor_id: String,
    pub session_id: Option<String>,
    pub origin_workspace: Option<String>,
}

impl RecordMeta {
    pub fn approved_by(caller: &Caller) -> Self {
        Self {
            source: caller.actor_type.into(),
            authority: Authority::Approved,
            actor_id: caller.actor_id.clone(),
            session_id: caller.session_id.clone(),
            origin_workspace: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub scope_path: Option<String>,
    /// Only `approved` / `legacy_approved` records.
    #[serde(default)]
    pub authoritative_only: bool,
    /// Include dropped/implemented ideas, superseded/reversed decisions and
    /// obsolete/archived learnings.
    #[serde(default)]
    pub include_retired: bool,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn at(scope: Scope, scope_path: &str) -> Self {
        Self {
            scope: Some(scope),
            scope_path: Some(scope_path.to_string()),
            ..Self::default()
        }
    }

    pub fn authoritative(mut self) -> Self {
        self.authoritative_only = true;
        self
    }
}

/// What a list/search hit on a learning counts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadHit {
    /// Leave usage untouched.
    Ignore,
    /// Increment `use_count` only.
    CountOnly,
    /// Increment `use_count` and reset `last_used` (restarts the decay clock).
    CountAndRefresh,
}

impl ReadHit {
    pub fn from_config(decay: &crate::core::config::DecayConfig) -> Self {
        if decay.reads_count_as_use {
            ReadHit::CountAndRefresh
        } else {
            ReadHit::CountOnly
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub kind: RecordKind,
    pub id: String,
    pub content: String,
    pub score: f64,
    pub created_at: String,
}

// --- Helpers ---

pub fn palace_db(store: &Store) -> std::path::PathBuf {
    db::palace_db_path(&store.root)
}

fn live_condition(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Idea => "status IN ('active', 'exploring')",
        RecordKind::Decision => "status = 'active'",
        RecordKind::Learning => "lifecycle_status = 'active'",
    }
}

fn columns(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Idea => {
            "id, content, context, status, scope, scope_path, source, authority, actor_id, session_id, created_at, updated_at"
        }
        RecordKind::Decision => {
            "id, content, rationale, context, status, outcome, scope, scope_path, source, authority, actor_id, session_id, created_at, updated_at"
        }
        RecordKind::Learning => {
            "id, content, context, confidence, use_count, last_used, decay_periods_applied, lifecycle_status, scope, scope_path, source, authority, origin_workspace, actor_id, session_id, created_at, updated_at"
        }
    }
}

fn idea_from_row(row: &Row<'_>) -> rusqlite::Result<Idea> {
    Ok(Idea {
        id: row.get(0)?,
        content: row.get(1)?,
        context: row.get(2)?,
        status: row.get(3)?,
        scope: row.get(4)?,
        scope_path: row.get(5)?,
        source: row.get(6)?,
        authority: row.get(7)?,
        actor_id: row.get(8)?,
        session_id: row.get(9)?,
        tags: Vec::new(),
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn decision_from_row(row: &Row<'_>) -> rusqlite::Result<Decision> {
    Ok(Decision {
        id: row.get(0)?,
        content: row.get(1)?,
        rationale: row.get(2)?,
        context: row.get(3)?,
        status: row.get(4)?,
        outcome: row.get(5)?,
        scope: row.get(6)?,
        scope_path: row.get(7)?,
        source: row.get(8)?,
        authority: row.get(9)?,
        actor_id: row.get(10)?,
        session_id: row.get(11)?,
        tags: Vec::new(),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn learning_from_row(row: &Row<'_>) -> rusqlite::Result<Learning> {
    Ok(Learning {
        id: row.get(0)?,
        content: row.get(1)?,
        context: row.get(2)?,
        confidence: row.get(3)?,
        use_count: row.get(4)?,
        last_used: row.get(5)?,
        decay_periods_applied: row.get(6)?,
        lifecycle_status: row.get(7)?,
        scope: row.get(8)?,
        scope_path: row.get(9)?,
        source: row.get(10)?,
        authority: row.get(11)?,
        origin_workspace: row.get(12)?,
        actor_id: row.get(13)?,
        session_id: row.get(14)?,
        tags: Vec::new(),
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn read_tags(conn: &Connection, record_id: &str) -> Result<Vec<String>, PalaceError> {
    let mut stmt =
        conn.prepare("SELECT tag FROM record_tags WHERE record_id = ?1 ORDER BY tag ASC")?;
    let tags = stmt
        .query_map(params![record_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tags)
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn write_tags(conn: &Connection, record_id: &str, tags: &[String]) -> Result<(), PalaceError> {
    conn.execute(
        "DELETE FROM record_tags WHERE record_id = ?1",
        params![record_id],
    )?;
    for tag in normalize_tags(tags) {
        conn.execute(
            "INSERT INTO record_tags(record_id, tag) VALUES(?1, ?2)",
            params![record_id, tag],
        )?;
    }
    Ok(())
}

pub(crate) fn record_exists(
    conn: &Connection,
    kind: RecordKind,
    id: &str,
) -> Result<bool, PalaceError> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?1", kind.table());
    let count: i64 = conn.query_row(&sql, params![id], |r| r.get(0))?;
    Ok(count > 0)
}

fn not_found(kind: RecordKind, id: &str) -> PalaceError {
    let label = match kind {
        RecordKind::Idea => "Idea",
        RecordKind::Decision => "Decision",
        RecordKind::Learning => "Learning",
    };
    PalaceError::NotFound(format!("{} '{}' not found", label, id))
}

fn kind_of(id: &str) -> Result<RecordKind, PalaceError> {
    RecordKind::from_id(id).ok_or_else(|| {
        PalaceError::ValidationError(format!(
            "Record id '{}' has no known kind prefix (i_, d_, l_)",
            id
        ))
    })
}

/// Build `WHERE` clause and params for a filtered listing.
fn filter_clause(kind: RecordKind, filter: &RecordFilter) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clause = " WHERE 1=1".to_string();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(scope) = filter.scope {
        clause.push_str(" AND scope = ?");
        params.push(Box::new(scope));
    }
    if let Some(path) = &filter.scope_path {
        clause.push_str(" AND scope_path = ?");
        params.push(Box::new(path.clone()));
    }
    if filter.authoritative_only {
        clause.push_str(" AND authority IN ('approved', 'legacy_approved')");
    }
    if !filter.include_retired {
        clause.push_str(" AND ");
        clause.push_str(live_condition(kind));
    }
    if let Some(tag) = &filter.tag {
        clause.push_str(" AND id IN (SELECT record_id FROM record_tags WHERE tag = ?)");
        params.push(Box::new(tag.trim().to_lowercase()));
    }
    (clause, params)
}

fn list_rows<T>(
    conn: &Connection,
    kind: RecordKind,
    filter: &RecordFilter,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, PalaceError> {
    let (clause, params) = filter_clause(kind, filter);
    let mut query = format!(
        "SELECT {} FROM {}{} ORDER BY {}",
        columns(kind),
        kind.table(),
        clause,
        ORDER_NEWEST
    );
    if let Some(limit) = filter.limit {
        query.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&query)?;
    let params_as_dyn: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(&params_as_dyn[..], map)?
        .collect::<rusqlite::Result<Vec<T>>>()?;
    Ok(rows)
}

// --- Create ---

pub fn create_idea(store: &Store, caller: &Caller, req: &NewIdea) -> Result<Idea, PalaceError> {
    model::require_content("content", &req.content)?;
    let scope_path = model::normalize_scope_path(req.scope, &req.scope_path)?;

    let meta = RecordMeta::approved_by(caller);
    let now = time::now_epoch_z();
    let idea = Idea {
        id: time::new_id(RecordKind::Idea.id_prefix()),
        content: req.content.trim().to_string(),
        context: req.context.clone(),
        status: req.status.unwrap_or(IdeaStatus::Active),
        scope: req.scope,
        scope_path,
        source: meta.source,
        authority: Authority::Approved,
        actor_id: meta.actor_id,
        session_id: meta.session_id,
        tags: normalize_tags(&req.tags),
        created_at: now.clone(),
        updated_at: now,
    };

    let broker = DbBroker::new(&store.root);
    broker.with_write(&palace_db(store), &caller.actor_id, "idea.create", |conn| {
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO ideas(id, content, context, status, scope, scope_path, source, authority, actor_id, session_id, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                idea.id, idea.content, idea.context, idea.status, idea.scope, idea.scope_path,
                idea.source, idea.authority, idea.actor_id, idea.session_id, idea.created_at,
                idea.updated_at
            ],
        )?;
        write_tags(&tx, &idea.id, &idea.tags)?;
        tx.commit()?;
        Ok(())
    })?;

    Ok(idea)
}

/// Validate a decision request and build the row it would insert.
pub(crate) fn build_decision(req: &NewDecision, meta: &RecordMeta) -> Result<Decision, PalaceError> {
    model::require_content("content", &req.content)?;
    let scope_path = model::normalize_scope_path(req.scope, &req.scope_path)?;

    let now = time::now_epoch_z();
    Ok(Decision {
        id: time::new_id(RecordKind::Decision.id_prefix()),
        content: req.content.trim().to_string(),
        rationale: req.rationale.clone(),
        context: req.context.clone(),
        status: DecisionStatus::Active,
        outcome: Outcome::Unknown,
        scope: req.scope,
        scope_path,
        source: meta.source,
        authority: meta.authority,
        actor_id: meta.actor_id.clone(),
        session_id: meta.session_id.clone(),
        tags: normalize_tags(&req.tags),
        created_at: now.clone(),
        updated_at: now,
    })
}

pub(crate) fn insert_decision(conn: &Connection, decision: &Decision) -> Result<(), PalaceError> {
    conn.execute(
        "INSERT INTO decisions(id, content, rationale, context, status, outcome, scope, scope_path, source, authority, actor_id, session_id, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            decision.id, decision.content, decision.rationale, decision.context,
            decision.status, decision.outcome, decision.scope, decision.scope_path,
            decision.source, decision.authority, decision.actor_id, decision.session_id,
            decision.created_at, decision.updated_at
        ],
    )?;
    write_tags(conn, &decision.id, &decision.tags)
}

pub fn create_decision(
    store: &Store,
    req: &NewDecision,
    meta: &RecordMeta,
) -> Result<Decision, PalaceError> {
    let decision = build_decision(req, meta)?;
    let broker = DbBroker::new(&store.root);
    broker.with_write(&palace_db(store), &meta.actor_id, "decision.create", |conn| {
        let tx = conn.transaction()?;
        insert_decision(&tx, &decision)?;
        tx.commit()?;
        Ok(())
    })?;
    Ok(decision)
}

pub(crate) fn build_learning(req: &NewLearning, meta: &RecordMeta) -> Result<Learning, PalaceError> {
    model::require_content("content", &req.content)?;
    let scope_path = model::normalize_scope_path(req.scope, &req.scope_path)?;
    let confidence = req.confidence.unwrap_or(DEFAULT_LEARNING_CONFIDENCE);
    model::require_unit_interval("confidence", confidence)?;

    let now = time::now_epoch_z();
    Ok(Learning {
        id: time::new_id(RecordKind::Learning.id_prefix()),
        content: req.content.trim().to_string(),
        context: req.context.clone(),
        confidence,
        use_count: 0,
        last_used: now.clone(),
        decay_periods_applied: 0,
        lifecycle_status: LifecycleStatus::Active,
        scope: req.scope,
        scope_path,
        source: meta.source,
        authority: meta.authority,
        origin_workspace: meta.origin_workspace.clone(),
        actor_id: meta.actor_id.clone(),
        session_id: meta.session_id.clone(),
        tags: normalize_tags(&req.tags),
        created_at: now.clone(),
        updated_at: now,
    })
}

pub(crate) fn insert_learning(conn: &Connection, learning: &Learning) -> Result<(), PalaceError> {
    conn.execute(
        "INSERT INTO learnings(id, content, context, confidence, use_count, last_used, decay_periods_applied, lifecycle_status, scope, scope_path, source, authority, origin_workspace, actor_id, session_id, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            learning.id, learning.content, learning.context, learning.confidence,
            learning.use_count, learning.last_used, learning.decay_periods_applied,
            learning.lifecycle_status, learning.scope, learning.scope_path, learning.source,
            learning.authority, learning.origin_workspace, learning.actor_id,
            learning.session_id, learning.created_at, learning.updated_at
        ],
    )?;
    write_tags(conn, &learning.id, &learning.tags)
}

pub fn create_learning(
    store: &Store,
    req: &NewLearning,
    meta: &RecordMeta,
) -> Result<Learning, PalaceError> {
    let learning = build_learning(req, meta)?;
    let broker = DbBroker::new(&store.root);
    broker.with_write(&palace_db(store), &meta.actor_id, "learning.create", |conn| {
        let tx = conn.transaction()?;
        insert_learning(&tx, &learning)?;
        tx.commit()?;
        Ok(())
    })?;
    Ok(learning)
}

// --- Get ---

pub(crate) fn read_idea(conn: &Connection, id: &str) -> Result<Option<Idea>, PalaceError> {
    let sql = format!("SELECT {} FROM ideas WHERE id = ?1", columns(RecordKind::Idea));
    let idea = conn.query_row(&sql, params![id], idea_from_row).optional()?;
    match idea {
        Some(mut idea) => {
            idea.tags = read_tags(conn, id)?;
            Ok(Some(idea))
        }
        None => Ok(None),
    }
}

pub(crate) fn read_decision(conn: &Connection, id: &str) -> Result<Option<Decision>, PalaceError> {
    let sql = format!(
        "SELECT {} FROM decisions WHERE id = ?1",
        columns(RecordKind::Decision)
    );
    let decision = conn.query_row(&sql, params![id], decision_from_row).optional()?;
    match decision {
        Some(mut decision) => {
            decision.tags = read_tags(conn, id)?;
            Ok(Some(decision))
        }
        None => Ok(None),
    }
}

pub(crate) fn read_learning(conn: &Connection, id: &str) -> Result<Option<Learning>, PalaceError> {
    let sql = format!(
        "SELECT {} FROM learnings WHERE id = ?1",
        columns(RecordKind::Learning)
    );
    let learning = conn.query_row(&sql, params![id], learning_from_row).optional()?;
    match learning {
        Some(mut learning) => {
            learning.tags = read_tags(conn, id)?;
            Ok(Some(learning))
        }
        None => Ok(None),
    }
}

pub(crate) fn read_record(conn: &Connection, id: &str) -> Result<Option<Record>, PalaceError> {
    Ok(match kind_of(id)? {
        RecordKind::Idea => read_idea(conn, id)?.map(Record::Idea),
        RecordKind::Decision => read_decision(conn, id)?.map(Record::Decision),
        RecordKind::Learning => read_learning(conn, id)?.map(Record::Learning),
    })
}

pub fn get_idea(store: &Store, id: &str) -> Result<Idea, PalaceError> {
    DbBroker::new(&store.root).with_read(&palace_db(store), |conn| {
        read_idea(conn, id)?.ok_or_else(|| not_found(RecordKind::Idea, id))
    })
}

pub fn get_decision(store: &Store, id: &str) -> Result<Decision, PalaceError> {
    DbBroker::new(&store.root).with_read(&palace_db(store), |conn| {
        read_decision(conn, id)?.ok_or_else(|| not_found(RecordKind::Decision, id))
    })
}

pub fn get_learning(store: &Store, id: &str) -> Result<Learning, PalaceError> {
    DbBroker::new(&store.root).with_read(&palace_db(store), |conn| {
        read_learning(conn, id)?.ok_or_else(|| not_found(RecordKind::Learning, id))
    })
}

/// Fetch any record by its kind-prefixed id.
pub fn get_record(store: &Store, id: &str) -> Result<Record, PalaceError> {
    let kind = kind_of(id)?;
    DbBroker::new(&store.root).with_read(&palace_db(store), |conn| {
        read_record(conn, id)?.ok_or_else(|| not_found(kind, id))
    })
}

// --- List ---

pub fn list_ideas(store: &Store, filter: &RecordFilter) -> Result<Vec<Idea>, PalaceError> {
    DbBroker::new(&store.root).with_read(&palace_db(store), |conn| {
        let mut ideas = list_rows(conn, RecordKind::Idea, filter, idea_from_row)?;
        for idea in &mut ideas {
            idea.tags = read_tags(conn, &idea.id)?;
        }
        Ok(ideas)
    })
}

pub fn list_decisions(store: &Store, filter: &RecordFilter) -> Result<Vec<Decision>, PalaceError> {
    DbBroker::new(&store.root).with_read(&palace_db(store), |conn| {
        let mut decisions = list_rows(conn, RecordKind::Decision, filter, decision_from_row)?;
        for decision in &mut decisions {
            decision.tags = read_tags(conn, &decision.id)?;
        }
        Ok(decisions)
    })
}

/// List learnings; every returned learning is recorded as a read hit.
pub fn list_learnings(
    store: &Store,
    filter: &RecordFilter,
    read_hit: ReadHit,
) -> Result<Vec<Learning>, PalaceError> {
    let mut learnings = DbBroker::new(&store.root).with_read(&palace_db(store), |conn| {
        let mut learnings = list_rows(conn, RecordKind::Learning, filter, learning_from_row)?;
        for learning in &mut learnings {
            learning.tags = read_tags(conn, &learning.id)?;
        }
        Ok(learnings)
    })?;
    apply_read_hits(store, &mut learnings, read_hit)?;
    Ok(learnings)
}

/// Increment `use_count` (and optionally reset `last_used`) for learnings just
/// returned to a caller, mirroring the update onto the returned values.
fn apply_read_hits(
    store: &Store,
    learnings: &mut [Learning],
    read_hit: ReadHit,
) -> Result<(), PalaceError> {
    if read_hit == ReadHit::Ignore || learnings.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = learnings.iter().map(|l| l.id.clone()).collect();
    let now = touch_learnings(store, &ids, read_hit)?;
    for learning in learnings.iter_mut() {
        learning.use_count += 1;
        if read_hit == ReadHit::CountAndRefresh {
            learning.last_used = now.clone();
            learning.decay_periods_applied = 0;
        }
    }
    Ok(())
}

/// Record a use of each learning. Returns the timestamp written.
pub fn touch_learnings(
    store: &Store,
    ids: &[String],
    read_hit: ReadHit,
) -> Result<String, PalaceError> {
    let now = time::now_epoch_z();
    if read_hit == ReadHit::Ignore || ids.is_empty() {
        return Ok(now);
    }
    let broker = DbBroker::new(&store.root);
    broker.with_write(&palace_db(store), "palace", "learning.touch", |conn| {
        let tx = conn.transaction()?;
        for id in ids {
            match read_hit {
                ReadHit::CountAndRefresh => tx.execute(
                    "UPDATE learnings SET use_count = use_count + 1, last_used = ?1, decay_periods_applied = 0 WHERE id = ?2",
                    params![now, id],
                )?,
                _ => tx.execute(
                    "UPDATE learnings SET use_count = use_count + 1 WHERE id = ?1",
                    params![id],
                )?,
            };
        }
        tx.commit()?;
        Ok(())
    })?;
    Ok(now)
}

// --- Search ---

fn count_matches(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.to_lowercase().matches(needle).count()
}

/// Relevance of a record to a lowercase query: content hits weigh double.
fn relevance(record: &Record, needle: &str) -> f64 {
    let (content, extra): (&str, Vec<&str>) = match record {
        Record::Idea(r) => (r.content.as_str(), vec![r.context.as_str()]),
        Record::Decision(r) => (
            r.content.as_str(),
            vec![r.rationale.as_str(), r.context.as_str()],
        ),
        Record::Learning(r) => (r.content.as_str(), vec![r.context.as_str()]),
    };
    let mut score = 2.0 * count_matches(content, needle) as f64;
    for part in extra {
        score += count_matches(part, needle) as f64;
    }
    score
}

/// Live records of one kind. Matching happens in Rust: SQLite `LIKE` only
/// case-folds ASCII.
fn live_records(conn: &Connection, kind: RecordKind) -> Result<Vec<Record>, PalaceError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        columns(kind),
        kind.table(),
        live_condition(kind)
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = match kind {
        RecordKind::Idea => stmt
            .query_map([], |row| idea_from_row(row).map(Record::Idea))?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        RecordKind::Decision => stmt
            .query_map([], |row| decision_from_row(row).map(Record::Decision))?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        RecordKind::Learning => stmt
            .query_map([], |row| learning_from_row(row).map(Record::Learning))?
            .collect::<rusqlite::Result<Vec<_>>>()?,
    };
    Ok(records)
}

fn rank_records(mut scored: Vec<(f64, Record)>, limit: usize) -> Vec<(f64, Record)> {
    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ta = time::parse_epoch_z(a.created_at()).unwrap_or(0);
                let tb = time::parse_epoch_z(b.created_at()).unwrap_or(0);
                tb.cmp(&ta)
            })
            .then_with(|| b.id().cmp(a.id()))
    });
    scored.truncate(limit);
    scored
}

fn search_scored(
    store: &Store,
    kinds: &[RecordKind],
    query: &str,
    limit: usize,
) -> Result<Vec<(f64, Record)>, PalaceError> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(PalaceError::ValidationError(
            "search query must not be empty".to_string(),
        ));
    }
    let records = DbBroker::new(&store.root).with_read(&palace_db(store), |conn| {
        let mut all = Vec::new();
        for kind in kinds {
            all.extend(live_records(conn, *kind)?);
        }
        Ok(all)
    })?;
    let scored = records
        .into_iter()
        .map(|r| (relevance(&r, &needle), r))
        .filter(|(score, _)| *score > 0.0)
        .collect();
    Ok(rank_records(scored, limit))
}

pub fn search_ideas(store: &Store, query: &str, limit: usize) -> Result<Vec<Idea>, PalaceError> {
    Ok(search_scored(store, &[RecordKind::Idea], query, limit)?
        .into_iter()
        .filter_map(|(_, r)| match r {
            Record::Idea(i) => Some(i),
            _ => None,
        })
        .collect())
}

pub fn search_decisions(
    store: &Store,
    query: &str,
    limit: usize,
) -> Result<Vec<Decision>, PalaceError> {
    Ok(search_scored(store, &[RecordKind::Decision], query, limit)?
        .into_iter()
        .filter_map(|(_, r)| match r {
            Record::Decision(d) => Some(d),
            _ => None,
        })
        .collect())
}

pub fn search_learnings(
    store: &Store,
    query: &str,
    limit: usize,
    read_hit: ReadHit,
) -> Result<Vec<Learning>, PalaceError> {
    let mut learnings: Vec<Learning> = search_scored(store, &[RecordKind::Learning], query, limit)?
        .into_iter()
        .filter_map(|(_, r)| match r {
            Record::Learning(l) => Some(l),
            _ => None,
        })
        .collect();
    apply_read_hits(store, &mut learnings, read_hit)?;
    Ok(learnings)
}

/// Keyword search across all live records, ranked by relevance then recency.
pub fn search_all(store: &Store, query: &str, limit: usize) -> Result<Vec<SearchHit>, PalaceError> {
    Ok(search_scored(store, RecordKind::ALL, query, limit)?
        .into_iter()
        .map(|(score, r)| SearchHit {
            kind: r.kind(),
            id: r.id().to_string(),
            content: r.content().to_string(),
            score,
            created_at: r.created_at().to_string(),
        })
        .collect())
}

/// Every live record, for similarity scans.
pub(crate) fn list_live_records(store: &Store) -> Result<Vec<Record>, PalaceError> {
    let filter = RecordFilter::default();
    let mut out: Vec<Record> = Vec::new();
    out.extend(list_ideas(store, &filter)?.into_iter().map(Record::Idea));
    out.extend(list_decisions(store, &filter)?.into_iter().map(Record::Decision));
    out.extend(
        list_learnings(store, &filter, ReadHit::Ignore)?
            .into_iter()
            .map(Record::Learning),
    );
    Ok(out)
}

// --- Tags ---

/// Replace the tag set of a record. Tags are trimmed, lowercased and de-duplicated.
pub fn set_tags(store: &Store, record_id: &str, tags: &[String]) -> Result<Vec<String>, PalaceError> {
    let kind = kind_of(record_id)?;
    let broker = DbBroker::new(&store.root);
    broker.with_write(&palace_db(store), "palace", "record.set_tags", |conn| {
        let tx = conn.transaction()?;
        if !record_exists(&tx, kind, record_id)? {
            return Err(not_found(kind, record_id));
        }
        write_tags(&tx, record_id, tags)?;
        let stored = read_tags(&tx, record_id)?;
        tx.commit()?;
        Ok(stored)
    })
}

pub fn get_tags(store: &Store, record_id: &str) -> Result<Vec<String>, PalaceError> {
    DbBroker::new(&store.root).with_read(&palace_db(store), |conn| read_tags(conn, record_id))
}

// --- Updates ---

pub fn update_idea_status(
    store: &Store,
    id: &str,
    status: IdeaStatus,
) -> Result<Idea, PalaceError> {
    let now = time::now_epoch_z();
    let broker = DbBroker::new(&store.root);
    broker.with_write(&palace_db(store), "palace", "idea.status", |conn| {
        let changed = conn.execute(
            "UPDATE ideas SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, now, id],
        )?;
        if changed == 0 {
            return Err(not_found(RecordKind::Idea, id));
        }
        read_idea(conn, id)?.ok_or_else(|| not_found(RecordKind::Idea, id))
    })
}

pub fn update_decision_status(
    store: &Store,
    id: &str,
    status: DecisionStatus,
) -> Result<Decision, PalaceError> {
    let now = time::now_epoch_z();
    let broker = DbBroker::new(&store.root);
    broker.with_write(&palace_db(store), "palace", "decision.status", |conn| {
        let changed = conn.execute(
            "UPDATE decisions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, now, id],
        )?;
        if changed == 0 {
            return Err(not_found(RecordKind::Decision, id));
        }
        read_decision(conn, id)?.ok_or_else(|| not_found(RecordKind::Decision, id))
    })
}

pub fn set_learning_lifecycle(
    store: &Store,
    id: &str,
    status: LifecycleStatus,
) -> Result<Learning, PalaceError> {
    let now = time::now_epoch_z();
    let broker = DbBroker::new(&store.root);
    broker.with_write(&palace_db(store), "palace", "learning.lifecycle", |conn| {
        let changed = conn.execute(
            "UPDATE learnings SET lifecycle_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, now, id],
        )?;
        if changed == 0 {
            return Err(not_found(RecordKind::Learning, id));
        }
        read_learning(conn, id)?.ok_or_else(|| not_found(RecordKind::Learning, id))
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceChange {
    pub learning_id: String,
    pub old_confidence: f64,
    pub new_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReceipt {
    pub outcome_id: String,
    pub decision_id: String,
    pub outcome: Outcome,
    pub adjusted_learnings: Vec<ConfidenceChange>,
}

/// Append an outcome to a decision's history and nudge linked learnings.
///
/// The decision's status is untouched. Learnings linked to the decision in
/// either direction move by +0.1 (successful), -0.1 (failed) or 0 (mixed),
/// clamped to [0, 1].
pub fn record_decision_outcome(
    store: &Store,
    caller: &Caller,
    decision_id: &str,
    outcome: Outcome,
    note: &str,
) -> Result<OutcomeReceipt, PalaceError> {
    if outcome == Outcome::Unknown {
        return Err(PalaceError::ValidationError(
            "outcome must be one of: successful, failed, mixed".to_string(),
        ));
    }
    let now = time::now_epoch_z();
    let outcome_id = time::new_id("o");
    let delta = outcome.confidence_delta();

    let broker = DbBroker::new(&store.root);
    let adjusted = broker.with_write(&palace_db(store), &caller.actor_id, "decision.outcome", |conn| {
        let tx = conn.transaction()?;
        if !record_exists(&tx, RecordKind::Decision, decision_id)? {
            return Err(not_found(RecordKind::Decision, decision_id));
        }
        tx.execute(
            "INSERT INTO decision_outcomes(id, decision_id, outcome, note, actor_id, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![outcome_id, decision_id, outcome, note, caller.actor_id, now],
        )?;
        tx.execute(
            "UPDATE decisions SET outcome = ?1, updated_at = ?2 WHERE id = ?3",
            params![outcome, now, decision_id],
        )?;

        let linked: Vec<(String, f64)> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT l.id, l.confidence FROM learnings l
                 JOIN links k ON (k.source_id = ?1 AND k.target_id = l.id AND k.target_kind = 'learning')
                              OR (k.target_id = ?1 AND k.source_id = l.id AND k.source_kind = 'learning')
                 ORDER BY l.id ASC",
            )?;
            let rows = stmt
                .query_map(params![decision_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut changes = Vec::new();
        for (learning_id, old) in linked {
            let new = model::clamp_unit(old + delta);
            if new != old {
                tx.execute(
                    "UPDATE learnings SET confidence = ?1, updated_at = ?2 WHERE id = ?3",
                    params![new, now, learning_id],
                )?;
            }
            changes.push(ConfidenceChange {
                learning_id,
                old_confidence: old,
                new_confidence: new,
            });
        }
        tx.commit()?;
        Ok(changes)
    })?;

    audit::record_best_effort(
        store,
        AuditAction::RecordOutcome,
        caller,
        decision_id,
        RecordKind::Decision.as_str(),
        serde_json::json!({
            "outcome": outcome,
            "note": note,
            "adjusted_learnings": adjusted.len(),
        }),
    );

    Ok(OutcomeReceipt {
        outcome_id,
        decision_id: decision_id.to_string(),
        outcome,
        adjusted_learnings: adjusted,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEntry {
    pub id: String,
    pub outcome: Outcome,
    pub note: String,
    pub actor_id: String,
    pub created_at: String,
}

/// Outcome history of a decision, oldest first.
pub fn list_decision_outcomes(
    store: &Store,
    decision_id: &str,
) -> Result<Vec<OutcomeEntry>, PalaceError> {
    DbBroker::new(&store.root).with_read(&palace_db(store), |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, outcome, note, actor_id, created_at FROM decision_outcomes
             WHERE decision_id = ?1
             ORDER BY CAST(RTRIM(created_at, 'Z') AS INTEGER) ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![decision_id], |row| {
                Ok(OutcomeEntry {
                    id: row.get(0)?,
                    outcome: row.get(1)?,
                    note: row.get(2)?,
                    actor_id: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "records",
        "version": "0.1.0",
        "description": "Ideas, decisions and learnings with scope, authority and lifecycle",
        "commands": [
            { "name": "create", "parameters": ["kind", "content", "scope", "scope_path"] },
            { "name": "get", "parameters": ["id"] },
            { "name": "list", "parameters": ["kind", "scope", "scope_path", "tag", "limit"] },
            { "name": "search", "parameters": ["kind", "query", "limit"] },
            { "name": "set_tags", "parameters": ["id", "tags"] },
            { "name": "record_outcome", "parameters": ["decision_id", "outcome", "note"] }
        ],
        "storage": ["palace.db"]
    })
}
