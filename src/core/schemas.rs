//! Centralized database schema definitions.
//!
//! Workspace stores and the personal corridor store share one schema in
//! `palace.db`. Tables are created in the order listed in [`PALACE_DB_SCHEMA`].

pub const PALACE_DB_NAME: &str = "palace.db";
pub const PALACE_SCHEMA_VERSION: u32 = 1;

pub const PALACE_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const PALACE_DB_SCHEMA_IDEAS: &str = "
    CREATE TABLE IF NOT EXISTS ideas (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        context TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'active',
        scope TEXT NOT NULL DEFAULT 'palace',
        scope_path TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL DEFAULT 'human',
        authority TEXT NOT NULL DEFAULT 'approved',
        actor_id TEXT NOT NULL DEFAULT '',
        session_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const PALACE_DB_SCHEMA_DECISIONS: &str = "
    CREATE TABLE IF NOT EXISTS decisions (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        rationale TEXT NOT NULL DEFAULT '',
        context TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'active',
        outcome TEXT NOT NULL DEFAULT 'unknown',
        scope TEXT NOT NULL DEFAULT 'palace',
        scope_path TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL DEFAULT 'human',
        authority TEXT NOT NULL DEFAULT 'approved',
        actor_id TEXT NOT NULL DEFAULT '',
        session_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const PALACE_DB_SCHEMA_DECISION_OUTCOMES: &str = "
    CREATE TABLE IF NOT EXISTS decision_outcomes (
        id TEXT PRIMARY KEY,
        decision_id TEXT NOT NULL,
        outcome TEXT NOT NULL,
        note TEXT NOT NULL DEFAULT '',
        actor_id TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        FOREIGN KEY(decision_id) REFERENCES decisions(id)
    )
";

pub const PALACE_DB_SCHEMA_LEARNINGS: &str = "
    CREATE TABLE IF NOT EXISTS learnings (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        context TEXT NOT NULL DEFAULT '',
        confidence REAL NOT NULL DEFAULT 0.5,
        use_count INTEGER NOT NULL DEFAULT 0,
        last_used TEXT NOT NULL,
        decay_periods_applied INTEGER NOT NULL DEFAULT 0,
        lifecycle_status TEXT NOT NULL DEFAULT 'active',
        scope TEXT NOT NULL DEFAULT 'palace',
        scope_path TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL DEFAULT 'human',
        authority TEXT NOT NULL DEFAULT 'approved',
        origin_workspace TEXT,
        actor_id TEXT NOT NULL DEFAULT '',
        session_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (confidence >= 0.0 AND confidence <= 1.0)
    )
";

pub const PALACE_DB_SCHEMA_TAGS: &str = "
    CREATE TABLE IF NOT EXISTS record_tags (
        record_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY(record_id, tag)
    )
";

pub const PALACE_DB_SCHEMA_LINKS: &str = "
    CREATE TABLE IF NOT EXISTS links (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        source_kind TEXT NOT NULL,
        target_id TEXT NOT NULL,
        target_kind TEXT NOT NULL,
        relation TEXT NOT NULL,
        target_mtime INTEGER,
        actor_id TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        UNIQUE(source_id, target_id, relation)
    )
";

pub const PALACE_DB_SCHEMA_PROPOSALS: &str = "
    CREATE TABLE IF NOT EXISTS proposals (
        id TEXT PRIMARY KEY,
        proposed_as TEXT NOT NULL,
        content TEXT NOT NULL,
        context TEXT NOT NULL DEFAULT '',
        rationale TEXT NOT NULL DEFAULT '',
        scope TEXT NOT NULL,
        scope_path TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL DEFAULT 'agent',
        confidence REAL,
        classification_confidence REAL NOT NULL DEFAULT 0.0,
        classification_signals TEXT NOT NULL DEFAULT '[]', -- JSON array
        dedupe_key TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_by TEXT NOT NULL DEFAULT '',
        session_id TEXT,
        reviewed_by TEXT,
        review_note TEXT,
        reviewed_at TEXT,
        promoted_record_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const PALACE_DB_SCHEMA_AUDIT: &str = "
    CREATE TABLE IF NOT EXISTS audit_log (
        id TEXT PRIMARY KEY,
        action TEXT NOT NULL,
        actor_type TEXT NOT NULL,
        actor_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        target_kind TEXT NOT NULL,
        details TEXT NOT NULL DEFAULT '{}', -- JSON object
        created_at TEXT NOT NULL
    )
";

pub const PALACE_DB_TRIGGER_AUDIT_NO_UPDATE: &str = "
    CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log
    BEGIN
        SELECT RAISE(ABORT, 'audit_log is append-only');
    END
";

pub const PALACE_DB_TRIGGER_AUDIT_NO_DELETE: &str = "
    CREATE TRIGGER IF NOT EXISTS audit_log_no_delete BEFORE DELETE ON audit_log
    BEGIN
        SELECT RAISE(ABORT, 'audit_log is append-only');
    END
";

pub const PALACE_DB_SCHEMA_EMBEDDINGS: &str = "
    CREATE TABLE IF NOT EXISTS embeddings (
        record_id TEXT PRIMARY KEY,
        record_kind TEXT NOT NULL,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        vector TEXT NOT NULL, -- JSON array of f32
        created_at TEXT NOT NULL
    )
";

pub const PALACE_DB_SCHEMA_IGNORED_CONTRADICTIONS: &str = "
    CREATE TABLE IF NOT EXISTS ignored_contradictions (
        pair_key TEXT PRIMARY KEY,
        record_a TEXT NOT NULL,
        record_b TEXT NOT NULL,
        reason TEXT NOT NULL DEFAULT '',
        actor_id TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )
";

/// At most one pending proposal per dedupe key, enforced by the database so
/// concurrent identical submissions cannot both survive.
pub const PALACE_DB_INDEX_PROPOSALS_PENDING_DEDUPE: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_proposals_pending_dedupe ON proposals(dedupe_key) WHERE status = 'pending'";
pub const PALACE_DB_INDEX_PROPOSALS_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status)";
pub const PALACE_DB_INDEX_DECISIONS_SCOPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_decisions_scope ON decisions(scope, scope_path)";
pub const PALACE_DB_INDEX_LEARNINGS_SCOPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_learnings_scope ON learnings(scope, scope_path)";
pub const PALACE_DB_INDEX_IDEAS_SCOPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_ideas_scope ON ideas(scope, scope_path)";
pub const PALACE_DB_INDEX_LINKS_SOURCE: &str =
    "CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_id)";
pub const PALACE_DB_INDEX_LINKS_TARGET: &str =
    "CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_id)";
pub const PALACE_DB_INDEX_LINKS_RELATION: &str =
    "CREATE INDEX IF NOT EXISTS idx_links_relation ON links(relation)";
pub const PALACE_DB_INDEX_AUDIT_TARGET: &str =
    "CREATE INDEX IF NOT EXISTS idx_audit_target ON audit_log(target_id)";
pub const PALACE_DB_INDEX_OUTCOMES_DECISION: &str =
    "CREATE INDEX IF NOT EXISTS idx_outcomes_decision ON decision_outcomes(decision_id)";

pub const PALACE_DB_SCHEMA: &[&str] = &[
    PALACE_DB_SCHEMA_META,
    PALACE_DB_SCHEMA_IDEAS,
    PALACE_DB_SCHEMA_DECISIONS,
    PALACE_DB_SCHEMA_DECISION_OUTCOMES,
    PALACE_DB_SCHEMA_LEARNINGS,
    PALACE_DB_SCHEMA_TAGS,
    PALACE_DB_SCHEMA_LINKS,
    PALACE_DB_SCHEMA_PROPOSALS,
    PALACE_DB_SCHEMA_AUDIT,
    PALACE_DB_TRIGGER_AUDIT_NO_UPDATE,
    PALACE_DB_TRIGGER_AUDIT_NO_DELETE,
    PALACE_DB_SCHEMA_EMBEDDINGS,
    PALACE_DB_SCHEMA_IGNORED_CONTRADICTIONS,
    PALACE_DB_INDEX_PROPOSALS_PENDING_DEDUPE,
    PALACE_DB_INDEX_PROPOSALS_STATUS,
    PALACE_DB_INDEX_DECISIONS_SCOPE,
    PALACE_DB_INDEX_LEARNINGS_SCOPE,
    PALACE_DB_INDEX_IDEAS_SCOPE,
    PALACE_DB_INDEX_LINKS_SOURCE,
    PALACE_DB_INDEX_LINKS_TARGET,
    PALACE_DB_INDEX_LINKS_RELATION,
    PALACE_DB_INDEX_AUDIT_TARGET,
    PALACE_DB_INDEX_OUTCOMES_DECISION,
];
