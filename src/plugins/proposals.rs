//! Proposal governance: agent-authored decisions and learnings wait here
//! for a human to approve or reject them.
//!
//! - `create_proposal` refuses a second pending proposal with the same dedupe
//!   key. The partial unique index on `proposals(dedupe_key)` backs the check,
//!   so racing submissions cannot both survive.
//! - `approve_proposal` promotes exactly one authoritative record and keeps
//!   the proposal as history; `reject_proposal` promotes nothing.
//! - `direct_write` is the human-only bypass and always audits a content hash.

use crate::core::audit;
use crate::core::broker::DbBroker;
use crate::core::caller::Caller;
use crate::core::error::PalaceError;
use crate::core::model::{
    self, Authority, AuditAction, ProposalStatus, ProposedAs, RecordKind, Scope, Source,
};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::records::{self, NewDecision, NewLearning, RecordMeta};
use rusqlite::types::ToSql;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: String,
    pub proposed_as: ProposedAs,
    pub content: String,
    pub context: String,
    pub rationale: String,
    pub scope: Scope,
    pub scope_path: String,
    pub source: Source,
    pub confidence: Option<f64>,
    pub classification_confidence: f64,
    pub classification_signals: Vec<String>,
    pub dedupe_key: String,
    pub status: ProposalStatus,
    pub created_by: String,
    pub session_id: Option<String>,
    pub reviewed_by: Option<String>,
    pub review_note: Option<String>,
    pub reviewed_at: Option<String>,
    pub promoted_record_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn default_scope() -> Scope {
    Scope::Palace
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProposal {
    pub proposed_as: ProposedAs,
    pub content: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default = "default_scope")]
    pub scope: Scope,
    #[serde(default)]
    pub scope_path: String,
    /// Initial confidence of a proposed learning.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Supplied by the caller's own classifier; computed when absent.
    #[serde(default)]
    pub classification: Option<Classification>,
}

/// Which kind a candidate text most likely is, with the cues that said so.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub proposed_as: ProposedAs,
    pub confidence: f64,
    pub signals: Vec<String>,
}

const DECISION_CUES: &[&str] = &[
    "decided",
    "we will",
    "we'll",
    "going with",
    "chose",
    "choose",
    "adopt",
    "standardize",
    "instead of",
    "should use",
    "must use",
    "prefer",
    "always",
    "never",
];

const LEARNING_CUES: &[&str] = &[
    "learned",
    "discovered",
    "turns out",
    "found that",
    "gotcha",
    "note that",
    "fails when",
    "breaks when",
    "because",
    "requires",
    "needs",
    "caveat",
    "workaround",
];

/// Keyword heuristic for classifying free text as a decision or a learning.
pub fn classify_candidate(text: &str) -> Classification {
    let lower = text.to_lowercase();
    let mut signals = Vec::new();
    let mut decision = 0usize;
    let mut learning = 0usize;
    for cue in DECISION_CUES {
        if lower.contains(cue) {
            decision += 1;
            signals.push(format!("decision:{}", cue));
        }
    }
    for cue in LEARNING_CUES {
        if lower.contains(cue) {
            learning += 1;
            signals.push(format!("learning:{}", cue));
        }
    }

    let total = decision + learning;
    let (proposed_as, confidence) = if total == 0 {
        (ProposedAs::Learning, 0.5)
    } else if decision > learning {
        (ProposedAs::Decision, decision as f64 / total as f64)
    } else {
        (ProposedAs::Learning, learning as f64 / total as f64)
    };

    Classification {
        proposed_as,
        confidence,
        signals,
    }
}

fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic fingerprint of (proposed_as, content, scope, scope_path).
/// Content is compared with whitespace collapsed and case folded.
pub fn dedupe_key(proposed_as: ProposedAs, content: &str, scope: Scope, scope_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(proposed_as.as_str());
    hasher.update([0u8]);
    hasher.update(normalize_content(content));
    hasher.update([0u8]);
    hasher.update(scope.as_str());
    hasher.update([0u8]);
    hasher.update(scope_path.trim());
    format!("{:x}", hasher.finalize())
}

const PROPOSAL_COLUMNS: &str = "id, proposed_as, content, context, rationale, scope, scope_path, source, confidence, classification_confidence, classification_signals, dedupe_key, status, created_by, session_id, reviewed_by, review_note, reviewed_at, promoted_record_id, created_at, updated_at";

fn proposal_from_row(row: &Row<'_>) -> rusqlite::Result<(Proposal, String)> {
    Ok((
        Proposal {
            id: row.get(0)?,
            proposed_as: row.get(1)?,
            content: row.get(2)?,
            context: row.get(3)?,
            rationale: row.get(4)?,
            scope: row.get(5)?,
            scope_path: row.get(6)?,
            source: row.get(7)?,
            confidence: row.get(8)?,
            classification_confidence: row.get(9)?,
            classification_signals: Vec::new(),
            dedupe_key: row.get(11)?,
            status: row.get(12)?,
            created_by: row.get(13)?,
            session_id: row.get(14)?,
            reviewed_by: row.get(15)?,
            review_note: row.get(16)?,
            reviewed_at: row.get(17)?,
            promoted_record_id: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
        },
        row.get(10)?,
    ))
}

fn decode_proposal((mut proposal, signals): (Proposal, String)) -> Result<Proposal, PalaceError> {
    proposal.classification_signals = serde_json::from_str(&signals)?;
    Ok(proposal)
}

fn read_proposal(conn: &Connection, id: &str) -> Result<Option<Proposal>, PalaceError> {
    let sql = format!("SELECT {} FROM proposals WHERE id = ?1", PROPOSAL_COLUMNS);
    conn.query_row(&sql, params![id], proposal_from_row)
        .optional()?
        .map(decode_proposal)
        .transpose()
}

fn pending_with_key(conn: &Connection, key: &str) -> Result<Option<String>, PalaceError> {
    Ok(conn
        .query_row(
            "SELECT id FROM proposals WHERE dedupe_key = ?1 AND status = 'pending'",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn duplicate(existing: String) -> PalaceError {
    PalaceError::conflict(
        format!("a pending proposal with the same content and scope already exists ({})", existing),
        existing,
    )
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

pub fn create_proposal(
    store: &Store,
    caller: &Caller,
    req: &NewProposal,
) -> Result<Proposal, PalaceError> {
    model::require_content("content", &req.content)?;
    let scope_path = model::normalize_scope_path(req.scope, &req.scope_path)?;
    let confidence = match req.proposed_as {
        ProposedAs::Learning => {
            let c = req.confidence.unwrap_or(records::DEFAULT_LEARNING_CONFIDENCE);
            model::require_unit_interval("confidence", c)?;
            Some(c)
        }
        ProposedAs::Decision => None,
    };
    let classification = match &req.classification {
        Some(c) => {
            model::require_unit_interval("classification.confidence", c.confidence)?;
            c.clone()
        }
        None => classify_candidate(&req.content),
    };

    let now = time::now_epoch_z();
    let proposal = Proposal {
        id: time::new_id("p"),
        proposed_as: req.proposed_as,
        content: req.content.trim().to_string(),
        context: req.context.clone(),
        rationale: req.rationale.clone(),
        scope: req.scope,
        dedupe_key: dedupe_key(req.proposed_as, &req.content, req.scope, &scope_path),
        scope_path,
        source: caller.actor_type.into(),
        confidence,
        classification_confidence: classification.confidence,
        classification_signals: classification.signals,
        status: ProposalStatus::Pending,
        created_by: caller.actor_id.clone(),
        session_id: caller.session_id.clone(),
        reviewed_by: None,
        review_note: None,
        reviewed_at: None,
        promoted_record_id: None,
        created_at: now.clone(),
        updated_at: now,
    };
    let signals = serde_json::to_string(&proposal.classification_signals)?;

    let broker = DbBroker::new(&store.root);
    broker.with_write(&records::palace_db(store), &caller.actor_id, "proposal.create", |conn| {
        if let Some(existing) = pending_with_key(conn, &proposal.dedupe_key)? {
            return Err(duplicate(existing));
        }
        let inserted = conn.execute(
            &format!(
                "INSERT INTO proposals({}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                PROPOSAL_COLUMNS
            ),
            params![
                proposal.id,
                proposal.proposed_as,
                proposal.content,
                proposal.context,
                proposal.rationale,
                proposal.scope,
                proposal.scope_path,
                proposal.source,
                proposal.confidence,
                proposal.classification_confidence,
                signals,
                proposal.dedupe_key,
                proposal.status,
                proposal.created_by,
                proposal.session_id,
                proposal.reviewed_by,
                proposal.review_note,
                proposal.reviewed_at,
                proposal.promoted_record_id,
                proposal.created_at,
                proposal.updated_at
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            // Another writer got there between the check and the insert.
            Err(e) if is_unique_violation(&e) => match pending_with_key(conn, &proposal.dedupe_key)? {
                Some(existing) => Err(duplicate(existing)),
                None => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    })?;

    tracing::debug!(proposal = %proposal.id, kind = %proposal.proposed_as, "proposal created");
    Ok(proposal)
}

pub fn get_proposal(store: &Store, id: &str) -> Result<Proposal, PalaceError> {
    DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        read_proposal(conn, id)?
            .ok_or_else(|| PalaceError::NotFound(format!("Proposal '{}' not found", id)))
    })
}

/// Proposals, newest first, optionally restricted to one status.
pub fn list_proposals(
    store: &Store,
    status: Option<ProposalStatus>,
    limit: Option<usize>,
) -> Result<Vec<Proposal>, PalaceError> {
    DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        let mut query = format!("SELECT {} FROM proposals WHERE 1=1", PROPOSAL_COLUMNS);
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(s) = status {
            query.push_str(" AND status = ?");
            params.push(Box::new(s));
        }
        query.push_str(" ORDER BY CAST(RTRIM(created_at, 'Z') AS INTEGER) DESC, id DESC");
        if let Some(l) = limit {
            query.push_str(&format!(" LIMIT {}", l));
        }

        let mut stmt = conn.prepare(&query)?;
        let params_as_dyn: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(&params_as_dyn[..], proposal_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode_proposal).collect()
    })
}

fn require_pending(conn: &Connection, id: &str) -> Result<Proposal, PalaceError> {
    let proposal = read_proposal(conn, id)?
        .ok_or_else(|| PalaceError::NotFound(format!("Proposal '{}' not found", id)))?;
    if proposal.status != ProposalStatus::Pending {
        return Err(PalaceError::conflict(
            format!("proposal {} is already {}", id, proposal.status),
            id,
        ));
    }
    Ok(proposal)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalReceipt {
    pub proposal_id: String,
    pub record_id: String,
    pub record_kind: RecordKind,
}

/// Promote a pending proposal into an authoritative record.
///
/// The record keeps the proposal's source; the proposal becomes `approved`
/// and remembers the promoted record id. Both writes share one transaction.
pub fn approve_proposal(
    store: &Store,
    reviewer: &Caller,
    id: &str,
    note: &str,
) -> Result<ApprovalReceipt, PalaceError> {
    reviewer.require_human("approve_proposal")?;
    let now = time::now_epoch_z();

    let broker = DbBroker::new(&store.root);
    let (receipt, proposal) = broker.with_write(&records::palace_db(store), &reviewer.actor_id, "proposal.approve", |conn| {
        let tx = conn.transaction()?;
        let proposal = require_pending(&tx, id)?;
        let meta = RecordMeta {
            source: proposal.source,
            authority: Authority::Approved,
            actor_id: reviewer.actor_id.clone(),
            session_id: proposal.session_id.clone(),
            origin_workspace: None,
        };
        let (record_id, record_kind) = match proposal.proposed_as {
            ProposedAs::Decision => {
                let decision = records::build_decision(
                    &NewDecision {
                        content: proposal.content.clone(),
                        rationale: proposal.rationale.clone(),
                        context: proposal.context.clone(),
                        scope: proposal.scope,
                        scope_path: proposal.scope_path.clone(),
                        tags: Vec::new(),
                    },
                    &meta,
                )?;
                records::insert_decision(&tx, &decision)?;
                (decision.id, RecordKind::Decision)
            }
            ProposedAs::Learning => {
                let learning = records::build_learning(
                    &NewLearning {
                        content: proposal.content.clone(),
                        context: proposal.context.clone(),
                        confidence: proposal.confidence,
                        scope: proposal.scope,
                        scope_path: proposal.scope_path.clone(),
                        tags: Vec::new(),
                    },
                    &meta,
                )?;
                records::insert_learning(&tx, &learning)?;
                (learning.id, RecordKind::Learning)
            }
        };
        tx.execute(
            "UPDATE proposals SET status = ?1, reviewed_by = ?2, review_note = ?3, reviewed_at = ?4, promoted_record_id = ?5, updated_at = ?4 WHERE id = ?6",
            params![ProposalStatus::Approved, reviewer.actor_id, note, now, record_id, id],
        )?;
        tx.commit()?;
        Ok((
            ApprovalReceipt {
                proposal_id: id.to_string(),
                record_id,
                record_kind,
            },
            proposal,
        ))
    })?;

    audit::record_best_effort(
        store,
        AuditAction::Approve,
        reviewer,
        &receipt.record_id,
        receipt.record_kind.as_str(),
        serde_json::json!({
            "proposal_id": id,
            "note": note,
            "source": proposal.source,
            "content_hash": audit::content_hash(&proposal.content),
        }),
    );
    Ok(receipt)
}

/// Reject a pending proposal. No record is created.
pub fn reject_proposal(
    store: &Store,
    reviewer: &Caller,
    id: &str,
    note: &str,
) -> Result<Proposal, PalaceError> {
    reviewer.require_human("reject_proposal")?;
    let now = time::now_epoch_z();

    let broker = DbBroker::new(&store.root);
    let proposal = broker.with_write(&records::palace_db(store), &reviewer.actor_id, "proposal.reject", |conn| {
        let tx = conn.transaction()?;
        require_pending(&tx, id)?;
        tx.execute(
            "UPDATE proposals SET status = ?1, reviewed_by = ?2, review_note = ?3, reviewed_at = ?4, updated_at = ?4 WHERE id = ?5",
            params![ProposalStatus::Rejected, reviewer.actor_id, note, now, id],
        )?;
        let proposal = read_proposal(&tx, id)?
            .ok_or_else(|| PalaceError::NotFound(format!("Proposal '{}' not found", id)))?;
        tx.commit()?;
        Ok(proposal)
    })?;

    audit::record_best_effort(
        store,
        AuditAction::Reject,
        reviewer,
        id,
        "proposal",
        serde_json::json!({ "note": note, "proposed_as": proposal.proposed_as }),
    );
    Ok(proposal)
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectWrite {
    pub kind: ProposedAs,
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
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectWriteReceipt {
    pub record_id: String,
    pub record_kind: RecordKind,
    pub content_hash: String,
    /// Absent only if the audit write itself failed.
    pub audit_id: Option<String>,
}

/// Human-only bypass: write an authoritative record immediately.
pub fn direct_write(
    store: &Store,
    caller: &Caller,
    req: &DirectWrite,
) -> Result<DirectWriteReceipt, PalaceError> {
    caller.require_human("direct_write")?;
    let meta = RecordMeta::approved_by(caller);

    let (record_id, record_kind, content) = match req.kind {
        ProposedAs::Decision => {
            let d = records::create_decision(
                store,
                &NewDecision {
                    content: req.content.clone(),
                    rationale: req.rationale.clone(),
                    context: req.context.clone(),
                    scope: req.scope,
                    scope_path: req.scope_path.clone(),
                    tags: req.tags.clone(),
                },
                &meta,
            )?;
            (d.id, RecordKind::Decision, d.content)
        }
        ProposedAs::Learning => {
            let l = records::create_learning(
                store,
                &NewLearning {
                    content: req.content.clone(),
                    context: req.context.clone(),
                    confidence: req.confidence,
                    scope: req.scope,
                    scope_path: req.scope_path.clone(),
                    tags: req.tags.clone(),
                },
                &meta,
            )?;
            (l.id, RecordKind::Learning, l.content)
        }
    };

    let hash = audit::content_hash(&content);
    let entry = audit::record_best_effort(
        store,
        AuditAction::DirectWrite,
        caller,
        &record_id,
        record_kind.as_str(),
        serde_json::json!({
            "content_hash": hash,
            "scope": req.scope,
            "scope_path": req.scope_path,
        }),
    );

    Ok(DirectWriteReceipt {
        record_id,
        record_kind,
        content_hash: hash,
        audit_id: entry.map(|e| e.id),
    })
}

/// Where a governed write ended up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Submission {
    Written(DirectWriteReceipt),
    Proposed(Proposal),
}

impl Submission {
    pub fn is_proposal(&self) -> bool {
        matches!(self, Submission::Proposed(_))
    }
}

/// Route a decision: humans write directly, agents propose.
pub fn submit_decision(
    store: &Store,
    caller: &Caller,
    req: &NewDecision,
) -> Result<Submission, PalaceError> {
    if caller.is_privileged() {
        let receipt = direct_write(
            store,
            caller,
            &DirectWrite {
                kind: ProposedAs::Decision,
                content: req.content.clone(),
                rationale: req.rationale.clone(),
                context: req.context.clone(),
                scope: req.scope,
                scope_path: req.scope_path.clone(),
                confidence: None,
                tags: req.tags.clone(),
            },
        )?;
        return Ok(Submission::Written(receipt));
    }
    let proposal = create_proposal(
        store,
        caller,
        &NewProposal {
            proposed_as: ProposedAs::Decision,
            content: req.content.clone(),
            context: req.context.clone(),
            rationale: req.rationale.clone(),
            scope: req.scope,
            scope_path: req.scope_path.clone(),
            confidence: None,
            classification: None,
        },
    )?;
    Ok(Submission::Proposed(proposal))
}

/// Route a learning: humans write directly, agents propose.
pub fn submit_learning(
    store: &Store,
    caller: &Caller,
    req: &NewLearning,
) -> Result<Submission, PalaceError> {
    if caller.is_privileged() {
        let receipt = direct_write(
            store,
            caller,
            &DirectWrite {
                kind: ProposedAs::Learning,
                content: req.content.clone(),
                rationale: String::new(),
                context: req.context.clone(),
                scope: req.scope,
                scope_path: req.scope_path.clone(),
                confidence: req.confidence,
                tags: req.tags.clone(),
            },
        )?;
        return Ok(Submission::Written(receipt));
    }
    let proposal = create_proposal(
        store,
        caller,
        &NewProposal {
            proposed_as: ProposedAs::Learning,
            content: req.content.clone(),
            context: req.context.clone(),
            rationale: String::new(),
            scope: req.scope,
            scope_path: req.scope_path.clone(),
            confidence: req.confidence,
            classification: None,
        },
    )?;
    Ok(Submission::Proposed(proposal))
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "proposals",
        "version": "0.1.0",
        "description": "Human review gate for agent-authored decisions and learnings",
        "commands": [
            { "name": "create", "parameters": ["proposed_as", "content", "scope", "scope_path", "context", "rationale"] },
            { "name": "approve", "parameters": ["id", "note"], "requires": "human" },
            { "name": "reject", "parameters": ["id", "note"], "requires": "human" },
            { "name": "direct_write", "parameters": ["kind", "content", "scope", "scope_path"], "requires": "human" },
            { "name": "list", "parameters": ["status", "limit"] }
        ],
        "storage": ["palace.db"]
    })
}
