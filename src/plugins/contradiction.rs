//! Contradiction detection between governed records.
//!
//! A single-record check gathers similar records (vector or keyword
//! similarity) and asks the pairwise classifier about each pair; a pair check
//! classifies two explicit ids. Findings at or above the configured
//! confidence can be persisted as `contradicts` links, but only for
//! privileged callers: agent checks never auto-link.

use crate::core::audit;
use crate::core::broker::DbBroker;
use crate::core::caller::Caller;
use crate::core::config::ContradictionConfig;
use crate::core::error::PalaceError;
use crate::core::model::{AuditAction, RecordKind, Relation};
use crate::core::output;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::links;
use crate::plugins::records::{self, Record};
use crate::plugins::semantic::{self, Collaborators, ContradictionVerdict};
use rusqlite::{OptionalExtension, params};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

pub const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionFinding {
    pub record_id: String,
    pub conflicting_id: String,
    pub conflicting_kind: RecordKind,
    pub conflicting_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    pub verdict: ContradictionVerdict,
    /// Set when the finding was persisted as a `contradicts` link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionReport {
    pub record_id: String,
    pub candidates_checked: usize,
    pub findings: Vec<ContradictionFinding>,
    pub auto_link_requested: bool,
    /// True when the caller asked for auto-linking but is not privileged.
    pub auto_link_suppressed: bool,
}

/// Canonical key of an unordered record pair.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}|{}", a, b)
    } else {
        format!("{}|{}", b, a)
    }
}

/// Agents never persist contradiction links, whatever they ask for.
fn effective_auto_link(caller: &Caller, requested: bool) -> bool {
    requested && caller.is_privileged()
}

fn ignored_partners(store: &Store, record_id: &str) -> Result<FxHashSet<String>, PalaceError> {
    DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        let mut stmt = conn.prepare(
            "SELECT record_a, record_b FROM ignored_contradictions WHERE record_a = ?1 OR record_b = ?1",
        )?;
        let rows = stmt
            .query_map(params![record_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .map(|(a, b)| if a == record_id { b } else { a })
            .collect())
    })
}

fn is_ignored(store: &Store, a: &str, b: &str) -> Result<bool, PalaceError> {
    let key = pair_key(a, b);
    DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        let found: Option<String> = conn
            .query_row(
                "SELECT pair_key FROM ignored_contradictions WHERE pair_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

/// Persist a `contradicts` link, reusing an existing one for the same pair.
fn link_contradiction(
    store: &Store,
    caller: &Caller,
    source: &Record,
    target: &Record,
    verdict: &ContradictionVerdict,
) -> Result<String, PalaceError> {
    let link = links::build_link(
        source.id(),
        source.kind(),
        target.id(),
        target.kind().into(),
        Relation::Contradicts,
        None,
        &caller.actor_id,
    );
    let broker = DbBroker::new(&store.root);
    let inserted = broker.with_write(
        &records::palace_db(store),
        &caller.actor_id,
        "contradiction.link",
        |conn| links::insert_link(conn, &link),
    );
    match inserted {
        Ok(()) => {
            audit::record_best_effort(
                store,
                AuditAction::ContradictionLink,
                caller,
                &link.id,
                "link",
                serde_json::json!({
                    "source_id": source.id(),
                    "target_id": target.id(),
                    "contradiction_type": verdict.contradiction_type,
                    "confidence": verdict.confidence,
                }),
            );
            Ok(link.id)
        }
        Err(PalaceError::Conflict { conflicting_id, .. }) => Ok(conflicting_id),
        Err(e) => Err(e),
    }
}

/// Check one record against its most similar live records.
pub fn check_record(
    store: &Store,
    collaborators: &Collaborators,
    config: &ContradictionConfig,
    caller: &Caller,
    record_id: &str,
    auto_link: bool,
) -> Result<ContradictionReport, PalaceError> {
    collaborators.require_classifier()?;
    let record = records::get_record(store, record_id)?;
    let link = effective_auto_link(caller, auto_link);
    if auto_link && !link {
        tracing::debug!(caller = %caller.actor_id, record = record_id, "auto-link suppressed for agent caller");
    }

    let exclude = ignored_partners(store, record_id)?;
    let candidates = semantic::similar_records(
        store,
        collaborators,
        &record,
        &exclude,
        config.candidate_limit,
        config.min_similarity,
    )?;

    let text = record.full_text();
    let mut findings = Vec::new();
    for candidate in &candidates {
        let verdict = collaborators.classify(&text, &candidate.record.full_text())?;
        if !verdict.is_contradiction || verdict.confidence < config.min_confidence {
            continue;
        }
        let link_id = if link {
            Some(link_contradiction(store, caller, &record, &candidate.record, &verdict)?)
        } else {
            None
        };
        findings.push(ContradictionFinding {
            record_id: record.id().to_string(),
            conflicting_id: candidate.record.id().to_string(),
            conflicting_kind: candidate.record.kind(),
            conflicting_preview: output::compact_line(candidate.record.content(), PREVIEW_CHARS),
            similarity: Some(candidate.similarity),
            verdict,
            link_id,
        });
    }

    Ok(ContradictionReport {
        record_id: record_id.to_string(),
        candidates_checked: candidates.len(),
        findings,
        auto_link_requested: auto_link,
        auto_link_suppressed: auto_link && !link,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairCheck {
    pub record_a: String,
    pub record_b: String,
    pub verdict: ContradictionVerdict,
    /// Contradiction at or above the confidence threshold.
    pub reported: bool,
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
}

/// Classify two explicit records, without a candidate search.
pub fn check_pair(
    store: &Store,
    collaborators: &Collaborators,
    config: &ContradictionConfig,
    caller: &Caller,
    record_a: &str,
    record_b: &str,
    auto_link: bool,
) -> Result<PairCheck, PalaceError> {
    collaborators.require_classifier()?;
    if record_a == record_b {
        return Err(PalaceError::ValidationError(
            "a record cannot contradict itself".to_string(),
        ));
    }
    let a = records::get_record(store, record_a)?;
    let b = records::get_record(store, record_b)?;
    let verdict = collaborators.classify(&a.full_text(), &b.full_text())?;
    let ignored = is_ignored(store, record_a, record_b)?;
    let reported =
        !ignored && verdict.is_contradiction && verdict.confidence >= config.min_confidence;

    let link_id = if reported && effective_auto_link(caller, auto_link) {
        Some(link_contradiction(store, caller, &a, &b, &verdict)?)
    } else {
        None
    };

    Ok(PairCheck {
        record_a: record_a.to_string(),
        record_b: record_b.to_string(),
        verdict,
        reported,
        ignored,
        link_id,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionPair {
    pub link_id: String,
    pub source_id: String,
    pub source_preview: String,
    pub target_id: String,
    pub target_preview: String,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionSummary {
    pub total: usize,
    /// Both endpoints are still live records.
    pub active: usize,
    /// At least one endpoint was retired (or no longer exists).
    pub resolved: usize,
    pub top: Vec<ContradictionPair>,
}

/// Aggregate every `contradicts` link in the store.
pub fn summary(store: &Store, top_n: usize) -> Result<ContradictionSummary, PalaceError> {
    let mut seen = FxHashSet::default();
    let all: Vec<_> = links::contradiction_links(store)?
        .into_iter()
        .filter(|l| seen.insert(pair_key(&l.source_id, &l.target_id)))
        .collect();

    let mut pairs = Vec::with_capacity(all.len());
    DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        for link in &all {
            let source = records::read_record(conn, &link.source_id)?;
            let target = match link.target_kind.record_kind() {
                Some(_) => records::read_record(conn, &link.target_id)?,
                None => None,
            };
            let active = matches!((&source, &target), (Some(s), Some(t)) if s.is_live() && t.is_live());
            let preview = |r: &Option<Record>| {
                r.as_ref()
                    .map(|r| output::compact_line(r.content(), PREVIEW_CHARS))
                    .unwrap_or_default()
            };
            pairs.push(ContradictionPair {
                link_id: link.id.clone(),
                source_id: link.source_id.clone(),
                source_preview: preview(&source),
                target_id: link.target_id.clone(),
                target_preview: preview(&target),
                active,
                created_at: link.created_at.clone(),
            });
        }
        Ok(())
    })?;

    let total = pairs.len();
    let active = pairs.iter().filter(|p| p.active).count();

    pairs.sort_by(|a, b| {
        b.active
            .cmp(&a.active)
            .then_with(|| {
                let ta = time::parse_epoch_z(&a.created_at).unwrap_or(0);
                let tb = time::parse_epoch_z(&b.created_at).unwrap_or(0);
                tb.cmp(&ta)
            })
            .then_with(|| a.link_id.cmp(&b.link_id))
    });
    pairs.truncate(top_n);

    Ok(ContradictionSummary {
        total,
        active,
        resolved: total - active,
        top: pairs,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoredPair {
    pub pair_key: String,
    pub record_a: String,
    pub record_b: String,
    pub reason: String,
    pub actor_id: String,
    pub created_at: String,
}

/// Exclude a record pair from future candidate sets.
pub fn ignore_contradiction(
    store: &Store,
    caller: &Caller,
    record_a: &str,
    record_b: &str,
    reason: &str,
) -> Result<IgnoredPair, PalaceError> {
    if record_a == record_b {
        return Err(PalaceError::ValidationError(
            "cannot ignore a record paired with itself".to_string(),
        ));
    }
    records::get_record(store, record_a)?;
    records::get_record(store, record_b)?;

    let key = pair_key(record_a, record_b);
    let (first, second) = key.split_once('|').unwrap_or((record_a, record_b));
    let ignored = IgnoredPair {
        pair_key: key.clone(),
        record_a: first.to_string(),
        record_b: second.to_string(),
        reason: reason.to_string(),
        actor_id: caller.actor_id.clone(),
        created_at: time::now_epoch_z(),
    };

    let broker = DbBroker::new(&store.root);
    broker.with_write(&records::palace_db(store), &caller.actor_id, "contradiction.ignore", |conn| {
        let exists: Option<String> = conn
            .query_row(
                "SELECT pair_key FROM ignored_contradictions WHERE pair_key = ?1",
                params![ignored.pair_key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = exists {
            return Err(PalaceError::conflict(
                format!("pair {} is already ignored", existing),
                existing,
            ));
        }
        conn.execute(
            "INSERT INTO ignored_contradictions(pair_key, record_a, record_b, reason, actor_id, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ignored.pair_key,
                ignored.record_a,
                ignored.record_b,
                ignored.reason,
                ignored.actor_id,
                ignored.created_at
            ],
        )?;
        Ok(())
    })?;

    audit::record_best_effort(
        store,
        AuditAction::IgnoreContradiction,
        caller,
        &key,
        "contradiction_pair",
        serde_json::json!({ "reason": reason }),
    );
    Ok(ignored)
}

pub fn list_ignored(store: &Store) -> Result<Vec<IgnoredPair>, PalaceError> {
    DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        let mut stmt = conn.prepare(
            "SELECT pair_key, record_a, record_b, reason, actor_id, created_at
             FROM ignored_contradictions ORDER BY pair_key ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(IgnoredPair {
                    pair_key: row.get(0)?,
                    record_a: row.get(1)?,
                    record_b: row.get(2)?,
                    reason: row.get(3)?,
                    actor_id: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "contradiction",
        "version": "0.1.0",
        "description": "Pairwise contradiction checks between records",
        "commands": [
            { "name": "check", "parameters": ["id", "auto_link"] },
            { "name": "check_pair", "parameters": ["a", "b", "auto_link"] },
            { "name": "summary", "parameters": ["top"] },
            { "name": "ignore", "parameters": ["a", "b", "reason"] },
            { "name": "list_ignored", "parameters": [] }
        ],
        "storage": ["palace.db"]
    })
}
