//! Confidence decay for learnings that have gone unused.
//!
//! After `decay_days` of inactivity a learning loses `decay_rate` of its
//! confidence per elapsed `decay_interval_days`, compounding, floored at
//! `min_confidence`. Each learning remembers how many periods have already
//! been charged since `last_used`, so applying decay twice at one instant is a
//! no-op while later applications keep compounding. Reinforcement or use
//! resets the clock.

use crate::core::audit;
use crate::core::broker::DbBroker;
use crate::core::caller::Caller;
use crate::core::config::DecayConfig;
use crate::core::error::PalaceError;
use crate::core::model::{self, AuditAction, LifecycleStatus, RecordKind};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::records::{self, Learning, ReadHit, RecordFilter};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Decay state of one learning at a given instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecayAssessment {
    pub learning_id: String,
    pub content: String,
    pub inactive_days: u64,
    /// Periods elapsed since `last_used`, whether charged yet or not.
    pub elapsed_periods: u64,
    /// Periods not yet applied to the stored confidence.
    pub pending_periods: u64,
    pub current_confidence: f64,
    pub projected_confidence: f64,
    pub at_risk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_decay: Option<u64>,
}

impl DecayAssessment {
    pub fn delta(&self) -> f64 {
        self.projected_confidence - self.current_confidence
    }

    pub fn will_decay(&self) -> bool {
        self.projected_confidence < self.current_confidence
    }
}

/// `confidence * (1 - rate)^periods`, floored at `min_confidence`, never above
/// the starting confidence.
pub fn decayed_confidence(confidence: f64, periods: u64, config: &DecayConfig) -> f64 {
    if periods == 0 {
        return confidence;
    }
    let exponent = i32::try_from(periods).unwrap_or(i32::MAX);
    let decayed = confidence * (1.0 - config.decay_rate).powi(exponent);
    let floored = decayed.max(config.min_confidence);
    model::clamp_unit(floored.min(confidence))
}

/// Periods elapsed after the grace window for a given inactivity.
pub fn elapsed_periods(inactive_days: u64, config: &DecayConfig) -> u64 {
    if inactive_days <= config.decay_days {
        return 0;
    }
    (inactive_days - config.decay_days) / config.decay_interval_days.max(1)
}

pub fn assess(learning: &Learning, config: &DecayConfig, now_secs: u64) -> DecayAssessment {
    let last_used = time::parse_epoch_z(&learning.last_used).unwrap_or(now_secs);
    let inactive_days = time::days_between(last_used, now_secs);
    let elapsed = elapsed_periods(inactive_days, config);
    let applied = u64::try_from(learning.decay_periods_applied).unwrap_or(0);
    let pending = elapsed.saturating_sub(applied);

    let at_risk = inactive_days <= config.decay_days
        && inactive_days > config.decay_days.saturating_sub(config.at_risk_window_days);

    DecayAssessment {
        learning_id: learning.id.clone(),
        content: learning.content.clone(),
        inactive_days,
        elapsed_periods: elapsed,
        pending_periods: pending,
        current_confidence: learning.confidence,
        projected_confidence: decayed_confidence(learning.confidence, pending, config),
        at_risk,
        days_until_decay: at_risk.then(|| config.decay_days - inactive_days),
    }
}

fn active_learnings(store: &Store) -> Result<Vec<Learning>, PalaceError> {
    records::list_learnings(store, &RecordFilter::default(), ReadHit::Ignore)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayStats {
    pub enabled: bool,
    pub active_learnings: usize,
    pub average_confidence: f64,
    pub pending_decay: usize,
    pub at_risk: usize,
    pub at_floor: usize,
}

pub fn decay_stats(store: &Store, config: &DecayConfig) -> Result<DecayStats, PalaceError> {
    decay_stats_at(store, config, time::now_secs())
}

pub fn decay_stats_at(
    store: &Store,
    config: &DecayConfig,
    now_secs: u64,
) -> Result<DecayStats, PalaceError> {
    let learnings = active_learnings(store)?;
    let assessments: Vec<DecayAssessment> = learnings
        .iter()
        .map(|l| assess(l, config, now_secs))
        .collect();
    let average_confidence = if learnings.is_empty() {
        0.0
    } else {
        learnings.iter().map(|l| l.confidence).sum::<f64>() / learnings.len() as f64
    };

    Ok(DecayStats {
        enabled: config.enabled,
        active_learnings: learnings.len(),
        average_confidence,
        pending_decay: if config.enabled {
            assessments.iter().filter(|a| a.will_decay()).count()
        } else {
            0
        },
        at_risk: assessments.iter().filter(|a| a.at_risk).count(),
        at_floor: learnings
            .iter()
            .filter(|l| l.confidence <= config.min_confidence)
            .count(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayPreview {
    /// Learnings whose confidence would drop, largest drop first.
    pub affected: Vec<DecayAssessment>,
    pub total_affected: usize,
    /// Inactive learnings approaching the grace limit, soonest first.
    pub at_risk: Vec<DecayAssessment>,
}

/// Compute, without persisting, what `apply_decay` would change now.
pub fn preview_decay(
    store: &Store,
    config: &DecayConfig,
    limit: usize,
) -> Result<DecayPreview, PalaceError> {
    preview_decay_at(store, config, limit, time::now_secs())
}

pub fn preview_decay_at(
    store: &Store,
    config: &DecayConfig,
    limit: usize,
    now_secs: u64,
) -> Result<DecayPreview, PalaceError> {
    config.validate()?;
    let assessments: Vec<DecayAssessment> = active_learnings(store)?
        .iter()
        .map(|l| assess(l, config, now_secs))
        .collect();

    let mut affected: Vec<DecayAssessment> = if config.enabled {
        assessments.iter().filter(|a| a.will_decay()).cloned().collect()
    } else {
        Vec::new()
    };
    affected.sort_by(|a, b| {
        a.delta()
            .partial_cmp(&b.delta())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.learning_id.cmp(&b.learning_id))
    });
    let total_affected = affected.len();
    affected.truncate(limit);

    let mut at_risk: Vec<DecayAssessment> =
        assessments.into_iter().filter(|a| a.at_risk).collect();
    at_risk.sort_by(|a, b| {
        a.days_until_decay
            .cmp(&b.days_until_decay)
            .then_with(|| a.learning_id.cmp(&b.learning_id))
    });
    at_risk.truncate(limit);

    Ok(DecayPreview {
        affected,
        total_affected,
        at_risk,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecayReport {
    pub updated: usize,
    /// Mean change over updated learnings (negative or zero).
    pub average_delta: f64,
}

pub fn apply_decay(
    store: &Store,
    caller: &Caller,
    config: &DecayConfig,
) -> Result<DecayReport, PalaceError> {
    apply_decay_at(store, caller, config, time::now_secs())
}

/// Persist every pending decay. The read-modify-write runs under the
/// database write lock, so concurrent applications never lose an update.
pub fn apply_decay_at(
    store: &Store,
    caller: &Caller,
    config: &DecayConfig,
    now_secs: u64,
) -> Result<DecayReport, PalaceError> {
    config.validate()?;
    if !config.enabled {
        return Ok(DecayReport {
            updated: 0,
            average_delta: 0.0,
        });
    }

    let now = time::epoch_z(now_secs);
    let broker = DbBroker::new(&store.root);
    let report = broker.with_write(&records::palace_db(store), &caller.actor_id, "decay.apply", |conn| {
        let tx = conn.transaction()?;
        let learnings: Vec<Learning> = {
            let mut stmt = tx.prepare("SELECT id FROM learnings WHERE lifecycle_status = ?1")?;
            let ids = stmt
                .query_map(params![LifecycleStatus::Active], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(learning) = records::read_learning(&tx, &id)? {
                    out.push(learning);
                }
            }
            out
        };

        let mut updated = 0usize;
        let mut total_delta = 0.0f64;
        for learning in &learnings {
            let assessment = assess(learning, config, now_secs);
            if assessment.pending_periods == 0 {
                continue;
            }
            tx.execute(
                "UPDATE learnings SET confidence = ?1, decay_periods_applied = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    assessment.projected_confidence,
                    assessment.elapsed_periods as i64,
                    now,
                    learning.id
                ],
            )?;
            if assessment.will_decay() {
                updated += 1;
                total_delta += assessment.delta();
            }
        }
        tx.commit()?;

        Ok(DecayReport {
            updated,
            average_delta: if updated == 0 {
                0.0
            } else {
                total_delta / updated as f64
            },
        })
    })?;

    if report.updated > 0 {
        tracing::info!(
            updated = report.updated,
            average_delta = report.average_delta,
            "applied learning decay"
        );
        audit::record_best_effort(
            store,
            AuditAction::ApplyDecay,
            caller,
            "learnings",
            RecordKind::Learning.as_str(),
            serde_json::json!({
                "updated": report.updated,
                "average_delta": report.average_delta,
            }),
        );
    }

    Ok(report)
}

/// Restart a learning's decay clock without touching its confidence.
pub fn reinforce_learning(store: &Store, id: &str) -> Result<Learning, PalaceError> {
    let now = time::now_epoch_z();
    let broker = DbBroker::new(&store.root);
    broker.with_write(&records::palace_db(store), "palace", "decay.reinforce", |conn| {
        let changed = conn.execute(
            "UPDATE learnings SET last_used = ?1, decay_periods_applied = 0, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        if changed == 0 {
            return Err(PalaceError::NotFound(format!("Learning '{}' not found", id)));
        }
        records::read_learning(conn, id)?
            .ok_or_else(|| PalaceError::NotFound(format!("Learning '{}' not found", id)))
    })
}

/// Add `amount` to a learning's confidence, clamped to `[0, cap]`.
pub fn boost_confidence(
    store: &Store,
    id: &str,
    amount: f64,
    cap: f64,
) -> Result<Learning, PalaceError> {
    model::require_unit_interval("cap", cap)?;
    if !amount.is_finite() {
        return Err(PalaceError::ValidationError(format!(
            "amount must be a finite number, got {}",
            amount
        )));
    }
    let now = time::now_epoch_z();
    let broker = DbBroker::new(&store.root);
    broker.with_write(&records::palace_db(store), "palace", "decay.boost", |conn| {
        let tx = conn.transaction()?;
        let learning = records::read_learning(&tx, id)?
            .ok_or_else(|| PalaceError::NotFound(format!("Learning '{}' not found", id)))?;
        let boosted = (learning.confidence + amount).clamp(0.0, cap);
        tx.execute(
            "UPDATE learnings SET confidence = ?1, updated_at = ?2 WHERE id = ?3",
            params![boosted, now, id],
        )?;
        let learning = records::read_learning(&tx, id)?
            .ok_or_else(|| PalaceError::NotFound(format!("Learning '{}' not found", id)))?;
        tx.commit()?;
        Ok(learning)
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "decay",
        "version": "0.1.0",
        "description": "Confidence decay for learnings that go unused",
        "commands": [
            { "name": "stats", "parameters": [] },
            { "name": "preview", "parameters": ["limit"] },
            { "name": "apply", "parameters": [] },
            { "name": "reinforce", "parameters": ["id"] }
        ],
        "storage": ["palace.db"],
        "notes": ["apply is idempotent for a fixed clock"]
    })
}
