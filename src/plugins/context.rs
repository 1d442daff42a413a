//! Authoritative context assembly: "what is true here" for a file path.
//!
//! Walks the inheritance chain narrowest first, collects approved decisions
//! and learnings at each level, de-duplicates by id, applies the configured
//! limits and truncates content by characters. No token estimation and no
//! randomness: unchanged data yields byte-identical output.

use crate::core::config::PalaceConfig;
use crate::core::db;
use crate::core::error::PalaceError;
use crate::core::model::{Authority, Outcome, Scope};
use crate::core::output;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::decay;
use crate::plugins::records::{self, Decision, Learning, ReadHit, RecordFilter};
use crate::plugins::scope::{self, ScopeLevel};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDecision {
    pub id: String,
    pub content: String,
    pub rationale: String,
    pub outcome: Outcome,
    pub authority: Authority,
    pub source_scope: Scope,
    pub scope_path: String,
    pub weight: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextLearning {
    pub id: String,
    pub content: String,
    pub confidence: f64,
    pub use_count: i64,
    pub authority: Authority,
    pub source_scope: Scope,
    pub scope_path: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_workspace: Option<String>,
    pub at_risk: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_decay: Option<u64>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoritativeState {
    pub path: String,
    pub room: String,
    pub chain: Vec<ScopeLevel>,
    pub decisions: Vec<ContextDecision>,
    pub learnings: Vec<ContextLearning>,
    /// Matching records before the limits were applied.
    pub total_decisions: usize,
    pub total_learnings: usize,
    /// True when a limit dropped records or any content string was cut.
    pub truncated: bool,
}

/// Assembles authoritative state from a workspace store and, optionally, the
/// personal corridor store.
pub struct ContextAssembler<'a> {
    workspace: &'a Store,
    corridor: Option<&'a Store>,
    config: &'a PalaceConfig,
}

fn newest_first(a_created: &str, a_id: &str, b_created: &str, b_id: &str) -> std::cmp::Ordering {
    let ta = time::parse_epoch_z(a_created).unwrap_or(0);
    let tb = time::parse_epoch_z(b_created).unwrap_or(0);
    tb.cmp(&ta).then_with(|| b_id.cmp(a_id))
}

impl<'a> ContextAssembler<'a> {
    pub fn new(workspace: &'a Store, config: &'a PalaceConfig) -> Self {
        Self {
            workspace,
            corridor: None,
            config,
        }
    }

    pub fn with_corridor(mut self, corridor: &'a Store) -> Self {
        self.corridor = Some(corridor);
        self
    }

    pub fn chain_for(&self, path: &str) -> Vec<ScopeLevel> {
        scope::inheritance_chain(path, &self.config.scope, &self.config.inheritance)
    }

    /// Authoritative state for a file path.
    pub fn assemble(&self, path: &str) -> Result<AuthoritativeState, PalaceError> {
        self.assemble_at(path, time::now_secs())
    }

    pub fn assemble_at(&self, path: &str, now_secs: u64) -> Result<AuthoritativeState, PalaceError> {
        let chain = self.chain_for(path);
        let mut state = self.authoritative_state(&chain, now_secs)?;
        state.path = path.trim().trim_start_matches("./").to_string();
        state.room = scope::resolve_room(path, &self.config.scope);
        Ok(state)
    }

    /// Corridor store, only when it has been initialized.
    fn corridor_store(&self) -> Option<&'a Store> {
        self.corridor
            .filter(|c| db::palace_db_path(&c.root).exists())
    }

    fn level_filter(level: &ScopeLevel) -> RecordFilter {
        RecordFilter::at(level.scope, &level.scope_path).authoritative()
    }

    fn level_decisions(&self, level: &ScopeLevel) -> Result<Vec<Decision>, PalaceError> {
        let filter = Self::level_filter(level);
        let mut out = records::list_decisions(self.workspace, &filter)?;
        if level.scope == Scope::Corridor
            && let Some(corridor) = self.corridor_store()
        {
            out.extend(records::list_decisions(corridor, &filter)?);
        }
        out.sort_by(|a, b| newest_first(&a.created_at, &a.id, &b.created_at, &b.id));
        Ok(out)
    }

    fn level_learnings(&self, level: &ScopeLevel) -> Result<Vec<Learning>, PalaceError> {
        let filter = Self::level_filter(level);
        let mut out = records::list_learnings(self.workspace, &filter, ReadHit::Ignore)?;
        if level.scope == Scope::Corridor
            && let Some(corridor) = self.corridor_store()
        {
            out.extend(records::list_learnings(corridor, &filter, ReadHit::Ignore)?);
        }
        out.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| newest_first(&a.created_at, &a.id, &b.created_at, &b.id))
        });
        Ok(out)
    }

    /// Query every level of `chain`, keep authoritative live records, and
    /// bound the result by the configured limits.
    pub fn authoritative_state(
        &self,
        chain: &[ScopeLevel],
        now_secs: u64,
    ) -> Result<AuthoritativeState, PalaceError> {
        let limits = &self.config.context;
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut truncated = false;

        let mut decisions = Vec::new();
        let mut total_decisions = 0usize;
        for level in chain {
            for d in self.level_decisions(level)? {
                if !d.authority.is_authoritative() || !seen.insert(d.id.clone()) {
                    continue;
                }
                total_decisions += 1;
                if decisions.len() >= limits.max_decisions {
                    continue;
                }
                let (content, cut_content) = output::truncate_chars(&d.content, limits.max_content_len);
                let (rationale, cut_rationale) =
                    output::truncate_chars(&d.rationale, limits.max_content_len);
                truncated |= cut_content || cut_rationale;
                decisions.push(ContextDecision {
                    id: d.id,
                    content,
                    rationale,
                    outcome: d.outcome,
                    authority: d.authority,
                    source_scope: level.scope,
                    scope_path: d.scope_path,
                    weight: level.weight,
                    created_at: d.created_at,
                });
            }
        }

        let mut learnings = Vec::new();
        let mut total_learnings = 0usize;
        for level in chain {
            for l in self.level_learnings(level)? {
                if !l.authority.is_authoritative() || !seen.insert(l.id.clone()) {
                    continue;
                }
                total_learnings += 1;
                if learnings.len() >= limits.max_learnings {
                    continue;
                }
                let risk = decay::assess(&l, &self.config.decay, now_secs);
                let (content, cut) = output::truncate_chars(&l.content, limits.max_content_len);
                truncated |= cut;
                learnings.push(ContextLearning {
                    id: l.id,
                    content,
                    confidence: l.confidence,
                    use_count: l.use_count,
                    authority: l.authority,
                    source_scope: level.scope,
                    scope_path: l.scope_path,
                    weight: level.weight,
                    origin_workspace: l.origin_workspace,
                    at_risk: risk.at_risk,
                    days_until_decay: risk.days_until_decay,
                    created_at: l.created_at,
                });
            }
        }

        truncated |= total_decisions > decisions.len() || total_learnings > learnings.len();

        Ok(AuthoritativeState {
            path: String::new(),
            room: String::new(),
            chain: chain.to_vec(),
            decisions,
            learnings,
            total_decisions,
            total_learnings,
            truncated,
        })
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "context",
        "version": "0.1.0",
        "description": "Bounded authoritative decisions and learnings for a file path",
        "commands": [
            { "name": "resolve", "parameters": ["path"] },
            { "name": "chain", "parameters": ["path"] }
        ],
        "limits": ["max_decisions", "max_learnings", "max_content_len"],
        "storage": ["palace.db"]
    })
}
