//! Personal corridor: one store per human operator, shared across
//! workspaces, holding learnings promoted out of individual projects.

use crate::core::audit;
use crate::core::caller::Caller;
use crate::core::db;
use crate::core::error::PalaceError;
use crate::core::model::{AuditAction, LifecycleStatus, RecordKind, Scope};
use crate::core::store::{Store, StoreKind};
use crate::plugins::records::{self, Learning, NewLearning, ReadHit, RecordFilter, RecordMeta};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionReceipt {
    pub workspace_learning_id: String,
    pub corridor_learning_id: String,
    pub origin_workspace: String,
}

/// Copy an authoritative workspace learning into the corridor store.
///
/// The copy is corridor-scoped, approved, and records the workspace it came
/// from. The workspace learning is left untouched.
pub fn promote_to_corridor(
    workspace: &Store,
    corridor: &Store,
    learning_id: &str,
    caller: &Caller,
) -> Result<PromotionReceipt, PalaceError> {
    caller.require_human("promote_to_corridor")?;
    if corridor.kind != StoreKind::Corridor {
        return Err(PalaceError::ValidationError(
            "promotion target must be a corridor store".to_string(),
        ));
    }

    let learning = records::get_learning(workspace, learning_id)?;
    if !learning.authority.is_authoritative() {
        return Err(PalaceError::ValidationError(format!(
            "learning {} is not authoritative; approve it before promoting",
            learning_id
        )));
    }
    if learning.lifecycle_status != LifecycleStatus::Active {
        return Err(PalaceError::ValidationError(format!(
            "learning {} is {}; only active learnings can be promoted",
            learning_id, learning.lifecycle_status
        )));
    }

    let origin = workspace.workspace_name();
    db::initialize_palace_db(&corridor.root)?;
    let promoted = records::create_learning(
        corridor,
        &NewLearning {
            content: learning.content.clone(),
            context: learning.context.clone(),
            confidence: Some(learning.confidence),
            scope: Scope::Corridor,
            scope_path: String::new(),
            tags: learning.tags.clone(),
        },
        &RecordMeta {
            source: learning.source,
            authority: learning.authority,
            actor_id: caller.actor_id.clone(),
            session_id: caller.session_id.clone(),
            origin_workspace: Some(origin.clone()),
        },
    )?;

    audit::record_best_effort(
        workspace,
        AuditAction::PromoteCorridor,
        caller,
        learning_id,
        RecordKind::Learning.as_str(),
        serde_json::json!({
            "corridor_learning_id": promoted.id,
            "origin_workspace": origin,
        }),
    );
    tracing::info!(learning = learning_id, corridor_id = %promoted.id, "promoted learning to corridor");

    Ok(PromotionReceipt {
        workspace_learning_id: learning_id.to_string(),
        corridor_learning_id: promoted.id,
        origin_workspace: origin,
    })
}

/// Active corridor learnings, newest first; an uninitialized corridor is empty.
pub fn list_corridor_learnings(
    corridor: &Store,
    origin_workspace: Option<&str>,
) -> Result<Vec<Learning>, PalaceError> {
    if !db::palace_db_path(&corridor.root).exists() {
        return Ok(Vec::new());
    }
    let filter = RecordFilter {
        scope: Some(Scope::Corridor),
        ..RecordFilter::default()
    };
    let learnings = records::list_learnings(corridor, &filter, ReadHit::Ignore)?;
    Ok(match origin_workspace {
        Some(origin) => learnings
            .into_iter()
            .filter(|l| l.origin_workspace.as_deref() == Some(origin))
            .collect(),
        None => learnings,
    })
}
