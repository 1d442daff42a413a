//! In-process session focus and handoff registry.
//!
//! Owned by whoever hosts the engine and passed around by reference; there is
//! no process-global instance. All access goes through one mutex.

use crate::core::error::PalaceError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use rustc_hash::FxHashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFocus {
    pub session_id: String,
    pub actor_id: String,
    /// File path or task the session is working on.
    pub focus: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub from_session: String,
    pub to_actor: String,
    pub focus: String,
    pub note: String,
    pub created_at: String,
}

#[derive(Default)]
struct RegistryState {
    focus: FxHashMap<String, SessionFocus>,
    /// Handoffs waiting to be claimed, keyed by receiving actor.
    handoffs: FxHashMap<String, Vec<Handoff>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RegistryState>, PalaceError> {
        self.state
            .lock()
            .map_err(|_| PalaceError::ValidationError("session registry lock poisoned".to_string()))
    }

    pub fn set_focus(
        &self,
        session_id: &str,
        actor_id: &str,
        focus: &str,
    ) -> Result<SessionFocus, PalaceError> {
        let entry = SessionFocus {
            session_id: session_id.to_string(),
            actor_id: actor_id.to_string(),
            focus: focus.to_string(),
            updated_at: time::now_epoch_z(),
        };
        self.lock()?
            .focus
            .insert(session_id.to_string(), entry.clone());
        Ok(entry)
    }

    pub fn focus(&self, session_id: &str) -> Result<Option<SessionFocus>, PalaceError> {
        Ok(self.lock()?.focus.get(session_id).cloned())
    }

    /// End a session, dropping its focus.
    pub fn clear(&self, session_id: &str) -> Result<bool, PalaceError> {
        Ok(self.lock()?.focus.remove(session_id).is_some())
    }

    /// Hand the focus of `from_session` to another actor. The sending session
    /// keeps no focus afterwards.
    pub fn handoff(
        &self,
        from_session: &str,
        to_actor: &str,
        note: &str,
    ) -> Result<Handoff, PalaceError> {
        let mut state = self.lock()?;
        let focus = state.focus.remove(from_session).ok_or_else(|| {
            PalaceError::NotFound(format!("Session '{}' has no focus to hand off", from_session))
        })?;
        let handoff = Handoff {
            from_session: from_session.to_string(),
            to_actor: to_actor.to_string(),
            focus: focus.focus,
            note: note.to_string(),
            created_at: time::now_epoch_z(),
        };
        state
            .handoffs
            .entry(to_actor.to_string())
            .or_default()
            .push(handoff.clone());
        Ok(handoff)
    }

    /// Take every pending handoff addressed to `actor_id`.
    pub fn claim_handoffs(&self, actor_id: &str) -> Result<Vec<Handoff>, PalaceError> {
        Ok(self.lock()?.handoffs.remove(actor_id).unwrap_or_default())
    }
}
