//! Caller identity used for attribution and privilege checks.

use crate::core::error::PalaceError;
use crate::core::model::ActorType;
use serde::{Deserialize, Serialize};

/// Who is invoking an operation. Agents are never privileged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub actor_type: ActorType,
    pub actor_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Caller {
    pub fn human(actor_id: &str) -> Self {
        Self {
            actor_type: ActorType::Human,
            actor_id: actor_id.to_string(),
            session_id: None,
        }
    }

    pub fn agent(actor_id: &str) -> Self {
        Self {
            actor_type: ActorType::Agent,
            actor_id: actor_id.to_string(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.actor_type == ActorType::Human
    }

    /// Fail with `Forbidden` unless the caller is a human.
    pub fn require_human(&self, capability: &str) -> Result<(), PalaceError> {
        if self.is_privileged() {
            Ok(())
        } else {
            Err(PalaceError::Forbidden(format!(
                "'{}' is a human-only capability (caller '{}' is an agent); submit a proposal instead",
                capability, self.actor_id
            )))
        }
    }
}
