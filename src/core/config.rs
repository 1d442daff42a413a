//! Engine configuration.
//!
//! Loaded from `.palace/palace.toml`. Every section has defaults, so a missing
//! file or a partial file is valid.
//!
//! ```toml
//! [scope]
//! default_room = "core"
//! [[scope.rooms]]
//! name = "auth"
//! entry_points = ["src/auth/", "middleware/jwt"]
//!
//! [decay]
//! decay_days = 90
//! decay_rate = 0.2
//! ```

use crate::core::error::PalaceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "palace.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PalaceConfig {
    pub scope: ScopeConfig,
    pub inheritance: InheritanceConfig,
    pub context: ContextConfig,
    pub decay: DecayConfig,
    pub contradiction: ContradictionConfig,
    pub collaborators: CollaboratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomConfig {
    pub name: String,
    #[serde(default)]
    pub entry_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Checked in order; the first room with a matching entry point wins.
    pub rooms: Vec<RoomConfig>,
    pub default_room: Option<String>,
    /// Fall back to the first directory component when no room matches.
    pub derive_room_from_directory: bool,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            rooms: Vec::new(),
            default_room: None,
            derive_room_from_directory: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InheritanceConfig {
    pub room: bool,
    pub palace: bool,
    pub corridor: bool,
}

impl Default for InheritanceConfig {
    fn default() -> Self {
        Self {
            room: true,
            palace: true,
            corridor: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_decisions: usize,
    pub max_learnings: usize,
    /// Maximum characters (not bytes) per content string before truncation.
    pub max_content_len: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_decisions: 20,
            max_learnings: 20,
            max_content_len: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    /// Grace period of inactivity before any decay.
    pub decay_days: u64,
    /// Fraction of confidence lost per elapsed interval, in (0, 1].
    pub decay_rate: f64,
    pub decay_interval_days: u64,
    pub min_confidence: f64,
    /// Learnings within this many days of `decay_days` are reported as at risk.
    pub at_risk_window_days: u64,
    /// Whether list/search hits reset `last_used` (and so restart the decay clock).
    pub reads_count_as_use: bool,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decay_days: 30,
            decay_rate: 0.1,
            decay_interval_days: 30,
            min_confidence: 0.1,
            at_risk_window_days: 14,
            reads_count_as_use: true,
        }
    }
}

impl DecayConfig {
    pub fn validate(&self) -> Result<(), PalaceError> {
        if !(self.decay_rate > 0.0 && self.decay_rate <= 1.0) {
            return Err(PalaceError::ValidationError(format!(
                "decay_rate must be within (0, 1], got {}",
                self.decay_rate
            )));
        }
        if self.decay_interval_days == 0 {
            return Err(PalaceError::ValidationError(
                "decay_interval_days must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(PalaceError::ValidationError(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContradictionConfig {
    /// Maximum number of similar records sent to the classifier.
    pub candidate_limit: usize,
    /// Minimum cosine (or keyword overlap) similarity for a candidate.
    pub min_similarity: f32,
    /// Minimum classifier confidence for a contradiction to be reported.
    pub min_confidence: f64,
}

impl Default for ContradictionConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 5,
            min_similarity: 0.3,
            min_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub call_timeout_secs: u64,
    pub embedding_workers: usize,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            embedding_workers: 2,
        }
    }
}

impl PalaceConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, PalaceError> {
        let config: PalaceConfig =
            toml::from_str(content).map_err(|e| PalaceError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `palace.toml` from a store root. No config file means defaults.
    pub fn load(root: &Path) -> Result<Self, PalaceError> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), PalaceError> {
        self.decay.validate()?;
        if self.collaborators.embedding_workers == 0 {
            return Err(PalaceError::ValidationError(
                "collaborators.embedding_workers must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.contradiction.min_confidence) {
            return Err(PalaceError::ValidationError(format!(
                "contradiction.min_confidence must be within [0, 1], got {}",
                self.contradiction.min_confidence
            )));
        }
        for room in &self.scope.rooms {
            if room.name.trim().is_empty() {
                return Err(PalaceError::ValidationError(
                    "scope.rooms entries need a name".to_string(),
                ));
            }
        }
        Ok(())
    }
}
