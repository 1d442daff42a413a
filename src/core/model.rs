//! Closed vocabularies of the knowledge model.
//!
//! Every enum round-trips through the lowercase snake_case string stored in
//! SQLite. Parsing an unknown string is a validation error that lists the
//! accepted values.

use crate::core::error::PalaceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PalaceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(PalaceError::ValidationError(format!(
                        "Invalid {} '{}'. Must be one of: {}",
                        $label,
                        other,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse()
                    .map_err(|e: PalaceError| rusqlite::types::FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

string_enum!(
    /// The three governed record kinds.
    RecordKind, "record kind" {
        Idea => "idea",
        Decision => "decision",
        Learning => "learning",
    }
);

impl RecordKind {
    pub fn id_prefix(self) -> &'static str {
        match self {
            RecordKind::Idea => "i",
            RecordKind::Decision => "d",
            RecordKind::Learning => "l",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            RecordKind::Idea => "ideas",
            RecordKind::Decision => "decisions",
            RecordKind::Learning => "learnings",
        }
    }

    /// Infer the kind from a kind-prefixed id.
    pub fn from_id(id: &str) -> Option<RecordKind> {
        let (prefix, rest) = id.split_once('_')?;
        if rest.is_empty() {
            return None;
        }
        match prefix {
            "i" => Some(RecordKind::Idea),
            "d" => Some(RecordKind::Decision),
            "l" => Some(RecordKind::Learning),
            _ => None,
        }
    }
}

string_enum!(
    /// Breadth at which a record applies, narrowest first.
    Scope, "scope" {
        File => "file",
        Room => "room",
        Palace => "palace",
        Corridor => "corridor",
    }
);

impl Default for Scope {
    fn default() -> Self {
        Scope::Palace
    }
}

impl Scope {
    /// File and room scopes name a path or room; palace and corridor do not.
    pub fn requires_path(self) -> bool {
        matches!(self, Scope::File | Scope::Room)
    }
}

string_enum!(
    Source, "source" {
        Agent => "agent",
        Human => "human",
    }
);

string_enum!(
    Authority, "authority" {
        Proposed => "proposed",
        Approved => "approved",
        LegacyApproved => "legacy_approved",
    }
);

impl Authority {
    pub fn is_authoritative(self) -> bool {
        matches!(self, Authority::Approved | Authority::LegacyApproved)
    }
}

string_enum!(
    IdeaStatus, "idea status" {
        Active => "active",
        Exploring => "exploring",
        Implemented => "implemented",
        Dropped => "dropped",
    }
);

string_enum!(
    DecisionStatus, "decision status" {
        Active => "active",
        Superseded => "superseded",
        Reversed => "reversed",
    }
);

string_enum!(
    Outcome, "outcome" {
        Unknown => "unknown",
        Successful => "successful",
        Failed => "failed",
        Mixed => "mixed",
    }
);

impl Outcome {
    /// Confidence adjustment applied to learnings linked to a decision.
    pub fn confidence_delta(self) -> f64 {
        match self {
            Outcome::Successful => 0.1,
            Outcome::Failed => -0.1,
            Outcome::Mixed | Outcome::Unknown => 0.0,
        }
    }
}

string_enum!(
    LifecycleStatus, "lifecycle status" {
        Active => "active",
        Obsolete => "obsolete",
        Archived => "archived",
    }
);

string_enum!(
    /// Kinds a link endpoint may have.
    LinkKind, "link kind" {
        Idea => "idea",
        Decision => "decision",
        Learning => "learning",
        Code => "code",
        Url => "url",
    }
);

impl LinkKind {
    pub fn record_kind(self) -> Option<RecordKind> {
        match self {
            LinkKind::Idea => Some(RecordKind::Idea),
            LinkKind::Decision => Some(RecordKind::Decision),
            LinkKind::Learning => Some(RecordKind::Learning),
            LinkKind::Code | LinkKind::Url => None,
        }
    }
}

impl From<RecordKind> for LinkKind {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Idea => LinkKind::Idea,
            RecordKind::Decision => LinkKind::Decision,
            RecordKind::Learning => LinkKind::Learning,
        }
    }
}

string_enum!(
    Relation, "relation" {
        Supports => "supports",
        Contradicts => "contradicts",
        Implements => "implements",
        Supersedes => "supersedes",
        InspiredBy => "inspired_by",
        Related => "related",
    }
);

string_enum!(
    /// Record kinds that go through the proposal workflow.
    ProposedAs, "proposed_as" {
        Decision => "decision",
        Learning => "learning",
    }
);

impl From<ProposedAs> for RecordKind {
    fn from(kind: ProposedAs) -> Self {
        match kind {
            ProposedAs::Decision => RecordKind::Decision,
            ProposedAs::Learning => RecordKind::Learning,
        }
    }
}

string_enum!(
    ProposalStatus, "proposal status" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
);

string_enum!(
    AuditAction, "audit action" {
        DirectWrite => "direct_write",
        Approve => "approve",
        Reject => "reject",
        RecordOutcome => "record_outcome",
        PromoteCorridor => "promote_corridor",
        ContradictionLink => "contradiction_link",
        IgnoreContradiction => "ignore_contradiction",
        ApplyDecay => "apply_decay",
    }
);

string_enum!(
    ActorType, "actor type" {
        Human => "human",
        Agent => "agent",
    }
);

impl From<ActorType> for Source {
    fn from(actor: ActorType) -> Self {
        match actor {
            ActorType::Human => Source::Human,
            ActorType::Agent => Source::Agent,
        }
    }
}

/// Validate and normalize a `(scope, scope_path)` pair.
pub fn normalize_scope_path(scope: Scope, scope_path: &str) -> Result<String, PalaceError> {
    let trimmed = scope_path.trim();
    if scope.requires_path() {
        if trimmed.is_empty() {
            return Err(PalaceError::ValidationError(format!(
                "scope '{}' requires a non-empty scope_path",
                scope
            )));
        }
        Ok(trimmed.trim_start_matches("./").to_string())
    } else {
        Ok(String::new())
    }
}

/// Reject empty or whitespace-only content before any write.
pub fn require_content(field: &str, value: &str) -> Result<(), PalaceError> {
    if value.trim().is_empty() {
        return Err(PalaceError::ValidationError(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

pub fn require_unit_interval(field: &str, value: f64) -> Result<(), PalaceError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(PalaceError::ValidationError(format!(
            "{} must be within [0, 1], got {}",
            field, value
        )));
    }
    Ok(())
}

pub fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
