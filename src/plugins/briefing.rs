//! Session briefings: the authoritative state for a path, rendered as text.
//!
//! A configured [`Summarizer`](crate::plugins::semantic::Summarizer) writes the
//! prose. When it is missing, fails, times out or returns nothing, the
//! briefing falls back to a deterministic template built from the same state.

use crate::core::error::PalaceError;
use crate::plugins::context::{AuthoritativeState, ContextAssembler};
use crate::plugins::semantic::Collaborators;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BriefingSource {
    Summarizer,
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Briefing {
    pub path: String,
    pub text: String,
    pub generated_by: BriefingSource,
    pub state: AuthoritativeState,
}

/// Deterministic plain-text rendering of an authoritative state.
pub fn render_template(state: &AuthoritativeState) -> String {
    let mut out = String::new();
    let target = if state.path.is_empty() {
        "workspace"
    } else {
        state.path.as_str()
    };
    let _ = writeln!(out, "Briefing for {}", target);
    if !state.room.is_empty() {
        let _ = writeln!(out, "Room: {}", state.room);
    }

    let _ = writeln!(
        out,
        "\nDecisions ({} of {}):",
        state.decisions.len(),
        state.total_decisions
    );
    if state.decisions.is_empty() {
        let _ = writeln!(out, "- none");
    }
    for d in &state.decisions {
        let _ = write!(out, "- [{}] {}", d.source_scope, d.content);
        if !d.rationale.is_empty() {
            let _ = write!(out, " (why: {})", d.rationale);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(
        out,
        "\nLearnings ({} of {}):",
        state.learnings.len(),
        state.total_learnings
    );
    if state.learnings.is_empty() {
        let _ = writeln!(out, "- none");
    }
    for l in &state.learnings {
        let _ = write!(
            out,
            "- [{}] {} (confidence {:.2})",
            l.source_scope, l.content, l.confidence
        );
        if let Some(days) = l.days_until_decay {
            let _ = write!(out, " [decays in {} days]", days);
        }
        let _ = writeln!(out);
    }

    if state.truncated {
        let _ = writeln!(out, "\n(truncated)");
    }
    out
}

fn summarizer_prompt(state: &AuthoritativeState) -> String {
    format!(
        "Summarize the following project knowledge into a short briefing for an engineer about to edit {}. Keep every decision; mention low-confidence learnings as uncertain.\n\n{}",
        if state.path.is_empty() {
            "this workspace"
        } else {
            state.path.as_str()
        },
        render_template(state)
    )
}

/// Build a briefing for `path`.
pub fn briefing(
    assembler: &ContextAssembler<'_>,
    collaborators: &Collaborators,
    path: &str,
) -> Result<Briefing, PalaceError> {
    let state = assembler.assemble(path)?;
    Ok(briefing_for_state(collaborators, state))
}

pub fn briefing_for_state(collaborators: &Collaborators, state: AuthoritativeState) -> Briefing {
    let summarized = match collaborators.summarizer {
        Some(_) => match collaborators.summarize(&summarizer_prompt(&state)) {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                tracing::warn!(path = %state.path, "summarizer returned empty text; using template");
                None
            }
            Err(e) => {
                tracing::warn!(path = %state.path, error = %e, "summarizer unavailable; using template");
                None
            }
        },
        None => None,
    };

    let (text, generated_by) = match summarized {
        Some(text) => (text, BriefingSource::Summarizer),
        None => (render_template(&state), BriefingSource::Template),
    };
    Briefing {
        path: state.path.clone(),
        text,
        generated_by,
        state,
    }
}
