//! Subsystem registry: one entry per plugin that publishes a schema.
//!
//! Adding a new subsystem: append one entry to `SUBSYSTEMS`.

use crate::plugins::{context, contradiction, decay, links, proposals, records};

pub struct SubsystemInfo {
    pub name: &'static str,
    pub schema: fn() -> serde_json::Value,
}

pub const SUBSYSTEMS: &[SubsystemInfo] = &[
    SubsystemInfo { name: "records", schema: records::schema },
    SubsystemInfo { name: "links", schema: links::schema },
    SubsystemInfo { name: "context", schema: context::schema },
    SubsystemInfo { name: "decay", schema: decay::schema },
    SubsystemInfo { name: "contradiction", schema: contradiction::schema },
    SubsystemInfo { name: "proposals", schema: proposals::schema },
];

/// Schemas of every registered subsystem, in registration order.
pub fn all_schemas() -> serde_json::Value {
    serde_json::Value::Array(SUBSYSTEMS.iter().map(|s| (s.schema)()).collect())
}
