//! Subsystems of the knowledge governance engine, one file each.

pub mod briefing;
pub mod context;
pub mod contradiction;
pub mod corridor;
pub mod decay;
pub mod embedding;
pub mod links;
pub mod proposals;
pub mod records;
pub mod scope;
pub mod semantic;
