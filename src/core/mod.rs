//! Core modules for Palace.
//!
//! Shared primitives used by every subsystem: the store handle, the SQLite
//! broker and pool, schemas, the model vocabulary, configuration, caller
//! identity, the audit ledger, and time/output helpers.

pub mod audit;
pub mod broker;
pub mod caller;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod output;
pub mod pool;
pub mod requests;
pub mod schemas;
pub mod session;
pub mod store;
pub mod time;
