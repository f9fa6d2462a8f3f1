//! teamrules engine library entry.
//!
//! Wires the config loader, schema catalog, policy compiler/evaluator and the
//! in-memory record store into one stack. Consumed by the `teamrules` binary
//! and by integration tests.

pub mod app_state;
pub mod config;
pub mod obs;
pub mod policy;
pub mod schema;
pub mod store;
