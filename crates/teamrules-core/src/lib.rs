//! teamrules core: transport-agnostic policy primitives, error types and the
//! rule expression language.
//!
//! This crate defines the manifest format, the request-side data model and
//! the error surface shared by the engine and its tooling. It intentionally
//! carries no runtime or storage dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! All fallible paths must surface as `PermError`/`Result` so a hostile or
//! broken manifest cannot crash the process that loads it.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod document;
pub mod error;
pub mod expr;
pub mod model;

/// Shared result type.
pub use error::{Result, PermError};
pub use model::{Actor, Decision, OperationKind, Record, RecordId};
