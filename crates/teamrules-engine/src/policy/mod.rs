//! Policy layer: manifest compilation and request-time evaluation.
//!
//! Manifests are compiled once at load into resolved IR, shared via `Arc`,
//! and evaluated per request by a fresh [`eval::EvalCtx`].

pub mod compile;
pub mod engine;
pub mod eval;
pub mod ir;

pub use engine::{Authorizer, PolicySet};
pub use ir::{CompiledEntity, Hop, Node, RelPath};
