//! teamrules: declarative, relationship-aware authorization for team data.
//!
//! Single-crate entry point. `core` holds the manifest format, expression
//! parser and shared model; `engine` holds the compiler, evaluator and store.
//! Most callers only need [`load`] and the [`prelude`].

pub mod core {
    pub use teamrules_core::*;
}

pub mod engine {
    pub use teamrules_engine::*;
}

pub mod prelude {
    pub use teamrules_core::model::{Actor, Decision, OperationKind, Record, RecordId};
    pub use teamrules_core::{PermError, Result};
    pub use teamrules_engine::app_state::AppState;
    pub use teamrules_engine::policy::{Authorizer, PolicySet};
    pub use teamrules_engine::store::{MemoryStore, Mutation, RecordStore, Traverse};
}

/// Load a service config and its manifest, compile, and build the store.
pub fn load(config_path: impl AsRef<std::path::Path>) -> teamrules_core::Result<engine::app_state::AppState> {
    teamrules_engine::app_state::AppState::load(config_path)
}
