//! Permissions manifest format.
//!
//! ```json
//! {
//!   "todos": {
//!     "bind": ["isMember", "auth.id in data.ref('teams.memberships.userId')"],
//!     "allow": { "view": "isMember", "update": "false" }
//!   }
//! }
//! ```
//!
//! `bind` is a flattened list of alias/expression pairs. Operation kinds
//! missing from `allow` are denied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PermError, Result};
use crate::model::OperationKind;

/// Entity type name → its policy block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyDocument {
    pub entities: BTreeMap<String, EntityPolicy>,
}

impl PolicyDocument {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| PermError::BadRequest(format!("invalid policy json: {e}")))
    }

    pub fn get(&self, entity: &str) -> Option<&EntityPolicy> {
        self.entities.get(entity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityPolicy {
    #[serde(default)]
    pub bind: Vec<String>,
    #[serde(default)]
    pub allow: AllowTable,
}

impl EntityPolicy {
    /// Bindings as `(alias, expression)` pairs; a trailing unpaired item is dropped.
    pub fn bind_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bind
            .chunks_exact(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }
}

/// Operation kind → rule expression. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

impl AllowTable {
    pub fn rule(&self, op: OperationKind) -> Option<&str> {
        match op {
            OperationKind::View => self.view.as_deref(),
            OperationKind::Create => self.create.as_deref(),
            OperationKind::Update => self.update.as_deref(),
            OperationKind::Delete => self.delete.as_deref(),
        }
    }
}
