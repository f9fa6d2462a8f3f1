use std::collections::BTreeMap;

use serde::Deserialize;
use teamrules_core::error::{PermError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub version: u32,

    pub policy: PolicySection,

    #[serde(default)]
    pub schema: SchemaSection,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(PermError::UnsupportedVersion);
        }
        if self.schema.entities.is_empty() {
            return Err(PermError::BadRequest("schema.entities must not be empty".into()));
        }

        self.policy.validate()?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    /// Permissions manifest (`.json`, `.yaml` or `.yml`), relative to the config file.
    pub path: String,

    /// Refuse to start when any entity's policy fails to compile. When false,
    /// broken entity types are quarantined and deny every request.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

impl PolicySection {
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(PermError::BadRequest("policy.path must not be empty".into()));
        }
        Ok(())
    }
}

fn default_fail_fast() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SchemaSection {
    #[serde(default)]
    pub entities: BTreeMap<String, EntityDef>,

    #[serde(default)]
    pub links: Vec<LinkDef>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EntityDef {
    #[serde(default)]
    pub attrs: Vec<String>,
}

/// Relationship between two entity types, readable from both ends.
///
/// `forward` is the label on `from` records pointing at `to` records;
/// `reverse` is the label on `to` records pointing back. `forward_has` /
/// `reverse_has` bound how many records each side may point at.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkDef {
    pub from: String,
    pub forward: String,
    pub to: String,
    pub reverse: String,

    #[serde(default)]
    pub forward_has: Has,

    #[serde(default)]
    pub reverse_has: Has,
}

/// Link cardinality of one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Has {
    One,
    #[default]
    Many,
}
