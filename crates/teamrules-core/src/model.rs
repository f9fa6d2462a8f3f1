//! Request-side data model: operations, decisions, actors and records.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PermError;

/// Operation kinds a policy can gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    View,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::View,
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::View => "view",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Dense index, usable as a slot in per-operation tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = PermError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(OperationKind::View),
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(PermError::BadRequest(format!("unknown operation: {other}"))),
        }
    }
}

/// Two-valued authorization outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allow(self) -> bool {
        self == Decision::Allow
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Requesting identity (`auth.*`). All fields absent for anonymous callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Actor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Extra identity attributes exposed as `auth.<name>`.
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            email: Some(email.into()),
            attrs: BTreeMap::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }

    /// Resolve `auth.<field>`; missing values read as null.
    pub fn field(&self, name: &str) -> Value {
        match name {
            "id" => self.id.clone().map(Value::String).unwrap_or(Value::Null),
            "email" => self.email.clone().map(Value::String).unwrap_or(Value::Null),
            other => self.attrs.get(other).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Record identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A stored record, or a proposed one for `create`.
///
/// `links` maps a relationship label to the ids it points at. Stores keep
/// both directions of a link on the respective records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub attrs: Map<String, Value>,
    #[serde(default)]
    pub links: BTreeMap<String, BTreeSet<RecordId>>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            attrs: Map::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn with_link(mut self, label: &str, target: impl Into<RecordId>) -> Self {
        self.links
            .entry(label.to_string())
            .or_default()
            .insert(target.into());
        self
    }

    /// Resolve `data.<field>`; `id` is implicit, missing values read as null.
    pub fn field(&self, name: &str) -> Value {
        if name == "id" {
            return Value::String(self.id.0.clone());
        }
        self.attrs.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn linked(&self, label: &str) -> impl Iterator<Item = &RecordId> {
        self.links.get(label).into_iter().flatten()
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anonymous_fields_are_null() {
        let a = Actor::anonymous();
        assert!(a.is_anonymous());
        assert_eq!(a.field("id"), Value::Null);
        assert_eq!(a.field("email"), Value::Null);
        assert_eq!(a.field("role"), Value::Null);
    }

    #[test]
    fn record_id_is_implicit_field() {
        let r = Record::new("t1").with_attr("text", "hi");
        assert_eq!(r.field("id"), json!("t1"));
        assert_eq!(r.field("text"), json!("hi"));
        assert_eq!(r.field("done"), Value::Null);
    }

    #[test]
    fn operation_kind_parses_lowercase_only() {
        assert_eq!("update".parse::<OperationKind>().ok(), Some(OperationKind::Update));
        assert!("Update".parse::<OperationKind>().is_err());
        assert_eq!(OperationKind::Delete.to_string(), "delete");
    }
}
