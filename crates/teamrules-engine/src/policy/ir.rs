//! Resolved policy representation.
//!
//! Every name in a compiled expression has been bound to a binding slot, an
//! actor field, a record field or a checked traversal path, so evaluation
//! never looks anything up by string in the policy.

use std::fmt;

use serde_json::Value;
use teamrules_core::model::OperationKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Const(Value),
    /// `auth.<field>`
    Auth(String),
    /// `data.<field>`
    Data(String),
    /// Slot in [`CompiledEntity::bindings`].
    Binding(usize),
    /// Slot in [`CompiledEntity::paths`].
    Ref(usize),
    Size(Box<Node>),
    Eq(Box<Node>, Box<Node>),
    Ne(Box<Node>, Box<Node>),
    In(Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Cond {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
}

/// A relationship path checked against the schema, e.g.
/// `teams.memberships.userId` from `todos`: hops `teams`, `memberships`,
/// then attribute `userId` of the reached records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelPath {
    pub raw: String,
    pub hops: Vec<Hop>,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub label: String,
    /// Entity type the hop starts from.
    pub from: String,
    /// Entity type the hop reaches.
    pub to: String,
}

impl RelPath {
    /// Entity type whose attribute is collected at the end of the path.
    pub fn target<'a>(&'a self, start: &'a str) -> &'a str {
        self.hops.last().map(|h| h.to.as_str()).unwrap_or(start)
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone)]
pub struct CompiledBinding {
    pub name: String,
    pub node: Node,
}

/// One entity type's bindings and allow table, ready to evaluate.
#[derive(Debug, Clone)]
pub struct CompiledEntity {
    pub name: String,
    pub bindings: Vec<CompiledBinding>,
    pub paths: Vec<RelPath>,
    pub(crate) rules: [Option<Node>; 4],
}

impl CompiledEntity {
    /// Entity type with no rules at all: every operation is denied.
    pub fn deny_all(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bindings: Vec::new(),
            paths: Vec::new(),
            rules: Default::default(),
        }
    }

    pub fn rule(&self, op: OperationKind) -> Option<&Node> {
        self.rules.get(op.index()).and_then(Option::as_ref)
    }

    /// Operations with a rule that is not the literal `false`.
    pub fn permitted_ops(&self) -> Vec<OperationKind> {
        OperationKind::ALL
            .into_iter()
            .filter(|op| !matches!(self.rule(*op), None | Some(Node::Const(Value::Bool(false)))))
            .collect()
    }

    pub fn binding_index(&self, name: &str) -> Option<usize> {
        self.bindings.iter().position(|b| b.name == name)
    }
}
