//! Record store collaborator.
//!
//! The policy evaluator only needs [`Traverse`]: resolve a checked
//! relationship path from a record to the set of values it reaches. The
//! [`RecordStore`] trait is the read/write surface a store exposes once it
//! routes every operation through the authorizer.

pub mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use teamrules_core::error::{Result, TraversalError};
use teamrules_core::model::{Actor, OperationKind, Record, RecordId};

use crate::policy::RelPath;

pub use memory::MemoryStore;

/// Relationship traversal over a consistent snapshot.
pub trait Traverse {
    /// Follow `path` from `record` (of type `entity`) and collect the final
    /// attribute of every reached record. Missing/null attributes are skipped.
    fn traverse(&self, entity: &str, record: &Record, path: &RelPath) -> std::result::Result<Vec<Value>, TraversalError>;
}

/// One write in a transaction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Mutation {
    Create {
        id: RecordId,
        #[serde(default)]
        attrs: Map<String, Value>,
        #[serde(default)]
        links: BTreeMap<String, BTreeSet<RecordId>>,
    },
    /// Merge attributes; a `null` value removes the attribute.
    Update {
        id: RecordId,
        attrs: Map<String, Value>,
    },
    Delete {
        id: RecordId,
    },
}

impl Mutation {
    pub fn op(&self) -> OperationKind {
        match self {
            Mutation::Create { .. } => OperationKind::Create,
            Mutation::Update { .. } => OperationKind::Update,
            Mutation::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn id(&self) -> &RecordId {
        match self {
            Mutation::Create { id, .. } | Mutation::Update { id, .. } | Mutation::Delete { id } => id,
        }
    }

    pub fn create(record: Record) -> Self {
        Mutation::Create {
            id: record.id,
            attrs: record.attrs,
            links: record.links,
        }
    }

    /// New open todo on `team`, stamped with `created_at` (ms since epoch).
    pub fn create_todo(id: impl Into<RecordId>, team: impl Into<RecordId>, text: &str, created_at: u64) -> Self {
        Mutation::create(
            Record::new(id)
                .with_attr("text", text)
                .with_attr("done", false)
                .with_attr("createdAt", created_at)
                .with_link("teams", team),
        )
    }
}

/// Milliseconds since the Unix epoch, for `createdAt` stamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Authorized read/write surface of a store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Unchecked read, for trusted callers.
    async fn get(&self, entity: &str, id: &RecordId) -> Result<Record>;

    /// Read gated by the entity's `view` rule.
    async fn view(&self, actor: &Actor, entity: &str, id: &RecordId) -> Result<Record>;

    /// Apply all writes or none. Every write is authorized against the
    /// snapshot the whole transaction produces.
    async fn transact(&self, actor: &Actor, steps: Vec<(String, Mutation)>) -> Result<Vec<Record>>;

    async fn mutate(&self, actor: &Actor, entity: &str, mutation: Mutation) -> Result<Record> {
        let mut out = self.transact(actor, vec![(entity.to_string(), mutation)]).await?;
        out.pop()
            .ok_or_else(|| teamrules_core::PermError::Internal("empty transaction result".into()))
    }
}
