//! In-process record store.
//!
//! Records live in a `DashMap` keyed by `(entity type, id)`. Both directions
//! of every link are kept on the records themselves so traversals never scan.
//!
//! Writes go through [`RecordStore::transact`]: the batch is staged in a
//! copy-on-write overlay, every step is authorized, and the overlay is
//! committed only if all of them are allowed. A step is judged against the
//! committed state plus the steps already authorized, plus the steps that only
//! write records created by the same transaction. A step that touches an
//! existing record therefore never lends its effect to another step until it
//! has been authorized on its own. That keeps a team and its first membership
//! creatable together while an outsider cannot invite and admit themselves.
//!
//! Readers take the `gate` for reading and commits take it for writing, so a
//! decision never observes half of a transaction.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use teamrules_core::error::{PermError, Result, TraversalError};
use teamrules_core::model::{Actor, Decision, OperationKind, Record, RecordId};

use super::{Mutation, RecordStore, Traverse};
use crate::config::Has;
use crate::policy::{Authorizer, RelPath};
use crate::schema::Schema;

type Key = (String, RecordId);

fn key(entity: &str, id: &RecordId) -> Key {
    (entity.to_string(), id.clone())
}

pub struct MemoryStore {
    schema: Arc<Schema>,
    authorizer: Arc<Authorizer>,
    records: DashMap<Key, Record>,
    // Serializes stage/authorize/commit.
    commit: Mutex<()>,
    // Readers hold it shared; applying a commit holds it exclusively.
    gate: RwLock<()>,
}

impl MemoryStore {
    pub fn new(schema: Arc<Schema>, authorizer: Arc<Authorizer>) -> Self {
        Self {
            schema,
            authorizer,
            records: DashMap::new(),
            commit: Mutex::new(()),
            gate: RwLock::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert without authorization (fixtures, bootstrapping). Links are
    /// validated and their reverse side written like a normal create.
    pub fn seed(&self, entity: &str, record: Record) -> Result<()> {
        let _serial = self.lock()?;
        let mut overlay = Overlay::new(&self.records);
        self.stage(&mut overlay, entity, Mutation::create(record))?;
        let _write = self.write()?;
        overlay.commit();
        Ok(())
    }

    /// Insert a record exactly as given: no authorization, no link checks and
    /// no reverse-link maintenance. For snapshots that already carry both
    /// sides of their links.
    pub fn import(&self, entity: &str, record: Record) -> Result<()> {
        let _serial = self.lock()?;
        let _write = self.write()?;
        self.records.insert(key(entity, &record.id), record);
        Ok(())
    }

    /// Unchecked synchronous read.
    pub fn record(&self, entity: &str, id: &RecordId) -> Option<Record> {
        self.records.get(&key(entity, id)).map(|r| r.value().clone())
    }

    /// Decide `op` on `record` with every traversal reading the same
    /// committed snapshot.
    pub fn authorize(&self, actor: &Actor, entity: &str, op: OperationKind, record: &Record) -> Result<Decision> {
        let _read = self.read()?;
        let snapshot = Overlay::new(&self.records);
        Ok(self.authorizer.authorize(actor, entity, op, record, &snapshot))
    }

    /// Records of `entity` the actor may view, ordered by id.
    pub async fn list_visible(&self, actor: &Actor, entity: &str) -> Result<Vec<Record>> {
        let _read = self.read()?;
        let snapshot = Overlay::new(&self.records);
        let mut all: Vec<Record> = self
            .records
            .iter()
            .filter(|r| r.key().0 == entity)
            .map(|r| r.value().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all
            .into_iter()
            .filter(|r| {
                self.authorizer
                    .authorize(actor, entity, OperationKind::View, r, &snapshot)
                    .is_allow()
            })
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.commit
            .lock()
            .map_err(|_| PermError::Internal("store commit lock poisoned".into()))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.gate
            .read()
            .map_err(|_| PermError::Internal("store gate poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.gate
            .write()
            .map_err(|_| PermError::Internal("store gate poisoned".into()))
    }

    fn check_attrs(&self, entity: &str, attrs: &Map<String, Value>) -> Result<()> {
        for name in attrs.keys() {
            if name == "id" || !self.schema.has_attr(entity, name) {
                return Err(PermError::BadRequest(format!("{entity} has no attribute `{name}`")));
            }
        }
        Ok(())
    }

    /// Apply one mutation to the overlay and return what its authorization
    /// needs: the record before the step and every key the step wrote.
    fn stage(&self, ov: &mut Overlay<'_>, entity: &str, m: Mutation) -> Result<Pending> {
        if !self.schema.has_entity(entity) {
            return Err(PermError::BadRequest(format!("unknown entity type: {entity}")));
        }
        let op = m.op();
        let mut writes = Vec::new();
        let subject = match m {
            Mutation::Create { id, attrs, links } => {
                if ov.get(entity, &id).is_some() {
                    return Err(PermError::BadRequest(format!("{entity}/{id} already exists")));
                }
                self.check_attrs(entity, &attrs)?;

                let mut record = Record {
                    id: id.clone(),
                    attrs: attrs.into_iter().filter(|(_, v)| !v.is_null()).collect(),
                    links: BTreeMap::new(),
                };
                for (label, targets) in links {
                    let side = self.schema.link(entity, &label).ok_or_else(|| {
                        PermError::BadRequest(format!("{entity} has no relationship `{label}`"))
                    })?;
                    if side.has == Has::One && targets.len() > 1 {
                        return Err(PermError::BadRequest(format!(
                            "{entity}.{label} links to at most one record"
                        )));
                    }
                    for target in targets {
                        let mut other = ov
                            .get(&side.target, &target)
                            .ok_or_else(|| PermError::NotFound(format!("{}/{target}", side.target)))?;
                        let back = other.links.entry(side.inverse.clone()).or_default();
                        if side.inverse_has == Has::One && !back.is_empty() {
                            return Err(PermError::BadRequest(format!(
                                "{}/{target}.{} already holds a link",
                                side.target, side.inverse
                            )));
                        }
                        back.insert(id.clone());
                        ov.put(&side.target, other);
                        writes.push(key(&side.target, &target));
                        record.links.entry(label.clone()).or_default().insert(target);
                    }
                }
                writes.push(key(entity, &id));
                ov.put(entity, record.clone());
                record
            }
            Mutation::Update { id, attrs } => {
                let current = ov
                    .get(entity, &id)
                    .ok_or_else(|| PermError::NotFound(format!("{entity}/{id}")))?;
                self.check_attrs(entity, &attrs)?;

                let mut next = current.clone();
                for (name, v) in attrs {
                    if v.is_null() {
                        next.attrs.remove(&name);
                    } else {
                        next.attrs.insert(name, v);
                    }
                }
                writes.push(key(entity, &id));
                ov.put(entity, next);
                current
            }
            Mutation::Delete { id } => {
                let current = ov
                    .get(entity, &id)
                    .ok_or_else(|| PermError::NotFound(format!("{entity}/{id}")))?;
                for (label, targets) in &current.links {
                    let Some(side) = self.schema.link(entity, label) else {
                        continue;
                    };
                    for target in targets {
                        let touched = ov.modify(&side.target, target, |r| {
                            if let Some(set) = r.links.get_mut(&side.inverse) {
                                set.remove(&id);
                                if set.is_empty() {
                                    r.links.remove(&side.inverse);
                                }
                            }
                        });
                        if touched {
                            writes.push(key(&side.target, target));
                        }
                    }
                }
                writes.push(key(entity, &id));
                ov.remove(entity, &id);
                current
            }
        };
        Ok(Pending {
            entity: entity.to_string(),
            op,
            subject,
            writes,
        })
    }

    /// Authorize step `i` against the committed state plus the steps
    /// `visible` admits, replayed in their original order. A replay that
    /// cannot be staged without the hidden steps is not granted.
    fn judge(
        &self,
        actor: &Actor,
        steps: &[(String, Mutation)],
        i: usize,
        visible: impl Fn(usize) -> bool,
    ) -> bool {
        let mut ov = Overlay::new(&self.records);
        let mut judged = None;
        for (j, (entity, m)) in steps.iter().enumerate() {
            if !visible(j) {
                continue;
            }
            match self.stage(&mut ov, entity, m.clone()) {
                Ok(p) if j == i => judged = Some(p),
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        let Some(p) = judged else {
            return false;
        };
        let record = p.judged_record(&ov);
        self.authorizer
            .authorize(actor, &p.entity, p.op, &record, &ov)
            .is_allow()
    }
}

/// A staged step awaiting its authorization check.
struct Pending {
    entity: String,
    op: OperationKind,
    subject: Record,
    /// Records this step inserted, changed or removed.
    writes: Vec<Key>,
}

impl Pending {
    /// Creates are judged on the record as the visible steps leave it (they
    /// may add reverse links); updates and deletes on the record as it was
    /// before the step.
    fn judged_record(&self, ov: &Overlay<'_>) -> Record {
        match self.op {
            OperationKind::Create => ov
                .get(&self.entity, &self.subject.id)
                .unwrap_or_else(|| self.subject.clone()),
            _ => self.subject.clone(),
        }
    }

    fn result_record(&self, ov: &Overlay<'_>) -> Record {
        match self.op {
            OperationKind::Delete => self.subject.clone(),
            _ => ov
                .get(&self.entity, &self.subject.id)
                .unwrap_or_else(|| self.subject.clone()),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, entity: &str, id: &RecordId) -> Result<Record> {
        self.record(entity, id)
            .ok_or_else(|| PermError::NotFound(format!("{entity}/{id}")))
    }

    async fn view(&self, actor: &Actor, entity: &str, id: &RecordId) -> Result<Record> {
        let _read = self.read()?;
        let record = self
            .record(entity, id)
            .ok_or_else(|| PermError::NotFound(format!("{entity}/{id}")))?;
        let snapshot = Overlay::new(&self.records);
        if !self
            .authorizer
            .authorize(actor, entity, OperationKind::View, &record, &snapshot)
            .is_allow()
        {
            return Err(PermError::NotAllowed);
        }
        Ok(record)
    }

    async fn transact(&self, actor: &Actor, steps: Vec<(String, Mutation)>) -> Result<Vec<Record>> {
        let _serial = self.lock()?;

        // Stage the whole batch once: rejects malformed steps and yields the
        // state a successful commit leaves behind.
        let mut overlay = Overlay::new(&self.records);
        let mut pending = Vec::with_capacity(steps.len());
        for (entity, m) in &steps {
            pending.push(self.stage(&mut overlay, entity, m.clone())?);
        }

        let created: HashSet<&Key> = pending
            .iter()
            .filter(|p| p.op == OperationKind::Create)
            .filter_map(|p| p.writes.last())
            .collect();
        let self_contained: Vec<bool> = pending
            .iter()
            .map(|p| p.writes.iter().all(|k| created.contains(k)))
            .collect();

        // Grants only flow from steps that are already authorized or that
        // touch nothing outside this transaction; iterate to a fixed point.
        let mut authorized = vec![false; steps.len()];
        loop {
            let mut progressed = false;
            for i in 0..steps.len() {
                if authorized[i] {
                    continue;
                }
                let visible = |j: usize| j == i || authorized[j] || self_contained[j];
                if self.judge(actor, &steps, i, visible) {
                    authorized[i] = true;
                    progressed = true;
                }
            }
            if authorized.iter().all(|a| *a) {
                break;
            }
            if !progressed {
                if let Some(p) = authorized.iter().position(|a| !a).and_then(|i| pending.get(i)) {
                    tracing::debug!(entity = %p.entity, op = %p.op, id = %p.subject.id, "transaction rejected");
                }
                return Err(PermError::NotAllowed);
            }
        }

        let out = pending.iter().map(|p| p.result_record(&overlay)).collect();
        let _write = self.write()?;
        overlay.commit();
        Ok(out)
    }
}

/// Each call reads the committed state under the gate. Use
/// [`MemoryStore::authorize`] to hold one snapshot for a whole decision.
impl Traverse for MemoryStore {
    fn traverse(&self, entity: &str, record: &Record, path: &RelPath) -> std::result::Result<Vec<Value>, TraversalError> {
        let _read = self
            .gate
            .read()
            .map_err(|_| TraversalError::Unavailable("store gate poisoned".into()))?;
        Overlay::new(&self.records).traverse(entity, record, path)
    }
}

/// Copy-on-write view over the committed records.
struct Overlay<'s> {
    base: &'s DashMap<Key, Record>,
    staged: HashMap<Key, Option<Record>>,
}

impl<'s> Overlay<'s> {
    fn new(base: &'s DashMap<Key, Record>) -> Self {
        Self {
            base,
            staged: HashMap::new(),
        }
    }

    fn get(&self, entity: &str, id: &RecordId) -> Option<Record> {
        let k = key(entity, id);
        match self.staged.get(&k) {
            Some(staged) => staged.clone(),
            None => self.base.get(&k).map(|r| r.value().clone()),
        }
    }

    fn put(&mut self, entity: &str, record: Record) {
        self.staged.insert(key(entity, &record.id), Some(record));
    }

    fn remove(&mut self, entity: &str, id: &RecordId) {
        self.staged.insert(key(entity, id), None);
    }

    /// Edit a record in place; false when it does not exist.
    fn modify(&mut self, entity: &str, id: &RecordId, f: impl FnOnce(&mut Record)) -> bool {
        match self.get(entity, id) {
            Some(mut r) => {
                f(&mut r);
                self.put(entity, r);
                true
            }
            None => false,
        }
    }

    /// Caller holds the gate for writing.
    fn commit(self) {
        for (k, v) in self.staged {
            match v {
                Some(r) => {
                    self.base.insert(k, r);
                }
                None => {
                    self.base.remove(&k);
                }
            }
        }
    }
}

impl Traverse for Overlay<'_> {
    fn traverse(&self, entity: &str, record: &Record, path: &RelPath) -> std::result::Result<Vec<Value>, TraversalError> {
        if let Some(first) = path.hops.first() {
            if first.from != entity {
                return Err(TraversalError::UnknownRelationship {
                    entity: entity.to_string(),
                    label: first.label.clone(),
                });
            }
        }

        let mut frontier = vec![record.clone()];
        for hop in &path.hops {
            let mut seen = BTreeSet::new();
            let mut next = Vec::new();
            for r in &frontier {
                for id in r.linked(&hop.label) {
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                    match self.get(&hop.to, id) {
                        Some(rec) => next.push(rec),
                        None => {
                            return Err(TraversalError::BrokenReference {
                                entity: hop.to.clone(),
                                id: id.to_string(),
                            })
                        }
                    }
                }
            }
            frontier = next;
        }

        let mut out: Vec<Value> = Vec::new();
        for r in &frontier {
            let v = r.field(&path.field);
            if !v.is_null() && !out.contains(&v) {
                out.push(v);
            }
        }
        Ok(out)
    }
}
