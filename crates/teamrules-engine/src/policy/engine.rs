use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use teamrules_core::document::PolicyDocument;
use teamrules_core::error::{ConfigError, PermError, Result};
use teamrules_core::model::{Actor, Decision, OperationKind, Record};

use super::compile::compile_entity;
use super::eval::{EvalCtx, EvalError};
use super::ir::CompiledEntity;
use crate::obs::metrics::Metrics;
use crate::schema::Schema;
use crate::store::Traverse;

#[derive(Debug)]
enum EntityState {
    Ready(CompiledEntity),
    /// Policy failed to compile; every request is denied.
    Quarantined(Vec<ConfigError>),
}

/// Compiled policy for every entity type of a schema.
/// Construct once at startup, then share via Arc.
#[derive(Debug, Default)]
pub struct PolicySet {
    entities: HashMap<String, EntityState>,
}

impl PolicySet {
    /// All-or-nothing compile. Every error from every entity is reported.
    pub fn compile(doc: &PolicyDocument, schema: &Schema) -> Result<Self> {
        let (set, errors) = Self::compile_lenient(doc, schema);
        if !errors.is_empty() {
            return Err(PermError::Config(errors));
        }
        Ok(set)
    }

    /// Compile what compiles. Broken entities are quarantined and their
    /// errors returned alongside the set.
    pub fn compile_lenient(doc: &PolicyDocument, schema: &Schema) -> (Self, Vec<ConfigError>) {
        let mut entities = HashMap::new();
        let mut errors = Vec::new();

        for (name, policy) in &doc.entities {
            match compile_entity(name, policy, schema) {
                Ok(compiled) => {
                    entities.insert(name.clone(), EntityState::Ready(compiled));
                }
                Err(errs) => {
                    // Unknown entity types have nothing to quarantine.
                    if schema.has_entity(name) {
                        entities.insert(name.clone(), EntityState::Quarantined(errs.clone()));
                    }
                    errors.extend(errs);
                }
            }
        }

        for name in schema.entity_names() {
            entities
                .entry(name.to_string())
                .or_insert_with(|| EntityState::Ready(CompiledEntity::deny_all(name)));
        }

        (Self { entities }, errors)
    }

    /// Compiled form of `entity`, unless it is unknown or quarantined.
    pub fn entity(&self, entity: &str) -> Option<&CompiledEntity> {
        match self.entities.get(entity) {
            Some(EntityState::Ready(e)) => Some(e),
            _ => None,
        }
    }

    pub fn is_quarantined(&self, entity: &str) -> bool {
        matches!(self.entities.get(entity), Some(EntityState::Quarantined(_)))
    }

    /// Load errors of a quarantined entity.
    pub fn quarantine_errors(&self, entity: &str) -> &[ConfigError] {
        match self.entities.get(entity) {
            Some(EntityState::Quarantined(errs)) => errs,
            _ => &[],
        }
    }

    /// Entity type names, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Operations that can ever be allowed on `entity`. Empty for unknown
    /// and quarantined entities.
    pub fn permitted_ops(&self, entity: &str) -> Vec<OperationKind> {
        self.entity(entity)
            .map(CompiledEntity::permitted_ops)
            .unwrap_or_default()
    }
}

/// Fail-closed decision point over a [`PolicySet`].
pub struct Authorizer {
    policy: Arc<PolicySet>,
    metrics: Option<Arc<Metrics>>,
}

impl Authorizer {
    pub fn new(policy: Arc<PolicySet>) -> Self {
        Self { policy, metrics: None }
    }

    pub fn with_metrics(policy: Arc<PolicySet>, metrics: Arc<Metrics>) -> Self {
        for name in policy.entity_names() {
            let flag = i64::from(policy.is_quarantined(name));
            metrics.quarantined.set(&[("entity", name)], flag);
        }
        Self {
            policy,
            metrics: Some(metrics),
        }
    }

    pub fn policy(&self) -> &PolicySet {
        &self.policy
    }

    /// Decide whether `actor` may perform `op` on `record` of type `entity`.
    ///
    /// `record` is the stored record for view/update/delete and the proposed
    /// record for create. Every failure mode ends in Deny.
    pub fn authorize(
        &self,
        actor: &Actor,
        entity: &str,
        op: OperationKind,
        record: &Record,
        traverse: &dyn Traverse,
    ) -> Decision {
        let started = Instant::now();
        let decision = self.decide(actor, entity, op, record, traverse);

        tracing::debug!(entity, op = %op, decision = %decision.as_str(), "authorize");
        if let Some(m) = &self.metrics {
            m.decisions
                .inc(&[("entity", entity), ("op", op.as_str()), ("decision", decision.as_str())]);
            m.eval_duration.observe(&[("entity", entity)], started.elapsed());
        }
        decision
    }

    fn decide(
        &self,
        actor: &Actor,
        entity: &str,
        op: OperationKind,
        record: &Record,
        traverse: &dyn Traverse,
    ) -> Decision {
        let compiled = match self.policy.entities.get(entity) {
            Some(EntityState::Ready(c)) => c,
            Some(EntityState::Quarantined(errs)) => {
                tracing::error!(entity, op = %op, errors = errs.len(), "request against quarantined entity");
                self.forced_denial(entity, "quarantined");
                return Decision::Deny;
            }
            None => {
                tracing::debug!(entity, "unknown entity type");
                self.forced_denial(entity, "unknown_entity");
                return Decision::Deny;
            }
        };

        let Some(rule) = compiled.rule(op) else {
            return Decision::Deny;
        };

        let mut ctx = EvalCtx::new(compiled, actor, record, traverse);
        match ctx.eval_bool(rule) {
            Ok(allowed) => {
                let stats = ctx.stats();
                tracing::trace!(
                    entity,
                    bindings = stats.bindings_evaluated,
                    traversals = stats.traversals,
                    "rule evaluated"
                );
                Decision::from(allowed)
            }
            Err(EvalError::Traversal(e)) => {
                tracing::warn!(entity, op = %op, error = %e, "traversal failed");
                self.forced_denial(entity, "traversal");
                Decision::Deny
            }
            Err(e @ EvalError::Type(_)) => {
                tracing::warn!(entity, op = %op, error = %e, "rule evaluation failed");
                self.forced_denial(entity, "type");
                Decision::Deny
            }
        }
    }

    fn forced_denial(&self, entity: &str, reason: &str) {
        if let Some(m) = &self.metrics {
            m.forced_denials.inc(&[("entity", entity), ("reason", reason)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use teamrules_core::error::TraversalError;

    use super::*;
    use crate::config::{EntityDef, LinkDef, SchemaSection};
    use crate::policy::RelPath;

    struct NoLinks;

    impl Traverse for NoLinks {
        fn traverse(&self, _: &str, _: &Record, _: &RelPath) -> std::result::Result<Vec<Value>, TraversalError> {
            Ok(Vec::new())
        }
    }

    struct Broken;

    impl Traverse for Broken {
        fn traverse(&self, entity: &str, _: &Record, _: &RelPath) -> std::result::Result<Vec<Value>, TraversalError> {
            Err(TraversalError::Unavailable(entity.to_string()))
        }
    }

    fn schema() -> Schema {
        let mut section = SchemaSection::default();
        for (name, attrs) in [("teams", vec!["name"]), ("memberships", vec!["userId"]), ("notes", vec![])] {
            section.entities.insert(
                name.to_string(),
                EntityDef {
                    attrs: attrs.into_iter().map(String::from).collect(),
                },
            );
        }
        section.links.push(LinkDef {
            from: "memberships".into(),
            forward: "teams".into(),
            to: "teams".into(),
            reverse: "memberships".into(),
            ..Default::default()
        });
        match Schema::from_section(&section) {
            Ok(s) => s,
            Err(e) => panic!("schema: {e}"),
        }
    }

    fn doc(json: &str) -> PolicyDocument {
        match PolicyDocument::from_json_str(json) {
            Ok(d) => d,
            Err(e) => panic!("doc: {e}"),
        }
    }

    const TEAMS: &str = r#"{
        "teams": {
            "bind": ["isMember", "auth.id in data.ref('memberships.userId')"],
            "allow": { "view": "isMember", "update": "false" }
        }
    }"#;

    #[test]
    fn entities_without_policy_deny_everything() {
        let set = match PolicySet::compile(&doc(TEAMS), &schema()) {
            Ok(s) => s,
            Err(e) => panic!("compile: {e}"),
        };
        let auth = Authorizer::new(Arc::new(set));
        let actor = Actor::user("u1", "a@x");
        for op in OperationKind::ALL {
            let d = auth.authorize(&actor, "notes", op, &Record::new("n1"), &NoLinks);
            assert_eq!(d, Decision::Deny);
        }
        assert!(auth.policy().permitted_ops("notes").is_empty());
        assert_eq!(auth.policy().permitted_ops("teams"), vec![OperationKind::View]);
    }

    #[test]
    fn strict_compile_aggregates_errors() {
        let bad = r#"{
            "teams": { "allow": { "view": "data.nope == 1" } },
            "memberships": { "allow": { "view": "undefinedAlias" } }
        }"#;
        match PolicySet::compile(&doc(bad), &schema()) {
            Err(PermError::Config(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn lenient_compile_quarantines_only_broken_entity() {
        let mixed = r#"{
            "teams": { "allow": { "view": "true" } },
            "memberships": { "allow": { "view": "data.ref('nowhere.userId') == 1" } }
        }"#;
        let (set, errs) = PolicySet::compile_lenient(&doc(mixed), &schema());
        assert_eq!(errs.len(), 1);
        assert!(set.is_quarantined("memberships"));
        assert!(!set.is_quarantined("teams"));
        assert_eq!(set.quarantine_errors("memberships").len(), 1);

        let metrics = Arc::new(Metrics::default());
        let auth = Authorizer::with_metrics(Arc::new(set), metrics.clone());
        let actor = Actor::user("u1", "a@x");
        let r = Record::new("x");
        assert_eq!(auth.authorize(&actor, "teams", OperationKind::View, &r, &NoLinks), Decision::Allow);
        assert_eq!(auth.authorize(&actor, "memberships", OperationKind::View, &r, &NoLinks), Decision::Deny);
        assert_eq!(metrics.quarantined.get(&[("entity", "memberships")]), 1);
        assert_eq!(
            metrics.forced_denials.get(&[("entity", "memberships"), ("reason", "quarantined")]),
            1
        );
    }

    #[test]
    fn traversal_failure_denies_and_is_counted() {
        let set = match PolicySet::compile(&doc(TEAMS), &schema()) {
            Ok(s) => s,
            Err(e) => panic!("compile: {e}"),
        };
        let metrics = Arc::new(Metrics::default());
        let auth = Authorizer::with_metrics(Arc::new(set), metrics.clone());
        let d = auth.authorize(&Actor::user("u1", "a@x"), "teams", OperationKind::View, &Record::new("t1"), &Broken);
        assert_eq!(d, Decision::Deny);
        assert_eq!(metrics.forced_denials.get(&[("entity", "teams"), ("reason", "traversal")]), 1);
        assert_eq!(
            metrics.decisions.get(&[("entity", "teams"), ("op", "view"), ("decision", "deny")]),
            1
        );
    }

    #[test]
    fn unknown_entity_denied() {
        let auth = Authorizer::new(Arc::new(PolicySet::default()));
        let d = auth.authorize(&Actor::user("u1", "a@x"), "ghosts", OperationKind::View, &Record::new("g"), &NoLinks);
        assert_eq!(d, Decision::Deny);
    }
}
