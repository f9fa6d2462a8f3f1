//! Per-request evaluation of compiled rules.
//!
//! An [`EvalCtx`] lives for exactly one decision. It memoizes binding results
//! and traversal results so each binding and each distinct path is computed
//! at most once per request, and it owns no state shared with other requests.
//!
//! Value rules:
//! - `null` is never equal (or unequal) to anything, including `null`, and is
//!   never a member of a set. Anonymous actors read `auth.*` as `null`, so
//!   every identity predicate fails for them without erroring.
//! - `&&`, `||` and `?:` short-circuit; branches not taken run no traversals.
//! - A traversal failure aborts the evaluation; callers turn it into Deny.

use std::rc::Rc;

use serde_json::Value;
use teamrules_core::error::TraversalError;
use teamrules_core::model::{Actor, Record};
use thiserror::Error;

use super::ir::{CompiledEntity, Node};
use crate::store::Traverse;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Traversal(#[from] TraversalError),
    #[error("type error: {0}")]
    Type(&'static str),
}

#[derive(Debug, Clone)]
enum Val {
    Scalar(Value),
    Set(Rc<Vec<Value>>),
}

/// Counters for one evaluation; exposed for tests and tracing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvalStats {
    pub bindings_evaluated: usize,
    pub traversals: usize,
}

pub struct EvalCtx<'a> {
    entity: &'a CompiledEntity,
    actor: &'a Actor,
    record: &'a Record,
    traverse: &'a dyn Traverse,
    bindings: Vec<Option<bool>>,
    refs: Vec<Option<Rc<Vec<Value>>>>,
    stats: EvalStats,
}

impl<'a> EvalCtx<'a> {
    pub fn new(
        entity: &'a CompiledEntity,
        actor: &'a Actor,
        record: &'a Record,
        traverse: &'a dyn Traverse,
    ) -> Self {
        Self {
            entity,
            actor,
            record,
            traverse,
            bindings: vec![None; entity.bindings.len()],
            refs: vec![None; entity.paths.len()],
            stats: EvalStats::default(),
        }
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }

    /// Evaluate a node in boolean position. `null` reads as false; any other
    /// non-boolean is a type error.
    pub fn eval_bool(&mut self, node: &'a Node) -> Result<bool, EvalError> {
        match node {
            Node::And(l, r) => Ok(self.eval_bool(l)? && self.eval_bool(r)?),
            Node::Or(l, r) => Ok(self.eval_bool(l)? || self.eval_bool(r)?),
            Node::Not(inner) => Ok(!self.eval_bool(inner)?),
            Node::Binding(i) => self.binding(*i),
            Node::Cond {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(cond)? {
                    self.eval_bool(then)
                } else {
                    self.eval_bool(otherwise)
                }
            }
            other => match self.eval(other)? {
                Val::Scalar(Value::Bool(b)) => Ok(b),
                Val::Scalar(Value::Null) => Ok(false),
                _ => Err(EvalError::Type("expected a boolean")),
            },
        }
    }

    fn eval(&mut self, node: &'a Node) -> Result<Val, EvalError> {
        Ok(match node {
            Node::Const(v) => Val::Scalar(v.clone()),
            Node::Auth(field) => Val::Scalar(self.actor.field(field)),
            Node::Data(field) => Val::Scalar(self.record.field(field)),
            Node::Ref(i) => Val::Set(self.traversal(*i)?),
            Node::Size(inner) => {
                let n = match self.eval(inner)? {
                    Val::Set(s) => s.len(),
                    Val::Scalar(Value::Array(a)) => a.len(),
                    Val::Scalar(Value::String(s)) => s.chars().count(),
                    Val::Scalar(Value::Object(o)) => o.len(),
                    Val::Scalar(_) => return Err(EvalError::Type("size() of a scalar")),
                };
                Val::Scalar(Value::from(n))
            }
            Node::Eq(l, r) => {
                let (l, r) = (self.eval(l)?, self.eval(r)?);
                Val::Scalar(Value::Bool(compare(&l, &r)? == Some(true)))
            }
            Node::Ne(l, r) => {
                let (l, r) = (self.eval(l)?, self.eval(r)?);
                Val::Scalar(Value::Bool(compare(&l, &r)? == Some(false)))
            }
            Node::In(needle, haystack) => {
                let needle = match self.eval(needle)? {
                    Val::Scalar(v) => v,
                    Val::Set(_) => return Err(EvalError::Type("left side of `in` must be a scalar")),
                };
                let found = match self.eval(haystack)? {
                    Val::Set(s) => contains(&s, &needle),
                    Val::Scalar(Value::Array(a)) => contains(&a, &needle),
                    Val::Scalar(Value::Null) => false,
                    Val::Scalar(_) => return Err(EvalError::Type("right side of `in` must be a set")),
                };
                Val::Scalar(Value::Bool(found))
            }
            Node::Cond {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(cond)? {
                    self.eval(then)?
                } else {
                    self.eval(otherwise)?
                }
            }
            Node::And(..) | Node::Or(..) | Node::Not(_) | Node::Binding(_) => {
                Val::Scalar(Value::Bool(self.eval_bool(node)?))
            }
        })
    }

    fn binding(&mut self, i: usize) -> Result<bool, EvalError> {
        if let Some(Some(b)) = self.bindings.get(i) {
            return Ok(*b);
        }
        let entity = self.entity;
        let Some(binding) = entity.bindings.get(i) else {
            return Err(EvalError::Type("binding slot out of range"));
        };
        let b = self.eval_bool(&binding.node)?;
        self.stats.bindings_evaluated += 1;
        if let Some(slot) = self.bindings.get_mut(i) {
            *slot = Some(b);
        }
        Ok(b)
    }

    fn traversal(&mut self, i: usize) -> Result<Rc<Vec<Value>>, EvalError> {
        if let Some(Some(values)) = self.refs.get(i) {
            return Ok(Rc::clone(values));
        }
        let entity = self.entity;
        let Some(path) = entity.paths.get(i) else {
            return Err(EvalError::Type("path slot out of range"));
        };
        let values = Rc::new(self.traverse.traverse(&entity.name, self.record, path)?);
        self.stats.traversals += 1;
        if let Some(slot) = self.refs.get_mut(i) {
            *slot = Some(Rc::clone(&values));
        }
        Ok(values)
    }
}

/// `Some(eq)` for two comparable scalars, `None` when either side is null.
fn compare(l: &Val, r: &Val) -> Result<Option<bool>, EvalError> {
    match (l, r) {
        (Val::Scalar(a), Val::Scalar(b)) => Ok(scalar_eq(a, b)),
        _ => Err(EvalError::Type("cannot compare a set with `==`; use `in` or size()")),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => Some(match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        }),
        _ => Some(a == b),
    }
}

fn contains(set: &[Value], needle: &Value) -> bool {
    set.iter().any(|v| scalar_eq(v, needle) == Some(true))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;
    use teamrules_core::error::TraversalError;

    use super::*;
    use crate::policy::ir::{CompiledBinding, Hop, RelPath};

    /// Answers every path with a fixed set and counts calls.
    struct Fixed {
        values: Vec<Value>,
        calls: Cell<usize>,
        fail: bool,
    }

    impl Traverse for Fixed {
        fn traverse(&self, entity: &str, _record: &Record, path: &RelPath) -> Result<Vec<Value>, TraversalError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(TraversalError::BrokenReference {
                    entity: entity.to_string(),
                    id: path.raw.clone(),
                });
            }
            Ok(self.values.clone())
        }
    }

    fn fixed(values: Vec<Value>) -> Fixed {
        Fixed {
            values,
            calls: Cell::new(0),
            fail: false,
        }
    }

    fn path() -> RelPath {
        RelPath {
            raw: "teams.memberships.userId".into(),
            hops: vec![
                Hop {
                    label: "teams".into(),
                    from: "todos".into(),
                    to: "teams".into(),
                },
                Hop {
                    label: "memberships".into(),
                    from: "teams".into(),
                    to: "memberships".into(),
                },
            ],
            field: "userId".into(),
        }
    }

    fn b(n: Node) -> Box<Node> {
        Box::new(n)
    }

    /// `isMember = auth.id in data.ref(path)`
    fn entity() -> CompiledEntity {
        let mut e = CompiledEntity::deny_all("todos");
        e.paths.push(path());
        e.bindings.push(CompiledBinding {
            name: "isMember".into(),
            node: Node::In(b(Node::Auth("id".into())), b(Node::Ref(0))),
        });
        e
    }

    fn run(node: &Node, actor: &Actor, t: &Fixed) -> (Result<bool, EvalError>, EvalStats) {
        let e = entity();
        let record = Record::new("t1").with_attr("text", "x");
        let mut ctx = EvalCtx::new(&e, actor, &record, t);
        let r = ctx.eval_bool(node);
        (r, ctx.stats())
    }

    #[test]
    fn binding_memoized_within_request() {
        let t = fixed(vec![json!("u1")]);
        let node = Node::And(b(Node::Binding(0)), b(Node::Binding(0)));
        let (r, stats) = run(&node, &Actor::user("u1", "a@x"), &t);
        assert!(matches!(r, Ok(true)));
        assert_eq!(stats.bindings_evaluated, 1);
        assert_eq!(t.calls.get(), 1);
    }

    #[test]
    fn short_circuit_skips_traversal() {
        let t = fixed(vec![json!("u1")]);
        let node = Node::Or(b(Node::Const(json!(true))), b(Node::Binding(0)));
        let (r, stats) = run(&node, &Actor::user("u1", "a@x"), &t);
        assert!(matches!(r, Ok(true)));
        assert_eq!(stats.traversals, 0);
        assert_eq!(t.calls.get(), 0);
    }

    #[test]
    fn anonymous_never_matches() {
        let t = fixed(vec![json!("u1"), Value::Null]);
        let anon = Actor::anonymous();
        let (r, _) = run(&Node::Binding(0), &anon, &t);
        assert!(matches!(r, Ok(false)));

        let eq = Node::Eq(b(Node::Auth("id".into())), b(Node::Data("userId".into())));
        let (r, _) = run(&eq, &anon, &t);
        assert!(matches!(r, Ok(false)));

        let ne = Node::Ne(b(Node::Auth("id".into())), b(Node::Const(json!("u1"))));
        let (r, _) = run(&ne, &anon, &t);
        assert!(matches!(r, Ok(false)));
    }

    #[test]
    fn size_and_ternary() {
        let t = fixed(vec![]);
        let node = Node::Cond {
            cond: b(Node::Eq(b(Node::Size(b(Node::Ref(0)))), b(Node::Const(json!(0))))),
            then: b(Node::Const(json!(true))),
            otherwise: b(Node::Const(json!(false))),
        };
        let (r, _) = run(&node, &Actor::user("u1", "a@x"), &t);
        assert!(matches!(r, Ok(true)));

        let t = fixed(vec![json!("x")]);
        let (r, _) = run(&node, &Actor::user("u1", "a@x"), &t);
        assert!(matches!(r, Ok(false)));
    }

    #[test]
    fn traversal_failure_propagates() {
        let mut t = fixed(vec![]);
        t.fail = true;
        let node = Node::Not(b(Node::Binding(0)));
        let (r, _) = run(&node, &Actor::user("u1", "a@x"), &t);
        assert!(matches!(r, Err(EvalError::Traversal(_))));
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(scalar_eq(&json!(0), &json!(0.0)), Some(true));
        assert_eq!(scalar_eq(&json!(1), &json!("1")), Some(false));
        assert_eq!(scalar_eq(&Value::Null, &Value::Null), None);
    }

    #[test]
    fn non_boolean_rule_is_a_type_error() {
        let t = fixed(vec![]);
        let (r, _) = run(&Node::Const(json!("yes")), &Actor::user("u1", "a@x"), &t);
        assert!(matches!(r, Err(EvalError::Type(_))));
    }
}
