//! Manifest → resolved IR.
//!
//! All configuration errors are found here, at load time: bad syntax,
//! unknown or forward binding references, traversal paths over undeclared
//! relationships and unknown attributes. Errors are collected per entity
//! rather than stopping at the first one.

use std::collections::HashMap;

use serde_json::Value;
use teamrules_core::document::EntityPolicy;
use teamrules_core::error::ConfigError;
use teamrules_core::expr::lexer::{is_ident_continue, is_ident_start};
use teamrules_core::expr::{parse_expr, BinOp, Expr};
use teamrules_core::model::OperationKind;

use super::ir::{CompiledBinding, CompiledEntity, Hop, Node, RelPath};
use crate::schema::Schema;

const RESERVED: [&str; 7] = ["auth", "data", "size", "in", "true", "false", "null"];

pub fn compile_entity(
    name: &str,
    policy: &EntityPolicy,
    schema: &Schema,
) -> Result<CompiledEntity, Vec<ConfigError>> {
    if !schema.has_entity(name) {
        return Err(vec![ConfigError::UnknownEntity {
            entity: name.to_string(),
        }]);
    }

    let mut c = Compiler {
        entity: name,
        schema,
        scope: HashMap::new(),
        paths: Vec::new(),
        errors: Vec::new(),
    };

    if policy.bind.len() % 2 != 0 {
        c.errors.push(ConfigError::OddBindList {
            entity: name.to_string(),
            len: policy.bind.len(),
        });
    }

    let mut bindings = Vec::new();
    for (alias, src) in policy.bind_pairs() {
        if !is_alias(alias) {
            c.errors.push(ConfigError::InvalidAlias {
                entity: name.to_string(),
                alias: alias.to_string(),
            });
            continue;
        }
        if c.scope.contains_key(alias) {
            c.errors.push(ConfigError::DuplicateBinding {
                entity: name.to_string(),
                alias: alias.to_string(),
            });
            continue;
        }
        // Resolved before the alias enters scope: only earlier bindings are visible.
        let node = c.compile_src(src).unwrap_or(Node::Const(Value::Bool(false)));
        c.scope.insert(alias.to_string(), bindings.len());
        bindings.push(CompiledBinding {
            name: alias.to_string(),
            node,
        });
    }

    let mut rules: [Option<Node>; 4] = Default::default();
    for op in OperationKind::ALL {
        if let Some(src) = policy.allow.rule(op) {
            rules[op.index()] = c.compile_src(src);
        }
    }

    if !c.errors.is_empty() {
        return Err(c.errors);
    }
    Ok(CompiledEntity {
        name: name.to_string(),
        bindings,
        paths: c.paths,
        rules,
    })
}

fn is_alias(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_continue) && !RESERVED.contains(&s)
}

struct Compiler<'a> {
    entity: &'a str,
    schema: &'a Schema,
    scope: HashMap<String, usize>,
    paths: Vec<RelPath>,
    errors: Vec<ConfigError>,
}

impl Compiler<'_> {
    fn compile_src(&mut self, src: &str) -> Option<Node> {
        match parse_expr(src) {
            Ok(expr) => {
                let before = self.errors.len();
                let node = self.resolve(&expr);
                (self.errors.len() == before).then_some(node)
            }
            Err(source) => {
                self.errors.push(ConfigError::Syntax {
                    entity: self.entity.to_string(),
                    expr: src.to_string(),
                    source,
                });
                None
            }
        }
    }

    fn invalid(&mut self, msg: String) -> Node {
        self.errors.push(ConfigError::InvalidExpression {
            entity: self.entity.to_string(),
            msg,
        });
        Node::Const(Value::Null)
    }

    fn resolve(&mut self, expr: &Expr) -> Node {
        match expr {
            Expr::Literal(v) => Node::Const(v.clone()),
            Expr::Ident(path) => self.resolve_ident(path),
            Expr::Call { callee, args } => self.resolve_call(callee, args),
            Expr::Not(inner) => Node::Not(Box::new(self.resolve(inner))),
            Expr::Binary { op, lhs, rhs } => {
                let l = Box::new(self.resolve(lhs));
                let r = Box::new(self.resolve(rhs));
                match op {
                    BinOp::And => Node::And(l, r),
                    BinOp::Or => Node::Or(l, r),
                    BinOp::Eq => Node::Eq(l, r),
                    BinOp::Ne => Node::Ne(l, r),
                    BinOp::In => Node::In(l, r),
                }
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => Node::Cond {
                cond: Box::new(self.resolve(cond)),
                then: Box::new(self.resolve(then)),
                otherwise: Box::new(self.resolve(otherwise)),
            },
        }
    }

    fn resolve_ident(&mut self, path: &[String]) -> Node {
        let segs: Vec<&str> = path.iter().map(String::as_str).collect();
        match segs.as_slice() {
            [name] => match self.scope.get(*name).copied() {
                Some(i) => Node::Binding(i),
                None if matches!(*name, "auth" | "data") => {
                    self.invalid(format!("`{name}` must be followed by a field name"))
                }
                None => {
                    self.errors.push(ConfigError::UndefinedBinding {
                        entity: self.entity.to_string(),
                        name: name.to_string(),
                    });
                    Node::Const(Value::Null)
                }
            },
            ["auth", field] => Node::Auth(field.to_string()),
            ["data", field] => {
                if !self.schema.has_attr(self.entity, field) {
                    self.errors.push(ConfigError::UnknownAttribute {
                        entity: self.entity.to_string(),
                        attr: field.to_string(),
                        on: self.entity.to_string(),
                    });
                }
                Node::Data(field.to_string())
            }
            ["auth" | "data", ..] => self.invalid(format!(
                "nested field access `{}` is not supported; use data.ref() for relationships",
                path.join(".")
            )),
            _ => {
                self.errors.push(ConfigError::UndefinedBinding {
                    entity: self.entity.to_string(),
                    name: path.join("."),
                });
                Node::Const(Value::Null)
            }
        }
    }

    fn resolve_call(&mut self, callee: &[String], args: &[Expr]) -> Node {
        let segs: Vec<&str> = callee.iter().map(String::as_str).collect();
        match (segs.as_slice(), args) {
            (["size"], [arg]) => Node::Size(Box::new(self.resolve(arg))),
            (["data", "ref"], [Expr::Literal(Value::String(raw))]) => match self.resolve_path(raw) {
                Some(path) => Node::Ref(self.intern_path(path)),
                None => Node::Const(Value::Null),
            },
            (["data", "ref"], _) => {
                self.invalid("data.ref() takes exactly one string literal path".to_string())
            }
            (["size"], _) => self.invalid(format!("size() takes exactly one argument, got {}", args.len())),
            _ => self.invalid(format!("unknown function `{}`", callee.join("."))),
        }
    }

    fn intern_path(&mut self, path: RelPath) -> usize {
        if let Some(i) = self.paths.iter().position(|p| p.raw == path.raw) {
            return i;
        }
        self.paths.push(path);
        self.paths.len() - 1
    }

    fn resolve_path(&mut self, raw: &str) -> Option<RelPath> {
        let segs: Vec<&str> = raw.split('.').collect();
        if segs.iter().any(|s| s.is_empty()) {
            self.invalid(format!("malformed traversal path `{raw}`"));
            return None;
        }
        let (field, labels) = segs.split_last()?;

        let mut hops = Vec::with_capacity(labels.len());
        let mut cur = self.entity.to_string();
        for label in labels {
            let Some(side) = self.schema.link(&cur, label) else {
                self.errors.push(ConfigError::UndeclaredRelationship {
                    entity: self.entity.to_string(),
                    path: raw.to_string(),
                    segment: label.to_string(),
                    on: cur,
                });
                return None;
            };
            hops.push(Hop {
                label: label.to_string(),
                from: cur.clone(),
                to: side.target.clone(),
            });
            cur = side.target.clone();
        }

        if !self.schema.has_attr(&cur, field) {
            if self.schema.link(&cur, field).is_some() {
                self.invalid(format!(
                    "traversal path `{raw}` ends at relationship `{field}`; select an attribute such as `{field}.id`"
                ));
            } else {
                self.errors.push(ConfigError::UnknownAttribute {
                    entity: self.entity.to_string(),
                    attr: field.to_string(),
                    on: cur,
                });
            }
            return None;
        }

        Some(RelPath {
            raw: raw.to_string(),
            hops,
            field: field.to_string(),
        })
    }
}
