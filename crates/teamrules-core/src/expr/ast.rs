//! Untyped expression tree produced by the parser.
//!
//! Names are kept as written; resolving them to bindings, actor fields,
//! record fields and traversal paths happens when a policy is compiled.

use std::fmt;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    In,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::In => "in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `true`, `false`, `null`, numbers and strings.
    Literal(Value),
    /// Dotted identifier: `isMember`, `auth.id`, `data.userEmail`.
    Ident(Vec<String>),
    /// `size(x)`, `data.ref('a.b')`.
    Call { callee: Vec<String>, args: Vec<Expr> },
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn ident(path: &[&str]) -> Self {
        Expr::Ident(path.iter().map(|s| s.to_string()).collect())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// True for the bare literal `false`, which denies unconditionally.
    pub fn is_false_literal(&self) -> bool {
        matches!(self, Expr::Literal(Value::Bool(false)))
    }

    /// Visit every node, parents before children.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Literal(_) | Expr::Ident(_) => {}
            Expr::Call { args, .. } => args.iter().for_each(|a| a.walk(f)),
            Expr::Not(inner) => inner.walk(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                cond.walk(f);
                then.walk(f);
                otherwise.walk(f);
            }
        }
    }
}

/// Fully parenthesized rendering; parsing the output yields the same tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => {
                write!(f, "'")?;
                for c in s.chars() {
                    match c {
                        '\'' | '\\' => write!(f, "\\{c}")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "'")
            }
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Ident(path) => write!(f, "{}", path.join(".")),
            Expr::Call { callee, args } => {
                write!(f, "{}(", callee.join("."))?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => write!(f, "({cond} ? {then} : {otherwise})"),
        }
    }
}
