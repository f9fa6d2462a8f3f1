//! Rule expression language.
//!
//! Expressions are parsed once, when a policy is loaded, into an [`ast::Expr`]
//! tree. All parsers are panic-free: malformed input is reported as a
//! [`ParseError`](crate::error::ParseError) carrying the byte offset.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{BinOp, Expr};
pub use parser::parse_expr;
