//! Recursive-descent parser for rule expressions.
//!
//! Grammar (lowest precedence first):
//!   expr     = or ( '?' expr ':' expr )?
//!   or       = and ( '||' and )*
//!   and      = unary ( '&&' unary )*
//!   unary    = '!' unary | relation
//!   relation = primary ( ( '==' | '!=' | 'in' ) primary )?
//!   primary  = literal | '(' expr ')' | path ( '(' args ')' )?
//!   path     = ident ( '.' ident )*

use crate::error::ParseError;

use super::ast::{BinOp, Expr};
use super::lexer::{tokenize, Token, TokenKind};

/// Nesting limit; deeper input is rejected instead of exhausting the stack.
pub const MAX_DEPTH: usize = 64;

/// Parse a complete expression. Trailing tokens are an error.
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let result = parse_tokens(&tokenize(input)?);
    if let Err(e) = &result {
        tracing::trace!(input, offset = e.offset, error = %e.msg, "expression rejected");
    }
    result
}

fn parse_tokens(tokens: &[Token]) -> Result<Expr, ParseError> {
    let mut p = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = p.expr()?;
    match p.peek() {
        TokenKind::Eof => Ok(expr),
        other => Err(ParseError::new(
            p.offset(),
            format!("unexpected {} after expression", other.describe()),
        )),
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> &'t TokenKind {
        // tokenize always terminates the stream with Eof and we never step past it
        match self.tokens.get(self.pos).or(self.tokens.last()) {
            Some(t) => &t.kind,
            None => &TokenKind::Eof,
        }
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or(self.tokens.last())
            .map(|t| t.offset)
            .unwrap_or(0)
    }

    fn bump(&mut self) -> &'t TokenKind {
        let kind = self.peek();
        if *kind != TokenKind::Eof {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(ParseError::new(
                self.offset(),
                format!("expected {}, found {}", kind.describe(), self.peek().describe()),
            ))
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new(self.offset(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let cond = self.or()?;
        let out = if self.eat(&TokenKind::Question) {
            let then = self.expr()?;
            self.expect(&TokenKind::Colon)?;
            let otherwise = self.expr()?;
            Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            cond
        };
        self.depth -= 1;
        Ok(out)
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.and()?;
            left = Expr::binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.unary()?;
            left = Expr::binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::Bang) {
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.relation()
    }

    fn relation(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.primary()?;
        let op = match self.peek() {
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::NotEq => BinOp::Ne,
            TokenKind::In => BinOp::In,
            _ => return Ok(lhs),
        };
        self.bump();
        let rhs = self.primary()?;
        if matches!(self.peek(), TokenKind::EqEq | TokenKind::NotEq | TokenKind::In) {
            return Err(ParseError::new(
                self.offset(),
                "comparison operators do not chain; add parentheses",
            ));
        }
        Ok(Expr::binary(op, lhs, rhs))
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.offset();
        match self.bump() {
            TokenKind::Literal(v) => Ok(Expr::Literal(v.clone())),
            TokenKind::LParen => {
                let inner = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(first) => {
                let mut path = vec![first.clone()];
                while self.eat(&TokenKind::Dot) {
                    let at = self.offset();
                    match self.bump() {
                        TokenKind::Ident(seg) => path.push(seg.clone()),
                        // `in` is a keyword but still a legal field name after a dot
                        TokenKind::In => path.push("in".to_string()),
                        other => {
                            return Err(ParseError::new(
                                at,
                                format!("expected field name after `.`, found {}", other.describe()),
                            ))
                        }
                    }
                }
                if self.eat(&TokenKind::LParen) {
                    let args = self.args()?;
                    return Ok(Expr::Call { callee: path, args });
                }
                Ok(Expr::Ident(path))
            }
            other => Err(ParseError::new(
                start,
                format!("expected operand, found {}", other.describe()),
            )),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            self.expect(&TokenKind::Comma)?;
        }
    }
}
