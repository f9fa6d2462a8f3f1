//! Tokenizer for rule expressions.
//!
//! Works on `char_indices` so every token keeps the byte offset it started
//! at; malformed input is reported as `ParseError`, never a panic.

use serde_json::{Number, Value};

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Literal(Value),
    In,
    Dot,
    Comma,
    LParen,
    RParen,
    Question,
    Colon,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) => format!("identifier `{s}`"),
            TokenKind::Literal(v) => format!("literal `{v}`"),
            TokenKind::In => "`in`".into(),
            TokenKind::Dot => "`.`".into(),
            TokenKind::Comma => "`,`".into(),
            TokenKind::LParen => "`(`".into(),
            TokenKind::RParen => "`)`".into(),
            TokenKind::Question => "`?`".into(),
            TokenKind::Colon => "`:`".into(),
            TokenKind::EqEq => "`==`".into(),
            TokenKind::NotEq => "`!=`".into(),
            TokenKind::AndAnd => "`&&`".into(),
            TokenKind::OrOr => "`||`".into(),
            TokenKind::Bang => "`!`".into(),
            TokenKind::Eof => "end of expression".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Tokenize an expression. The last token is always `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let kind = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '.' => single(&mut chars, TokenKind::Dot),
            ',' => single(&mut chars, TokenKind::Comma),
            '(' => single(&mut chars, TokenKind::LParen),
            ')' => single(&mut chars, TokenKind::RParen),
            '?' => single(&mut chars, TokenKind::Question),
            ':' => single(&mut chars, TokenKind::Colon),
            '=' => pair(&mut chars, offset, '=', TokenKind::EqEq)?,
            '&' => pair(&mut chars, offset, '&', TokenKind::AndAnd)?,
            '|' => pair(&mut chars, offset, '|', TokenKind::OrOr)?,
            '!' => {
                chars.next();
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '\'' | '"' => TokenKind::Literal(Value::String(string(&mut chars, offset)?)),
            c if c.is_ascii_digit() => TokenKind::Literal(number(input, &mut chars, offset)?),
            c if is_ident_start(c) => {
                let mut end = offset;
                while let Some(&(i, c)) = chars.peek() {
                    if !is_ident_continue(c) {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                match &input[offset..end] {
                    "in" => TokenKind::In,
                    "true" => TokenKind::Literal(Value::Bool(true)),
                    "false" => TokenKind::Literal(Value::Bool(false)),
                    "null" => TokenKind::Literal(Value::Null),
                    word => TokenKind::Ident(word.to_string()),
                }
            }
            other => return Err(ParseError::new(offset, format!("unexpected character `{other}`"))),
        };
        tokens.push(Token { kind, offset });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: input.len(),
    });
    Ok(tokens)
}

pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

pub fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn single(chars: &mut Chars<'_>, kind: TokenKind) -> TokenKind {
    chars.next();
    kind
}

fn pair(chars: &mut Chars<'_>, offset: usize, second: char, kind: TokenKind) -> Result<TokenKind, ParseError> {
    chars.next();
    match chars.next() {
        Some((_, c)) if c == second => Ok(kind),
        _ => Err(ParseError::new(
            offset,
            format!("expected `{second}{second}`"),
        )),
    }
}

fn string(chars: &mut Chars<'_>, offset: usize) -> Result<String, ParseError> {
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err(ParseError::new(offset, "expected string")),
    };
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err(ParseError::new(offset, "unterminated string")),
            Some((_, c)) if c == quote => return Ok(out),
            Some((i, '\\')) => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, c @ ('\\' | '\'' | '"'))) => out.push(c),
                Some((_, c)) => return Err(ParseError::new(i, format!("unknown escape `\\{c}`"))),
                None => return Err(ParseError::new(offset, "unterminated string")),
            },
            Some((_, c)) => out.push(c),
        }
    }
}

fn number(input: &str, chars: &mut Chars<'_>, offset: usize) -> Result<Value, ParseError> {
    let mut end = offset;
    let mut seen_dot = false;
    while let Some(&(i, c)) = chars.peek() {
        if c.is_ascii_digit() {
            end = i + 1;
            chars.next();
        } else if c == '.' && !seen_dot {
            // `1.x` is not a number, leave the dot for the parser to reject.
            let mut look = chars.clone();
            look.next();
            if !matches!(look.peek(), Some(&(_, d)) if d.is_ascii_digit()) {
                break;
            }
            seen_dot = true;
            end = i + 1;
            chars.next();
        } else {
            break;
        }
    }

    let text = &input[offset..end];
    if seen_dot {
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| ParseError::new(offset, format!("invalid number `{text}`")))
    } else {
        text.parse::<u64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| ParseError::new(offset, format!("invalid number `{text}`")))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kinds(s: &str) -> Vec<TokenKind> {
        match tokenize(s) {
            Ok(t) => t.into_iter().map(|t| t.kind).collect(),
            Err(e) => panic!("tokenize failed: {e}"),
        }
    }

    #[test]
    fn ref_call_tokens() {
        assert_eq!(
            kinds("auth.id in data.ref('teams.memberships.userId')"),
            vec![
                TokenKind::Ident("auth".into()),
                TokenKind::Dot,
                TokenKind::Ident("id".into()),
                TokenKind::In,
                TokenKind::Ident("data".into()),
                TokenKind::Dot,
                TokenKind::Ident("ref".into()),
                TokenKind::LParen,
                TokenKind::Literal(json!("teams.memberships.userId")),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn operators_and_numbers() {
        assert_eq!(
            kinds("size(x) == 0 ? !a : b != 1.5 && c || false"),
            vec![
                TokenKind::Ident("size".into()),
                TokenKind::LParen,
                TokenKind::Ident("x".into()),
                TokenKind::RParen,
                TokenKind::EqEq,
                TokenKind::Literal(json!(0)),
                TokenKind::Question,
                TokenKind::Bang,
                TokenKind::Ident("a".into()),
                TokenKind::Colon,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Literal(json!(1.5)),
                TokenKind::AndAnd,
                TokenKind::Ident("c".into()),
                TokenKind::OrOr,
                TokenKind::Literal(json!(false)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn offsets_point_at_token_start() {
        let toks = tokenize("a  &&  b").unwrap_or_default();
        let offsets: Vec<usize> = toks.iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![0, 3, 7, 8]);
    }

    #[test]
    fn single_ampersand_is_an_error() {
        let err = tokenize("a & b").err();
        assert_eq!(err.map(|e| e.offset), Some(2));
    }

    #[test]
    fn unterminated_string() {
        let err = tokenize("data.ref('teams").err();
        assert_eq!(err.map(|e| e.msg), Some("unterminated string".to_string()));
    }

    #[test]
    fn escapes_in_strings() {
        assert_eq!(
            kinds(r#""it\'s \"x\"""#),
            vec![TokenKind::Literal(json!("it's \"x\"")), TokenKind::Eof]
        );
    }
}
