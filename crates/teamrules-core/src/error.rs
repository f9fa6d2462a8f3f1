//! Shared error types across teamrules crates.

use std::fmt;

use thiserror::Error;

/// Caller-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed request.
    BadRequest,
    /// Policy, schema or config failed to load.
    Config,
    /// Record does not exist.
    NotFound,
    /// Not allowed by policy.
    NotAllowed,
    /// Unsupported config version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ClientCode {
    /// String representation used in logs and JSON output.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::Config => "CONFIG",
            ClientCode::NotFound => "NOT_FOUND",
            ClientCode::NotAllowed => "NOT_ALLOWED",
            ClientCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, PermError>;

/// Unified error type used by core and engine.
#[derive(Debug, Error)]
pub enum PermError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{}", ConfigErrors(.0))]
    Config(Vec<ConfigError>),
    #[error("not found: {0}")]
    NotFound(String),
    /// Deliberately carries nothing about which predicate failed.
    #[error("not permitted")]
    NotAllowed,
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl PermError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            PermError::BadRequest(_) => ClientCode::BadRequest,
            PermError::Config(_) => ClientCode::Config,
            PermError::NotFound(_) => ClientCode::NotFound,
            PermError::NotAllowed => ClientCode::NotAllowed,
            PermError::UnsupportedVersion => ClientCode::UnsupportedVersion,
            PermError::Internal(_) => ClientCode::Internal,
        }
    }
}

impl From<ConfigError> for PermError {
    fn from(e: ConfigError) -> Self {
        PermError::Config(vec![e])
    }
}

struct ConfigErrors<'a>(&'a [ConfigError]);

impl fmt::Display for ConfigErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            [] => write!(f, "invalid configuration"),
            [one] => write!(f, "invalid configuration: {one}"),
            many => {
                write!(f, "invalid configuration ({} errors):", many.len())?;
                for e in many {
                    write!(f, "\n  - {e}")?;
                }
                Ok(())
            }
        }
    }
}

/// Expression syntax error with the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at offset {offset}: {msg}")]
pub struct ParseError {
    pub offset: usize,
    pub msg: String,
}

impl ParseError {
    pub fn new(offset: usize, msg: impl Into<String>) -> Self {
        Self {
            offset,
            msg: msg.into(),
        }
    }
}

/// Load-time problem with one entity type's policy or with the schema.
///
/// Any of these keeps the affected entity type from serving requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{entity}: bind list must hold alias/expression pairs (got {len} items)")]
    OddBindList { entity: String, len: usize },
    #[error("{entity}: invalid binding alias `{alias}`")]
    InvalidAlias { entity: String, alias: String },
    #[error("{entity}: binding `{alias}` declared twice")]
    DuplicateBinding { entity: String, alias: String },
    #[error("{entity}: cannot parse `{expr}` {source}")]
    Syntax {
        entity: String,
        expr: String,
        source: ParseError,
    },
    #[error("{entity}: `{name}` is not a binding declared before this point")]
    UndefinedBinding { entity: String, name: String },
    #[error("{entity}: path `{path}` uses `{segment}`, which is not a relationship of `{on}`")]
    UndeclaredRelationship {
        entity: String,
        path: String,
        segment: String,
        on: String,
    },
    #[error("{entity}: `{attr}` is not an attribute of `{on}`")]
    UnknownAttribute {
        entity: String,
        attr: String,
        on: String,
    },
    #[error("{entity}: {msg}")]
    InvalidExpression { entity: String, msg: String },
    #[error("policy declares unknown entity type `{entity}`")]
    UnknownEntity { entity: String },
    #[error("schema: {0}")]
    Schema(String),
}

impl ConfigError {
    /// Entity type the error belongs to, if any.
    pub fn entity(&self) -> Option<&str> {
        match self {
            ConfigError::OddBindList { entity, .. }
            | ConfigError::InvalidAlias { entity, .. }
            | ConfigError::DuplicateBinding { entity, .. }
            | ConfigError::Syntax { entity, .. }
            | ConfigError::UndefinedBinding { entity, .. }
            | ConfigError::UndeclaredRelationship { entity, .. }
            | ConfigError::UnknownAttribute { entity, .. }
            | ConfigError::InvalidExpression { entity, .. }
            | ConfigError::UnknownEntity { entity } => Some(entity),
            ConfigError::Schema(_) => None,
        }
    }
}

/// Request-time failure resolving a relationship path.
///
/// Never surfaced to callers: the evaluator turns it into `Decision::Deny`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraversalError {
    #[error("broken reference: {entity}/{id}")]
    BrokenReference { entity: String, id: String },
    #[error("unknown relationship `{label}` on `{entity}`")]
    UnknownRelationship { entity: String, label: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_render_as_list() {
        let err = PermError::Config(vec![
            ConfigError::UnknownEntity {
                entity: "notes".into(),
            },
            ConfigError::OddBindList {
                entity: "todos".into(),
                len: 3,
            },
        ]);
        let s = err.to_string();
        assert!(s.starts_with("invalid configuration (2 errors):"));
        assert!(s.contains("unknown entity type `notes`"));
        assert_eq!(err.client_code().as_str(), "CONFIG");
    }

    #[test]
    fn not_allowed_leaks_nothing() {
        assert_eq!(PermError::NotAllowed.to_string(), "not permitted");
    }
}
