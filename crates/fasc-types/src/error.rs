use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identifier '{id}': {reason}")]
    InvalidIdentifier { id: String, reason: String },

    #[error("unknown payload type: {0}")]
    UnknownPayloadType(String),

    #[error("malformed property escape at line {line}: {reason}")]
    MalformedProperty { line: usize, reason: String },
}
