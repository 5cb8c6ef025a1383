use std::io;
use std::path::PathBuf;

use fasc_types::TypeError;

/// Coarse classification of a [`StorageError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidIdentifier,
    Io,
    CorruptMetadata,
    Config,
}

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No object with this oid exists.
    #[error("object '{oid}' does not exist in storage")]
    ObjectNotFound { oid: String },

    /// The object has no payload with this pid.
    #[error("payload '{pid}' does not exist in object '{oid}'")]
    PayloadNotFound { oid: String, pid: String },

    /// A linked payload points at a file that is gone.
    #[error("linked file for payload '{pid}' not found: {target}")]
    LinkTargetNotFound { pid: String, target: PathBuf },

    /// A payload has no content to read.
    #[error("payload '{pid}' has no content")]
    NoContent { pid: String },

    /// The oid already has on-disk presence.
    #[error("object '{oid}' already exists in storage")]
    ObjectExists { oid: String },

    /// The pid is already attached to the object.
    #[error("payload '{pid}' already exists in object '{oid}'")]
    PayloadExists { oid: String, pid: String },

    /// The identifier cannot be mapped onto storage.
    #[error("invalid identifier '{id}': {reason}")]
    InvalidIdentifier { id: String, reason: String },

    /// Underlying file-system failure.
    #[error("I/O error during {op} on {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A metadata file is missing, unreadable, or lacks required keys.
    #[error("corrupt metadata at {}: {reason}", path.display())]
    CorruptMetadata { path: PathBuf, reason: String },

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ObjectNotFound { .. }
            | Self::PayloadNotFound { .. }
            | Self::LinkTargetNotFound { .. }
            | Self::NoContent { .. } => ErrorKind::NotFound,
            Self::ObjectExists { .. } | Self::PayloadExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            Self::Io { .. } => ErrorKind::Io,
            Self::CorruptMetadata { .. } => ErrorKind::CorruptMetadata,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// Adapter for `map_err` on I/O results.
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { op, path, source }
    }
}

impl From<TypeError> for StorageError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidIdentifier { id, reason } => Self::InvalidIdentifier { id, reason },
            other => Self::CorruptMetadata {
                path: PathBuf::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
