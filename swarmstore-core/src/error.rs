use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the storage mapper. Every public operation returns
/// one of these instead of panicking, so the caller can decide per swarm
/// whether to abandon it or re-request data.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Caller contract violation: bad offset for the current layout, offset
    /// outside every slice, malformed manifest header.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A file the store needed is missing or its handle could not be opened.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Underlying open/read/write/resize/mkdir failure, with the OS error kept.
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Manifest parse failure or rejected entry path. Fatal for the store.
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),
}

impl StorageError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io { op, path: path.into(), source }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StorageError::InvalidArgument(msg.into())
    }

    pub(crate) fn manifest(msg: impl Into<String>) -> Self {
        StorageError::ManifestInvalid(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
