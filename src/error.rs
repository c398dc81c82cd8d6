use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Error type for every fallible vault operation.
///
/// Public entry points never hand this out directly; it is folded into an
/// [`OpResult`](crate::OpResult) or [`SearchResponse`](crate::search::SearchResponse)
/// with `success: false`.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Access denied: {0} is outside the vault")]
    AccessDenied(PathBuf),

    #[error("Not found: {0}")]
    NotFound(PathBuf),

    #[error("Already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-internal result alias.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Serializable error category attached to failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    AccessDenied,
    NotFound,
    AlreadyExists,
    Conflict,
    InvalidName,
    Unsupported,
    Io,
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::AccessDenied(_) => ErrorKind::AccessDenied,
            VaultError::NotFound(_) => ErrorKind::NotFound,
            VaultError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VaultError::Conflict(_) => ErrorKind::Conflict,
            VaultError::InvalidName(_) => ErrorKind::InvalidName,
            VaultError::Unsupported(_) => ErrorKind::Unsupported,
            VaultError::Io { .. } | VaultError::Json(_) => ErrorKind::Io,
        }
    }

    /// Wraps an I/O failure with the operation and path it happened on.
    /// `NotFound` I/O errors are promoted to [`VaultError::NotFound`].
    pub fn io(action: &str, path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return VaultError::NotFound(path.to_path_buf());
        }
        VaultError::Io {
            context: format!("Failed to {} {:?}", action, path),
            source,
        }
    }
}

/// Extension for attaching the `VaultError::io` context in one call.
pub(crate) trait IoContext<T> {
    fn io_context(self, action: &str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, action: &str, path: &Path) -> Result<T> {
        self.map_err(|e| VaultError::io(action, path, e))
    }
}
