use serde::Serialize;

use crate::diagnostics::Diagnostic;
use crate::error::{ErrorKind, Result, VaultError};
use crate::store::tree::FileEntry;

/// Uniform result of every file store and asset registry entry point.
///
/// Callers check `success`; nothing is thrown across this boundary.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Best-effort side tasks that failed without failing the operation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Diagnostic>,
}

impl OpResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_files(files: Vec<FileEntry>) -> Self {
        Self {
            success: true,
            files: Some(files),
            ..Default::default()
        }
    }

    pub fn failure(err: &VaultError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Default::default()
        }
    }

    pub fn warnings(mut self, warnings: Vec<Diagnostic>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Folds an internal result into the boundary shape, logging failures.
    pub fn from_result(op: &str, result: Result<OpResult>) -> Self {
        match result {
            Ok(r) => r,
            Err(e) => {
                log::warn!("[{}] {}", op, e);
                OpResult::failure(&e)
            }
        }
    }
}
