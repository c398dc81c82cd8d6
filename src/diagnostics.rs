//! Non-fatal outcomes of best-effort sub-tasks.
//!
//! Asset reconciliation, link rewriting and cleanup passes run as side effects
//! of primary file operations. Their failures must never fail the primary
//! operation, so they are collected here, logged, and attached to the result
//! as warnings instead of being returned as errors.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Which best-effort sub-task produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    AssetReconcile,
    AssetCleanup,
    AssetEmbed,
    LinkRewrite,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::AssetReconcile => "asset-reconcile",
            Task::AssetCleanup => "asset-cleanup",
            Task::AssetEmbed => "asset-embed",
            Task::LinkRewrite => "link-rewrite",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub message: String,
}

impl Diagnostic {
    /// Builds a diagnostic and logs it at `warn`.
    pub fn new(task: Task, path: Option<&Path>, message: impl Into<String>) -> Self {
        let message = message.into();
        match path {
            Some(p) => log::warn!("[{}] {}: {}", task, p.display(), message),
            None => log::warn!("[{}] {}", task, message),
        }
        Self {
            task,
            path: path.map(Path::to_path_buf),
            message,
        }
    }
}

/// A value produced by a best-effort pass together with whatever went wrong
/// along the way.
#[derive(Debug, Clone, Default)]
pub struct BestEffort<T> {
    pub value: T,
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> BestEffort<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(value: T, diagnostics: Vec<Diagnostic>) -> Self {
        Self { value, diagnostics }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}
