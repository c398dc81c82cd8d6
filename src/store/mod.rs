//! Document and folder CRUD inside the vault root.
//!
//! Every public operation returns an [`OpResult`]; errors are folded into it
//! by [`OpResult::from_result`]. Asset bookkeeping that rides along with a
//! write, delete, rename or duplicate is best effort and surfaces as
//! `warnings`.

pub mod tree;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::fs;

use crate::assets::AssetRegistry;
use crate::config::VaultConfig;
use crate::diagnostics::{Diagnostic, Task};
use crate::error::{IoContext, Result, VaultError};
use crate::fs_util::{atomic_write, task_failed};
use crate::path_guard::PathGuard;
use crate::result::OpResult;

const WELCOME_NAME: &str = "Welcome.md";
const WELCOME_CONTENT: &str = "# Welcome\n\nThis is your new vault. Create a note to get started.\n";

const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Rejects empty names, `.` and `..`, path separators and reserved characters.
pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." || name.contains(FORBIDDEN_NAME_CHARS) {
        return Err(VaultError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| VaultError::InvalidName(path_string(path)))
}

pub struct FileStore {
    config: Arc<VaultConfig>,
    guard: PathGuard,
    assets: Arc<AssetRegistry>,
}

impl FileStore {
    pub fn new(config: Arc<VaultConfig>, assets: Arc<AssetRegistry>) -> Self {
        let guard = PathGuard::new(&config.root);
        Self { config, guard, assets }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Creates the root (seeding the welcome document) and the assets
    /// directory if they do not exist yet.
    pub async fn ensure_root(&self) -> Result<()> {
        let root = self.guard.root();
        if !fs::try_exists(root).await.unwrap_or(false) {
            fs::create_dir_all(root).await.io_context("create vault root", root)?;
            log::info!("[store] Created vault root {:?}", root);
            if self.config.create_welcome {
                atomic_write(&root.join(WELCOME_NAME), WELCOME_CONTENT.as_bytes()).await?;
            }
        }
        self.assets.ensure_initialized().await
    }

    fn is_document(&self, path: &Path) -> bool {
        self.config.is_document(path)
    }

    /// Resolves a path that must exist and must not be the root itself.
    async fn resolve_entry(&self, input: &str) -> Result<(PathBuf, std::fs::Metadata)> {
        let path = self.guard.resolve(input)?;
        if path == self.guard.root() {
            return Err(VaultError::AccessDenied(PathBuf::from(input)));
        }
        let meta = fs::metadata(&path).await.io_context("stat", &path)?;
        Ok((path, meta))
    }

    /// Resolves an optional directory argument, defaulting to the root.
    async fn resolve_dir(&self, dir: Option<&str>) -> Result<PathBuf> {
        let dir = match dir {
            Some(d) if !d.is_empty() => self.guard.resolve(d)?,
            _ => self.guard.root().to_path_buf(),
        };
        let meta = fs::metadata(&dir).await.io_context("stat", &dir)?;
        if !meta.is_dir() {
            return Err(VaultError::Conflict(format!("{:?} is not a directory", dir)));
        }
        Ok(dir)
    }

    pub async fn list(&self) -> OpResult {
        OpResult::from_result("list", self.try_list().await)
    }

    async fn try_list(&self) -> Result<OpResult> {
        self.ensure_root().await?;
        let root = self.guard.root().to_path_buf();
        let extension = self.config.document_extension.clone();
        let files = tokio::task::spawn_blocking(move || tree::read_tree(&root, &extension))
            .await
            .map_err(|e| task_failed("tree listing", e))??;
        Ok(OpResult::with_files(files))
    }

    pub async fn read(&self, path: &str) -> OpResult {
        OpResult::from_result("read", self.try_read(path).await)
    }

    async fn try_read(&self, path: &str) -> Result<OpResult> {
        let path = self.guard.resolve(path)?;
        let content = fs::read_to_string(&path).await.io_context("read", &path)?;
        Ok(OpResult::with_content(content))
    }

    pub async fn write(&self, path: &str, content: &str) -> OpResult {
        OpResult::from_result("write", self.try_write(path, content).await)
    }

    async fn try_write(&self, path: &str, content: &str) -> Result<OpResult> {
        let path = self.guard.resolve(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.io_context("create directory", parent)?;
        }
        atomic_write(&path, content.as_bytes()).await?;
        log::debug!("[store] Wrote {:?} ({} bytes)", path, content.len());

        let mut warnings = Vec::new();
        if self.is_document(&path) {
            if let Err(e) = self.assets.reconcile(&path, content).await {
                warnings.push(Diagnostic::new(Task::AssetReconcile, Some(&path), e.to_string()));
            }
        }
        Ok(OpResult::ok().warnings(warnings))
    }

    pub async fn create(&self, name: &str, dir: Option<&str>) -> OpResult {
        OpResult::from_result("create", self.try_create(name, dir).await)
    }

    async fn try_create(&self, name: &str, dir: Option<&str>) -> Result<OpResult> {
        validate_name(name)?;
        let extension = &self.config.document_extension;
        let file_name = if name.ends_with(extension.as_str()) {
            name.to_string()
        } else {
            format!("{}{}", name, extension)
        };
        let title = file_name.strip_suffix(extension.as_str()).unwrap_or(&file_name);

        let dir = self.resolve_dir(dir).await?;
        let path = dir.join(&file_name);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Err(VaultError::AlreadyExists(path));
        }

        atomic_write(&path, format!("# {}\n", title).as_bytes()).await?;
        log::debug!("[store] Created document {:?}", path);
        Ok(OpResult::with_content(path_string(&path)))
    }

    pub async fn create_folder(&self, name: &str, parent_dir: Option<&str>) -> OpResult {
        OpResult::from_result("create_folder", self.try_create_folder(name, parent_dir).await)
    }

    async fn try_create_folder(&self, name: &str, parent_dir: Option<&str>) -> Result<OpResult> {
        validate_name(name)?;
        let parent = match parent_dir {
            Some(d) if !d.is_empty() => self.guard.resolve(d)?,
            _ => self.guard.root().to_path_buf(),
        };
        let path = parent.join(name);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Err(VaultError::AlreadyExists(path));
        }
        fs::create_dir_all(&path).await.io_context("create folder", &path)?;
        log::debug!("[store] Created folder {:?}", path);
        Ok(OpResult::with_content(path_string(&path)))
    }

    pub async fn delete(&self, path: &str) -> OpResult {
        OpResult::from_result("delete", self.try_delete(path).await)
    }

    async fn try_delete(&self, path: &str) -> Result<OpResult> {
        let (path, meta) = self.resolve_entry(path).await?;
        let mut warnings = Vec::new();

        if meta.is_dir() {
            if let Err(e) = self.assets.cleanup_directory_images(&path).await {
                warnings.push(Diagnostic::new(Task::AssetCleanup, Some(&path), e.to_string()));
            }
            fs::remove_dir_all(&path).await.io_context("delete folder", &path)?;
        } else {
            if self.is_document(&path) {
                if let Err(e) = self.assets.cleanup_document_images(&path).await {
                    warnings.push(Diagnostic::new(Task::AssetCleanup, Some(&path), e.to_string()));
                }
            }
            fs::remove_file(&path).await.io_context("delete", &path)?;
        }

        log::debug!("[store] Deleted {:?}", path);
        Ok(OpResult::ok().warnings(warnings))
    }

    pub async fn rename(&self, old_path: &str, new_name: &str) -> OpResult {
        OpResult::from_result("rename", self.rename_entry(old_path, new_name).await.map(|m| m.into_result()))
    }

    /// Renames within the same parent. Returns the old and new paths so the
    /// caller can schedule link maintenance.
    pub async fn rename_entry(&self, old_path: &str, new_name: &str) -> Result<Moved> {
        validate_name(new_name)?;
        let (old, _) = self.resolve_entry(old_path).await?;
        let parent = old
            .parent()
            .ok_or_else(|| VaultError::AccessDenied(PathBuf::from(old_path)))?;
        let new = parent.join(new_name);
        if fs::try_exists(&new).await.unwrap_or(false) {
            return Err(VaultError::AlreadyExists(new));
        }

        fs::rename(&old, &new).await.io_context("rename", &old)?;
        log::debug!("[store] Renamed {:?} -> {:?}", old, new);
        Ok(self.finish_move(old, new).await)
    }

    pub async fn move_entry(&self, source: &str, target_dir: &str) -> OpResult {
        OpResult::from_result(
            "move_entry",
            self.move_to_dir(source, target_dir).await.map(|m| m.into_result()),
        )
    }

    /// Moves `source` into `target_dir`. Returns the old and new paths.
    pub async fn move_to_dir(&self, source: &str, target_dir: &str) -> Result<Moved> {
        let (source_path, source_meta) = self.resolve_entry(source).await?;
        let target = self.guard.resolve(target_dir)?;
        let target_meta = fs::metadata(&target).await.io_context("stat", &target)?;
        if !target_meta.is_dir() {
            return Err(VaultError::Conflict(format!("{:?} is not a directory", target)));
        }
        if source_meta.is_dir() && target.starts_with(&source_path) {
            return Err(VaultError::Conflict(format!(
                "cannot move {:?} into itself or its descendant {:?}",
                source_path, target
            )));
        }

        let dest = target.join(file_name_of(&source_path)?);
        if source_path.parent() == Some(target.as_path()) || fs::try_exists(&dest).await.unwrap_or(false) {
            return Err(VaultError::AlreadyExists(dest));
        }

        fs::rename(&source_path, &dest).await.io_context("move", &source_path)?;
        log::debug!("[store] Moved {:?} -> {:?}", source_path, dest);
        Ok(self.finish_move(source_path, dest).await)
    }

    async fn finish_move(&self, old: PathBuf, new: PathBuf) -> Moved {
        let mut warnings = Vec::new();
        if let Err(e) = self.assets.move_references(&old, &new).await {
            warnings.push(Diagnostic::new(Task::AssetReconcile, Some(&new), e.to_string()));
        }
        Moved { old, new, warnings }
    }

    pub async fn duplicate(&self, path: &str) -> OpResult {
        OpResult::from_result("duplicate", self.try_duplicate(path).await)
    }

    async fn try_duplicate(&self, path: &str) -> Result<OpResult> {
        let (source, meta) = self.resolve_entry(path).await?;
        if meta.is_dir() {
            return Err(VaultError::Unsupported("duplicating folders".to_string()));
        }

        let name = file_name_of(&source)?;
        let extension = &self.config.document_extension;
        let (base, ext) = match name.strip_suffix(extension.as_str()) {
            Some(base) => (base.to_string(), extension.clone()),
            None => {
                let p = Path::new(&name);
                let stem = p.file_stem().unwrap_or_default().to_string_lossy().to_string();
                let ext = p
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_default();
                (stem, ext)
            }
        };
        let parent = source
            .parent()
            .ok_or_else(|| VaultError::AccessDenied(PathBuf::from(path)))?;

        let mut target = parent.join(format!("{}_copy{}", base, ext));
        let mut counter = 2;
        while fs::try_exists(&target).await.unwrap_or(false) {
            target = parent.join(format!("{}_copy_{}{}", base, counter, ext));
            counter += 1;
        }

        fs::copy(&source, &target).await.io_context("copy to", &target)?;
        log::debug!("[store] Duplicated {:?} -> {:?}", source, target);

        let mut warnings = Vec::new();
        if self.is_document(&target) {
            let reconciled = match fs::read_to_string(&target).await {
                Ok(content) => self.assets.reconcile(&target, &content).await.map(|_| ()),
                Err(e) => Err(VaultError::io("read", &target, e)),
            };
            if let Err(e) = reconciled {
                warnings.push(Diagnostic::new(Task::AssetReconcile, Some(&target), e.to_string()));
            }
        }
        Ok(OpResult::with_content(path_string(&target)).warnings(warnings))
    }

    pub async fn stat(&self, path: &str) -> OpResult {
        OpResult::from_result("stat", self.try_stat(path).await)
    }

    async fn try_stat(&self, path: &str) -> Result<OpResult> {
        let path = self.guard.resolve(path)?;
        let meta = fs::metadata(&path).await.io_context("stat", &path)?;
        let modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::from)
            .io_context("read modification time of", &path)?;
        let created: DateTime<Utc> = meta.created().map(DateTime::from).unwrap_or(modified);

        let info = serde_json::json!({
            "created": created.to_rfc3339(),
            "modified": modified.to_rfc3339(),
            "size": meta.len(),
            "isDirectory": meta.is_dir(),
        });
        Ok(OpResult::with_content(info.to_string()))
    }

    /// Plain existence probe. Relative paths are taken from the root; the
    /// path is not checked against the vault boundary.
    pub async fn file_exists(&self, path: &str) -> bool {
        let path = Path::new(path);
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.guard.root().join(path)
        };
        fs::try_exists(full).await.unwrap_or(false)
    }
}

/// Outcome of a rename or move: where the entry was and where it is now.
#[derive(Debug)]
pub struct Moved {
    pub old: PathBuf,
    pub new: PathBuf,
    pub warnings: Vec<Diagnostic>,
}

impl Moved {
    pub fn into_result(self) -> OpResult {
        OpResult::with_content(path_string(&self.new)).warnings(self.warnings)
    }
}
