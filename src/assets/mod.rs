//! Reference-counted registry of binary assets stored in `<root>/.assets/`.
//!
//! The registry is a single JSON file mapping each asset file name to the
//! documents that cite it. It is loaded from disk before every
//! read-modify-write and saved whole afterwards; `write_lock` makes those
//! cycles run one at a time.
//!
//! Emptying a reference list never deletes anything. Files are reclaimed only
//! by [`AssetRegistry::cleanup_unreferenced_files`] (quick GC) or
//! [`AssetRegistry::validate_and_cleanup`] (full rebuild from a scan).

pub mod upload;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::config::VaultConfig;
use crate::diagnostics::{BestEffort, Diagnostic, Task};
use crate::error::{IoContext, Result, VaultError};
use crate::fs_util::{self, atomic_write, TEMP_SUFFIX};
use crate::path_guard::PathGuard;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    /// Root-relative paths of the documents citing this asset, in the order
    /// they started citing it.
    pub references: IndexSet<String>,
    pub uploaded_at: DateTime<Utc>,
    pub size: u64,
}

pub type AssetMetadata = BTreeMap<String, AssetRecord>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Asset files deleted because no document references them.
    pub cleaned: usize,
    /// Assets confirmed referenced and kept.
    pub validated: usize,
}

/// A located asset reference inside document text.
pub(crate) struct AssetRef {
    pub name: String,
    /// Byte range of the link target (the part inside the parentheses).
    pub target: std::ops::Range<usize>,
}

pub struct AssetRegistry {
    config: Arc<VaultConfig>,
    guard: PathGuard,
    reference_re: Regex,
    write_lock: Mutex<()>,
}

impl AssetRegistry {
    pub fn new(config: Arc<VaultConfig>) -> Result<Self> {
        let guard = PathGuard::new(&config.root);
        let pattern = format!(
            r"!\[[^\]]*\]\(\s*(?P<target>(?:\./|/)?{}/(?P<name>[^)\s/\\]+))[^)]*\)",
            regex::escape(&config.assets_dir)
        );
        let reference_re = Regex::new(&pattern)
            .map_err(|e| VaultError::Unsupported(format!("assets directory {:?}: {}", config.assets_dir, e)))?;
        Ok(Self {
            config,
            guard,
            reference_re,
            write_lock: Mutex::new(()),
        })
    }

    pub fn assets_path(&self) -> PathBuf {
        self.guard.root().join(&self.config.assets_dir)
    }

    fn metadata_path(&self) -> PathBuf {
        self.assets_path().join(&self.config.metadata_file)
    }

    fn doc_key(&self, doc_path: &Path) -> String {
        self.guard.relative(doc_path)
    }

    /// Creates the assets directory and an empty metadata file if missing.
    pub async fn ensure_initialized(&self) -> Result<()> {
        let dir = self.assets_path();
        fs::create_dir_all(&dir).await.io_context("create assets directory", &dir)?;
        let meta = self.metadata_path();
        if !fs::try_exists(&meta).await.unwrap_or(false) {
            atomic_write(&meta, b"{}").await?;
            log::info!("[assets] Created asset metadata at {:?}", meta);
        }
        Ok(())
    }

    pub async fn load_metadata(&self) -> Result<AssetMetadata> {
        let path = self.metadata_path();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AssetMetadata::new()),
            Err(e) => return Err(VaultError::io("read", &path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(AssetMetadata::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    async fn save_metadata(&self, meta: &AssetMetadata) -> Result<()> {
        let dir = self.assets_path();
        fs::create_dir_all(&dir).await.io_context("create assets directory", &dir)?;
        let json = serde_json::to_string_pretty(meta)?;
        atomic_write(&self.metadata_path(), json.as_bytes()).await
    }

    /// Finds every asset reference in `content`.
    pub(crate) fn find_references(&self, content: &str) -> Vec<AssetRef> {
        self.reference_re
            .captures_iter(content)
            .filter_map(|cap| {
                let target = cap.name("target")?;
                let raw_name = cap.name("name")?.as_str();
                let name = urlencoding::decode(raw_name).ok()?.into_owned();
                if name.is_empty() || name == ".." || name.contains('/') || name.contains('\\') {
                    return None;
                }
                Some(AssetRef {
                    name,
                    target: target.range(),
                })
            })
            .collect()
    }

    /// Asset file names referenced by `content`.
    pub fn referenced_assets(&self, content: &str) -> BTreeSet<String> {
        self.find_references(content).into_iter().map(|r| r.name).collect()
    }

    /// Builds a fresh record for an asset file already on disk, or `None`
    /// when the file does not exist.
    async fn new_record(&self, name: &str) -> Option<AssetRecord> {
        let meta = fs::metadata(self.assets_path().join(name)).await.ok()?;
        if !meta.is_file() {
            return None;
        }
        let uploaded_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Some(AssetRecord {
            references: IndexSet::new(),
            uploaded_at,
            size: meta.len(),
        })
    }

    /// Brings the recorded references of `doc_path` in line with `content`.
    pub async fn reconcile(&self, doc_path: &Path, content: &str) -> Result<ReconcileReport> {
        let _lock = self.write_lock.lock().await;
        let mut meta = self.load_metadata().await?;
        let key = self.doc_key(doc_path);
        let referenced = self.referenced_assets(content);

        let mut report = ReconcileReport::default();

        for (name, record) in meta.iter_mut() {
            if !referenced.contains(name) && record.references.shift_remove(&key) {
                report.removed.push(name.clone());
            }
        }

        for name in &referenced {
            match meta.get_mut(name) {
                Some(record) => {
                    if record.references.insert(key.clone()) {
                        report.added.push(name.clone());
                    }
                }
                None => match self.new_record(name).await {
                    Some(mut record) => {
                        record.references.insert(key.clone());
                        meta.insert(name.clone(), record);
                        report.added.push(name.clone());
                    }
                    None => log::debug!("[assets] {} references missing asset {}", key, name),
                },
            }
        }

        if !report.added.is_empty() || !report.removed.is_empty() {
            self.save_metadata(&meta).await?;
            log::debug!(
                "[assets] Reconciled {}: +{} -{}",
                key,
                report.added.len(),
                report.removed.len()
            );
        }
        Ok(report)
    }

    /// Adds `doc_path` to the reference list of `asset`. Returns `false` when
    /// it was already there.
    pub async fn add_reference(&self, asset: &str, doc_path: &Path) -> Result<bool> {
        let _lock = self.write_lock.lock().await;
        let mut meta = self.load_metadata().await?;
        let key = self.doc_key(doc_path);

        let inserted = match meta.get_mut(asset) {
            Some(record) => record.references.insert(key),
            None => {
                let mut record = self
                    .new_record(asset)
                    .await
                    .ok_or_else(|| VaultError::NotFound(self.assets_path().join(asset)))?;
                record.references.insert(key);
                meta.insert(asset.to_string(), record);
                true
            }
        };
        if inserted {
            self.save_metadata(&meta).await?;
        }
        Ok(inserted)
    }

    /// Removes `doc_path` from the reference list of `asset`. The asset file
    /// stays on disk even when the list becomes empty.
    pub async fn remove_reference(&self, asset: &str, doc_path: &Path) -> Result<bool> {
        let _lock = self.write_lock.lock().await;
        let mut meta = self.load_metadata().await?;
        let key = self.doc_key(doc_path);

        let removed = meta
            .get_mut(asset)
            .map(|record| record.references.shift_remove(&key))
            .unwrap_or(false);
        if removed {
            self.save_metadata(&meta).await?;
        }
        Ok(removed)
    }

    pub async fn references_of(&self, asset: &str) -> Result<Vec<String>> {
        let meta = self.load_metadata().await?;
        Ok(meta
            .get(asset)
            .map(|r| r.references.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Strips a deleted document from every reference list. Returns how many
    /// assets lost a reference.
    pub async fn cleanup_document_images(&self, doc_path: &Path) -> Result<usize> {
        let key = self.doc_key(doc_path);
        self.strip_references(|doc| doc == key).await
    }

    /// Strips every document below a deleted directory from every reference
    /// list.
    pub async fn cleanup_directory_images(&self, dir_path: &Path) -> Result<usize> {
        let key = self.doc_key(dir_path);
        if key.is_empty() {
            return self.strip_references(|_| true).await;
        }
        let prefix = format!("{}/", key);
        self.strip_references(|doc| doc.starts_with(&prefix)).await
    }

    /// Re-keys references after a document or directory moved from
    /// `old_path` to `new_path`.
    pub async fn move_references(&self, old_path: &Path, new_path: &Path) -> Result<usize> {
        let old_key = self.doc_key(old_path);
        let new_key = self.doc_key(new_path);
        let prefix = format!("{}/", old_key);

        let _lock = self.write_lock.lock().await;
        let mut meta = self.load_metadata().await?;
        let mut touched = 0;
        for record in meta.values_mut() {
            if !record.references.iter().any(|doc| *doc == old_key || doc.starts_with(&prefix)) {
                continue;
            }
            record.references = record
                .references
                .iter()
                .map(|doc| match doc.strip_prefix(&prefix) {
                    Some(rest) => format!("{}/{}", new_key, rest),
                    None if *doc == old_key => new_key.clone(),
                    None => doc.clone(),
                })
                .collect();
            touched += 1;
        }
        if touched > 0 {
            self.save_metadata(&meta).await?;
        }
        Ok(touched)
    }

    async fn strip_references<F>(&self, matches: F) -> Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        let _lock = self.write_lock.lock().await;
        let mut meta = self.load_metadata().await?;
        let mut touched = 0;
        for record in meta.values_mut() {
            let before = record.references.len();
            record.references.retain(|doc| !matches(doc));
            if record.references.len() != before {
                touched += 1;
            }
        }
        if touched > 0 {
            self.save_metadata(&meta).await?;
        }
        Ok(touched)
    }

    /// Quick GC: deletes every asset whose reference list is already empty.
    pub async fn cleanup_unreferenced_files(&self) -> Result<BestEffort<usize>> {
        let _lock = self.write_lock.lock().await;
        let mut meta = self.load_metadata().await?;
        let mut outcome = BestEffort::ok(0);

        let orphans: Vec<String> = meta
            .iter()
            .filter(|(_, record)| record.references.is_empty())
            .map(|(name, _)| name.clone())
            .collect();

        for name in orphans {
            let path = self.assets_path().join(&name);
            match fs::remove_file(&path).await {
                Ok(()) => outcome.value += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    outcome.push(Diagnostic::new(Task::AssetCleanup, Some(&path), e.to_string()));
                    continue;
                }
            }
            meta.remove(&name);
        }

        self.save_metadata(&meta).await?;
        log::info!("[assets] Quick cleanup removed {} unreferenced assets", outcome.value);
        Ok(outcome)
    }

    /// Full GC: rebuilds the registry from a scan of every document and
    /// deletes asset files nothing references.
    pub async fn validate_and_cleanup(&self) -> Result<BestEffort<ValidationReport>> {
        let _lock = self.write_lock.lock().await;
        let mut diagnostics = Vec::new();

        let previous = match self.load_metadata().await {
            Ok(meta) => meta,
            Err(e) => {
                diagnostics.push(Diagnostic::new(
                    Task::AssetCleanup,
                    Some(&self.metadata_path()),
                    format!("discarding unreadable metadata: {}", e),
                ));
                AssetMetadata::new()
            }
        };

        let documents = fs_util::collect_documents(
            self.guard.root(),
            &self.config.document_extension,
            self.config.walk_max_open,
        )
        .await?;

        let mut rebuilt = AssetMetadata::new();
        for doc in &documents {
            let content = match fs::read_to_string(doc).await {
                Ok(c) => c,
                Err(e) => {
                    diagnostics.push(Diagnostic::new(Task::AssetCleanup, Some(doc), e.to_string()));
                    continue;
                }
            };
            let key = self.doc_key(doc);
            for name in self.referenced_assets(&content) {
                if !rebuilt.contains_key(&name) {
                    let Some(mut record) = self.new_record(&name).await else {
                        continue;
                    };
                    if let Some(old) = previous.get(&name) {
                        record.uploaded_at = old.uploaded_at;
                    }
                    rebuilt.insert(name.clone(), record);
                }
                if let Some(record) = rebuilt.get_mut(&name) {
                    record.references.insert(key.clone());
                }
            }
        }

        let mut report = ValidationReport {
            cleaned: 0,
            validated: rebuilt.len(),
        };

        let dir = self.assets_path();
        if let Ok(mut entries) = fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                if name == self.config.metadata_file || name.ends_with(TEMP_SUFFIX) {
                    continue;
                }
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if !is_file || rebuilt.contains_key(&name) {
                    continue;
                }
                let path = entry.path();
                match fs::remove_file(&path).await {
                    Ok(()) => report.cleaned += 1,
                    Err(e) => diagnostics.push(Diagnostic::new(Task::AssetCleanup, Some(&path), e.to_string())),
                }
            }
        }

        self.save_metadata(&rebuilt).await?;
        log::info!(
            "[assets] Full cleanup: {} validated, {} cleaned",
            report.validated,
            report.cleaned
        );
        Ok(BestEffort::with_diagnostics(report, diagnostics))
    }
}
