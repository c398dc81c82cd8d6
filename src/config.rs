use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, Result};

/// Maximum number of documents a single search scans.
pub const MAX_SEARCH_FILES: usize = 1000;
/// Maximum number of matches a single search reports across all files.
pub const MAX_SEARCH_MATCHES: usize = 500;
/// Maximum number of characters of a matched line returned to the caller.
pub const MAX_LINE_LENGTH: usize = 200;

/// Maximum size of an image copied into the assets directory (10 MiB).
pub const MAX_ASSET_BYTES: u64 = 10 * 1024 * 1024;
/// Maximum size of an image inlined as base64 (5 MiB).
pub const MAX_INLINE_BYTES: u64 = 5 * 1024 * 1024;

/// Open directory handles a tree walk may hold at once.
pub const WALK_MAX_OPEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchLimits {
    pub max_files: usize,
    pub max_matches: usize,
    pub max_line_length: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_files: MAX_SEARCH_FILES,
            max_matches: MAX_SEARCH_MATCHES,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadLimits {
    pub max_asset_bytes: u64,
    pub max_inline_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_asset_bytes: MAX_ASSET_BYTES,
            max_inline_bytes: MAX_INLINE_BYTES,
            allowed_extensions: ["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Vault configuration. Every field has a default, so a config file only
/// needs to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VaultConfig {
    pub root: PathBuf,
    /// Document extension including the leading dot.
    pub document_extension: String,
    pub assets_dir: String,
    pub metadata_file: String,
    pub search: SearchLimits,
    pub upload: UploadLimits,
    pub walk_max_open: usize,
    /// Seed `Welcome.md` when the root is created by `list()`.
    pub create_welcome: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            document_extension: ".md".to_string(),
            assets_dir: ".assets".to_string(),
            metadata_file: ".metadata.json".to_string(),
            search: SearchLimits::default(),
            upload: UploadLimits::default(),
            walk_max_open: WALK_MAX_OPEN,
            create_welcome: true,
        }
    }
}

impl VaultConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Loads a JSON config file. Missing fields fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).io_context("read config", path)?;
        let config: VaultConfig = serde_json::from_str(&raw)?;
        log::debug!("[config] Loaded vault config from {:?}", path);
        Ok(config)
    }

    /// Whether `path` names a document by extension.
    pub fn is_document(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| n.to_string_lossy().ends_with(&self.document_extension))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: VaultConfig =
            serde_json::from_str(r#"{ "root": "/vault", "search": { "maxMatches": 10 } }"#).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/vault"));
        assert_eq!(cfg.search.max_matches, 10);
        assert_eq!(cfg.search.max_files, MAX_SEARCH_FILES);
        assert_eq!(cfg.document_extension, ".md");
        assert_eq!(cfg.assets_dir, ".assets");
        assert_eq!(cfg.metadata_file, ".metadata.json");
    }

    #[test]
    fn test_is_document() {
        let cfg = VaultConfig::new("/vault");
        assert!(cfg.is_document(Path::new("/vault/a.md")));
        assert!(!cfg.is_document(Path::new("/vault/a.png")));
        assert!(!cfg.is_document(Path::new("/vault/a.md.vault-tmp")));
    }
}
