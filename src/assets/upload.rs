//! Storing new images in the assets directory and inlining them for export.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::fs;

use super::AssetRegistry;
use crate::diagnostics::{BestEffort, Diagnostic, Task};
use crate::error::{IoContext, Result, VaultError};

fn mime_for(extension: &str) -> Option<&'static str> {
    match extension {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

/// First free `<dir>/<name>`, falling back to `<stem>_<n>.<ext>`.
async fn resolve_collision(dir: &Path, name: &str) -> PathBuf {
    let target = dir.join(name);
    if !fs::try_exists(&target).await.unwrap_or(false) {
        return target;
    }
    let path = Path::new(name);
    let stem = path.file_stem().unwrap_or_default().to_string_lossy().to_string();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());
    let mut counter = 1;
    loop {
        let candidate = match &ext {
            Some(e) => dir.join(format!("{}_{}.{}", stem, counter, e)),
            None => dir.join(format!("{}_{}", stem, counter)),
        };
        if !fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        counter += 1;
    }
}

impl AssetRegistry {
    fn check_extension(&self, name: &str) -> Result<String> {
        let ext = extension_of(name)
            .ok_or_else(|| VaultError::Unsupported(format!("{} has no file extension", name)))?;
        if !self.config.upload.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
            return Err(VaultError::Unsupported(format!("file type .{} is not allowed", ext)));
        }
        Ok(ext)
    }

    fn check_size(&self, size: u64, limit: u64, what: &str) -> Result<()> {
        if size > limit {
            return Err(VaultError::Unsupported(format!(
                "{} is {} bytes, over the {} byte limit",
                what, size, limit
            )));
        }
        Ok(())
    }

    async fn storage_target(&self, original_name: &str) -> Result<PathBuf> {
        let dir = self.assets_path();
        fs::create_dir_all(&dir).await.io_context("create assets directory", &dir)?;
        let stored = format!(
            "{}_{}",
            chrono::Utc::now().timestamp_millis(),
            sanitize_file_name(original_name)
        );
        Ok(resolve_collision(&dir, &stored).await)
    }

    fn asset_link_path(&self, stored: &Path) -> String {
        format!(
            "{}/{}",
            self.config.assets_dir,
            stored.file_name().unwrap_or_default().to_string_lossy()
        )
    }

    /// Copies an image from anywhere on disk into the assets directory and
    /// returns its vault-relative path (`.assets/<stored>`).
    pub async fn upload_image(&self, source: &Path) -> Result<String> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| VaultError::InvalidName(source.to_string_lossy().to_string()))?;
        self.check_extension(&name)?;

        let meta = fs::metadata(source).await.io_context("stat", source)?;
        if !meta.is_file() {
            return Err(VaultError::Unsupported(format!("{:?} is not a file", source)));
        }
        self.check_size(meta.len(), self.config.upload.max_asset_bytes, &name)?;

        let target = self.storage_target(&name).await?;
        fs::copy(source, &target).await.io_context("copy image to", &target)?;
        log::info!("[assets] Uploaded {:?} as {:?}", source, target);
        Ok(self.asset_link_path(&target))
    }

    /// Stores pasted image data under the same rules as [`upload_image`](Self::upload_image).
    pub async fn store_image_bytes(&self, original_name: &str, bytes: &[u8]) -> Result<String> {
        self.check_extension(original_name)?;
        self.check_size(bytes.len() as u64, self.config.upload.max_asset_bytes, original_name)?;

        let target = self.storage_target(original_name).await?;
        crate::fs_util::atomic_write(&target, bytes).await?;
        log::info!("[assets] Stored {} bytes as {:?}", bytes.len(), target);
        Ok(self.asset_link_path(&target))
    }

    /// Reads an asset and returns it as a `data:` URI.
    ///
    /// Accepts `.assets/<file>`, `./.assets/<file>`, `/.assets/<file>` or a
    /// bare file name. Anything resolving outside the assets directory is
    /// rejected.
    pub async fn inline_image(&self, asset_path: &str) -> Result<String> {
        let trimmed = asset_path.trim_start_matches("./").trim_start_matches('/');
        let name = trimmed
            .strip_prefix(&format!("{}/", self.config.assets_dir))
            .unwrap_or(trimmed);

        let assets = self.assets_path();
        let path = self.guard.resolve(assets.join(name))?;
        if path.parent() != Some(assets.as_path()) {
            return Err(VaultError::AccessDenied(PathBuf::from(asset_path)));
        }

        let ext = self.check_extension(name)?;
        let mime = mime_for(&ext)
            .ok_or_else(|| VaultError::Unsupported(format!("no MIME type for .{}", ext)))?;

        let meta = fs::metadata(&path).await.io_context("stat", &path)?;
        self.check_size(meta.len(), self.config.upload.max_inline_bytes, name)?;

        let bytes = fs::read(&path).await.io_context("read", &path)?;
        Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
    }

    /// Replaces every asset reference in `content` with an inline data URI.
    /// References that cannot be inlined are kept and reported.
    pub async fn embed_images(&self, content: &str) -> BestEffort<String> {
        let mut outcome = BestEffort::ok(String::with_capacity(content.len()));
        let mut last = 0;

        for reference in self.find_references(content) {
            let target = &content[reference.target.clone()];
            match self.inline_image(&reference.name).await {
                Ok(uri) => {
                    outcome.value.push_str(&content[last..reference.target.start]);
                    outcome.value.push_str(&uri);
                    last = reference.target.end;
                }
                Err(e) => outcome.push(Diagnostic::new(
                    Task::AssetEmbed,
                    Some(Path::new(target)),
                    e.to_string(),
                )),
            }
        }

        outcome.value.push_str(&content[last..]);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("My Photo (1).PNG"), "My_Photo_1_.PNG");
        assert_eq!(sanitize_file_name("plain.png"), "plain.png");
        assert_eq!(sanitize_file_name("../../etc.png"), "etc.png");
        assert_eq!(sanitize_file_name("???"), "image");
    }

    #[test]
    fn test_mime_lookup() {
        assert_eq!(mime_for("svg"), Some("image/svg+xml"));
        assert_eq!(mime_for("jpeg"), Some("image/jpeg"));
        assert_eq!(mime_for("exe"), None);
    }
}
