use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::error::{IoContext, Result, VaultError};

/// Suffix of the temporary file used by [`atomic_write`]. Never a document
/// extension, so listings and walks skip it.
pub const TEMP_SUFFIX: &str = ".vault-tmp";

/// Atomic file write: write to a temp file in the same directory, then rename.
/// A watcher or sync client never observes a truncated document.
pub async fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!("{}{}", file_name, TEMP_SUFFIX));

    let mut file = fs::File::create(&temp_path)
        .await
        .io_context("create temp file", &temp_path)?;
    file.write_all(content)
        .await
        .io_context("write temp file", &temp_path)?;
    file.sync_all()
        .await
        .io_context("sync temp file", &temp_path)?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(VaultError::io("rename temp file onto", path, e));
    }
    Ok(())
}

/// Blocking twin of [`atomic_write`] for code already on the blocking pool.
pub fn atomic_write_blocking(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!("{}{}", file_name, TEMP_SUFFIX));

    let mut file = std::fs::File::create(&temp_path).io_context("create temp file", &temp_path)?;
    file.write_all(content).io_context("write temp file", &temp_path)?;
    file.sync_all().io_context("sync temp file", &temp_path)?;
    drop(file);

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(VaultError::io("rename temp file onto", path, e));
    }
    Ok(())
}

pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Collects every document under `dir` (a single document is returned as-is),
/// skipping hidden files and hidden directories. Results are sorted.
///
/// Runs on the blocking pool; `max_open` caps the directory handles held by
/// the walk at any one time.
pub async fn collect_documents(dir: &Path, extension: &str, max_open: usize) -> Result<Vec<PathBuf>> {
    let dir = dir.to_path_buf();
    let extension = extension.to_string();
    tokio::task::spawn_blocking(move || collect_documents_blocking(&dir, &extension, max_open))
        .await
        .map_err(|e| task_failed("document walk", e))?
}

/// Error for a blocking-pool task that panicked or was cancelled.
pub(crate) fn task_failed(what: &str, e: tokio::task::JoinError) -> VaultError {
    VaultError::Io {
        context: format!("{} task failed", what),
        source: std::io::Error::other(e.to_string()),
    }
}

pub fn collect_documents_blocking(dir: &Path, extension: &str, max_open: usize) -> Result<Vec<PathBuf>> {
    collect_documents_limited(dir, extension, max_open, usize::MAX)
}

/// Like [`collect_documents_blocking`] but stops once `limit` documents were
/// found. The walk is sorted, so the same prefix comes back every time.
pub fn collect_documents_limited(dir: &Path, extension: &str, max_open: usize, limit: usize) -> Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(dir).io_context("stat", dir)?;
    if meta.is_file() {
        let name = dir.file_name().unwrap_or_default().to_string_lossy();
        return Ok(if name.ends_with(extension) {
            vec![dir.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .max_open(max_open.max(1))
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_name(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("[walk] Skipping unreadable entry under {:?}: {}", dir, e);
                continue;
            }
        };
        if entry.file_type().is_file() && entry.file_name().to_string_lossy().ends_with(extension) {
            files.push(entry.into_path());
            if files.len() >= limit {
                break;
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_skips_hidden_and_non_documents() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        std::fs::create_dir_all(root.join(".assets")).unwrap();
        std::fs::write(root.join("a.md"), "a").unwrap();
        std::fs::write(root.join("sub/b.md"), "b").unwrap();
        std::fs::write(root.join("sub/deeper/c.md"), "c").unwrap();
        std::fs::write(root.join("sub/image.png"), "png").unwrap();
        std::fs::write(root.join(".hidden.md"), "h").unwrap();
        std::fs::write(root.join(".assets/inside.md"), "i").unwrap();

        let docs = collect_documents_blocking(root, ".md", 4).unwrap();
        let names: Vec<_> = docs
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.md", "sub/b.md", "sub/deeper/c.md"]);
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("note.md");
        atomic_write(&target, b"hello").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
        assert!(!tmp.path().join(format!("note.md{}", TEMP_SUFFIX)).exists());
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_existing_content() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("note.md");
        std::fs::write(&target, "a much longer previous body").unwrap();

        atomic_write(&target, b"short").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "short");

        atomic_write_blocking(&target, b"blocking").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "blocking");
    }
}
