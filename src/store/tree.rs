use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{IoContext, Result};
use crate::fs_util::is_hidden_name;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileEntry>>,
}

/// Directories first, then case-sensitive by name.
pub fn entry_order(a: &FileEntry, b: &FileEntry) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.cmp(&b.name))
}

/// Builds the visible tree below `path`: directories and documents only,
/// hidden entries skipped. Unreadable subdirectories show up empty.
pub fn read_tree(path: &Path, extension: &str) -> Result<Vec<FileEntry>> {
    let mut entries: Vec<FileEntry> = Vec::new();

    for entry in fs::read_dir(path).io_context("read directory", path)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("[tree] Skipping unreadable entry in {:?}: {}", path, e);
                continue;
            }
        };
        let entry_path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if is_hidden_name(&name) {
            continue;
        }

        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir && !name.ends_with(extension) {
            continue;
        }

        let children = if is_dir {
            Some(read_tree(&entry_path, extension).unwrap_or_else(|e| {
                log::warn!("[tree] Failed to read {:?}: {}", entry_path, e);
                Vec::new()
            }))
        } else {
            None
        };

        entries.push(FileEntry {
            name,
            is_directory: is_dir,
            path: entry_path.to_string_lossy().to_string(),
            children,
        });
    }

    entries.sort_by(entry_order);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tree_order_and_visibility() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("beta")).unwrap();
        fs::create_dir_all(root.join("Alpha")).unwrap();
        fs::create_dir_all(root.join(".assets")).unwrap();
        fs::write(root.join("b.md"), "").unwrap();
        fs::write(root.join("A.md"), "").unwrap();
        fs::write(root.join("a.md"), "").unwrap();
        fs::write(root.join("photo.png"), "").unwrap();
        fs::write(root.join(".secret.md"), "").unwrap();
        fs::write(root.join("beta/inner.md"), "").unwrap();

        let tree = read_tree(root, ".md").unwrap();
        let names: Vec<_> = tree.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "beta", "A.md", "a.md", "b.md"]);

        assert_eq!(tree[0].children.as_ref().unwrap().len(), 0);
        let beta = tree[1].children.as_ref().unwrap();
        assert_eq!(beta[0].name, "inner.md");
        assert!(tree[2].children.is_none());
    }
}
