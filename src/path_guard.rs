//! Vault sandbox boundary.
//!
//! Every caller-supplied path is resolved lexically against the vault root and
//! must land on the root itself or below it. The containment test is
//! component-wise (`Path::starts_with`), so a sibling such as `/data/VaultEvil`
//! is never mistaken for a child of `/data/Vault`.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, VaultError};

/// Lexically normalizes a path: drops `.` and folds `..` into its parent.
/// `..` never climbs above the filesystem root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => true,
                    _ => false,
                };
                if !popped {
                    out.push("..");
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Joins path components with `/` regardless of platform.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(n) => Some(n.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(root))
                .unwrap_or_else(|_| root.to_path_buf())
        };
        Self {
            root: normalize(&absolute),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `input` (relative to the root, or absolute) and checks that it
    /// stays inside the vault.
    pub fn resolve(&self, input: impl AsRef<Path>) -> Result<PathBuf> {
        let input = input.as_ref();
        let joined = if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.root.join(input)
        };
        let resolved = normalize(&joined);
        if self.contains(&resolved) {
            Ok(resolved)
        } else {
            log::warn!("[path_guard] Rejected path outside vault: {:?}", input);
            Err(VaultError::AccessDenied(input.to_path_buf()))
        }
    }

    /// `true` when an already-normalized path is the root or a descendant.
    pub fn contains(&self, resolved: &Path) -> bool {
        resolved.starts_with(&self.root)
    }

    /// Root-relative path with `/` separators (empty for the root itself).
    pub fn relative(&self, resolved: &Path) -> String {
        match resolved.strip_prefix(&self.root) {
            Ok(rel) => to_slash(rel),
            Err(_) => to_slash(resolved),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> PathGuard {
        PathGuard::new("/data/Vault")
    }

    #[test]
    fn test_relative_inside_root() {
        let g = guard();
        assert_eq!(g.resolve("notes/a.md").unwrap(), PathBuf::from("/data/Vault/notes/a.md"));
        assert_eq!(g.resolve("").unwrap(), PathBuf::from("/data/Vault"));
        assert_eq!(g.resolve(".").unwrap(), PathBuf::from("/data/Vault"));
    }

    #[test]
    fn test_traversal_that_stays_inside() {
        let g = guard();
        assert_eq!(
            g.resolve("notes/../other/./b.md").unwrap(),
            PathBuf::from("/data/Vault/other/b.md")
        );
    }

    #[test]
    fn test_traversal_escape_rejected() {
        let g = guard();
        assert!(matches!(g.resolve("../secret.md"), Err(VaultError::AccessDenied(_))));
        assert!(matches!(g.resolve("a/../../x"), Err(VaultError::AccessDenied(_))));
        assert!(g.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn test_sibling_prefix_collision_rejected() {
        let g = guard();
        assert!(g.resolve("/data/VaultEvil/x.md").is_err());
        assert!(g.resolve("../VaultEvil/x.md").is_err());
        assert!(g.resolve("/data/Vault2").is_err());
    }

    #[test]
    fn test_absolute_inside_accepted() {
        let g = guard();
        assert_eq!(
            g.resolve("/data/Vault/sub/../a.md").unwrap(),
            PathBuf::from("/data/Vault/a.md")
        );
    }

    #[test]
    fn test_normalize_never_climbs_above_root() {
        assert_eq!(normalize(Path::new("/../../a")), PathBuf::from("/a"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_relative_uses_forward_slashes() {
        let g = guard();
        let p = g.resolve("x/y/z.md").unwrap();
        assert_eq!(g.relative(&p), "x/y/z.md");
        assert_eq!(g.relative(g.root()), "");
    }
}
