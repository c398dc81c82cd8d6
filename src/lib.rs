//! Storage backend for a local-first markdown vault.
//!
//! All paths are confined to one root directory. On top of that sandbox the
//! crate provides document CRUD, relative-link maintenance after moves,
//! reference-counted image assets and bounded content/tag search.

pub mod assets;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod frontmatter;
pub mod fs_util;
pub mod links;
pub mod path_guard;
pub mod result;
pub mod search;
pub mod store;
pub mod vault;
pub mod watcher;


#[cfg(test)]
mod link_rename_test;



pub use assets::{AssetRecord, AssetRegistry, ReconcileReport, ValidationReport};
pub use config::{SearchLimits, UploadLimits, VaultConfig};
pub use diagnostics::{BestEffort, Diagnostic, Task};
pub use error::{ErrorKind, VaultError};
pub use links::{LinkMaintainer, LinkUpdateReport};
pub use path_guard::PathGuard;
pub use result::OpResult;
pub use search::{FileSearchResult, LineMatch, SearchEngine, SearchResponse, TagMatch};
pub use store::tree::FileEntry;
pub use store::FileStore;
pub use vault::{Relocation, Vault};
pub use watcher::{VaultEvent, WatchSession};
