use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::assets::AssetRegistry;
use crate::config::VaultConfig;
use crate::error::Result;
use crate::links::{LinkMaintainer, LinkUpdateReport};
use crate::result::OpResult;
use crate::search::SearchEngine;
use crate::store::{FileStore, Moved};
use crate::watcher::{VaultEvent, WatchSession};

/// Result of a rename or move. `links` is the detached link-maintenance
/// task; dropping it leaves the task running.
pub struct Relocation {
    pub result: OpResult,
    pub links: Option<JoinHandle<LinkUpdateReport>>,
}

/// One open vault: the file store, asset registry, link maintainer, search
/// engine and watch session sharing a single configuration.
pub struct Vault {
    config: Arc<VaultConfig>,
    store: FileStore,
    assets: Arc<AssetRegistry>,
    links: LinkMaintainer,
    search: SearchEngine,
    watch: WatchSession,
}

fn json_content<T: Serialize>(value: &T) -> Result<OpResult> {
    Ok(OpResult::with_content(serde_json::to_string(value)?))
}

impl Vault {
    /// Builds every component and creates the root and assets directory if
    /// they are missing.
    pub async fn open(config: VaultConfig) -> Result<Self> {
        let config = Arc::new(config);
        let assets = Arc::new(AssetRegistry::new(config.clone())?);
        let store = FileStore::new(config.clone(), assets.clone());
        store.ensure_root().await?;

        let links = LinkMaintainer::new(config.clone());
        let search = SearchEngine::new(config.clone());
        let watch = WatchSession::new(store.guard().root(), config.document_extension.clone());

        log::info!("[vault] Opened {:?}", store.guard().root());
        Ok(Self {
            config,
            store,
            assets,
            links,
            search,
            watch,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    pub fn links(&self) -> &LinkMaintainer {
        &self.links
    }

    pub fn search(&self) -> &SearchEngine {
        &self.search
    }

    fn relocated(&self, op: &str, moved: Result<Moved>) -> Relocation {
        match moved {
            Ok(moved) => {
                let links = self.links.spawn_update(moved.old.clone(), moved.new.clone());
                Relocation {
                    result: moved.into_result(),
                    links: Some(links),
                }
            }
            Err(e) => Relocation {
                result: OpResult::from_result(op, Err(e)),
                links: None,
            },
        }
    }

    /// Renames an entry and schedules link maintenance for it.
    pub async fn rename(&self, old_path: &str, new_name: &str) -> Relocation {
        self.relocated("rename", self.store.rename_entry(old_path, new_name).await)
    }

    /// Moves an entry into another directory and schedules link maintenance.
    pub async fn move_entry(&self, source: &str, target_dir: &str) -> Relocation {
        self.relocated("move_entry", self.store.move_to_dir(source, target_dir).await)
    }

    pub async fn upload_image(&self, source: &Path) -> OpResult {
        OpResult::from_result(
            "upload_image",
            self.assets.upload_image(source).await.map(OpResult::with_content),
        )
    }

    pub async fn store_image(&self, original_name: &str, bytes: &[u8]) -> OpResult {
        OpResult::from_result(
            "store_image",
            self.assets
                .store_image_bytes(original_name, bytes)
                .await
                .map(OpResult::with_content),
        )
    }

    pub async fn inline_image(&self, asset_path: &str) -> OpResult {
        OpResult::from_result(
            "inline_image",
            self.assets.inline_image(asset_path).await.map(OpResult::with_content),
        )
    }

    /// Reads a document with every asset reference replaced by inline data.
    pub async fn export_document(&self, path: &str) -> OpResult {
        let read = self.store.read(path).await;
        if !read.success {
            return read;
        }
        let content = read.content.unwrap_or_default();
        let embedded = self.assets.embed_images(&content).await;
        OpResult::with_content(embedded.value).warnings(embedded.diagnostics)
    }

    pub async fn asset_references(&self, asset: &str) -> OpResult {
        let result = match self.assets.references_of(asset).await {
            Ok(refs) => json_content(&refs),
            Err(e) => Err(e),
        };
        OpResult::from_result("asset_references", result)
    }

    /// Quick GC. `content` holds the number of deleted assets.
    pub async fn cleanup_unreferenced_assets(&self) -> OpResult {
        let result = match self.assets.cleanup_unreferenced_files().await {
            Ok(outcome) => json_content(&outcome.value).map(|r| r.warnings(outcome.diagnostics)),
            Err(e) => Err(e),
        };
        OpResult::from_result("cleanup_unreferenced_assets", result)
    }

    /// Full GC. `content` holds the [`ValidationReport`](crate::assets::ValidationReport).
    pub async fn validate_assets(&self) -> OpResult {
        let result = match self.assets.validate_and_cleanup().await {
            Ok(outcome) => json_content(&outcome.value).map(|r| r.warnings(outcome.diagnostics)),
            Err(e) => Err(e),
        };
        OpResult::from_result("validate_assets", result)
    }

    pub fn start_watching(&mut self, sender: UnboundedSender<VaultEvent>) -> OpResult {
        OpResult::from_result("start_watching", self.watch.start(sender).map(|_| OpResult::ok()))
    }

    pub fn stop_watching(&mut self) {
        self.watch.stop();
    }

    pub fn is_watching(&self) -> bool {
        self.watch.is_active()
    }

    /// Stops the watch session and runs a quick GC.
    pub async fn shutdown(&mut self) -> OpResult {
        self.watch.stop();
        let result = self.cleanup_unreferenced_assets().await;
        log::info!("[vault] Closed {:?}", self.store.guard().root());
        result
    }
}
