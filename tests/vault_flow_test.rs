//! End-to-end flows through the public `Vault` API
//!
//! Open a vault, write documents with images, move things around, search,
//! watch for external edits and shut down with a quick asset cleanup.

use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use vault_store::{ErrorKind, Vault, VaultConfig, VaultEvent};

#[tokio::test]
async fn test_note_lifecycle_with_links_and_assets() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("Notes");
    let mut vault = Vault::open(VaultConfig::new(&root)).await.unwrap();

    // Fresh root gets the welcome document and asset bookkeeping.
    let listing = vault.store().list().await;
    assert!(listing.success);
    assert_eq!(listing.files.unwrap()[0].name, "Welcome.md");

    let image = vault.store_image("diagram.png", b"\x89PNG\r\n\x1a\n").await;
    let image_path = image.content.unwrap();

    vault.store().create_folder("Projects", None).await;
    let plan = vault.store().create("Plan", Some("Projects")).await.content.unwrap();
    let body = format!("# Plan\n\n![diagram]({})\n\nSee [welcome](../Welcome.md).\n", image_path);
    assert!(vault.store().write(&plan, &body).await.success);

    let asset_name = image_path.trim_start_matches(".assets/");
    let refs = vault.asset_references(asset_name).await;
    assert_eq!(refs.content.as_deref(), Some("[\"Projects/Plan.md\"]"));

    // Moving the folder keeps the plan's outgoing link valid and re-keys its
    // asset reference.
    vault.store().create_folder("Archive", None).await;
    let moved = vault.move_entry("Projects", "Archive").await;
    assert!(moved.result.success);
    let report = moved.links.unwrap().await.unwrap();
    let new_plan = root.join("Archive/Projects/Plan.md");
    assert_eq!(report.changed, vec![new_plan.clone()]);
    let rewritten = fs::read_to_string(&new_plan).unwrap();
    assert!(rewritten.contains("[welcome](../../Welcome.md)"));
    assert!(rewritten.contains(&format!("![diagram]({})", image_path)));

    let refs = vault.asset_references(asset_name).await;
    assert_eq!(refs.content.as_deref(), Some("[\"Archive/Projects/Plan.md\"]"));

    // Search sees the moved document.
    let hits = vault.search().search_content("welcome", None, false).await;
    let names: Vec<_> = hits.results.unwrap().into_iter().map(|r| r.relative_path).collect();
    assert!(names.contains(&"Archive/Projects/Plan.md".to_string()));

    // Deleting the document leaves the image until cleanup runs on shutdown.
    assert!(vault.store().delete("Archive/Projects/Plan.md").await.success);
    assert!(root.join(&image_path).exists());
    let closed = vault.shutdown().await;
    assert_eq!(closed.content.as_deref(), Some("1"));
    assert!(!root.join(&image_path).exists());
}

#[tokio::test]
async fn test_every_operation_rejects_paths_outside_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("Root");
    let evil = temp_dir.path().join("RootEvil");
    fs::create_dir_all(&evil).unwrap();
    fs::write(evil.join("x.md"), "secret").unwrap();
    let vault = Vault::open(VaultConfig::new(&root)).await.unwrap();

    let relative = "../RootEvil/x.md";
    let absolute = evil.join("x.md");
    let absolute = absolute.to_str().unwrap();

    for path in [relative, absolute] {
        let store = vault.store();
        let results = [
            store.read(path).await,
            store.write(path, "pwned").await,
            store.delete(path).await,
            store.duplicate(path).await,
            store.stat(path).await,
            store.rename(path, "y.md").await,
            store.move_entry(path, "").await,
            store.create("new", Some("../RootEvil")).await,
            store.create_folder("new", Some("../RootEvil")).await,
        ];
        for result in results {
            assert!(!result.success);
            assert_eq!(result.error_kind, Some(ErrorKind::AccessDenied), "path {}", path);
        }
        let searched = vault.search().search_content("secret", Some(path), false).await;
        assert_eq!(searched.error_kind, Some(ErrorKind::AccessDenied));
    }

    assert_eq!(fs::read_to_string(evil.join("x.md")).unwrap(), "secret");
    assert!(!evil.join("new.md").exists());
    assert!(!evil.join("new").exists());
}

#[tokio::test]
async fn test_watch_session_reports_external_edits() {
    let temp_dir = TempDir::new().unwrap();
    let mut vault = Vault::open(VaultConfig::new(temp_dir.path())).await.unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    assert!(vault.start_watching(tx).success);
    assert!(vault.is_watching());

    let note = temp_dir.path().join("external.md");
    fs::write(&note, "edited elsewhere").unwrap();
    fs::write(temp_dir.path().join("ignored.txt"), "not a document").unwrap();

    let expected = note.to_string_lossy().to_string();
    let event = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Some(VaultEvent::Changed { paths }) if paths.contains(&expected) => break paths,
                Some(_) => continue,
                None => panic!("watcher channel closed"),
            }
        }
    })
    .await
    .expect("change event within timeout");
    assert!(event.iter().all(|p| p.ends_with(".md")));

    vault.stop_watching();
    assert!(!vault.is_watching());
}
