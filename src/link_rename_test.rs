// Relative link maintenance after renames and moves.
// Covers: moved targets, moved sources, folder moves, encoded links, untouched
// link kinds and idempotent re-runs.

#[cfg(test)]
mod link_rename_tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    use crate::config::VaultConfig;
    use crate::links::LinkUpdateReport;
    use crate::vault::{Relocation, Vault};

    async fn open_vault(root: &Path) -> Vault {
        Vault::open(VaultConfig::new(root)).await.unwrap()
    }

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn read(root: &Path, rel: &str) -> String {
        fs::read_to_string(root.join(rel)).unwrap()
    }

    async fn finish(relocation: Relocation) -> LinkUpdateReport {
        assert!(relocation.result.success, "{:?}", relocation.result.error);
        relocation.links.expect("link task scheduled").await.unwrap()
    }

    #[tokio::test]
    async fn test_moved_target_is_relinked() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        let a = write(root, "A.md", "See [link](B.md) here.\n");
        write(root, "B.md", "# B\n");
        fs::create_dir_all(root.join("sub")).unwrap();
        let unrelated = "Nothing about [that](C.md)\n";
        write(root, "C.md", unrelated);

        let report = finish(vault.move_entry("B.md", "sub").await).await;

        assert_eq!(read(root, "A.md"), "See [link](sub/B.md) here.\n");
        assert_eq!(report.changed, vec![a]);
        assert_eq!(read(root, "C.md"), unrelated);
        assert!(report.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_moved_source_recomputes_own_links() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "A.md", "[link](B.md)\n");
        write(root, "B.md", "# B\n");
        fs::create_dir_all(root.join("sub")).unwrap();

        let report = finish(vault.move_entry("A.md", "sub").await).await;

        assert_eq!(read(root, "sub/A.md"), "[link](../B.md)\n");
        assert_eq!(report.changed, vec![root.join("sub/A.md")]);
    }

    #[tokio::test]
    async fn test_rerun_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "A.md", "[to b](B.md) and [self](A.md)\n");
        write(root, "B.md", "[back](A.md)\n");
        fs::create_dir_all(root.join("sub")).unwrap();

        finish(vault.move_entry("A.md", "sub").await).await;
        let a_after = read(root, "sub/A.md");
        let b_after = read(root, "B.md");
        assert_eq!(a_after, "[to b](../B.md) and [self](A.md)\n");
        assert_eq!(b_after, "[back](sub/A.md)\n");

        let again = vault
            .links()
            .update_links(&root.join("A.md"), &root.join("sub/A.md"))
            .await;
        assert!(again.changed.is_empty(), "{:?}", again.changed);
        assert_eq!(read(root, "sub/A.md"), a_after);
        assert_eq!(read(root, "B.md"), b_after);
    }

    #[tokio::test]
    async fn test_rename_keeps_fragment_and_encoding() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "My Note.md", "# Intro\n");
        write(root, "index.md", "[x](My%20Note.md#intro) and [y](./My%20Note.md)\n");

        finish(vault.rename("My Note.md", "Your Note.md").await).await;

        assert_eq!(
            read(root, "index.md"),
            "[x](Your%20Note.md#intro) and [y](./Your%20Note.md)\n"
        );
    }

    #[tokio::test]
    async fn test_untouchable_links_are_left_alone() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "B.md", "# B\n");
        let content = "[web](https://example.com/B.md) [mail](mailto:me@example.com) \
                       [abs](/B.md) [frag](#B) ![img](.assets/B.md)\n";
        write(root, "A.md", content);
        fs::create_dir_all(root.join("sub")).unwrap();

        let report = finish(vault.move_entry("B.md", "sub").await).await;

        assert!(report.changed.is_empty());
        assert_eq!(read(root, "A.md"), content);
    }

    #[tokio::test]
    async fn test_folder_rename_relinks_children() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "docs/a.md", "[b](b.md) [up](../index.md)\n");
        write(root, "docs/b.md", "# b\n");
        write(root, "index.md", "[a](docs/a.md) [b](docs/b.md#top)\n");

        let report = finish(vault.rename("docs", "notes").await).await;

        assert_eq!(read(root, "index.md"), "[a](notes/a.md) [b](notes/b.md#top)\n");
        assert_eq!(read(root, "notes/a.md"), "[b](b.md) [up](../index.md)\n");
        assert_eq!(report.changed, vec![root.join("index.md")]);
    }

    #[tokio::test]
    async fn test_rename_chain_through_name_with_spaces() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "a.md", "# a\n");
        write(root, "index.md", "[x](a.md)\n");

        finish(vault.rename("a.md", "my note.md").await).await;
        assert_eq!(read(root, "index.md"), "[x](my%20note.md)\n");

        finish(vault.rename("my note.md", "b.md").await).await;
        assert_eq!(read(root, "index.md"), "[x](b.md)\n");
    }

    #[tokio::test]
    async fn test_bare_and_angle_targets_with_spaces() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "Meeting notes.md", "# Meeting\n");
        write(
            root,
            "c.md",
            "[m](Meeting notes.md) [t](Meeting notes.md \"Agenda\") [a](<Meeting notes.md#top>)\n",
        );
        fs::create_dir_all(root.join("sub")).unwrap();

        let report = finish(vault.move_entry("Meeting notes.md", "sub").await).await;

        assert_eq!(
            read(root, "c.md"),
            "[m](sub/Meeting%20notes.md) [t](sub/Meeting%20notes.md \"Agenda\") \
             [a](<sub/Meeting notes.md#top>)\n"
        );
        assert_eq!(report.changed, vec![root.join("c.md")]);
    }

    #[tokio::test]
    async fn test_moved_source_keeps_broken_link_target() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "A.md", "[x](C.md)\n");
        write(root, "sub/C.md", "# a different C\n");

        finish(vault.move_entry("A.md", "sub").await).await;

        assert_eq!(read(root, "sub/A.md"), "[x](../C.md)\n");
    }

    #[tokio::test]
    async fn test_undecodable_link_is_left_alone() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "bad%FF.md", "# odd name\n");
        let content = "[x](bad%FF.md) stays\n";
        write(root, "index.md", content);
        fs::create_dir_all(root.join("sub")).unwrap();

        let report = finish(vault.move_entry("bad%FF.md", "sub").await).await;

        assert!(root.join("sub/bad%FF.md").exists());
        assert_eq!(fs::read(root.join("index.md")).unwrap(), content.as_bytes());
        assert!(report.changed.is_empty());
    }

    #[tokio::test]
    async fn test_unstattable_new_path_is_treated_as_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let vault = open_vault(root).await;
        write(root, "A.md", "[x](gone.md)\n");

        let report = vault
            .links()
            .update_links(&root.join("gone.md"), &root.join("still-gone.md"))
            .await;

        assert_eq!(read(root, "A.md"), "[x](still-gone.md)\n");
        assert_eq!(report.changed, vec![root.join("A.md")]);
    }
}
