//! Keeps relative markdown links valid after a document or folder moves.
//!
//! The link graph is never stored. After a rename or move the whole vault is
//! rescanned and every `[text](target)` whose resolution is affected is
//! rewritten relative to the document that contains it. A document that was
//! itself moved resolves its links from its old location, so a link that was
//! correct before the move stays pointed at the same file afterwards.
//!
//! Running the same pass twice writes nothing the second time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tokio::task::JoinHandle;

use crate::config::VaultConfig;
use crate::diagnostics::{Diagnostic, Task};
use crate::fs_util::{atomic_write_blocking, collect_documents_blocking};
use crate::path_guard::{normalize, to_slash, PathGuard};

/// `[text](target)`, `[text](target "title")` and `[text](<target with spaces>)`.
/// A bare target may contain spaces; it runs up to the title or the closing `)`.
static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\[(?P<text>[^\]]*)\]\(\s*(?:<(?P<angle>[^<>\n]+)>|(?P<target>[^)"<\s][^)"<\n]*?))(?P<title>\s+"[^"]*")?\s*\)"#,
    )
    .expect("valid link regex")
});

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("valid scheme regex"));

#[derive(Debug, Default)]
pub struct LinkUpdateReport {
    /// Documents whose content was rewritten.
    pub changed: Vec<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Old and new location of every document affected by one move.
#[derive(Debug, Default)]
struct MoveMap {
    forward: BTreeMap<PathBuf, PathBuf>,
    backward: BTreeMap<PathBuf, PathBuf>,
}

impl MoveMap {
    fn insert(&mut self, old: PathBuf, new: PathBuf) {
        self.backward.insert(new.clone(), old.clone());
        self.forward.insert(old, new);
    }

    fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Per-document rewrite context.
struct DocumentContext<'a> {
    /// Directory links were written against (old location if the document moved).
    reference_dir: &'a Path,
    current_dir: &'a Path,
    moved: bool,
}

#[derive(Clone)]
pub struct LinkMaintainer {
    config: Arc<VaultConfig>,
    guard: PathGuard,
}

impl LinkMaintainer {
    pub fn new(config: Arc<VaultConfig>) -> Self {
        let guard = PathGuard::new(&config.root);
        Self { config, guard }
    }

    /// Runs [`update_links`](Self::update_links) as a detached task.
    pub fn spawn_update(&self, old_path: PathBuf, new_path: PathBuf) -> JoinHandle<LinkUpdateReport> {
        let this = self.clone();
        tokio::spawn(async move {
            let report = this.update_links(&old_path, &new_path).await;
            if !report.changed.is_empty() {
                log::info!(
                    "[links] Updated links in {} documents after {:?} -> {:?}",
                    report.changed.len(),
                    old_path,
                    new_path
                );
            }
            report
        })
    }

    /// Rewrites links across the vault after `old_path` moved to `new_path`.
    /// Never fails; problems are carried in the report.
    pub async fn update_links(&self, old_path: &Path, new_path: &Path) -> LinkUpdateReport {
        let this = self.clone();
        let old_path = normalize(old_path);
        let new_path = normalize(new_path);
        match tokio::task::spawn_blocking(move || this.update_links_blocking(&old_path, &new_path)).await {
            Ok(report) => report,
            Err(e) => LinkUpdateReport {
                changed: Vec::new(),
                diagnostics: vec![Diagnostic::new(Task::LinkRewrite, None, e.to_string())],
            },
        }
    }

    fn update_links_blocking(&self, old_path: &Path, new_path: &Path) -> LinkUpdateReport {
        let mut report = LinkUpdateReport::default();

        let moves = match self.build_moves(old_path, new_path) {
            Ok(moves) => moves,
            Err(e) => {
                report.push(Diagnostic::new(Task::LinkRewrite, Some(new_path), e.to_string()));
                return report;
            }
        };
        if moves.is_empty() {
            return report;
        }

        let documents = match collect_documents_blocking(
            self.guard.root(),
            &self.config.document_extension,
            self.config.walk_max_open,
        ) {
            Ok(docs) => docs,
            Err(e) => {
                report.push(Diagnostic::new(Task::LinkRewrite, None, e.to_string()));
                return report;
            }
        };

        for doc in documents {
            let content = match std::fs::read_to_string(&doc) {
                Ok(c) => c,
                Err(e) => {
                    report.push(Diagnostic::new(Task::LinkRewrite, Some(&doc), e.to_string()));
                    continue;
                }
            };

            let old_location = moves.backward.get(&doc);
            let (Some(current_dir), Some(reference_dir)) =
                (doc.parent(), old_location.unwrap_or(&doc).parent())
            else {
                continue;
            };
            let ctx = DocumentContext {
                reference_dir,
                current_dir,
                moved: old_location.is_some(),
            };

            if let Some(updated) = self.rewrite_content(&content, &ctx, &moves) {
                match atomic_write_blocking(&doc, updated.as_bytes()) {
                    Ok(()) => {
                        log::debug!("[links] Rewrote links in {:?}", doc);
                        report.changed.push(doc);
                    }
                    Err(e) => report.push(Diagnostic::new(Task::LinkRewrite, Some(&doc), e.to_string())),
                }
            }
        }

        report
    }

    fn build_moves(&self, old_path: &Path, new_path: &Path) -> crate::error::Result<MoveMap> {
        let mut moves = MoveMap::default();
        let is_dir = std::fs::metadata(new_path).map(|m| m.is_dir()).unwrap_or(false);

        if is_dir {
            let docs = collect_documents_blocking(
                new_path,
                &self.config.document_extension,
                self.config.walk_max_open,
            )?;
            for doc in docs {
                if let Ok(rel) = doc.strip_prefix(new_path) {
                    moves.insert(old_path.join(rel), doc.clone());
                }
            }
        } else {
            moves.insert(old_path.to_path_buf(), new_path.to_path_buf());
        }
        Ok(moves)
    }

    /// Returns the rewritten document, or `None` when no link changed.
    fn rewrite_content(&self, content: &str, ctx: &DocumentContext<'_>, moves: &MoveMap) -> Option<String> {
        let mut changed = false;
        let updated = LINK_RE.replace_all(content, |caps: &Captures| {
            let (target, angled) = match (caps.name("angle"), caps.name("target")) {
                (Some(angle), _) => (angle.as_str(), true),
                (None, Some(bare)) => (bare.as_str(), false),
                (None, None) => return caps[0].to_string(),
            };
            match self.rewrite_target(target.trim(), angled, ctx, moves) {
                Some(new_target) => {
                    changed = true;
                    let title = caps.name("title").map_or("", |m| m.as_str());
                    if angled {
                        format!("[{}](<{}>{})", &caps["text"], new_target, title)
                    } else {
                        format!("[{}]({}{})", &caps["text"], new_target, title)
                    }
                }
                None => caps[0].to_string(),
            }
        });
        if changed {
            Some(updated.into_owned())
        } else {
            None
        }
    }

    fn is_untouchable(&self, target: &str) -> bool {
        if SCHEME_RE.is_match(target) || target.starts_with('/') || target.starts_with('#') {
            return true;
        }
        let stripped = target.trim_start_matches("./");
        stripped == self.config.assets_dir || stripped.starts_with(&format!("{}/", self.config.assets_dir))
    }

    /// Computes the new target text for one link, or `None` to leave it.
    fn rewrite_target(
        &self,
        target: &str,
        angled: bool,
        ctx: &DocumentContext<'_>,
        moves: &MoveMap,
    ) -> Option<String> {
        if self.is_untouchable(target) {
            return None;
        }

        let (path_part, fragment) = match target.find('#') {
            Some(idx) => (&target[..idx], Some(&target[idx + 1..])),
            None => (target, None),
        };
        if path_part.is_empty() {
            return None;
        }
        let encoded = path_part.contains('%');
        let decoded = urlencoding::decode(path_part).ok()?.into_owned();

        let old_resolution = normalize(&ctx.reference_dir.join(&decoded));
        let final_target = moves
            .forward
            .get(&old_resolution)
            .cloned()
            .unwrap_or_else(|| old_resolution.clone());
        let current_resolution = normalize(&ctx.current_dir.join(&decoded));

        if current_resolution == final_target {
            return None;
        }
        if ctx.moved
            && current_resolution.exists()
            && self.already_relinked(&old_resolution, &current_resolution, moves)
        {
            return None;
        }

        let relative = pathdiff::diff_paths(&final_target, ctx.current_dir)?;
        let mut new_path = to_slash(&relative);
        if new_path.is_empty() {
            return None;
        }
        // A bare destination cannot carry whitespace.
        let needs_encoding = encoded || (!angled && new_path.chars().any(char::is_whitespace));
        if needs_encoding {
            new_path = new_path
                .split('/')
                .map(|segment| urlencoding::encode(segment).into_owned())
                .collect::<Vec<_>>()
                .join("/");
        }
        if path_part.starts_with("./") && !new_path.starts_with("..") {
            new_path = format!("./{}", new_path);
        }

        Some(match fragment {
            Some(frag) => format!("{}#{}", new_path, frag),
            None => new_path,
        })
    }

    /// Whether a moved document's link was already rewritten by an earlier
    /// pass over the same move. Resolved from the old location such a link
    /// escapes the vault, lands in a directory that no longer exists, or
    /// already points at one of the moved documents.
    fn already_relinked(&self, old_resolution: &Path, current_resolution: &Path, moves: &MoveMap) -> bool {
        if !self.guard.contains(old_resolution) || moves.backward.contains_key(current_resolution) {
            return true;
        }
        !old_resolution.exists() && old_resolution.parent().map_or(true, |dir| !dir.is_dir())
    }
}

impl LinkUpdateReport {
    fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}
