//! Bounded full-text and tag search over the documents of a vault.
//!
//! Search is a straight scan, no index. It stops at `SearchLimits::max_files`
//! documents and `SearchLimits::max_matches` occurrences, and reports
//! whether either bound cut it short.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tokio::fs;

use crate::config::VaultConfig;
use crate::error::{ErrorKind, Result, VaultError};
use crate::frontmatter;
use crate::fs_util::{collect_documents_limited, task_failed};
use crate::path_guard::PathGuard;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMatch {
    /// 1-based, counted from the first line after the frontmatter block.
    pub line_number: usize,
    pub content: String,
    pub match_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagMatch {
    pub tag: String,
    /// Character offsets of the query inside `tag`.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSearchResult {
    pub path: String,
    pub relative_path: String,
    pub name: String,
    pub matches: Vec<LineMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagMatch>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<FileSearchResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_matches: Option<usize>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl SearchResponse {
    fn empty() -> Self {
        Self {
            success: true,
            results: Some(Vec::new()),
            total_matches: Some(0),
            ..Default::default()
        }
    }

    fn failure(err: &VaultError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Default::default()
        }
    }

    fn from_result(op: &str, result: Result<SearchResponse>) -> Self {
        result.unwrap_or_else(|e| {
            log::warn!("[{}] {}", op, e);
            SearchResponse::failure(&e)
        })
    }
}

/// Truncates to at most `max` characters.
fn truncate_chars(line: &str, max: usize) -> String {
    match line.char_indices().nth(max) {
        Some((idx, _)) => line[..idx].to_string(),
        None => line.to_string(),
    }
}

fn build_matcher(query: &str, case_sensitive: bool) -> Result<Regex> {
    RegexBuilder::new(&regex::escape(query))
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| VaultError::Unsupported(format!("search query: {}", e)))
}

/// Running totals shared by both search kinds.
struct Tally {
    results: Vec<FileSearchResult>,
    total: usize,
    truncated: bool,
    max_matches: usize,
}

impl Tally {
    fn new(max_matches: usize, truncated: bool) -> Self {
        Self {
            results: Vec::new(),
            total: 0,
            truncated,
            max_matches,
        }
    }

    fn remaining(&self) -> usize {
        self.max_matches.saturating_sub(self.total)
    }

    /// Counts up to `found` matches, returning how many were accepted.
    fn take(&mut self, found: usize) -> usize {
        let accepted = found.min(self.remaining());
        if accepted < found {
            self.truncated = true;
        }
        self.total += accepted;
        accepted
    }

    fn is_full(&self) -> bool {
        self.total >= self.max_matches
    }

    fn finish(self) -> SearchResponse {
        SearchResponse {
            success: true,
            results: Some(self.results),
            total_matches: Some(self.total),
            truncated: self.truncated,
            ..Default::default()
        }
    }
}

pub struct SearchEngine {
    config: Arc<VaultConfig>,
    guard: PathGuard,
}

impl SearchEngine {
    pub fn new(config: Arc<VaultConfig>) -> Self {
        let guard = PathGuard::new(&config.root);
        Self { config, guard }
    }

    /// Documents to scan, capped at `max_files`. The flag is set when more
    /// documents exist than were returned.
    async fn documents(&self, target: Option<&str>) -> Result<(Vec<PathBuf>, bool)> {
        let dir = match target {
            Some(t) if !t.is_empty() => self.guard.resolve(t)?,
            _ => self.guard.root().to_path_buf(),
        };
        let max_files = self.config.search.max_files;
        let extension = self.config.document_extension.clone();
        let max_open = self.config.walk_max_open;

        let mut docs = tokio::task::spawn_blocking(move || {
            collect_documents_limited(&dir, &extension, max_open, max_files.saturating_add(1))
        })
        .await
        .map_err(|e| task_failed("search walk", e))??;

        let capped = docs.len() > max_files;
        docs.truncate(max_files);
        if capped {
            log::debug!("[search] File ceiling of {} reached", max_files);
        }
        Ok((docs, capped))
    }

    fn result_for(&self, path: &Path) -> FileSearchResult {
        FileSearchResult {
            path: path.to_string_lossy().to_string(),
            relative_path: self.guard.relative(path),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            matches: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub async fn search_content(&self, query: &str, target: Option<&str>, case_sensitive: bool) -> SearchResponse {
        SearchResponse::from_result("search_content", self.try_search_content(query, target, case_sensitive).await)
    }

    async fn try_search_content(&self, query: &str, target: Option<&str>, case_sensitive: bool) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Ok(SearchResponse::empty());
        }
        let matcher = build_matcher(query, case_sensitive)?;
        let (docs, capped) = self.documents(target).await?;
        let limits = &self.config.search;
        let mut tally = Tally::new(limits.max_matches, capped);

        'files: for doc in docs {
            if tally.is_full() {
                tally.truncated = true;
                break;
            }
            let content = match fs::read_to_string(&doc).await {
                Ok(c) => c,
                Err(e) => {
                    log::debug!("[search] Skipping unreadable {:?}: {}", doc, e);
                    continue;
                }
            };

            let body = frontmatter::split(&content).body;
            let mut result = self.result_for(&doc);
            for (idx, line) in body.lines().enumerate() {
                let found = matcher.find_iter(line).count();
                if found == 0 {
                    continue;
                }
                let accepted = tally.take(found);
                if accepted > 0 {
                    result.matches.push(LineMatch {
                        line_number: idx + 1,
                        content: truncate_chars(line, limits.max_line_length),
                        match_count: accepted,
                    });
                }
                if tally.is_full() {
                    if !result.matches.is_empty() {
                        tally.results.push(result);
                    }
                    break 'files;
                }
            }
            if !result.matches.is_empty() {
                tally.results.push(result);
            }
        }

        log::debug!(
            "[search] {:?}: {} matches in {} files{}",
            query,
            tally.total,
            tally.results.len(),
            if tally.truncated { " (truncated)" } else { "" }
        );
        Ok(tally.finish())
    }

    pub async fn search_tags(&self, query: &str, target: Option<&str>, case_sensitive: bool) -> SearchResponse {
        SearchResponse::from_result("search_tags", self.try_search_tags(query, target, case_sensitive).await)
    }

    async fn try_search_tags(&self, query: &str, target: Option<&str>, case_sensitive: bool) -> Result<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchResponse::empty());
        }
        let matcher = build_matcher(query, case_sensitive)?;
        let (docs, capped) = self.documents(target).await?;
        let mut tally = Tally::new(self.config.search.max_matches, capped);

        for doc in docs {
            if tally.is_full() {
                tally.truncated = true;
                break;
            }
            let content = match fs::read_to_string(&doc).await {
                Ok(c) => c,
                Err(e) => {
                    log::debug!("[search] Skipping unreadable {:?}: {}", doc, e);
                    continue;
                }
            };
            let Some(raw) = frontmatter::split(&content).raw else {
                continue;
            };

            let mut result = self.result_for(&doc);
            for tag in frontmatter::extract_tags(raw) {
                let Some(m) = matcher.find(&tag) else {
                    continue;
                };
                if tally.take(1) == 0 {
                    break;
                }
                let start = tag[..m.start()].chars().count();
                let end = start + tag[m.start()..m.end()].chars().count();
                result.tags.push(TagMatch { tag, start, end });
            }
            if !result.tags.is_empty() {
                tally.results.push(result);
            }
        }

        Ok(tally.finish())
    }
}
