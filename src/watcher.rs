//! Filesystem watch session for a vault root.
//!
//! A [`WatchSession`] owns the `notify` watcher and the debounce thread that
//! batches raw events. Events are forwarded to a caller-supplied channel as
//! [`VaultEvent`]s for visible documents only.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{Result, VaultError};
use crate::fs_util::TEMP_SUFFIX;

const POLL_INTERVAL: Duration = Duration::from_millis(300);
const TICK: Duration = Duration::from_millis(250);
/// A path must be quiet this long before it is reported.
const SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VaultEvent {
    Changed { paths: Vec<String> },
    Removed { paths: Vec<String> },
}

struct Running {
    watcher: RecommendedWatcher,
    worker: JoinHandle<()>,
}

pub struct WatchSession {
    root: PathBuf,
    extension: String,
    running: Option<Running>,
}

impl WatchSession {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            running: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    /// Starts watching. Calling it on an active session does nothing.
    pub fn start(&mut self, sender: UnboundedSender<VaultEvent>) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(tx, Config::default().with_poll_interval(POLL_INTERVAL))
            .map_err(|e| VaultError::Unsupported(format!("file watcher: {}", e)))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| VaultError::Unsupported(format!("watch {:?}: {}", self.root, e)))?;

        let root = self.root.clone();
        let extension = self.extension.clone();
        let worker = thread::spawn(move || debounce_loop(rx, sender, &root, &extension));

        log::info!("[watcher] Watching {:?}", self.root);
        self.running = Some(Running { watcher, worker });
        Ok(())
    }

    /// Stops watching and waits for the debounce thread to exit.
    pub fn stop(&mut self) {
        if let Some(Running { watcher, worker }) = self.running.take() {
            // Dropping the watcher closes the event channel, which ends the loop.
            drop(watcher);
            if worker.join().is_err() {
                log::warn!("[watcher] Debounce thread panicked");
            }
            log::info!("[watcher] Stopped watching {:?}", self.root);
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn debounce_loop(
    rx: mpsc::Receiver<notify::Result<notify::Event>>,
    sender: UnboundedSender<VaultEvent>,
    root: &Path,
    extension: &str,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    let mut last_flush = Instant::now();

    loop {
        match rx.recv_timeout(TICK) {
            Ok(Ok(event)) => {
                let now = Instant::now();
                for path in event.paths {
                    if should_process_path(&path, root, extension) {
                        pending.insert(path, now);
                    }
                }
                // A steady event stream never times out, so flush on ticks here too.
                if now.duration_since(last_flush) < TICK {
                    continue;
                }
            }
            Ok(Err(e)) => {
                log::warn!("[watcher] Watch error: {}", e);
                continue;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        last_flush = Instant::now();
        if !flush_settled(&mut pending, &sender) {
            log::debug!("[watcher] Event receiver dropped, stopping");
            break;
        }
    }
}

/// Sends every path quiet for at least `SETTLE`. Returns `false` once the
/// receiver is gone.
fn flush_settled(pending: &mut HashMap<PathBuf, Instant>, sender: &UnboundedSender<VaultEvent>) -> bool {
    let now = Instant::now();
    let (settled, waiting): (HashMap<_, _>, HashMap<_, _>) = pending
        .drain()
        .partition(|(_, last)| now.duration_since(*last) >= SETTLE);
    *pending = waiting;
    if settled.is_empty() {
        return true;
    }

    let mut changed = Vec::new();
    let mut removed = Vec::new();
    for path in settled.into_keys() {
        let display = path.to_string_lossy().to_string();
        if path.is_file() {
            changed.push(display);
        } else if !path.exists() {
            removed.push(display);
        }
    }
    changed.sort();
    removed.sort();
    log::debug!("[watcher] {} changed, {} removed", changed.len(), removed.len());

    let send = |event: VaultEvent| sender.send(event).is_ok();
    (changed.is_empty() || send(VaultEvent::Changed { paths: changed }))
        && (removed.is_empty() || send(VaultEvent::Removed { paths: removed }))
}

/// Visible documents only: no temp files, nothing under a hidden component
/// (which also covers the assets directory).
fn should_process_path(path: &Path, root: &Path, extension: &str) -> bool {
    let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    if file_name.ends_with(TEMP_SUFFIX) || !file_name.ends_with(extension) {
        return false;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    !relative.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processes_documents() {
        let root = PathBuf::from("/vault");
        assert!(should_process_path(&PathBuf::from("/vault/note.md"), &root, ".md"));
        assert!(should_process_path(&PathBuf::from("/vault/a/b/c.md"), &root, ".md"));
    }

    #[test]
    fn test_skips_temp_hidden_and_assets() {
        let root = PathBuf::from("/vault");
        assert!(!should_process_path(&PathBuf::from("/vault/note.md.vault-tmp"), &root, ".md"));
        assert!(!should_process_path(&PathBuf::from("/vault/.trash/old.md"), &root, ".md"));
        assert!(!should_process_path(&PathBuf::from("/vault/.assets/readme.md"), &root, ".md"));
        assert!(!should_process_path(&PathBuf::from("/vault/image.png"), &root, ".md"));
    }

    #[test]
    fn test_session_start_stop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut session = WatchSession::new(tmp.path(), ".md");
        assert!(!session.is_active());

        session.start(tx.clone()).unwrap();
        assert!(session.is_active());
        session.start(tx).unwrap();
        assert!(session.is_active());

        session.stop();
        assert!(!session.is_active());
        session.stop();
    }

    #[test]
    fn test_settled_paths_flush_during_steady_stream() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let quiet = root.join("quiet.md");
        let busy = root.join("busy.md");
        std::fs::write(&quiet, "q").unwrap();
        std::fs::write(&busy, "b").unwrap();

        let (raw_tx, raw_rx) = mpsc::channel();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let loop_root = root.clone();
        let worker = thread::spawn(move || debounce_loop(raw_rx, tx, &loop_root, ".md"));

        let modify = |path: &Path| {
            notify::Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
                .add_path(path.to_path_buf())
        };
        raw_tx.send(Ok(modify(&quiet))).unwrap();

        let expected = quiet.to_string_lossy().to_string();
        let mut seen = false;
        for _ in 0..30 {
            thread::sleep(Duration::from_millis(100));
            raw_tx.send(Ok(modify(&busy))).unwrap();
            while let Ok(event) = rx.try_recv() {
                if let VaultEvent::Changed { paths } = event {
                    seen |= paths.contains(&expected);
                }
            }
            if seen {
                break;
            }
        }

        drop(raw_tx);
        worker.join().unwrap();
        assert!(seen, "quiet path was never flushed while events kept arriving");
    }

    #[test]
    fn test_event_serialization() {
        let event = VaultEvent::Removed {
            paths: vec!["/vault/a.md".to_string()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "removed");
        assert_eq!(json["paths"][0], "/vault/a.md");
    }
}
