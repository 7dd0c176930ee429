use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::filter::DocumentFilter;
use crate::scanner::relative_path;

/// How often the watch thread checks for shutdown while idle
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Output of the watch source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Relative paths that settled after a burst of activity
    Touched(Vec<String>),
    /// Notifications were lost; only a full sweep can catch up
    Rescan,
}

#[derive(Debug, Clone, Copy)]
struct PendingPath {
    first_seen: Instant,
    last_seen: Instant,
}

/// Per-path coalescing of raw filesystem notifications
///
/// A path is due once it has been quiet for `quiet`, or once `max_latency`
/// has passed since its first event, whichever comes first.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    max_latency: Duration,
    pending: HashMap<String, PendingPath>,
}

impl Debouncer {
    pub fn new(quiet: Duration, max_latency: Duration) -> Self {
        Self {
            quiet,
            max_latency: max_latency.max(quiet),
            pending: HashMap::new(),
        }
    }

    /// Record activity on a path, restarting its quiet timer
    pub fn touch(&mut self, path: impl Into<String>, now: Instant) {
        self.pending
            .entry(path.into())
            .and_modify(|p| p.last_seen = now)
            .or_insert(PendingPath {
                first_seen: now,
                last_seen: now,
            });
    }

    /// Remove and return every path that is due, sorted
    pub fn drain_due(&mut self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| self.deadline(p) <= now)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &due {
            self.pending.remove(path);
        }
        due.sort();
        due
    }

    /// Earliest instant at which some pending path becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| self.deadline(p)).min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn deadline(&self, pending: &PendingPath) -> Instant {
        (pending.last_seen + self.quiet).min(pending.first_seen + self.max_latency)
    }
}

/// Native filesystem watcher over the sync root
///
/// Runs on its own thread and hands settled paths to `sink`. Stops when
/// [`WatchSource::stop`] is called or the value is dropped.
pub struct WatchSource {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WatchSource {
    pub fn spawn<F>(
        root: &Path,
        filter: DocumentFilter,
        debounce: Duration,
        max_debounce: Duration,
        sink: F,
    ) -> Result<Self>
    where
        F: Fn(WatchEvent) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })
        .context("Failed to create filesystem watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        // Some platforms report canonical paths (e.g. /private/var on macOS)
        let roots: Vec<PathBuf> = match root.canonicalize() {
            Ok(canonical) if canonical != root => vec![root.to_path_buf(), canonical],
            _ => vec![root.to_path_buf()],
        };

        log::info!("Watching {} for changes", root.display());

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("mdflare-watch".to_string())
            .spawn(move || {
                // Keep the watcher alive for as long as the thread runs
                let _watcher = watcher;
                let mut debouncer = Debouncer::new(debounce, max_debounce);

                while !stop_flag.load(Ordering::SeqCst) {
                    let timeout = debouncer
                        .next_deadline()
                        .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                        .unwrap_or(POLL_INTERVAL)
                        .min(POLL_INTERVAL);

                    match rx.recv_timeout(timeout) {
                        Ok(Ok(event)) => {
                            if event.need_rescan() {
                                log::warn!("Watcher dropped events, requesting a full sweep");
                                sink(WatchEvent::Rescan);
                                continue;
                            }
                            if matches!(event.kind, EventKind::Access(_)) {
                                continue;
                            }
                            let now = Instant::now();
                            for path in &event.paths {
                                if let Some(rel) = to_candidate(&roots, path, &filter) {
                                    debouncer.touch(rel, now);
                                }
                            }
                        }
                        Ok(Err(e)) => {
                            log::warn!("Watch error: {e}");
                            sink(WatchEvent::Rescan);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            log::warn!("Watcher channel closed");
                            break;
                        }
                    }

                    let due = debouncer.drain_due(Instant::now());
                    if !due.is_empty() {
                        log::debug!("Touched: {}", due.join(", "));
                        sink(WatchEvent::Touched(due));
                    }
                }

                log::debug!("Watch thread stopped");
            })
            .context("Failed to spawn watch thread")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop watching and wait for the watch thread to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn to_candidate(roots: &[PathBuf], path: &Path, filter: &DocumentFilter) -> Option<String> {
    roots
        .iter()
        .find_map(|root| relative_path(root, path))
        .filter(|rel| filter.is_candidate(rel))
}
