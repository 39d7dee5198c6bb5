//! Reports artifacts in a working directory once they stop growing.

use crate::domain::artifact::{ArtifactKind, SettledArtifact};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Size of a file the last time it was polled.
#[derive(Debug, Clone, Copy)]
struct Observation {
    size: u64,
    /// Order in which the file was first detected
    seen_at: u64,
}

/// Tracks files and determines when they've "settled" (stopped changing).
#[derive(Debug, Default)]
struct SettleTracker {
    pending: HashMap<PathBuf, Observation>,
    emitted: HashSet<PathBuf>,
    next_seen: u64,
}

impl SettleTracker {
    /// Record one size check of the detected files and return what settled during it,
    /// in detection order. With `flush` every non-empty pending file counts as
    /// settled, which is only sound once the writer has exited.
    fn observe(&mut self, listing: Vec<(PathBuf, u64)>, flush: bool) -> Vec<SettledArtifact> {
        let mut settled = Vec::new();
        let mut listing = listing;
        // New files detected in the same tick are ordered by name.
        listing.sort();

        for (path, size) in listing {
            if self.emitted.contains(&path) {
                continue;
            }
            let Some(kind) = ArtifactKind::classify(&path) else {
                continue;
            };

            let stable = match self.pending.get(&path) {
                Some(previous) => previous.size == size && size > 0,
                None => false,
            };

            let seen_at = match self.pending.get(&path) {
                Some(previous) => previous.seen_at,
                None => {
                    tracing::trace!(path = ?path, "artifact detected");
                    self.next_seen += 1;
                    self.next_seen
                }
            };
            self.pending.insert(path.clone(), Observation { size, seen_at });

            if stable || (flush && size > 0) {
                settled.push((seen_at, SettledArtifact { path, kind, size_bytes: size }));
            }
        }

        settled.sort_by_key(|(seen_at, _)| *seen_at);
        settled
            .into_iter()
            .map(|(_, artifact)| {
                self.pending.remove(&artifact.path);
                self.emitted.insert(artifact.path.clone());
                artifact
            })
            .collect()
    }

    fn has_emitted(&self, path: &Path) -> bool {
        self.emitted.contains(path)
    }
}

async fn list_files(dir: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        // Files can vanish between listing and stat, e.g. ffmpeg's playlist temp file.
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if metadata.is_file() {
            files.push((entry.path(), metadata.len()));
        }
    }
    Ok(files)
}

/// Current size of every path that still exists.
async fn stat_files(paths: &HashSet<PathBuf>) -> Vec<(PathBuf, u64)> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if let Ok(metadata) = tokio::fs::metadata(path).await {
            if metadata.is_file() {
                files.push((path.clone(), metadata.len()));
            }
        }
    }
    files
}

type Changes = mpsc::UnboundedReceiver<PathBuf>;

/// Subscribe to create and modify notifications for classified files in `dir`.
fn watch_changes(dir: &Path) -> notify::Result<(RecommendedWatcher, Changes)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if event.kind.is_create() || event.kind.is_modify() => {
            for path in event.paths {
                if ArtifactKind::classify(&path).is_some() && tx.send(path).is_err() {
                    return;
                }
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "watch error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

async fn next_change(changes: &mut Option<Changes>) -> Option<PathBuf> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle to a running watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    stop: CancellationToken,
    drain: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop immediately. No further artifacts are emitted. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// The writer is done: emit whatever is left after one final scan, then
    /// close the stream. Idempotent.
    pub fn drain(&self) {
        self.drain.cancel();
    }

    /// Wait for the watch loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "watcher task ended abnormally");
        }
    }
}

/// Start watching `dir`. Files are detected through filesystem
/// notifications and settle once their size holds across two ticks of
/// `settle_interval`. The returned stream yields each settled artifact once,
/// and ends after `stop`, `drain`, or an unreadable directory.
pub fn observe(
    dir: PathBuf,
    settle_interval: Duration,
) -> (WatcherHandle, mpsc::Receiver<SettledArtifact>) {
    let (tx, rx) = mpsc::channel(64);
    let stop = CancellationToken::new();
    let drain = CancellationToken::new();

    // Registered before returning so the transcoder's first write is seen.
    let notifications = match watch_changes(&dir) {
        Ok(notifications) => Some(notifications),
        Err(e) => {
            tracing::warn!(dir = ?dir, error = %e, "filesystem notifications unavailable, scanning instead");
            None
        }
    };

    let task = tokio::spawn(watch_loop(
        dir,
        settle_interval,
        notifications,
        tx,
        stop.clone(),
        drain.clone(),
    ));

    (WatcherHandle { stop, drain, task }, rx)
}

async fn watch_loop(
    dir: PathBuf,
    settle_interval: Duration,
    notifications: Option<(RecommendedWatcher, Changes)>,
    tx: mpsc::Sender<SettledArtifact>,
    stop: CancellationToken,
    drain: CancellationToken,
) {
    // The watcher is kept alive until the loop exits.
    let (_watcher, mut changes) = match notifications {
        Some((watcher, changes)) => (Some(watcher), Some(changes)),
        None => (None, None),
    };
    let scanning = changes.is_none();

    let mut tracker = SettleTracker::default();
    let mut changed: HashSet<PathBuf> = HashSet::new();
    if let Ok(existing) = list_files(&dir).await {
        changed.extend(
            existing
                .into_iter()
                .map(|(path, _)| path)
                .filter(|path| ArtifactKind::classify(path).is_some()),
        );
    }

    let mut ticker = tokio::time::interval(settle_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::debug!(dir = ?dir, scanning, "watching for artifacts");

    loop {
        let flush = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = drain.cancelled() => true,
            _ = ticker.tick() => false,
            Some(path) = next_change(&mut changes) => {
                if !tracker.has_emitted(&path) {
                    changed.insert(path);
                }
                continue;
            }
        };

        let listing = if flush || scanning {
            match list_files(&dir).await {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::warn!(dir = ?dir, error = %e, "cannot read working directory");
                    break;
                }
            }
        } else {
            stat_files(&changed).await
        };

        for artifact in tracker.observe(listing, flush) {
            tracing::debug!(artifact = %artifact.name(), size = artifact.size_bytes, "artifact settled");
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                sent = tx.send(artifact) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
        changed.retain(|path| !tracker.has_emitted(path));

        if flush {
            break;
        }
    }

    tracing::debug!(dir = ?dir, "watcher stopped");
}
