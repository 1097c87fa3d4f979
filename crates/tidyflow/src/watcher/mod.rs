//! Watcher Service - Detection Pipeline
//!
//! Watches directories, waits for files to settle, and hands settled files to
//! the analyzer and the proposal service.
//!
//! # Architecture
//!
//! ```text
//! notify callback ──► fs channel ─┐
//! WatcherService  ──► commands ───┼──► watch loop (single task)
//!                                 │      ├── StabilityTracker (DelayQueue timers)
//!                                 │      ├── Monitor (native / polling backends)
//!                                 │      └── JoinSet<analysis>
//!                                 └──────────► SharedProposals (tokio Mutex)
//! ```
//!
//! The loop task is the only owner of pending-file state and timers, so
//! events for one path are always handled in arrival order.

mod ignore;
mod monitor;
mod scan;
mod stability;

pub use ignore::{IgnoreSet, DEFAULT_IGNORED_PATTERNS};
pub use monitor::{needs_polling, Monitor, WatchStrategy};
pub use scan::{ScanOptions, ScanSummary};
pub use stability::{FileSnapshot, Observation, Settle, StabilityTracker};

use crate::analyzer::FileAnalyzer;
use crate::audit::{record_or_warn, AuditSink};
use crate::error::{OrganizeError, Result};
use crate::events::{EventBus, OrganizerEvent};
use crate::paths::{is_same_or_inside, normalize_dir, normalize_path};
use crate::proposals::{Proposal, SharedProposals};
use chrono::{DateTime, Utc};
use notify::{Event, EventKind};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default quiet period before a file counts as settled
pub const DEFAULT_STABILITY_DELAY: Duration = Duration::from_millis(500);

/// Default ceiling on how long a changing file is tracked (5 minutes)
pub const DEFAULT_MAX_STABILITY_WAIT: Duration = Duration::from_secs(300);

/// Default poll interval for mounts without native notifications
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Handle shared by the tool layer.
pub type SharedWatcher = Arc<tokio::sync::Mutex<WatcherService>>;

/// A directory in the watch set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedDirectory {
    pub path: PathBuf,
    pub enabled: bool,
    pub recursive: bool,
    pub added_at: DateTime<Utc>,
}

impl WatchedDirectory {
    /// Whether a file at `path` belongs to this directory's watch scope.
    fn covers(&self, path: &Path) -> bool {
        if !self.enabled {
            return false;
        }
        if self.recursive {
            path.starts_with(&self.path) && path != self.path
        } else {
            path.parent() == Some(self.path.as_path())
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub enabled: bool,
    pub recursive: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            recursive: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub stability_delay: Duration,
    pub max_stability_wait: Duration,
    pub poll_interval: Duration,
    pub force_polling: bool,
    pub ignore: IgnoreSet,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stability_delay: DEFAULT_STABILITY_DELAY,
            max_stability_wait: DEFAULT_MAX_STABILITY_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            force_polling: false,
            ignore: IgnoreSet::defaults(),
        }
    }
}

/// Snapshot for `get_watched_directories`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub running: bool,
    pub directories: usize,
    pub enabled_directories: usize,
    pub polling_directories: usize,
    pub tracked_files: usize,
    pub analyses_in_flight: usize,
}

enum Command {
    Watch {
        dir: WatchedDirectory,
        reply: oneshot::Sender<Result<Option<WatchStrategy>>>,
    },
    Unwatch {
        path: PathBuf,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<LoopStatus>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct LoopStatus {
    tracked: usize,
    in_flight: usize,
    polling: usize,
}

struct Running {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Directory watcher and stability detector
pub struct WatcherService {
    config: WatcherConfig,
    directories: Vec<WatchedDirectory>,
    analyzer: Arc<FileAnalyzer>,
    proposals: SharedProposals,
    audit: Arc<dyn AuditSink>,
    events: EventBus,
    running: Option<Running>,
}

impl WatcherService {
    pub fn new(
        config: WatcherConfig,
        analyzer: Arc<FileAnalyzer>,
        proposals: SharedProposals,
        audit: Arc<dyn AuditSink>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            directories: Vec::new(),
            analyzer,
            proposals,
            audit,
            events,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Begin monitoring every enabled directory. No-op when already running.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            debug!("Watcher already running");
            return Ok(());
        }

        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let mut monitor = Monitor::new(fs_tx, self.config.poll_interval, self.config.force_polling);

        for dir in self.directories.iter().filter(|d| d.enabled) {
            if let Err(e) = monitor.watch(&dir.path, dir.recursive) {
                warn!("Failed to watch {}: {}", dir.path.display(), e);
                self.events.emit(OrganizerEvent::Error {
                    path: Some(dir.path.clone()),
                    message: e.to_string(),
                });
            }
        }
        let polling = monitor.polling_count();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let watch_loop = WatchLoop {
            tracker: StabilityTracker::new(
                self.config.stability_delay,
                self.config.max_stability_wait,
            ),
            ignore: self.config.ignore.clone(),
            dirs: self.directories.clone(),
            monitor,
            fs_events: fs_rx,
            commands: cmd_rx,
            shutdown: shutdown.clone(),
            in_flight: HashSet::new(),
            analyses: JoinSet::new(),
            analyzer: self.analyzer.clone(),
            proposals: self.proposals.clone(),
            events: self.events.clone(),
        };
        let handle = tokio::spawn(watch_loop.run());

        self.running = Some(Running {
            commands: cmd_tx,
            shutdown,
            handle,
        });

        let enabled = self.directories.iter().filter(|d| d.enabled).count();
        info!(
            directories = enabled,
            polling, "Watcher started"
        );
        record_or_warn(
            self.audit.as_ref(),
            "Watcher started",
            &format!("{} directories ({} polling)", enabled, polling),
        );
        self.events.emit(OrganizerEvent::WatcherStarted {
            directories: enabled,
            polling,
        });
        Ok(())
    }

    /// Stop monitoring, cancel timers and in-flight analyses. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        running.shutdown.cancel();
        if let Err(e) = running.handle.await {
            warn!("Watch loop ended abnormally: {}", e);
        }

        info!("Watcher stopped");
        record_or_warn(self.audit.as_ref(), "Watcher stopped", "");
        self.events.emit(OrganizerEvent::WatcherStopped);
        Ok(())
    }

    /// Add a directory to the watch set.
    pub async fn add_directory(&mut self, path: &Path, options: WatchOptions) -> Result<WatchedDirectory> {
        let path = normalize_dir(path);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| OrganizeError::DirectoryNotFound(path.clone()))?;
        if !meta.is_dir() {
            return Err(OrganizeError::NotADirectory(path));
        }
        if self.directories.iter().any(|d| d.path == path) {
            return Err(OrganizeError::AlreadyWatched(path));
        }
        self.analyzer
            .resolver()
            .validate_against(std::slice::from_ref(&path))?;

        let dir = WatchedDirectory {
            path: path.clone(),
            enabled: options.enabled,
            recursive: options.recursive,
            added_at: Utc::now(),
        };

        if let Some(running) = &self.running {
            let (reply, rx) = oneshot::channel();
            running
                .commands
                .send(Command::Watch {
                    dir: dir.clone(),
                    reply,
                })
                .map_err(|_| OrganizeError::WatcherNotRunning)?;
            rx.await.map_err(|_| OrganizeError::WatcherNotRunning)??;
        }

        self.directories.push(dir.clone());
        info!(
            recursive = dir.recursive,
            enabled = dir.enabled,
            "Watching directory {}",
            dir.path.display()
        );
        record_or_warn(
            self.audit.as_ref(),
            "Directory added",
            &dir.path.display().to_string(),
        );
        Ok(dir)
    }

    /// Remove a directory from the watch set.
    pub async fn remove_directory(&mut self, path: &Path) -> Result<WatchedDirectory> {
        let path = normalize_dir(path);
        let index = self
            .directories
            .iter()
            .position(|d| d.path == path)
            .ok_or_else(|| OrganizeError::NotWatched(path.clone()))?;
        let dir = self.directories.remove(index);

        if let Some(running) = &self.running {
            let (reply, rx) = oneshot::channel();
            if running
                .commands
                .send(Command::Unwatch {
                    path: dir.path.clone(),
                    reply,
                })
                .is_ok()
            {
                let _ = rx.await;
            }
        }

        info!("Stopped watching directory {}", dir.path.display());
        record_or_warn(
            self.audit.as_ref(),
            "Directory removed",
            &dir.path.display().to_string(),
        );
        Ok(dir)
    }

    /// One-shot scan of `path`, independent of whether it is watched.
    pub async fn scan_directory(&self, path: &Path, options: ScanOptions) -> Result<ScanSummary> {
        let watched = self.watched_paths();
        scan::scan_directory(
            path,
            options,
            scan::ScanContext {
                ignore: &self.config.ignore,
                analyzer: &self.analyzer,
                proposals: &self.proposals,
                watched: &watched,
            },
        )
        .await
    }

    pub fn directories(&self) -> Vec<WatchedDirectory> {
        self.directories.clone()
    }

    pub async fn status(&self) -> WatcherStatus {
        let mut status = WatcherStatus {
            running: self.running.is_some(),
            directories: self.directories.len(),
            enabled_directories: self.directories.iter().filter(|d| d.enabled).count(),
            ..WatcherStatus::default()
        };

        if let Some(running) = &self.running {
            let (reply, rx) = oneshot::channel();
            if running.commands.send(Command::Status { reply }).is_ok() {
                if let Ok(live) = rx.await {
                    status.tracked_files = live.tracked;
                    status.analyses_in_flight = live.in_flight;
                    status.polling_directories = live.polling;
                }
            }
        }
        status
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn watched_paths(&self) -> Vec<PathBuf> {
        self.directories.iter().map(|d| d.path.clone()).collect()
    }
}

impl Drop for WatcherService {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}

// ============================================================================
// Watch loop
// ============================================================================

type AnalysisOutcome = (PathBuf, std::result::Result<Option<Proposal>, String>);

struct WatchLoop {
    tracker: StabilityTracker,
    ignore: IgnoreSet,
    dirs: Vec<WatchedDirectory>,
    monitor: Monitor,
    fs_events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    in_flight: HashSet<PathBuf>,
    analyses: JoinSet<AnalysisOutcome>,
    analyzer: Arc<FileAnalyzer>,
    proposals: SharedProposals,
    events: EventBus,
}

impl WatchLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(command) = self.commands.recv() => self.handle_command(command),

                Some(event) = self.fs_events.recv() => self.handle_fs_event(event).await,

                Some(path) = self.tracker.next_due(), if !self.tracker.is_idle() => {
                    self.on_timer(path).await;
                }

                Some(joined) = self.analyses.join_next(), if !self.analyses.is_empty() => {
                    self.on_analysis_done(joined);
                }
            }
        }

        self.tracker.clear();
        self.analyses.abort_all();
        while self.analyses.join_next().await.is_some() {}
        debug!("Watch loop exited");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Watch { dir, reply } => {
                let result = if dir.enabled {
                    self.monitor.watch(&dir.path, dir.recursive).map(Some)
                } else {
                    Ok(None)
                };
                if result.is_ok() {
                    self.dirs.push(dir);
                }
                let _ = reply.send(result);
            }
            Command::Unwatch { path, reply } => {
                if let Err(e) = self.monitor.unwatch(&path) {
                    warn!("Failed to unwatch {}: {}", path.display(), e);
                }
                self.dirs.retain(|d| d.path != path);
                let dropped = self.tracker.forget_under(&path);
                if !dropped.is_empty() {
                    debug!("Dropped {} tracked files under {}", dropped.len(), path.display());
                }
                let _ = reply.send(());
            }
            Command::Status { reply } => {
                let _ = reply.send(LoopStatus {
                    tracked: self.tracker.len(),
                    in_flight: self.in_flight.len(),
                    polling: self.monitor.polling_count(),
                });
            }
        }
    }

    async fn handle_fs_event(&mut self, event: notify::Result<Event>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("Filesystem watch error: {}", e);
                self.events.emit(OrganizerEvent::Error {
                    path: e.paths.first().cloned(),
                    message: e.to_string(),
                });
                return;
            }
        };

        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        for raw in &event.paths {
            let path = normalize_path(raw);
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {
                    self.on_changed(&path, FileSnapshot::from_metadata(&meta)).await;
                }
                Ok(_) => {}
                // Stat failures are treated as removal.
                Err(_) => self.on_removed(&path).await,
            }
        }
    }

    async fn on_changed(&mut self, path: &Path, snapshot: FileSnapshot) {
        if !self.dirs.iter().any(|d| d.covers(path)) {
            return;
        }
        if self.ignore.is_ignored(path) || self.in_flight.contains(path) {
            return;
        }
        if is_same_or_inside(path, self.analyzer.resolver().base_path()) {
            return;
        }

        if self.tracker.contains(path) {
            match self.tracker.observe(path, snapshot) {
                Observation::Forced => {
                    debug!("{} kept changing past the max wait, analyzing now", path.display());
                    self.launch_analysis(path.to_path_buf());
                }
                Observation::Rescheduled => debug!("{} changed, rescheduled check", path.display()),
                Observation::Started | Observation::Unchanged => {}
            }
            return;
        }

        {
            let proposals = self.proposals.lock().await;
            if proposals.has_pending_for_path(path) || proposals.is_on_cooldown(path) {
                return;
            }
        }

        if self.tracker.observe(path, snapshot) == Observation::Started {
            debug!("Tracking {}", path.display());
            self.events.emit(OrganizerEvent::FileDetected {
                path: path.to_path_buf(),
            });
        }
    }

    async fn on_removed(&mut self, path: &Path) {
        self.tracker.forget(path);
        self.tracker.forget_under(path);

        let mut proposals = self.proposals.lock().await;
        for id in proposals.pending_under(path) {
            if let Err(e) = proposals.invalidate(&id, "source file was deleted") {
                warn!("{}", e);
            }
        }
    }

    async fn on_timer(&mut self, path: PathBuf) {
        let current = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(FileSnapshot::from_metadata(&meta)),
            _ => None,
        };

        match self.tracker.settle(&path, current) {
            Settle::Stable => self.launch_analysis(path),
            Settle::Forced => {
                debug!("{} still changing past the max wait, analyzing now", path.display());
                self.launch_analysis(path);
            }
            Settle::Rearmed => debug!("{} changed since last event, re-armed", path.display()),
            Settle::Gone => self.on_removed(&path).await,
            Settle::Untracked => {}
        }
    }

    fn launch_analysis(&mut self, path: PathBuf) {
        if !self.in_flight.insert(path.clone()) {
            return;
        }
        self.events.emit(OrganizerEvent::FileStable { path: path.clone() });

        let analyzer = self.analyzer.clone();
        let proposals = self.proposals.clone();
        let watched: Vec<PathBuf> = self.dirs.iter().map(|d| d.path.clone()).collect();
        self.analyses.spawn(async move {
            let outcome = analyze_and_propose(&analyzer, &proposals, &path, &watched).await;
            (path, outcome)
        });
    }

    fn on_analysis_done(&mut self, joined: std::result::Result<AnalysisOutcome, tokio::task::JoinError>) {
        match joined {
            Ok((path, outcome)) => {
                self.in_flight.remove(&path);
                match outcome {
                    Ok(Some(proposal)) => debug!(
                        id = %proposal.id,
                        "Proposed {}",
                        proposal.describe()
                    ),
                    Ok(None) => debug!("No proposal for {}", path.display()),
                    Err(message) => {
                        warn!("Analysis failed for {}: {}", path.display(), message);
                        self.events.emit(OrganizerEvent::Error {
                            path: Some(path),
                            message,
                        });
                    }
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                // The path stays marked in flight; a restart clears it.
                warn!("Analysis task panicked: {}", e);
            }
        }
    }
}

async fn analyze_and_propose(
    analyzer: &FileAnalyzer,
    proposals: &SharedProposals,
    path: &Path,
    watched: &[PathBuf],
) -> std::result::Result<Option<Proposal>, String> {
    let analysis = match analyzer.analyze(path, watched).await {
        Ok(analysis) => analysis,
        Err(OrganizeError::AlreadyOrganized(_)) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };

    // Deleted while being analyzed.
    if tokio::fs::symlink_metadata(path).await.is_err() {
        return Ok(None);
    }

    proposals
        .lock()
        .await
        .create_from_analysis(&analysis)
        .map_err(|e| e.to_string())
}
