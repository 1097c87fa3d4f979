//! Stability detection: a file is settled once its size and mtime stop
//! changing for the configured delay.
//!
//! Every tracked path owns at most one timer in a [`DelayQueue`]. A change
//! before the timer fires resets it (cancel-and-reschedule), so a burst of
//! writes produces a single check. A file that keeps changing for longer than
//! the maximum wait is handed to analysis anyway.

use std::collections::HashMap;
use std::fs::Metadata;
use std::future::poll_fn;
use std::path::{Path, PathBuf};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tokio_util::time::delay_queue::Key;
use tokio_util::time::DelayQueue;

/// Size and mtime observed for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

impl FileSnapshot {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            size: meta.len(),
            mtime: meta.modified().ok(),
        }
    }
}

#[derive(Debug)]
struct PendingFile {
    snapshot: FileSnapshot,
    first_detected_at: Instant,
    /// `None` once the timer has fired and not yet been re-armed.
    timer: Option<Key>,
}

/// Outcome of a filesystem event for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First sighting; a check is scheduled.
    Started,
    /// Same size and mtime as before; nothing to do.
    Unchanged,
    /// Changed; the check was pushed back.
    Rescheduled,
    /// Changed for longer than the maximum wait; analyze now.
    Forced,
}

/// Outcome of a fired timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// Unchanged since the last observation.
    Stable,
    /// Still changing but past the maximum wait.
    Forced,
    /// Changed; a new check is scheduled.
    Rearmed,
    /// The file disappeared.
    Gone,
    /// The path was no longer tracked.
    Untracked,
}

#[derive(Debug)]
pub struct StabilityTracker {
    delay: Duration,
    max_wait: Duration,
    pending: HashMap<PathBuf, PendingFile>,
    timers: DelayQueue<PathBuf>,
}

impl StabilityTracker {
    pub fn new(delay: Duration, max_wait: Duration) -> Self {
        Self {
            delay,
            max_wait,
            pending: HashMap::new(),
            timers: DelayQueue::new(),
        }
    }

    /// Record an add/change event for `path`.
    pub fn observe(&mut self, path: &Path, snapshot: FileSnapshot) -> Observation {
        let delay = self.delay;
        let Some(entry) = self.pending.get_mut(path) else {
            let key = self.timers.insert(path.to_path_buf(), delay);
            self.pending.insert(
                path.to_path_buf(),
                PendingFile {
                    snapshot,
                    first_detected_at: Instant::now(),
                    timer: Some(key),
                },
            );
            return Observation::Started;
        };

        if entry.snapshot == snapshot {
            if entry.timer.is_none() {
                rearm(&mut self.timers, &mut entry.timer, path, delay);
            }
            return Observation::Unchanged;
        }

        if entry.first_detected_at.elapsed() >= self.max_wait {
            self.forget(path);
            return Observation::Forced;
        }

        entry.snapshot = snapshot;
        rearm(&mut self.timers, &mut entry.timer, path, delay);
        Observation::Rescheduled
    }

    /// Decide what a fired timer means given the file's current state.
    pub fn settle(&mut self, path: &Path, current: Option<FileSnapshot>) -> Settle {
        let Some(entry) = self.pending.get_mut(path) else {
            return Settle::Untracked;
        };

        let Some(current) = current else {
            self.forget(path);
            return Settle::Gone;
        };

        if entry.snapshot == current {
            self.forget(path);
            return Settle::Stable;
        }

        if entry.first_detected_at.elapsed() >= self.max_wait {
            self.forget(path);
            return Settle::Forced;
        }

        // A change slipped past the event stream; watch it again.
        entry.snapshot = current;
        rearm(&mut self.timers, &mut entry.timer, path, self.delay);
        Settle::Rearmed
    }

    /// Stop tracking `path`. Returns whether it was tracked.
    pub fn forget(&mut self, path: &Path) -> bool {
        match self.pending.remove(path) {
            Some(entry) => {
                if let Some(key) = entry.timer {
                    self.timers.remove(&key);
                }
                true
            }
            None => false,
        }
    }

    /// Stop tracking every path at or under `dir`.
    pub fn forget_under(&mut self, dir: &Path) -> Vec<PathBuf> {
        let doomed: Vec<PathBuf> = self
            .pending
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect();
        for path in &doomed {
            self.forget(path);
        }
        doomed
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True when no timer is armed.
    pub fn is_idle(&self) -> bool {
        self.timers.is_empty()
    }

    /// Drop all tracking and timers.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.timers.clear();
    }

    fn poll_due(&mut self, cx: &mut Context<'_>) -> Poll<Option<PathBuf>> {
        match self.timers.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let path = expired.into_inner();
                if let Some(entry) = self.pending.get_mut(&path) {
                    entry.timer = None;
                }
                Poll::Ready(Some(path))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Wait for the next timer. Resolves to `None` immediately when idle.
    pub async fn next_due(&mut self) -> Option<PathBuf> {
        poll_fn(|cx| self.poll_due(cx)).await
    }
}

/// Reset the existing timer, or arm a new one if it already fired.
fn rearm(timers: &mut DelayQueue<PathBuf>, timer: &mut Option<Key>, path: &Path, delay: Duration) {
    match timer.take() {
        Some(key) => {
            timers.reset(&key, delay);
            *timer = Some(key);
        }
        None => *timer = Some(timers.insert(path.to_path_buf(), delay)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(size: u64) -> FileSnapshot {
        FileSnapshot { size, mtime: None }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let mut tracker = StabilityTracker::new(ms(500), ms(10_000));
        let path = PathBuf::from("/in/a.pdf");
        let start = Instant::now();

        assert_eq!(tracker.observe(&path, snap(1)), Observation::Started);
        assert_eq!(tracker.next_due().await, Some(path.clone()));
        assert!(start.elapsed() >= ms(500));

        assert_eq!(tracker.settle(&path, Some(snap(1))), Settle::Stable);
        assert!(tracker.is_empty());
        assert!(tracker.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_resets_timer() {
        let mut tracker = StabilityTracker::new(ms(500), ms(10_000));
        let path = PathBuf::from("/in/a.pdf");
        let start = Instant::now();

        tracker.observe(&path, snap(1));
        tokio::time::advance(ms(300)).await;
        assert_eq!(tracker.observe(&path, snap(2)), Observation::Rescheduled);
        assert_eq!(tracker.observe(&path, snap(2)), Observation::Unchanged);

        assert_eq!(tracker.next_due().await, Some(path.clone()));
        assert!(start.elapsed() >= ms(800));
        // Exactly one timer per path
        assert!(tracker.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_forces_analysis() {
        let mut tracker = StabilityTracker::new(ms(100), ms(250));
        let path = PathBuf::from("/in/growing.iso");

        tracker.observe(&path, snap(1));
        tokio::time::advance(ms(80)).await;
        assert_eq!(tracker.observe(&path, snap(2)), Observation::Rescheduled);
        tokio::time::advance(ms(80)).await;
        assert_eq!(tracker.observe(&path, snap(3)), Observation::Rescheduled);
        tokio::time::advance(ms(90)).await;
        assert_eq!(tracker.observe(&path, snap(4)), Observation::Forced);
        assert!(!tracker.contains(&path));
        assert!(tracker.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_change_rearms() {
        let mut tracker = StabilityTracker::new(ms(100), ms(10_000));
        let path = PathBuf::from("/in/a.pdf");

        tracker.observe(&path, snap(1));
        assert_eq!(tracker.next_due().await, Some(path.clone()));
        assert_eq!(tracker.settle(&path, Some(snap(5))), Settle::Rearmed);
        assert!(tracker.contains(&path));

        assert_eq!(tracker.next_due().await, Some(path.clone()));
        assert_eq!(tracker.settle(&path, Some(snap(5))), Settle::Stable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_file() {
        let mut tracker = StabilityTracker::new(ms(100), ms(10_000));
        let path = PathBuf::from("/in/a.pdf");

        tracker.observe(&path, snap(1));
        assert_eq!(tracker.next_due().await, Some(path.clone()));
        assert_eq!(tracker.settle(&path, None), Settle::Gone);
        assert_eq!(tracker.settle(&path, None), Settle::Untracked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_under_directory() {
        let mut tracker = StabilityTracker::new(ms(100), ms(10_000));
        tracker.observe(Path::new("/in/sub/a"), snap(1));
        tracker.observe(Path::new("/in/sub/b"), snap(1));
        tracker.observe(Path::new("/in/subway"), snap(1));

        let forgotten = tracker.forget_under(Path::new("/in/sub"));
        assert_eq!(forgotten.len(), 2);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains(Path::new("/in/subway")));

        tracker.clear();
        assert!(tracker.is_idle());
        assert_eq!(tracker.next_due().await, None);
    }
}
