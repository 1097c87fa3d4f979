//! Filesystem monitor: native notifications where they work, polling where
//! they don't.
//!
//! Network and VM-shared mounts (9p, drvfs, virtiofs, NFS, SMB, sshfs, ...)
//! accept inotify/FSEvents watches but never deliver events for changes made
//! on the other side. Directories on such mounts are watched with notify's
//! `PollWatcher` instead.

use crate::error::Result;
use notify::{Config, Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Raw notify results forwarded to the watcher task.
pub type FsEventSender = mpsc::UnboundedSender<notify::Result<Event>>;

/// Filesystem types that need polling.
const POLLING_FILESYSTEMS: &[&str] = &[
    "9p",
    "drvfs",
    "virtiofs",
    "vboxsf",
    "nfs",
    "nfs4",
    "cifs",
    "smb3",
    "smbfs",
    "fuse.sshfs",
    "fuse.rclone",
    "fakeowner",
    "grpcfuse",
    "prl_fs",
    "vmhgfs",
    "fuse.vmhgfs-fuse",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStrategy {
    Native,
    Polling,
}

impl fmt::Display for WatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Polling => f.write_str("polling"),
        }
    }
}

/// Owns the notify backends for every watched directory.
pub struct Monitor {
    tx: FsEventSender,
    poll_interval: Duration,
    force_polling: bool,
    native: Option<RecommendedWatcher>,
    polling: Option<PollWatcher>,
    watched: HashMap<PathBuf, WatchStrategy>,
}

impl Monitor {
    pub fn new(tx: FsEventSender, poll_interval: Duration, force_polling: bool) -> Self {
        Self {
            tx,
            poll_interval,
            force_polling,
            native: None,
            polling: None,
            watched: HashMap::new(),
        }
    }

    /// Start watching `dir`. Returns the backend that ended up watching it.
    pub fn watch(&mut self, dir: &Path, recursive: bool) -> Result<WatchStrategy> {
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let wants_polling = self.force_polling || needs_polling(dir);
        if !wants_polling {
            match self.watch_native(dir, mode) {
                Ok(()) => {
                    self.watched.insert(dir.to_path_buf(), WatchStrategy::Native);
                    debug!("Watching {} with native notifications", dir.display());
                    return Ok(WatchStrategy::Native);
                }
                Err(e) => warn!(
                    "Native watching failed for {} ({}), falling back to polling",
                    dir.display(),
                    e
                ),
            }
        }

        if self.polling.is_none() {
            let tx = self.tx.clone();
            let watcher = PollWatcher::new(
                move |res: notify::Result<Event>| {
                    let _ = tx.send(res);
                },
                Config::default().with_poll_interval(self.poll_interval),
            )?;
            self.polling = Some(watcher);
        }
        if let Some(poller) = self.polling.as_mut() {
            poller.watch(dir, mode)?;
        }
        self.watched.insert(dir.to_path_buf(), WatchStrategy::Polling);
        info!(
            "Watching {} by polling every {:?}",
            dir.display(),
            self.poll_interval
        );
        Ok(WatchStrategy::Polling)
    }

    fn watch_native(&mut self, dir: &Path, mode: RecursiveMode) -> notify::Result<()> {
        if self.native.is_none() {
            let tx = self.tx.clone();
            let watcher = RecommendedWatcher::new(
                move |res: notify::Result<Event>| {
                    let _ = tx.send(res);
                },
                Config::default(),
            )?;
            self.native = Some(watcher);
        }
        match self.native.as_mut() {
            Some(watcher) => watcher.watch(dir, mode),
            None => Ok(()),
        }
    }

    /// Stop watching `dir`. Unknown directories are a no-op.
    pub fn unwatch(&mut self, dir: &Path) -> Result<()> {
        let result = match self.watched.remove(dir) {
            Some(WatchStrategy::Native) => self.native.as_mut().map(|w| w.unwatch(dir)),
            Some(WatchStrategy::Polling) => self.polling.as_mut().map(|w| w.unwatch(dir)),
            None => None,
        };
        match result {
            // The directory itself may already be gone.
            Some(Err(e)) => debug!("Unwatch of {} reported: {}", dir.display(), e),
            _ => debug!("Stopped watching {}", dir.display()),
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn strategy_for(&self, dir: &Path) -> Option<WatchStrategy> {
        self.watched.get(dir).copied()
    }

    pub fn polling_count(&self) -> usize {
        self.watched
            .values()
            .filter(|s| **s == WatchStrategy::Polling)
            .count()
    }
}

/// True when `dir` sits on a filesystem that does not deliver native events.
pub fn needs_polling(dir: &Path) -> bool {
    #[cfg(target_os = "linux")]
    {
        let version = std::fs::read_to_string("/proc/version").unwrap_or_default();
        if is_wsl_drive_mount(dir, &version) {
            return true;
        }
        if let Ok(mounts) = std::fs::read_to_string("/proc/self/mounts") {
            let mounts = parse_mounts(&mounts);
            if let Some(mount) = mount_for(dir, &mounts) {
                return is_polling_filesystem(&mount.fs_type);
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = dir;
    false
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
}

/// Parse `/proc/self/mounts` lines: `device mount_point fs_type options ...`.
pub(crate) fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Longest mount point containing `path`.
pub(crate) fn mount_for<'a>(path: &Path, mounts: &'a [MountEntry]) -> Option<&'a MountEntry> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.components().count())
}

pub(crate) fn is_polling_filesystem(fs_type: &str) -> bool {
    POLLING_FILESYSTEMS.contains(&fs_type)
}

/// `/mnt/c/...` under WSL is a Windows drive reached through drvfs/9p.
pub(crate) fn is_wsl_drive_mount(path: &Path, proc_version: &str) -> bool {
    if !proc_version.to_lowercase().contains("microsoft") {
        return false;
    }
    let parts: Vec<String> = path
        .components()
        .skip(1)
        .take(2)
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    matches!(
        parts.as_slice(),
        [mnt, drive] if mnt == "mnt" && drive.len() == 1 && drive.chars().all(|c| c.is_ascii_alphabetic())
    )
}

/// Decode the octal escapes the kernel uses for spaces and the like.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(octal, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid 0 0
/dev/sda1 / ext4 rw,relatime 0 0
C:\\134 /mnt/c 9p rw,dirsync 0 0
server:/export /srv/nfs nfs4 rw 0 0
/dev/sdb1 /srv/nfs/local ext4 rw 0 0
host /home/me/My\\040Share vboxsf rw 0 0
grpcfuse /host_mnt grpcfuse rw 0 0
";

    #[test]
    fn test_parse_mounts() {
        let mounts = parse_mounts(MOUNTS);
        assert_eq!(mounts.len(), 7);
        assert_eq!(mounts[2].mount_point, PathBuf::from("/mnt/c"));
        assert_eq!(mounts[5].mount_point, PathBuf::from("/home/me/My Share"));
        assert_eq!(mounts[5].fs_type, "vboxsf");
    }

    #[test]
    fn test_longest_mount_wins() {
        let mounts = parse_mounts(MOUNTS);
        let fs = |p: &str| mount_for(Path::new(p), &mounts).map(|m| m.fs_type.clone());
        assert_eq!(fs("/srv/nfs/data/file.txt").as_deref(), Some("nfs4"));
        assert_eq!(fs("/srv/nfs/local/file.txt").as_deref(), Some("ext4"));
        assert_eq!(fs("/home/me/My Share/doc.pdf").as_deref(), Some("vboxsf"));
        assert_eq!(fs("/srv/nfsish").as_deref(), Some("ext4"));
    }

    #[test]
    fn test_polling_filesystems() {
        assert!(is_polling_filesystem("9p"));
        assert!(is_polling_filesystem("fuse.sshfs"));
        assert!(is_polling_filesystem("grpcfuse"));
        assert!(!is_polling_filesystem("ext4"));
        assert!(!is_polling_filesystem("apfs"));
    }

    #[test]
    fn test_wsl_drive_detection() {
        let wsl = "Linux version 5.15.90.1-microsoft-standard-WSL2";
        assert!(is_wsl_drive_mount(Path::new("/mnt/c/Users/me/Downloads"), wsl));
        assert!(is_wsl_drive_mount(Path::new("/mnt/d"), wsl));
        assert!(!is_wsl_drive_mount(Path::new("/mnt/data"), wsl));
        assert!(!is_wsl_drive_mount(Path::new("/home/me"), wsl));
        assert!(!is_wsl_drive_mount(
            Path::new("/mnt/c/Users"),
            "Linux version 6.1.0-generic"
        ));
    }

    #[tokio::test]
    async fn test_forced_polling_watch_and_unwatch() {
        let temp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut monitor = Monitor::new(tx, Duration::from_millis(50), true);

        let strategy = monitor.watch(temp.path(), false).unwrap();
        assert_eq!(strategy, WatchStrategy::Polling);
        assert_eq!(monitor.polling_count(), 1);
        assert_eq!(monitor.strategy_for(temp.path()), Some(WatchStrategy::Polling));

        monitor.unwatch(temp.path()).unwrap();
        assert_eq!(monitor.strategy_for(temp.path()), None);
        // Unknown directory
        monitor.unwatch(Path::new("/definitely/not/watched")).unwrap();
    }
}
