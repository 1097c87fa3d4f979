//! Single-writer lock for the proposal store
//!
//! The store is rewritten in full on every change, so two processes saving
//! the same file would silently undo each other's transitions. Whoever opens
//! the store holds an exclusive `fs2` lock on `<store>.lock` until the
//! [`StoreLock`] is dropped; a second opener fails fast with
//! [`StoreLockError::Held`].

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreLockError {
    #[error(
        "Proposal store {} is in use by another tidyflow process{}; \
         stop `tidyflow watch` or review proposals from that process",
        store.display(),
        holder.map(|pid| format!(" (pid {})", pid)).unwrap_or_default()
    )]
    Held { store: PathBuf, holder: Option<u32> },

    #[error("Failed to open lock file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to lock {}: {source}", path.display())]
    Acquire {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Who holds the lock, written into the lock file for the next opener.
#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    since: DateTime<Utc>,
}

/// Exclusive ownership of a proposal store. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

/// `proposals.json` -> `proposals.json.lock`
pub fn lock_path_for(store: &Path) -> PathBuf {
    let mut name = store
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "proposals".into());
    name.push(".lock");
    store.with_file_name(name)
}

impl StoreLock {
    /// Take the lock for `store` without waiting.
    pub fn try_acquire(store: &Path) -> Result<Self, StoreLockError> {
        let path = lock_path_for(store);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreLockError::Open {
                path: path.clone(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| StoreLockError::Open {
                path: path.clone(),
                source,
            })?;

        // Qualified so newer toolchains do not pick the inherent `File` method.
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
                debug!("Proposal store lock {} is held", path.display());
                return Err(StoreLockError::Held {
                    store: store.to_path_buf(),
                    holder: read_holder(&mut file),
                });
            }
            Err(source) => return Err(StoreLockError::Acquire { path, source }),
        }

        if let Err(e) = write_holder(&mut file) {
            debug!("Could not record lock holder in {}: {}", path.display(), e);
        }
        info!("Acquired proposal store lock: {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
        debug!("Released proposal store lock: {}", self.path.display());
    }
}

/// `fs2` reports contention as `WouldBlock` on unix and as the raw
/// lock-violation code on Windows.
fn is_contended(e: &io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_holder(file: &mut File) -> io::Result<()> {
    let holder = LockHolder {
        pid: std::process::id(),
        since: Utc::now(),
    };
    let payload = serde_json::to_vec(&holder).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&payload)?;
    file.sync_data()
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    serde_json::from_str::<LockHolder>(&content).ok().map(|h| h.pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/data/proposals.json")),
            PathBuf::from("/data/proposals.json.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/data/store")),
            PathBuf::from("/data/store.lock")
        );
    }

    #[test]
    fn test_second_opener_is_refused() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("state").join("proposals.json");

        let first = StoreLock::try_acquire(&store).unwrap();
        assert!(first.path().exists());

        match StoreLock::try_acquire(&store) {
            Err(StoreLockError::Held { holder, .. }) => {
                if cfg!(unix) {
                    assert_eq!(holder, Some(std::process::id()));
                }
            }
            other => panic!("expected Held, got {:?}", other),
        }

        drop(first);
        StoreLock::try_acquire(&store).unwrap();
    }

    #[test]
    fn test_held_message_names_the_watcher() {
        let err = StoreLockError::Held {
            store: PathBuf::from("/tmp/proposals.json"),
            holder: Some(42),
        };
        let message = err.to_string();
        assert!(message.contains("(pid 42)"));
        assert!(message.contains("tidyflow watch"));
    }
}
