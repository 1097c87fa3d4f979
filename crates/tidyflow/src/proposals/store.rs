//! Proposal Store - Durable Proposal State
//!
//! Holds pending proposals and active cooldowns in a single versioned JSON
//! document. Loading never fails: a missing file is an empty store, and an
//! unreadable or unknown-version file is set aside as
//! `<name>.corrupt-<timestamp>` before starting empty.

use super::lock::{StoreLock, StoreLockError};
use super::{Proposal, PROPOSAL_RETENTION_DAYS};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current on-disk schema version
pub const STORE_VERSION: u32 = 1;

/// Persistent shape of the proposal store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreData {
    pub version: u32,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub proposals: Vec<Proposal>,
    /// Source path -> cooldown expiry
    #[serde(default)]
    pub cooldowns: BTreeMap<String, DateTime<Utc>>,
}

impl StoreData {
    pub fn empty() -> Self {
        Self {
            version: STORE_VERSION,
            last_modified: Utc::now(),
            proposals: Vec::new(),
            cooldowns: BTreeMap::new(),
        }
    }
}

impl Default for StoreData {
    fn default() -> Self {
        Self::empty()
    }
}

/// Backend used by the proposal service to load and save its state.
pub trait ProposalPersistence: Send {
    /// Load the last saved state. Never fails; problems degrade to empty.
    fn load(&self) -> StoreData;

    /// Durably replace the saved state.
    fn save(&self, data: &StoreData) -> Result<()>;
}

/// JSON file implementation of [`ProposalPersistence`]
///
/// Holds the store's [`StoreLock`] for as long as any clone is alive.
#[derive(Debug, Clone)]
pub struct ProposalStore {
    path: PathBuf,
    _lock: Option<Arc<StoreLock>>,
}

impl ProposalStore {
    /// Open the store at `path` as its only writer.
    pub fn open(path: PathBuf) -> std::result::Result<Self, StoreLockError> {
        let lock = StoreLock::try_acquire(&path)?;
        Ok(Self {
            path,
            _lock: Some(Arc::new(lock)),
        })
    }

    /// Codec access without taking the lock.
    #[cfg(test)]
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, _lock: None }
    }

    /// Get the store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, json: &str) -> std::result::Result<StoreData, String> {
        let mut value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| format!("invalid JSON: {}", e))?;

        match value.get("version").and_then(|v| v.as_u64()) {
            Some(v) if v == u64::from(STORE_VERSION) => {}
            Some(v) => return Err(format!("unsupported store version {}", v)),
            // Pre-versioned files carry the same fields without the header.
            None if value.get("proposals").is_some() => {
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("version".into(), STORE_VERSION.into());
                    obj.entry("lastModified")
                        .or_insert_with(|| serde_json::json!(Utc::now()));
                }
            }
            None => return Err("missing store version".to_string()),
        }

        serde_json::from_value(value).map_err(|e| format!("invalid store contents: {}", e))
    }

    /// Move a bad store file aside so it is not overwritten.
    fn quarantine(&self) {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "proposals.json".to_string());
        let backup = self.path.with_file_name(format!("{}.corrupt-{}", name, stamp));

        match fs::rename(&self.path, &backup) {
            Ok(()) => warn!("Corrupt proposal store moved to {}", backup.display()),
            Err(e) => warn!(
                "Failed to move corrupt proposal store {} aside: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl ProposalPersistence for ProposalStore {
    fn load(&self) -> StoreData {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No proposal store at {}, starting empty", self.path.display());
                return StoreData::empty();
            }
            Err(e) => {
                warn!(
                    "Failed to read proposal store {}: {}; starting empty",
                    self.path.display(),
                    e
                );
                return StoreData::empty();
            }
        };

        match self.parse(&json) {
            Ok(data) => {
                debug!(
                    "Loaded {} proposals and {} cooldowns from {}",
                    data.proposals.len(),
                    data.cooldowns.len(),
                    self.path.display()
                );
                data
            }
            Err(reason) => {
                warn!(
                    "Proposal store {} is unusable ({}); starting empty",
                    self.path.display(),
                    reason
                );
                self.quarantine();
                StoreData::empty()
            }
        }
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create proposal store directory: {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(data)?;
        atomic_write(&self.path, json.as_bytes())
            .with_context(|| format!("Failed to write proposal store: {}", self.path.display()))?;

        debug!(
            "Saved {} proposals to {}",
            data.proposals.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Atomic write via temp file + fsync + rename
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));

    let written = (|| -> Result<()> {
        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content)
            .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync temp file: {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename temp file to {}", path.display()))?;
        Ok(())
    })();

    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}

/// What [`sanitize_store`] removed from freshly loaded state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SanitizeReport {
    pub(crate) resolved: usize,
    pub(crate) stale: usize,
    pub(crate) duplicates: usize,
    pub(crate) expired_cooldowns: usize,
}

impl SanitizeReport {
    pub(crate) fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Drop cooldowns that expired at or before `now`. Returns how many went.
pub(crate) fn clean_expired_cooldowns(
    cooldowns: &mut BTreeMap<String, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> usize {
    let before = cooldowns.len();
    cooldowns.retain(|_, until| *until > now);
    before - cooldowns.len()
}

/// Restore the store invariants on loaded data.
///
/// Keeps only pending proposals younger than `retention`, at most one per
/// source path (the oldest wins), and only unexpired cooldowns.
pub(crate) fn sanitize_store(
    data: &mut StoreData,
    now: DateTime<Utc>,
    retention: Duration,
) -> SanitizeReport {
    let mut report = SanitizeReport::default();

    let before = data.proposals.len();
    data.proposals.retain(|p| p.is_pending());
    report.resolved = before - data.proposals.len();

    // A window reaching past the earliest representable time keeps everything.
    if let Some(cutoff) = now.checked_sub_signed(retention) {
        let before = data.proposals.len();
        data.proposals.retain(|p| p.created_at >= cutoff);
        report.stale = before - data.proposals.len();
    }

    data.proposals.sort_by_key(|p| p.created_at);
    let mut seen = HashSet::new();
    let before = data.proposals.len();
    data.proposals.retain(|p| seen.insert(p.source_path.clone()));
    report.duplicates = before - data.proposals.len();

    report.expired_cooldowns = clean_expired_cooldowns(&mut data.cooldowns, now);

    if !report.is_clean() {
        info!(
            resolved = report.resolved,
            stale = report.stale,
            duplicates = report.duplicates,
            expired_cooldowns = report.expired_cooldowns,
            "Cleaned proposal store on load"
        );
    }
    report
}

/// Default retention window for pending proposals.
pub(crate) fn default_retention() -> Duration {
    Duration::days(PROPOSAL_RETENTION_DAYS)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classify::Confidence;
    use crate::proposals::{ProposalAction, ProposalId, ProposalStatus};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    pub(crate) fn proposal_at(source: &str, created_at: DateTime<Utc>) -> Proposal {
        let source_path = PathBuf::from(source);
        Proposal {
            id: ProposalId::new(),
            created_at,
            source_filename: source_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            source_path,
            source_size: 1,
            source_mtime: None,
            action: ProposalAction::Move,
            destination_path: PathBuf::from("/organized/Other/file"),
            category: "other".to_string(),
            confidence: Confidence::Low,
            reasoning: "test".to_string(),
            sensitive: false,
            sensitive_reason: None,
            status: ProposalStatus::Pending,
            resolved_at: None,
            execution_error: None,
        }
    }

    /// In-memory backend with a switchable save failure.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryStore {
        pub(crate) data: Arc<Mutex<Option<StoreData>>>,
        pub(crate) fail_saves: Arc<Mutex<bool>>,
    }

    impl ProposalPersistence for MemoryStore {
        fn load(&self) -> StoreData {
            self.data.lock().unwrap().clone().unwrap_or_default()
        }

        fn save(&self, data: &StoreData) -> Result<()> {
            if *self.fail_saves.lock().unwrap() {
                anyhow::bail!("disk full");
            }
            *self.data.lock().unwrap() = Some(data.clone());
            Ok(())
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = ProposalStore::new(temp.path().join("proposals.json"));
        let data = store.load();
        assert!(data.proposals.is_empty());
        assert_eq!(data.version, STORE_VERSION);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = ProposalStore::new(temp.path().join("nested").join("proposals.json"));

        let mut data = StoreData::empty();
        data.proposals.push(proposal_at("/in/a.pdf", Utc::now()));
        data.cooldowns
            .insert("/in/b.pdf".to_string(), Utc::now() + Duration::hours(1));
        store.save(&data).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.proposals, data.proposals);
        assert_eq!(loaded.cooldowns, data.cooldowns);

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(temp.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_quarantined() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("proposals.json");
        fs::write(&path, "{ not json").unwrap();

        let store = ProposalStore::new(path.clone());
        let data = store.load();
        assert!(data.proposals.is_empty());
        assert!(!path.exists());

        let backups: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("proposals.json.corrupt-")
            })
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_future_version_is_quarantined() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("proposals.json");
        fs::write(
            &path,
            r#"{"version":99,"lastModified":"2026-01-01T00:00:00Z","proposals":[],"cooldowns":{}}"#,
        )
        .unwrap();

        let data = ProposalStore::new(path.clone()).load();
        assert!(data.proposals.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_unversioned_file_is_migrated() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("proposals.json");
        let mut legacy = serde_json::to_value(StoreData::empty()).unwrap();
        legacy
            .as_object_mut()
            .unwrap()
            .remove("version");
        legacy["proposals"] =
            serde_json::to_value(vec![proposal_at("/in/a.pdf", Utc::now())]).unwrap();
        fs::write(&path, legacy.to_string()).unwrap();

        let data = ProposalStore::new(path.clone()).load();
        assert_eq!(data.version, STORE_VERSION);
        assert_eq!(data.proposals.len(), 1);
        assert!(path.exists());
    }

    #[test]
    fn test_clean_expired_cooldowns() {
        let now = Utc::now();
        let mut cooldowns = BTreeMap::new();
        cooldowns.insert("/a".to_string(), now - Duration::seconds(1));
        cooldowns.insert("/b".to_string(), now + Duration::hours(1));

        assert_eq!(clean_expired_cooldowns(&mut cooldowns, now), 1);
        assert!(cooldowns.contains_key("/b"));
    }

    #[test]
    fn test_sanitize_restores_invariants() {
        let now = Utc::now();
        let mut data = StoreData::empty();

        let mut resolved = proposal_at("/in/done.pdf", now);
        resolved.status = ProposalStatus::Approved;
        data.proposals.push(resolved);
        data.proposals
            .push(proposal_at("/in/old.pdf", now - Duration::days(31)));
        let newer_dup = proposal_at("/in/dup.pdf", now - Duration::minutes(1));
        let older_dup = proposal_at("/in/dup.pdf", now - Duration::minutes(5));
        data.proposals.push(newer_dup);
        data.proposals.push(older_dup.clone());
        data.cooldowns
            .insert("/in/x.pdf".to_string(), now - Duration::hours(1));

        let report = sanitize_store(&mut data, now, default_retention());
        assert_eq!(report.resolved, 1);
        assert_eq!(report.stale, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.expired_cooldowns, 1);
        assert_eq!(data.proposals, vec![older_dup]);
        assert!(data.cooldowns.is_empty());
    }

    #[test]
    fn test_sanitize_with_unbounded_retention_keeps_everything() {
        let now = Utc::now();
        let mut data = StoreData::empty();
        data.proposals
            .push(proposal_at("/in/ancient.pdf", now - Duration::days(365 * 50)));

        let report = sanitize_store(&mut data, now, Duration::days(365 * 300_000));
        assert_eq!(report.stale, 0);
        assert_eq!(data.proposals.len(), 1);
    }

    #[test]
    fn test_open_holds_the_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("proposals.json");

        let first = ProposalStore::open(path.clone()).unwrap();
        let clone = first.clone();
        drop(first);
        assert!(matches!(
            ProposalStore::open(path.clone()),
            Err(StoreLockError::Held { .. })
        ));

        drop(clone);
        assert!(ProposalStore::open(path).is_ok());
    }
}
