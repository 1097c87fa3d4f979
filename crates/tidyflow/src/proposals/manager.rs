//! Proposal Service - Proposal Lifecycle Management
//!
//! Owns the live proposal index and the cooldown table, applies approved
//! moves, and persists after every state change.

use super::store::{clean_expired_cooldowns, default_retention, sanitize_store};
use super::{
    Proposal, ProposalError, ProposalId, ProposalPersistence, ProposalStatus, StoreData,
    DEFAULT_COOLDOWN_HOURS, MAX_COOLDOWN_HOURS, STORE_VERSION,
};
use crate::analyzer::FileAnalysis;
use crate::audit::{record_or_warn, AuditSink};
use crate::events::{EventBus, OrganizerEvent};
use crate::paths::{is_same_or_inside, normalize_dir, normalize_path};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Result<T> = std::result::Result<T, ProposalError>;

/// Handle shared by the watcher task and the tool layer.
pub type SharedProposals = Arc<tokio::sync::Mutex<ProposalService>>;

/// Tunables for the proposal service
#[derive(Debug, Clone, Copy)]
pub struct ProposalSettings {
    /// How long a rejected source path is suppressed
    pub cooldown: Duration,
    /// Pending proposals older than this are dropped on load
    pub retention: Duration,
}

impl Default for ProposalSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::hours(DEFAULT_COOLDOWN_HOURS),
            retention: default_retention(),
        }
    }
}

/// Result of a successful rejection
#[derive(Debug, Clone)]
pub struct RejectionOutcome {
    pub proposal: Proposal,
    pub cooldown_until: DateTime<Utc>,
}

/// A validated move waiting to run outside the service lock.
///
/// Produced by [`ProposalService::begin_approve`]; hand the result of
/// [`PendingMove::run`] back to [`ProposalService::finish_approve`].
#[derive(Debug, Clone)]
pub struct PendingMove {
    pub id: ProposalId,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl PendingMove {
    /// Create the destination folder and move the file without overwriting.
    pub fn run(&self) -> io::Result<()> {
        if let Some(parent) = self.destination.parent() {
            fs::create_dir_all(parent)?;
        }
        move_without_overwrite(&self.source, &self.destination)
    }

    /// [`run`](Self::run) on the blocking pool.
    pub async fn run_blocking(self) -> io::Result<()> {
        tokio::task::spawn_blocking(move || self.run())
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("move task failed: {}", e)))?
    }
}

/// Summary of an approve-all pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub approved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    fn tally(&mut self, filename: &str, result: Result<Proposal>) {
        match result {
            Ok(_) => self.approved += 1,
            Err(e @ ProposalError::Persist { .. }) => {
                // The move happened; only the save failed.
                self.approved += 1;
                self.errors.push(format!("{}: {}", filename, e));
            }
            Err(e) => {
                self.failed += 1;
                self.errors.push(format!("{}: {}", filename, e));
            }
        }
    }

    fn log(&self) {
        info!(
            approved = self.approved,
            skipped = self.skipped,
            failed = self.failed,
            "Approve-all finished"
        );
    }
}

/// Approve through the shared handle, releasing the lock while the file moves.
pub async fn approve_shared(
    proposals: &SharedProposals,
    id: &ProposalId,
    confirm_sensitive: bool,
) -> Result<Proposal> {
    let job = proposals.lock().await.begin_approve(id, confirm_sensitive)?;
    let moved = job.run_blocking().await;
    proposals.lock().await.finish_approve(id, moved)
}

/// [`ProposalService::approve_all`] with each move run outside the lock.
pub async fn approve_all_shared(proposals: &SharedProposals, include_sensitive: bool) -> BatchOutcome {
    let (queue, mut outcome) = proposals.lock().await.approval_queue(include_sensitive);
    for (id, filename) in queue {
        let result = approve_shared(proposals, &id, include_sensitive).await;
        outcome.tally(&filename, result);
    }
    outcome.log();
    outcome
}

/// Proposal service for tracking suggested moves
pub struct ProposalService {
    /// Durable backend
    store: Box<dyn ProposalPersistence>,

    settings: ProposalSettings,

    /// Live pending proposals
    proposals: HashMap<ProposalId, Proposal>,

    /// Normalized source path -> pending proposal
    pending_by_path: HashMap<PathBuf, ProposalId>,

    /// Normalized source path -> cooldown expiry
    cooldowns: HashMap<PathBuf, DateTime<Utc>>,

    /// Approved proposals whose file move has not finished yet
    moving: HashSet<ProposalId>,

    audit: Arc<dyn AuditSink>,
    events: EventBus,
}

impl ProposalService {
    /// Create the service and load persisted state.
    pub fn new(
        store: impl ProposalPersistence + 'static,
        settings: ProposalSettings,
        audit: Arc<dyn AuditSink>,
        events: EventBus,
    ) -> Self {
        let mut data = store.load();
        let report = sanitize_store(&mut data, Utc::now(), settings.retention);

        let mut service = Self {
            store: Box::new(store),
            settings,
            proposals: HashMap::new(),
            pending_by_path: HashMap::new(),
            cooldowns: HashMap::new(),
            moving: HashSet::new(),
            audit,
            events,
        };

        for proposal in data.proposals {
            service
                .pending_by_path
                .insert(proposal.source_path.clone(), proposal.id.clone());
            service.proposals.insert(proposal.id.clone(), proposal);
        }
        for (path, until) in data.cooldowns {
            service.cooldowns.insert(PathBuf::from(path), until);
        }

        info!(
            pending = service.proposals.len(),
            cooldowns = service.cooldowns.len(),
            "Proposal service ready"
        );

        if !report.is_clean() {
            if let Err(e) = service.persist("load cleanup") {
                warn!("{}", e);
            }
        }

        service
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a pending proposal for an analyzed file.
    ///
    /// Returns `Ok(None)` when the path already has a pending proposal or is
    /// on cooldown.
    pub fn create_from_analysis(&mut self, analysis: &FileAnalysis) -> Result<Option<Proposal>> {
        let key = normalize_path(&analysis.path);

        if self.pending_by_path.contains_key(&key) {
            debug!("Pending proposal already exists for {}", key.display());
            return Ok(None);
        }
        if self.check_cooldown(&key) {
            debug!("{} is on cooldown, not proposing", key.display());
            return Ok(None);
        }

        let proposal = Proposal::from_analysis(analysis, key.clone());
        self.pending_by_path.insert(key, proposal.id.clone());
        self.proposals.insert(proposal.id.clone(), proposal.clone());

        info!(
            id = %proposal.id,
            category = %proposal.category,
            confidence = %proposal.confidence,
            sensitive = proposal.sensitive,
            "Created proposal: {}",
            proposal.describe()
        );
        record_or_warn(
            self.audit.as_ref(),
            "Proposal created",
            &format!(
                "{} ({}, {} confidence)",
                proposal.describe(),
                proposal.category,
                proposal.confidence
            ),
        );
        self.events.emit(OrganizerEvent::ProposalCreated {
            id: proposal.id.clone(),
            source_path: proposal.source_path.clone(),
            category: proposal.category.clone(),
        });

        self.persist("create")?;
        Ok(Some(proposal))
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Approve a proposal and move the file.
    ///
    /// Runs the move on the calling thread; [`approve_shared`] does the same
    /// without holding the service lock during file IO.
    pub fn approve(&mut self, id: &ProposalId, confirm_sensitive: bool) -> Result<Proposal> {
        let job = self.begin_approve(id, confirm_sensitive)?;
        let moved = job.run();
        self.finish_approve(id, moved)
    }

    /// Validate an approval and reserve the proposal for its move.
    ///
    /// While reserved the proposal cannot be approved again, rejected,
    /// invalidated, or cleared.
    pub fn begin_approve(&mut self, id: &ProposalId, confirm_sensitive: bool) -> Result<PendingMove> {
        let proposal = self.pending(id)?;

        if proposal.sensitive && !confirm_sensitive {
            return Err(ProposalError::SensitiveNotConfirmed(id.clone()));
        }

        let source = proposal.source_path.clone();
        let destination = proposal.destination_path.clone();

        if fs::symlink_metadata(&source).is_err() {
            if let Err(e) = self.invalidate(id, "source file no longer exists") {
                warn!("{}", e);
            }
            return Err(ProposalError::SourceMissing(source));
        }
        if fs::symlink_metadata(&destination).is_ok() {
            return Err(ProposalError::DestinationExists(destination));
        }

        self.moving.insert(id.clone());
        Ok(PendingMove {
            id: id.clone(),
            source,
            destination,
        })
    }

    /// Record the outcome of a move started by [`begin_approve`](Self::begin_approve).
    ///
    /// A failed move releases the reservation and leaves the proposal pending.
    pub fn finish_approve(&mut self, id: &ProposalId, moved: io::Result<()>) -> Result<Proposal> {
        self.moving.remove(id);

        if let Err(e) = moved {
            let proposal = self
                .proposals
                .get(id)
                .ok_or_else(|| ProposalError::NotFound(id.clone()))?;
            let (from, to) = (
                proposal.source_path.clone(),
                proposal.destination_path.clone(),
            );
            return Err(if e.kind() == io::ErrorKind::AlreadyExists {
                ProposalError::DestinationExists(to)
            } else {
                ProposalError::MoveFailed { from, to, source: e }
            });
        }

        let mut proposal = self.remove_live(id)?;
        proposal.status = ProposalStatus::Approved;
        proposal.resolved_at = Some(Utc::now());

        info!(id = %proposal.id, "Approved proposal: {}", proposal.describe());
        record_or_warn(
            self.audit.as_ref(),
            "Proposal approved",
            &format!("{} {}", proposal.action.past_tense(), proposal.describe()),
        );
        self.events.emit(OrganizerEvent::ProposalApproved {
            id: proposal.id.clone(),
            destination_path: proposal.destination_path.clone(),
        });

        self.persist("approve")?;
        Ok(proposal)
    }

    /// Reject a proposal and put its source path on cooldown.
    pub fn reject(&mut self, id: &ProposalId, reason: Option<&str>) -> Result<RejectionOutcome> {
        self.pending(id)?;

        let mut proposal = self.remove_live(id)?;
        let now = Utc::now();
        let cooldown_until = self.cooldown_expiry(now);
        proposal.status = ProposalStatus::Rejected;
        proposal.resolved_at = Some(now);
        self.cooldowns
            .insert(proposal.source_path.clone(), cooldown_until);

        info!(
            id = %proposal.id,
            until = %cooldown_until,
            "Rejected proposal for {} (reason: {})",
            proposal.source_path.display(),
            reason.unwrap_or("none")
        );
        let mut details = format!(
            "{} (cooldown until {})",
            proposal.source_path.display(),
            cooldown_until.to_rfc3339()
        );
        if let Some(reason) = reason {
            details.push_str(&format!(": {}", reason));
        }
        record_or_warn(self.audit.as_ref(), "Proposal rejected", &details);
        self.events.emit(OrganizerEvent::ProposalRejected {
            id: proposal.id.clone(),
            cooldown_until,
        });

        self.persist("reject")?;
        Ok(RejectionOutcome {
            proposal,
            cooldown_until,
        })
    }

    /// Mark a pending proposal invalid without touching the file.
    ///
    /// Unknown or already resolved ids are a no-op returning `Ok(false)`.
    pub fn invalidate(&mut self, id: &ProposalId, reason: &str) -> Result<bool> {
        if self.moving.contains(id) || !self.proposals.get(id).is_some_and(Proposal::is_pending) {
            return Ok(false);
        }

        let mut proposal = self.remove_live(id)?;
        proposal.status = ProposalStatus::Invalid;
        proposal.resolved_at = Some(Utc::now());
        proposal.execution_error = Some(reason.to_string());

        info!(id = %proposal.id, "Invalidated proposal for {}: {}", proposal.source_path.display(), reason);
        record_or_warn(
            self.audit.as_ref(),
            "Proposal invalidated",
            &format!("{}: {}", proposal.source_path.display(), reason),
        );
        self.events.emit(OrganizerEvent::ProposalInvalidated {
            id: proposal.id.clone(),
            reason: reason.to_string(),
        });

        self.persist("invalidate")?;
        Ok(true)
    }

    /// Invalidate the pending proposal for `path`, if any.
    pub fn invalidate_path(&mut self, path: &Path, reason: &str) -> Result<bool> {
        match self.pending_by_path.get(&normalize_path(path)).cloned() {
            Some(id) => self.invalidate(&id, reason),
            None => Ok(false),
        }
    }

    /// Approve every pending proposal, oldest first.
    ///
    /// Sensitive proposals are skipped unless `include_sensitive`. A failure
    /// on one proposal is recorded and the pass continues.
    pub fn approve_all(&mut self, include_sensitive: bool) -> BatchOutcome {
        let (queue, mut outcome) = self.approval_queue(include_sensitive);
        for (id, filename) in queue {
            let result = self.approve(&id, include_sensitive);
            outcome.tally(&filename, result);
        }
        outcome.log();
        outcome
    }

    /// Pending ids for an approve-all pass, oldest first, with the sensitive
    /// ones already counted as skipped.
    fn approval_queue(&self, include_sensitive: bool) -> (Vec<(ProposalId, String)>, BatchOutcome) {
        let mut pending: Vec<&Proposal> = self
            .proposals
            .values()
            .filter(|p| p.is_pending() && !self.moving.contains(&p.id))
            .collect();
        pending.sort_by_key(|p| p.created_at);

        let mut outcome = BatchOutcome::default();
        let queue = pending
            .into_iter()
            .filter(|p| {
                let skip = p.sensitive && !include_sensitive;
                if skip {
                    outcome.skipped += 1;
                }
                !skip
            })
            .map(|p| (p.id.clone(), p.source_filename.clone()))
            .collect();
        (queue, outcome)
    }

    /// Drop every pending proposal without any file operation.
    ///
    /// Proposals whose approved move is still running are kept.
    pub fn clear_all_pending(&mut self) -> Result<usize> {
        let before = self.proposals.len();
        let moving = &self.moving;
        self.proposals.retain(|id, _| moving.contains(id));
        self.pending_by_path.retain(|_, id| moving.contains(id));
        let count = before - self.proposals.len();
        if count == 0 {
            return Ok(0);
        }

        info!("Cleared {} pending proposals", count);
        record_or_warn(
            self.audit.as_ref(),
            "Proposals cleared",
            &format!("{} pending proposals discarded", count),
        );
        self.events.emit(OrganizerEvent::ProposalsCleared { count });

        self.persist("clear")?;
        Ok(count)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All live proposals, newest first.
    pub fn list(&self) -> Vec<Proposal> {
        let mut proposals: Vec<Proposal> = self.proposals.values().cloned().collect();
        proposals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        proposals
    }

    pub fn list_by_status(&self, status: ProposalStatus) -> Vec<Proposal> {
        self.list()
            .into_iter()
            .filter(|p| p.status == status)
            .collect()
    }

    pub fn get(&self, id: &ProposalId) -> Option<Proposal> {
        self.proposals.get(id).cloned()
    }

    pub fn get_by_source_path(&self, path: &Path) -> Option<Proposal> {
        self.pending_by_path
            .get(&normalize_path(path))
            .and_then(|id| self.proposals.get(id))
            .cloned()
    }

    pub fn has_pending_for_path(&self, path: &Path) -> bool {
        self.pending_by_path.contains_key(&normalize_path(path))
    }

    /// True while a rejection cooldown for `path` has not expired.
    pub fn is_on_cooldown(&self, path: &Path) -> bool {
        self.cooldowns
            .get(&normalize_path(path))
            .is_some_and(|until| *until > Utc::now())
    }

    /// Ids of pending proposals whose source lies at or under `dir`.
    pub fn pending_under(&self, dir: &Path) -> Vec<ProposalId> {
        let dir = normalize_dir(dir);
        self.pending_by_path
            .iter()
            .filter(|(path, _)| is_same_or_inside(path, &dir))
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.proposals.len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn pending(&self, id: &ProposalId) -> Result<&Proposal> {
        let proposal = self
            .proposals
            .get(id)
            .ok_or_else(|| ProposalError::NotFound(id.clone()))?;
        if proposal.status.is_terminal() {
            return Err(ProposalError::AlreadyResolved {
                id: id.clone(),
                status: proposal.status,
            });
        }
        if self.moving.contains(id) {
            return Err(ProposalError::MoveInProgress(id.clone()));
        }
        Ok(proposal)
    }

    fn remove_live(&mut self, id: &ProposalId) -> Result<Proposal> {
        let proposal = self
            .proposals
            .remove(id)
            .ok_or_else(|| ProposalError::NotFound(id.clone()))?;
        if self.pending_by_path.get(&proposal.source_path) == Some(id) {
            self.pending_by_path.remove(&proposal.source_path);
        }
        Ok(proposal)
    }

    /// Expiry for a rejection made at `now`, capped at the longest allowed cooldown.
    fn cooldown_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let longest = Duration::hours(MAX_COOLDOWN_HOURS);
        now.checked_add_signed(self.settings.cooldown.min(longest))
            .unwrap_or(now + longest)
    }

    /// Lazily evict an expired cooldown; true while one is active.
    fn check_cooldown(&mut self, key: &Path) -> bool {
        match self.cooldowns.get(key) {
            Some(until) if *until > Utc::now() => true,
            Some(_) => {
                self.cooldowns.remove(key);
                false
            }
            None => false,
        }
    }

    fn snapshot(&self) -> StoreData {
        let mut proposals: Vec<Proposal> = self.proposals.values().cloned().collect();
        proposals.sort_by_key(|p| p.created_at);

        let mut cooldowns = BTreeMap::new();
        for (path, until) in &self.cooldowns {
            match path.to_str() {
                Some(key) => {
                    cooldowns.insert(key.to_string(), *until);
                }
                None => warn!(
                    "Cooldown for non-UTF-8 path {} is kept in memory only",
                    path.display()
                ),
            }
        }
        clean_expired_cooldowns(&mut cooldowns, Utc::now());

        StoreData {
            version: STORE_VERSION,
            last_modified: Utc::now(),
            proposals,
            cooldowns,
        }
    }

    fn persist(&self, operation: &'static str) -> Result<()> {
        self.store
            .save(&self.snapshot())
            .map_err(|e| ProposalError::Persist {
                operation,
                message: format!("{:#}", e),
            })
    }
}

/// Move `from` to `to`, failing rather than replacing an existing file.
///
/// Uses a hard link plus unlink so the destination is claimed atomically;
/// across filesystems it falls back to an exclusive-create copy.
fn move_without_overwrite(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(e);
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            debug!("Hard link failed ({}), copying {} instead", e, from.display());
            copy_exclusive(from, to)?;
            if let Err(e) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(e);
            }
            Ok(())
        }
    }
}

fn copy_exclusive(from: &Path, to: &Path) -> io::Result<()> {
    let mut src = File::open(from)?;
    let mut dst = OpenOptions::new().write(true).create_new(true).open(to)?;

    let copied = io::copy(&mut src, &mut dst).and_then(|_| dst.sync_all());
    if let Err(e) = copied {
        let _ = fs::remove_file(to);
        return Err(e);
    }

    if let Ok(meta) = src.metadata() {
        if let Ok(modified) = meta.modified() {
            let _ = dst.set_modified(modified);
        }
        let _ = fs::set_permissions(to, meta.permissions());
    }
    Ok(())
}
