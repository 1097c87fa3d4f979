//! Proposal Subsystem
//!
//! A proposal is a human-approvable suggestion to move a detected file to its
//! organized destination. Nothing on disk changes until a human approves.
//!
//! # Lifecycle
//!
//! ```text
//!            ┌──────────► approved  (file moved)
//! pending ───┼──────────► rejected  (cooldown registered)
//!            └──────────► invalid   (source vanished / batch cleared)
//! ```
//!
//! Transitions are one-way. A resolved proposal is dropped from the live
//! index as soon as its side effects (move, cooldown, audit) are done, so the
//! durable store only ever holds pending proposals plus cooldowns.
//!
//! # Storage
//!
//! A single JSON document, written atomically after every mutation:
//!
//! ```text
//! ~/.tidyflow/proposals.json
//! {"version":1,"lastModified":"…","proposals":[…],"cooldowns":{"/abs/path":"…"}}
//! ```

mod lock;
mod manager;
mod store;

pub use lock::{lock_path_for, StoreLock, StoreLockError};
pub use manager::{
    approve_all_shared, approve_shared, BatchOutcome, PendingMove, ProposalService,
    ProposalSettings, RejectionOutcome, SharedProposals,
};
pub use store::{ProposalPersistence, ProposalStore, StoreData, STORE_VERSION};

use crate::analyzer::FileAnalysis;
use crate::classify::Confidence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Default cooldown after a rejection (24 hours)
pub const DEFAULT_COOLDOWN_HOURS: i64 = 24;

/// Pending proposals older than this are evicted on load (30 days)
pub const PROPOSAL_RETENTION_DAYS: i64 = 30;

/// Longest accepted rejection cooldown (10 years)
pub const MAX_COOLDOWN_HOURS: i64 = 24 * 3650;

/// Longest accepted retention window (10 years)
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Unique proposal identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalId(pub String);

impl ProposalId {
    /// Create a new random proposal ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ProposalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What approving the proposal does to the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalAction {
    Move,
    Rename,
    MoveAndRename,
}

impl ProposalAction {
    /// Derive the label by comparing parent directories and filenames.
    pub fn classify(source: &Path, destination: &Path) -> Self {
        let same_dir = source.parent() == destination.parent();
        let same_name = source.file_name() == destination.file_name();
        match (same_dir, same_name) {
            (true, _) => Self::Rename,
            (false, true) => Self::Move,
            (false, false) => Self::MoveAndRename,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Rename => "rename",
            Self::MoveAndRename => "move_and_rename",
        }
    }

    /// Past-tense verb for audit text.
    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Move => "Moved",
            Self::Rename => "Renamed",
            Self::MoveAndRename => "Moved and renamed",
        }
    }
}

impl fmt::Display for ProposalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proposal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Awaiting a human decision
    Pending,
    /// File was moved
    Approved,
    /// Human declined; source path is on cooldown
    Rejected,
    /// Source disappeared or the batch was discarded
    Invalid,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Invalid => "invalid",
        }
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "invalid" => Ok(Self::Invalid),
            other => Err(format!("unknown proposal status: {}", other)),
        }
    }
}

/// A suggested move awaiting approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: ProposalId,
    pub created_at: DateTime<Utc>,

    /// Snapshot of the source at detection time
    pub source_path: PathBuf,
    pub source_filename: String,
    pub source_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_mtime: Option<DateTime<Utc>>,

    pub action: ProposalAction,
    pub destination_path: PathBuf,

    pub category: String,
    pub confidence: Confidence,
    pub reasoning: String,

    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive_reason: Option<String>,

    pub status: ProposalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_error: Option<String>,
}

impl Proposal {
    /// Build a pending proposal for an analyzed file.
    ///
    /// `source_path` is the normalized key the proposal is indexed under.
    pub fn from_analysis(analysis: &FileAnalysis, source_path: PathBuf) -> Self {
        let action = ProposalAction::classify(&source_path, &analysis.suggested_destination);
        Self {
            id: ProposalId::new(),
            created_at: Utc::now(),
            source_filename: analysis.filename.clone(),
            source_size: analysis.size,
            source_mtime: analysis.mtime,
            source_path,
            action,
            destination_path: analysis.suggested_destination.clone(),
            category: analysis.suggested_category.clone(),
            confidence: analysis.confidence,
            reasoning: analysis.reasoning.clone(),
            sensitive: analysis.sensitive,
            sensitive_reason: analysis.sensitive_reason.clone(),
            status: ProposalStatus::Pending,
            resolved_at: None,
            execution_error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    /// `source -> destination` for logs and audit text.
    pub fn describe(&self) -> String {
        format!(
            "{} -> {}",
            self.source_path.display(),
            self.destination_path.display()
        )
    }
}

/// Errors surfaced by proposal operations
#[derive(Error, Debug)]
pub enum ProposalError {
    #[error("Proposal not found: {0}")]
    NotFound(ProposalId),

    #[error("Proposal {id} is already {status}")]
    AlreadyResolved { id: ProposalId, status: ProposalStatus },

    #[error("Proposal {0} is already being moved")]
    MoveInProgress(ProposalId),

    #[error("Proposal {0} is marked sensitive; confirm to move it")]
    SensitiveNotConfirmed(ProposalId),

    #[error("Source file no longer exists: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The in-memory transition happened but could not be saved.
    #[error("{operation} applied but the proposal store could not be saved: {message}")]
    Persist {
        operation: &'static str,
        message: String,
    },
}
