//! Tidyflow - Human-Approved File Organization
//!
//! Watches folders, waits for new files to settle, works out where each one
//! belongs, and records a proposal. Nothing moves until a human approves.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  CLI / tool callers  ──►  ToolRegistry (JSON in / JSON out)   │
//! └───────────────────────────────────────────────────────────────┘
//!            │                                  │
//!            ▼                                  ▼
//! ┌─────────────────────────┐      ┌────────────────────────────┐
//! │  WatcherService         │      │  ProposalService           │
//! │  Monitor (native/poll)  │ ───► │  pending index + cooldowns │
//! │  StabilityTracker       │      │  ProposalStore (JSON)      │
//! │  FileAnalyzer           │      │  AuditSink                 │
//! └─────────────────────────┘      └────────────────────────────┘
//!            │                                  │
//!            └──────────────► EventBus ◄────────┘
//! ```
//!
//! # Guarantees
//!
//! 1. **At most one pending proposal per file.** Detection is at-least-once;
//!    duplicates are dropped against the pending index.
//!
//! 2. **No feedback loops.** The organized tree may never sit inside a
//!    watched directory.
//!
//! 3. **Never overwrite.** Approved moves fail rather than replace an
//!    existing file.
//!
//! 4. **Crash safe.** The proposal store is rewritten atomically after every
//!    state change and repaired on load.

pub mod analyzer;
pub mod audit;
pub mod classify;
pub mod config;
pub mod destination;
pub mod error;
pub mod events;
pub mod organizer;
pub mod paths;
pub mod proposals;
pub mod tools;
pub mod watcher;

// Re-exports for convenience
pub use analyzer::{
    AnalysisMethod, Classification, ClassificationContext, Classifier, FileAnalysis, FileAnalyzer,
};
pub use audit::{AuditJournal, AuditSink, NullAudit};
pub use classify::{Confidence, PatternClassifier, PatternMatch};
pub use config::{default_config_path, OrganizerConfig, WatchedDirectoryConfig};
pub use destination::DestinationResolver;
pub use error::{OrganizeError, Result};
pub use events::{EventBus, OrganizerEvent};
pub use organizer::Organizer;
pub use proposals::{
    BatchOutcome, Proposal, ProposalAction, ProposalError, ProposalId, ProposalService,
    ProposalStatus, ProposalStore, SharedProposals,
};
pub use tools::{OrganizerTool, ToolContext, ToolDefinition, ToolRegistry};
pub use watcher::{
    ScanOptions, ScanSummary, SharedWatcher, WatchOptions, WatchedDirectory, WatcherService,
    WatcherStatus,
};
