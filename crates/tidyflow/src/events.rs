//! Events emitted by the watcher and the proposal service
//!
//! Events are broadcast to interested subscribers when state changes occur.
//! Emitting never fails: with no subscribers (or a lagging one) the event is
//! simply dropped for that receiver.

use crate::proposals::ProposalId;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the organizer pipeline
#[derive(Debug, Clone)]
pub enum OrganizerEvent {
    // ========================================================================
    // Watcher Events
    // ========================================================================
    /// The watcher began monitoring
    WatcherStarted { directories: usize, polling: usize },

    /// The watcher shut down
    WatcherStopped,

    /// A file was seen for the first time and is being tracked
    FileDetected { path: PathBuf },

    /// A file stopped changing and was handed to analysis
    FileStable { path: PathBuf },

    // ========================================================================
    // Proposal Events
    // ========================================================================
    ProposalCreated {
        id: ProposalId,
        source_path: PathBuf,
        category: String,
    },

    ProposalApproved {
        id: ProposalId,
        destination_path: PathBuf,
    },

    ProposalRejected {
        id: ProposalId,
        cooldown_until: DateTime<Utc>,
    },

    ProposalInvalidated { id: ProposalId, reason: String },

    ProposalsCleared { count: usize },

    /// A per-file failure that did not stop the pipeline
    Error {
        path: Option<PathBuf>,
        message: String,
    },
}

/// Cloneable broadcast handle for [`OrganizerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrganizerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<OrganizerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to current subscribers.
    pub fn emit(&self, event: OrganizerEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(OrganizerEvent::WatcherStopped);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(OrganizerEvent::FileDetected {
            path: PathBuf::from("/tmp/a.txt"),
        });

        match rx.recv().await.unwrap() {
            OrganizerEvent::FileDetected { path } => assert_eq!(path, PathBuf::from("/tmp/a.txt")),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
