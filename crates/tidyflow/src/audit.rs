//! Audit Journal - Human-Readable Record of Organizer Activity
//!
//! Every proposal transition and watcher lifecycle change is recorded through
//! an [`AuditSink`]. Sinks are best-effort: a failing sink is logged and the
//! triggering operation carries on.
//!
//! # Log Format
//!
//! The bundled [`AuditJournal`] writes one JSON object per line:
//! ```json
//! {"ts":"2026-01-21T10:30:00Z","title":"Proposal approved","details":"invoice.pdf -> ~/Organized/Finances/invoice.pdf"}
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, title: &str, details: &str) -> Result<()>;
}

/// Record through a sink, logging instead of propagating failures.
pub fn record_or_warn(sink: &dyn AuditSink, title: &str, details: &str) {
    if let Err(e) = sink.record(title, details) {
        warn!(title, "Audit sink failed: {:#}", e);
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record(&self, _title: &str, _details: &str) -> Result<()> {
        Ok(())
    }
}

/// Append-only JSONL audit journal
#[derive(Debug)]
pub struct AuditJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl AuditJournal {
    /// Open (or create) the journal at `path`
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create audit journal directory: {}", parent.display())
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit journal: {}", path.display()))?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Get the journal file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for AuditJournal {
    fn record(&self, title: &str, details: &str) -> Result<()> {
        let entry = AuditEntry {
            ts: Utc::now(),
            title,
            details,
        };
        let json = serde_json::to_string(&entry).context("Failed to serialize audit entry")?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("Audit journal lock poisoned"))?;
        writeln!(writer, "{}", json).context("Failed to write audit entry")?;
        writer.flush().context("Failed to flush audit journal")?;

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    ts: DateTime<Utc>,
    title: &'a str,
    details: &'a str,
}
