//! One-shot directory scan.
//!
//! Treats every existing file as freshly detected: no stability wait, but the
//! same ignore, dedup, and cooldown rules as the live watcher.

use super::ignore::IgnoreSet;
use crate::analyzer::FileAnalyzer;
use crate::error::{OrganizeError, Result};
use crate::paths::{is_same_or_inside, normalize_dir};
use crate::proposals::{ProposalError, SharedProposals};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub recursive: bool,
}

/// Result of a scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub files_found: usize,
    pub proposals_created: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Everything a scan needs from the watcher service.
pub(crate) struct ScanContext<'a> {
    pub ignore: &'a IgnoreSet,
    pub analyzer: &'a FileAnalyzer,
    pub proposals: &'a SharedProposals,
    pub watched: &'a [PathBuf],
}

pub(crate) async fn scan_directory(
    dir: &Path,
    options: ScanOptions,
    ctx: ScanContext<'_>,
) -> Result<ScanSummary> {
    let dir = normalize_dir(dir);
    let meta = tokio::fs::metadata(&dir)
        .await
        .map_err(|_| OrganizeError::DirectoryNotFound(dir.clone()))?;
    if !meta.is_dir() {
        return Err(OrganizeError::NotADirectory(dir));
    }

    let base = ctx.analyzer.resolver().base_path().to_path_buf();
    let walk_root = dir.clone();
    let (files, walk_errors) =
        tokio::task::spawn_blocking(move || collect_files(&walk_root, options.recursive, &base))
            .await
            .map_err(|e| OrganizeError::Analysis {
                path: dir.clone(),
                message: format!("scan task failed: {}", e),
            })?;

    let mut summary = ScanSummary {
        files_found: files.len(),
        errors: walk_errors,
        ..ScanSummary::default()
    };

    for path in files {
        if ctx.ignore.is_ignored(&path) {
            summary.skipped += 1;
            continue;
        }
        {
            let proposals = ctx.proposals.lock().await;
            if proposals.has_pending_for_path(&path) || proposals.is_on_cooldown(&path) {
                summary.skipped += 1;
                continue;
            }
        }

        let analysis = match ctx.analyzer.analyze(&path, ctx.watched).await {
            Ok(analysis) => analysis,
            Err(OrganizeError::AlreadyOrganized(_)) => {
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                summary.errors.push(format!("{}: {}", path.display(), e));
                continue;
            }
        };

        match ctx.proposals.lock().await.create_from_analysis(&analysis) {
            Ok(Some(_)) => summary.proposals_created += 1,
            Ok(None) => summary.skipped += 1,
            Err(e @ ProposalError::Persist { .. }) => {
                summary.proposals_created += 1;
                summary.errors.push(format!("{}: {}", path.display(), e));
            }
            Err(e) => summary.errors.push(format!("{}: {}", path.display(), e)),
        }
    }

    info!(
        dir = %dir.display(),
        found = summary.files_found,
        created = summary.proposals_created,
        skipped = summary.skipped,
        errors = summary.errors.len(),
        "Scan complete"
    );
    Ok(summary)
}

/// Regular files under `dir`, skipping anything inside the organized tree.
fn collect_files(dir: &Path, recursive: bool, base: &Path) -> (Vec<PathBuf>, Vec<String>) {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    let mut errors = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_same_or_inside(e.path(), base));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => {
                debug!("Walk error: {}", e);
                errors.push(OrganizeError::from(e).to_string());
            }
        }
    }

    files.sort();
    (files, errors)
}
