//! CLI module for Tidyflow
//!
//! Proposal and directory commands go through the tool registry so the CLI
//! and any other tool caller share one code path.

pub mod directories;
pub mod output;
pub mod proposals;
pub mod scan;
pub mod watch;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tidyflow::config::default_config_path;
use tidyflow::OrganizerConfig;

/// Resolve and load the config file; a missing file yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<(OrganizerConfig, PathBuf)> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let config = OrganizerConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok((config, path))
}

/// Print an error as `{"error": "..."}` on stdout for `--json` callers.
pub fn print_json_error(err: &anyhow::Error) {
    let body = serde_json::json!({ "error": format!("{:#}", err) });
    println!("{}", body);
}
