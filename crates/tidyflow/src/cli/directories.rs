//! `tidyflow dirs` - manage watched directories
//!
//! Changes are applied through the tool layer and then written back to the
//! config file so they survive a restart.

use super::output::{format_age, print_json, print_table};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use serde_json::json;
use std::path::{Path, PathBuf};
use tidyflow::{Organizer, OrganizerConfig, WatchedDirectory, WatchedDirectoryConfig};

#[derive(Subcommand, Debug)]
pub enum DirsAction {
    /// List watched directories
    List {
        #[arg(long)]
        json: bool,
    },

    /// Watch a directory
    Add {
        path: PathBuf,

        /// Include subdirectories
        #[arg(short, long)]
        recursive: bool,

        #[arg(long)]
        json: bool,
    },

    /// Stop watching a directory
    Remove {
        path: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

impl DirsAction {
    pub fn wants_json(&self) -> bool {
        match self {
            Self::List { json } | Self::Add { json, .. } | Self::Remove { json, .. } => *json,
        }
    }
}

pub async fn run(action: DirsAction, organizer: &Organizer, config_path: &Path) -> Result<()> {
    match action {
        DirsAction::List { json } => {
            let out = organizer.call_tool("get_watched_directories", json!({})).await?;
            if json {
                return print_json(&out);
            }
            let dirs: Vec<WatchedDirectory> = organizer.watcher().lock().await.directories();
            if dirs.is_empty() {
                println!("No watched directories. Add one with: tidyflow dirs add <path>");
                return Ok(());
            }
            let now = Utc::now();
            let rows: Vec<Vec<String>> = dirs
                .iter()
                .map(|d| {
                    vec![
                        d.path.display().to_string(),
                        if d.enabled { "yes" } else { "no" }.to_string(),
                        if d.recursive { "yes" } else { "no" }.to_string(),
                        format_age(d.added_at, now),
                    ]
                })
                .collect();
            print_table(&["Path", "Enabled", "Recursive", "Added"], rows);
            Ok(())
        }

        DirsAction::Add {
            path,
            recursive,
            json,
        } => {
            let out = organizer
                .call_tool(
                    "add_watched_directory",
                    json!({ "path": path, "recursive": recursive }),
                )
                .await?;
            save_directories(organizer, config_path).await?;
            if json {
                return print_json(&out);
            }
            println!("Watching {}", out["path"].as_str().unwrap_or_default());
            Ok(())
        }

        DirsAction::Remove { path, json } => {
            let out = organizer
                .call_tool("remove_watched_directory", json!({ "path": path }))
                .await?;
            save_directories(organizer, config_path).await?;
            if json {
                return print_json(&out);
            }
            println!("Stopped watching {}", out["path"].as_str().unwrap_or_default());
            Ok(())
        }
    }
}

/// Write the live watch set back to the config file.
async fn save_directories(organizer: &Organizer, config_path: &Path) -> Result<()> {
    let dirs = organizer.watcher().lock().await.directories();
    let config = OrganizerConfig {
        watched_directories: dirs
            .into_iter()
            .map(|d| WatchedDirectoryConfig {
                path: d.path,
                enabled: d.enabled,
                recursive: d.recursive,
            })
            .collect(),
        ..organizer.config().clone()
    };
    config
        .save(config_path)
        .with_context(|| format!("Failed to save config to {}", config_path.display()))
}
