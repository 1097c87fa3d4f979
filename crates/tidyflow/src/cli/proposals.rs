//! `tidyflow proposals` - review and resolve pending proposals

use super::output::{format_age, format_size, print_json, print_table, short_id};
use anyhow::{bail, Result};
use chrono::Utc;
use clap::Subcommand;
use serde_json::{json, Value};
use tidyflow::{Organizer, Proposal};

#[derive(Subcommand, Debug)]
pub enum ProposalsAction {
    /// List proposals (pending by default)
    List {
        /// pending, approved, rejected, invalid, or all
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of proposals to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Approve a proposal and move the file
    Approve {
        /// Proposal ID or unique prefix
        id: String,

        /// Confirm moving a file marked sensitive
        #[arg(long)]
        confirm_sensitive: bool,

        #[arg(long)]
        json: bool,
    },

    /// Reject a proposal; the file is left alone and not proposed again for a while
    Reject {
        /// Proposal ID or unique prefix
        id: String,

        #[arg(long)]
        reason: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Approve every pending proposal
    ApproveAll {
        /// Also approve proposals marked sensitive
        #[arg(long)]
        include_sensitive: bool,

        #[arg(long)]
        json: bool,
    },

    /// Discard every pending proposal without moving anything
    Clear {
        #[arg(long)]
        json: bool,
    },
}

impl ProposalsAction {
    pub fn wants_json(&self) -> bool {
        match self {
            Self::List { json, .. }
            | Self::Approve { json, .. }
            | Self::Reject { json, .. }
            | Self::ApproveAll { json, .. }
            | Self::Clear { json } => *json,
        }
    }
}

pub async fn run(action: ProposalsAction, organizer: &Organizer) -> Result<()> {
    match action {
        ProposalsAction::List {
            status,
            limit,
            json,
        } => {
            let mut args = json!({ "limit": limit });
            if let Some(status) = status {
                args["status"] = Value::String(status);
            }
            let out = organizer.call_tool("list_proposals", args).await?;
            if json {
                return print_json(&out);
            }
            print_proposals(&out)
        }

        ProposalsAction::Approve {
            id,
            confirm_sensitive,
            json,
        } => {
            let id = resolve_id(organizer, &id).await?;
            let out = organizer
                .call_tool(
                    "approve_proposal",
                    json!({ "id": id, "confirm_sensitive": confirm_sensitive }),
                )
                .await?;
            if json {
                return print_json(&out);
            }
            println!(
                "{}: {} -> {}",
                out["action"].as_str().unwrap_or("move"),
                out["sourcePath"].as_str().unwrap_or_default(),
                out["destinationPath"].as_str().unwrap_or_default()
            );
            Ok(())
        }

        ProposalsAction::Reject { id, reason, json } => {
            let id = resolve_id(organizer, &id).await?;
            let out = organizer
                .call_tool("reject_proposal", json!({ "id": id, "reason": reason }))
                .await?;
            if json {
                return print_json(&out);
            }
            println!(
                "Rejected {} (not proposed again until {})",
                out["filename"].as_str().unwrap_or_default(),
                out["cooldownUntil"].as_str().unwrap_or_default()
            );
            Ok(())
        }

        ProposalsAction::ApproveAll {
            include_sensitive,
            json,
        } => {
            let out = organizer
                .call_tool(
                    "approve_all_proposals",
                    json!({ "include_sensitive": include_sensitive }),
                )
                .await?;
            if json {
                return print_json(&out);
            }
            println!(
                "Approved {}, skipped {}, failed {}",
                out["approved"], out["skipped"], out["failed"]
            );
            if let Some(errors) = out["errors"].as_array() {
                for error in errors {
                    println!("  ! {}", error.as_str().unwrap_or_default());
                }
            }
            Ok(())
        }

        ProposalsAction::Clear { json } => {
            let out = organizer.call_tool("clear_all_proposals", json!({})).await?;
            if json {
                return print_json(&out);
            }
            println!("Cleared {} pending proposals", out["cleared"]);
            Ok(())
        }
    }
}

fn print_proposals(out: &Value) -> Result<()> {
    let proposals: Vec<Proposal> = serde_json::from_value(out["proposals"].clone())?;
    if proposals.is_empty() {
        println!("No proposals.");
        return Ok(());
    }

    let now = Utc::now();
    let rows: Vec<Vec<String>> = proposals
        .iter()
        .map(|p| {
            vec![
                short_id(p.id.as_ref()).to_string(),
                p.source_filename.clone(),
                format_size(p.source_size),
                p.category.clone(),
                p.confidence.to_string(),
                p.destination_path.display().to_string(),
                if p.sensitive { "yes" } else { "" }.to_string(),
                format_age(p.created_at, now),
            ]
        })
        .collect();
    print_table(
        &[
            "ID",
            "File",
            "Size",
            "Category",
            "Confidence",
            "Destination",
            "Sensitive",
            "Age",
        ],
        rows,
    );

    if out["hasMore"].as_bool() == Some(true) {
        println!("Showing {} of {} proposals.", proposals.len(), out["total"]);
    }
    Ok(())
}

/// Expand a unique id prefix to the full proposal id.
async fn resolve_id(organizer: &Organizer, prefix: &str) -> Result<String> {
    let service = organizer.proposals().lock().await;
    let matches: Vec<String> = service
        .list()
        .into_iter()
        .map(|p| p.id.to_string())
        .filter(|id| id.starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [only] => Ok(only.clone()),
        // Let the tool report the unknown id.
        [] => Ok(prefix.to_string()),
        _ => bail!("Ambiguous proposal id '{}' matches {} proposals", prefix, matches.len()),
    }
}
