//! Tool Implementations
//!
//! Each tool exposes one organizer capability as JSON in / JSON out.
//! Tools are registered in the ToolRegistry and dispatched by name.
//!
//! # Tool Categories
//!
//! - **Proposals**: list_proposals, approve_proposal, reject_proposal,
//!   approve_all_proposals, clear_all_proposals
//! - **Directories**: add_watched_directory, remove_watched_directory,
//!   get_watched_directories
//!
//! # Human Gates
//!
//! Nothing is moved without `approve_proposal` or `approve_all_proposals`.
//! Sensitive proposals additionally need `confirm_sensitive` /
//! `include_sensitive`.

mod registry;

mod directories;
mod proposals;

pub use registry::ToolRegistry;

use crate::proposals::SharedProposals;
use crate::watcher::SharedWatcher;
use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Tool metadata for listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Shared state handed to every tool call.
///
/// Lock order is watcher before proposals; no tool holds the proposals lock
/// while acquiring the watcher.
#[derive(Clone)]
pub struct ToolContext {
    pub proposals: SharedProposals,
    pub watcher: SharedWatcher,
}

/// Trait for organizer tools
#[async_trait]
pub trait OrganizerTool: Send + Sync {
    /// Tool name (e.g., "list_proposals")
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value>;

    /// Get the tool definition for listings
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Deserialize tool arguments; a missing argument object counts as `{}`.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(args).map_err(|e| anyhow::anyhow!("Invalid arguments: {}", e))
}
