//! Tool Registry - Tool Discovery and Dispatch
//!
//! Maintains the list of available tools and dispatches calls by name.

use super::*;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Registry of available organizer tools
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn OrganizerTool>>,
}

impl ToolRegistry {
    /// Create a new tool registry with all tools registered
    pub fn new() -> Self {
        let mut registry = Self {
            tools: BTreeMap::new(),
        };

        registry.register(Box::new(proposals::ListProposalsTool));
        registry.register(Box::new(proposals::ApproveProposalTool));
        registry.register(Box::new(proposals::RejectProposalTool));
        registry.register(Box::new(proposals::ApproveAllProposalsTool));
        registry.register(Box::new(proposals::ClearAllProposalsTool));
        registry.register(Box::new(directories::AddWatchedDirectoryTool));
        registry.register(Box::new(directories::RemoveWatchedDirectoryTool));
        registry.register(Box::new(directories::GetWatchedDirectoriesTool));

        debug!("Registered {} tools", registry.tools.len());

        registry
    }

    fn register(&mut self, tool: Box<dyn OrganizerTool>) {
        let name = tool.name().to_string();
        debug!("Registering tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// List all available tools, sorted by name
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .get_tool(name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", name))?;

        debug!(tool = name, "Calling tool");
        tool.execute(args, ctx).await
    }

    pub fn get_tool(&self, name: &str) -> Option<&dyn OrganizerTool> {
        self.tools.get(name).map(|t| t.as_ref())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
