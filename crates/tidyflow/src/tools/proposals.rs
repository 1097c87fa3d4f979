//! Proposal Tools - List, Approve, Reject, Bulk Operations

use super::{parse_args, OrganizerTool, ToolContext};
use crate::proposals::{
    approve_all_shared, approve_shared, Proposal, ProposalId, ProposalStatus,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_LIST_LIMIT: usize = 50;

// ============================================================================
// list_proposals
// ============================================================================

pub struct ListProposalsTool;

#[derive(Debug, Deserialize)]
struct ListProposalsArgs {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListProposalsResult {
    proposals: Vec<Proposal>,
    total: usize,
    has_more: bool,
}

#[async_trait]
impl OrganizerTool for ListProposalsTool {
    fn name(&self) -> &'static str {
        "list_proposals"
    }

    fn description(&self) -> &'static str {
        "List file organization proposals, newest first"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["pending", "approved", "rejected", "invalid", "all"],
                    "default": "pending"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "default": DEFAULT_LIST_LIMIT
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ListProposalsArgs = parse_args(args)?;
        let limit = args.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);

        let service = ctx.proposals.lock().await;
        let proposals = match args.status.as_deref() {
            None => service.list_by_status(ProposalStatus::Pending),
            Some("all") => service.list(),
            Some(status) => service.list_by_status(status.parse().map_err(|e| anyhow!("{}", e))?),
        };
        drop(service);

        let total = proposals.len();
        let result = ListProposalsResult {
            has_more: total > limit,
            proposals: proposals.into_iter().take(limit).collect(),
            total,
        };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// approve_proposal
// ============================================================================

pub struct ApproveProposalTool;

#[derive(Debug, Deserialize)]
struct ApproveProposalArgs {
    id: String,
    #[serde(default)]
    confirm_sensitive: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApproveProposalResult {
    action: String,
    source_path: String,
    destination_path: String,
}

#[async_trait]
impl OrganizerTool for ApproveProposalTool {
    fn name(&self) -> &'static str {
        "approve_proposal"
    }

    fn description(&self) -> &'static str {
        "Approve a pending proposal and move the file to its destination"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Proposal ID"
                },
                "confirm_sensitive": {
                    "type": "boolean",
                    "default": false,
                    "description": "Required to approve a proposal marked sensitive"
                }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ApproveProposalArgs = parse_args(args)?;
        let id = ProposalId::from_string(args.id);

        let proposal = approve_shared(&ctx.proposals, &id, args.confirm_sensitive).await?;

        let result = ApproveProposalResult {
            action: proposal.action.as_str().to_string(),
            source_path: proposal.source_path.display().to_string(),
            destination_path: proposal.destination_path.display().to_string(),
        };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// reject_proposal
// ============================================================================

pub struct RejectProposalTool;

#[derive(Debug, Deserialize)]
struct RejectProposalArgs {
    id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectProposalResult {
    action: &'static str,
    filename: String,
    cooldown_until: String,
}

#[async_trait]
impl OrganizerTool for RejectProposalTool {
    fn name(&self) -> &'static str {
        "reject_proposal"
    }

    fn description(&self) -> &'static str {
        "Reject a pending proposal; the file is not proposed again until the cooldown ends"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Proposal ID"
                },
                "reason": {
                    "type": "string"
                }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: RejectProposalArgs = parse_args(args)?;
        let id = ProposalId::from_string(args.id);

        let outcome = ctx
            .proposals
            .lock()
            .await
            .reject(&id, args.reason.as_deref())?;

        let result = RejectProposalResult {
            action: "rejected",
            filename: outcome.proposal.source_filename,
            cooldown_until: outcome.cooldown_until.to_rfc3339(),
        };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// approve_all_proposals
// ============================================================================

pub struct ApproveAllProposalsTool;

#[derive(Debug, Deserialize)]
struct ApproveAllArgs {
    #[serde(default)]
    include_sensitive: bool,
}

#[async_trait]
impl OrganizerTool for ApproveAllProposalsTool {
    fn name(&self) -> &'static str {
        "approve_all_proposals"
    }

    fn description(&self) -> &'static str {
        "Approve every pending proposal; sensitive ones are skipped unless included"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "include_sensitive": {
                    "type": "boolean",
                    "default": false
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: ApproveAllArgs = parse_args(args)?;
        let outcome = approve_all_shared(&ctx.proposals, args.include_sensitive).await;
        Ok(serde_json::to_value(outcome)?)
    }
}

// ============================================================================
// clear_all_proposals
// ============================================================================

pub struct ClearAllProposalsTool;

#[async_trait]
impl OrganizerTool for ClearAllProposalsTool {
    fn name(&self) -> &'static str {
        "clear_all_proposals"
    }

    fn description(&self) -> &'static str {
        "Discard every pending proposal without touching any file"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value> {
        let cleared = ctx.proposals.lock().await.clear_all_pending()?;
        Ok(json!({ "cleared": cleared }))
    }
}
