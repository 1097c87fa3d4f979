//! Directory Tools - Manage the Watch Set

use super::{parse_args, OrganizerTool, ToolContext};
use crate::watcher::{WatchOptions, WatchedDirectory, WatcherStatus};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

// ============================================================================
// add_watched_directory
// ============================================================================

pub struct AddWatchedDirectoryTool;

#[derive(Debug, Deserialize)]
struct AddDirectoryArgs {
    path: PathBuf,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddDirectoryResult {
    path: String,
    enabled: bool,
}

#[async_trait]
impl OrganizerTool for AddWatchedDirectoryTool {
    fn name(&self) -> &'static str {
        "add_watched_directory"
    }

    fn description(&self) -> &'static str {
        "Start watching a directory for new files"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to watch"
                },
                "recursive": {
                    "type": "boolean",
                    "default": false
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: AddDirectoryArgs = parse_args(args)?;
        let options = WatchOptions {
            recursive: args.recursive,
            ..WatchOptions::default()
        };

        let dir = ctx
            .watcher
            .lock()
            .await
            .add_directory(&args.path, options)
            .await?;

        let result = AddDirectoryResult {
            path: dir.path.display().to_string(),
            enabled: dir.enabled,
        };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// remove_watched_directory
// ============================================================================

pub struct RemoveWatchedDirectoryTool;

#[derive(Debug, Deserialize)]
struct RemoveDirectoryArgs {
    path: PathBuf,
}

#[async_trait]
impl OrganizerTool for RemoveWatchedDirectoryTool {
    fn name(&self) -> &'static str {
        "remove_watched_directory"
    }

    fn description(&self) -> &'static str {
        "Stop watching a directory; existing proposals are kept"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: RemoveDirectoryArgs = parse_args(args)?;
        let dir = ctx.watcher.lock().await.remove_directory(&args.path).await?;
        Ok(json!({ "path": dir.path.display().to_string() }))
    }
}

// ============================================================================
// get_watched_directories
// ============================================================================

pub struct GetWatchedDirectoriesTool;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchedDirectoriesResult {
    directories: Vec<WatchedDirectory>,
    watcher_status: WatcherStatus,
}

#[async_trait]
impl OrganizerTool for GetWatchedDirectoriesTool {
    fn name(&self) -> &'static str {
        "get_watched_directories"
    }

    fn description(&self) -> &'static str {
        "List watched directories and the watcher's status"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value> {
        let watcher = ctx.watcher.lock().await;
        let result = WatchedDirectoriesResult {
            directories: watcher.directories(),
            watcher_status: watcher.status().await,
        };
        Ok(serde_json::to_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::ToolFixture;
    use super::*;

    #[tokio::test]
    async fn test_add_list_remove() {
        let fx = ToolFixture::new();

        let added = AddWatchedDirectoryTool
            .execute(
                json!({"path": fx.inbox.display().to_string(), "recursive": true}),
                &fx.ctx,
            )
            .await
            .unwrap();
        assert_eq!(added["path"], fx.inbox.display().to_string());
        assert_eq!(added["enabled"], true);

        let listed = GetWatchedDirectoriesTool
            .execute(Value::Null, &fx.ctx)
            .await
            .unwrap();
        let dirs = listed["directories"].as_array().unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0]["recursive"], true);
        assert!(dirs[0]["addedAt"].is_string());
        assert_eq!(listed["watcherStatus"]["running"], false);
        assert_eq!(listed["watcherStatus"]["directories"], 1);

        let removed = RemoveWatchedDirectoryTool
            .execute(json!({"path": fx.inbox.display().to_string()}), &fx.ctx)
            .await
            .unwrap();
        assert_eq!(removed["path"], fx.inbox.display().to_string());
        assert!(fx.ctx.watcher.lock().await.directories().is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_directory_containing_base() {
        let fx = ToolFixture::new();
        let err = AddWatchedDirectoryTool
            .execute(json!({"path": fx.temp.path()}), &fx.ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("re-trigger"));
    }

    #[tokio::test]
    async fn test_remove_unknown_directory() {
        let fx = ToolFixture::new();
        let err = RemoveWatchedDirectoryTool
            .execute(json!({"path": fx.inbox}), &fx.ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not watched"));
    }
}
