//! Organizer - Service Wiring
//!
//! Builds the proposal service, analyzer, watcher and tool registry from an
//! [`OrganizerConfig`] and hands out the shared handles.

use crate::analyzer::{Classifier, FileAnalyzer};
use crate::audit::{AuditJournal, AuditSink};
use crate::config::OrganizerConfig;
use crate::events::EventBus;
use crate::proposals::{ProposalService, ProposalStore, SharedProposals};
use crate::tools::{ToolContext, ToolRegistry};
use crate::watcher::{SharedWatcher, WatchOptions, WatcherService};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Everything a running organizer needs, wired together
pub struct Organizer {
    config: OrganizerConfig,
    events: EventBus,
    proposals: SharedProposals,
    watcher: SharedWatcher,
    tools: ToolRegistry,
}

impl Organizer {
    /// Build from config, journaling to `audit_log_path`.
    pub async fn new(config: OrganizerConfig) -> Result<Self> {
        let journal = AuditJournal::open(config.audit_log_path.clone())?;
        Self::with_components(config, Arc::new(journal), None).await
    }

    /// Build with an explicit audit sink and optional classifier.
    pub async fn with_components(
        config: OrganizerConfig,
        audit: Arc<dyn AuditSink>,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let events = EventBus::new();
        let proposals: SharedProposals = Arc::new(Mutex::new(ProposalService::new(
            ProposalStore::open(config.store_path.clone())?,
            config.proposal_settings(),
            audit.clone(),
            events.clone(),
        )));

        let mut analyzer = FileAnalyzer::new(config.resolver(), config.analyzer_config());
        if let Some(classifier) = classifier {
            analyzer = analyzer.with_classifier(classifier);
        }

        let mut watcher = WatcherService::new(
            config.watcher_config()?,
            Arc::new(analyzer),
            proposals.clone(),
            audit,
            events.clone(),
        );

        for dir in &config.watched_directories {
            let options = WatchOptions {
                enabled: dir.enabled,
                recursive: dir.recursive,
            };
            if let Err(e) = watcher.add_directory(&dir.path, options).await {
                warn!("Skipping watched directory {}: {}", dir.path.display(), e);
            }
        }

        info!(
            directories = watcher.directories().len(),
            base = %config.organize_base_path.display(),
            "Organizer ready"
        );

        Ok(Self {
            config,
            events,
            proposals,
            watcher: Arc::new(Mutex::new(watcher)),
            tools: ToolRegistry::new(),
        })
    }

    pub fn config(&self) -> &OrganizerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn proposals(&self) -> &SharedProposals {
        &self.proposals
    }

    pub fn watcher(&self) -> &SharedWatcher {
        &self.watcher
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            proposals: self.proposals.clone(),
            watcher: self.watcher.clone(),
        }
    }

    /// Dispatch a tool call by name.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        self.tools.call_tool(name, args, &self.tool_context()).await
    }

    pub async fn start(&self) -> Result<()> {
        self.watcher.lock().await.start().await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.watcher.lock().await.stop().await?;
        Ok(())
    }
}
