//! Configuration for the organizer

use crate::analyzer::AnalyzerConfig;
use crate::destination::DestinationResolver;
use crate::error::{OrganizeError, Result};
use crate::proposals::{ProposalSettings, MAX_COOLDOWN_HOURS, MAX_RETENTION_DAYS};
use crate::watcher::{IgnoreSet, WatcherConfig, DEFAULT_IGNORED_PATTERNS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A directory entry in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedDirectoryConfig {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub recursive: bool,
}

/// Main configuration for the organizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizerConfig {
    /// Directories to watch
    #[serde(default)]
    pub watched_directories: Vec<WatchedDirectoryConfig>,

    /// Root of the organized tree
    #[serde(default = "default_base_path")]
    pub organize_base_path: PathBuf,

    /// Category -> folder overrides (absolute, or relative to the base path)
    #[serde(default)]
    pub category_folders: BTreeMap<String, PathBuf>,

    /// Quiet period before a file counts as settled
    #[serde(default = "default_stability_delay_ms")]
    pub stability_delay_ms: u64,

    /// Longest a continuously changing file is tracked before analysis is forced
    #[serde(default = "default_max_stability_wait_ms")]
    pub max_stability_wait_ms: u64,

    /// Poll interval for mounts without native notifications
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Poll every directory regardless of filesystem
    #[serde(default)]
    pub force_polling: bool,

    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: u64,

    #[serde(default = "default_retention_days")]
    pub proposal_retention_days: u64,

    #[serde(default = "default_preview_bytes")]
    pub preview_bytes: usize,

    #[serde(default = "default_classifier_timeout_secs")]
    pub classifier_timeout_secs: u64,

    /// Filename globs that are never proposed
    #[serde(default = "default_ignored_patterns")]
    pub ignored_patterns: Vec<String>,

    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_base_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join("Organized"))
        .unwrap_or_else(|| PathBuf::from("Organized"))
}

fn default_stability_delay_ms() -> u64 {
    500
}

fn default_max_stability_wait_ms() -> u64 {
    300_000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_cooldown_hours() -> u64 {
    24
}

fn default_retention_days() -> u64 {
    30
}

fn default_preview_bytes() -> usize {
    4096
}

fn default_classifier_timeout_secs() -> u64 {
    30
}

fn default_ignored_patterns() -> Vec<String> {
    DEFAULT_IGNORED_PATTERNS.iter().map(|s| s.to_string()).collect()
}

fn default_store_path() -> PathBuf {
    tidyflow_logging::tidyflow_home().join("proposals.json")
}

fn default_audit_log_path() -> PathBuf {
    tidyflow_logging::tidyflow_home().join("audit.jsonl")
}

/// Default config file location (`~/.tidyflow/config.toml`)
pub fn default_config_path() -> PathBuf {
    tidyflow_logging::tidyflow_home().join("config.toml")
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            watched_directories: Vec::new(),
            organize_base_path: default_base_path(),
            category_folders: BTreeMap::new(),
            stability_delay_ms: default_stability_delay_ms(),
            max_stability_wait_ms: default_max_stability_wait_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            force_polling: false,
            cooldown_hours: default_cooldown_hours(),
            proposal_retention_days: default_retention_days(),
            preview_bytes: default_preview_bytes(),
            classifier_timeout_secs: default_classifier_timeout_secs(),
            ignored_patterns: default_ignored_patterns(),
            store_path: default_store_path(),
            audit_log_path: default_audit_log_path(),
        }
    }
}

impl OrganizerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OrganizerConfig =
            toml::from_str(&content).map_err(|e| OrganizeError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| OrganizeError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that could never work.
    ///
    /// The base path and every category override must sit outside every
    /// watched directory, and the ignore patterns must compile.
    pub fn validate(&self) -> Result<()> {
        let watched: Vec<PathBuf> = self
            .watched_directories
            .iter()
            .map(|d| d.path.clone())
            .collect();
        self.resolver().validate_against(&watched)?;
        IgnoreSet::new(&self.ignored_patterns)?;
        if self.stability_delay_ms == 0 {
            return Err(OrganizeError::Config(
                "stability_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.cooldown_hours > MAX_COOLDOWN_HOURS as u64 {
            return Err(OrganizeError::Config(format!(
                "cooldown_hours must be at most {} (10 years)",
                MAX_COOLDOWN_HOURS
            )));
        }
        if self.proposal_retention_days > MAX_RETENTION_DAYS as u64 {
            return Err(OrganizeError::Config(format!(
                "proposal_retention_days must be at most {} (10 years)",
                MAX_RETENTION_DAYS
            )));
        }
        Ok(())
    }

    pub fn resolver(&self) -> DestinationResolver {
        DestinationResolver::new(&self.organize_base_path, &self.category_folders)
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            preview_bytes: self.preview_bytes,
            classifier_timeout: Duration::from_secs(self.classifier_timeout_secs),
        }
    }

    /// Proposal tunables, clamped to the limits [`validate`](Self::validate) enforces.
    pub fn proposal_settings(&self) -> ProposalSettings {
        let hours = i64::try_from(self.cooldown_hours).unwrap_or(i64::MAX);
        let days = i64::try_from(self.proposal_retention_days).unwrap_or(i64::MAX);
        ProposalSettings {
            cooldown: chrono::Duration::hours(hours.min(MAX_COOLDOWN_HOURS)),
            retention: chrono::Duration::days(days.min(MAX_RETENTION_DAYS)),
        }
    }

    pub fn watcher_config(&self) -> Result<WatcherConfig> {
        Ok(WatcherConfig {
            stability_delay: Duration::from_millis(self.stability_delay_ms),
            max_stability_wait: Duration::from_millis(self.max_stability_wait_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            force_polling: self.force_polling,
            ignore: IgnoreSet::new(&self.ignored_patterns)?,
        })
    }
}
