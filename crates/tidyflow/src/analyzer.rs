//! File Analyzer - Classification Pipeline
//!
//! Turns a settled file into a [`FileAnalysis`]:
//!
//! 1. Filename/extension rules ([`PatternClassifier`])
//! 2. Bounded text preview when the rules are weak or the file is text-like
//! 3. Optional external [`Classifier`] under a timeout
//! 4. Sensitivity heuristics on the name and preview
//! 5. Destination via [`DestinationResolver`]

use crate::classify::{
    categories, check_sensitivity, extension_of, is_text_extension, Confidence, PatternClassifier,
    PatternMatch,
};
use crate::destination::DestinationResolver;
use crate::error::{OrganizeError, Result};
use crate::paths::normalize_path;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Default preview size in bytes
pub const DEFAULT_PREVIEW_BYTES: usize = 4096;

/// Default classifier timeout
pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(30);

/// Input handed to an external classifier
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationContext {
    pub filename: String,
    pub extension: Option<String>,
    pub size: u64,
    pub preview: Option<String>,
    /// Rule names that already matched, best first
    pub pattern_hints: Vec<String>,
}

/// Answer from an external classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: Confidence,
    pub reasoning: String,
}

/// External classification backend (e.g. a language model).
///
/// May be slow or unavailable; failures only cost the analysis its
/// classifier opinion.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, context: &ClassificationContext) -> anyhow::Result<Classification>;
}

/// Which stage produced the chosen category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMethod {
    Pattern,
    Classifier,
    Fallback,
}

impl fmt::Display for AnalysisMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pattern => "pattern",
            Self::Classifier => "classifier",
            Self::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// Result of analyzing one file. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub filename: String,
    pub extension: Option<String>,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub matched_patterns: Vec<String>,
    pub suggested_category: String,
    pub suggested_destination: PathBuf,
    pub confidence: Confidence,
    pub reasoning: String,
    pub sensitive: bool,
    pub sensitive_reason: Option<String>,
    pub analyzed_at: DateTime<Utc>,
    pub analysis_method: AnalysisMethod,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerConfig {
    pub preview_bytes: usize,
    pub classifier_timeout: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            preview_bytes: DEFAULT_PREVIEW_BYTES,
            classifier_timeout: DEFAULT_CLASSIFIER_TIMEOUT,
        }
    }
}

pub struct FileAnalyzer {
    patterns: PatternClassifier,
    resolver: DestinationResolver,
    classifier: Option<Arc<dyn Classifier>>,
    config: AnalyzerConfig,
}

impl FileAnalyzer {
    pub fn new(resolver: DestinationResolver, config: AnalyzerConfig) -> Self {
        Self {
            patterns: PatternClassifier::new(),
            resolver,
            classifier: None,
            config,
        }
    }

    /// Attach an external classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn resolver(&self) -> &DestinationResolver {
        &self.resolver
    }

    /// Analyze `path`, resolving its destination outside every `watched` dir.
    pub async fn analyze(&self, path: &Path, watched: &[PathBuf]) -> Result<FileAnalysis> {
        let path = normalize_path(path);
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(OrganizeError::Analysis {
                path,
                message: "not a regular file".to_string(),
            });
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| OrganizeError::Analysis {
                path: path.clone(),
                message: "path has no filename".to_string(),
            })?;
        let lowered = filename.to_lowercase();
        let extension = extension_of(&lowered).map(str::to_string);

        let mut matches = self.patterns.classify(&filename, None);
        let weak = is_weak(matches.first());
        let text_like = extension.as_deref().map(is_text_extension).unwrap_or(false);

        let preview = if weak || text_like {
            read_preview(&path, self.config.preview_bytes).await
        } else {
            None
        };
        if preview.is_some() {
            matches = self.patterns.classify(&filename, preview.as_deref());
        }

        let classified = if is_weak(matches.first()) {
            let context = ClassificationContext {
                filename: filename.clone(),
                extension: extension.clone(),
                size: meta.len(),
                preview: preview.clone(),
                pattern_hints: matches.iter().map(|m| m.rule.clone()).collect(),
            };
            self.ask_classifier(&context).await
        } else {
            None
        };

        let (category, confidence, reasoning, method) = match (matches.first(), classified) {
            (Some(best), Some(c)) if c.confidence > best.confidence => {
                (c.category, c.confidence, c.reasoning, AnalysisMethod::Classifier)
            }
            (Some(best), _) => (
                best.category.clone(),
                best.confidence,
                best.reasoning.clone(),
                AnalysisMethod::Pattern,
            ),
            (None, Some(c)) => (c.category, c.confidence, c.reasoning, AnalysisMethod::Classifier),
            (None, None) => (
                categories::OTHER.to_string(),
                Confidence::Low,
                "No rule matched this file".to_string(),
                AnalysisMethod::Fallback,
            ),
        };

        let sensitivity = check_sensitivity(&filename, preview.as_deref());
        let destination = self.resolver.resolve(&category, &path, watched)?;

        let analysis = FileAnalysis {
            extension,
            size: meta.len(),
            mtime: meta.modified().ok().map(DateTime::<Utc>::from),
            matched_patterns: matches.into_iter().map(|m| m.rule).collect(),
            suggested_category: category,
            suggested_destination: destination,
            confidence,
            reasoning,
            sensitive: sensitivity.is_some(),
            sensitive_reason: sensitivity.map(|s| s.reason),
            analyzed_at: Utc::now(),
            analysis_method: method,
            filename,
            path,
        };

        debug!(
            path = %analysis.path.display(),
            category = %analysis.suggested_category,
            confidence = %analysis.confidence,
            method = %analysis.analysis_method,
            sensitive = analysis.sensitive,
            "Analyzed file"
        );
        Ok(analysis)
    }

    async fn ask_classifier(&self, context: &ClassificationContext) -> Option<Classification> {
        let classifier = self.classifier.as_ref()?;
        match tokio::time::timeout(self.config.classifier_timeout, classifier.classify(context)).await {
            Ok(Ok(mut classification)) => {
                classification.category = normalize_category(&classification.category);
                Some(classification)
            }
            Ok(Err(e)) => {
                warn!(file = %context.filename, "Classifier failed: {:#}", e);
                None
            }
            Err(_) => {
                warn!(
                    file = %context.filename,
                    "Classifier timed out after {:?}",
                    self.config.classifier_timeout
                );
                None
            }
        }
    }
}

fn is_weak(best: Option<&PatternMatch>) -> bool {
    best.map(|m| m.confidence == Confidence::Low).unwrap_or(true)
}

fn normalize_category(category: &str) -> String {
    let category = category.trim().to_lowercase();
    if category.is_empty() {
        categories::OTHER.to_string()
    } else {
        category
    }
}

/// Read up to `limit` bytes as text. Binary or unreadable content yields `None`.
async fn read_preview(path: &Path, limit: usize) -> Option<String> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            debug!("No preview for {}: {}", path.display(), e);
            return None;
        }
    };

    let mut buf = Vec::with_capacity(limit.min(64 * 1024));
    if let Err(e) = file.take(limit as u64).read_to_end(&mut buf).await {
        debug!("No preview for {}: {}", path.display(), e);
        return None;
    }

    if buf.is_empty() || buf.contains(&0) {
        return None;
    }
    match std::str::from_utf8(&buf) {
        Ok(text) => Some(text.to_string()),
        // A multi-byte character cut off at the limit is still text.
        Err(e) if e.error_len().is_none() => {
            Some(String::from_utf8_lossy(&buf[..e.valid_up_to()]).to_string())
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    struct Fixed(Classification);

    #[async_trait]
    impl Classifier for Fixed {
        async fn classify(&self, _context: &ClassificationContext) -> anyhow::Result<Classification> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl Classifier for Broken {
        async fn classify(&self, _context: &ClassificationContext) -> anyhow::Result<Classification> {
            anyhow::bail!("model unavailable")
        }
    }

    struct Slow;

    #[async_trait]
    impl Classifier for Slow {
        async fn classify(&self, _context: &ClassificationContext) -> anyhow::Result<Classification> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            anyhow::bail!("unreachable")
        }
    }

    struct Setup {
        _temp: TempDir,
        inbox: PathBuf,
        analyzer: FileAnalyzer,
    }

    fn setup() -> Setup {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        let resolver = DestinationResolver::new(&temp.path().join("Organized"), &BTreeMap::new());
        Setup {
            inbox,
            analyzer: FileAnalyzer::new(resolver, AnalyzerConfig::default()),
            _temp: temp,
        }
    }

    fn classification(category: &str, confidence: Confidence) -> Classification {
        Classification {
            category: category.to_string(),
            confidence,
            reasoning: "model says so".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invoice_by_pattern() {
        let s = setup();
        let file = s.inbox.join("invoice-2025.pdf");
        fs::write(&file, b"%PDF-1.4\x00binary").unwrap();

        let analysis = s.analyzer.analyze(&file, &[s.inbox.clone()]).await.unwrap();
        assert_eq!(analysis.suggested_category, categories::FINANCES);
        assert_eq!(analysis.confidence, Confidence::High);
        assert_eq!(analysis.analysis_method, AnalysisMethod::Pattern);
        assert!(analysis.sensitive);
        assert!(analysis.suggested_destination.ends_with("Organized/Finances/invoice-2025.pdf"));
    }

    #[tokio::test]
    async fn test_unknown_file_falls_back() {
        let s = setup();
        let file = s.inbox.join("mystery.zzz");
        fs::write(&file, [0u8, 1, 2, 3]).unwrap();

        let analysis = s.analyzer.analyze(&file, &[s.inbox.clone()]).await.unwrap();
        assert_eq!(analysis.suggested_category, categories::OTHER);
        assert_eq!(analysis.confidence, Confidence::Low);
        assert_eq!(analysis.analysis_method, AnalysisMethod::Fallback);
        assert!(analysis.matched_patterns.is_empty());
    }

    #[tokio::test]
    async fn test_content_preview_upgrades_match() {
        let s = setup();
        let file = s.inbox.join("notes.txt");
        fs::write(&file, "Invoice Number: 42\nAmount due: $10").unwrap();

        let analysis = s.analyzer.analyze(&file, &[]).await.unwrap();
        assert_eq!(analysis.suggested_category, categories::FINANCES);
        assert_eq!(analysis.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn test_classifier_wins_only_when_more_confident() {
        let s = setup();
        let file = s.inbox.join("report.pdf");
        fs::write(&file, "plain text body").unwrap();

        let analyzer = s
            .analyzer
            .with_classifier(Arc::new(Fixed(classification(" Reports ", Confidence::High))));
        let analysis = analyzer.analyze(&file, &[]).await.unwrap();
        assert_eq!(analysis.suggested_category, "reports");
        assert_eq!(analysis.analysis_method, AnalysisMethod::Classifier);
        assert!(analysis.suggested_destination.ends_with("Organized/Reports/report.pdf"));
    }

    #[tokio::test]
    async fn test_tie_prefers_pattern() {
        let s = setup();
        let file = s.inbox.join("report.pdf");
        fs::write(&file, "plain text body").unwrap();

        let analyzer = s
            .analyzer
            .with_classifier(Arc::new(Fixed(classification("reports", Confidence::Low))));
        let analysis = analyzer.analyze(&file, &[]).await.unwrap();
        assert_eq!(analysis.suggested_category, categories::DOCUMENTS);
        assert_eq!(analysis.analysis_method, AnalysisMethod::Pattern);
    }

    #[tokio::test]
    async fn test_classifier_failure_is_ignored() {
        let s = setup();
        let file = s.inbox.join("report.pdf");
        fs::write(&file, "plain text body").unwrap();

        let analyzer = s.analyzer.with_classifier(Arc::new(Broken));
        let analysis = analyzer.analyze(&file, &[]).await.unwrap();
        assert_eq!(analysis.suggested_category, categories::DOCUMENTS);
    }

    #[tokio::test]
    async fn test_classifier_timeout_is_ignored() {
        let s = setup();
        let file = s.inbox.join("mystery.zzz");
        fs::write(&file, "text").unwrap();

        let mut analyzer = s.analyzer.with_classifier(Arc::new(Slow));
        analyzer.config.classifier_timeout = Duration::from_millis(50);
        let analysis = analyzer.analyze(&file, &[]).await.unwrap();
        assert_eq!(analysis.analysis_method, AnalysisMethod::Fallback);
    }

    #[tokio::test]
    async fn test_destination_in_watched_dir_fails() {
        let temp = TempDir::new().unwrap();
        let resolver = DestinationResolver::new(&temp.path().join("Organized"), &BTreeMap::new());
        let analyzer = FileAnalyzer::new(resolver, AnalyzerConfig::default());
        let file = temp.path().join("a.png");
        fs::write(&file, "x").unwrap();

        let err = analyzer
            .analyze(&file, &[temp.path().to_path_buf()])
            .await
            .unwrap_err();
        assert!(matches!(err, OrganizeError::InvalidDestination { .. }));
    }

    #[tokio::test]
    async fn test_preview_rejects_binary() {
        let temp = TempDir::new().unwrap();
        let text = temp.path().join("a.txt");
        let binary = temp.path().join("b.bin");
        fs::write(&text, "héllo").unwrap();
        fs::write(&binary, [b'a', 0, b'b']).unwrap();

        assert_eq!(read_preview(&text, 4096).await.as_deref(), Some("héllo"));
        // Limit cuts the two-byte 'é' in half
        assert_eq!(read_preview(&text, 2).await.as_deref(), Some("h"));
        assert_eq!(read_preview(&binary, 4096).await, None);
    }
}
