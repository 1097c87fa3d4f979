//! Pattern-based file classification
//!
//! Maps a filename (and optionally a text preview) to zero or more category
//! matches. Rules are evaluated in order; results are sorted by confidence
//! with rule order breaking ties, so the first entry is the best guess.
//! Deterministic and offline: no rule ever touches the network.

pub mod sensitivity;

pub use sensitivity::{check_sensitivity, SensitiveKind, SensitiveMatch};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known category names.
pub mod categories {
    pub const SCREENSHOTS: &str = "screenshots";
    pub const FINANCES: &str = "finances";
    pub const DOCUMENTS: &str = "documents";
    pub const SPREADSHEETS: &str = "spreadsheets";
    pub const PRESENTATIONS: &str = "presentations";
    pub const IMAGES: &str = "images";
    pub const VIDEOS: &str = "videos";
    pub const AUDIO: &str = "audio";
    pub const ARCHIVES: &str = "archives";
    pub const INSTALLERS: &str = "installers";
    pub const CODE: &str = "code";
    pub const EBOOKS: &str = "ebooks";
    /// Used when nothing matched and no classifier answered.
    pub const OTHER: &str = "other";
}

/// How sure a classification is. Ordered: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown confidence level: {}", other)),
        }
    }
}

/// A single rule hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternMatch {
    pub category: String,
    pub confidence: Confidence,
    /// Stable rule identifier, e.g. `screenshot-name` or `ext:png`.
    pub rule: String,
    pub reasoning: String,
}

enum Matcher {
    /// Regex over the lowercased filename.
    Filename(&'static Lazy<Regex>),
    /// Regex over the lowercased filename, restricted to extensions.
    FilenameWithExtension(&'static Lazy<Regex>, &'static [&'static str]),
    /// Lowercased extension (without dot) membership.
    Extension(&'static [&'static str]),
    /// Regex over the lowercased content preview.
    Content(&'static Lazy<Regex>),
}

struct PatternRule {
    name: &'static str,
    category: &'static str,
    confidence: Confidence,
    matcher: Matcher,
    reasoning: &'static str,
}

/// Build a regex that matches any of `words` as a standalone token.
///
/// A token boundary is any non-letter, so `tax_2024` and `invoice2025`
/// match while `syntax` does not. Spaces inside a keyword also accept `_`,
/// `-`, and `.`.
pub(crate) fn keyword_regex(words: &[&str]) -> Regex {
    let alternatives: Vec<String> = words
        .iter()
        .map(|w| regex::escape(w).replace(' ', r"[\s_.\-]*"))
        .collect();
    let pattern = format!(r"(?:^|[^a-z])(?:{})s?(?:[^a-z]|$)", alternatives.join("|"));
    Regex::new(&pattern).expect("keyword patterns are valid regexes")
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "heic", "heif", "bmp", "tif", "tiff", "svg", "raw",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm", "m4v", "wmv"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "m4a", "ogg", "opus", "aiff"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "zst"];
const INSTALLER_EXTENSIONS: &[&str] = &["dmg", "pkg", "msi", "exe", "deb", "rpm", "appimage", "apk"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "odt", "rtf", "txt", "md", "pages"];
const SPREADSHEET_EXTENSIONS: &[&str] = &["xls", "xlsx", "csv", "tsv", "ods", "numbers"];
const PRESENTATION_EXTENSIONS: &[&str] = &["ppt", "pptx", "key", "odp"];
const EBOOK_EXTENSIONS: &[&str] = &["epub", "mobi", "azw", "azw3", "fb2"];
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "kt", "swift", "c", "h", "cpp", "hpp",
    "rb", "sh", "ipynb",
];

static SCREENSHOT_NAME: Lazy<Regex> = Lazy::new(|| {
    // The prefix must end the word: `capture_01.png` yes, `captured_invoice.jpg` no.
    Regex::new(
        r"^(?:screenshot|screen[\s_.\-]*shot|scr[\s_.\-]*shot|cleanshot|capture|snip)(?:[\s_.\-(\d]|$)",
    )
    .expect("valid regex")
});
static SCREEN_RECORDING_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:screen[\s_.\-]*recording|screencast)").expect("valid regex")
});
static FINANCE_NAME: Lazy<Regex> = Lazy::new(|| {
    keyword_regex(&[
        "invoice",
        "receipt",
        "bank statement",
        "statement",
        "tax return",
        "tax",
        "w2",
        "w-2",
        "1099",
        "payslip",
        "pay stub",
        "paystub",
        "payroll",
        "salary",
        "expense",
        "budget",
    ])
});
static FINANCE_CONTENT: Lazy<Regex> = Lazy::new(|| {
    keyword_regex(&[
        "invoice number",
        "invoice no",
        "amount due",
        "total due",
        "balance due",
        "bill to",
        "payment terms",
    ])
});

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule {
            name: "screenshot-name",
            category: categories::SCREENSHOTS,
            confidence: Confidence::High,
            matcher: Matcher::FilenameWithExtension(&SCREENSHOT_NAME, IMAGE_EXTENSIONS),
            reasoning: "Filename follows a screenshot naming convention",
        },
        PatternRule {
            name: "screen-recording-name",
            category: categories::VIDEOS,
            confidence: Confidence::High,
            matcher: Matcher::FilenameWithExtension(&SCREEN_RECORDING_NAME, VIDEO_EXTENSIONS),
            reasoning: "Filename follows a screen recording naming convention",
        },
        PatternRule {
            name: "finance-name",
            category: categories::FINANCES,
            confidence: Confidence::High,
            matcher: Matcher::Filename(&FINANCE_NAME),
            reasoning: "Filename mentions a financial document (invoice, receipt, statement, tax form)",
        },
        PatternRule {
            name: "finance-content",
            category: categories::FINANCES,
            confidence: Confidence::Medium,
            matcher: Matcher::Content(&FINANCE_CONTENT),
            reasoning: "Content reads like an invoice or bill",
        },
        PatternRule {
            name: "ext:installer",
            category: categories::INSTALLERS,
            confidence: Confidence::High,
            matcher: Matcher::Extension(INSTALLER_EXTENSIONS),
            reasoning: "Installer package extension",
        },
        PatternRule {
            name: "ext:ebook",
            category: categories::EBOOKS,
            confidence: Confidence::High,
            matcher: Matcher::Extension(EBOOK_EXTENSIONS),
            reasoning: "E-book extension",
        },
        PatternRule {
            name: "ext:image",
            category: categories::IMAGES,
            confidence: Confidence::Medium,
            matcher: Matcher::Extension(IMAGE_EXTENSIONS),
            reasoning: "Image file extension",
        },
        PatternRule {
            name: "ext:video",
            category: categories::VIDEOS,
            confidence: Confidence::Medium,
            matcher: Matcher::Extension(VIDEO_EXTENSIONS),
            reasoning: "Video file extension",
        },
        PatternRule {
            name: "ext:audio",
            category: categories::AUDIO,
            confidence: Confidence::Medium,
            matcher: Matcher::Extension(AUDIO_EXTENSIONS),
            reasoning: "Audio file extension",
        },
        PatternRule {
            name: "ext:archive",
            category: categories::ARCHIVES,
            confidence: Confidence::Medium,
            matcher: Matcher::Extension(ARCHIVE_EXTENSIONS),
            reasoning: "Archive file extension",
        },
        PatternRule {
            name: "ext:spreadsheet",
            category: categories::SPREADSHEETS,
            confidence: Confidence::Medium,
            matcher: Matcher::Extension(SPREADSHEET_EXTENSIONS),
            reasoning: "Spreadsheet file extension",
        },
        PatternRule {
            name: "ext:presentation",
            category: categories::PRESENTATIONS,
            confidence: Confidence::Medium,
            matcher: Matcher::Extension(PRESENTATION_EXTENSIONS),
            reasoning: "Presentation file extension",
        },
        PatternRule {
            name: "ext:code",
            category: categories::CODE,
            confidence: Confidence::Medium,
            matcher: Matcher::Extension(CODE_EXTENSIONS),
            reasoning: "Source code extension",
        },
        // Documents are the catch-all for text formats; low confidence lets
        // the content classifier refine them.
        PatternRule {
            name: "ext:document",
            category: categories::DOCUMENTS,
            confidence: Confidence::Low,
            matcher: Matcher::Extension(DOCUMENT_EXTENSIONS),
            reasoning: "Generic document extension",
        },
    ]
});

/// Stateless filename/content classifier backed by the built-in rule table.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Return every rule hit, best first.
    pub fn classify(&self, filename: &str, content: Option<&str>) -> Vec<PatternMatch> {
        let name = filename.to_lowercase();
        let extension = extension_of(&name);
        let content = content.map(str::to_lowercase);

        let mut matches: Vec<PatternMatch> = RULES
            .iter()
            .filter(|rule| match &rule.matcher {
                Matcher::Filename(re) => re.is_match(&name),
                Matcher::FilenameWithExtension(re, exts) => {
                    extension.map(|e| exts.contains(&e)).unwrap_or(false) && re.is_match(&name)
                }
                Matcher::Extension(exts) => extension.map(|e| exts.contains(&e)).unwrap_or(false),
                Matcher::Content(re) => content.as_deref().map(|c| re.is_match(c)).unwrap_or(false),
            })
            .map(|rule| PatternMatch {
                category: rule.category.to_string(),
                confidence: rule.confidence,
                rule: rule.name.to_string(),
                reasoning: rule.reasoning.to_string(),
            })
            .collect();

        // Stable sort keeps rule order among equal confidence.
        matches.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        matches
    }

    /// Best single match, if any.
    #[cfg(test)]
    pub(crate) fn best_match(&self, filename: &str, content: Option<&str>) -> Option<PatternMatch> {
        self.classify(filename, content).into_iter().next()
    }
}

/// Lowercased extension without the dot.
pub fn extension_of(filename: &str) -> Option<&str> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

/// Extensions whose content is worth previewing as text.
pub fn is_text_extension(extension: &str) -> bool {
    matches!(
        extension,
        "txt" | "md" | "csv" | "tsv" | "json" | "xml" | "html" | "htm" | "log" | "yaml" | "yml"
            | "toml" | "ini" | "env" | "rtf" | "eml"
    )
}
