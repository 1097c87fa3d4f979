//! Filename ignore patterns (temp files, partial downloads, OS litter).

use crate::error::{OrganizeError, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Patterns skipped by default: editor swap files, in-progress downloads,
/// Office lock files and desktop metadata.
pub const DEFAULT_IGNORED_PATTERNS: &[&str] = &[
    ".DS_Store",
    "*.tmp",
    "*.crdownload",
    "*.part",
    "*.partial",
    "*.download",
    "~$*",
    ".~lock.*",
    "*.swp",
    "Thumbs.db",
    "desktop.ini",
];

/// Case-insensitive glob set matched against the final path component.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    set: GlobSet,
    patterns: Vec<String>,
}

impl IgnoreSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(raw)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|e| OrganizeError::Pattern(format!("{}: {}", raw, e)))?;
            builder.add(glob);
            kept.push(raw.to_string());
        }
        let set = builder
            .build()
            .map_err(|e| OrganizeError::Pattern(e.to_string()))?;
        Ok(Self { set, patterns: kept })
    }

    pub fn defaults() -> Self {
        // The built-in list is static and known to compile.
        Self::new(DEFAULT_IGNORED_PATTERNS).unwrap_or_else(|_| Self {
            set: GlobSet::empty(),
            patterns: Vec::new(),
        })
    }

    /// True when the file name of `path` matches any pattern.
    pub fn is_ignored(&self, path: &Path) -> bool {
        match path.file_name() {
            Some(name) => self.set.is_match(Path::new(name)),
            None => true,
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ignore = IgnoreSet::defaults();
        assert_eq!(ignore.patterns().len(), DEFAULT_IGNORED_PATTERNS.len());
        for name in [
            ".DS_Store",
            "movie.mkv.part",
            "setup.exe.crdownload",
            "~$report.docx",
            ".~lock.sheet.ods#",
            "THUMBS.DB",
            "scratch.TMP",
        ] {
            assert!(ignore.is_ignored(Path::new("/in").join(name).as_path()), "{}", name);
        }
        assert!(!ignore.is_ignored(Path::new("/in/invoice.pdf")));
        assert!(!ignore.is_ignored(Path::new("/tmp/invoice.pdf")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            IgnoreSet::new(&["[unclosed"]),
            Err(OrganizeError::Pattern(_))
        ));
    }
}
