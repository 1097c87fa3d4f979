//! Destination Resolver - Category to Path Mapping
//!
//! Computes where an organized file should land and enforces the
//! anti-recursion rule: a destination may never equal or sit inside a watched
//! directory, otherwise every approved move would be detected again and
//! re-proposed forever.
//!
//! # Layout
//!
//! ```text
//! <organize_base_path>/
//! ├── Finances/invoice-2025.pdf
//! ├── Screenshots/screenshot-2025-01-01.png
//! └── <override from category_folders, absolute or base-relative>
//! ```

use crate::error::{OrganizeError, Result};
use crate::paths::{is_same_or_inside, normalize_dir, normalize_path};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Upper bound on `name (n).ext` collision suffixes.
const MAX_COLLISION_SUFFIX: u32 = 999;

#[derive(Debug, Clone)]
pub struct DestinationResolver {
    base_path: PathBuf,
    category_folders: BTreeMap<String, PathBuf>,
}

impl DestinationResolver {
    /// Create a resolver rooted at `base_path`.
    ///
    /// Relative entries in `category_folders` are taken relative to the base.
    pub fn new(base_path: &Path, category_folders: &BTreeMap<String, PathBuf>) -> Self {
        let base_path = normalize_dir(base_path);
        let category_folders = category_folders
            .iter()
            .map(|(category, folder)| {
                let folder = if folder.is_absolute() {
                    normalize_dir(folder)
                } else {
                    normalize_dir(&base_path.join(folder))
                };
                (category.to_lowercase(), folder)
            })
            .collect();
        Self {
            base_path,
            category_folders,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Folder that receives files of `category`.
    pub fn folder_for(&self, category: &str) -> PathBuf {
        let key = category.to_lowercase();
        match self.category_folders.get(&key) {
            Some(folder) => folder.clone(),
            None => self.base_path.join(folder_name(&key)),
        }
    }

    /// Validate the base path and every override against the watch set.
    pub fn validate_against(&self, watched: &[PathBuf]) -> Result<()> {
        ensure_outside_watched(&self.base_path, watched)?;
        for folder in self.category_folders.values() {
            ensure_outside_watched(folder, watched)?;
        }
        Ok(())
    }

    /// Compute the destination for `source` under `category`.
    ///
    /// Fails with [`OrganizeError::InvalidDestination`] when the result would
    /// fall inside any watched directory; there is no silent fallback.
    pub fn resolve(&self, category: &str, source: &Path, watched: &[PathBuf]) -> Result<PathBuf> {
        let folder = self.folder_for(category);
        ensure_outside_watched(&folder, watched)?;

        let source = normalize_path(source);
        if source.parent() == Some(folder.as_path()) {
            return Err(OrganizeError::AlreadyOrganized(source));
        }

        let filename = source
            .file_name()
            .ok_or_else(|| OrganizeError::Config(format!("No filename in {}", source.display())))?;

        let mut candidate = folder.join(filename);
        if candidate.exists() {
            candidate = next_free_name(&folder, Path::new(filename))
                .ok_or_else(|| OrganizeError::DestinationExhausted(candidate.clone()))?;
        }

        ensure_outside_watched(&candidate, watched)?;
        debug!(
            source = %source.display(),
            destination = %candidate.display(),
            category,
            "Resolved destination"
        );
        Ok(candidate)
    }
}

/// Fail if `path` equals or descends from any watched directory.
pub fn ensure_outside_watched(path: &Path, watched: &[PathBuf]) -> Result<()> {
    let path = normalize_dir(path);
    for dir in watched {
        let dir = normalize_dir(dir);
        if is_same_or_inside(&path, &dir) {
            return Err(OrganizeError::InvalidDestination {
                destination: path,
                watched: dir,
            });
        }
    }
    Ok(())
}

/// Display folder name for a category: `finances` -> `Finances`,
/// `tax docs!` -> `Tax-docs`.
pub fn folder_name(category: &str) -> String {
    let sanitized: String = category
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let sanitized = sanitized.trim_matches('-');
    let mut chars = sanitized.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Other".to_string(),
    }
}

fn next_free_name(folder: &Path, filename: &Path) -> Option<PathBuf> {
    let stem = filename.file_stem()?.to_string_lossy().to_string();
    let extension = filename.extension().map(|e| e.to_string_lossy().to_string());

    (1..=MAX_COLLISION_SUFFIX)
        .map(|n| {
            let name = match &extension {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            folder.join(name)
        })
        .find(|candidate| !candidate.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::categories;
    use std::fs;
    use tempfile::TempDir;

    fn resolver(base: &Path) -> DestinationResolver {
        DestinationResolver::new(base, &BTreeMap::new())
    }

    #[test]
    fn test_folder_name() {
        assert_eq!(folder_name("finances"), "Finances");
        assert_eq!(folder_name("tax docs!"), "Tax-docs");
        assert_eq!(folder_name("  "), "Other");
    }

    #[test]
    fn test_resolve_default_layout() {
        let temp = TempDir::new().unwrap();
        let inbox = temp.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        let source = inbox.join("invoice-2025.pdf");
        fs::write(&source, "x").unwrap();

        let resolver = resolver(&temp.path().join("Organized"));
        let dest = resolver
            .resolve(categories::FINANCES, &source, &[inbox.clone()])
            .unwrap();

        assert_eq!(
            dest,
            normalize_dir(temp.path()).join("Organized/Finances/invoice-2025.pdf")
        );
    }

    #[test]
    fn test_override_relative_and_absolute() {
        let temp = TempDir::new().unwrap();
        let mut overrides = BTreeMap::new();
        overrides.insert("Finances".to_string(), PathBuf::from("Money"));
        overrides.insert("screenshots".to_string(), temp.path().join("Shots"));
        let resolver = DestinationResolver::new(&temp.path().join("base"), &overrides);

        assert!(resolver.folder_for("finances").ends_with("base/Money"));
        assert_eq!(
            resolver.folder_for("screenshots"),
            normalize_dir(&temp.path().join("Shots"))
        );
    }

    #[test]
    fn test_destination_inside_watched_is_rejected() {
        let temp = TempDir::new().unwrap();
        let watched = temp.path().join("Downloads");
        fs::create_dir_all(&watched).unwrap();

        // Base path nested under the watched directory.
        let nested = resolver(&watched.join("Organized"));
        let err = nested
            .resolve(categories::IMAGES, &watched.join("a.png"), &[watched.clone()])
            .unwrap_err();
        assert!(matches!(err, OrganizeError::InvalidDestination { .. }));

        // Base path equal to the watched directory, given with a trailing slash.
        let with_slash = PathBuf::from(format!("{}/", watched.display()));
        let same = resolver(&with_slash);
        assert!(same.validate_against(&[watched.clone()]).is_err());
    }

    #[test]
    fn test_no_category_lands_in_watched_dir() {
        let temp = TempDir::new().unwrap();
        let watched = vec![temp.path().join("w1"), temp.path().join("w2/deeper")];
        for dir in &watched {
            fs::create_dir_all(dir).unwrap();
        }
        let out = resolver(&temp.path().join("out"));
        let all = [
            categories::SCREENSHOTS,
            categories::FINANCES,
            categories::DOCUMENTS,
            categories::IMAGES,
            categories::OTHER,
            "made up / category",
        ];
        for category in all {
            let dest = out
                .resolve(category, &watched[0].join("file.bin"), &watched)
                .unwrap();
            for dir in &watched {
                assert!(!is_same_or_inside(&dest, &normalize_dir(dir)));
            }
        }
    }

    #[test]
    fn test_collision_gets_suffix() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(&temp.path().join("out"));
        let folder = resolver.folder_for(categories::IMAGES);
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("cat.png"), "old").unwrap();
        fs::write(folder.join("cat (1).png"), "old").unwrap();

        let dest = resolver
            .resolve(categories::IMAGES, &temp.path().join("in/cat.png"), &[])
            .unwrap();
        assert_eq!(dest, folder.join("cat (2).png"));
    }

    #[test]
    fn test_already_organized() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(&temp.path().join("out"));
        let folder = resolver.folder_for(categories::IMAGES);
        fs::create_dir_all(&folder).unwrap();
        let source = folder.join("cat.png");
        fs::write(&source, "x").unwrap();

        let err = resolver.resolve(categories::IMAGES, &source, &[]).unwrap_err();
        assert!(matches!(err, OrganizeError::AlreadyOrganized(_)));
    }
}
