//! Path normalization shared by every index keyed on a path.
//!
//! Watched directories, proposal source paths, cooldown keys, and computed
//! destinations all pass through these helpers so that comparisons are
//! component-wise and insensitive to trailing separators, `.`/`..` segments,
//! and symlinked parent directories (e.g. `/var` vs `/private/var` on macOS).

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Normalize a directory path.
///
/// The longest existing prefix is canonicalized; the remaining (not yet
/// created) components are appended lexically.
pub fn normalize_dir(path: &Path) -> PathBuf {
    let lexical = lexical_clean(&absolutize(path));

    let mut existing = lexical.as_path();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for component in missing.iter().rev() {
                out.push(component);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

/// Normalize a file path.
///
/// Only the parent directory is resolved; the final component is kept as-is
/// so a symlinked file is tracked under its own name, not its target.
pub fn normalize_path(path: &Path) -> PathBuf {
    let lexical = lexical_clean(&absolutize(path));
    match (lexical.parent(), lexical.file_name()) {
        (Some(parent), Some(name)) => normalize_dir(parent).join(name),
        _ => normalize_dir(&lexical),
    }
}

/// True when `path` equals `dir` or lies underneath it.
///
/// Both arguments are expected to be normalized. Comparison is per component,
/// so `/data/inbox2` is not inside `/data/inbox`.
pub fn is_same_or_inside(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lexical_clean() {
        assert_eq!(
            lexical_clean(Path::new("/a/./b/../c/")),
            PathBuf::from("/a/c")
        );
        assert_eq!(lexical_clean(Path::new("/a/b//")), PathBuf::from("/a/b"));
    }

    #[test]
    fn test_trailing_slash_insensitive() {
        let temp = TempDir::new().unwrap();
        let with_slash = format!("{}/", temp.path().display());
        assert_eq!(
            normalize_dir(Path::new(&with_slash)),
            normalize_dir(temp.path())
        );
    }

    #[test]
    fn test_missing_components_are_kept() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("not").join("yet");
        let normalized = normalize_dir(&missing);
        assert!(normalized.ends_with("not/yet"));
        assert!(normalized.starts_with(normalize_dir(temp.path())));
    }

    #[test]
    fn test_is_same_or_inside() {
        let dir = Path::new("/data/inbox");
        assert!(is_same_or_inside(Path::new("/data/inbox"), dir));
        assert!(is_same_or_inside(Path::new("/data/inbox/a/b.txt"), dir));
        assert!(!is_same_or_inside(Path::new("/data/inbox2"), dir));
        assert!(!is_same_or_inside(Path::new("/data"), dir));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_keeps_its_name() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target.txt");
        std::fs::write(&target, "x").unwrap();
        let link = temp.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let normalized = normalize_path(&link);
        assert_eq!(normalized.file_name().unwrap(), "link.txt");
    }
}
