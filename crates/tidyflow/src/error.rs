//! Error types for watching, analysis, and destination validation

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Organizer error type
#[derive(Error, Debug)]
pub enum OrganizeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Directory is already watched: {}", .0.display())]
    AlreadyWatched(PathBuf),

    #[error("Directory is not watched: {}", .0.display())]
    NotWatched(PathBuf),

    #[error(
        "Destination '{}' is inside watched directory '{}'; organizing there would re-trigger the watcher",
        destination.display(),
        watched.display()
    )]
    InvalidDestination {
        destination: PathBuf,
        watched: PathBuf,
    },

    #[error("File is already organized: {}", .0.display())]
    AlreadyOrganized(PathBuf),

    #[error("No free destination name for {}", .0.display())]
    DestinationExhausted(PathBuf),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("Analysis failed for {}: {message}", path.display())]
    Analysis { path: PathBuf, message: String },

    #[error("Watcher is not running")]
    WatcherNotRunning,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, OrganizeError>;
