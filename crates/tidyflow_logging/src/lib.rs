//! Shared logging utilities for the Tidyflow binary.
//!
//! Logs go to a size-rotated file under `~/.tidyflow/logs/` and to stderr.
//! `RUST_LOG` overrides the default filter for both outputs.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "tidyflow=info";
const VERBOSE_LOG_FILTER: &str = "tidyflow=debug";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for the Tidyflow binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Raise stderr output to debug level.
    pub verbose: bool,
    /// Only warnings and errors on stderr (used for JSON output modes).
    pub quiet: bool,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let log_file = SizeCappedLog::open(log_dir, config.app_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else if config.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Get the Tidyflow home directory: ~/.tidyflow
pub fn tidyflow_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("TIDYFLOW_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tidyflow")
}

/// Get the logs directory: ~/.tidyflow/logs
pub fn logs_dir() -> PathBuf {
    tidyflow_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// A log file capped at `limit` bytes. When a write would cross the cap the
/// file becomes `<name>.log.1`, older generations shift up by one, and
/// anything past `keep` generations is deleted.
struct SizeCappedLog {
    dir: PathBuf,
    stem: String,
    keep: usize,
    limit: u64,
    written: u64,
    file: Option<File>,
}

impl SizeCappedLog {
    fn open(dir: PathBuf, name: &str, keep: usize, limit: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut log = Self {
            dir,
            stem: file_stem(name),
            keep: keep.max(1),
            limit,
            written: 0,
            file: None,
        };
        log.reopen()?;
        if log.written > log.limit {
            log.roll()?;
        }
        Ok(log)
    }

    fn live_path(&self) -> PathBuf {
        self.generation(0)
    }

    /// Generation 0 is the live file.
    fn generation(&self, n: usize) -> PathBuf {
        match n {
            0 => self.dir.join(format!("{}.log", self.stem)),
            n => self.dir.join(format!("{}.log.{}", self.stem, n)),
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.live_path())?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        // Walk from the oldest slot down so no rename clobbers a newer file.
        for n in (0..self.keep).rev() {
            let from = self.generation(n);
            if !from.exists() {
                continue;
            }
            if n + 1 >= self.keep {
                fs::remove_file(&from)?;
            } else {
                fs::rename(&from, self.generation(n + 1))?;
            }
        }

        self.reopen()
    }
}

impl Write for SizeCappedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file is not open"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => ch,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("tidyflow"), "tidyflow");
        assert_eq!(file_stem("tidy flow/watch"), "tidy_flow_watch");
    }

    #[test]
    fn test_rolls_and_drops_oldest() {
        let temp = TempDir::new().unwrap();
        let mut log = SizeCappedLog::open(temp.path().to_path_buf(), "test", 3, 16).unwrap();

        for i in 0..10 {
            log.write_all(format!("line {:05}\n", i).as_bytes())
                .unwrap();
        }
        log.flush().unwrap();

        assert_eq!(names(temp.path()), vec!["test.log", "test.log.1", "test.log.2"]);
        let live = fs::read_to_string(temp.path().join("test.log")).unwrap();
        assert_eq!(live, "line 00009\n");
        let previous = fs::read_to_string(temp.path().join("test.log.1")).unwrap();
        assert_eq!(previous, "line 00008\n");
    }

    #[test]
    fn test_oversized_write_goes_to_fresh_file() {
        let temp = TempDir::new().unwrap();
        let mut log = SizeCappedLog::open(temp.path().to_path_buf(), "big", 2, 4).unwrap();
        log.write_all(b"much longer than four bytes").unwrap();
        log.flush().unwrap();

        assert_eq!(names(temp.path()), vec!["big.log"]);
    }

    #[test]
    fn test_single_generation_truncates() {
        let temp = TempDir::new().unwrap();
        let mut log = SizeCappedLog::open(temp.path().to_path_buf(), "one", 1, 8).unwrap();
        log.write_all(b"first!\n").unwrap();
        log.write_all(b"second\n").unwrap();
        log.flush().unwrap();

        assert_eq!(names(temp.path()), vec!["one.log"]);
        assert_eq!(
            fs::read_to_string(temp.path().join("one.log")).unwrap(),
            "second\n"
        );
    }

    #[test]
    fn test_reopen_appends() {
        let temp = TempDir::new().unwrap();
        {
            let mut log = SizeCappedLog::open(temp.path().to_path_buf(), "app", 2, 1024).unwrap();
            log.write_all(b"first\n").unwrap();
        }
        let mut log = SizeCappedLog::open(temp.path().to_path_buf(), "app", 2, 1024).unwrap();
        log.write_all(b"second\n").unwrap();
        log.flush().unwrap();

        let content = fs::read_to_string(temp.path().join("app.log")).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}
