//! Per-package build log.
//!
//! Every [`Package`](crate::harvest::Package) carries an append-only buffer
//! that plugins and the pipeline write to. It is flushed to
//! `<log_dir>/<first letter>/<name>.log` only when something new was
//! written. The first flush of a session truncates the file and later
//! flushes append.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Severity of a package log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Debug,
    Warning,
}

impl LogLevel {
    fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO:    ",
            LogLevel::Debug => "DEBUG:   ",
            LogLevel::Warning => "WARNING: ",
        }
    }
}

#[derive(Debug, Default)]
struct LogState {
    buffer: String,
    dirty: bool,
    flushed_once: bool,
}

/// Append-only, timestamped log buffer.
#[derive(Debug)]
pub struct PackageLog {
    started: Instant,
    state: Mutex<LogState>,
}

impl Default for PackageLog {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(LogState::default()),
        }
    }
}

impl PackageLog {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one line.
    pub fn log(&self, package: &str, level: LogLevel, message: &str) {
        let elapsed = self.started.elapsed().as_secs_f64() * 1000.0;
        debug!(package, level = ?level, "{}", message);

        let mut state = self.lock();
        state.buffer.push_str(level.prefix());
        state.buffer.push_str(&format!("{:>8.0}ms ", elapsed));
        state.buffer.push_str(message);
        state.buffer.push('\n');
        state.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Current buffer content.
    pub fn contents(&self) -> String {
        self.lock().buffer.clone()
    }

    /// Path of the log file for `name` below `log_dir`.
    pub fn path_for(log_dir: &Path, name: &str) -> PathBuf {
        let first = name
            .chars()
            .next()
            .map(|c| c.to_lowercase().to_string())
            .unwrap_or_else(|| "_".to_string());
        log_dir.join(first).join(format!("{}.log", name))
    }

    /// Writes the buffer to disk if dirty.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the log directory or file cannot be written.
    pub fn flush(&self, log_dir: &Path, name: &str) -> std::io::Result<()> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }

        let path = Self::path_for(log_dir, name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(state.flushed_once)
            .truncate(!state.flushed_once)
            .open(&path)?;
        file.write_all(state.buffer.as_bytes())?;

        state.buffer.clear();
        state.dirty = false;
        state.flushed_once = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_only_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let log = PackageLog::default();

        log.flush(dir.path(), "Gimp").unwrap();
        assert!(!PackageLog::path_for(dir.path(), "Gimp").exists());

        log.log("Gimp", LogLevel::Info, "first");
        assert!(log.is_dirty());
        log.flush(dir.path(), "Gimp").unwrap();
        assert!(!log.is_dirty());

        let path = dir.path().join("g").join("Gimp.log");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("INFO:    "));
        assert!(text.contains("first"));
    }

    #[test]
    fn test_later_flushes_append() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("f")).unwrap();
        std::fs::write(dir.path().join("f").join("foo.log"), "stale run\n").unwrap();

        let log = PackageLog::default();
        log.log("foo", LogLevel::Warning, "one");
        log.flush(dir.path(), "foo").unwrap();
        log.log("foo", LogLevel::Debug, "two");
        log.flush(dir.path(), "foo").unwrap();

        let text = std::fs::read_to_string(dir.path().join("f").join("foo.log")).unwrap();
        assert!(!text.contains("stale run"));
        assert!(text.contains("WARNING: "));
        assert!(text.contains("one"));
        assert!(text.contains("two"));
    }
}
