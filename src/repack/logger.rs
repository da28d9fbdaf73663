//! Notification side channel of the merge engine.
//!
//! The engine reports progress and advisory conditions (dropped duplicate resources, collapsed
//! attributes, missing reference-only dependencies) through a [`RepackLogger`]. Fatal problems
//! never travel through this channel; they are returned as [`crate::Error`] values.
//!
//! # Key Components
//!
//! - [`RepackLogger`] - The narrow notification interface the engine calls synchronously
//! - [`LogForwarder`] - Forwards every notification to the `log` crate macros (the default)
//! - [`FileLogger`] - Writes prefixed lines to a log file, mirroring them to the `log` crate
//! - [`RecordingLogger`] - Lock-free in-memory recorder for hosts and tests
//!
//! # Thread Safety
//!
//! Notifications may be issued from rayon workers, so every implementation is `Send + Sync`.
//! [`RecordingLogger`] uses `boxcar::Vec` for concurrent appends; [`FileLogger`] serializes
//! file writes through a mutex.

use std::{
    fmt,
    fs,
    io::{BufWriter, Write},
    path::Path,
    sync::Mutex,
};

use crate::{Error, Result};

/// Receiver of engine notifications.
pub trait RepackLogger: Send + Sync {
    /// A fatal problem, reported right before the engine returns the matching error.
    fn error(&self, message: &str);
    /// An advisory condition that does not stop the merge.
    fn warn(&self, message: &str);
    /// Progress information.
    fn info(&self, message: &str);
    /// Detailed progress information.
    fn verbose(&self, message: &str);
    /// A duplicate `kind` entry named `name` was dropped in favour of an earlier one.
    fn duplicate_ignored(&self, kind: &str, name: &str);
}

/// Forwards notifications to the `log` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogForwarder;

impl RepackLogger for LogForwarder {
    fn error(&self, message: &str) {
        log::error!("{message}");
    }

    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }

    fn info(&self, message: &str) {
        log::info!("{message}");
    }

    fn verbose(&self, message: &str) {
        log::debug!("{message}");
    }

    fn duplicate_ignored(&self, kind: &str, name: &str) {
        log::debug!("Ignoring duplicate {kind} {name}");
    }
}

struct FileLoggerState {
    writer: Option<BufWriter<fs::File>>,
    duplicates: Vec<(String, String)>,
}

/// Writes `ERROR:`/`WARN:`/`INFO:`/`VERBOSE:` prefixed lines to a log file and mirrors every
/// notification to the `log` crate.
///
/// Duplicate notifications are collected instead of written one by one and summarised per kind
/// when the logger is [closed](FileLogger::close) or dropped.
pub struct FileLogger {
    verbose: bool,
    state: Mutex<FileLoggerState>,
}

impl FileLogger {
    /// Creates (truncating) the log file at `path`, creating missing parent directories.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be created.
    pub fn create(path: &Path, verbose: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;

        Ok(FileLogger {
            verbose,
            state: Mutex::new(FileLoggerState {
                writer: Some(BufWriter::new(file)),
                duplicates: Vec::new(),
            }),
        })
    }

    fn write_line(&self, prefix: &str, message: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(writer) = state.writer.as_mut() {
            // Write failures are ignored, the merge continues.
            let _ = writeln!(writer, "{prefix}: {message}");
        }
    }

    /// Writes the duplicate summary, flushes and closes the file. Later notifications only reach
    /// the `log` crate.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if flushing fails.
    pub fn close(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Emission("log file state poisoned".to_string()))?;

        let duplicates = std::mem::take(&mut state.duplicates);
        let Some(mut writer) = state.writer.take() else {
            return Ok(());
        };

        for (kind, names) in summarise(&duplicates) {
            writeln!(
                writer,
                "INFO: Ignored {} duplicate {kind}(s): {}",
                names.len(),
                names.join(", ")
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for FileLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLogger")
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl RepackLogger for FileLogger {
    fn error(&self, message: &str) {
        log::error!("{message}");
        self.write_line("ERROR", message);
    }

    fn warn(&self, message: &str) {
        log::warn!("{message}");
        self.write_line("WARN", message);
    }

    fn info(&self, message: &str) {
        log::info!("{message}");
        self.write_line("INFO", message);
    }

    fn verbose(&self, message: &str) {
        log::debug!("{message}");
        if self.verbose {
            self.write_line("VERBOSE", message);
        }
    }

    fn duplicate_ignored(&self, kind: &str, name: &str) {
        log::debug!("Ignoring duplicate {kind} {name}");
        if let Ok(mut state) = self.state.lock() {
            state.duplicates.push((kind.to_string(), name.to_string()));
        }
    }
}

/// Groups duplicate notifications by kind, kinds in first-seen order.
fn summarise(duplicates: &[(String, String)]) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (kind, name) in duplicates {
        match grouped.iter_mut().find(|(k, _)| k == kind) {
            Some((_, names)) => names.push(name.clone()),
            None => grouped.push((kind.clone(), vec![name.clone()])),
        }
    }
    grouped
}

/// Severity of a recorded notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum LogLevel {
    /// [`RepackLogger::error`]
    #[strum(serialize = "ERROR")]
    Error,
    /// [`RepackLogger::warn`]
    #[strum(serialize = "WARN")]
    Warn,
    /// [`RepackLogger::info`]
    #[strum(serialize = "INFO")]
    Info,
    /// [`RepackLogger::verbose`]
    #[strum(serialize = "VERBOSE")]
    Verbose,
    /// [`RepackLogger::duplicate_ignored`]
    #[strum(serialize = "DUPLICATE")]
    DuplicateIgnored,
}

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Message text; for duplicates `"<kind> <name>"`
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

/// Records notifications in memory.
///
/// # Examples
///
/// ```rust
/// use dotrepack::repack::{RecordingLogger, RepackLogger};
///
/// let logger = RecordingLogger::new();
/// logger.warn("dependency 'System.Xml' not found");
/// logger.duplicate_ignored("resource", "data.bin");
///
/// assert_eq!(logger.warnings().len(), 1);
/// assert_eq!(logger.duplicates(), vec!["resource data.bin".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: boxcar::Vec<LogEntry>,
}

impl RecordingLogger {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        RecordingLogger {
            entries: boxcar::Vec::new(),
        }
    }

    fn push(&self, level: LogLevel, message: String) {
        self.entries.push(LogEntry { level, message });
    }

    /// All entries in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Messages recorded at `level`.
    #[must_use]
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.iter()
            .filter(|entry| entry.level == level)
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Recorded warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.messages(LogLevel::Warn)
    }

    /// Recorded duplicate notifications as `"<kind> <name>"`.
    #[must_use]
    pub fn duplicates(&self) -> Vec<String> {
        self.messages(LogLevel::DuplicateIgnored)
    }

    /// Returns `true` if any message at `level` contains `needle`.
    #[must_use]
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.iter()
            .any(|entry| entry.level == level && entry.message.contains(needle))
    }
}

impl RepackLogger for RecordingLogger {
    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message.to_string());
    }

    fn warn(&self, message: &str) {
        self.push(LogLevel::Warn, message.to_string());
    }

    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message.to_string());
    }

    fn verbose(&self, message: &str) {
        self.push(LogLevel::Verbose, message.to_string());
    }

    fn duplicate_ignored(&self, kind: &str, name: &str) {
        self.push(LogLevel::DuplicateIgnored, format!("{kind} {name}"));
    }
}
