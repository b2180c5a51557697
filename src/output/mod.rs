//! Event output pipeline: rendering, console/file routing and success
//! callbacks.
//!
//! Rendered `Progress`/`Summary` lines go to stdout, `Warning`/`Error` lines
//! to stderr. When a log file is configured, lines are additionally appended
//! to it, filtered by the configured minimum severity. The logger also owns
//! the success-callback list that fires once when the classifier reports a
//! successful transfer.

pub mod format;

use crate::events::{Severity, TransferEvent};
use crate::utils::errors::{BackupError, Result};
use format::RenderFormat;
use futures_util::future::BoxFuture;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Callback invoked once after a successful transfer.
pub type SuccessCallback = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Minimum severity written to the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    All,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Some(LogLevel::All),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Whether an event of the given severity reaches the log file. The
    /// final summary is always file-worthy.
    pub fn should_log(&self, severity: Severity) -> bool {
        match self {
            LogLevel::All => true,
            LogLevel::Warn => matches!(
                severity,
                Severity::Warning | Severity::Error | Severity::Summary
            ),
            LogLevel::Error => matches!(severity, Severity::Error | Severity::Summary),
        }
    }
}

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    level: LogLevel,
}

pub struct EventLogger {
    format: Box<dyn RenderFormat>,
    log_file: Option<LogFile>,
    callbacks: Mutex<Vec<SuccessCallback>>,
}

impl EventLogger {
    /// Create a logger for the named render format. An unknown format name
    /// is reported and falls back to `text`.
    pub fn new(format_name: Option<&str>) -> Self {
        let format = match format_name {
            None => format::for_name("text"),
            Some(name) => {
                let format = format::for_name(name);
                if format.is_none() {
                    eprintln!("Invalid logging format: {}", name);
                }
                format.or_else(|| format::for_name("text"))
            }
        }
        .unwrap_or(Box::new(format::TextFormat));

        EventLogger {
            format,
            log_file: None,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Configure the append-only log file, verifying it is writable up
    /// front. An unknown level name is reported and treated as `ALL`.
    pub fn set_output_file(&mut self, path: &Path, level: &str) -> Result<()> {
        let level = LogLevel::parse(level).unwrap_or_else(|| {
            eprintln!("Unknown log file level: {}", level);
            LogLevel::All
        });

        std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|err| {
                BackupError::Config(format!(
                    "log file '{}' is unwritable: {}",
                    path.display(),
                    err
                ))
            })?;

        self.log_file = Some(LogFile {
            path: path.to_path_buf(),
            level,
        });
        Ok(())
    }

    /// Render an event and route its lines to the console and, severity
    /// permitting, the log file.
    pub fn emit(&self, event: &TransferEvent) {
        let lines = self.format.render(event);
        let to_file = self
            .log_file
            .as_ref()
            .is_some_and(|f| f.level.should_log(event.severity()));

        for line in &lines {
            if event.is_stderr() {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
            if to_file {
                self.file_append(line);
            }
        }
    }

    pub fn emit_all(&self, events: &[TransferEvent]) {
        for event in events {
            self.emit(event);
        }
    }

    /// Emit a run phase banner as a plain status event.
    pub fn state_change(&self, message: &str) {
        self.emit(&TransferEvent::status(message));
    }

    fn file_append(&self, line: &str) {
        let Some(log_file) = &self.log_file else {
            return;
        };
        let result = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_file.path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(err) = result {
            tracing::error!(%err, path = %log_file.path.display(), "error writing to log file");
        }
    }

    /// Register a callback to run after a successful transfer. Callbacks run
    /// in registration order.
    pub fn add_success_callback(&self, callback: SuccessCallback) {
        self.callbacks
            .lock()
            .expect("callback list lock poisoned")
            .push(callback);
    }

    /// Drain the callback list, awaiting each callback before starting the
    /// next. A failing callback is reported as an error event but does not
    /// block the remaining callbacks. The list is cleared, so repeated
    /// completion signals run nothing.
    pub async fn run_success_callbacks(&self) -> Vec<BackupError> {
        let callbacks = std::mem::take(
            &mut *self
                .callbacks
                .lock()
                .expect("callback list lock poisoned"),
        );

        let mut failures = Vec::new();
        for callback in callbacks {
            if let Err(err) = callback().await {
                self.emit(&TransferEvent::error(err.to_string()));
                failures.push(err);
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("all"), Some(LogLevel::All));
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("Error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn test_log_level_filtering() {
        assert!(LogLevel::All.should_log(Severity::Info));
        assert!(!LogLevel::Warn.should_log(Severity::Info));
        assert!(LogLevel::Warn.should_log(Severity::Warning));
        assert!(LogLevel::Warn.should_log(Severity::Summary));
        assert!(!LogLevel::Error.should_log(Severity::Warning));
        assert!(LogLevel::Error.should_log(Severity::Error));
        assert!(LogLevel::Error.should_log(Severity::Summary));
    }

    #[test]
    fn test_unknown_format_falls_back_to_text() {
        let logger = EventLogger::new(Some("yaml"));
        assert_eq!(logger.format.name(), "text");
        let logger = EventLogger::new(None);
        assert_eq!(logger.format.name(), "text");
        let logger = EventLogger::new(Some("json"));
        assert_eq!(logger.format.name(), "json");
    }

    #[test]
    fn test_set_output_file_rejects_bad_path() {
        let mut logger = EventLogger::new(None);
        let err = logger
            .set_output_file(Path::new("/nonexistent-dir/deep/log.txt"), "ALL")
            .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_file_filtering_by_severity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.log");

        let mut logger = EventLogger::new(Some("text"));
        logger.set_output_file(&path, "WARN").unwrap();

        logger.emit(&TransferEvent::status("just progress"));
        logger.emit(&TransferEvent::error("boom"));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("just progress"));
        assert!(contents.contains("Error: boom"));
    }

    #[tokio::test]
    async fn test_callbacks_run_once_in_order() {
        let logger = EventLogger::new(None);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            logger.add_success_callback(Box::new(move || {
                Box::pin(async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
            }));
        }

        let failures = logger.run_success_callbacks().await;
        assert!(failures.is_empty());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

        // second completion signal runs nothing
        let failures = logger.run_success_callbacks().await;
        assert!(failures.is_empty());
        assert_eq!(order.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_callback_does_not_block_later_ones() {
        let logger = EventLogger::new(None);
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let order = order.clone();
            logger.add_success_callback(Box::new(move || {
                Box::pin(async move {
                    order.lock().unwrap().push("first");
                    Err(BackupError::Config("first failed".to_string()))
                })
            }));
        }
        {
            let order = order.clone();
            logger.add_success_callback(Box::new(move || {
                Box::pin(async move {
                    order.lock().unwrap().push("second");
                    Ok(())
                })
            }));
        }

        let failures = logger.run_success_callbacks().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
