//! Run configuration.
//!
//! Loads an optional TOML file and applies command-line overrides on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backup destination, `[user@host:]path`
    pub destination: Option<String>,

    /// Source path passed to rsync
    #[serde(default = "default_source")]
    pub source: String,

    /// Remote shell for the transfer and maintenance commands (e.g. "ssh")
    pub shell: Option<String>,

    /// Exclude patterns passed through to rsync
    pub exclude: Vec<String>,

    /// File of exclude patterns
    pub exclude_file: Option<PathBuf>,

    /// Retention window; unset keeps every snapshot
    pub max_snapshots: Option<usize>,

    /// Transfer straight to the destination, skipping the snapshot lifecycle
    pub restore: bool,

    /// Compare files by checksum instead of size+mtime
    pub checksum: bool,

    /// Disable incremental recursion so the percentage covers the whole run
    pub accurate_progress: bool,

    /// Keep files on the destination that no longer exist on the source
    pub no_delete: bool,

    /// Keep excluded files that already exist on the destination
    pub no_delete_excludes: bool,

    /// Remote rsync binary (defaults to "sudo rsync")
    pub rsync_path: Option<String>,

    /// Extra rsync long options, `name` or `name=value`
    pub set_args: Vec<String>,

    /// rsync long options to remove from the composed invocation
    pub unset_args: Vec<String>,

    /// Output format: json, text or raw
    pub log_format: Option<String>,

    /// Append-only event log file
    pub log_file: Option<PathBuf>,

    /// Minimum severity for the log file: ALL, WARN or ERROR
    pub log_file_level: Option<String>,

    /// Diagnostic tracing level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Hook scripts to run before the transfer
    pub run_before: Vec<PathBuf>,

    /// Hook scripts to run after a successful transfer
    pub run_after: Vec<PathBuf>,

    /// Print the composed rsync command before executing it
    pub print_command: bool,
}

fn default_source() -> String {
    "/*".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            destination: None,
            source: default_source(),
            shell: None,
            exclude: Vec::new(),
            exclude_file: None,
            max_snapshots: None,
            restore: false,
            checksum: false,
            accurate_progress: false,
            no_delete: false,
            no_delete_excludes: false,
            rsync_path: None,
            set_args: Vec::new(),
            unset_args: Vec::new(),
            log_format: None,
            log_file: None,
            log_file_level: None,
            log_level: default_log_level(),
            run_before: Vec::new(),
            run_after: Vec::new(),
            print_command: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
