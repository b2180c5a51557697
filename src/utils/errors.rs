//! Custom error types for snapsync.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connectivity error while {context}: {detail}")]
    Connectivity { context: String, detail: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transfer failed: rsync exited with code {code}")]
    Transfer { code: i32 },

    #[error("Failed while {context}: {detail}")]
    Finalize { context: String, detail: String },

    #[error("Hook {path} failed with exit code {code}")]
    Hook { path: PathBuf, code: i32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// Exit status for the overall process when this error ends a run.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Config(_) => 1,
            BackupError::Connectivity { .. } | BackupError::Protocol(_) => 2,
            _ => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
