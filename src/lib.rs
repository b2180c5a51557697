//! Snapsync Library
//!
//! Hard-link based incremental snapshot backups driven by rsync and a
//! remote shell.

pub mod classify;
pub mod config;
pub mod events;
pub mod hooks;
pub mod output;
pub mod rsync;
pub mod runner;
pub mod shell;
pub mod shutdown;
pub mod snapshot;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
