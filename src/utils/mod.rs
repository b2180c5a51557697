//! Utility modules for snapsync.

pub mod errors;
pub mod fmt;
pub mod logger;

pub use errors::{BackupError, Result};
