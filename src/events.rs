//! Typed events produced by classifying rsync output.

use serde::Serialize;

/// Severity of an event, used to route lines between stdout/stderr and to
/// filter what reaches the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Summary,
}

/// One classified unit of rsync output.
///
/// `Progress` doubles as the carrier for plain status messages (run phase
/// banners, filenames without measurements), in which case the measurement
/// fields are absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msgType", rename_all = "camelCase")]
pub enum TransferEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rate: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Warning { status: String },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
    #[serde(rename_all = "camelCase")]
    Summary {
        sent_bytes: u64,
        recv_bytes: u64,
        avg_rate: f64,
        total_size: u64,
        speedup: f64,
    },
}

impl TransferEvent {
    /// A measurement-free progress event carrying only a status message.
    pub fn status(message: impl Into<String>) -> Self {
        TransferEvent::Progress {
            status: message.into(),
            bytes: None,
            percent: None,
            rate: None,
            remaining: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        TransferEvent::Error {
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            TransferEvent::Progress { .. } => Severity::Info,
            TransferEvent::Warning { .. } => Severity::Warning,
            TransferEvent::Error { .. } => Severity::Error,
            TransferEvent::Summary { .. } => Severity::Summary,
        }
    }

    /// Whether rendered lines for this event belong on stderr.
    pub fn is_stderr(&self) -> bool {
        matches!(
            self,
            TransferEvent::Warning { .. } | TransferEvent::Error { .. }
        )
    }
}
