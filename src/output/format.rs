//! Render formats for transfer events.
//!
//! A format turns one [`TransferEvent`] into zero or more output lines.
//! `json` serializes events losslessly, `text` renders them human-readable
//! with byte sizes humanized, and `raw` reconstructs original-looking rsync
//! lines where possible.

use crate::events::TransferEvent;
use crate::utils::fmt::{format_bytes, group_digits};

pub trait RenderFormat: Send + Sync {
    fn name(&self) -> &'static str;
    fn render(&self, event: &TransferEvent) -> Vec<String>;
}

/// Look up a format by its CLI name.
pub fn for_name(name: &str) -> Option<Box<dyn RenderFormat>> {
    match name {
        "json" => Some(Box::new(JsonFormat)),
        "text" => Some(Box::new(TextFormat)),
        "raw" => Some(Box::new(RawFormat)),
        _ => None,
    }
}

pub struct JsonFormat;

impl RenderFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn render(&self, event: &TransferEvent) -> Vec<String> {
        match serde_json::to_string(event) {
            Ok(line) => vec![line],
            Err(err) => {
                tracing::error!(%err, "failed to serialize event");
                Vec::new()
            }
        }
    }
}

pub struct TextFormat;

impl RenderFormat for TextFormat {
    fn name(&self) -> &'static str {
        "text"
    }

    fn render(&self, event: &TransferEvent) -> Vec<String> {
        let line = match event {
            TransferEvent::Progress {
                status,
                bytes: None,
                percent: None,
                ..
            } => status.clone(),
            TransferEvent::Progress {
                status,
                bytes,
                percent,
                rate,
                remaining,
            } => {
                let mut line = String::from("Progress:");
                if let Some(percent) = percent {
                    line.push_str(&format!(" {}", percent));
                }
                if let Some(bytes) = bytes {
                    line.push_str(&format!(
                        " Transferred: {} ({})",
                        group_digits(*bytes),
                        format_bytes(*bytes)
                    ));
                }
                if let Some(rate) = rate {
                    line.push_str(&format!(" Rate: {}", rate));
                }
                if let Some(remaining) = remaining {
                    line.push_str(&format!(" Remaining: {}", remaining));
                }
                line.push_str(&format!(" File: {}", status));
                line
            }
            TransferEvent::Warning { status } => format!("Warning: {}", status),
            TransferEvent::Error { message } => format!("Error: {}", message),
            TransferEvent::Summary {
                sent_bytes,
                recv_bytes,
                avg_rate,
                total_size,
                speedup,
            } => format!(
                "Sent: {} ({}) Received: {} ({}) Total Size: {} ({}) Rate: {:.2} bytes/sec Speedup: {:.2}",
                group_digits(*sent_bytes),
                format_bytes(*sent_bytes),
                group_digits(*recv_bytes),
                format_bytes(*recv_bytes),
                group_digits(*total_size),
                format_bytes(*total_size),
                avg_rate,
                speedup
            ),
        };
        vec![line]
    }
}

pub struct RawFormat;

impl RenderFormat for RawFormat {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn render(&self, event: &TransferEvent) -> Vec<String> {
        match event {
            TransferEvent::Progress {
                status,
                bytes: None,
                percent: None,
                ..
            } => vec![status.clone()],
            TransferEvent::Progress {
                bytes,
                percent,
                rate,
                remaining,
                ..
            } => vec![format!(
                "{:>15} {:>4} {} {}",
                bytes.map(group_digits).unwrap_or_default(),
                percent.as_deref().unwrap_or(""),
                rate.as_deref().unwrap_or(""),
                remaining.as_deref().unwrap_or("")
            )],
            TransferEvent::Warning { status } => vec![status.clone()],
            TransferEvent::Error { message } => vec![message.clone()],
            TransferEvent::Summary {
                sent_bytes,
                recv_bytes,
                avg_rate,
                total_size,
                speedup,
            } => vec![
                format!(
                    "sent {} bytes  received {} bytes  {:.2} bytes/sec",
                    group_digits(*sent_bytes),
                    group_digits(*recv_bytes),
                    avg_rate
                ),
                format!(
                    "total size is {}  speedup is {:.2}",
                    group_digits(*total_size),
                    speedup
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress() -> TransferEvent {
        TransferEvent::Progress {
            status: "file.txt".to_string(),
            bytes: Some(1024),
            percent: Some("100%".to_string()),
            rate: Some("10.00kB/s".to_string()),
            remaining: Some("0:00:01".to_string()),
        }
    }

    fn summary() -> TransferEvent {
        TransferEvent::Summary {
            sent_bytes: 1024,
            recv_bytes: 0,
            avg_rate: 100.0,
            total_size: 2048,
            speedup: 2.0,
        }
    }

    #[test]
    fn test_for_name() {
        assert_eq!(for_name("json").map(|f| f.name()), Some("json"));
        assert_eq!(for_name("text").map(|f| f.name()), Some("text"));
        assert_eq!(for_name("raw").map(|f| f.name()), Some("raw"));
        assert!(for_name("yaml").is_none());
    }

    #[test]
    fn test_json_is_lossless() {
        let lines = JsonFormat.render(&progress());
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["msgType"], "progress");
        assert_eq!(value["status"], "file.txt");
        assert_eq!(value["bytes"], 1024);
        assert_eq!(value["percent"], "100%");
        assert_eq!(value["rate"], "10.00kB/s");
        assert_eq!(value["remaining"], "0:00:01");

        let lines = JsonFormat.render(&summary());
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["sentBytes"], 1024);
        assert_eq!(value["recvBytes"], 0);
        assert_eq!(value["totalSize"], 2048);
        assert_eq!(value["speedup"], 2.0);
    }

    #[test]
    fn test_text_humanizes_and_keeps_all_fields() {
        let lines = TextFormat.render(&progress());
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.contains("100%"));
        assert!(line.contains("1,024"));
        assert!(line.contains("1.00 KB"));
        assert!(line.contains("10.00kB/s"));
        assert!(line.contains("0:00:01"));
        assert!(line.contains("file.txt"));

        let lines = TextFormat.render(&summary());
        let line = &lines[0];
        assert!(line.contains("2,048"));
        assert!(line.contains("2.00 KB"));
        assert!(line.contains("Speedup: 2.00"));
    }

    #[test]
    fn test_text_status_only_renders_plain() {
        let lines = TextFormat.render(&TransferEvent::status("Preparing backup"));
        assert_eq!(lines, vec!["Preparing backup".to_string()]);
    }

    #[test]
    fn test_json_and_text_expose_same_values() {
        // the round-trip property: both formats must reflect the same
        // underlying fields
        let event = progress();
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormat.render(&event)[0]).unwrap();
        let text = TextFormat.render(&event).remove(0);

        assert!(text.contains(json["percent"].as_str().unwrap()));
        assert!(text.contains(json["rate"].as_str().unwrap()));
        assert!(text.contains(json["remaining"].as_str().unwrap()));
        assert!(text.contains(json["status"].as_str().unwrap()));
        assert!(text.contains(&group_digits(json["bytes"].as_u64().unwrap())));
    }

    #[test]
    fn test_raw_reconstructs_summary_lines() {
        let lines = RawFormat.render(&summary());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "sent 1,024 bytes  received 0 bytes  100.00 bytes/sec");
        assert_eq!(lines[1], "total size is 2,048  speedup is 2.00");
    }

    #[test]
    fn test_raw_progress_looks_like_rsync() {
        let lines = RawFormat.render(&progress());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("1,024"));
        assert!(lines[0].contains("100% 10.00kB/s 0:00:01"));
    }
}
