//! Classifies rsync's line-oriented, stateful stdout/stderr into typed
//! [`TransferEvent`]s.
//!
//! rsync's verbose protocol emits a filename/status line followed by zero or
//! more measurement lines describing it, so the classifier keeps the most
//! recent status line pending and attaches it to the measurements that
//! follow. Each complete line is checked against the known patterns in a
//! fixed precedence order; a line matching nothing becomes the new pending
//! status (never a fatal condition).

use crate::events::TransferEvent;
use once_cell::sync::Lazy;
use regex::Regex;

/// rsync exit code for "some files vanished before they could be
/// transferred"; treated as success.
pub const VANISHED_EXIT_CODE: i32 = 24;

/// Largest integer exactly representable in an IEEE double; byte counts
/// beyond this clamp to 0 so downstream consumers never see an unsafe value.
const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// Measurement line: byte count, percentage, rate, ETA.
static PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[\d,]+\s+\d+%\s+[\d.]+\S*/s\s+[\d:]+").expect("valid regex"));

/// Transfer totals: "sent N bytes  received M bytes  R bytes/sec".
static SENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*sent\s+([\d,]+)\s+bytes\s+received\s+([\d,]+)\s+bytes\s+([\d,.]+)\s+bytes/sec")
        .expect("valid regex")
});

/// Final summary: "total size is N  speedup is R".
static TOTAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*total size is\s+([\d,]+)\s+speedup(?:\s+is)?\s+([\d.]+)").expect("valid regex")
});

/// Diagnostic lines rsync prefixes itself.
static ERROR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*rsync( error)?:").expect("valid regex"));

/// A line containing an unescaped double-quoted substring marks the pending
/// status as a warning.
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[^\\]"[^"/]+""#).expect("valid regex"));

fn parse_byte_count(field: &str) -> u64 {
    let cleaned = field.replace(',', "");
    match cleaned.parse::<u64>() {
        Ok(n) if n <= MAX_SAFE_INTEGER => n,
        Ok(n) => {
            tracing::debug!(value = n, "byte count not a safe integer, clamping to 0");
            0
        }
        Err(_) => 0,
    }
}

fn parse_rate(field: &str) -> f64 {
    field.replace(',', "").parse::<f64>().unwrap_or(0.0)
}

#[derive(Debug, Default)]
struct SummaryBuilder {
    sent_bytes: Option<u64>,
    recv_bytes: Option<u64>,
    avg_rate: Option<f64>,
    total_size: Option<u64>,
    speedup: Option<f64>,
}

impl SummaryBuilder {
    /// The accumulator is emittable once the closing "total size" line has
    /// arrived.
    fn build(&self) -> Option<TransferEvent> {
        let speedup = self.speedup?;
        Some(TransferEvent::Summary {
            sent_bytes: self.sent_bytes.unwrap_or(0),
            recv_bytes: self.recv_bytes.unwrap_or(0),
            avg_rate: self.avg_rate.unwrap_or(0.0),
            total_size: self.total_size.unwrap_or(0),
            speedup,
        })
    }
}

/// Outcome of the transfer process, produced by [`OutputClassifier::finish`].
#[derive(Debug)]
pub struct Completion {
    pub success: bool,
    /// Whether the closing summary was observed. A clean exit without it
    /// means rsync never confirmed the transfer totals, so the work queued
    /// for a verified transfer must not run.
    pub summarized: bool,
    pub events: Vec<TransferEvent>,
}

/// Streaming classifier over the transfer tool's stdout/stderr chunks.
#[derive(Debug, Default)]
pub struct OutputClassifier {
    stdout_partial: String,
    stderr_partial: String,
    /// Most recent line that looked like a filename/status rather than a
    /// measurement. Never flushed at end of stream; silently discarded.
    pending_status: String,
    summary: SummaryBuilder,
    finished: Option<bool>,
}

impl OutputClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw stdout chunk. Partial lines are buffered until completed
    /// by a later chunk; carriage returns from redrawn progress lines count
    /// as line breaks.
    pub fn feed_stdout(&mut self, chunk: &[u8]) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        self.stdout_partial.push_str(&String::from_utf8_lossy(chunk));
        while let Some(idx) = self.stdout_partial.find(['\n', '\r']) {
            let line: String = self.stdout_partial.drain(..=idx).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                self.classify_line(line, &mut events);
            }
        }
        events
    }

    /// Feed a raw stderr chunk; every complete non-empty line becomes an
    /// error event.
    pub fn feed_stderr(&mut self, chunk: &[u8]) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        self.stderr_partial.push_str(&String::from_utf8_lossy(chunk));
        while let Some(idx) = self.stderr_partial.find(['\n', '\r']) {
            let line: String = self.stderr_partial.drain(..=idx).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                events.push(TransferEvent::error(line));
            }
        }
        events
    }

    fn classify_line(&mut self, line: &str, events: &mut Vec<TransferEvent>) {
        if PROGRESS_RE.is_match(line) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            events.push(TransferEvent::Progress {
                status: self.pending_status.clone(),
                bytes: fields.first().map(|f| parse_byte_count(f)),
                percent: fields.get(1).map(|f| f.to_string()),
                rate: fields.get(2).map(|f| f.to_string()),
                remaining: fields.get(3).map(|f| f.to_string()),
            });
        } else if let Some(caps) = SENT_RE.captures(line) {
            self.summary.sent_bytes = Some(parse_byte_count(&caps[1]));
            self.summary.recv_bytes = Some(parse_byte_count(&caps[2]));
            self.summary.avg_rate = Some(parse_rate(&caps[3]));
        } else if let Some(caps) = TOTAL_RE.captures(line) {
            self.summary.total_size = Some(parse_byte_count(&caps[1]));
            self.summary.speedup = Some(parse_rate(&caps[2]));
        } else if ERROR_RE.is_match(line) {
            events.push(TransferEvent::error(line));
        } else if QUOTED_RE.is_match(line) {
            events.push(TransferEvent::Warning {
                status: self.pending_status.clone(),
            });
        } else {
            // unmatched lines degrade to the new pending status
            self.pending_status = line.to_string();
        }
    }

    /// Handle process completion. Exit code 0 and the files-vanished
    /// sentinel both count as success; anything else, or a delivered process
    /// error, produces a fatal error event. Repeated completion signals
    /// yield no further events.
    pub fn finish(&mut self, process_error: Option<String>, exit_code: i32) -> Completion {
        if let Some(success) = self.finished {
            return Completion {
                success,
                summarized: false,
                events: Vec::new(),
            };
        }

        let success =
            process_error.is_none() && (exit_code == 0 || exit_code == VANISHED_EXIT_CODE);
        self.finished = Some(success);

        let mut summarized = false;
        let mut events = Vec::new();
        if success {
            if let Some(summary) = self.summary.build() {
                events.push(summary);
                summarized = true;
            }
        } else {
            events.push(TransferEvent::error(format!(
                "Backup failed, rsync exited with code {}",
                exit_code
            )));
            if let Some(detail) = process_error {
                events.push(TransferEvent::error(detail));
            }
        }

        Completion {
            success,
            summarized,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_lines(classifier: &mut OutputClassifier, lines: &[&str]) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        for line in lines {
            events.extend(classifier.feed_stdout(format!("{}\n", line).as_bytes()));
        }
        events
    }

    #[test]
    fn test_progress_attaches_pending_status() {
        let mut classifier = OutputClassifier::new();
        let events = feed_lines(
            &mut classifier,
            &["file.txt", "1,024 100% 10.00kB/s 0:00:01"],
        );

        assert_eq!(events.len(), 1);
        match &events[0] {
            TransferEvent::Progress {
                status,
                bytes,
                percent,
                rate,
                remaining,
            } => {
                assert_eq!(status, "file.txt");
                assert_eq!(*bytes, Some(1024));
                assert_eq!(percent.as_deref(), Some("100%"));
                assert_eq!(rate.as_deref(), Some("10.00kB/s"));
                assert_eq!(remaining.as_deref(), Some("0:00:01"));
            }
            other => panic!("expected progress event, got {:?}", other),
        }
    }

    #[test]
    fn test_summary_emitted_on_successful_exit() {
        let mut classifier = OutputClassifier::new();
        let events = feed_lines(
            &mut classifier,
            &[
                "file.txt",
                "1,024 100% 10.00kB/s 0:00:01",
                "sent 1,024 bytes received 0 bytes 100.00 bytes/sec",
                "total size is 2,048  speedup 2.00",
            ],
        );
        // summary lines accumulate without emitting anything yet
        assert_eq!(events.len(), 1);

        let completion = classifier.finish(None, 0);
        assert!(completion.success);
        assert!(completion.summarized);
        assert_eq!(
            completion.events,
            vec![TransferEvent::Summary {
                sent_bytes: 1024,
                recv_bytes: 0,
                avg_rate: 100.0,
                total_size: 2048,
                speedup: 2.0,
            }]
        );
    }

    #[test]
    fn test_summary_with_speedup_is_keyword() {
        let mut classifier = OutputClassifier::new();
        feed_lines(
            &mut classifier,
            &[
                "sent 100 bytes received 50 bytes 30.00 bytes/sec",
                "total size is 500 speedup is 3.33",
            ],
        );
        let completion = classifier.finish(None, 0);
        match &completion.events[0] {
            TransferEvent::Summary {
                total_size,
                speedup,
                ..
            } => {
                assert_eq!(*total_size, 500);
                assert!((speedup - 3.33).abs() < f64::EPSILON);
            }
            other => panic!("expected summary, got {:?}", other),
        }
    }

    #[test]
    fn test_error_prefix_emits_immediately() {
        let mut classifier = OutputClassifier::new();
        let events = feed_lines(
            &mut classifier,
            &["rsync: link_stat \"/missing\" failed: No such file"],
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransferEvent::Error { .. }));
    }

    #[test]
    fn test_unescaped_quote_flags_pending_status_as_warning() {
        let mut classifier = OutputClassifier::new();
        let events = feed_lines(
            &mut classifier,
            &["some/file", "skipping non-regular file \"weird\""],
        );
        assert_eq!(
            events,
            vec![TransferEvent::Warning {
                status: "some/file".to_string()
            }]
        );
    }

    #[test]
    fn test_carriage_return_redraw_splits_lines() {
        let mut classifier = OutputClassifier::new();
        let mut events = classifier.feed_stdout(b"file.txt\n");
        events.extend(
            classifier.feed_stdout(b"512 50% 5.00kB/s 0:00:02\r1,024 100% 10.00kB/s 0:00:01\r"),
        );
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_partial_lines_buffer_across_chunks() {
        let mut classifier = OutputClassifier::new();
        assert!(classifier.feed_stdout(b"file").is_empty());
        assert!(classifier.feed_stdout(b".txt\n1,024 100%").is_empty());
        let events = classifier.feed_stdout(b" 10.00kB/s 0:00:01\n");
        assert_eq!(events.len(), 1);
        match &events[0] {
            TransferEvent::Progress { status, .. } => assert_eq!(status, "file.txt"),
            other => panic!("expected progress event, got {:?}", other),
        }
    }

    #[test]
    fn test_unsafe_byte_count_clamps_to_zero() {
        let mut classifier = OutputClassifier::new();
        // 2^53, one past the largest safe integer
        let events = feed_lines(
            &mut classifier,
            &["big.bin", "9,007,199,254,740,992 100% 10.00kB/s 0:00:01"],
        );
        match &events[0] {
            TransferEvent::Progress { bytes, .. } => assert_eq!(*bytes, Some(0)),
            other => panic!("expected progress event, got {:?}", other),
        }
    }

    #[test]
    fn test_stderr_lines_become_errors() {
        let mut classifier = OutputClassifier::new();
        let events = classifier.feed_stderr(b"connection refused\npermission denied\n");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, TransferEvent::Error { .. })));
    }

    #[test]
    fn test_vanished_sentinel_treated_as_success() {
        let mut classifier = OutputClassifier::new();
        feed_lines(
            &mut classifier,
            &[
                "sent 10 bytes received 5 bytes 3.00 bytes/sec",
                "total size is 10 speedup is 1.00",
            ],
        );
        let completion = classifier.finish(None, VANISHED_EXIT_CODE);
        assert!(completion.success);
        assert_eq!(completion.events.len(), 1);
    }

    #[test]
    fn test_nonzero_exit_is_fatal() {
        let mut classifier = OutputClassifier::new();
        let completion = classifier.finish(None, 23);
        assert!(!completion.success);
        assert_eq!(
            completion.events,
            vec![TransferEvent::error(
                "Backup failed, rsync exited with code 23"
            )]
        );
    }

    #[test]
    fn test_process_error_is_fatal_even_with_exit_zero() {
        let mut classifier = OutputClassifier::new();
        let completion = classifier.finish(Some("spawn failed".to_string()), 0);
        assert!(!completion.success);
        assert_eq!(completion.events.len(), 2);
    }

    #[test]
    fn test_repeated_finish_yields_nothing() {
        let mut classifier = OutputClassifier::new();
        feed_lines(
            &mut classifier,
            &[
                "sent 10 bytes received 5 bytes 3.00 bytes/sec",
                "total size is 10 speedup is 1.00",
            ],
        );
        let first = classifier.finish(None, 0);
        assert_eq!(first.events.len(), 1);

        let second = classifier.finish(None, 0);
        assert!(second.success);
        assert!(second.events.is_empty());
    }

    #[test]
    fn test_pending_status_dropped_at_end_of_stream() {
        let mut classifier = OutputClassifier::new();
        let events = feed_lines(&mut classifier, &["never-flushed-file"]);
        assert!(events.is_empty());

        let completion = classifier.finish(None, 0);
        // no trailing warning or progress for the dangling status line
        assert!(completion.events.is_empty());
    }

    #[test]
    fn test_no_summary_without_total_line() {
        let mut classifier = OutputClassifier::new();
        feed_lines(
            &mut classifier,
            &["sent 10 bytes received 5 bytes 3.00 bytes/sec"],
        );
        let completion = classifier.finish(None, 0);
        assert!(completion.success);
        assert!(!completion.summarized);
        assert!(completion.events.is_empty());
    }

    #[test]
    fn test_clean_exit_without_any_output_is_unsummarized() {
        let mut classifier = OutputClassifier::new();
        let completion = classifier.finish(None, 0);
        assert!(completion.success);
        assert!(!completion.summarized);
        assert!(completion.events.is_empty());
    }
}
