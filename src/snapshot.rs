//! Snapshot directory lifecycle: prepare, finalize, retention rotation.
//!
//! Snapshot directories are named `YYYY-MM-DD.HH-MM-SS`, zero-padded so that
//! lexicographic order matches chronological order, with an `.incomplete`
//! suffix while a backup is being written. One `SnapshotManager` value owns
//! the state of a single run; there is no process-wide mutable state.

use crate::shell::{quoted, CommandRunner, RemoteTarget};
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

pub const INCOMPLETE_SUFFIX: &str = ".incomplete";

const NAME_FORMAT: &str = "%Y-%m-%d.%H-%M-%S";

/// A finalized snapshot directory name. The anchors exclude anything still
/// carrying the incomplete suffix.
static FINAL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}\.\d{2}-\d{2}-\d{2}$").expect("valid regex"));

fn join_remote(root: &str, name: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), name)
}

/// Parser for the directory listing printed by the prepare script.
///
/// The script announces the number of entries (`ls -1 | wc -l`) before
/// printing them (`ls -1 | sort -r`), because remote output can split or
/// merge arbitrarily across buffer boundaries. Parsing is therefore driven
/// by the announced count rather than stream EOF: once `seen == expected`
/// the parse is complete and any remaining buffered output is ignored.
#[derive(Debug)]
pub(crate) struct ListingParser {
    state: ListingState,
    partial: String,
    /// Final snapshot names in listing order (most recent first)
    finals: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListingState {
    AwaitingCount,
    AwaitingEntries { expected: usize, seen: usize },
    Complete,
}

impl ListingParser {
    fn new() -> Self {
        ListingParser {
            state: ListingState::AwaitingCount,
            partial: String::new(),
            finals: Vec::new(),
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.partial.push_str(&String::from_utf8_lossy(chunk));
        while let Some(idx) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=idx).collect();
            self.feed_line(line.trim_end_matches(['\n', '\r']));
            if self.is_complete() {
                return;
            }
        }
    }

    fn feed_line(&mut self, line: &str) {
        match self.state {
            ListingState::AwaitingCount => {
                // The first line parseable as a non-negative integer is the
                // announced entry count; anything else before it is noise.
                if let Ok(expected) = line.trim().parse::<usize>() {
                    self.state = if expected == 0 {
                        ListingState::Complete
                    } else {
                        ListingState::AwaitingEntries { expected, seen: 0 }
                    };
                }
            }
            ListingState::AwaitingEntries { expected, seen } => {
                let name = line.trim();
                if FINAL_NAME_RE.is_match(name) {
                    self.finals.push(name.to_string());
                }
                let seen = seen + 1;
                self.state = if seen == expected {
                    ListingState::Complete
                } else {
                    ListingState::AwaitingEntries { expected, seen }
                };
            }
            ListingState::Complete => {}
        }
    }

    fn is_complete(&self) -> bool {
        self.state == ListingState::Complete
    }
}

/// Owns the remote/local snapshot directory lifecycle for one run.
#[derive(Debug)]
pub struct SnapshotManager {
    runner: CommandRunner,
    root: String,
    final_name: String,
    temp_name: String,
    link_dest: Option<String>,
    /// Finalized snapshot names, ascending (oldest first)
    snapshots: Vec<String>,
    finalized: bool,
}

impl SnapshotManager {
    pub fn new(target: &RemoteTarget, shell: Option<&str>, now: DateTime<Utc>) -> Self {
        let final_name = now.format(NAME_FORMAT).to_string();
        let temp_name = format!("{}{}", final_name, INCOMPLETE_SUFFIX);
        SnapshotManager {
            runner: CommandRunner::new(target, shell),
            root: target.root.clone(),
            final_name,
            temp_name,
            link_dest: None,
            snapshots: Vec::new(),
            finalized: false,
        }
    }

    /// Working directory for the in-flight backup.
    pub fn temp_dest(&self) -> String {
        join_remote(&self.root, &self.temp_name)
    }

    /// Directory name the backup takes once finalized.
    pub fn final_dest(&self) -> String {
        join_remote(&self.root, &self.final_name)
    }

    /// Previous snapshot to hard-link unchanged files against, if any.
    pub fn link_dest(&self) -> Option<&str> {
        self.link_dest.as_deref()
    }

    /// Number of finalized snapshots currently on disk.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether this run's snapshot has been renamed to its final name.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn prepare_script(&self) -> String {
        // Create this run's working directory, discard stale incomplete
        // directories from aborted runs, then print the entry count followed
        // by the listing, newest first.
        format!(
            "mkdir -p {temp} && cd {root} && \
             find . -maxdepth 1 -type d -name '*{suffix}' ! -name {keep} -exec rm -rf {{}} + ; \
             ls -1 | wc -l; ls -1 | sort -r",
            temp = quoted(&self.temp_dest()),
            root = quoted(&self.root),
            suffix = INCOMPLETE_SUFFIX,
            keep = quoted(&self.temp_name),
        )
    }

    fn finalize_script(&self) -> String {
        format!(
            "cd {root} && mv {temp} {finished}",
            root = quoted(&self.root),
            temp = quoted(&self.temp_dest()),
            finished = quoted(&self.final_dest()),
        )
    }

    fn rotate_script(&self, doomed: &[String]) -> String {
        let names = doomed
            .iter()
            .map(|name| quoted(name))
            .collect::<Vec<_>>()
            .join(" ");
        format!("cd {root} && rm -rf {names}", root = quoted(&self.root))
    }

    /// The oldest finalized snapshots that fall outside the retention
    /// window. The newest snapshot is never a candidate.
    fn rotation_candidates(&self, max_snapshots: usize) -> &[String] {
        let count = self.snapshots.len();
        if count <= max_snapshots {
            return &[];
        }
        let excess = (count - max_snapshots).min(count.saturating_sub(1));
        &self.snapshots[..excess]
    }

    /// Discover prior snapshots, create this run's working directory and
    /// select the link target.
    ///
    /// Fails if the command exits non-zero or produced any stderr output;
    /// such errors only surface after the process fully exits.
    pub async fn prepare(&mut self) -> Result<()> {
        let script = self.prepare_script();
        let mut parser = ListingParser::new();
        let status = self
            .runner
            .run(&script, |chunk| {
                if !parser.is_complete() {
                    parser.feed(chunk);
                }
            })
            .await?;

        if !status.success() {
            return Err(connectivity("preparing snapshot directory", &status));
        }
        if !parser.is_complete() {
            return Err(BackupError::Protocol(
                "snapshot listing ended before the announced entry count".to_string(),
            ));
        }

        self.link_dest = parser
            .finals
            .first()
            .map(|name| join_remote(&self.root, name));
        parser.finals.reverse();
        self.snapshots = parser.finals;

        tracing::debug!(
            count = self.snapshots.len(),
            link_dest = ?self.link_dest,
            "prepared snapshot directory"
        );
        Ok(())
    }

    /// Atomically rename the working directory to its final name. On failure
    /// the snapshot stays incomplete and state is unchanged.
    pub async fn finalize(&mut self) -> Result<()> {
        let script = self.finalize_script();
        let status = self.runner.run(&script, |_| {}).await?;
        if !status.success() {
            return Err(maintenance("finalizing snapshot", &status));
        }

        self.finalized = true;
        self.snapshots.push(self.final_name.clone());
        Ok(())
    }

    /// Delete the oldest snapshots beyond the retention window. Issues no
    /// command when `max_snapshots` is unset or nothing exceeds it.
    pub async fn rotate(&mut self, max_snapshots: Option<usize>) -> Result<()> {
        let Some(max) = max_snapshots else {
            return Ok(());
        };

        let doomed = self.rotation_candidates(max).to_vec();
        if doomed.is_empty() {
            return Ok(());
        }

        let script = self.rotate_script(&doomed);
        let status = self.runner.run(&script, |_| {}).await?;
        if !status.success() {
            return Err(maintenance("deleting old snapshots", &status));
        }

        tracing::debug!(deleted = doomed.len(), "rotated old snapshots");
        self.snapshots.drain(..doomed.len());
        Ok(())
    }
}

fn failure_detail(status: &crate::shell::ExecStatus) -> String {
    if let Some(line) = status.stderr_lines.first() {
        line.clone()
    } else {
        format!("command exited with code {}", status.exit_code)
    }
}

fn connectivity(context: &str, status: &crate::shell::ExecStatus) -> BackupError {
    BackupError::Connectivity {
        context: context.to_string(),
        detail: failure_detail(status),
    }
}

/// Maintenance commands run after a completed transfer; their failures do
/// not indicate an unreachable server.
fn maintenance(context: &str, status: &crate::shell::ExecStatus) -> BackupError {
    BackupError::Finalize {
        context: context.to_string(),
        detail: failure_detail(status),
    }
}
