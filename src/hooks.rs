//! Pre/post backup hook scripts.
//!
//! A hook is any executable file. Its stdout streams through the event
//! pipeline as progress lines and its stderr as error lines. A hook that is
//! missing, not executable, or fails to spawn resolves with exit code -1
//! rather than propagating a failure out of the executor.

use crate::events::TransferEvent;
use crate::output::EventLogger;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Exit code reported when a hook never ran.
pub const NOT_RUN_EXIT_CODE: i32 = -1;

/// Result of one hook execution.
#[derive(Debug)]
pub struct HookInvocation {
    pub path: PathBuf,
    pub exit_code: i32,
    pub events: Vec<TransferEvent>,
}

impl HookInvocation {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct HookExecutor<'a> {
    logger: &'a EventLogger,
}

impl<'a> HookExecutor<'a> {
    pub fn new(logger: &'a EventLogger) -> Self {
        HookExecutor { logger }
    }

    /// Run one hook script to completion, streaming its output through the
    /// event pipeline.
    pub async fn run(&self, path: &Path) -> HookInvocation {
        if let Some(reason) = not_executable(path) {
            let event = TransferEvent::error(format!(
                "Hook '{}' is not executable: {}",
                path.display(),
                reason
            ));
            self.logger.emit(&event);
            return HookInvocation {
                path: path.to_path_buf(),
                exit_code: NOT_RUN_EXIT_CODE,
                events: vec![event],
            };
        }

        let spawned = Command::new(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                let event = TransferEvent::error(format!(
                    "Hook '{}' failed to start: {}",
                    path.display(),
                    err
                ));
                self.logger.emit(&event);
                return HookInvocation {
                    path: path.to_path_buf(),
                    exit_code: NOT_RUN_EXIT_CODE,
                    events: vec![event],
                };
            }
        };

        let mut events = Vec::new();
        let mut stdout_lines = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr_lines = child.stderr.take().map(|s| BufReader::new(s).lines());
        let mut stdout_done = stdout_lines.is_none();
        let mut stderr_done = stderr_lines.is_none();

        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = next_line(&mut stdout_lines), if !stdout_done => {
                    match line {
                        Some(line) => {
                            let event = TransferEvent::status(line);
                            self.logger.emit(&event);
                            events.push(event);
                        }
                        None => stdout_done = true,
                    }
                }
                line = next_line(&mut stderr_lines), if !stderr_done => {
                    match line {
                        Some(line) => {
                            let event = TransferEvent::error(line);
                            self.logger.emit(&event);
                            events.push(event);
                        }
                        None => stderr_done = true,
                    }
                }
            }
        }

        let exit_code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(NOT_RUN_EXIT_CODE),
            Err(err) => {
                tracing::warn!(%err, path = %path.display(), "failed to await hook");
                NOT_RUN_EXIT_CODE
            }
        };

        tracing::debug!(path = %path.display(), exit_code, "hook finished");
        HookInvocation {
            path: path.to_path_buf(),
            exit_code,
            events,
        }
    }
}

async fn next_line(
    lines: &mut Option<tokio::io::Lines<BufReader<impl tokio::io::AsyncRead + Unpin>>>,
) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

/// Returns a reason when the path cannot be executed directly.
fn not_executable(path: &Path) -> Option<String> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => return Some(err.to_string()),
    };
    if !metadata.is_file() {
        return Some("not a regular file".to_string());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Some("missing execute permission".to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_hook_resolves_with_minus_one() {
        let logger = EventLogger::new(None);
        let executor = HookExecutor::new(&logger);
        let invocation = executor.run(Path::new("/nonexistent/hook.sh")).await;
        assert_eq!(invocation.exit_code, NOT_RUN_EXIT_CODE);
        assert!(!invocation.success());
        assert_eq!(invocation.events.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_executable_hook_resolves_with_minus_one() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hook.sh");
        fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let logger = EventLogger::new(None);
        let invocation = HookExecutor::new(&logger).run(&path).await;
        assert_eq!(invocation.exit_code, NOT_RUN_EXIT_CODE);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hook_streams_output_as_events() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "hook.sh", "echo working\necho oops >&2");

        let logger = EventLogger::new(None);
        let invocation = HookExecutor::new(&logger).run(&path).await;
        assert_eq!(invocation.exit_code, 0);
        assert!(invocation.success());

        assert!(invocation.events.contains(&TransferEvent::status("working")));
        assert!(invocation.events.contains(&TransferEvent::error("oops")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hook_exit_code_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "hook.sh", "exit 7");

        let logger = EventLogger::new(None);
        let invocation = HookExecutor::new(&logger).run(&path).await;
        assert_eq!(invocation.exit_code, 7);
        assert!(!invocation.success());
    }
}
