//! Shell command execution, locally or through a remote-shell prefix.
//!
//! All snapshot maintenance happens through single `/bin/bash -c` scripts.
//! When a remote shell (typically `ssh`) is configured the script is wrapped
//! in double quotes and prefixed with `<shell> <host>`, mirroring how rsync
//! itself reaches the destination.

use crate::utils::errors::{BackupError, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// A parsed `[user@host:]path` destination specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// `user@host` portion, absent for local targets
    pub host: Option<String>,

    /// Directory holding the snapshots
    pub root: String,
}

impl RemoteTarget {
    /// Parse a `[user@host:]path` specification. The first `:` separates the
    /// host from the path; without one the whole string is a local path.
    pub fn parse(spec: &str) -> Result<Self> {
        let (host, root) = match spec.split_once(':') {
            Some((host, path)) => (Some(host.to_string()), path.to_string()),
            None => (None, spec.to_string()),
        };

        if root.is_empty() {
            return Err(BackupError::Config(format!(
                "destination '{}' has no path component",
                spec
            )));
        }

        Ok(RemoteTarget { host, root })
    }

    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }
}

/// Escape every single or double quote that is not already preceded by a
/// backslash, so paths can be embedded into a shell script without breaking
/// its syntax.
pub fn escape_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if (c == '\'' || c == '"') && !escaped {
            out.push('\\');
        }
        escaped = c == '\\';
        out.push(c);
    }
    out
}

/// Quote a path parameter for embedding into a command template.
pub fn quoted(path: &str) -> String {
    format!("'{}'", escape_quotes(path))
}

/// Result of a fully drained shell command.
#[derive(Debug)]
pub struct ExecStatus {
    pub exit_code: i32,
    pub stderr_lines: Vec<String>,
}

impl ExecStatus {
    /// A command counts as successful only with exit code 0 and a silent
    /// stderr stream.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.stderr_lines.is_empty()
    }
}

/// Spawns maintenance scripts against a local or remote target.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    shell: Option<String>,
    host: Option<String>,
}

impl CommandRunner {
    pub fn new(target: &RemoteTarget, shell: Option<&str>) -> Self {
        CommandRunner {
            shell: shell.map(str::to_string),
            host: target.host.clone(),
        }
    }

    /// Compose the full `bash -c` payload, applying the remote-shell prefix
    /// when one is configured.
    pub(crate) fn invocation(&self, script: &str) -> String {
        match (&self.shell, &self.host) {
            (Some(shell), Some(host)) => format!("{} {} \"{}\"", shell, host, script),
            _ => script.to_string(),
        }
    }

    /// Run a script to completion, delivering stdout to `on_stdout` in raw
    /// chunks (buffer boundaries are arbitrary and must not be relied upon)
    /// and collecting stderr line-by-line. Stderr output does not abort the
    /// stream; it surfaces in the returned [`ExecStatus`] after exit.
    pub async fn run<F>(&self, script: &str, mut on_stdout: F) -> Result<ExecStatus>
    where
        F: FnMut(&[u8]),
    {
        let invocation = self.invocation(script);
        tracing::debug!(command = %invocation, "executing shell command");

        let mut child = Command::new("/bin/bash")
            .arg("-c")
            .arg(&invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            BackupError::Protocol("child stdout was not captured".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            BackupError::Protocol("child stderr was not captured".to_string())
        })?;

        let mut stderr_reader = BufReader::new(stderr).lines();
        let mut stderr_lines = Vec::new();
        let mut buf = [0u8; 8192];
        let mut stdout_done = false;
        let mut stderr_done = false;

        while !(stdout_done && stderr_done) {
            tokio::select! {
                read = stdout.read(&mut buf), if !stdout_done => {
                    match read? {
                        0 => stdout_done = true,
                        n => on_stdout(&buf[..n]),
                    }
                }
                line = stderr_reader.next_line(), if !stderr_done => {
                    match line? {
                        Some(line) => stderr_lines.push(line),
                        None => stderr_done = true,
                    }
                }
            }
        }

        let status = child.wait().await?;
        Ok(ExecStatus {
            exit_code: status.code().unwrap_or(-1),
            stderr_lines,
        })
    }
}
