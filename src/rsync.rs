//! Builds the rsync invocation for a prepared snapshot.
//!
//! The invocation is composed as a single command string executed through
//! `/bin/bash -c`, with every embedded path passed through the quote
//! escaping rule from [`crate::shell`].

use crate::config::Config;
use crate::shell::{escape_quotes, RemoteTarget};

/// Default flag set: archive semantics plus ACLs, extended attributes,
/// hardlinks, symlinks, modification times and verbose output.
const DEFAULT_FLAGS: &str = "aAXHltv";

/// Built-in exclude list, applied when no exclude file is configured.
const DEFAULT_EXCLUDE_FILE: &str = include_str!("../data/default-exclude.txt");

fn default_excludes() -> impl Iterator<Item = &'static str> {
    DEFAULT_EXCLUDE_FILE
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

#[derive(Debug, Clone)]
pub struct RsyncCommand {
    source: String,
    destination: String,
    flags: String,
    options: Vec<(String, Option<String>)>,
    excludes: Vec<String>,
}

impl RsyncCommand {
    pub fn new(source: &str, destination: &str) -> Self {
        RsyncCommand {
            source: source.to_string(),
            destination: destination.to_string(),
            flags: DEFAULT_FLAGS.to_string(),
            options: Vec::new(),
            excludes: Vec::new(),
        }
    }

    /// Compose the invocation for a prepared snapshot run.
    pub fn for_backup(
        config: &Config,
        target: &RemoteTarget,
        temp_dest: &str,
        link_dest: Option<&str>,
    ) -> Self {
        let destination = match &target.host {
            Some(host) => format!("{}:{}", host, temp_dest),
            None => temp_dest.to_string(),
        };
        Self::for_transfer(config, &destination, link_dest)
    }

    /// Compose the invocation for a restore: straight to the configured
    /// destination, with no snapshot linking.
    pub fn for_restore(config: &Config, destination: &str) -> Self {
        Self::for_transfer(config, destination, None)
    }

    fn for_transfer(config: &Config, destination: &str, link_dest: Option<&str>) -> Self {
        let mut command = RsyncCommand::new(&config.source, destination);
        command.set("numeric-ids", None);
        command.set("progress", None);
        command.set("info", Some("progress2"));

        if !config.no_delete {
            command.set("delete", None);
            command.set("delete-excluded", None);
        }
        if config.no_delete_excludes {
            command.unset("delete-excluded");
        }
        if config.checksum {
            command.set("checksum", None);
        }
        if config.accurate_progress {
            // without incremental recursion the progress percentage covers
            // the whole transfer
            command.set("no-inc-recursive", None);
        }

        for pattern in &config.exclude {
            command.exclude(pattern);
        }
        match &config.exclude_file {
            Some(file) => command.set("exclude-from", Some(&file.to_string_lossy())),
            None => {
                for pattern in default_excludes() {
                    command.exclude(pattern);
                }
            }
        }

        let rsync_path = config.rsync_path.as_deref().unwrap_or("sudo rsync");
        command.set("rsync-path", Some(rsync_path));

        if let Some(shell) = &config.shell {
            command.set("rsh", Some(shell));
        }
        if let Some(link_dest) = link_dest {
            command.set("link-dest", Some(link_dest));
        }

        for arg in &config.set_args {
            match arg.split_once('=') {
                Some((name, value)) => command.set(name, Some(value)),
                None => command.set(arg, None),
            }
        }
        for arg in &config.unset_args {
            command.unset(arg);
        }

        command
    }

    /// Set a long option, replacing any previous value.
    pub fn set(&mut self, name: &str, value: Option<&str>) {
        self.unset(name);
        self.options
            .push((name.to_string(), value.map(str::to_string)));
    }

    pub fn unset(&mut self, name: &str) {
        self.options.retain(|(existing, _)| existing != name);
    }

    pub fn exclude(&mut self, pattern: &str) {
        self.excludes.push(pattern.to_string());
    }

    /// Render the complete command string.
    pub fn command(&self) -> String {
        let mut parts = vec!["rsync".to_string(), format!("-{}", self.flags)];

        for (name, value) in &self.options {
            match value {
                Some(value) => parts.push(format!("--{}=\"{}\"", name, escape_quotes(value))),
                None => parts.push(format!("--{}", name)),
            }
        }
        for pattern in &self.excludes {
            parts.push(format!("--exclude=\"{}\"", escape_quotes(pattern)));
        }

        parts.push(self.source.clone());
        parts.push(format!("\"{}\"", escape_quotes(&self.destination)));
        parts.join(" ")
    }
}
