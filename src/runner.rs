//! Backup run orchestration.
//!
//! Drives one run end to end: prepare the snapshot directory, run pre-backup
//! hooks, execute rsync while classifying its output into events, then on
//! success finalize the snapshot, rotate old ones and run post-backup hooks
//! through the success-callback pipeline.

use crate::classify::OutputClassifier;
use crate::config::Config;
use crate::events::TransferEvent;
use crate::hooks::HookExecutor;
use crate::output::EventLogger;
use crate::rsync::RsyncCommand;
use crate::shell::RemoteTarget;
use crate::snapshot::SnapshotManager;
use crate::utils::errors::{BackupError, Result};
use chrono::Utc;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct Runner {
    config: Config,
    logger: Arc<EventLogger>,
}

impl Runner {
    pub fn new(config: Config) -> Result<Self> {
        let mut logger = EventLogger::new(config.log_format.as_deref());
        if let Some(path) = &config.log_file {
            let level = config.log_file_level.as_deref().unwrap_or("ALL");
            logger.set_output_file(path, level)?;
        }

        Ok(Runner {
            config,
            logger: Arc::new(logger),
        })
    }

    /// Execute one backup run. Errors are also reported through the event
    /// pipeline before they propagate.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        match self.run_inner(cancel).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // transfer failures already produced their own events
                if !matches!(err, BackupError::Transfer { .. }) {
                    self.logger.emit(&TransferEvent::error(err.to_string()));
                }
                Err(err)
            }
        }
    }

    fn phase(&self) -> &'static str {
        if self.config.restore {
            "restore"
        } else {
            "backup"
        }
    }

    async fn run_inner(&self, cancel: CancellationToken) -> Result<()> {
        let destination = self
            .config
            .destination
            .as_deref()
            .ok_or_else(|| BackupError::Config("--dst is required".to_string()))?;
        let target = RemoteTarget::parse(destination)?;

        if self.config.restore {
            return self.run_restore(destination, cancel).await;
        }

        self.logger.state_change("Preparing backup");

        let mut manager = SnapshotManager::new(&target, self.config.shell.as_deref(), Utc::now());
        manager.prepare().await?;

        let temp_dest = manager.temp_dest();
        let link_dest = manager.link_dest().map(str::to_string);
        if link_dest.is_none() {
            self.logger
                .state_change("No previous snapshots detected, creating full backup");
        }

        self.run_pre_hooks().await?;

        let rsync =
            RsyncCommand::for_backup(&self.config, &target, &temp_dest, link_dest.as_deref());
        if self.config.print_command {
            println!("Executing rsync with command: {}", rsync.command());
        }

        let mut banner = format!("Starting backup - {}", temp_dest);
        if let Some(link_dest) = &link_dest {
            banner.push_str(&format!(" - incrementing from {}", link_dest));
        }
        self.logger.state_change(&banner);

        self.register_success_callbacks(Some(manager));
        self.execute_transfer(&rsync.command(), cancel).await
    }

    /// Restore runs rsync straight at the configured destination; there is
    /// no snapshot to prepare, finalize or rotate.
    async fn run_restore(&self, destination: &str, cancel: CancellationToken) -> Result<()> {
        self.logger.state_change("Preparing restore");
        self.run_pre_hooks().await?;

        let rsync = RsyncCommand::for_restore(&self.config, destination);
        if self.config.print_command {
            println!("Executing rsync with command: {}", rsync.command());
        }

        self.logger
            .state_change(&format!("Starting restore - {}", destination));
        self.register_success_callbacks(None);
        self.execute_transfer(&rsync.command(), cancel).await
    }

    async fn run_pre_hooks(&self) -> Result<()> {
        if self.config.run_before.is_empty() {
            return Ok(());
        }

        self.logger
            .state_change(&format!("Executing pre-{} hooks", self.phase()));
        let executor = HookExecutor::new(&self.logger);
        for path in &self.config.run_before {
            let invocation = executor.run(path).await;
            if !invocation.success() {
                // the first pre-hook failure aborts the run
                return Err(BackupError::Hook {
                    path: path.clone(),
                    code: invocation.exit_code,
                });
            }
        }
        Ok(())
    }

    /// Register the work that runs after a verified transfer: finalize and
    /// rotate (backup runs only), then post hooks, then the closing banner.
    /// A failing post-hook is reported but does not block the hooks after
    /// it.
    fn register_success_callbacks(&self, manager: Option<SnapshotManager>) {
        let max_snapshots = self.config.max_snapshots;
        let phase = self.phase();

        if let Some(manager) = manager {
            let manager = Arc::new(Mutex::new(manager));
            let logger = self.logger.clone();
            self.logger.add_success_callback(Box::new(move || {
                Box::pin(async move {
                    let mut manager = manager.lock().await;
                    manager.finalize().await?;
                    logger.state_change(&format!("Backup complete - {}", manager.final_dest()));
                    manager.rotate(max_snapshots).await?;
                    Ok(())
                })
            }));
        }

        if !self.config.run_after.is_empty() {
            let logger = self.logger.clone();
            self.logger.add_success_callback(Box::new(move || {
                Box::pin(async move {
                    logger.state_change(&format!("Executing post-{} hooks", phase));
                    Ok(())
                })
            }));

            for path in self.config.run_after.clone() {
                let logger = self.logger.clone();
                self.logger.add_success_callback(Box::new(move || {
                    Box::pin(async move {
                        let invocation = HookExecutor::new(&logger).run(&path).await;
                        if !invocation.success() {
                            logger.emit(&TransferEvent::error(format!(
                                "Post-{} hook {} exited with code {}",
                                phase,
                                path.display(),
                                invocation.exit_code
                            )));
                        }
                        Ok(())
                    })
                }));
            }
        }

        let banner = if self.config.restore {
            "Restore finalized"
        } else {
            "Backup finalized"
        };
        let logger = self.logger.clone();
        self.logger.add_success_callback(Box::new(move || {
            Box::pin(async move {
                logger.state_change(banner);
                Ok(())
            })
        }));
    }

    /// Spawn the transfer, stream its output through the classifier and
    /// dispatch the resulting events. Cancellation kills the process; the
    /// incomplete directory is left for the next run to discard.
    async fn execute_transfer(&self, command: &str, cancel: CancellationToken) -> Result<()> {
        tracing::debug!(%command, "executing rsync");

        let mut classifier = OutputClassifier::new();
        let spawned = Command::new("/bin/bash")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                let completion = classifier.finish(Some(err.to_string()), -1);
                self.logger.emit_all(&completion.events);
                return Err(BackupError::Io(err));
            }
        };

        let mut stdout = child.stdout.take().ok_or_else(|| {
            BackupError::Protocol("transfer stdout was not captured".to_string())
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            BackupError::Protocol("transfer stderr was not captured".to_string())
        })?;

        let mut out_buf = [0u8; 8192];
        let mut err_buf = [0u8; 8192];
        let mut out_done = false;
        let mut err_done = false;
        let mut killed = false;

        while !(out_done && err_done) {
            tokio::select! {
                read = stdout.read(&mut out_buf), if !out_done => {
                    match read? {
                        0 => out_done = true,
                        n => {
                            let events = classifier.feed_stdout(&out_buf[..n]);
                            self.logger.emit_all(&events);
                        }
                    }
                }
                read = stderr.read(&mut err_buf), if !err_done => {
                    match read? {
                        0 => err_done = true,
                        n => {
                            let events = classifier.feed_stderr(&err_buf[..n]);
                            self.logger.emit_all(&events);
                        }
                    }
                }
                _ = cancel.cancelled(), if !killed => {
                    killed = true;
                    tracing::info!("cancellation requested, killing transfer process");
                    if let Err(err) = child.start_kill() {
                        tracing::warn!(%err, "failed to kill transfer process");
                    }
                }
            }
        }

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);
        let completion = classifier.finish(None, exit_code);
        self.logger.emit_all(&completion.events);

        if !completion.success {
            return Err(BackupError::Transfer { code: exit_code });
        }
        if !completion.summarized {
            // a clean exit without the closing summary leaves the snapshot
            // incomplete; the next run discards it
            tracing::warn!("transfer produced no summary, skipping completion work");
            return Ok(());
        }

        let failures = self.logger.run_success_callbacks().await;
        if let Some(err) = failures.into_iter().next() {
            return Err(err);
        }
        Ok(())
    }
}
