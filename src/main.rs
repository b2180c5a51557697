//! snapsync - Main entry point
//!
//! Hard-link based incremental snapshot backups driven by rsync.

use clap::Parser;
use snapsync::{runner::Runner, shutdown, utils, Config};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backup destination, [user@host:]path
    #[arg(long)]
    dst: Option<String>,

    /// Source path passed to rsync
    #[arg(long)]
    src: Option<String>,

    /// Remote shell for the transfer (e.g. "ssh")
    #[arg(long)]
    shell: Option<String>,

    /// Exclude pattern (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// File with exclude patterns
    #[arg(long)]
    exclude_file: Option<PathBuf>,

    /// Number of snapshots to keep
    #[arg(long)]
    max_snapshots: Option<usize>,

    /// Restore from the destination instead of snapshotting into it
    #[arg(long)]
    restore: bool,

    /// Compare files by checksum instead of size and mtime
    #[arg(long)]
    checksum: bool,

    /// Disable incremental recursion for accurate total progress
    #[arg(long)]
    accurate_progress: bool,

    /// Keep destination files that no longer exist on the source
    #[arg(long)]
    no_delete: bool,

    /// Keep excluded files that already exist on the destination
    #[arg(long)]
    no_delete_excludes: bool,

    /// Remote rsync binary (defaults to "sudo rsync")
    #[arg(long)]
    rsync_path: Option<String>,

    /// Extra rsync long option, name or name=value (repeatable)
    #[arg(long = "set-rsync-arg")]
    set_rsync_arg: Vec<String>,

    /// rsync long option to drop from the invocation (repeatable)
    #[arg(long = "unset-rsync-arg")]
    unset_rsync_arg: Vec<String>,

    /// Output format: json, text or raw
    #[arg(long)]
    log_format: Option<String>,

    /// Append events to this log file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Minimum log file severity: ALL, WARN or ERROR
    #[arg(long)]
    log_file_level: Option<String>,

    /// Diagnostic level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Script to run before the backup (repeatable)
    #[arg(long = "run-before")]
    run_before: Vec<PathBuf>,

    /// Script to run after a successful backup (repeatable)
    #[arg(long = "run-after")]
    run_after: Vec<PathBuf>,

    /// Print the composed rsync command before executing it
    #[arg(long)]
    print_command: bool,
}

fn build_config(args: Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if args.dst.is_some() {
        config.destination = args.dst;
    }
    if let Some(src) = args.src {
        config.source = src;
    }
    if args.shell.is_some() {
        config.shell = args.shell;
    }
    if !args.exclude.is_empty() {
        config.exclude = args.exclude;
    }
    if args.exclude_file.is_some() {
        config.exclude_file = args.exclude_file;
    }
    if args.max_snapshots.is_some() {
        config.max_snapshots = args.max_snapshots;
    }
    if args.restore {
        config.restore = true;
    }
    if args.checksum {
        config.checksum = true;
    }
    if args.accurate_progress {
        config.accurate_progress = true;
    }
    if args.no_delete {
        config.no_delete = true;
    }
    if args.no_delete_excludes {
        config.no_delete_excludes = true;
    }
    if args.rsync_path.is_some() {
        config.rsync_path = args.rsync_path;
    }
    if !args.set_rsync_arg.is_empty() {
        config.set_args = args.set_rsync_arg;
    }
    if !args.unset_rsync_arg.is_empty() {
        config.unset_args = args.unset_rsync_arg;
    }
    if args.log_format.is_some() {
        config.log_format = args.log_format;
    }
    if args.log_file.is_some() {
        config.log_file = args.log_file;
    }
    if args.log_file_level.is_some() {
        config.log_file_level = args.log_file_level;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if !args.run_before.is_empty() {
        config.run_before = args.run_before;
    }
    if !args.run_after.is_empty() {
        config.run_after = args.run_after;
    }
    if args.print_command {
        config.print_command = true;
    }

    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match build_config(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = utils::logger::init(&config.log_level) {
        eprintln!("Error initializing diagnostics: {}", err);
    }

    tracing::debug!("starting snapsync v{}", env!("CARGO_PKG_VERSION"));

    let runner = match Runner::new(config) {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(err.exit_code());
        }
    };

    let cancel = shutdown::cancel_on_signal();
    if let Err(err) = runner.run(cancel).await {
        std::process::exit(err.exit_code());
    }
}
