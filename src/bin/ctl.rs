//! jobwal WAL inspection tool
//!
//! Offline maintenance for a job log: dump it, list in-flight jobs, or
//! compact it. Do not run `checkpoint` against a log a live runner is using.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use jobwal::config::{WalFormat, WalSyncStrategy};
use jobwal::wal::{RecoveryPlan, WalRecovery, WalStorage};
use tracing_subscriber::{fmt, EnvFilter};

/// jobwal control
#[derive(Parser, Debug)]
#[command(name = "jobwal-ctl")]
#[command(about = "Inspect and compact a jobwal write-ahead log")]
#[command(version)]
struct Args {
    /// Path of the WAL file
    #[arg(short, long, default_value = "./jobwal_data/jobs.wal")]
    wal: PathBuf,

    /// Line format of the WAL
    #[arg(short, long, value_enum, default_value = "json")]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    Json,
    Rows,
}

impl From<Format> for WalFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => WalFormat::Json,
            Format::Rows => WalFormat::Rows,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every valid entry, oldest first
    Replay,

    /// Print the latest entry of every in-flight job
    Inflight,

    /// Compact the log down to in-flight jobs
    Checkpoint,

    /// Print replay statistics
    Stats,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,jobwal=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> jobwal::Result<()> {
    let storage = WalStorage::open(&args.wal, WalSyncStrategy::EveryWrite, args.format.into())?;
    let codec = storage.codec();

    match args.command {
        Commands::Replay => {
            let mut replay = storage.replay()?;
            for entry in replay.by_ref() {
                println!("{}", codec.dump(&entry)?);
            }
            replay.finish()?;
        }
        Commands::Inflight => {
            let plan = WalRecovery::plan(&storage)?;
            for entry in plan.in_flight() {
                let marker = if plan.is_duplicate(entry) { " (duplicate)" } else { "" };
                println!(
                    "{}\t{}\t{}{}",
                    entry.job_id,
                    entry.event,
                    entry.state.map(|s| s.as_str()).unwrap_or("-"),
                    marker
                );
            }
        }
        Commands::Checkpoint => {
            let stats = storage.checkpoint()?;
            println!(
                "entries before: {}, after: {}, jobs dropped: {}",
                stats.entries_before, stats.entries_after, stats.jobs_dropped
            );
        }
        Commands::Stats => {
            let mut replay = storage.replay()?;
            let plan = RecoveryPlan::from_entries(replay.by_ref());
            let stats = replay.finish()?;
            println!("lines read:      {}", stats.lines_read);
            println!("valid entries:   {}", stats.entries_valid);
            println!("skipped lines:   {}", stats.entries_skipped);
            println!("jobs:            {}", plan.latest.len());
            println!("in-flight jobs:  {}", plan.in_flight().count());
        }
    }

    Ok(())
}
