//! Flag-based CLI surface: this tool has one job (drive the queue) with modal flags,
//! not a family of resource verbs, so it skips a subcommand tree.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "supervisor", about = "Drives a durable task queue by invoking a worker agent per task")]
pub struct Cli {
    /// Directory containing Task.json, progress.txt, CLAUDE.md, runs/, inbox/, STOP, PAUSE.
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    /// Run continuously until stopped, the queue is empty, or the circuit breaker trips.
    #[arg(long)]
    pub r#loop: bool,

    /// Run at most N task attempts, then stop.
    #[arg(long)]
    pub count: Option<u32>,

    /// Print queue status and exit.
    #[arg(long)]
    pub status: bool,

    /// Select and claim a task, then print what would have run, without invoking the worker.
    #[arg(long)]
    pub dry_run: bool,

    /// Reclaim expired leases and exit, without running any task.
    #[arg(long)]
    pub reclaim: bool,

    /// Process pending requirement packets in the inbox and exit.
    #[arg(long)]
    pub intake: bool,

    /// Prune the run archive by age and total size, then exit.
    #[arg(long)]
    pub cleanup: bool,

    /// Regenerate status.md from the current queue state, then exit.
    #[arg(long)]
    pub report: bool,

    /// Override the worker's max-turns budget for this invocation.
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Override the worker subprocess timeout, in seconds, for this invocation.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Override the lease TTL, in seconds, for this invocation.
    #[arg(long)]
    pub lease_ttl: Option<u64>,

    /// Emit machine-readable JSON instead of human-readable text.
    #[arg(long)]
    pub json: bool,

    /// Verbose output.
    #[arg(short, long)]
    pub verbose: bool,
}
