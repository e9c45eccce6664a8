//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "actpoll", about = "activity-log polling coordinator")]
pub struct Cli {
    /// TOML config file (poller settings and log level)
    #[arg(long, short = 'c', global = true, env = "ACTPOLL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Poll watched entities against a fixture and print notifications as JSON lines
    Run(RunOpts),
    /// Print the request a single activity query would send
    Query(QueryOpts),
}

#[derive(clap::Args, Default)]
pub struct RunOpts {
    /// JSON file with scripted responses per entity
    #[arg(long)]
    pub fixture: PathBuf,

    /// Entity to watch at startup (repeatable)
    #[arg(long = "watch", value_name = "ENTITY_ID")]
    pub watch: Vec<u64>,

    /// Delay between a completed poll and the next one
    #[arg(long, env = "ACTPOLL_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Page size sent with every poll
    #[arg(long, env = "ACTPOLL_PAGE_LIMIT")]
    pub page_limit: Option<u32>,

    /// Prefix in front of `/{entity_id}/activity`
    #[arg(long, env = "ACTPOLL_PATH_PREFIX")]
    pub path_prefix: Option<String>,

    /// Keep polling after stdin closes (implied by --watch)
    #[arg(long, env = "ACTPOLL_IGNORE_EOF")]
    pub ignore_eof: bool,
}

impl RunOpts {
    /// Whether closing stdin ends the run. Startup watches or
    /// `--ignore-eof` keep the poller alive until a signal.
    pub fn stops_on_eof(&self) -> bool {
        self.watch.is_empty() && !self.ignore_eof
    }
}

#[derive(clap::Args, Default)]
pub struct QueryOpts {
    #[arg(long, value_name = "ENTITY_ID")]
    pub entity: u64,

    /// Start of the window, epoch milliseconds (default: now)
    #[arg(long, conflicts_with = "cursor")]
    pub since: Option<i64>,

    /// Continuation cursor as JSON, e.g. '["2024-01-01",17]'
    #[arg(long)]
    pub cursor: Option<String>,

    #[arg(long)]
    pub date_end: Option<i64>,

    #[arg(long)]
    pub action: Option<String>,

    #[arg(long)]
    pub group: Option<String>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub page_limit: Option<u32>,
}
