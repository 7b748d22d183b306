use std::path::PathBuf;

use clap::Parser;

use crate::config::SortMode;

/// Harvest notes by keyword, skip ones seen before, filter and export them.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "harvester", version, about)]
pub struct Cli {
    /// Search keyword; replaces the configured keyword list
    #[arg(short, long)]
    pub keyword: Option<String>,

    /// Maximum number of search results to process per keyword
    #[arg(short = 'n', long)]
    pub max_records: Option<usize>,

    /// How many times the collector scrolls the result page
    #[arg(short, long)]
    pub scroll_times: Option<u32>,

    #[arg(long, value_enum)]
    pub sort: Option<SortMode>,

    /// Minimum likes a note needs to be kept
    #[arg(long)]
    pub min_likes: Option<u64>,

    /// Only open the login page in the collector and wait for a QR scan
    #[arg(long)]
    pub login: bool,

    /// Keep running and crawl on the configured cron schedule
    #[arg(long)]
    pub schedule: bool,

    /// Ask the collector to close its browser session, then exit
    #[arg(long)]
    pub close_collector: bool,

    #[arg(short, long)]
    pub verbose: bool,

    /// Alternate configuration file
    #[arg(short, long, env = "HARVESTER_CONFIG")]
    pub config: Option<PathBuf>,
}
