//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "afk-watcher")]
#[command(about = "A watcher for keyboard and mouse input to detect AFK state")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "AFK_WATCHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Event server host
    #[arg(long)]
    pub host: Option<String>,

    /// Event server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Run in testing mode (testing server port and short timeouts)
    #[arg(long)]
    pub testing: bool,

    /// Run with verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Seconds without input before reporting AFK
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Seconds between idle-time samples
    #[arg(long = "poll-time")]
    pub poll_time: Option<f64>,

    /// Keep events in memory instead of sending them to a server
    #[arg(long)]
    pub dry_run: bool,
}
