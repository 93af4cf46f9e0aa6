//! Command-line interface definitions.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Video preparation worker and playback orchestrator for LED displays.
#[derive(Parser, Debug)]
#[command(name = "visor-video", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/config/visor-video.yaml", env = "CONFIG_PATH", global = true)]
    pub config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level based on verbosity flags.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the transcode worker and its job API.
    Worker,

    /// Run the playback orchestrator and its control API.
    Player,

    /// Validate the configuration file without starting.
    #[command(name = "config-validate")]
    ConfigValidate,

    /// Display the parsed configuration.
    #[command(name = "config-show")]
    ConfigShow,

    /// List job records from the worker database.
    #[command(name = "jobs-list")]
    JobsList(JobsListArgs),

    /// Delete every artifact from the player's local mirror.
    #[command(name = "cache-clear")]
    CacheClear,
}

/// Arguments for the jobs-list subcommand.
#[derive(Args, Debug)]
pub struct JobsListArgs {
    /// Maximum number of jobs to show, newest first.
    #[arg(long, default_value = "20")]
    pub limit: usize,
}
