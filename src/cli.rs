use std::path::PathBuf;

use clap::Parser;

/// Command-line options for kantoor.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "kantoor.toml")]
    pub config: PathBuf,

    /// Print pipeline status and exit.
    #[arg(long)]
    pub status: bool,

    /// Run a single pipeline immediately and exit.
    #[arg(long, value_name = "PIPELINE")]
    pub run_now: Option<String>,

    /// Run every pipeline once and exit instead of scheduling.
    #[arg(long)]
    pub once: bool,

    /// Back up the database and exit.
    #[arg(long)]
    pub backup: bool,
}
