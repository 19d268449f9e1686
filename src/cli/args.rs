//! CLI argument definitions using clap
//!
//! Commands:
//! - aerotx init --config <path>
//! - aerotx run --config <path>
//! - aerotx placement --workers <n> --partitions <n> --localities <n>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aerotx - batched transaction execution over locality lanes
#[derive(Parser, Debug)]
#[command(name = "aerotx")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a configuration file with every default spelled out
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./aerotx.json")]
        config: PathBuf,
    },

    /// Run a synthetic workload and print a JSON report
    Run {
        /// Path to configuration file
        #[arg(long, default_value = "./aerotx.json")]
        config: PathBuf,
    },

    /// Print the worker placement for the given counts
    Placement {
        /// Number of workers
        #[arg(long)]
        workers: usize,

        /// Number of partitions
        #[arg(long)]
        partitions: usize,

        /// Number of localities
        #[arg(long)]
        localities: usize,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
