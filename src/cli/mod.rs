//! CLI module for aerotx
//!
//! Provides command-line interface for:
//! - init: Write a default configuration file
//! - run: Run a synthetic workload through the bulk pool
//! - placement: Show how workers are placed

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{init, run_command, run_workload, show_placement, CaptureWork, RunReport, WorkItem};
pub use config::Config;
pub use errors::{CliError, CliErrorCode, CliResult};

/// Parse the command line and run the selected command
pub fn run() -> CliResult<()> {
    run_command(Cli::parse_args().command)
}
