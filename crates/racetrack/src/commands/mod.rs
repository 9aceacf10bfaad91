//! Command implementations.

mod check;
mod replay;

use crate::cli::{Cli, Commands};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Replay { traces, detector } => replay::cmd_replay(traces, detector, cli.silent),
        Commands::Check { traces } => check::cmd_check(traces, cli.silent),
    }
}
