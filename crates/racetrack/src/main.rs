//! Racetrack CLI - replay thread event traces through the race detector

mod cli;
mod commands;
mod terminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let metrics_handle = if cli.metrics {
        racetrack::metrics::CliRecorder::new().install()
    } else {
        None
    };
    racetrack_core::metrics::init();

    let default_level = if cli.verbose {
        "racetrack=debug,racetrack_core=debug"
    } else if cli.silent {
        "racetrack=error,racetrack_core=error"
    } else {
        "racetrack=info,racetrack_core=error"
    };
    let filter = default_level
        .split(',')
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = commands::run_command(&cli);

    if let Some(handle) = metrics_handle {
        handle.print_summary();
    }

    std::process::exit(exit_code);
}
