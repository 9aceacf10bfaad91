//! CLI definitions and argument types.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use racetrack_core::{DEFAULT_MAX_STACK_DEPTH, DEFAULT_SHADOW_SHARDS, DetectorConfig, Granularity};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when a replay found at least one race.
pub const EXIT_RACES: i32 = 2;

#[derive(Parser)]
#[command(name = "racetrack")]
#[command(about = "Replay thread event traces through a FastTrack data race detector")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors and races)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay traces and report data races
    Replay {
        /// Trace files (`.zst` files are decompressed)
        #[arg(value_name = "TRACE", required = true)]
        traces: Vec<PathBuf>,

        #[command(flatten)]
        detector: DetectorArgs,
    },
    /// Parse traces without replaying them
    Check {
        /// Trace files (`.zst` files are decompressed)
        #[arg(value_name = "TRACE", required = true)]
        traces: Vec<PathBuf>,
    },
}

/// Detector options shared by replaying commands.
#[derive(Args, Clone, Debug)]
pub struct DetectorArgs {
    /// Shadow cell granularity
    #[arg(long, value_enum, default_value = "address")]
    pub granularity: GranularityArg,

    /// Number of shadow table shards
    #[arg(long, default_value_t = DEFAULT_SHADOW_SHARDS)]
    pub shards: usize,

    /// Maximum number of tracked memory locations
    #[arg(long, value_name = "N")]
    pub max_shadow_entries: Option<usize>,

    /// Maximum call-stack frames kept per race report
    #[arg(long, default_value_t = DEFAULT_MAX_STACK_DEPTH)]
    pub max_stack_depth: usize,

    /// Diagnostics log. A directory when replaying several traces.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Collect rule statistics and write them to the diagnostics log
    #[arg(long)]
    pub stats: bool,

    /// Replay traces one at a time
    #[arg(long)]
    pub sequential: bool,
}

impl DetectorArgs {
    /// Detector configuration for replaying `trace`.
    ///
    /// The detector is named after the trace file stem. With several traces
    /// `--output` names a directory holding one `<stem>.log` per trace.
    pub fn config(&self, trace: &Path, multiple: bool) -> DetectorConfig {
        let name = trace_name(trace);
        let mut config = DetectorConfig::default()
            .with_shadow_shards(self.shards)
            .with_max_shadow_entries(self.max_shadow_entries)
            .with_max_stack_depth(self.max_stack_depth)
            .with_granularity(self.granularity.into())
            .with_stats(self.stats);
        if let Some(output) = &self.output {
            let path = if multiple {
                output.join(format!("{name}.log"))
            } else {
                output.clone()
            };
            config = config.with_output_path(path);
        }
        config.with_name(name)
    }
}

/// File stem of a trace, without a trailing `.trace` under `.zst`.
pub fn trace_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map_or_else(|| "trace".to_string(), |s| s.to_string_lossy().into_owned());
    match stem.strip_suffix(".trace") {
        Some(inner) if path.extension().is_some_and(|ext| ext == "zst") => inner.to_string(),
        _ => stem,
    }
}

/// Shadow granularity argument.
#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum GranularityArg {
    /// One shadow cell per access address
    #[default]
    Address,
    /// One shadow cell per byte
    Byte,
}

impl From<GranularityArg> for Granularity {
    fn from(arg: GranularityArg) -> Self {
        match arg {
            GranularityArg::Address => Self::Address,
            GranularityArg::Byte => Self::Byte,
        }
    }
}
