//! Replay command.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use racetrack::{ReplayReport, replay_file};
use rayon::prelude::*;
use tracing::{debug, error};

use crate::cli::{DetectorArgs, EXIT_FAILURE, EXIT_RACES, EXIT_SUCCESS, trace_name};
use crate::terminal::{self, Progress};

/// Handle the `replay` command.
pub fn cmd_replay(traces: &[PathBuf], args: &DetectorArgs, silent: bool) -> i32 {
    let multiple = traces.len() > 1;
    if multiple {
        if let Some(dir) = &args.output {
            if let Err(e) = fs::create_dir_all(dir) {
                error!(error = %e, path = %dir.display(), "failed to create output directory");
                return EXIT_FAILURE;
            }
        }
    }

    if multiple && !silent {
        terminal::info(&format!("replaying {} traces", traces.len()));
    }
    let start = Instant::now();
    let progress = (multiple && !silent).then(|| Progress::new(traces.len() as u64, "Replaying"));
    let run = |path: &PathBuf| {
        let result = replay_file(path, args.config(path, multiple));
        if let Some(progress) = &progress {
            progress.inc(1);
        }
        result
    };
    let results: Vec<_> = if args.sequential {
        traces.iter().map(run).collect()
    } else {
        traces.par_iter().map(run).collect()
    };
    if let Some(progress) = &progress {
        progress.finish();
    }
    debug!(traces = traces.len(), elapsed = ?start.elapsed(), "replay finished");

    let mut failed = 0usize;
    let mut racy = 0usize;
    for (path, result) in traces.iter().zip(results) {
        match result {
            Ok(report) => {
                if report.has_races() {
                    racy += 1;
                }
                print_report(path, &report, silent);
            }
            Err(e) => {
                failed += 1;
                terminal::error(&format!("{}: {e}", path.display()));
            }
        }
    }

    if let Some(output) = &args.output {
        if !silent {
            terminal::path_output(output);
        }
    }
    if failed > 0 {
        EXIT_FAILURE
    } else if racy > 0 {
        EXIT_RACES
    } else {
        EXIT_SUCCESS
    }
}

fn print_report(path: &Path, report: &ReplayReport, silent: bool) {
    let name = trace_name(path);
    for race in &report.races {
        println!("[{name}] {race}");
    }
    if silent {
        return;
    }
    for warning in &report.warnings {
        terminal::warning(&format!("[{name}] {warning}"));
    }
    let races = report.races.len();
    let message = format!(
        "{name}: {} events, {} threads, {races} race{}",
        report.events,
        report.summary.threads,
        if races == 1 { "" } else { "s" }
    );
    if races == 0 {
        terminal::success(&message);
    } else {
        terminal::error(&message);
    }
    debug!(trace = %name, unjoined = ?report.summary.unjoined, "threads live at finalize");
}
