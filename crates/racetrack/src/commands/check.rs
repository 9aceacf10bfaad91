//! Check command.

use std::path::PathBuf;

use racetrack::Trace;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

/// Handle the `check` command.
pub fn cmd_check(traces: &[PathBuf], silent: bool) -> i32 {
    let mut failed = 0usize;
    for path in traces {
        match Trace::from_file(path) {
            Ok(trace) => {
                if !silent {
                    let expect = match (trace.expect.races, trace.expect.warnings) {
                        (None, None) => String::new(),
                        (races, warnings) => format!(
                            ", expects races={} warnings={}",
                            races.map_or_else(|| "any".to_string(), |n| n.to_string()),
                            warnings.map_or_else(|| "any".to_string(), |n| n.to_string()),
                        ),
                    };
                    terminal::success(&format!(
                        "{}: {} events{expect}",
                        path.display(),
                        trace.len()
                    ));
                }
            }
            Err(e) => {
                terminal::error(&format!("{}: {e}", path.display()));
                failed += 1;
            }
        }
    }
    if failed == 0 { EXIT_SUCCESS } else { EXIT_FAILURE }
}
