//! Detector metrics through the `metrics` facade.
//!
//! Without an installed recorder every call here is a no-op.

use metrics::{Unit, counter, describe_counter, describe_gauge, gauge};

use crate::{RaceKind, Warning};

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "racetrack_races_total",
        Unit::Count,
        "Races reported, labelled by kind"
    );
    describe_counter!(
        "racetrack_warnings_total",
        Unit::Count,
        "Detection-quality warnings, labelled by kind"
    );
    describe_counter!(
        "racetrack_threads_total",
        Unit::Count,
        "Threads registered with a detector"
    );
    describe_gauge!(
        "racetrack_shadow_entries",
        Unit::Count,
        "Shadow locations tracked at finalize"
    );
}

pub fn record_race(detector: &str, kind: RaceKind) {
    let labels = [("detector", detector.to_string()), ("kind", kind.as_str().to_string())];
    counter!("racetrack_races_total", &labels).increment(1);
}

pub fn record_warning(detector: &str, warning: &Warning) {
    let labels = [("detector", detector.to_string()), ("kind", warning.kind().to_string())];
    counter!("racetrack_warnings_total", &labels).increment(1);
}

pub fn record_thread(detector: &str) {
    let labels = [("detector", detector.to_string())];
    counter!("racetrack_threads_total", &labels).increment(1);
}

#[allow(clippy::cast_precision_loss)]
pub fn record_shadow_entries(detector: &str, entries: usize) {
    let labels = [("detector", detector.to_string())];
    gauge!("racetrack_shadow_entries", &labels).set(entries as f64);
}
