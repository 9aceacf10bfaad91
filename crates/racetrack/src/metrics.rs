//! In-memory metrics recorder for `--metrics` output.
//!
//! The detector reports through the `metrics` facade; this recorder keeps
//! the values around so the CLI can print them after a replay.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::RwLock;

#[derive(Default)]
struct CounterStorage {
    values: RwLock<HashMap<String, u64>>,
}

#[derive(Default)]
struct GaugeStorage {
    values: RwLock<HashMap<String, f64>>,
}

struct CliCounter {
    key: String,
    storage: Arc<CounterStorage>,
}

impl metrics::CounterFn for CliCounter {
    fn increment(&self, value: u64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

struct CliGauge {
    key: String,
    storage: Arc<GaugeStorage>,
}

impl metrics::GaugeFn for CliGauge {
    fn increment(&self, value: f64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        let mut values = self.storage.values.write();
        *values.entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.storage.values.write().insert(self.key.clone(), value);
    }
}

/// Recorder that keeps counters and gauges in memory.
#[derive(Default)]
pub struct CliRecorder {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the global recorder.
    ///
    /// Returns `None` if a global recorder is already set.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let counters = Arc::clone(&self.counters);
        let gauges = Arc::clone(&self.gauges);
        metrics::set_global_recorder(self).ok()?;
        Some(CliRecorderHandle { counters, gauges })
    }
}

fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CliCounter {
            key: key_to_string(key),
            storage: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(CliGauge {
            key: key_to_string(key),
            storage: Arc::clone(&self.gauges),
        }))
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

/// Access to values collected by an installed [`CliRecorder`].
pub struct CliRecorderHandle {
    counters: Arc<CounterStorage>,
    gauges: Arc<GaugeStorage>,
}

impl CliRecorderHandle {
    #[must_use]
    pub fn get_counter(&self, key: &str) -> Option<u64> {
        self.counters.values.read().get(key).copied()
    }

    #[must_use]
    pub fn get_gauge(&self, key: &str) -> Option<f64> {
        self.gauges.values.read().get(key).copied()
    }

    /// Render all collected metrics, sorted by key.
    #[must_use]
    pub fn render(&self) -> String {
        use std::fmt::Write;

        let counters = self.counters.values.read();
        let gauges = self.gauges.values.read();
        if counters.is_empty() && gauges.is_empty() {
            return "No metrics collected.\n".to_string();
        }

        let mut out = String::from("\n## Metrics Summary\n\n");
        if !counters.is_empty() {
            out.push_str("### Counters\n");
            let mut entries: Vec<_> = counters.iter().collect();
            entries.sort();
            for (key, value) in entries {
                let _ = writeln!(out, "  {key}: {value}");
            }
            out.push('\n');
        }
        if !gauges.is_empty() {
            out.push_str("### Gauges\n");
            let mut entries: Vec<_> = gauges.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                let _ = writeln!(out, "  {key}: {value}");
            }
            out.push('\n');
        }
        out
    }

    pub fn print_summary(&self) {
        print!("{}", self.render());
    }
}

#[cfg(test)]
mod tests {
    use metrics::{CounterFn, GaugeFn, Label};

    use super::*;

    #[test]
    fn test_key_to_string() {
        let key = Key::from_name("racetrack_races_total");
        assert_eq!(key_to_string(&key), "racetrack_races_total");

        let key = Key::from_parts(
            "racetrack_races_total",
            vec![Label::new("detector", "app"), Label::new("kind", "write-write")],
        );
        assert_eq!(
            key_to_string(&key),
            "racetrack_races_total{detector=app,kind=write-write}"
        );
    }

    #[test]
    fn test_storage_and_render() {
        let recorder = CliRecorder::new();
        let counter = CliCounter {
            key: "races{kind=write-write}".to_string(),
            storage: Arc::clone(&recorder.counters),
        };
        counter.increment(2);
        counter.increment(3);
        let gauge = CliGauge {
            key: "entries".to_string(),
            storage: Arc::clone(&recorder.gauges),
        };
        gauge.set(42.0);

        let handle = CliRecorderHandle {
            counters: Arc::clone(&recorder.counters),
            gauges: Arc::clone(&recorder.gauges),
        };
        assert_eq!(handle.get_counter("races{kind=write-write}"), Some(5));
        assert_eq!(handle.get_gauge("entries"), Some(42.0));
        let text = handle.render();
        assert!(text.contains("races{kind=write-write}: 5"));
        assert!(text.contains("entries: 42"));
    }

    #[test]
    fn test_render_empty() {
        let recorder = CliRecorder::new();
        let handle = CliRecorderHandle {
            counters: Arc::clone(&recorder.counters),
            gauges: Arc::clone(&recorder.gauges),
        };
        assert_eq!(handle.render(), "No metrics collected.\n");
    }
}
