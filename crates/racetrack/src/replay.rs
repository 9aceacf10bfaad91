//! Drive a detector session from a parsed trace.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use racetrack_core::{
    Detector, DetectorConfig, Error as DetectorError, RaceReport, Summary, ThreadHandle, ThreadId,
    Warning,
};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::{Error, Result, Trace, TraceEvent};

/// Everything a replay produced.
#[derive(Debug)]
pub struct ReplayReport {
    pub races: Vec<RaceReport>,
    pub warnings: Vec<Warning>,
    pub summary: Summary,
    pub events: usize,
}

impl ReplayReport {
    #[must_use]
    pub fn has_races(&self) -> bool {
        !self.races.is_empty()
    }
}

/// Replays trace events into one detector session.
struct Replayer {
    detector: Detector,
    handles: FxHashMap<ThreadId, ThreadHandle>,
}

impl Replayer {
    /// Handle of `id`, registering threads that appear without a fork.
    fn handle(&mut self, id: ThreadId) -> std::result::Result<ThreadHandle, DetectorError> {
        if let Some(handle) = self.handles.get(&id) {
            return Ok(handle.clone());
        }
        let handle = match self.detector.handle(id) {
            Ok(handle) => handle,
            Err(DetectorError::UnknownThread(_)) => {
                debug!(thread = %id, "registering thread first seen without a fork");
                self.detector.register(id)?
            }
            Err(e) => return Err(e),
        };
        self.handles.insert(id, handle.clone());
        Ok(handle)
    }

    fn apply(&mut self, event: TraceEvent) -> std::result::Result<(), DetectorError> {
        match event {
            TraceEvent::Fork { parent, child } => {
                let handle = self.detector.fork(parent, child)?;
                self.handles.insert(child, handle);
            }
            TraceEvent::Join { parent, child } => {
                self.detector.join(parent, child)?;
                self.handles.remove(&child);
            }
            TraceEvent::Exit { thread } => {
                let handle = self.handle(thread)?;
                self.detector.exit(&handle)?;
                self.handles.remove(&thread);
            }
            TraceEvent::Enter { thread, site } => {
                let handle = self.handle(thread)?;
                self.detector.func_enter(&handle, site)?;
            }
            TraceEvent::Leave { thread } => {
                let handle = self.handle(thread)?;
                self.detector.func_exit(&handle)?;
            }
            TraceEvent::Read {
                thread,
                addr,
                pc,
                size,
            } => {
                let handle = self.handle(thread)?;
                self.detector.read(&handle, addr, pc, size)?;
            }
            TraceEvent::Write {
                thread,
                addr,
                pc,
                size,
            } => {
                let handle = self.handle(thread)?;
                self.detector.write(&handle, addr, pc, size)?;
            }
            TraceEvent::Acquire { thread, lock } => {
                let handle = self.handle(thread)?;
                self.detector.acquire(&handle, lock)?;
            }
            TraceEvent::Release { thread, lock } => {
                let handle = self.handle(thread)?;
                self.detector.release(&handle, lock)?;
            }
            TraceEvent::Signal { thread, sync } => {
                let handle = self.handle(thread)?;
                self.detector.happens_before(&handle, sync)?;
            }
            TraceEvent::Wait { thread, sync } => {
                let handle = self.handle(thread)?;
                self.detector.happens_after(&handle, sync)?;
            }
            TraceEvent::Alloc { thread, addr, size } => {
                let handle = self.handle(thread)?;
                self.detector.allocate(&handle, addr, size)?;
            }
            TraceEvent::Free { thread, addr } => {
                let handle = self.handle(thread)?;
                self.detector.deallocate(&handle, addr)?;
            }
        }
        Ok(())
    }
}

/// Contract violations the detector already surfaced as warnings.
const fn tolerated(err: &DetectorError) -> bool {
    matches!(
        err,
        DetectorError::StackUnderflow(_) | DetectorError::LockNotHeld { .. }
    )
}

/// Replay `trace` into a fresh detector session.
///
/// # Errors
/// Returns [`Error::Event`] with the trace line of the first event the
/// detector rejects, or a detector error from init/finalize.
pub fn replay(trace: &Trace, config: DetectorConfig) -> Result<ReplayReport> {
    let races = Arc::new(Mutex::new(Vec::new()));
    let warnings = Arc::new(Mutex::new(Vec::new()));
    let detector = Detector::new();
    {
        let (races, warnings) = (Arc::clone(&races), Arc::clone(&warnings));
        detector.init_with_warnings(
            config,
            move |race: &RaceReport| races.lock().push(race.clone()),
            move |warning: &Warning| warnings.lock().push(warning.clone()),
        )?;
    }

    let mut replayer = Replayer {
        detector,
        handles: FxHashMap::default(),
    };
    for line in &trace.events {
        match replayer.apply(line.event) {
            Ok(()) => {}
            Err(e) if tolerated(&e) => {
                debug!(line = line.line, thread = %line.event.thread(), "{e}");
            }
            Err(source) => {
                return Err(Error::Event {
                    line: line.line,
                    source,
                });
            }
        }
    }
    let summary = replayer.detector.finalize()?;

    let races = std::mem::take(&mut *races.lock());
    let warnings = std::mem::take(&mut *warnings.lock());
    Ok(ReplayReport {
        races,
        warnings,
        summary,
        events: trace.len(),
    })
}

/// Read and replay a trace file.
///
/// # Errors
/// See [`Trace::from_file`] and [`replay`].
pub fn replay_file(path: &Path, config: DetectorConfig) -> Result<ReplayReport> {
    let trace = Trace::from_file(path)?;
    info!(path = %path.display(), events = trace.len(), "replaying trace");
    replay(&trace, config)
}
