//! Detector session: lifecycle, event dispatch and race reporting.
//!
//! A [`Detector`] moves through `Uninitialized -> Initialized -> Finalized`.
//! Event methods may be called concurrently from any number of threads, as
//! long as events of one observed thread are sent in program order.
//!
//! The race callback runs synchronously on the reporting thread while the
//! shadow shard of the racy location is locked. It must not call back into
//! the detector.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use racetrack_clock::{ThreadNum, VectorClock};
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

use crate::engine::{self, Conflict};
use crate::{
    Access, AccessInfo, DetectorConfig, Error, HappensBefore, LockId, RaceReport, Released,
    Result, SessionState, ShadowFull, ShadowTable, Stats, StatsSnapshot, SyncId, ThreadHandle,
    ThreadId, ThreadState, Warning, metrics,
};

/// Race callback.
pub type RaceCallback = Box<dyn Fn(&RaceReport) + Send + Sync>;
/// Warning callback.
pub type WarningCallback = Box<dyn Fn(&Warning) + Send + Sync>;

static NEXT_DETECTOR: AtomicU64 = AtomicU64::new(1);

/// Result of [`Detector::finalize`].
#[derive(Clone, Debug)]
pub struct Summary {
    pub stats: StatsSnapshot,
    /// Merge of the final clocks of every thread the session saw.
    pub terminal_clock: VectorClock,
    /// Threads that were still live at finalize, sorted.
    pub unjoined: Vec<ThreadId>,
    /// Shadow locations tracked at finalize.
    pub shadow_entries: usize,
    /// Threads registered over the whole run.
    pub threads: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.stats)?;
        write!(
            f,
            "threads registered: {}, unjoined at finalize: {}, shadow locations: {}",
            self.threads,
            self.unjoined.len(),
            self.shadow_entries
        )
    }
}

enum Phase {
    Uninitialized,
    Initialized(Box<Session>),
    Finalized,
}

impl Phase {
    const fn state(&self) -> SessionState {
        match self {
            Self::Uninitialized => SessionState::Uninitialized,
            Self::Initialized(_) => SessionState::Initialized,
            Self::Finalized => SessionState::Finalized,
        }
    }
}

/// Dynamic data race detector.
pub struct Detector {
    id: u64,
    phase: RwLock<Phase>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Detector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_DETECTOR.fetch_add(1, Ordering::Relaxed),
            phase: RwLock::new(Phase::Uninitialized),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.phase.read().state()
    }

    /// Start the session.
    ///
    /// # Errors
    /// [`Error::InvalidState`] unless the detector is uninitialized, or
    /// [`Error::Io`] if the diagnostics file cannot be created.
    pub fn init<F>(&self, config: DetectorConfig, on_race: F) -> Result<()>
    where
        F: Fn(&RaceReport) + Send + Sync + 'static,
    {
        self.start(config, Box::new(on_race), None)
    }

    /// Start the session with a warning callback as well.
    ///
    /// # Errors
    /// Same as [`Detector::init`].
    pub fn init_with_warnings<F, W>(
        &self,
        config: DetectorConfig,
        on_race: F,
        on_warning: W,
    ) -> Result<()>
    where
        F: Fn(&RaceReport) + Send + Sync + 'static,
        W: Fn(&Warning) + Send + Sync + 'static,
    {
        self.start(config, Box::new(on_race), Some(Box::new(on_warning)))
    }

    fn start(
        &self,
        config: DetectorConfig,
        on_race: RaceCallback,
        on_warning: Option<WarningCallback>,
    ) -> Result<()> {
        let mut phase = self.phase.write();
        if !matches!(*phase, Phase::Uninitialized) {
            return Err(Error::InvalidState {
                op: "init",
                state: phase.state(),
            });
        }
        let session = Session::new(self.id, config, on_race, on_warning)?;
        info!(
            name = %session.config.name,
            shards = session.shadow.shard_count(),
            granularity = %session.config.granularity,
            "detector initialized"
        );
        *phase = Phase::Initialized(Box::new(session));
        Ok(())
    }

    fn session(&self, op: &'static str) -> Result<MappedRwLockReadGuard<'_, Session>> {
        RwLockReadGuard::try_map(self.phase.read(), |phase| match phase {
            Phase::Initialized(session) => Some(&**session),
            Phase::Uninitialized | Phase::Finalized => None,
        })
        .map_err(|phase| Error::InvalidState {
            op,
            state: phase.state(),
        })
    }

    /// Name the session was configured with.
    ///
    /// # Errors
    /// [`Error::InvalidState`] unless initialized.
    pub fn name(&self) -> Result<String> {
        Ok(self.session("name")?.config.name.clone())
    }

    /// Counters collected so far.
    ///
    /// # Errors
    /// [`Error::InvalidState`] unless initialized.
    pub fn stats(&self) -> Result<StatsSnapshot> {
        Ok(self.session("stats")?.stats.snapshot())
    }

    /// Register a thread with no causal predecessor, such as the main thread.
    ///
    /// # Errors
    /// [`Error::DuplicateThreadId`] if `id` is live.
    pub fn register(&self, id: ThreadId) -> Result<ThreadHandle> {
        let session = self.session("register")?;
        let mut threads = session.threads.write();
        if threads.contains_key(&id) {
            return Err(Error::DuplicateThreadId(id));
        }
        Ok(session.adopt(&mut threads, id))
    }

    /// Handle of a live thread.
    ///
    /// # Errors
    /// [`Error::UnknownThread`] if `id` is not live.
    pub fn handle(&self, id: ThreadId) -> Result<ThreadHandle> {
        let session = self.session("handle")?;
        let threads = session.threads.read();
        threads
            .get(&id)
            .map(|state| session.issue(state))
            .ok_or(Error::UnknownThread(id))
    }

    /// Register `child` as a new thread started by `parent`.
    ///
    /// An unknown `parent` is registered as a root thread first.
    ///
    /// # Errors
    /// [`Error::DuplicateThreadId`] if `child` is live or is `parent` itself.
    pub fn fork(&self, parent: ThreadId, child: ThreadId) -> Result<ThreadHandle> {
        let session = self.session("fork")?;
        session.fork(parent, child)
    }

    /// `parent` waited for `child` to finish.
    ///
    /// # Errors
    /// [`Error::UnknownThread`] if either thread is not live, or
    /// [`Error::SelfJoin`] if they are the same thread.
    pub fn join(&self, parent: ThreadId, child: ThreadId) -> Result<()> {
        let session = self.session("join")?;
        session.join(parent, child)
    }

    /// Retire a thread that nobody joins.
    ///
    /// # Errors
    /// Fails if the handle is foreign or the thread already ended.
    pub fn exit(&self, handle: &ThreadHandle) -> Result<()> {
        let session = self.session("exit")?;
        let thread = session.thread(handle)?;
        session.threads.write().remove(&thread.id());
        session.retire(&handle.state);
        debug!(thread = %thread.id(), "thread exited");
        Ok(())
    }

    /// Push a call site on the thread's stack.
    ///
    /// # Errors
    /// Fails if the handle is foreign or the thread already ended.
    pub fn func_enter(&self, handle: &ThreadHandle, site: u64) -> Result<()> {
        let session = self.session("func_enter")?;
        let thread = session.thread(handle)?;
        thread.stack().push(site);
        trace!(thread = %thread.id(), "enter {site:#x}");
        Ok(())
    }

    /// Pop the innermost call site.
    ///
    /// # Errors
    /// [`Error::StackUnderflow`] if the stack is empty. The stack stays empty
    /// and the thread remains usable.
    pub fn func_exit(&self, handle: &ThreadHandle) -> Result<()> {
        let session = self.session("func_exit")?;
        let thread = session.thread(handle)?;
        if thread.stack().pop() {
            return Ok(());
        }
        session.warn(&Warning::StackUnderflow { thread: thread.id() });
        Err(Error::StackUnderflow(thread.id()))
    }

    /// Report a read of `size` bytes at `addr` by instruction `pc`.
    ///
    /// # Errors
    /// Fails if the handle is foreign or the thread already ended.
    pub fn read(&self, handle: &ThreadHandle, addr: u64, pc: u64, size: usize) -> Result<()> {
        let session = self.session("read")?;
        session.access(handle, addr, pc, size, false)
    }

    /// Report a write of `size` bytes at `addr` by instruction `pc`.
    ///
    /// # Errors
    /// Fails if the handle is foreign or the thread already ended.
    pub fn write(&self, handle: &ThreadHandle, addr: u64, pc: u64, size: usize) -> Result<()> {
        let session = self.session("write")?;
        session.access(handle, addr, pc, size, true)
    }

    /// # Errors
    /// Fails if the handle is foreign or the thread already ended.
    pub fn acquire(&self, handle: &ThreadHandle, lock: LockId) -> Result<()> {
        let session = self.session("acquire")?;
        let thread = session.thread(handle)?;
        let acquired = session.hb.acquire(thread, lock);
        session.stats.sync_event();
        trace!(thread = %thread.id(), %lock, ?acquired, "acquire");
        Ok(())
    }

    /// # Errors
    /// [`Error::LockNotHeld`] if the thread does not hold `lock`; nothing
    /// changes in that case.
    pub fn release(&self, handle: &ThreadHandle, lock: LockId) -> Result<()> {
        let session = self.session("release")?;
        let thread = session.thread(handle)?;
        session.stats.sync_event();
        match session.hb.release(thread, lock) {
            Released::NotHeld => {
                session.warn(&Warning::LockNotHeld {
                    thread: thread.id(),
                    lock,
                });
                Err(Error::LockNotHeld {
                    thread: thread.id(),
                    lock,
                })
            }
            released => {
                trace!(thread = %thread.id(), %lock, ?released, "release");
                Ok(())
            }
        }
    }

    /// Everything the thread did so far happens before any later
    /// [`Detector::happens_after`] on `sync`.
    ///
    /// # Errors
    /// Fails if the handle is foreign or the thread already ended.
    pub fn happens_before(&self, handle: &ThreadHandle, sync: SyncId) -> Result<()> {
        let session = self.session("happens_before")?;
        let thread = session.thread(handle)?;
        session.hb.signal(thread, sync);
        session.stats.sync_event();
        trace!(thread = %thread.id(), %sync, "signal");
        Ok(())
    }

    /// The thread's following events happen after every earlier
    /// [`Detector::happens_before`] on `sync`.
    ///
    /// # Errors
    /// Fails if the handle is foreign or the thread already ended.
    pub fn happens_after(&self, handle: &ThreadHandle, sync: SyncId) -> Result<()> {
        let session = self.session("happens_after")?;
        let thread = session.thread(handle)?;
        session.stats.sync_event();
        if !session.hb.wait(thread, sync) {
            debug!(thread = %thread.id(), %sync, "wait on a sync object nobody signalled");
        }
        Ok(())
    }

    /// A block of `size` bytes at `addr` was allocated. Stale shadow state in
    /// the block is discarded.
    ///
    /// # Errors
    /// Fails if the handle is foreign or the thread already ended.
    pub fn allocate(&self, handle: &ThreadHandle, addr: u64, size: usize) -> Result<()> {
        let session = self.session("allocate")?;
        let thread = session.thread(handle)?;
        session.shadow.remove_range(addr, as_len(size));
        session.allocations.lock().insert(addr, size);
        trace!(thread = %thread.id(), size, "allocate {addr:#x}");
        Ok(())
    }

    /// The block starting at `addr` was freed. Its shadow state is dropped so
    /// reuse of the memory is not reported against old accesses. Unknown
    /// blocks are ignored.
    ///
    /// # Errors
    /// Fails if the handle is foreign or the thread already ended.
    pub fn deallocate(&self, handle: &ThreadHandle, addr: u64) -> Result<()> {
        let session = self.session("deallocate")?;
        let thread = session.thread(handle)?;
        let Some(size) = session.allocations.lock().remove(&addr) else {
            debug!(thread = %thread.id(), "free of unknown block {addr:#x}");
            return Ok(());
        };
        session.shadow.remove_range(addr, as_len(size));
        Ok(())
    }

    /// End the session.
    ///
    /// Threads still live are retired against a terminal clock merged from
    /// every thread's final clock. Once this returns no callback fires again.
    ///
    /// # Errors
    /// [`Error::InvalidState`] unless initialized, or [`Error::Io`] if the
    /// diagnostics file cannot be written.
    pub fn finalize(&self) -> Result<Summary> {
        let mut phase = self.phase.write();
        match std::mem::replace(&mut *phase, Phase::Finalized) {
            Phase::Initialized(session) => session.finish(),
            other => {
                let state = other.state();
                *phase = other;
                Err(Error::InvalidState {
                    op: "finalize",
                    state,
                })
            }
        }
    }
}

fn as_len(size: usize) -> u64 {
    u64::try_from(size).unwrap_or(u64::MAX)
}

struct Session {
    id: u64,
    config: DetectorConfig,
    on_race: RaceCallback,
    on_warning: Option<WarningCallback>,
    /// Live threads by caller id.
    threads: RwLock<FxHashMap<ThreadId, Arc<ThreadState>>>,
    /// Threads that were joined or exited.
    retired: Mutex<Vec<Arc<ThreadState>>>,
    next_num: AtomicU32,
    hb: HappensBefore,
    shadow: ShadowTable,
    allocations: Mutex<FxHashMap<u64, usize>>,
    stats: Stats,
    ceiling_warned: AtomicBool,
    diagnostics: Option<Mutex<BufWriter<File>>>,
}

impl Session {
    fn new(
        id: u64,
        config: DetectorConfig,
        on_race: RaceCallback,
        on_warning: Option<WarningCallback>,
    ) -> Result<Self> {
        let diagnostics = match &config.output_path {
            Some(path) => {
                let file = File::create(path)?;
                debug!(path = %path.display(), "writing diagnostics");
                Some(Mutex::new(BufWriter::new(file)))
            }
            None => None,
        };
        Ok(Self {
            id,
            shadow: ShadowTable::new(config.shadow_shards, config.max_shadow_entries),
            config,
            on_race,
            on_warning,
            threads: RwLock::new(FxHashMap::default()),
            retired: Mutex::new(Vec::new()),
            next_num: AtomicU32::new(0),
            hb: HappensBefore::new(),
            allocations: Mutex::new(FxHashMap::default()),
            stats: Stats::default(),
            ceiling_warned: AtomicBool::new(false),
            diagnostics,
        })
    }

    fn issue(&self, state: &Arc<ThreadState>) -> ThreadHandle {
        ThreadHandle {
            state: Arc::clone(state),
            session: self.id,
        }
    }

    fn next_num(&self) -> ThreadNum {
        ThreadNum(self.next_num.fetch_add(1, Ordering::Relaxed))
    }

    fn registered(&self, id: ThreadId, state: ThreadState) -> Arc<ThreadState> {
        self.stats.thread();
        metrics::record_thread(&self.config.name);
        debug!(thread = %id, num = %state.num(), "thread registered");
        Arc::new(state)
    }

    /// Register a root thread. The caller holds the registry lock and has
    /// checked that `id` is not live.
    fn adopt(
        &self,
        threads: &mut FxHashMap<ThreadId, Arc<ThreadState>>,
        id: ThreadId,
    ) -> ThreadHandle {
        let state = self.registered(id, HappensBefore::root(id, self.next_num()));
        let handle = self.issue(&state);
        threads.insert(id, state);
        handle
    }

    fn fork(&self, parent: ThreadId, child: ThreadId) -> Result<ThreadHandle> {
        let mut threads = self.threads.write();
        if parent == child || threads.contains_key(&child) {
            return Err(Error::DuplicateThreadId(child));
        }
        let parent_state = match threads.get(&parent) {
            Some(state) => Arc::clone(state),
            None => Arc::clone(&self.adopt(&mut threads, parent).state),
        };
        let state = HappensBefore::fork(&parent_state, child, self.next_num());
        let state = self.registered(child, state);
        let handle = self.issue(&state);
        threads.insert(child, state);
        debug!(%parent, %child, "fork");
        Ok(handle)
    }

    fn join(&self, parent: ThreadId, child: ThreadId) -> Result<()> {
        if parent == child {
            return Err(Error::SelfJoin(child));
        }
        let child_state = {
            let mut threads = self.threads.write();
            let parent_state = threads.get(&parent).ok_or(Error::UnknownThread(parent))?;
            let child_state = threads.get(&child).ok_or(Error::UnknownThread(child))?;
            HappensBefore::join(parent_state, child_state);
            threads.remove(&child).ok_or(Error::UnknownThread(child))?
        };
        self.retire(&child_state);
        debug!(%parent, %child, "join");
        Ok(())
    }

    fn retire(&self, state: &Arc<ThreadState>) {
        state.retire();
        self.retired.lock().push(Arc::clone(state));
    }

    /// Validate a handle for this session.
    fn thread<'h>(&self, handle: &'h ThreadHandle) -> Result<&'h ThreadState> {
        let state = &*handle.state;
        if handle.session != self.id {
            return Err(Error::ForeignHandle(state.id()));
        }
        if !state.is_live() {
            return Err(Error::ThreadNotLive(state.id()));
        }
        Ok(state)
    }

    fn access(
        &self,
        handle: &ThreadHandle,
        addr: u64,
        pc: u64,
        size: usize,
        write: bool,
    ) -> Result<()> {
        let thread = self.thread(handle)?;
        let clock = thread.clock();
        let current = Access {
            epoch: clock.epoch(thread.num()),
            thread: thread.id(),
            pc,
            size,
            stack: thread.stack().snapshot(self.config.max_stack_depth),
        };

        let mut conflicts = Vec::new();
        // Racing threads already reported for this access.
        let mut reported: Vec<ThreadNum> = Vec::new();
        for cell in self.config.granularity.cells(addr, size) {
            let result = self.shadow.with_record(cell, |record| {
                let outcome = if write {
                    engine::on_write(record, &current, &clock, &mut conflicts)
                } else {
                    engine::on_read(record, &current, &clock, &mut conflicts)
                };
                for conflict in conflicts.drain(..) {
                    let racer = conflict.prior.epoch.thread;
                    if reported.contains(&racer) {
                        continue;
                    }
                    reported.push(racer);
                    self.report(&conflict, &current, cell, write);
                }
                outcome
            });
            match result {
                Ok(outcome) => {
                    if self.config.collect_stats {
                        self.stats.record(outcome);
                    }
                }
                Err(ShadowFull) => {
                    self.stats.untracked();
                    if !self.ceiling_warned.swap(true, Ordering::Relaxed) {
                        self.warn(&Warning::ShadowCeilingReached {
                            ceiling: self.config.max_shadow_entries.unwrap_or_default(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Deliver one race. Runs under the shard lock of `cell`.
    fn report(&self, conflict: &Conflict, current: &Access, cell: u64, write: bool) {
        let report = RaceReport {
            kind: conflict.kind,
            address: cell,
            first: AccessInfo::from_access(&conflict.prior, conflict.kind.prior_is_write(), cell),
            second: AccessInfo::from_access(current, write, cell),
        };
        self.stats.race(report.kind);
        metrics::record_race(&self.config.name, report.kind);
        debug!(
            kind = %report.kind,
            first = %report.first.thread,
            second = %report.second.thread,
            "race on {cell:#x}"
        );
        (self.on_race)(&report);
    }

    fn warn(&self, warning: &Warning) {
        warn!(kind = warning.kind(), "{warning}");
        self.stats.warning();
        metrics::record_warning(&self.config.name, warning);
        if let Some(on_warning) = &self.on_warning {
            on_warning(warning);
        }
        self.diagnose(format_args!("warning: {warning}"));
    }

    fn diagnose(&self, line: fmt::Arguments<'_>) {
        if let Some(out) = &self.diagnostics {
            if let Err(err) = writeln!(out.lock(), "[{}] {line}", self.config.name) {
                warn!("failed to write diagnostics: {err}");
            }
        }
    }

    fn finish(self: Box<Self>) -> Result<Summary> {
        let live: Vec<Arc<ThreadState>> = self.threads.write().drain().map(|(_, t)| t).collect();
        let mut unjoined: Vec<ThreadId> = live.iter().map(|t| t.id()).collect();
        unjoined.sort_unstable();

        let mut terminal_clock = VectorClock::new();
        for state in live.iter().chain(self.retired.lock().iter()) {
            terminal_clock.observe(&state.clock());
        }
        for state in &live {
            debug!(thread = %state.id(), "thread still live at finalize");
            state.retire();
        }

        let threads = self.next_num.load(Ordering::Relaxed) as usize;
        if threads > 1 && self.stats.sync_events() == 0 {
            self.warn(&Warning::NoSynchronizationEvents { threads });
        }

        let shadow_entries = self.shadow.len();
        metrics::record_shadow_entries(&self.config.name, shadow_entries);

        let summary = Summary {
            stats: self.stats.snapshot(),
            terminal_clock,
            unjoined,
            shadow_entries,
            threads,
        };
        if self.config.collect_stats {
            self.diagnose(format_args!("summary:\n{summary}"));
        }
        if let Some(out) = &self.diagnostics {
            out.lock().flush()?;
        }
        info!(
            name = %self.config.name,
            races = summary.stats.races(),
            threads,
            locks = self.hb.lock_count(),
            syncs = self.hb.sync_count(),
            "detector finalized"
        );
        Ok(summary)
    }
}
