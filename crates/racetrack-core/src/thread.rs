//! Per-thread state: vector clock, call stack and held locks.
//!
//! All mutation of a [`ThreadState`] happens on behalf of its owning thread.
//! Other threads only ever read the published clock snapshot (e.g. a parent
//! reading the final clock of a child it joins).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use racetrack_clock::{Epoch, ThreadNum, VectorClock};
use rustc_hash::FxHashMap;

use crate::LockId;

/// Caller-visible thread identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ThreadId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Immutable copy of a call stack, outermost frame first.
///
/// Cloning is a reference-count bump, so every access recorded while the
/// stack is unchanged shares one allocation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StackSnapshot(Arc<[u64]>);

impl StackSnapshot {
    #[must_use]
    pub fn frames(&self) -> &[u64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for StackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|pc| format!("{pc:#x}")))
            .finish()
    }
}

/// Live call stack of one thread.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<u64>,
    cached: Option<(usize, StackSnapshot)>,
}

impl CallStack {
    pub fn push(&mut self, site: u64) {
        self.frames.push(site);
        self.cached = None;
    }

    /// Pop the innermost frame. Returns `false` on underflow, leaving the
    /// stack empty.
    pub fn pop(&mut self) -> bool {
        self.cached = None;
        self.frames.pop().is_some()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Snapshot of the innermost `max_depth` frames.
    pub fn snapshot(&mut self, max_depth: usize) -> StackSnapshot {
        if let Some((depth, snapshot)) = &self.cached {
            if *depth == max_depth {
                return snapshot.clone();
            }
        }
        let start = self.frames.len().saturating_sub(max_depth);
        let snapshot = StackSnapshot(Arc::from(&self.frames[start..]));
        self.cached = Some((max_depth, snapshot.clone()));
        snapshot
    }
}

/// Locks currently held by one thread, with recursion counts.
#[derive(Debug, Default)]
pub struct LockSet {
    held: FxHashMap<LockId, u32>,
}

impl LockSet {
    /// Record an acquisition. Returns `true` if the lock was not held before.
    pub fn acquire(&mut self, lock: LockId) -> bool {
        let count = self.held.entry(lock).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Record a release. Returns `None` if the lock is not held, otherwise
    /// whether this release gave the lock up entirely.
    pub fn release(&mut self, lock: LockId) -> Option<bool> {
        let count = self.held.get_mut(&lock)?;
        *count -= 1;
        if *count == 0 {
            self.held.remove(&lock);
            Some(true)
        } else {
            Some(false)
        }
    }

    #[must_use]
    pub fn holds(&self, lock: LockId) -> bool {
        self.held.contains_key(&lock)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// State of one observed thread.
pub struct ThreadState {
    id: ThreadId,
    num: ThreadNum,
    /// Published clock. Updates replace the `Arc` contents copy-on-write, so
    /// a reader holding a snapshot never sees a partial update.
    clock: RwLock<Arc<VectorClock>>,
    stack: Mutex<CallStack>,
    locks: Mutex<LockSet>,
    live: AtomicBool,
}

impl ThreadState {
    /// Create a thread whose history starts from `inherited`.
    ///
    /// The thread's own entry is ticked once so its first event is never
    /// covered by a clock that merely inherited zero for it.
    pub(crate) fn new(id: ThreadId, num: ThreadNum, mut inherited: VectorClock) -> Self {
        inherited.tick(num);
        Self {
            id,
            num,
            clock: RwLock::new(Arc::new(inherited)),
            stack: Mutex::new(CallStack::default()),
            locks: Mutex::new(LockSet::default()),
            live: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ThreadId {
        self.id
    }

    #[must_use]
    pub const fn num(&self) -> ThreadNum {
        self.num
    }

    /// Current clock snapshot.
    #[must_use]
    pub fn clock(&self) -> Arc<VectorClock> {
        Arc::clone(&self.clock.read())
    }

    /// Epoch of this thread's current event.
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.clock.read().epoch(self.num)
    }

    /// Increment the own entry and publish.
    pub(crate) fn tick(&self) {
        let mut clock = self.clock.write();
        Arc::make_mut(&mut clock).tick(self.num);
    }

    /// Merge `other` into the clock and publish.
    pub(crate) fn observe(&self, other: &VectorClock) {
        let mut clock = self.clock.write();
        Arc::make_mut(&mut clock).observe(other);
    }

    pub(crate) fn stack(&self) -> parking_lot::MutexGuard<'_, CallStack> {
        self.stack.lock()
    }

    pub(crate) fn locks(&self) -> parking_lot::MutexGuard<'_, LockSet> {
        self.locks.lock()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadState")
            .field("id", &self.id)
            .field("num", &self.num)
            .field("clock", &*self.clock.read())
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use racetrack_clock::Clock;

    use super::*;

    #[test]
    fn test_new_thread_ticks_own_entry() {
        let t = ThreadState::new(ThreadId(7), ThreadNum(3), VectorClock::new());
        assert_eq!(t.epoch(), Epoch::new(ThreadNum(3), Clock(1)));
        assert!(t.is_live());
    }

    #[test]
    fn test_snapshot_is_not_mutated_by_tick() {
        let t = ThreadState::new(ThreadId(1), ThreadNum(0), VectorClock::new());
        let before = t.clock();
        t.tick();
        assert_eq!(before.get(ThreadNum(0)), Clock(1));
        assert_eq!(t.clock().get(ThreadNum(0)), Clock(2));
    }

    #[test]
    fn test_call_stack_snapshot_by_value() {
        let mut stack = CallStack::default();
        stack.push(0x10);
        stack.push(0x20);
        let snap = stack.snapshot(8);
        stack.push(0x30);
        assert_eq!(snap.frames(), &[0x10, 0x20]);
        assert_eq!(stack.snapshot(8).frames(), &[0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_call_stack_depth_limit_keeps_innermost() {
        let mut stack = CallStack::default();
        for site in 1..=5 {
            stack.push(site);
        }
        assert_eq!(stack.snapshot(2).frames(), &[4, 5]);
    }

    #[test]
    fn test_call_stack_underflow_clamps() {
        let mut stack = CallStack::default();
        assert!(!stack.pop());
        assert_eq!(stack.depth(), 0);
        stack.push(1);
        assert!(stack.pop());
        assert!(stack.snapshot(4).is_empty());
    }

    #[test]
    fn test_lock_set_recursion() {
        let mut locks = LockSet::default();
        let m = LockId(0x100);
        assert!(locks.acquire(m));
        assert!(!locks.acquire(m));
        assert_eq!(locks.release(m), Some(false));
        assert!(locks.holds(m));
        assert_eq!(locks.release(m), Some(true));
        assert!(!locks.holds(m));
        assert_eq!(locks.release(m), None);
    }
}
