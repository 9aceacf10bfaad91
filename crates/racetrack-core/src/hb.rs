//! Happens-before tracking.
//!
//! Translates fork, join, lock and generic synchronization events into
//! vector clock updates:
//!
//! | event              | effect                                                  |
//! |--------------------|---------------------------------------------------------|
//! | `fork(p, c)`       | `C := P` (plus `c`'s own first tick), then `p` ticks    |
//! | `join(p, c)`       | `P := P ⊔ C`, then `p` ticks                            |
//! | `acquire(t, m)`    | `T := T ⊔ M`                                            |
//! | `release(t, m)`    | `M := T`, then `t` ticks                                |
//! | `signal(t, s)`     | `S := S ⊔ T`, then `t` ticks                            |
//! | `wait(t, s)`       | `T := T ⊔ S`                                            |

use std::fmt;

use parking_lot::Mutex;
use racetrack_clock::{Epoch, ThreadNum, VectorClock};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::{ThreadId, ThreadState};

/// Identifier of a lock (typically the mutex address).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub u64);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identifier of a generic synchronization object (barrier, condition
/// variable, channel slot, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncId(pub u64);

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Result of an acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    /// The lock was released before; its clock was merged.
    Synchronized,
    /// First acquisition of this lock ever; nothing to merge.
    Fresh,
    /// Already held by the same thread; nothing changes.
    Recursive,
}

/// Result of a release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Released {
    /// Lock clock published, thread ticked.
    Published,
    /// Still held recursively.
    Recursive,
    /// The thread did not hold the lock.
    NotHeld,
}

/// Causal order induced by synchronization events.
#[derive(Default)]
pub struct HappensBefore {
    locks: Mutex<FxHashMap<LockId, VectorClock>>,
    syncs: Mutex<FxHashMap<SyncId, VectorClock>>,
}

impl HappensBefore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a new thread from `parent`.
    ///
    /// The child starts with everything the parent has observed; the parent
    /// ticks afterwards so its later events stay invisible to the child.
    #[must_use]
    pub fn fork(parent: &ThreadState, child: ThreadId, num: ThreadNum) -> ThreadState {
        let inherited = VectorClock::clone(&parent.clock());
        let state = ThreadState::new(child, num, inherited);
        parent.tick();
        trace!(parent = %parent.id(), %child, "fork");
        state
    }

    /// Create a thread with no causal predecessor.
    #[must_use]
    pub fn root(id: ThreadId, num: ThreadNum) -> ThreadState {
        ThreadState::new(id, num, VectorClock::new())
    }

    /// Import the final clock of `child` into `parent`.
    pub fn join(parent: &ThreadState, child: &ThreadState) {
        parent.observe(&child.clock());
        parent.tick();
        trace!(parent = %parent.id(), child = %child.id(), "join");
    }

    pub fn acquire(&self, thread: &ThreadState, lock: LockId) -> Acquired {
        if !thread.locks().acquire(lock) {
            return Acquired::Recursive;
        }
        let locks = self.locks.lock();
        match locks.get(&lock) {
            Some(released) => {
                thread.observe(released);
                Acquired::Synchronized
            }
            None => Acquired::Fresh,
        }
    }

    pub fn release(&self, thread: &ThreadState, lock: LockId) -> Released {
        match thread.locks().release(lock) {
            None => return Released::NotHeld,
            Some(false) => return Released::Recursive,
            Some(true) => {}
        }
        {
            let mut locks = self.locks.lock();
            locks.insert(lock, VectorClock::clone(&thread.clock()));
        }
        thread.tick();
        Released::Published
    }

    /// Publish `thread`'s history into a sync object.
    pub fn signal(&self, thread: &ThreadState, sync: SyncId) {
        {
            let mut syncs = self.syncs.lock();
            syncs.entry(sync).or_default().observe(&thread.clock());
        }
        thread.tick();
    }

    /// Import a sync object's history. Returns `false` if nothing was ever
    /// signalled on it.
    pub fn wait(&self, thread: &ThreadState, sync: SyncId) -> bool {
        let syncs = self.syncs.lock();
        syncs.get(&sync).is_some_and(|vc| {
            thread.observe(vc);
            true
        })
    }

    /// `a` happened before `b`, where `b_clock` is the clock of `b`'s thread
    /// at the time of `b`.
    #[must_use]
    pub fn ordered(a: &Epoch, b_clock: &VectorClock) -> bool {
        a.leq(b_clock)
    }

    /// Neither event happened before the other.
    #[must_use]
    pub fn concurrent(a: &Epoch, a_clock: &VectorClock, b: &Epoch, b_clock: &VectorClock) -> bool {
        !Self::ordered(a, b_clock) && !Self::ordered(b, a_clock)
    }

    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    #[must_use]
    pub fn sync_count(&self) -> usize {
        self.syncs.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use racetrack_clock::Clock;

    use super::*;

    fn root(id: u64, num: u32) -> ThreadState {
        HappensBefore::root(ThreadId(id), ThreadNum(num))
    }

    #[test]
    fn test_fork_orders_parent_past_before_child() {
        let parent = root(1, 0);
        let before_fork = parent.epoch();
        let child = HappensBefore::fork(&parent, ThreadId(2), ThreadNum(1));

        assert!(HappensBefore::ordered(&before_fork, &child.clock()));
        // Parent's post-fork events are not visible to the child.
        assert!(!HappensBefore::ordered(&parent.epoch(), &child.clock()));
        // Child's events are not visible to the parent before a join.
        assert!(!HappensBefore::ordered(&child.epoch(), &parent.clock()));
    }

    #[test]
    fn test_join_imports_child_history() {
        let parent = root(1, 0);
        let child = HappensBefore::fork(&parent, ThreadId(2), ThreadNum(1));
        child.tick();
        let child_last = child.epoch();

        HappensBefore::join(&parent, &child);
        assert!(HappensBefore::ordered(&child_last, &parent.clock()));
        assert_eq!(parent.epoch().clock, Clock(3));
    }

    #[test]
    fn test_siblings_are_concurrent() {
        let parent = root(1, 0);
        let a = HappensBefore::fork(&parent, ThreadId(2), ThreadNum(1));
        let b = HappensBefore::fork(&parent, ThreadId(3), ThreadNum(2));
        assert!(HappensBefore::concurrent(
            &a.epoch(),
            &a.clock(),
            &b.epoch(),
            &b.clock()
        ));
    }

    #[test]
    fn test_release_acquire_edge() {
        let hb = HappensBefore::new();
        let parent = root(1, 0);
        let a = HappensBefore::fork(&parent, ThreadId(2), ThreadNum(1));
        let b = HappensBefore::fork(&parent, ThreadId(3), ThreadNum(2));
        let m = LockId(0x100);

        assert_eq!(hb.acquire(&a, m), Acquired::Fresh);
        let in_critical_section = a.epoch();
        assert_eq!(hb.release(&a, m), Released::Published);

        assert_eq!(hb.acquire(&b, m), Acquired::Synchronized);
        assert!(HappensBefore::ordered(&in_critical_section, &b.clock()));
        // a's events after the release stay concurrent with b.
        assert!(!HappensBefore::ordered(&a.epoch(), &b.clock()));
        assert_eq!(hb.lock_count(), 1);
    }

    #[test]
    fn test_recursive_lock() {
        let hb = HappensBefore::new();
        let t = root(1, 0);
        let m = LockId(1);
        assert_eq!(hb.acquire(&t, m), Acquired::Fresh);
        assert_eq!(hb.acquire(&t, m), Acquired::Recursive);
        let clock = t.epoch();
        assert_eq!(hb.release(&t, m), Released::Recursive);
        assert_eq!(t.epoch(), clock);
        assert_eq!(hb.release(&t, m), Released::Published);
        assert_eq!(hb.release(&t, m), Released::NotHeld);
    }

    #[test]
    fn test_signal_wait_edge() {
        let hb = HappensBefore::new();
        let parent = root(1, 0);
        let a = HappensBefore::fork(&parent, ThreadId(2), ThreadNum(1));
        let b = HappensBefore::fork(&parent, ThreadId(3), ThreadNum(2));
        let s = SyncId(5051);

        assert!(!hb.wait(&b, s));
        let before_signal = a.epoch();
        hb.signal(&a, s);
        assert!(hb.wait(&b, s));
        assert!(HappensBefore::ordered(&before_signal, &b.clock()));
    }

    #[test]
    fn test_signal_accumulates_publishers() {
        let hb = HappensBefore::new();
        let parent = root(1, 0);
        let a = HappensBefore::fork(&parent, ThreadId(2), ThreadNum(1));
        let b = HappensBefore::fork(&parent, ThreadId(3), ThreadNum(2));
        let c = HappensBefore::fork(&parent, ThreadId(4), ThreadNum(3));
        let barrier = SyncId(0x700);

        let (ea, eb) = (a.epoch(), b.epoch());
        hb.signal(&a, barrier);
        hb.signal(&b, barrier);
        assert_eq!(hb.sync_count(), 1);
        hb.wait(&c, barrier);
        assert!(HappensBefore::ordered(&ea, &c.clock()));
        assert!(HappensBefore::ordered(&eb, &c.clock()));
    }
}
