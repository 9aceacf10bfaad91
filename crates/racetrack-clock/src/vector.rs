//! Vector clocks.
//!
//! Entries are stored densely, indexed by [`ThreadNum`]. Thread numbers are
//! allocated sequentially by the session, so the vector stays as long as the
//! number of threads ever created and missing entries read as zero.

use std::fmt;

use crate::{Clock, Epoch, ThreadNum};

/// Per-thread record of the latest event known to have happened before the
/// owner's current event, for every thread.
///
/// # Example
///
/// ```text
/// T0: [5, 2, 3]  (T0 is at 5, has observed T1 up to 2, T2 up to 3)
/// T1: [4, 7, 3]
/// ```
#[derive(Clone, Default)]
pub struct VectorClock {
    clocks: Vec<Clock>,
}

impl VectorClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { clocks: Vec::new() }
    }

    /// Clock value known for `thread` (zero if never observed).
    #[inline]
    #[must_use]
    pub fn get(&self, thread: ThreadNum) -> Clock {
        self.clocks.get(thread.index()).copied().unwrap_or(Clock::ZERO)
    }

    /// The epoch of `thread`'s latest event as seen by this clock.
    #[inline]
    #[must_use]
    pub fn epoch(&self, thread: ThreadNum) -> Epoch {
        Epoch::new(thread, self.get(thread))
    }

    /// Increment `thread`'s own entry and return the new value.
    #[inline]
    pub fn tick(&mut self, thread: ThreadNum) -> Clock {
        let next = self.get(thread).next();
        self.advance(thread, next);
        next
    }

    /// Raise `thread`'s entry to `clock`.
    ///
    /// # Panics
    /// Panics if `clock` is lower than the current entry. Vector clocks only
    /// grow; a decrease means the happens-before bookkeeping is corrupt and
    /// every later verdict would be unreliable.
    pub fn advance(&mut self, thread: ThreadNum, clock: Clock) {
        let idx = thread.index();
        if idx >= self.clocks.len() {
            self.clocks.resize(idx + 1, Clock::ZERO);
        }
        let slot = &mut self.clocks[idx];
        assert!(
            clock >= *slot,
            "vector clock entry for {thread} would decrease from {} to {clock}",
            *slot
        );
        *slot = clock;
    }

    /// Pointwise-max merge of `other` into `self`.
    pub fn observe(&mut self, other: &Self) {
        if other.clocks.len() > self.clocks.len() {
            self.clocks.resize(other.clocks.len(), Clock::ZERO);
        }
        for (mine, theirs) in self.clocks.iter_mut().zip(&other.clocks) {
            *mine = (*mine).max(*theirs);
        }
    }

    /// Pointwise `self <= other`.
    #[must_use]
    pub fn leq(&self, other: &Self) -> bool {
        self.clocks
            .iter()
            .enumerate()
            .all(|(i, c)| *c <= other.clocks.get(i).copied().unwrap_or(Clock::ZERO))
    }

    /// Neither clock is pointwise below the other.
    #[must_use]
    pub fn concurrent(&self, other: &Self) -> bool {
        !self.leq(other) && !other.leq(self)
    }

    /// Number of thread slots (including zero entries).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clocks.iter().all(|c| *c == Clock::ZERO)
    }

    /// Non-zero entries in thread order.
    pub fn iter(&self) -> impl Iterator<Item = Epoch> + '_ {
        self.clocks
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != Clock::ZERO)
            .map(|(i, c)| Epoch::new(ThreadNum(u32::try_from(i).unwrap_or(u32::MAX)), *c))
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.leq(other) && other.leq(self)
    }
}

impl Eq for VectorClock {}

impl FromIterator<Epoch> for VectorClock {
    fn from_iter<I: IntoIterator<Item = Epoch>>(iter: I) -> Self {
        let mut vc = Self::new();
        for e in iter {
            if e.clock > vc.get(e.thread) {
                vc.advance(e.thread, e.clock);
            }
        }
        vc
    }
}

impl fmt::Debug for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VC[")?;
        for (i, val) in self.clocks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{val}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(entries: &[u64]) -> VectorClock {
        entries
            .iter()
            .enumerate()
            .map(|(i, c)| Epoch::new(ThreadNum(i as u32), Clock(*c)))
            .collect()
    }

    #[test]
    fn test_tick() {
        let mut vc = VectorClock::new();
        assert_eq!(vc.tick(ThreadNum(0)), Clock(1));
        assert_eq!(vc.tick(ThreadNum(0)), Clock(2));
        assert_eq!(vc.get(ThreadNum(0)), Clock(2));
        assert_eq!(vc.get(ThreadNum(1)), Clock::ZERO);
    }

    #[test]
    fn test_observe_is_pointwise_max() {
        let mut a = vc(&[3, 1, 2]);
        let b = vc(&[2, 5, 1, 4]);
        a.observe(&b);
        assert_eq!(a, vc(&[3, 5, 2, 4]));
    }

    #[test]
    fn test_observe_idempotent() {
        let mut a = vc(&[3, 1, 2]);
        let snapshot = a.clone();
        a.observe(&snapshot);
        assert_eq!(a, snapshot);
    }

    #[test]
    fn test_observe_never_decreases() {
        let mut a = vc(&[4, 4, 4]);
        a.observe(&vc(&[1, 9, 0]));
        for (i, expected) in [4, 9, 4].into_iter().enumerate() {
            assert!(a.get(ThreadNum(i as u32)) >= Clock(expected));
        }
    }

    #[test]
    fn test_observe_commutes() {
        let (x, y) = (vc(&[1, 7, 0, 2]), vc(&[5, 2, 3]));
        let mut xy = x.clone();
        xy.observe(&y);
        let mut yx = y;
        yx.observe(&x);
        assert_eq!(xy, yx);
    }

    #[test]
    fn test_leq_and_concurrent() {
        let a = vc(&[1, 2, 3]);
        let b = vc(&[2, 3, 4]);
        let c = vc(&[2, 1, 4]);
        assert!(a.leq(&b));
        assert!(!b.leq(&a));
        assert!(!a.concurrent(&b));
        assert!(b.concurrent(&c));
    }

    #[test]
    fn test_trailing_zeros_compare_equal() {
        let mut a = vc(&[1, 2]);
        a.advance(ThreadNum(5), Clock::ZERO);
        assert_eq!(a, vc(&[1, 2]));
        assert_eq!(a.len(), 6);
    }

    #[test]
    #[should_panic(expected = "would decrease")]
    fn test_decrease_is_fatal() {
        let mut a = vc(&[5]);
        a.advance(ThreadNum(0), Clock(4));
    }

    #[test]
    fn test_iter_skips_zero_entries() {
        let a = vc(&[0, 3, 0, 1]);
        let epochs: Vec<_> = a.iter().collect();
        assert_eq!(
            epochs,
            vec![
                Epoch::new(ThreadNum(1), Clock(3)),
                Epoch::new(ThreadNum(3), Clock(1)),
            ]
        );
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", vc(&[1, 0, 2])), "VC[1, 0, 2]");
    }
}
