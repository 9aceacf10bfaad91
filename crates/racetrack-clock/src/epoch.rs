use std::fmt;

/// Internal thread identity.
///
/// Caller-visible thread ids may be reused after a join; thread numbers are
/// handed out monotonically by the session and never reused, so epochs of a
/// retired thread can never be confused with those of its successor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadNum(pub u32);

impl ThreadNum {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ThreadNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Logical clock value of a single thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Clock(pub u64);

impl Clock {
    pub const ZERO: Self = Self(0);

    /// The next clock value.
    ///
    /// # Panics
    /// Panics if the counter would wrap, which would silently reorder events.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        match self.0.checked_add(1) {
            Some(v) => Self(v),
            None => panic!("logical clock overflow"),
        }
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A specific, already-happened event of one thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Epoch {
    pub thread: ThreadNum,
    pub clock: Clock,
}

impl Epoch {
    #[inline]
    #[must_use]
    pub const fn new(thread: ThreadNum, clock: Clock) -> Self {
        Self { thread, clock }
    }

    /// Happened-before-or-equal test against a vector clock.
    #[inline]
    #[must_use]
    pub fn leq(&self, vc: &crate::VectorClock) -> bool {
        self.clock <= vc.get(self.thread)
    }

    /// Ordering between two epochs, given the clock of `other`'s thread at the
    /// time `other` happened.
    #[inline]
    #[must_use]
    pub fn happens_before(&self, other_vc: &crate::VectorClock) -> bool {
        self.leq(other_vc)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.clock, self.thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VectorClock;

    #[test]
    fn test_clock_next() {
        assert_eq!(Clock::ZERO.next(), Clock(1));
        assert_eq!(Clock(41).next(), Clock(42));
    }

    #[test]
    #[should_panic(expected = "logical clock overflow")]
    fn test_clock_overflow_is_fatal() {
        let _ = Clock(u64::MAX).next();
    }

    #[test]
    fn test_epoch_leq() {
        let mut vc = VectorClock::new();
        vc.advance(ThreadNum(1), Clock(3));

        assert!(Epoch::new(ThreadNum(1), Clock(2)).leq(&vc));
        assert!(Epoch::new(ThreadNum(1), Clock(3)).leq(&vc));
        assert!(!Epoch::new(ThreadNum(1), Clock(4)).leq(&vc));
        // Unknown threads read as zero.
        assert!(!Epoch::new(ThreadNum(7), Clock(1)).leq(&vc));
    }

    #[test]
    fn test_epoch_display() {
        assert_eq!(Epoch::new(ThreadNum(2), Clock(9)).to_string(), "9@T2");
    }
}
