use std::fmt;

use crate::{LockId, ThreadId};

/// Observable degradation or tolerated contract violation.
///
/// Warnings never stop detection, but each one means the soundness or
/// completeness of later verdicts may be reduced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Warning {
    /// The shadow table is full; accesses to new locations go unchecked.
    ShadowCeilingReached { ceiling: usize },
    /// `func_exit` on an empty call stack; the stack was clamped to empty.
    StackUnderflow { thread: ThreadId },
    /// A release of a lock the thread did not hold was ignored.
    LockNotHeld { thread: ThreadId, lock: LockId },
    /// Several threads ran but no lock or sync events were reported, so
    /// every cross-thread order comes from fork/join alone.
    NoSynchronizationEvents { threads: usize },
}

impl Warning {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ShadowCeilingReached { .. } => "shadow-ceiling",
            Self::StackUnderflow { .. } => "stack-underflow",
            Self::LockNotHeld { .. } => "lock-not-held",
            Self::NoSynchronizationEvents { .. } => "no-sync-events",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShadowCeilingReached { ceiling } => write!(
                f,
                "shadow table reached its ceiling of {ceiling} locations; new locations are not checked"
            ),
            Self::StackUnderflow { thread } => {
                write!(f, "func_exit on empty call stack of thread {thread}")
            }
            Self::LockNotHeld { thread, lock } => {
                write!(f, "thread {thread} released lock {lock} it does not hold")
            }
            Self::NoSynchronizationEvents { threads } => write!(
                f,
                "{threads} threads observed without any lock or sync events; ordering relies on fork/join only"
            ),
        }
    }
}
