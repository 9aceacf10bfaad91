use std::fmt;

use thiserror::Error;

use crate::{LockId, ThreadId};

/// Lifecycle state of a detector session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Finalized,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Finalized => "finalized",
        })
    }
}

/// Detector errors.
///
/// Every variant is a caller-contract violation. Internal consistency
/// violations (a vector clock going backwards) are panics, not errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("`{op}` called on a detector that is {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
    #[error("thread {0} is already live")]
    DuplicateThreadId(ThreadId),
    #[error("unknown thread {0}")]
    UnknownThread(ThreadId),
    #[error("thread {0} cannot join itself")]
    SelfJoin(ThreadId),
    #[error("thread {0} has been joined or has exited")]
    ThreadNotLive(ThreadId),
    #[error("handle for thread {0} belongs to another detector session")]
    ForeignHandle(ThreadId),
    #[error("func_exit on empty call stack of thread {0}")]
    StackUnderflow(ThreadId),
    #[error("thread {thread} released lock {lock} it does not hold")]
    LockNotHeld { thread: ThreadId, lock: LockId },
    #[error("invalid option `{key}`: {reason}")]
    InvalidOption { key: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
