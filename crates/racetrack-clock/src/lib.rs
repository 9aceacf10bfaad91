//! Logical clocks for happens-before tracking.
//!
//! This crate provides the ordering primitives used by the race detector:
//! - [`ThreadNum`]: dense internal thread identity, never reused within a session
//! - [`Clock`]: a per-thread monotonically increasing counter
//! - [`Epoch`]: a `(thread, clock)` pair naming one event
//! - [`VectorClock`]: the pointwise-max lattice of clocks
//!
//! An epoch `e` happened before (or is equal to) the state described by a
//! vector clock `vc` iff `vc[e.thread] >= e.clock`. That single comparison is
//! what makes the common race checks constant time.

mod epoch;
mod vector;

pub use epoch::*;
pub use vector::*;
