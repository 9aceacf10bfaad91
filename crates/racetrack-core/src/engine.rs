//! Race classification on a single shadow location.
//!
//! These functions implement the FastTrack rules. They operate on one
//! [`AccessRecord`] whose shard lock the caller holds, never block, and never
//! report anything themselves: conflicts are pushed into a caller-owned buffer
//! and the session decides how to report them.

use std::fmt;

use racetrack_clock::VectorClock;
use tracing::trace;

use crate::{Access, AccessRecord, ReadState};

/// Classification of a race by the kinds of the (earlier, later) accesses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RaceKind {
    WriteWrite,
    WriteRead,
    ReadWrite,
}

impl RaceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WriteWrite => "write-write",
            Self::WriteRead => "write-read",
            Self::ReadWrite => "read-write",
        }
    }

    /// Whether the earlier access was a write.
    #[must_use]
    pub const fn prior_is_write(self) -> bool {
        matches!(self, Self::WriteWrite | Self::WriteRead)
    }

    /// Whether the later access was a write.
    #[must_use]
    pub const fn current_is_write(self) -> bool {
        matches!(self, Self::WriteWrite | Self::ReadWrite)
    }
}

impl fmt::Display for RaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded access that is concurrent with the current one.
#[derive(Clone, Debug)]
pub struct Conflict {
    pub kind: RaceKind,
    pub prior: Access,
}

/// Which rule handled an access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Same thread read again within the same epoch.
    ReadSameEpoch,
    /// Read-shared location, this thread already read in this epoch.
    ReadSharedSameEpoch,
    /// Read recorded in exclusive mode.
    ReadExclusive,
    /// Read turned an exclusive location into a read-shared one.
    ReadShare,
    /// Read added to / updated in the shared reader set.
    ReadShared,
    /// Same thread wrote again within the same epoch.
    WriteSameEpoch,
    /// Write to a location with at most one recorded reader.
    WriteExclusive,
    /// Write to a read-shared location.
    WriteShared,
}

/// `prior` is from another thread and not ordered before the current access.
#[inline]
fn races(prior: &Access, current: &Access, clock: &VectorClock) -> bool {
    prior.epoch.thread != current.epoch.thread && !prior.epoch.leq(clock)
}

/// Check and record a read.
pub fn on_read(
    record: &mut AccessRecord,
    current: &Access,
    clock: &VectorClock,
    conflicts: &mut Vec<Conflict>,
) -> Outcome {
    match &record.reads {
        ReadState::Exclusive(r) if r.epoch == current.epoch => return Outcome::ReadSameEpoch,
        ReadState::Shared(readers) if readers.iter().any(|r| r.epoch == current.epoch) => {
            return Outcome::ReadSharedSameEpoch;
        }
        _ => {}
    }

    if let Some(w) = &record.write {
        if races(w, current, clock) {
            trace!(prior = %w.epoch, current = %current.epoch, "write-read conflict");
            conflicts.push(Conflict {
                kind: RaceKind::WriteRead,
                prior: w.clone(),
            });
        }
    }

    match &mut record.reads {
        ReadState::Never => {
            record.reads = ReadState::Exclusive(current.clone());
            Outcome::ReadExclusive
        }
        ReadState::Exclusive(r)
            if r.epoch.thread == current.epoch.thread || r.epoch.leq(clock) =>
        {
            *r = current.clone();
            Outcome::ReadExclusive
        }
        ReadState::Exclusive(r) => {
            let previous = r.clone();
            record.reads = ReadState::Shared(vec![previous, current.clone()]);
            Outcome::ReadShare
        }
        ReadState::Shared(readers) => {
            match readers
                .iter_mut()
                .find(|r| r.epoch.thread == current.epoch.thread)
            {
                Some(slot) => *slot = current.clone(),
                None => readers.push(current.clone()),
            }
            Outcome::ReadShared
        }
    }
}

/// Check and record a write.
pub fn on_write(
    record: &mut AccessRecord,
    current: &Access,
    clock: &VectorClock,
    conflicts: &mut Vec<Conflict>,
) -> Outcome {
    if let Some(w) = &record.write {
        if w.epoch == current.epoch {
            return Outcome::WriteSameEpoch;
        }
        if races(w, current, clock) {
            trace!(prior = %w.epoch, current = %current.epoch, "write-write conflict");
            conflicts.push(Conflict {
                kind: RaceKind::WriteWrite,
                prior: w.clone(),
            });
        }
    }

    let outcome = match &record.reads {
        ReadState::Never => Outcome::WriteExclusive,
        ReadState::Exclusive(r) => {
            if races(r, current, clock) {
                trace!(prior = %r.epoch, current = %current.epoch, "read-write conflict");
                conflicts.push(Conflict {
                    kind: RaceKind::ReadWrite,
                    prior: r.clone(),
                });
            }
            Outcome::WriteExclusive
        }
        ReadState::Shared(readers) => {
            conflicts.extend(readers.iter().filter(|r| races(r, current, clock)).map(|r| {
                Conflict {
                    kind: RaceKind::ReadWrite,
                    prior: r.clone(),
                }
            }));
            Outcome::WriteShared
        }
    };

    record.write = Some(current.clone());
    record.reads = ReadState::Never;
    outcome
}

#[cfg(test)]
mod tests {
    use racetrack_clock::{Clock, Epoch, ThreadNum};

    use super::*;
    use crate::{StackSnapshot, ThreadId};

    fn access(thread: u32, clock: u64) -> Access {
        Access {
            epoch: Epoch::new(ThreadNum(thread), Clock(clock)),
            thread: ThreadId(u64::from(thread) + 100),
            pc: 0x40,
            size: 4,
            stack: StackSnapshot::default(),
        }
    }

    /// Clock of a thread that has observed nothing but its own history.
    fn own(thread: u32, clock: u64) -> VectorClock {
        [Epoch::new(ThreadNum(thread), Clock(clock))].into_iter().collect()
    }

    fn with(mut vc: VectorClock, thread: u32, clock: u64) -> VectorClock {
        vc.advance(ThreadNum(thread), Clock(clock));
        vc
    }

    #[test]
    fn test_same_thread_never_conflicts() {
        let mut rec = AccessRecord::default();
        let mut conflicts = Vec::new();
        let vc = own(0, 1);
        on_write(&mut rec, &access(0, 1), &vc, &mut conflicts);
        on_read(&mut rec, &access(0, 1), &vc, &mut conflicts);
        let vc = own(0, 2);
        on_write(&mut rec, &access(0, 2), &vc, &mut conflicts);
        on_read(&mut rec, &access(0, 2), &vc, &mut conflicts);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_write_write() {
        let mut rec = AccessRecord::default();
        let mut conflicts = Vec::new();
        on_write(&mut rec, &access(1, 1), &own(1, 1), &mut conflicts);
        let outcome = on_write(&mut rec, &access(2, 1), &own(2, 1), &mut conflicts);
        assert_eq!(outcome, Outcome::WriteExclusive);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, RaceKind::WriteWrite);
        assert_eq!(conflicts[0].prior.epoch.thread, ThreadNum(1));
    }

    #[test]
    fn test_ordered_write_write() {
        let mut rec = AccessRecord::default();
        let mut conflicts = Vec::new();
        on_write(&mut rec, &access(1, 3), &own(1, 3), &mut conflicts);
        // Thread 2 has observed thread 1 up to clock 3.
        on_write(&mut rec, &access(2, 1), &with(own(2, 1), 1, 3), &mut conflicts);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_write_read() {
        let mut rec = AccessRecord::default();
        let mut conflicts = Vec::new();
        on_write(&mut rec, &access(1, 1), &own(1, 1), &mut conflicts);
        on_read(&mut rec, &access(2, 1), &own(2, 1), &mut conflicts);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, RaceKind::WriteRead);
    }

    #[test]
    fn test_read_write_exclusive() {
        let mut rec = AccessRecord::default();
        let mut conflicts = Vec::new();
        on_read(&mut rec, &access(1, 1), &own(1, 1), &mut conflicts);
        on_write(&mut rec, &access(2, 1), &own(2, 1), &mut conflicts);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, RaceKind::ReadWrite);
        assert!(matches!(rec.reads, ReadState::Never));
    }

    #[test]
    fn test_read_share_transition() {
        let mut rec = AccessRecord::default();
        let mut conflicts = Vec::new();
        assert_eq!(
            on_read(&mut rec, &access(1, 1), &own(1, 1), &mut conflicts),
            Outcome::ReadExclusive
        );
        assert_eq!(
            on_read(&mut rec, &access(2, 1), &own(2, 1), &mut conflicts),
            Outcome::ReadShare
        );
        assert!(rec.is_read_shared());
        assert_eq!(
            on_read(&mut rec, &access(2, 1), &own(2, 1), &mut conflicts),
            Outcome::ReadSharedSameEpoch
        );
        assert_eq!(
            on_read(&mut rec, &access(3, 1), &own(3, 1), &mut conflicts),
            Outcome::ReadShared
        );
        assert!(conflicts.is_empty());
        match &rec.reads {
            ReadState::Shared(readers) => assert_eq!(readers.len(), 3),
            other => panic!("expected shared reads, got {other:?}"),
        }
    }

    #[test]
    fn test_ordered_reads_stay_exclusive() {
        let mut rec = AccessRecord::default();
        let mut conflicts = Vec::new();
        on_read(&mut rec, &access(1, 2), &own(1, 2), &mut conflicts);
        let outcome = on_read(&mut rec, &access(2, 1), &with(own(2, 1), 1, 2), &mut conflicts);
        assert_eq!(outcome, Outcome::ReadExclusive);
        assert!(!rec.is_read_shared());
    }

    #[test]
    fn test_write_to_shared_reports_each_racing_reader() {
        let mut rec = AccessRecord::default();
        let mut conflicts = Vec::new();
        on_read(&mut rec, &access(1, 1), &own(1, 1), &mut conflicts);
        on_read(&mut rec, &access(2, 1), &own(2, 1), &mut conflicts);
        on_read(&mut rec, &access(3, 1), &own(3, 1), &mut conflicts);

        // Writer has synchronized with reader 1 only.
        let outcome = on_write(&mut rec, &access(4, 1), &with(own(4, 1), 1, 1), &mut conflicts);
        assert_eq!(outcome, Outcome::WriteShared);
        let threads: Vec<_> = conflicts.iter().map(|c| c.prior.epoch.thread).collect();
        assert_eq!(threads, vec![ThreadNum(2), ThreadNum(3)]);
        assert!(conflicts.iter().all(|c| c.kind == RaceKind::ReadWrite));
        assert!(matches!(rec.reads, ReadState::Never));
    }

    #[test]
    fn test_write_same_epoch_short_circuits() {
        let mut rec = AccessRecord::default();
        let mut conflicts = Vec::new();
        on_write(&mut rec, &access(1, 1), &own(1, 1), &mut conflicts);
        assert_eq!(
            on_write(&mut rec, &access(1, 1), &own(1, 1), &mut conflicts),
            Outcome::WriteSameEpoch
        );
    }

    #[test]
    fn test_kind_flags() {
        assert!(RaceKind::WriteWrite.prior_is_write());
        assert!(RaceKind::WriteWrite.current_is_write());
        assert!(RaceKind::WriteRead.prior_is_write());
        assert!(!RaceKind::WriteRead.current_is_write());
        assert!(!RaceKind::ReadWrite.prior_is_write());
        assert!(RaceKind::ReadWrite.current_is_write());
    }
}
