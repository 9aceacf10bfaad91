//! Rule-hit statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Outcome, RaceKind};

/// Lock-free counters updated from every reporting thread.
#[derive(Debug, Default)]
pub struct Stats {
    read_same_epoch: AtomicU64,
    read_shared_same_epoch: AtomicU64,
    read_exclusive: AtomicU64,
    read_share: AtomicU64,
    read_shared: AtomicU64,
    write_same_epoch: AtomicU64,
    write_exclusive: AtomicU64,
    write_shared: AtomicU64,
    untracked: AtomicU64,
    write_write: AtomicU64,
    write_read: AtomicU64,
    read_write: AtomicU64,
    warnings: AtomicU64,
    threads: AtomicU64,
    sync_events: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Stats {
    pub fn record(&self, outcome: Outcome) {
        bump(match outcome {
            Outcome::ReadSameEpoch => &self.read_same_epoch,
            Outcome::ReadSharedSameEpoch => &self.read_shared_same_epoch,
            Outcome::ReadExclusive => &self.read_exclusive,
            Outcome::ReadShare => &self.read_share,
            Outcome::ReadShared => &self.read_shared,
            Outcome::WriteSameEpoch => &self.write_same_epoch,
            Outcome::WriteExclusive => &self.write_exclusive,
            Outcome::WriteShared => &self.write_shared,
        });
    }

    pub fn race(&self, kind: RaceKind) {
        bump(match kind {
            RaceKind::WriteWrite => &self.write_write,
            RaceKind::WriteRead => &self.write_read,
            RaceKind::ReadWrite => &self.read_write,
        });
    }

    pub fn untracked(&self) {
        bump(&self.untracked);
    }

    pub fn warning(&self) {
        bump(&self.warnings);
    }

    pub fn thread(&self) {
        bump(&self.threads);
    }

    pub fn sync_event(&self) {
        bump(&self.sync_events);
    }

    #[must_use]
    pub fn sync_events(&self) -> u64 {
        self.sync_events.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            read_same_epoch: get(&self.read_same_epoch),
            read_shared_same_epoch: get(&self.read_shared_same_epoch),
            read_exclusive: get(&self.read_exclusive),
            read_share: get(&self.read_share),
            read_shared: get(&self.read_shared),
            write_same_epoch: get(&self.write_same_epoch),
            write_exclusive: get(&self.write_exclusive),
            write_shared: get(&self.write_shared),
            untracked: get(&self.untracked),
            write_write: get(&self.write_write),
            write_read: get(&self.write_read),
            read_write: get(&self.read_write),
            warnings: get(&self.warnings),
            threads: get(&self.threads),
            sync_events: get(&self.sync_events),
        }
    }
}

/// Point-in-time copy of [`Stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub read_same_epoch: u64,
    pub read_shared_same_epoch: u64,
    pub read_exclusive: u64,
    pub read_share: u64,
    pub read_shared: u64,
    pub write_same_epoch: u64,
    pub write_exclusive: u64,
    pub write_shared: u64,
    /// Accesses skipped because the shadow table was full.
    pub untracked: u64,
    pub write_write: u64,
    pub write_read: u64,
    pub read_write: u64,
    pub warnings: u64,
    pub threads: u64,
    pub sync_events: u64,
}

impl StatsSnapshot {
    #[must_use]
    pub const fn reads(&self) -> u64 {
        self.read_same_epoch
            + self.read_shared_same_epoch
            + self.read_exclusive
            + self.read_share
            + self.read_shared
    }

    #[must_use]
    pub const fn writes(&self) -> u64 {
        self.write_same_epoch + self.write_exclusive + self.write_shared
    }

    #[must_use]
    pub const fn races(&self) -> u64 {
        self.write_write + self.write_read + self.read_write
    }
}

#[allow(clippy::cast_precision_loss)]
fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (reads, writes) = (self.reads(), self.writes());
        let total = reads + writes;
        writeln!(f, "accesses: {total} ({reads} reads, {writes} writes)")?;
        writeln!(f, "  reads   {:6.2}%", pct(reads, total))?;
        writeln!(f, "    exclusive, same epoch  {:6.2}%", pct(self.read_same_epoch, reads))?;
        writeln!(f, "    shared, same epoch     {:6.2}%", pct(self.read_shared_same_epoch, reads))?;
        writeln!(f, "    exclusive              {:6.2}%", pct(self.read_exclusive, reads))?;
        writeln!(f, "    share                  {:6.2}%", pct(self.read_share, reads))?;
        writeln!(f, "    shared                 {:6.2}%", pct(self.read_shared, reads))?;
        writeln!(f, "  writes  {:6.2}%", pct(writes, total))?;
        writeln!(f, "    same epoch             {:6.2}%", pct(self.write_same_epoch, writes))?;
        writeln!(f, "    exclusive              {:6.2}%", pct(self.write_exclusive, writes))?;
        writeln!(f, "    shared                 {:6.2}%", pct(self.write_shared, writes))?;
        writeln!(
            f,
            "races: {} (write-write {}, write-read {}, read-write {})",
            self.races(),
            self.write_write,
            self.write_read,
            self.read_write
        )?;
        write!(
            f,
            "threads: {}, sync events: {}, untracked accesses: {}, warnings: {}",
            self.threads, self.sync_events, self.untracked, self.warnings
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Stats::default();
        stats.record(Outcome::ReadExclusive);
        stats.record(Outcome::ReadShare);
        stats.record(Outcome::WriteShared);
        stats.race(RaceKind::ReadWrite);
        stats.race(RaceKind::ReadWrite);
        stats.untracked();

        let snap = stats.snapshot();
        assert_eq!(snap.reads(), 2);
        assert_eq!(snap.writes(), 1);
        assert_eq!(snap.read_write, 2);
        assert_eq!(snap.races(), 2);
        assert_eq!(snap.untracked, 1);
    }

    #[test]
    fn test_display_handles_empty_run() {
        let text = StatsSnapshot::default().to_string();
        assert!(text.contains("accesses: 0"));
        assert!(text.contains("races: 0"));
    }
}
