//! Shadow location table.
//!
//! Maps each tracked memory location to its [`AccessRecord`]. The table is
//! split into shards by address range, each behind its own mutex, so threads
//! touching unrelated memory never contend.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use racetrack_clock::Epoch;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{StackSnapshot, ThreadId};

/// Addresses sharing the upper bits above this shift land in the same shard.
pub const SHARD_SHIFT: u32 = 4;

/// Above this many bytes, range removal scans shards instead of addresses.
const RANGE_SCAN_LIMIT: u64 = 4096;

/// One recorded access.
#[derive(Clone, Debug)]
pub struct Access {
    pub epoch: Epoch,
    pub thread: ThreadId,
    pub pc: u64,
    pub size: usize,
    pub stack: StackSnapshot,
}

/// Read history of a location.
#[derive(Clone, Debug, Default)]
pub enum ReadState {
    #[default]
    Never,
    /// All reads so far are ordered; only the latest one matters.
    Exclusive(Access),
    /// Concurrent readers, at most one entry per thread.
    Shared(Vec<Access>),
}

/// Per-location access history.
#[derive(Clone, Debug, Default)]
pub struct AccessRecord {
    pub write: Option<Access>,
    pub reads: ReadState,
}

impl AccessRecord {
    #[must_use]
    pub const fn is_read_shared(&self) -> bool {
        matches!(self.reads, ReadState::Shared(_))
    }
}

/// The memory ceiling has been reached and the location is not tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShadowFull;

/// Sharded map from address to access record.
pub struct ShadowTable {
    shards: Box<[Mutex<FxHashMap<u64, AccessRecord>>]>,
    mask: u64,
    entries: AtomicUsize,
    ceiling: Option<usize>,
}

impl ShadowTable {
    /// Create a table with `shards` shards (rounded up to a power of two)
    /// holding at most `ceiling` locations.
    #[must_use]
    pub fn new(shards: usize, ceiling: Option<usize>) -> Self {
        let shards = shards.max(1).next_power_of_two();
        Self {
            shards: (0..shards).map(|_| Mutex::new(FxHashMap::default())).collect(),
            mask: (shards - 1) as u64,
            entries: AtomicUsize::new(0),
            ceiling,
        }
    }

    #[inline]
    fn shard(&self, addr: u64) -> &Mutex<FxHashMap<u64, AccessRecord>> {
        // mask < shard count, so the index always fits
        #[allow(clippy::cast_possible_truncation)]
        let idx = ((addr >> SHARD_SHIFT) & self.mask) as usize;
        &self.shards[idx]
    }

    /// Run `f` on the record for `addr`, creating it on first access.
    ///
    /// `f` runs while the shard is locked. It must not touch the table.
    ///
    /// # Errors
    /// Returns [`ShadowFull`] if `addr` is untracked and the ceiling is reached.
    pub fn with_record<R>(
        &self,
        addr: u64,
        f: impl FnOnce(&mut AccessRecord) -> R,
    ) -> Result<R, ShadowFull> {
        let mut shard = self.shard(addr).lock();
        if let Some(record) = shard.get_mut(&addr) {
            return Ok(f(record));
        }
        if let Some(ceiling) = self.ceiling {
            let reserved = self.entries.fetch_add(1, Ordering::Relaxed);
            if reserved >= ceiling {
                self.entries.fetch_sub(1, Ordering::Relaxed);
                return Err(ShadowFull);
            }
        } else {
            self.entries.fetch_add(1, Ordering::Relaxed);
        }
        Ok(f(shard.entry(addr).or_default()))
    }

    /// Copy of the record for `addr`, if tracked.
    #[must_use]
    pub fn get(&self, addr: u64) -> Option<AccessRecord> {
        self.shard(addr).lock().get(&addr).cloned()
    }

    /// Forget every location in `[start, start + len)`. Returns the number
    /// of records dropped.
    pub fn remove_range(&self, start: u64, len: u64) -> usize {
        let end = start.saturating_add(len);
        let mut removed = 0;
        if len <= RANGE_SCAN_LIMIT {
            for addr in start..end {
                if self.shard(addr).lock().remove(&addr).is_some() {
                    removed += 1;
                }
            }
        } else {
            for shard in &*self.shards {
                let mut shard = shard.lock();
                let before = shard.len();
                shard.retain(|addr, _| !(start..end).contains(addr));
                removed += before - shard.len();
            }
        }
        self.entries.fetch_sub(removed, Ordering::Relaxed);
        if removed > 0 {
            debug!("dropped {removed} shadow records in [{start:#x}, {end:#x})");
        }
        removed
    }

    /// Number of tracked locations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use racetrack_clock::{Clock, ThreadNum};

    use super::*;

    fn access(thread: u32) -> Access {
        Access {
            epoch: Epoch::new(ThreadNum(thread), Clock(1)),
            thread: ThreadId(u64::from(thread)),
            pc: 0,
            size: 1,
            stack: StackSnapshot::default(),
        }
    }

    #[test]
    fn test_records_created_lazily() {
        let table = ShadowTable::new(4, None);
        assert!(table.is_empty());
        assert!(table.get(0x10).is_none());

        table
            .with_record(0x10, |r| r.write = Some(access(1)))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get(0x10).unwrap().write.is_some());

        // Second touch reuses the record.
        table.with_record(0x10, |r| assert!(r.write.is_some())).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_shard_count_rounded() {
        assert_eq!(ShadowTable::new(5, None).shard_count(), 8);
        assert_eq!(ShadowTable::new(0, None).shard_count(), 1);
    }

    #[test]
    fn test_ceiling() {
        let table = ShadowTable::new(2, Some(2));
        assert!(table.with_record(0x0, |_| ()).is_ok());
        assert!(table.with_record(0x100, |_| ()).is_ok());
        assert_eq!(table.with_record(0x200, |_| ()), Err(ShadowFull));
        // Existing locations stay usable.
        assert!(table.with_record(0x0, |_| ()).is_ok());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_range_small() {
        let table = ShadowTable::new(8, None);
        for addr in 0x1000..0x1010 {
            table.with_record(addr, |_| ()).unwrap();
        }
        assert_eq!(table.remove_range(0x1004, 8), 8);
        assert_eq!(table.len(), 8);
        assert!(table.get(0x1004).is_none());
        assert!(table.get(0x100c).is_some());
    }

    #[test]
    fn test_remove_range_large() {
        let table = ShadowTable::new(8, None);
        table.with_record(0x10, |_| ()).unwrap();
        table.with_record(0x2_0000, |_| ()).unwrap();
        table.with_record(0x9_0000, |_| ()).unwrap();
        assert_eq!(table.remove_range(0x0, 0x8_0000), 2);
        assert_eq!(table.len(), 1);
    }
}
