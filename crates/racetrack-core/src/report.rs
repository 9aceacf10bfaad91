use std::fmt;

use crate::{Access, RaceKind, ThreadId};

/// One side of a race.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessInfo {
    pub thread: ThreadId,
    pub write: bool,
    pub address: u64,
    pub size: usize,
    pub pc: u64,
    /// Call sites active at the time of the access, outermost first.
    pub stack: Vec<u64>,
}

impl AccessInfo {
    pub(crate) fn from_access(access: &Access, write: bool, address: u64) -> Self {
        Self {
            thread: access.thread,
            write,
            address,
            size: access.size,
            pc: access.pc,
            stack: access.stack.frames().to_vec(),
        }
    }

    /// Call stack followed by the access pc, outermost first.
    #[must_use]
    pub fn trace(&self) -> Vec<u64> {
        let mut trace = Vec::with_capacity(self.stack.len() + 1);
        trace.extend_from_slice(&self.stack);
        trace.push(self.pc);
        trace
    }

    const fn verb(&self) -> &'static str {
        if self.write { "write" } else { "read" }
    }
}

impl fmt::Display for AccessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of size {} at {:#x} by thread {} (pc {:#x})",
            self.verb(),
            self.size,
            self.address,
            self.thread,
            self.pc
        )
    }
}

/// Two conflicting, unordered accesses to the same location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaceReport {
    pub kind: RaceKind,
    /// Shadow location both accesses touched.
    pub address: u64,
    /// The earlier, recorded access.
    pub first: AccessInfo,
    /// The access that exposed the race.
    pub second: AccessInfo,
}

impl RaceReport {
    /// Threads involved, earlier access first.
    #[must_use]
    pub const fn threads(&self) -> (ThreadId, ThreadId) {
        (self.first.thread, self.second.thread)
    }
}

impl fmt::Display for RaceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} race on {:#x}", self.kind, self.address)?;
        for (label, info) in [("previous", &self.first), ("current", &self.second)] {
            writeln!(f, "  {label} {info}")?;
            for pc in info.trace().iter().rev() {
                writeln!(f, "    {pc:#018x}")?;
            }
        }
        Ok(())
    }
}
