use std::fmt;
use std::sync::Arc;

use crate::{Detector, LockId, Result, SyncId, ThreadId, ThreadState};

/// Reference to a thread registered with a [`Detector`].
///
/// Handles are cheap to clone and are only valid for the detector that
/// issued them.
#[derive(Clone)]
pub struct ThreadHandle {
    pub(crate) state: Arc<ThreadState>,
    pub(crate) session: u64,
}

impl ThreadHandle {
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.state.id()
    }

    /// Whether the thread has not been joined or exited yet.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Attach the handle to its detector so events can be sent through it.
    #[must_use]
    pub const fn bind(self, detector: &Detector) -> BoundThread<'_> {
        BoundThread {
            detector,
            handle: self,
        }
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("thread", &self.state.id())
            .field("num", &self.state.num())
            .field("session", &self.session)
            .finish()
    }
}

/// A thread handle paired with its detector.
///
/// Every method forwards to the [`Detector`] method of the same name.
#[derive(Clone, Debug)]
pub struct BoundThread<'a> {
    detector: &'a Detector,
    handle: ThreadHandle,
}

impl<'a> BoundThread<'a> {
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.handle.id()
    }

    #[must_use]
    pub const fn handle(&self) -> &ThreadHandle {
        &self.handle
    }

    /// Start a child thread of this one.
    ///
    /// # Errors
    /// See [`Detector::fork`].
    pub fn fork(&self, child: ThreadId) -> Result<BoundThread<'a>> {
        let handle = self.detector.fork(self.id(), child)?;
        Ok(handle.bind(self.detector))
    }

    /// Wait for `child` to finish.
    ///
    /// # Errors
    /// See [`Detector::join`].
    pub fn join(&self, child: ThreadId) -> Result<()> {
        self.detector.join(self.id(), child)
    }

    /// # Errors
    /// See [`Detector::exit`].
    pub fn exit(self) -> Result<()> {
        self.detector.exit(&self.handle)
    }

    /// # Errors
    /// See [`Detector::func_enter`].
    pub fn func_enter(&self, site: u64) -> Result<()> {
        self.detector.func_enter(&self.handle, site)
    }

    /// # Errors
    /// See [`Detector::func_exit`].
    pub fn func_exit(&self) -> Result<()> {
        self.detector.func_exit(&self.handle)
    }

    /// # Errors
    /// See [`Detector::read`].
    pub fn read(&self, addr: u64, pc: u64, size: usize) -> Result<()> {
        self.detector.read(&self.handle, addr, pc, size)
    }

    /// # Errors
    /// See [`Detector::write`].
    pub fn write(&self, addr: u64, pc: u64, size: usize) -> Result<()> {
        self.detector.write(&self.handle, addr, pc, size)
    }

    /// # Errors
    /// See [`Detector::acquire`].
    pub fn acquire(&self, lock: LockId) -> Result<()> {
        self.detector.acquire(&self.handle, lock)
    }

    /// # Errors
    /// See [`Detector::release`].
    pub fn release(&self, lock: LockId) -> Result<()> {
        self.detector.release(&self.handle, lock)
    }

    /// # Errors
    /// See [`Detector::happens_before`].
    pub fn happens_before(&self, sync: SyncId) -> Result<()> {
        self.detector.happens_before(&self.handle, sync)
    }

    /// # Errors
    /// See [`Detector::happens_after`].
    pub fn happens_after(&self, sync: SyncId) -> Result<()> {
        self.detector.happens_after(&self.handle, sync)
    }

    /// # Errors
    /// See [`Detector::allocate`].
    pub fn allocate(&self, addr: u64, size: usize) -> Result<()> {
        self.detector.allocate(&self.handle, addr, size)
    }

    /// # Errors
    /// See [`Detector::deallocate`].
    pub fn deallocate(&self, addr: u64) -> Result<()> {
        self.detector.deallocate(&self.handle, addr)
    }
}
