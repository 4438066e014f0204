//! RAII (Resource Acquisition Is Initialization) patterns for kernel resources
//!
//! Exec acquires frames, a half-built address space, an inode lock, and a
//! filesystem transaction, and any of its steps may fail. Each resource is
//! held by a guard that releases it on drop unless ownership is explicitly
//! taken back.

use log::debug;

use crate::{
    fs::Filesystem,
    mm::{AddressSpace, PhysMemory, PhysicalAddress},
};

/// RAII wrapper for a physical frame not yet linked into a page table
///
/// Returns the frame to the allocator when dropped.
pub struct FrameGuard<'a, M: PhysMemory + ?Sized> {
    frame: PhysicalAddress,
    mem: &'a M,
}

impl<'a, M: PhysMemory + ?Sized> FrameGuard<'a, M> {
    /// Create a new frame guard
    pub fn new(frame: PhysicalAddress, mem: &'a M) -> Self {
        Self { frame, mem }
    }

    /// Get the physical frame address
    pub fn addr(&self) -> PhysicalAddress {
        self.frame
    }

    /// Release ownership of the frame without deallocating
    pub fn leak(self) -> PhysicalAddress {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl<M: PhysMemory + ?Sized> Drop for FrameGuard<'_, M> {
    fn drop(&mut self) {
        self.mem.free_frame(self.frame);
    }
}

/// Rollback guard for an address space under construction
///
/// Only ever wraps a freshly allocated directory, never a process's active
/// one. Dropping it destroys the address space; `commit` hands it over.
pub struct PendingAddressSpace<'a, M: PhysMemory + ?Sized> {
    space: Option<AddressSpace>,
    mem: &'a M,
}

impl<'a, M: PhysMemory + ?Sized> PendingAddressSpace<'a, M> {
    /// Allocate an empty directory and guard it
    pub fn allocate(mem: &'a M) -> Result<Self, crate::error::VmError> {
        Ok(Self {
            space: Some(AddressSpace::new_empty(mem)?),
            mem,
        })
    }

    pub fn space(&self) -> &AddressSpace {
        // Only `commit` takes the space, and it consumes the guard.
        match &self.space {
            Some(space) => space,
            None => unreachable!("pending address space already committed"),
        }
    }

    /// Stop guarding and hand the address space to the caller
    pub fn commit(mut self) -> AddressSpace {
        match self.space.take() {
            Some(space) => space,
            None => unreachable!("pending address space already committed"),
        }
    }
}

impl<M: PhysMemory + ?Sized> Drop for PendingAddressSpace<'_, M> {
    fn drop(&mut self) {
        if let Some(space) = self.space.take() {
            debug!("exec: rolling back address space {:#x}", space.root());
            space.destroy(self.mem);
        }
    }
}

/// Open filesystem transaction, ended on drop
pub struct Transaction<'a, F: Filesystem + ?Sized> {
    fs: &'a F,
}

impl<'a, F: Filesystem + ?Sized> Transaction<'a, F> {
    pub fn begin(fs: &'a F) -> Self {
        fs.begin_transaction();
        Self { fs }
    }
}

impl<F: Filesystem + ?Sized> Drop for Transaction<'_, F> {
    fn drop(&mut self) {
        self.fs.end_transaction();
    }
}

/// Locked, referenced inode, unlocked and put on drop
pub struct LockedInode<'a, F: Filesystem + ?Sized> {
    inode: Option<F::Inode>,
    fs: &'a F,
}

impl<'a, F: Filesystem + ?Sized> LockedInode<'a, F> {
    /// Lock `inode`, taking over the reference returned by lookup
    pub fn lock(fs: &'a F, inode: F::Inode) -> Self {
        fs.lock(&inode);
        Self {
            inode: Some(inode),
            fs,
        }
    }

    /// Read exactly `buf.len()` bytes at `offset`
    ///
    /// Returns false on a short read.
    pub fn read_exact_at(&self, offset: u32, buf: &mut [u8]) -> bool {
        self.read_at(offset, buf) == buf.len()
    }

    /// Read up to `buf.len()` bytes at `offset`
    pub fn read_at(&self, offset: u32, buf: &mut [u8]) -> usize {
        match &self.inode {
            Some(inode) => self.fs.read_at(inode, offset, buf),
            None => 0,
        }
    }
}

impl<F: Filesystem + ?Sized> Drop for LockedInode<'_, F> {
    fn drop(&mut self) {
        if let Some(inode) = self.inode.take() {
            self.fs.unlock_put(inode);
        }
    }
}

/// Macro to create RAII scope guards
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

/// Generic scope guard that runs cleanup code on drop
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    /// Create a new scope guard
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Cancel the cleanup
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}
