//! Page table structures for two-level paging
//!
//! Directory entries and leaf entries share one encoding: the 20-bit frame
//! number in the high bits and the permission bits in the low twelve. Kernel
//! and user mappings differ only in `USER`.

use bitflags::bitflags;

use super::{frame_allocator::PhysMemory, PhysicalAddress};
use crate::config::NPTENTRIES;

bitflags! {
    /// Permission bits carried by every directory and leaf entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
    }
}

const ADDR_MASK: u32 = !0xFFF;
const FLAGS_MASK: u32 = 0xFFF;

/// One 32-bit directory or leaf entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    /// Create an empty/unused entry
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Entry pointing at `addr` with `flags`
    pub fn new(addr: PhysicalAddress, flags: PteFlags) -> Self {
        Self((addr.as_u32() & ADDR_MASK) | flags.bits())
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    pub fn is_user(&self) -> bool {
        self.flags().contains(PteFlags::USER)
    }

    /// Frame this entry points to
    pub const fn addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 & ADDR_MASK)
    }

    /// Get flags for this entry. Unknown bits are dropped.
    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & FLAGS_MASK)
    }

    /// Same frame, new flags
    pub fn with_flags(&self, flags: PteFlags) -> Self {
        Self::new(self.addr(), flags)
    }
}

/// A page directory or page table living in one physical frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFrame {
    base: PhysicalAddress,
}

impl TableFrame {
    pub const fn at(base: PhysicalAddress) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Physical address of entry `index`
    pub fn entry_addr(&self, index: usize) -> PhysicalAddress {
        assert!(index < NPTENTRIES, "page table index out of bounds");
        self.base.offset((index * 4) as u32)
    }

    pub fn get<M: PhysMemory + ?Sized>(&self, mem: &M, index: usize) -> PageTableEntry {
        PageTableEntry::from_raw(mem.read_u32(self.entry_addr(index)))
    }

    pub fn set<M: PhysMemory + ?Sized>(&self, mem: &M, index: usize, entry: PageTableEntry) {
        mem.write_u32(self.entry_addr(index), entry.raw());
    }

    /// Clear this entry
    pub fn clear<M: PhysMemory + ?Sized>(&self, mem: &M, index: usize) {
        self.set(mem, index, PageTableEntry::empty());
    }
}
