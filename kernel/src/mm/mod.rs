//! Memory management
//!
//! Physical frames, two-level page tables, and user address spaces.

pub mod frame_allocator;
pub mod page_table;
pub mod vas;

pub use frame_allocator::{FramePool, PhysMemory};
pub use page_table::{PageTableEntry, PteFlags};
pub use vas::{AddressSpace, KernelMappings};

use crate::config::{PAGE_SIZE, PDX_SHIFT, PTX_SHIFT};

/// Physical memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(pub u32);

impl PhysicalAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub const fn offset(&self, offset: u32) -> Self {
        Self(self.0 + offset)
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE == 0
    }
}

impl core::fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Page-directory index of a virtual address
pub const fn pdx(va: u32) -> usize {
    ((va >> PDX_SHIFT) & 0x3FF) as usize
}

/// Page-table index of a virtual address
pub const fn ptx(va: u32) -> usize {
    ((va >> PTX_SHIFT) & 0x3FF) as usize
}

/// Build a virtual address from directory index, table index, and offset
pub const fn pg_addr(d: usize, t: usize, offset: u32) -> u32 {
    ((d as u32) << PDX_SHIFT) | ((t as u32) << PTX_SHIFT) | offset
}

/// Round up to a page boundary, saturating at the last page of the space
pub const fn pg_round_up(addr: u32) -> u32 {
    match addr.checked_add(PAGE_SIZE - 1) {
        Some(a) => a & !(PAGE_SIZE - 1),
        None => u32::MAX & !(PAGE_SIZE - 1),
    }
}

/// Round down to a page boundary
pub const fn pg_round_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE - 1)
}
