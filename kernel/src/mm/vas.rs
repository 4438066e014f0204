//! Virtual Address Space management
//!
//! An `AddressSpace` owns one page directory and every user page table and
//! user page reachable from it. The directory slots at and above
//! `PDX(KERNBASE)` are shared with every other address space and point at the
//! kernel's own page tables, which an address space never frees.

use log::{debug, trace};

use super::{
    frame_allocator::{PhysMemory, FRAME_SIZE},
    page_table::{PageTableEntry, PteFlags, TableFrame},
    pdx, pg_addr, pg_round_down, pg_round_up, ptx, PhysicalAddress,
};
use crate::{
    config::{KERNBASE, NPDENTRIES, NPTENTRIES, PAGE_SIZE},
    error::VmError,
    raii::FrameGuard,
};

/// Directory flags for tables that hold user pages
const USER_TABLE: PteFlags = PteFlags::PRESENT
    .union(PteFlags::WRITABLE)
    .union(PteFlags::USER);

/// Directory flags for the shared kernel tables
const KERNEL_TABLE: PteFlags = PteFlags::PRESENT.union(PteFlags::WRITABLE);

/// First directory index of the kernel half
pub const KERNEL_PDX: usize = pdx(KERNBASE);

/// Location of one leaf entry
#[derive(Debug, Clone, Copy)]
pub struct PteSlot {
    table: TableFrame,
    index: usize,
}

impl PteSlot {
    pub fn get<M: PhysMemory + ?Sized>(&self, mem: &M) -> PageTableEntry {
        self.table.get(mem, self.index)
    }

    pub fn set<M: PhysMemory + ?Sized>(&self, mem: &M, entry: PageTableEntry) {
        self.table.set(mem, self.index, entry);
    }

    pub fn clear<M: PhysMemory + ?Sized>(&self, mem: &M) {
        self.table.clear(mem, self.index);
    }
}

/// A user address space: one page directory plus the user tables and pages
/// hanging off it
///
/// Not `Clone`: exactly one owner may destroy it.
#[must_use = "an address space leaks its frames unless destroyed"]
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    dir: TableFrame,
}

impl AddressSpace {
    /// Allocate a zeroed page directory with no mappings at all
    pub fn new_empty<M: PhysMemory + ?Sized>(mem: &M) -> Result<Self, VmError> {
        let frame = mem.alloc_zeroed_frame().ok_or(VmError::OutOfMemory)?;
        Ok(Self {
            dir: TableFrame::at(frame),
        })
    }

    /// Physical address of the page directory, as loaded into the MMU
    pub fn root(&self) -> PhysicalAddress {
        self.dir.base()
    }

    /// Read directory entry `index`
    pub fn pde<M: PhysMemory + ?Sized>(&self, mem: &M, index: usize) -> PageTableEntry {
        self.dir.get(mem, index)
    }

    /// Point the kernel half of this directory at the kernel tables used by
    /// `from`
    ///
    /// Only present slots are copied, and each is forced to present+writable
    /// without the user bit.
    pub fn share_kernel_half<M: PhysMemory + ?Sized>(&self, mem: &M, from: &AddressSpace) {
        let mut shared = 0;
        for index in KERNEL_PDX..NPDENTRIES {
            let entry = from.pde(mem, index);
            if entry.is_present() {
                self.dir.set(mem, index, entry.with_flags(KERNEL_TABLE));
                shared += 1;
            }
        }
        trace!("vas {:#x}: shared {} kernel tables", self.root(), shared);
    }

    /// Check that the kernel half matches `kernel` slot for slot and is not
    /// user accessible
    pub fn kernel_half_matches<M: PhysMemory + ?Sized>(&self, mem: &M, kernel: &AddressSpace) -> bool {
        (KERNEL_PDX..NPDENTRIES).all(|index| {
            let ours = self.pde(mem, index);
            let theirs = kernel.pde(mem, index);
            if theirs.is_present() {
                ours.addr() == theirs.addr() && ours.flags() == KERNEL_TABLE
            } else {
                !ours.is_present()
            }
        })
    }

    /// Make sure directory slot `index` is backed by a zeroed page table
    pub fn ensure_table<M: PhysMemory + ?Sized>(
        &self,
        mem: &M,
        index: usize,
    ) -> Result<TableFrame, VmError> {
        self.ensure_table_with(mem, index, USER_TABLE)
    }

    fn ensure_table_with<M: PhysMemory + ?Sized>(
        &self,
        mem: &M,
        index: usize,
        flags: PteFlags,
    ) -> Result<TableFrame, VmError> {
        let pde = self.dir.get(mem, index);
        if pde.is_present() {
            return Ok(TableFrame::at(pde.addr()));
        }

        let frame = mem.alloc_zeroed_frame().ok_or(VmError::OutOfMemory)?;
        self.dir.set(mem, index, PageTableEntry::new(frame, flags));
        trace!("vas {:#x}: table {} at {:#x}", self.root(), index, frame);
        Ok(TableFrame::at(frame))
    }

    /// Find the leaf entry for `va` without allocating
    pub fn lookup<M: PhysMemory + ?Sized>(&self, mem: &M, va: u32) -> Option<PteSlot> {
        let pde = self.dir.get(mem, pdx(va));
        if !pde.is_present() {
            return None;
        }
        Some(PteSlot {
            table: TableFrame::at(pde.addr()),
            index: ptx(va),
        })
    }

    /// Map `[va, va + size)` to consecutive frames starting at `pa`
    pub fn map_pages<M: PhysMemory + ?Sized>(
        &self,
        mem: &M,
        va: u32,
        size: u32,
        pa: PhysicalAddress,
        perm: PteFlags,
    ) -> Result<(), VmError> {
        self.map_range(mem, va, size, pa, perm, USER_TABLE)
    }

    fn map_range<M: PhysMemory + ?Sized>(
        &self,
        mem: &M,
        va: u32,
        size: u32,
        mut pa: PhysicalAddress,
        perm: PteFlags,
        table_flags: PteFlags,
    ) -> Result<(), VmError> {
        if size == 0 {
            return Ok(());
        }
        let mut a = pg_round_down(va);
        let last = pg_round_down(va.wrapping_add(size - 1));
        loop {
            let table = self.ensure_table_with(mem, pdx(a), table_flags)?;
            let index = ptx(a);
            if table.get(mem, index).is_present() {
                return Err(VmError::Remap { addr: a });
            }
            table.set(mem, index, PageTableEntry::new(pa, perm | PteFlags::PRESENT));
            if a == last {
                break;
            }
            a += PAGE_SIZE;
            pa = pa.offset(PAGE_SIZE);
        }
        Ok(())
    }

    /// Grow the user image from `old_size` to `new_size` with zeroed,
    /// writable user pages
    ///
    /// Returns the new size. On failure every page added by this call is
    /// freed again; page tables it created stay attached to the directory.
    pub fn alloc_uvm<M: PhysMemory + ?Sized>(
        &self,
        mem: &M,
        old_size: u32,
        new_size: u32,
    ) -> Result<u32, VmError> {
        if new_size > KERNBASE {
            return Err(VmError::OutOfMemory);
        }
        if new_size < old_size {
            return Ok(old_size);
        }

        let mut a = pg_round_up(old_size);
        while a < new_size {
            let Some(frame) = mem.alloc_zeroed_frame() else {
                debug!("alloc_uvm: out of memory at {:#x}", a);
                self.dealloc_uvm(mem, new_size, old_size);
                return Err(VmError::OutOfMemory);
            };
            let frame = FrameGuard::new(frame, mem);
            if let Err(err) = self.map_pages(
                mem,
                a,
                PAGE_SIZE,
                frame.addr(),
                PteFlags::WRITABLE | PteFlags::USER,
            ) {
                drop(frame);
                self.dealloc_uvm(mem, new_size, old_size);
                return Err(err);
            }
            frame.leak();
            a += PAGE_SIZE;
        }
        Ok(new_size)
    }

    /// Shrink the user image from `old_size` to `new_size`, freeing pages
    ///
    /// Returns the new size.
    pub fn dealloc_uvm<M: PhysMemory + ?Sized>(&self, mem: &M, old_size: u32, new_size: u32) -> u32 {
        if new_size >= old_size {
            return old_size;
        }

        let mut a = pg_round_up(new_size);
        while a < old_size {
            match self.lookup(mem, a) {
                None => a = pg_addr(pdx(a) + 1, 0, 0),
                Some(slot) => {
                    let entry = slot.get(mem);
                    if entry.is_present() {
                        mem.free_frame(entry.addr());
                        slot.clear(mem);
                    }
                    a += PAGE_SIZE;
                }
            }
        }
        new_size
    }

    /// Clear the user bit on the page holding `va`
    ///
    /// Used for the guard page below the user stack.
    pub fn clear_pte_user<M: PhysMemory + ?Sized>(&self, mem: &M, va: u32) -> Result<(), VmError> {
        let slot = self.lookup(mem, va).ok_or(VmError::Fault { addr: va })?;
        let entry = slot.get(mem);
        if !entry.is_present() {
            return Err(VmError::Fault { addr: va });
        }
        slot.set(mem, entry.with_flags(entry.flags() - PteFlags::USER));
        Ok(())
    }

    /// Translate a user virtual address to the frame backing its page
    ///
    /// `None` unless the page is present and user accessible, which is
    /// exactly the check the MMU applies to a user-mode access.
    pub fn user_to_kernel<M: PhysMemory + ?Sized>(&self, mem: &M, va: u32) -> Option<PhysicalAddress> {
        let entry = self.lookup(mem, va)?.get(mem);
        if !entry.is_present() || !entry.is_user() {
            return None;
        }
        Some(entry.addr())
    }

    /// Copy `data` into user memory at `va`
    ///
    /// Works on address spaces that are not active. Every touched page must
    /// be present and user accessible.
    pub fn copy_out<M: PhysMemory + ?Sized>(&self, mem: &M, va: u32, data: &[u8]) -> Result<(), VmError> {
        let mut va = va;
        let mut rest = data;
        while !rest.is_empty() {
            let va0 = pg_round_down(va);
            let pa0 = self
                .user_to_kernel(mem, va0)
                .ok_or(VmError::Fault { addr: va })?;
            let offset = va - va0;
            let n = rest.len().min((PAGE_SIZE - offset) as usize);
            mem.write(pa0.offset(offset), &rest[..n]);
            rest = &rest[n..];
            va = va0.checked_add(PAGE_SIZE).ok_or(VmError::Fault { addr: va0 })?;
        }
        Ok(())
    }

    /// Copy user memory at `va` into `buf`
    pub fn copy_in<M: PhysMemory + ?Sized>(&self, mem: &M, va: u32, buf: &mut [u8]) -> Result<(), VmError> {
        let mut va = va;
        let mut done = 0;
        while done < buf.len() {
            let va0 = pg_round_down(va);
            let pa0 = self
                .user_to_kernel(mem, va0)
                .ok_or(VmError::Fault { addr: va })?;
            let offset = va - va0;
            let n = (buf.len() - done).min((PAGE_SIZE - offset) as usize);
            mem.read(pa0.offset(offset), &mut buf[done..done + n]);
            done += n;
            va = va0.checked_add(PAGE_SIZE).ok_or(VmError::Fault { addr: va0 })?;
        }
        Ok(())
    }

    /// Read a little-endian word from user memory
    pub fn read_user_u32<M: PhysMemory + ?Sized>(&self, mem: &M, va: u32) -> Result<u32, VmError> {
        let mut word = [0u8; 4];
        self.copy_in(mem, va, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Fill already-mapped pages at page-aligned `va` with `size` bytes of
    /// file content starting at `offset`
    ///
    /// `read` returns how many bytes it produced; fewer than requested is a
    /// short read.
    pub fn load_uvm<M, R>(
        &self,
        mem: &M,
        va: u32,
        offset: u32,
        size: u32,
        mut read: R,
    ) -> Result<(), VmError>
    where
        M: PhysMemory + ?Sized,
        R: FnMut(u32, &mut [u8]) -> usize,
    {
        debug_assert_eq!(va % PAGE_SIZE, 0, "load_uvm: va must be page aligned");

        let mut buf = [0u8; FRAME_SIZE];
        let mut i = 0;
        while i < size {
            let entry = self
                .lookup(mem, va + i)
                .map(|slot| slot.get(mem))
                .filter(PageTableEntry::is_present)
                .ok_or(VmError::Fault { addr: va + i })?;
            let n = (size - i).min(PAGE_SIZE) as usize;
            if read(offset + i, &mut buf[..n]) != n {
                return Err(VmError::ShortRead { offset: offset + i });
            }
            mem.write(entry.addr(), &buf[..n]);
            i += PAGE_SIZE;
        }
        Ok(())
    }

    /// Load the first process's code into a fresh page at address 0
    ///
    /// Code longer than a page would run into the unmapped page above it and
    /// is reported as a fault there, before anything is allocated.
    pub fn init_uvm<M: PhysMemory + ?Sized>(&self, mem: &M, code: &[u8]) -> Result<(), VmError> {
        if code.len() > FRAME_SIZE {
            return Err(VmError::Fault { addr: PAGE_SIZE });
        }
        let frame = FrameGuard::new(
            mem.alloc_zeroed_frame().ok_or(VmError::OutOfMemory)?,
            mem,
        );
        self.map_pages(mem, 0, PAGE_SIZE, frame.addr(), PteFlags::WRITABLE | PteFlags::USER)?;
        mem.write(frame.leak(), code);
        Ok(())
    }

    /// Free every user page, every user page table, and the directory
    ///
    /// Kernel tables in the upper half are shared and left alone.
    pub fn destroy<M: PhysMemory + ?Sized>(self, mem: &M) {
        let root = self.root();
        let mut freed = 0usize;
        for index in 0..KERNEL_PDX {
            let pde = self.dir.get(mem, index);
            if !pde.is_present() {
                continue;
            }
            let table = TableFrame::at(pde.addr());
            for slot in 0..NPTENTRIES {
                let pte = table.get(mem, slot);
                if pte.is_present() {
                    mem.free_frame(pte.addr());
                    freed += 1;
                }
            }
            mem.free_frame(table.base());
            freed += 1;
        }
        mem.free_frame(root);
        freed += 1;
        debug!("vas {:#x}: destroyed, {} frames freed", root, freed);
    }
}

/// The kernel's own page directory
///
/// Built once at boot. Its upper-half tables are what every user address
/// space shares.
#[derive(Debug)]
pub struct KernelMappings {
    space: AddressSpace,
}

impl KernelMappings {
    /// Map physical memory `[0, phys_top)` at `KERNBASE`, kernel only
    pub fn new<M: PhysMemory + ?Sized>(mem: &M, phys_top: PhysicalAddress) -> Result<Self, VmError> {
        let space = AddressSpace::new_empty(mem)?;
        let size = pg_round_up(phys_top.as_u32());
        if let Err(err) = space.map_range(
            mem,
            KERNBASE,
            size,
            PhysicalAddress::new(0),
            PteFlags::WRITABLE,
            KERNEL_TABLE,
        ) {
            Self { space }.destroy(mem);
            return Err(err);
        }
        debug!(
            "kernel mappings: {:#x} bytes at {:#x}, root {:#x}",
            size,
            KERNBASE,
            space.root()
        );
        Ok(Self { space })
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn root(&self) -> PhysicalAddress {
        self.space.root()
    }

    /// Fresh user address space sharing the kernel half
    pub fn new_user_space<M: PhysMemory + ?Sized>(&self, mem: &M) -> Result<AddressSpace, VmError> {
        let space = AddressSpace::new_empty(mem)?;
        space.share_kernel_half(mem, &self.space);
        Ok(space)
    }

    /// Tear down the kernel tables and directory
    pub fn destroy<M: PhysMemory + ?Sized>(self, mem: &M) {
        let dir = self.space.dir;
        for index in KERNEL_PDX..NPDENTRIES {
            let pde = dir.get(mem, index);
            if pde.is_present() {
                mem.free_frame(pde.addr());
            }
        }
        mem.free_frame(dir.base());
    }
}
