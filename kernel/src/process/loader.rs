//! User program loader
//!
//! `ImageLoader::load_image` replaces a process's image with an executable
//! read from the filesystem. It runs four stages in order:
//!
//! 1. read and validate the ELF header and program headers;
//! 2. build a new page directory sharing the kernel half, with page tables
//!    spanning every loadable segment;
//! 3. add a guard page and a stack page and lay out the arguments;
//! 4. commit: rename the process, point its registers at the new image,
//!    switch directories with interrupts off, then free the old image.
//!
//! A failure in stages 1-3 drops the half-built address space, which frees
//! every frame it holds. The process's own address space is not touched
//! until stage 4.

use log::{debug, warn};

use super::{
    pcb::Process,
    stack::{build_user_stack, UserStack},
};
use crate::{
    arch::Cpu,
    elf::{self, ImageLayout, LoadSegment},
    error::{ExecError, ExecResult},
    fs::Filesystem,
    mm::{pdx, AddressSpace, PhysMemory},
    raii::{LockedInode, PendingAddressSpace, Transaction},
};

/// How segment contents reach the new address space
///
/// Stage 2 only builds page-table structure. A populator decides whether the
/// segment's bytes are copied in while the executable is still open.
pub trait SegmentPopulator {
    /// Populate `segment` in `space`, whose pages are mapped up to `mapped`
    ///
    /// Returns the new mapped extent.
    fn populate<M, F>(
        &self,
        mem: &M,
        space: &AddressSpace,
        file: &LockedInode<'_, F>,
        segment: &LoadSegment,
        mapped: u32,
    ) -> ExecResult<u32>
    where
        M: PhysMemory + ?Sized,
        F: Filesystem + ?Sized;
}

/// Leave segment pages unpopulated
#[derive(Debug, Clone, Copy, Default)]
pub struct Deferred;

impl SegmentPopulator for Deferred {
    fn populate<M, F>(
        &self,
        _mem: &M,
        _space: &AddressSpace,
        _file: &LockedInode<'_, F>,
        _segment: &LoadSegment,
        mapped: u32,
    ) -> ExecResult<u32>
    where
        M: PhysMemory + ?Sized,
        F: Filesystem + ?Sized,
    {
        Ok(mapped)
    }
}

/// Map every segment and copy its file bytes in; the rest stays zeroed
#[derive(Debug, Clone, Copy, Default)]
pub struct Eager;

impl SegmentPopulator for Eager {
    fn populate<M, F>(
        &self,
        mem: &M,
        space: &AddressSpace,
        file: &LockedInode<'_, F>,
        segment: &LoadSegment,
        mapped: u32,
    ) -> ExecResult<u32>
    where
        M: PhysMemory + ?Sized,
        F: Filesystem + ?Sized,
    {
        let mapped = space.alloc_uvm(mem, mapped, segment.end())?;
        space.load_uvm(
            mem,
            segment.vaddr,
            segment.file_offset,
            segment.file_size,
            |offset, buf| file.read_at(offset, buf),
        )?;
        Ok(mapped)
    }
}

/// Loads executables into processes
///
/// Borrows the collaborators it needs: physical memory, the filesystem
/// holding executables, and the CPU whose page-directory register is
/// reloaded on commit.
pub struct ImageLoader<'a, M: ?Sized, F: ?Sized, C, P = Deferred> {
    mem: &'a M,
    fs: &'a F,
    cpu: &'a C,
    populator: P,
}

impl<'a, M, F, C> ImageLoader<'a, M, F, C, Deferred>
where
    M: PhysMemory + ?Sized,
    F: Filesystem + ?Sized,
    C: Cpu,
{
    pub fn new(mem: &'a M, fs: &'a F, cpu: &'a C) -> Self {
        Self {
            mem,
            fs,
            cpu,
            populator: Deferred,
        }
    }
}

impl<'a, M, F, C, P> ImageLoader<'a, M, F, C, P>
where
    M: PhysMemory + ?Sized,
    F: Filesystem + ?Sized,
    C: Cpu,
    P: SegmentPopulator,
{
    /// Use `populator` for segment contents
    pub fn with_populator<Q: SegmentPopulator>(self, populator: Q) -> ImageLoader<'a, M, F, C, Q> {
        ImageLoader {
            mem: self.mem,
            fs: self.fs,
            cpu: self.cpu,
            populator,
        }
    }

    /// Replace `process`'s image with the executable at `path`
    ///
    /// On success the process resumes at the executable's entry point with
    /// `args` on its stack the next time it returns to user mode. On error
    /// the process is unchanged.
    pub fn load_image<S: AsRef<str>>(
        &self,
        process: &mut Process,
        path: &str,
        args: &[S],
    ) -> ExecResult<()> {
        debug!("exec: pid {} loading {} ({} args)", process.pid, path, args.len());

        let (layout, pending) = {
            let _op = Transaction::begin(self.fs);
            let Some(inode) = self.fs.lookup(path) else {
                warn!(target: "console", "exec: fail");
                return Err(ExecError::PathNotFound);
            };
            let file = LockedInode::lock(self.fs, inode);

            let layout = elf::read_image(&file)?;
            let pending = self.build_address_space(process.address_space(), &layout)?;
            self.populate_segments(pending.space(), &file, &layout)?;
            (layout, pending)
        };

        let stack = build_user_stack(self.mem, pending.space(), layout.image_size, args)?;
        self.commit(process, path, &layout, &stack, pending.commit());
        Ok(())
    }

    /// Stage 2: a fresh directory sharing the kernel half of `current`, with
    /// page tables for every directory slot from 0 through each segment's
    /// last byte
    fn build_address_space(
        &self,
        current: &AddressSpace,
        layout: &ImageLayout,
    ) -> ExecResult<PendingAddressSpace<'a, M>> {
        let pending = PendingAddressSpace::allocate(self.mem)?;
        let space = pending.space();
        space.share_kernel_half(self.mem, current);

        for segment in &layout.segments {
            for index in 0..=pdx(segment.last_byte()) {
                space.ensure_table(self.mem, index)?;
            }
        }
        Ok(pending)
    }

    fn populate_segments(
        &self,
        space: &AddressSpace,
        file: &LockedInode<'_, F>,
        layout: &ImageLayout,
    ) -> ExecResult<u32> {
        layout.segments.iter().try_fold(0, |mapped, segment| {
            self.populator
                .populate(self.mem, space, file, segment, mapped)
        })
    }

    /// Stage 4: point `process` at the new image and retire the old one
    fn commit(
        &self,
        process: &mut Process,
        path: &str,
        layout: &ImageLayout,
        stack: &UserStack,
        space: AddressSpace,
    ) {
        process.set_debug_names(path);
        process.size = stack.top;
        process.text_end = layout.text_end;
        process.data_end = layout.data_end;
        process.trap_frame.eip = layout.entry;
        process.trap_frame.esp = stack.sp;

        let old = self.cpu.without_interrupts(|| {
            let old = process.replace_address_space(space);
            self.cpu.switch_user_vm(process.address_space().root());
            old
        });
        debug!(
            "exec: pid {} now {} at {:#x}, old image {:#x} freed",
            process.pid,
            process.name(),
            layout.entry,
            old.root()
        );
        old.destroy(self.mem);
    }
}
