//! CPU operations used at the exec commit point
//!
//! Switching a process onto a new page directory must not be observed half
//! done by an interrupt, so the switch runs with interrupts disabled.
//! `SimCpu` is the hosted implementation the kernel tests run against.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use log::trace;

use crate::{defer, mm::PhysicalAddress};

pub trait Cpu {
    /// Disable interrupts, nesting with earlier calls
    fn push_cli(&self);

    /// Undo one `push_cli`; interrupts come back on at depth zero
    fn pop_cli(&self);

    /// Load `root` as the active user page directory
    fn switch_user_vm(&self, root: PhysicalAddress);

    /// Run `f` with interrupts disabled
    fn without_interrupts<R, F: FnOnce() -> R>(&self, f: F) -> R
    where
        Self: Sized,
    {
        self.push_cli();
        defer!(self.pop_cli());
        f()
    }
}

/// Software CPU that records what the hardware would have been told
pub struct SimCpu {
    active_root: AtomicU32,
    cli_depth: AtomicUsize,
    switches: AtomicUsize,
    switched_with_interrupts: AtomicBool,
}

impl SimCpu {
    pub const fn new() -> Self {
        Self {
            active_root: AtomicU32::new(0),
            cli_depth: AtomicUsize::new(0),
            switches: AtomicUsize::new(0),
            switched_with_interrupts: AtomicBool::new(false),
        }
    }

    /// Root most recently loaded by `switch_user_vm`
    pub fn active_root(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.active_root.load(Ordering::Acquire))
    }

    /// Number of `switch_user_vm` calls so far
    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::Acquire)
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.cli_depth.load(Ordering::Acquire) == 0
    }

    /// Whether any switch happened while interrupts were enabled
    pub fn switched_with_interrupts(&self) -> bool {
        self.switched_with_interrupts.load(Ordering::Acquire)
    }
}

impl Default for SimCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu for SimCpu {
    fn push_cli(&self) {
        self.cli_depth.fetch_add(1, Ordering::AcqRel);
    }

    fn pop_cli(&self) {
        let prev = self.cli_depth.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "pop_cli without push_cli");
    }

    fn switch_user_vm(&self, root: PhysicalAddress) {
        if self.interrupts_enabled() {
            self.switched_with_interrupts.store(true, Ordering::Release);
        }
        self.active_root.store(root.as_u32(), Ordering::Release);
        self.switches.fetch_add(1, Ordering::AcqRel);
        trace!("cpu: page directory {:#x} active", root);
    }
}
