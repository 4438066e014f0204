//! exec-loader: the process-image loader of a small Unix-like kernel
//!
//! Given an executable on disk and an argument vector, [`ImageLoader`]
//! builds a new two-level address space for the calling process, lays out
//! its user stack, and switches the process onto it, or leaves the process
//! exactly as it was.
//!
//! The collaborators exec leans on are traits with in-tree implementations:
//! [`mm::PhysMemory`] ([`mm::FramePool`]), [`fs::Filesystem`]
//! ([`fs::RamFs`]), and [`arch::Cpu`] ([`arch::SimCpu`]).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod elf;
pub mod error;
pub mod fs;
pub mod mm;
pub mod process;
pub mod raii;

pub use error::{ExecError, ExecResult, VmError};
pub use process::{ImageLoader, Process, ProcessId};
