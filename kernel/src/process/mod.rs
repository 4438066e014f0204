//! Process management module
//!
//! The process control block plus exec: the loader that replaces a
//! process's image and the builder for the initial user stack.

pub mod loader;
pub mod pcb;
pub mod stack;

pub use loader::{Deferred, Eager, ImageLoader, SegmentPopulator};
pub use pcb::{safe_strcpy, Process, ProcessId, TrapFrame};
pub use stack::{build_user_stack, UserStack};
