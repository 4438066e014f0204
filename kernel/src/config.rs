//! Kernel parameters shared by the loader and the paging code
//!
//! The machine model is 32-bit two-level paging: a 1024-entry page directory
//! whose entries point at 1024-entry page tables of 4 KiB pages.

/// Size of a page and of a physical frame
pub const PAGE_SIZE: u32 = 4096;

/// Entries per page directory
pub const NPDENTRIES: usize = 1024;

/// Entries per page table
pub const NPTENTRIES: usize = 1024;

/// Shift of the page-directory index within a virtual address
pub const PDX_SHIFT: u32 = 22;

/// Shift of the page-table index within a virtual address
pub const PTX_SHIFT: u32 = 12;

/// First kernel virtual address. User images live strictly below it.
pub const KERNBASE: u32 = 0x8000_0000;

/// Maximum number of exec arguments
pub const MAXARG: usize = 32;

/// Capacity of the short process name, terminator included
pub const PROC_NAME_LEN: usize = 16;

/// Capacity of the full executable path, terminator included
pub const PROC_FILENAME_LEN: usize = 64;

/// Fake return address pushed below `argc`
pub const STACK_SENTINEL: u32 = 0xFFFF_FFFF;

/// Pages added above the image: one guard page plus one usable stack page
pub const USER_STACK_PAGES: u32 = 2;

/// Bytes per word on the user stack
pub const WORD_SIZE: u32 = 4;
