//! Filesystem interface consumed by exec
//!
//! The loader needs only path lookup, positioned reads, inode locking, and
//! a transaction bracket around the whole access. Crash consistency of
//! those reads is the filesystem's business.

pub mod ramfs;

pub use ramfs::{RamFs, RamInode};

/// Filesystem operations used while loading an image
pub trait Filesystem {
    /// Referenced (but unlocked) inode handle
    type Inode;

    /// Open a filesystem transaction
    fn begin_transaction(&self);

    /// Close the transaction opened by `begin_transaction`
    fn end_transaction(&self);

    /// Resolve `path` to a referenced inode
    fn lookup(&self, path: &str) -> Option<Self::Inode>;

    /// Lock a referenced inode
    fn lock(&self, inode: &Self::Inode);

    /// Unlock and drop the reference taken by `lookup`
    fn unlock_put(&self, inode: Self::Inode);

    /// Read up to `buf.len()` bytes at `offset`; returns bytes read
    fn read_at(&self, inode: &Self::Inode, offset: u32, buf: &mut [u8]) -> usize;
}
