//! RAM Filesystem Implementation
//!
//! A flat in-memory filesystem used to boot the first programs and to test
//! exec. It counts open transactions, live references, and held locks so
//! callers can check that nothing was leaked.

use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::RwLock;

use super::Filesystem;

/// Referenced file in a [`RamFs`]
#[derive(Debug)]
pub struct RamInode {
    data: Arc<Vec<u8>>,
}

/// In-memory filesystem keyed by absolute path
pub struct RamFs {
    files: RwLock<BTreeMap<String, Arc<Vec<u8>>>>,
    transactions: AtomicUsize,
    references: AtomicUsize,
    locked: AtomicUsize,
}

impl RamFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            transactions: AtomicUsize::new(0),
            references: AtomicUsize::new(0),
            locked: AtomicUsize::new(0),
        }
    }

    /// Create or replace the file at `path`
    ///
    /// Inodes already looked up keep reading the old contents.
    pub fn insert(&self, path: &str, data: Vec<u8>) {
        self.files.write().insert(normalize(path), Arc::new(data));
    }

    /// Transactions begun but not yet ended
    pub fn open_transactions(&self) -> usize {
        self.transactions.load(Ordering::Acquire)
    }

    /// Inode references handed out by `lookup` and not yet put
    pub fn live_references(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    /// Inodes currently locked
    pub fn held_locks(&self) -> usize {
        self.locked.load(Ordering::Acquire)
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip repeated and trailing slashes and anchor at the root
fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for component in path.split('/').filter(|c| !c.is_empty()) {
        out.push('/');
        out.push_str(component);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

impl Filesystem for RamFs {
    type Inode = RamInode;

    fn begin_transaction(&self) {
        self.transactions.fetch_add(1, Ordering::AcqRel);
    }

    fn end_transaction(&self) {
        let prev = self.transactions.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "end_transaction without begin");
    }

    fn lookup(&self, path: &str) -> Option<RamInode> {
        let files = self.files.read();
        let data = files.get(&normalize(path))?;
        self.references.fetch_add(1, Ordering::AcqRel);
        Some(RamInode {
            data: Arc::clone(data),
        })
    }

    fn lock(&self, _inode: &RamInode) {
        self.locked.fetch_add(1, Ordering::AcqRel);
    }

    fn unlock_put(&self, _inode: RamInode) {
        let prev = self.locked.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "unlock_put of unlocked inode");
        self.references.fetch_sub(1, Ordering::AcqRel);
    }

    fn read_at(&self, inode: &RamInode, offset: u32, buf: &mut [u8]) -> usize {
        let data = &inode.data;
        let offset = offset as usize;
        if offset >= data.len() {
            return 0;
        }

        let n = core::cmp::min(buf.len(), data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }
}
