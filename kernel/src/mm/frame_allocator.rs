//! Physical frame allocator
//!
//! `PhysMemory` is the contract the paging code needs from physical memory:
//! hand out and take back 4 KiB frames, and read or write bytes inside a
//! frame. `FramePool` implements it over a flat byte array with a LIFO free
//! list, which is what the kernel boots with and what the tests drive.

use alloc::{vec, vec::Vec};

use spin::Mutex;

use super::PhysicalAddress;
use crate::config::PAGE_SIZE;

/// Size of a physical frame in bytes
pub const FRAME_SIZE: usize = PAGE_SIZE as usize;

/// Byte written over freed frames so stale references read garbage
const JUNK_BYTE: u8 = 0x01;

/// Physical memory as seen by the paging layer
///
/// Accesses never cross a frame boundary; callers split larger copies.
pub trait PhysMemory {
    /// Allocate one frame. Contents are unspecified.
    fn alloc_frame(&self) -> Option<PhysicalAddress>;

    /// Return a frame obtained from `alloc_frame`
    fn free_frame(&self, frame: PhysicalAddress);

    /// Copy bytes out of physical memory
    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]);

    /// Copy bytes into physical memory
    fn write(&self, addr: PhysicalAddress, data: &[u8]);

    /// Fill `len` bytes starting at `addr` with `byte`
    fn fill(&self, addr: PhysicalAddress, byte: u8, len: usize);

    /// Allocate a frame and zero it
    fn alloc_zeroed_frame(&self) -> Option<PhysicalAddress> {
        let frame = self.alloc_frame()?;
        self.fill(frame, 0, FRAME_SIZE);
        Some(frame)
    }

    fn read_u32(&self, addr: PhysicalAddress) -> u32 {
        let mut word = [0u8; 4];
        self.read(addr, &mut word);
        u32::from_le_bytes(word)
    }

    fn write_u32(&self, addr: PhysicalAddress, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }
}

struct PoolInner {
    /// Backing store, frame `n` lives at `n * FRAME_SIZE`
    memory: Vec<u8>,
    /// Free frame numbers, most recently freed last
    free: Vec<u32>,
    /// Allocation state per frame number
    allocated: Vec<bool>,
    /// Remaining allocations before the pool reports exhaustion
    budget: Option<usize>,
}

/// Pool of simulated physical frames
///
/// Frame 0 is reserved so that a zero physical address never names a live
/// frame.
pub struct FramePool {
    inner: Mutex<PoolInner>,
    total: usize,
}

impl FramePool {
    /// Create a pool with `frames` allocatable frames
    pub fn new(frames: usize) -> Self {
        let count = frames + 1;
        // Hand out low frames first.
        let free = (1..count as u32).rev().collect();
        let mut allocated = vec![false; count];
        allocated[0] = true;

        Self {
            inner: Mutex::new(PoolInner {
                memory: vec![JUNK_BYTE; count * FRAME_SIZE],
                free,
                allocated,
                budget: None,
            }),
            total: frames,
        }
    }

    /// Number of frames currently free
    pub fn free_frames(&self) -> usize {
        let inner = self.inner.lock();
        match inner.budget {
            Some(budget) => budget.min(inner.free.len()),
            None => inner.free.len(),
        }
    }

    /// End of physical memory
    pub fn phys_top(&self) -> PhysicalAddress {
        PhysicalAddress::new(((self.total + 1) * FRAME_SIZE) as u32)
    }

    /// Let only `allocations` more allocations succeed
    ///
    /// Frames freed afterwards do not raise the budget again.
    pub fn limit_allocations(&self, allocations: usize) {
        self.inner.lock().budget = Some(allocations);
    }

    /// Remove any allocation limit
    pub fn clear_limit(&self) {
        self.inner.lock().budget = None;
    }

    /// Whether `frame` is currently handed out
    pub fn is_allocated(&self, frame: PhysicalAddress) -> bool {
        let inner = self.inner.lock();
        let index = frame.as_usize() / FRAME_SIZE;
        inner.allocated.get(index).copied().unwrap_or(false)
    }
}

impl PhysMemory for FramePool {
    fn alloc_frame(&self) -> Option<PhysicalAddress> {
        let mut inner = self.inner.lock();
        if let Some(budget) = inner.budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }

        let number = inner.free.pop()?;
        inner.allocated[number as usize] = true;
        Some(PhysicalAddress::new(number * PAGE_SIZE))
    }

    fn free_frame(&self, frame: PhysicalAddress) {
        assert!(
            frame.is_page_aligned() && frame.as_u32() != 0,
            "free_frame: bad frame {:#x}",
            frame
        );
        let mut inner = self.inner.lock();
        let number = frame.as_usize() / FRAME_SIZE;
        assert!(
            inner.allocated[number],
            "free_frame: double free of {:#x}",
            frame
        );

        let start = frame.as_usize();
        inner.memory[start..start + FRAME_SIZE].fill(JUNK_BYTE);
        inner.allocated[number] = false;
        inner.free.push(number as u32);
    }

    fn read(&self, addr: PhysicalAddress, buf: &mut [u8]) {
        let inner = self.inner.lock();
        let start = addr.as_usize();
        debug_assert!(start % FRAME_SIZE + buf.len() <= FRAME_SIZE);
        buf.copy_from_slice(&inner.memory[start..start + buf.len()]);
    }

    fn write(&self, addr: PhysicalAddress, data: &[u8]) {
        let mut inner = self.inner.lock();
        let start = addr.as_usize();
        debug_assert!(start % FRAME_SIZE + data.len() <= FRAME_SIZE);
        inner.memory[start..start + data.len()].copy_from_slice(data);
    }

    fn fill(&self, addr: PhysicalAddress, byte: u8, len: usize) {
        let mut inner = self.inner.lock();
        let start = addr.as_usize();
        debug_assert!(start % FRAME_SIZE + len <= FRAME_SIZE);
        inner.memory[start..start + len].fill(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_counts() {
        let pool = FramePool::new(4);
        assert_eq!(pool.free_frames(), 4);

        let a = pool.alloc_frame().unwrap();
        let b = pool.alloc_frame().unwrap();
        assert_ne!(a, b);
        assert_ne!(a.as_u32(), 0);
        assert_eq!(pool.free_frames(), 2);

        pool.free_frame(a);
        assert_eq!(pool.free_frames(), 3);
        assert!(!pool.is_allocated(a));
        assert!(pool.is_allocated(b));
    }

    #[test]
    fn test_exhaustion() {
        let pool = FramePool::new(2);
        assert!(pool.alloc_frame().is_some());
        assert!(pool.alloc_frame().is_some());
        assert!(pool.alloc_frame().is_none());
    }

    #[test]
    fn test_allocation_budget() {
        let pool = FramePool::new(8);
        pool.limit_allocations(1);
        assert_eq!(pool.free_frames(), 1);
        let frame = pool.alloc_frame().unwrap();
        assert!(pool.alloc_frame().is_none());
        pool.free_frame(frame);
        assert!(pool.alloc_frame().is_none());
        pool.clear_limit();
        assert!(pool.alloc_frame().is_some());
    }

    #[test]
    fn test_zeroed_and_junk() {
        let pool = FramePool::new(1);
        let frame = pool.alloc_zeroed_frame().unwrap();
        pool.write_u32(frame.offset(8), 0xDEAD_BEEF);
        assert_eq!(pool.read_u32(frame.offset(8)), 0xDEAD_BEEF);
        assert_eq!(pool.read_u32(frame), 0);

        pool.free_frame(frame);
        let again = pool.alloc_frame().unwrap();
        assert_eq!(again, frame);
        assert_eq!(pool.read_u32(again), 0x0101_0101);
    }

    #[test]
    #[should_panic]
    fn test_double_free_panics() {
        let pool = FramePool::new(1);
        let frame = pool.alloc_frame().unwrap();
        pool.free_frame(frame);
        pool.free_frame(frame);
    }
}
