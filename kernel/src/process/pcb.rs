//! Process Control Block (PCB) implementation
//!
//! Only the parts of a process that exec reads or replaces live here: the
//! address space, the saved user registers, and the debug names.

use core::fmt;

use crate::{
    config::{PROC_FILENAME_LEN, PROC_NAME_LEN},
    mm::{AddressSpace, PhysMemory},
};

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User registers restored on the next return to user mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapFrame {
    /// Instruction pointer
    pub eip: u32,
    /// Stack pointer
    pub esp: u32,
}

/// Process Control Block
pub struct Process {
    /// Process ID
    pub pid: ProcessId,

    /// Active address space; replaced only by exec's commit step
    space: AddressSpace,

    /// Size of the user image in bytes
    pub size: u32,

    /// Saved user registers
    pub trap_frame: TrapFrame,

    /// Short name (last path component), NUL terminated
    name: [u8; PROC_NAME_LEN],

    /// Full executable path, NUL terminated
    filename: [u8; PROC_FILENAME_LEN],

    /// End of file-backed bytes of the last loadable segment
    pub text_end: u32,

    /// Page-rounded end of the last loadable segment
    pub data_end: u32,
}

impl Process {
    /// Create a process owning `space`, whose image spans `[0, size)`
    pub fn new(pid: ProcessId, name: &str, space: AddressSpace, size: u32) -> Self {
        let mut process = Self {
            pid,
            space,
            size,
            trap_frame: TrapFrame::default(),
            name: [0; PROC_NAME_LEN],
            filename: [0; PROC_FILENAME_LEN],
            text_end: 0,
            data_end: 0,
        };
        safe_strcpy(&mut process.name, name.as_bytes());
        process
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.space
    }

    /// Short process name
    pub fn name(&self) -> &str {
        c_str(&self.name)
    }

    /// Full path of the running executable
    pub fn filename(&self) -> &str {
        c_str(&self.filename)
    }

    /// Raw name buffers, terminator and padding included
    pub fn debug_names(&self) -> ([u8; PROC_NAME_LEN], [u8; PROC_FILENAME_LEN]) {
        (self.name, self.filename)
    }

    /// Record `path` in the debug name fields
    pub(crate) fn set_debug_names(&mut self, path: &str) {
        let last = path.rsplit('/').next().unwrap_or(path);
        safe_strcpy(&mut self.name, last.as_bytes());
        safe_strcpy(&mut self.filename, path.as_bytes());
    }

    /// Install `space` as the active address space, returning the old one
    pub(crate) fn replace_address_space(&mut self, space: AddressSpace) -> AddressSpace {
        core::mem::replace(&mut self.space, space)
    }

    /// Tear the process's memory down
    pub fn destroy<M: PhysMemory + ?Sized>(self, mem: &M) {
        self.space.destroy(mem);
    }
}

/// Copy `src` into `dst`, truncating so a NUL terminator always fits
///
/// The rest of `dst` is zeroed.
pub fn safe_strcpy(dst: &mut [u8], src: &[u8]) {
    if dst.is_empty() {
        return;
    }
    let n = src.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0);
}

/// View a NUL-terminated buffer as text, stopping at the first NUL
///
/// Truncation can split a UTF-8 sequence; the broken tail is dropped.
fn c_str(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match core::str::from_utf8(&buf[..end]) {
        Ok(s) => s,
        Err(err) => core::str::from_utf8(&buf[..err.valid_up_to()]).unwrap_or(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::FramePool;

    #[test]
    fn test_safe_strcpy_truncates() {
        let mut buf = [0xFFu8; 4];
        safe_strcpy(&mut buf, b"abcdef");
        assert_eq!(&buf, b"abc\0");

        safe_strcpy(&mut buf, b"x");
        assert_eq!(&buf, b"x\0\0\0");

        let mut empty: [u8; 0] = [];
        safe_strcpy(&mut empty, b"abc");
    }

    #[test]
    fn test_debug_names() {
        let pool = FramePool::new(4);
        let space = AddressSpace::new_empty(&pool).unwrap();
        let mut process = Process::new(ProcessId(1), "init", space, 0);
        assert_eq!(process.name(), "init");
        assert_eq!(process.filename(), "");

        process.set_debug_names("/usr/bin/a-very-long-program-name");
        assert_eq!(process.name(), "a-very-long-pro");
        assert_eq!(process.filename(), "/usr/bin/a-very-long-program-name");

        process.set_debug_names("sh");
        assert_eq!(process.name(), "sh");
        assert_eq!(process.filename(), "sh");

        process.destroy(&pool);
        assert_eq!(pool.free_frames(), 4);
    }
}
