//! Error types for the image loader
//!
//! `ExecError` is what callers of exec see. `VmError` is raised by the paging
//! layer and folded into `ExecError` at the loader boundary.

use core::fmt;

/// Why an exec attempt failed
///
/// Whatever the variant, the calling process is left exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The executable path does not resolve to an inode
    PathNotFound,
    /// Short header read, short program-header read, or bad magic
    InvalidFormat,
    /// A loadable segment violates a size, overflow, or alignment rule
    MalformedSegment {
        /// Position of the offending descriptor in the program-header table
        index: u16,
    },
    /// A frame or a stretch of user virtual space could not be allocated
    OutOfMemory,
    /// More than `MAXARG` arguments were supplied
    TooManyArguments {
        max: usize,
    },
    /// Writing argument data or the stack header into the new image failed
    CopyFault {
        addr: u32,
    },
}

/// Paging-layer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No free physical frame was left
    OutOfMemory,
    /// A user address is unmapped or not user accessible
    Fault { addr: u32 },
    /// A mapping was requested over a page that is already present
    Remap { addr: u32 },
    /// The backing file ended before the requested bytes were read
    ShortRead { offset: u32 },
}

/// Result type alias for exec
pub type ExecResult<T> = Result<T, ExecError>;

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathNotFound => write!(f, "executable not found"),
            Self::InvalidFormat => write!(f, "not a valid executable"),
            Self::MalformedSegment { index } => {
                write!(f, "malformed loadable segment at index {}", index)
            }
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::TooManyArguments { max } => {
                write!(f, "too many arguments (max {})", max)
            }
            Self::CopyFault { addr } => {
                write!(f, "fault writing user stack at 0x{:x}", addr)
            }
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of physical frames"),
            Self::Fault { addr } => write!(f, "user fault at 0x{:x}", addr),
            Self::Remap { addr } => write!(f, "page at 0x{:x} already mapped", addr),
            Self::ShortRead { offset } => write!(f, "short file read at offset {}", offset),
        }
    }
}

impl From<VmError> for ExecError {
    fn from(err: VmError) -> Self {
        match err {
            VmError::OutOfMemory => Self::OutOfMemory,
            VmError::Fault { addr } | VmError::Remap { addr } => Self::CopyFault { addr },
            VmError::ShortRead { .. } => Self::InvalidFormat,
        }
    }
}
