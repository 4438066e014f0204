//! Initial user stack construction
//!
//! Layout, from high to low addresses:
//!
//! ```text
//! top        +------------------------+
//!            | argument strings       |  each NUL terminated, 4-byte aligned
//!            +------------------------+
//!            | argv[0] .. argv[argc-1]|
//!            | 0                      |  argv terminator
//!            +------------------------+
//!            | &argv[0]               |
//!            | argc                   |
//! sp ->      | 0xFFFFFFFF             |  fake return address
//! top - PG   +------------------------+
//!            | guard page (no user)   |
//! top - 2 PG +------------------------+
//! ```

use log::{debug, trace};

use crate::{
    config::{MAXARG, PAGE_SIZE, STACK_SENTINEL, USER_STACK_PAGES, WORD_SIZE},
    error::{ExecError, ExecResult},
    mm::{pg_round_up, AddressSpace, PhysMemory},
};

/// Words in the fixed header below the pointer table
const HEADER_WORDS: usize = 3;

/// Where the stack ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStack {
    /// Initial user stack pointer, pointing at the fake return address
    pub sp: u32,
    /// Number of arguments pushed
    pub argc: u32,
    /// Address of `argv[0]`
    pub argv: u32,
    /// One past the highest stack byte; also the new image size
    pub top: u32,
    /// Base of the user-inaccessible guard page
    pub guard: u32,
}

/// Bounded table of argument pointers
///
/// Room for `MAXARG` arguments plus the terminating null. The capacity check
/// runs before every push.
struct ArgPointers {
    words: [u32; MAXARG + 1],
    len: usize,
}

impl ArgPointers {
    const fn new() -> Self {
        Self {
            words: [0; MAXARG + 1],
            len: 0,
        }
    }

    /// Record the address of the next argument string
    fn push(&mut self, ptr: u32) -> ExecResult<()> {
        if self.len >= MAXARG {
            return Err(ExecError::TooManyArguments { max: MAXARG });
        }
        self.words[self.len] = ptr;
        self.len += 1;
        Ok(())
    }

    fn argc(&self) -> usize {
        self.len
    }

    /// Pointers plus the null terminator
    fn terminated(&self) -> &[u32] {
        &self.words[..self.len + 1]
    }
}

/// Grow `space` by a guard page and a stack page above `image_size` and lay
/// out `args` on the new stack
///
/// Failures leave the pages in `space`; the caller's rollback frees them.
///
/// Each argument is copied whole, but user code reads it as a C string, so
/// an argument with an interior NUL is seen only up to that byte.
pub fn build_user_stack<M, S>(
    mem: &M,
    space: &AddressSpace,
    image_size: u32,
    args: &[S],
) -> ExecResult<UserStack>
where
    M: PhysMemory + ?Sized,
    S: AsRef<str>,
{
    let base = pg_round_up(image_size);
    let end = base
        .checked_add(USER_STACK_PAGES * PAGE_SIZE)
        .ok_or(ExecError::OutOfMemory)?;
    let top = space
        .alloc_uvm(mem, base, end)
        .map_err(|_| ExecError::OutOfMemory)?;
    let guard = top - USER_STACK_PAGES * PAGE_SIZE;
    space.clear_pte_user(mem, guard)?;
    trace!("exec: stack page {:#x}, guard {:#x}", top - PAGE_SIZE, guard);

    let mut sp = top;
    let mut pointers = ArgPointers::new();
    for arg in args {
        let bytes = arg.as_ref().as_bytes();
        // Reject before writing anything more.
        if pointers.argc() >= MAXARG {
            debug!("exec: more than {} arguments", MAXARG);
            return Err(ExecError::TooManyArguments { max: MAXARG });
        }
        sp = push_string(mem, space, sp, bytes)?;
        pointers.push(sp)?;
    }

    let argc = pointers.argc();
    let table = pointers.terminated();
    let words = HEADER_WORDS + table.len();
    let frame_bytes = words as u32 * WORD_SIZE;
    let argv = sp
        .checked_sub(table.len() as u32 * WORD_SIZE)
        .ok_or(ExecError::CopyFault { addr: 0 })?;

    let mut staging = [0u8; (HEADER_WORDS + MAXARG + 1) * WORD_SIZE as usize];
    let header = [STACK_SENTINEL, argc as u32, argv];
    for (chunk, word) in staging
        .chunks_exact_mut(WORD_SIZE as usize)
        .zip(header.iter().chain(table))
    {
        chunk.copy_from_slice(&word.to_le_bytes());
    }

    sp = sp
        .checked_sub(frame_bytes)
        .ok_or(ExecError::CopyFault { addr: 0 })?;
    space
        .copy_out(mem, sp, &staging[..frame_bytes as usize])
        .map_err(|_| ExecError::CopyFault { addr: sp })?;

    debug!("exec: stack sp {:#x}, argc {}, argv {:#x}", sp, argc, argv);
    Ok(UserStack {
        sp,
        argc: argc as u32,
        argv,
        top,
        guard,
    })
}

/// Copy `bytes` plus a NUL below `sp`, word aligned; returns the string's
/// address
fn push_string<M: PhysMemory + ?Sized>(
    mem: &M,
    space: &AddressSpace,
    sp: u32,
    bytes: &[u8],
) -> ExecResult<u32> {
    let len = u32::try_from(bytes.len() + 1).map_err(|_| ExecError::CopyFault { addr: sp })?;
    let addr = sp
        .checked_sub(len)
        .ok_or(ExecError::CopyFault { addr: 0 })?
        & !(WORD_SIZE - 1);

    space
        .copy_out(mem, addr, bytes)
        .and_then(|()| space.copy_out(mem, addr + len - 1, &[0]))
        .map_err(|_| ExecError::CopyFault { addr })?;
    Ok(addr)
}
