//! ELF32 type definitions
//!
//! On-disk header and program-header layouts plus the validated view the
//! loader works from. Separated from `mod.rs` for maintainability.

use alloc::vec::Vec;

/// ELF magic number, "\x7FELF" read as a little-endian word
pub const ELF_MAGIC: u32 = 0x464C_457F;

/// Size of the on-disk ELF header
pub const ELF_HEADER_SIZE: usize = 52;

/// Size of one on-disk program header
pub const PROGRAM_HEADER_SIZE: usize = 32;

/// Program header type
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    Null = 0,
    Load = 1,
    Dynamic = 2,
    Interp = 3,
    Note = 4,
    Shlib = 5,
    Phdr = 6,
    Tls = 7,
}

/// ELF header
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElfHeader {
    pub magic: u32,
    pub ident: [u8; 12],
    pub elf_type: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u32,
    pub phoff: u32,
    pub shoff: u32,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// Program header
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl ElfHeader {
    pub fn from_bytes(bytes: &[u8; ELF_HEADER_SIZE]) -> Self {
        let mut ident = [0u8; 12];
        ident.copy_from_slice(&bytes[4..16]);
        Self {
            magic: le_u32(bytes, 0),
            ident,
            elf_type: le_u16(bytes, 16),
            machine: le_u16(bytes, 18),
            version: le_u32(bytes, 20),
            entry: le_u32(bytes, 24),
            phoff: le_u32(bytes, 28),
            shoff: le_u32(bytes, 32),
            flags: le_u32(bytes, 36),
            ehsize: le_u16(bytes, 40),
            phentsize: le_u16(bytes, 42),
            phnum: le_u16(bytes, 44),
            shentsize: le_u16(bytes, 46),
            shnum: le_u16(bytes, 48),
            shstrndx: le_u16(bytes, 50),
        }
    }

    pub fn to_bytes(&self) -> [u8; ELF_HEADER_SIZE] {
        let mut out = [0u8; ELF_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..16].copy_from_slice(&self.ident);
        out[16..18].copy_from_slice(&self.elf_type.to_le_bytes());
        out[18..20].copy_from_slice(&self.machine.to_le_bytes());
        out[20..24].copy_from_slice(&self.version.to_le_bytes());
        out[24..28].copy_from_slice(&self.entry.to_le_bytes());
        out[28..32].copy_from_slice(&self.phoff.to_le_bytes());
        out[32..36].copy_from_slice(&self.shoff.to_le_bytes());
        out[36..40].copy_from_slice(&self.flags.to_le_bytes());
        out[40..42].copy_from_slice(&self.ehsize.to_le_bytes());
        out[42..44].copy_from_slice(&self.phentsize.to_le_bytes());
        out[44..46].copy_from_slice(&self.phnum.to_le_bytes());
        out[46..48].copy_from_slice(&self.shentsize.to_le_bytes());
        out[48..50].copy_from_slice(&self.shnum.to_le_bytes());
        out[50..52].copy_from_slice(&self.shstrndx.to_le_bytes());
        out
    }
}

impl ProgramHeader {
    pub fn from_bytes(bytes: &[u8; PROGRAM_HEADER_SIZE]) -> Self {
        Self {
            p_type: le_u32(bytes, 0),
            p_offset: le_u32(bytes, 4),
            p_vaddr: le_u32(bytes, 8),
            p_paddr: le_u32(bytes, 12),
            p_filesz: le_u32(bytes, 16),
            p_memsz: le_u32(bytes, 20),
            p_flags: le_u32(bytes, 24),
            p_align: le_u32(bytes, 28),
        }
    }

    pub fn to_bytes(&self) -> [u8; PROGRAM_HEADER_SIZE] {
        let mut out = [0u8; PROGRAM_HEADER_SIZE];
        let words = [
            self.p_type,
            self.p_offset,
            self.p_vaddr,
            self.p_paddr,
            self.p_filesz,
            self.p_memsz,
            self.p_flags,
            self.p_align,
        ];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn is_load(&self) -> bool {
        self.p_type == ProgramType::Load as u32
    }
}

/// A validated loadable segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    /// Position in the program-header table
    pub index: u16,
    pub vaddr: u32,
    pub file_offset: u32,
    pub file_size: u32,
    pub memory_size: u32,
}

impl LoadSegment {
    /// First address past the segment. Validation guarantees no overflow.
    pub fn end(&self) -> u32 {
        self.vaddr + self.memory_size
    }

    /// Address of the segment's last byte, or its start when empty
    pub fn last_byte(&self) -> u32 {
        if self.memory_size == 0 {
            self.vaddr
        } else {
            self.end() - 1
        }
    }
}

/// Everything exec needs from a validated executable
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageLayout {
    pub entry: u32,
    /// Loadable segments in table order
    pub segments: Vec<LoadSegment>,
    /// Highest end address over all loadable segments
    pub image_size: u32,
    /// End of file-backed bytes of the last loadable segment
    pub text_end: u32,
    /// Page-rounded end of the last loadable segment
    pub data_end: u32,
}
