//! Common test utilities for the exec integration tests
//!
//! A booted test kernel (frame pool, kernel mappings, RAM filesystem, and
//! simulated CPU) plus a small builder for ELF32 images.

#![allow(dead_code)]

use exec_loader::{
    arch::{Cpu, SimCpu},
    config::PAGE_SIZE,
    elf::{ElfHeader, ProgramHeader, ProgramType, ELF_HEADER_SIZE, ELF_MAGIC, PROGRAM_HEADER_SIZE},
    fs::RamFs,
    mm::{FramePool, KernelMappings, PhysMemory},
    ImageLoader, Process, ProcessId,
};

/// Frames in the default test pool
pub const POOL_FRAMES: usize = 256;

/// A tiny machine with one running process
pub struct TestKernel {
    pub pool: FramePool,
    pub kernel: KernelMappings,
    pub fs: RamFs,
    pub cpu: SimCpu,
}

impl TestKernel {
    pub fn boot() -> Self {
        Self::with_frames(POOL_FRAMES)
    }

    pub fn with_frames(frames: usize) -> Self {
        let pool = FramePool::new(frames);
        let kernel = KernelMappings::new(&pool, pool.phys_top()).unwrap();
        Self {
            pool,
            kernel,
            fs: RamFs::new(),
            cpu: SimCpu::new(),
        }
    }

    /// The first process: one page of code at address 0, already running
    pub fn init_process(&self) -> Process {
        let space = self.kernel.new_user_space(&self.pool).unwrap();
        space.init_uvm(&self.pool, &[0x90; 16]).unwrap();
        let process = Process::new(ProcessId(1), "initcode", space, PAGE_SIZE);
        self.cpu.switch_user_vm(process.address_space().root());
        process
    }

    pub fn loader(&self) -> ImageLoader<'_, FramePool, RamFs, SimCpu> {
        ImageLoader::new(&self.pool, &self.fs, &self.cpu)
    }

    pub fn install(&self, path: &str, image: Vec<u8>) {
        self.fs.insert(path, image);
    }

    pub fn free_frames(&self) -> usize {
        self.pool.clear_limit();
        self.pool.free_frames()
    }

    /// Whether every transaction, reference, and lock was released
    pub fn fs_quiescent(&self) -> bool {
        self.fs.open_transactions() == 0
            && self.fs.live_references() == 0
            && self.fs.held_locks() == 0
    }

    pub fn read_user(&self, process: &Process, va: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        process
            .address_space()
            .copy_in(&self.pool, va, &mut buf)
            .unwrap();
        buf
    }

    pub fn read_word(&self, process: &Process, va: u32) -> u32 {
        process
            .address_space()
            .read_user_u32(&self.pool, va)
            .unwrap()
    }

    /// Read a NUL-terminated user string, terminator excluded
    pub fn read_cstr(&self, process: &Process, mut va: u32) -> String {
        let mut out = Vec::new();
        loop {
            let byte = self.read_user(process, va, 1)[0];
            if byte == 0 {
                return String::from_utf8(out).unwrap();
            }
            out.push(byte);
            va += 1;
        }
    }

    /// Physical frame backing user address `va`, if user accessible
    pub fn backing_frame(&self, process: &Process, va: u32) -> Option<u32> {
        process
            .address_space()
            .user_to_kernel(&self.pool, va)
            .map(|pa| pa.as_u32())
    }

    pub fn read_phys(&self, pa: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.pool
            .read(exec_loader::mm::PhysicalAddress::new(pa), &mut buf);
        buf
    }
}

/// One program-header entry and the file bytes it points at
#[derive(Debug, Clone)]
pub struct Segment {
    pub p_type: u32,
    pub vaddr: u32,
    pub data: Vec<u8>,
    pub memsz: u32,
}

impl Segment {
    /// Loadable segment with `filesz` recognisable bytes
    pub fn load(vaddr: u32, filesz: u32, memsz: u32) -> Self {
        Self {
            p_type: ProgramType::Load as u32,
            vaddr,
            data: pattern(filesz as usize),
            memsz,
        }
    }

    pub fn note(filesz: u32) -> Self {
        Self {
            p_type: ProgramType::Note as u32,
            vaddr: 0,
            data: pattern(filesz as usize),
            memsz: filesz,
        }
    }
}

/// Byte `i` of a segment's file contents
pub fn pattern_byte(i: usize) -> u8 {
    (i % 251) as u8 ^ 0x5A
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(pattern_byte).collect()
}

/// Build an ELF32 image: header, program-header table, then segment bytes
pub fn build_elf(entry: u32, segments: &[Segment]) -> Vec<u8> {
    let table_end = ELF_HEADER_SIZE + segments.len() * PROGRAM_HEADER_SIZE;
    let header = ElfHeader {
        magic: ELF_MAGIC,
        elf_type: 2,
        machine: 3,
        version: 1,
        entry,
        phoff: ELF_HEADER_SIZE as u32,
        ehsize: ELF_HEADER_SIZE as u16,
        phentsize: PROGRAM_HEADER_SIZE as u16,
        phnum: segments.len() as u16,
        ..ElfHeader::default()
    };

    let mut image = header.to_bytes().to_vec();
    let mut offset = table_end;
    for segment in segments {
        let ph = ProgramHeader {
            p_type: segment.p_type,
            p_offset: offset as u32,
            p_vaddr: segment.vaddr,
            p_paddr: segment.vaddr,
            p_filesz: segment.data.len() as u32,
            p_memsz: segment.memsz,
            p_flags: 0x7,
            p_align: PAGE_SIZE,
        };
        image.extend_from_slice(&ph.to_bytes());
        offset += segment.data.len();
    }
    for segment in segments {
        image.extend_from_slice(&segment.data);
    }
    image
}

/// The usual test program: one segment of 0x1000 file bytes and 0x800 of bss
pub fn simple_elf() -> Vec<u8> {
    build_elf(0x20, &[Segment::load(0, 0x1000, 0x1800)])
}
