//! ELF32 header validation
//!
//! Reads the executable header and the program-header table from a locked
//! inode and turns them into an [`ImageLayout`]. Nothing here allocates
//! frames, so a rejected file costs nothing to roll back.

pub mod types;

use log::{debug, trace};

pub use types::{
    ElfHeader, ImageLayout, LoadSegment, ProgramHeader, ProgramType, ELF_HEADER_SIZE,
    ELF_MAGIC, PROGRAM_HEADER_SIZE,
};

use crate::{
    config::{KERNBASE, PAGE_SIZE},
    error::{ExecError, ExecResult},
    fs::Filesystem,
    mm::pg_round_up,
    raii::LockedInode,
};

impl ImageLayout {
    /// Start an empty layout for an image entered at `entry`
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            ..Self::default()
        }
    }

    /// Validate the program header at table position `index` and fold it in
    ///
    /// Non-loadable headers are ignored.
    pub fn push(&mut self, index: u16, ph: &ProgramHeader) -> ExecResult<()> {
        if !ph.is_load() {
            trace!("exec: skipping segment {} of type {}", index, ph.p_type);
            return Ok(());
        }
        let segment = validate_segment(index, ph)?;

        self.image_size = self.image_size.max(segment.end());
        self.text_end = segment.vaddr + segment.file_size;
        self.data_end = pg_round_up(segment.end());
        self.segments.push(segment);
        Ok(())
    }
}

/// Check one loadable program header
///
/// Rejects `memsz < filesz`, an end address that wraps or reaches into the
/// kernel half, and a virtual address that is not page aligned.
pub fn validate_segment(index: u16, ph: &ProgramHeader) -> ExecResult<LoadSegment> {
    let malformed = ExecError::MalformedSegment { index };

    if ph.p_memsz < ph.p_filesz {
        debug!(
            "exec: segment {}: memsz {:#x} < filesz {:#x}",
            index, ph.p_memsz, ph.p_filesz
        );
        return Err(malformed);
    }
    let end = match ph.p_vaddr.checked_add(ph.p_memsz) {
        Some(end) if end <= KERNBASE => end,
        _ => {
            debug!(
                "exec: segment {}: {:#x} + {:#x} leaves user space",
                index, ph.p_vaddr, ph.p_memsz
            );
            return Err(malformed);
        }
    };
    if ph.p_vaddr % PAGE_SIZE != 0 {
        debug!("exec: segment {}: vaddr {:#x} unaligned", index, ph.p_vaddr);
        return Err(malformed);
    }

    trace!("exec: segment {}: {:#x}..{:#x}", index, ph.p_vaddr, end);
    Ok(LoadSegment {
        index,
        vaddr: ph.p_vaddr,
        file_offset: ph.p_offset,
        file_size: ph.p_filesz,
        memory_size: ph.p_memsz,
    })
}

/// Read and check the header at offset 0
pub fn read_header<F: Filesystem + ?Sized>(file: &LockedInode<'_, F>) -> ExecResult<ElfHeader> {
    let mut bytes = [0u8; ELF_HEADER_SIZE];
    if !file.read_exact_at(0, &mut bytes) {
        debug!("exec: short header read");
        return Err(ExecError::InvalidFormat);
    }
    let header = ElfHeader::from_bytes(&bytes);
    if header.magic != ELF_MAGIC {
        debug!("exec: bad magic {:#010x}", header.magic);
        return Err(ExecError::InvalidFormat);
    }
    Ok(header)
}

/// Read the header and walk the program-header table in order
pub fn read_image<F: Filesystem + ?Sized>(file: &LockedInode<'_, F>) -> ExecResult<ImageLayout> {
    let header = read_header(file)?;
    let mut layout = ImageLayout::new(header.entry);

    for index in 0..header.phnum {
        let offset = (index as u32)
            .checked_mul(PROGRAM_HEADER_SIZE as u32)
            .and_then(|rel| header.phoff.checked_add(rel))
            .ok_or(ExecError::InvalidFormat)?;

        let mut bytes = [0u8; PROGRAM_HEADER_SIZE];
        if !file.read_exact_at(offset, &mut bytes) {
            debug!("exec: short program header read at {:#x}", offset);
            return Err(ExecError::InvalidFormat);
        }
        layout.push(index, &ProgramHeader::from_bytes(&bytes))?;
    }

    debug!(
        "exec: entry {:#x}, {} loadable segments, image size {:#x}",
        layout.entry,
        layout.segments.len(),
        layout.image_size
    );
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RamFs;

    fn load(vaddr: u32, filesz: u32, memsz: u32) -> ProgramHeader {
        ProgramHeader {
            p_type: ProgramType::Load as u32,
            p_offset: 0x1000,
            p_vaddr: vaddr,
            p_filesz: filesz,
            p_memsz: memsz,
            ..ProgramHeader::default()
        }
    }

    fn image(entry: u32, phdrs: &[ProgramHeader]) -> alloc::vec::Vec<u8> {
        let header = ElfHeader {
            magic: ELF_MAGIC,
            entry,
            phoff: ELF_HEADER_SIZE as u32,
            phnum: phdrs.len() as u16,
            ..ElfHeader::default()
        };
        let mut bytes = header.to_bytes().to_vec();
        for ph in phdrs {
            bytes.extend_from_slice(&ph.to_bytes());
        }
        bytes
    }

    fn read(bytes: alloc::vec::Vec<u8>) -> ExecResult<ImageLayout> {
        let fs = RamFs::new();
        fs.insert("/prog", bytes);
        let file = LockedInode::lock(&fs, fs.lookup("/prog").unwrap());
        read_image(&file)
    }

    #[test]
    fn test_header_roundtrip_fields() {
        let header = ElfHeader {
            magic: ELF_MAGIC,
            entry: 0x1234,
            phoff: 52,
            phnum: 3,
            ..ElfHeader::default()
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..4], b"\x7FELF");
        assert_eq!(ElfHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn test_layout_tracks_max_end() {
        let mut layout = ImageLayout::new(0x40);
        layout.push(0, &load(0x3000, 0x100, 0x200)).unwrap();
        layout.push(1, &load(0, 0x800, 0x1800)).unwrap();

        assert_eq!(layout.image_size, 0x3200);
        // Extents come from the last loadable segment.
        assert_eq!(layout.text_end, 0x800);
        assert_eq!(layout.data_end, 0x2000);
        assert_eq!(layout.segments.len(), 2);
    }

    #[test]
    fn test_non_load_segments_skipped() {
        let mut layout = ImageLayout::new(0);
        let note = ProgramHeader {
            p_type: ProgramType::Note as u32,
            p_vaddr: 0x123,
            p_filesz: 10,
            p_memsz: 1,
            ..ProgramHeader::default()
        };
        layout.push(0, &note).unwrap();
        assert!(layout.segments.is_empty());
        assert_eq!(layout.image_size, 0);
    }

    #[test]
    fn test_memsz_below_filesz() {
        assert_eq!(
            validate_segment(2, &load(0, 0x200, 0x100)),
            Err(ExecError::MalformedSegment { index: 2 })
        );
    }

    #[test]
    fn test_address_overflow() {
        assert_eq!(
            validate_segment(0, &load(0xFFFF_F000, 0, 0x2000)),
            Err(ExecError::MalformedSegment { index: 0 })
        );
        assert_eq!(
            validate_segment(0, &load(KERNBASE - 0x1000, 0, 0x2000)),
            Err(ExecError::MalformedSegment { index: 0 })
        );
        assert!(validate_segment(0, &load(KERNBASE - 0x1000, 0, 0x1000)).is_ok());
    }

    #[test]
    fn test_unaligned_vaddr() {
        assert_eq!(
            validate_segment(1, &load(0x1004, 0, 0x10)),
            Err(ExecError::MalformedSegment { index: 1 })
        );
    }

    #[test]
    fn test_read_image() {
        let layout = read(image(0x20, &[load(0, 0x40, 0x1100)])).unwrap();
        assert_eq!(layout.entry, 0x20);
        assert_eq!(layout.image_size, 0x1100);
        assert_eq!(layout.segments[0].file_offset, 0x1000);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = image(0, &[]);
        bytes[0] = 0;
        assert_eq!(read(bytes), Err(ExecError::InvalidFormat));
    }

    #[test]
    fn test_short_reads() {
        assert_eq!(read(alloc::vec![0x7F, b'E', b'L', b'F']), Err(ExecError::InvalidFormat));

        let mut bytes = image(0, &[load(0, 0, 0x1000)]);
        bytes.truncate(ELF_HEADER_SIZE + 10);
        assert_eq!(read(bytes), Err(ExecError::InvalidFormat));
    }
}
