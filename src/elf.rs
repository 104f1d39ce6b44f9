//! ELF (Executable and Linkable Format) file operations

use std::{borrow::Cow, fmt::Debug};

use xmas_elf::{
    header::Class,
    program::{SegmentData, Type},
    ElfFile,
};

use crate::error::ElfError;

/// Highest address a segment may start at and still be written to flash
pub const FLASH_ADDR_LIMIT: u32 = 0x1000_0000;

/// A firmware image built from an ELF file
pub struct FirmwareImage<'a> {
    pub elf: ElfFile<'a>,
}

impl<'a> FirmwareImage<'a> {
    /// Parse an ELF image and validate its program header table
    pub fn from_data(data: &'a [u8]) -> Result<Self, ElfError> {
        let elf = ElfFile::new(data)?;
        validate_program_headers(&elf)?;

        Ok(Self::from_elf(elf))
    }

    pub fn from_elf(elf: ElfFile<'a>) -> Self {
        FirmwareImage { elf }
    }

    /// Get the entry point of the firmware
    pub fn entry(&self) -> u32 {
        self.elf.header.pt2.entry_point() as u32
    }

    /// Get the loadable segments in the order the image declares them
    ///
    /// Every call walks the program header table again, so each pass over
    /// the image gets its own fresh set of segments.
    pub fn segments(&'a self) -> impl Iterator<Item = Segment<'a>> + 'a {
        self.elf
            .program_iter()
            .filter(|header| header.get_type() == Ok(Type::Load))
            .flat_map(move |header| {
                let addr = u32::try_from(header.physical_addr()).unwrap_or(u32::MAX);
                let size = header.mem_size() as u32;
                let align = u32::try_from(header.align()).unwrap_or(u32::MAX);
                let data = match header.get_data(&self.elf) {
                    Ok(SegmentData::Undefined(data)) => data,
                    _ => return None,
                };
                Some(Segment {
                    addr,
                    size,
                    align,
                    data: Cow::Borrowed(data),
                })
            })
    }

    /// Get the segments which will be written to flash
    pub fn flash_segments(&'a self) -> impl Iterator<Item = Segment<'a>> + 'a {
        self.segments().filter(|segment| segment.is_flash())
    }
}

fn validate_program_headers(elf: &ElfFile<'_>) -> Result<(), ElfError> {
    let len = elf.input.len() as u64;
    let pt2 = &elf.header.pt2;

    if pt2.ph_count() == 0 {
        return Ok(());
    }
    if pt2.ph_offset() == 0 {
        return Err("ELF program header table is missing".into());
    }

    let (min_entry_size, entry_align) = match elf.header.pt1.class() {
        Class::ThirtyTwo => (32, 4),
        Class::SixtyFour => (56, 8),
        _ => return Err("ELF file has an unknown class".into()),
    };
    if pt2.ph_entry_size() < min_entry_size {
        return Err("ELF program header entries are too small".into());
    }

    // Headers are read in place, so every entry must sit on its natural alignment
    let table_addr = (elf.input.as_ptr() as u64).wrapping_add(pt2.ph_offset());
    if table_addr % entry_align != 0 || pt2.ph_entry_size() as u64 % entry_align != 0 {
        return Err("ELF program header table is misaligned".into());
    }

    let table_end = pt2
        .ph_offset()
        .checked_add(pt2.ph_count() as u64 * pt2.ph_entry_size() as u64);
    if table_end.map_or(true, |end| end > len) {
        return Err("ELF program header table extends past the end of the file".into());
    }

    for index in 0..pt2.ph_count() {
        let header = elf.program_header(index)?;
        if header.get_type() != Ok(Type::Load) {
            continue;
        }

        let data_end = header.offset().checked_add(header.file_size());
        if data_end.map_or(true, |end| end > len) {
            return Err("ELF segment data extends past the end of the file".into());
        }
        if header.mem_size() > u32::MAX as u64 || header.file_size() > header.mem_size() {
            return Err("ELF segment has an invalid size".into());
        }
    }

    Ok(())
}

/// A loadable segment of an image, destined for a device address
#[derive(Clone, Default)]
pub struct Segment<'a> {
    /// Physical address the segment is loaded at
    pub addr: u32,
    /// Size of the segment in memory
    pub size: u32,
    /// Required alignment of the segment, `0` and `1` mean none
    pub align: u32,
    /// File-backed contents of the segment
    pub data: Cow<'a, [u8]>,
}

impl<'a> Segment<'a> {
    /// A segment whose size is the length of its data and which has no
    /// alignment requirement
    pub fn new(addr: u32, data: &'a [u8]) -> Self {
        Segment {
            addr,
            size: data.len() as u32,
            align: 1,
            data: Cow::Borrowed(data),
        }
    }

    /// Set the alignment requirement of the segment
    pub fn with_align(mut self, align: u32) -> Self {
        self.align = align;
        self
    }

    /// Whether the segment starts within the flash address range
    pub fn is_flash(&self) -> bool {
        self.addr <= FLASH_ADDR_LIMIT
    }

    /// Whether the size of the segment is a multiple of its alignment
    pub fn is_aligned(&self) -> bool {
        self.align <= 1 || self.size % self.align == 0
    }
}

impl Debug for Segment<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("addr", &format_args!("{:#010x}", self.addr))
            .field("size", &self.size)
            .field("align", &self.align)
            .field("data_len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_range_is_inclusive() {
        assert!(Segment::new(0, &[]).is_flash());
        assert!(Segment::new(FLASH_ADDR_LIMIT, &[]).is_flash());
        assert!(!Segment::new(FLASH_ADDR_LIMIT + 1, &[]).is_flash());
        assert!(!Segment::new(0x2000_0000, &[]).is_flash());
    }

    #[test]
    fn alignment_check() {
        let data = [0u8; 6];

        assert!(Segment::new(0, &data).with_align(2).is_aligned());
        assert!(!Segment::new(0, &data).with_align(4).is_aligned());
        // An alignment of zero places no constraint on the size
        assert!(Segment::new(0, &data).with_align(0).is_aligned());
        assert!(Segment::new(0, &data).with_align(1).is_aligned());
    }

    #[test]
    fn rejects_garbage() {
        assert!(FirmwareImage::from_data(b"not an elf file at all, just some text").is_err());
        assert!(FirmwareImage::from_data(&[]).is_err());
    }
}
