#![allow(dead_code)]

use std::{collections::BTreeMap, io};

use ccflash::{
    command::StatusCode,
    error::ConnectionError,
    flasher::{Device, ProgressCallbacks},
};

/// A device command as observed by [FakeDevice]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Sync,
    BankErase,
    GetStatus,
    Download { addr: u32, size: u32 },
    SendData(usize),
    Crc32 { addr: u32, size: u32, repeat: u32 },
    Reset,
}

/// In-memory stand-in for a bootloader
///
/// Keeps a sparse flash image written through download/send-data and answers
/// CRC-32 requests from it. Unwritten flash reads as `0xFF`.
#[derive(Default)]
pub struct FakeDevice {
    pub calls: Vec<Call>,
    pub flash: BTreeMap<u32, u8>,
    pub status: Option<StatusCode>,
    pub cursor: u32,
    pub sent_blocks: usize,

    pub fail_sync: bool,
    pub fail_erase: bool,
    /// Fail the nth status query (counting from 1) with an I/O error
    pub fail_status_at: Option<usize>,
    pub fail_download: bool,
    pub erase_status: Option<StatusCode>,
    pub reject_download_at: Option<u32>,
    /// Reject the nth send-data call (counting from 1) with a flash failure
    pub reject_block: Option<usize>,
    /// Fail the nth send-data call (counting from 1) with an I/O error
    pub fail_block: Option<usize>,
    pub fail_crc32: bool,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of send-data calls made so far
    pub fn send_data_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::SendData(_)))
            .count()
    }

    /// Flip every bit of the byte stored at `addr`
    pub fn corrupt(&mut self, addr: u32) {
        let byte = self.flash.entry(addr).or_insert(0xFF);
        *byte = !*byte;
    }

    pub fn read(&self, addr: u32, size: u32) -> Vec<u8> {
        (0..size)
            .map(|offset| {
                *self
                    .flash
                    .get(&addr.wrapping_add(offset))
                    .unwrap_or(&0xFF)
            })
            .collect()
    }
}

fn io_failure() -> ConnectionError {
    io::Error::new(io::ErrorKind::BrokenPipe, "serial port disconnected").into()
}

impl Device for FakeDevice {
    fn sync(&mut self) -> Result<(), ConnectionError> {
        self.calls.push(Call::Sync);
        if self.fail_sync {
            return Err(ConnectionError::SyncFailed);
        }

        Ok(())
    }

    fn bank_erase(&mut self) -> Result<(), ConnectionError> {
        self.calls.push(Call::BankErase);
        if self.fail_erase {
            return Err(io_failure());
        }

        self.flash.clear();
        self.status = Some(self.erase_status.unwrap_or(StatusCode::Success));

        Ok(())
    }

    fn get_status(&mut self) -> Result<StatusCode, ConnectionError> {
        self.calls.push(Call::GetStatus);
        let queries = self
            .calls
            .iter()
            .filter(|call| matches!(call, Call::GetStatus))
            .count();
        if self.fail_status_at == Some(queries) {
            return Err(io_failure());
        }

        Ok(self.status.take().unwrap_or(StatusCode::Success))
    }

    fn download(&mut self, addr: u32, size: u32) -> Result<(), ConnectionError> {
        self.calls.push(Call::Download { addr, size });
        if self.fail_download {
            return Err(io_failure());
        }

        self.cursor = addr;
        self.status = Some(if self.reject_download_at == Some(addr) {
            StatusCode::InvalidAddress
        } else {
            StatusCode::Success
        });

        Ok(())
    }

    fn send_data(&mut self, block: &[u8]) -> Result<(), ConnectionError> {
        self.calls.push(Call::SendData(block.len()));
        self.sent_blocks += 1;

        if self.fail_block == Some(self.sent_blocks) {
            return Err(io_failure());
        }
        if self.reject_block == Some(self.sent_blocks) {
            self.status = Some(StatusCode::FlashFailure);
            return Ok(());
        }

        for byte in block {
            self.flash.insert(self.cursor, *byte);
            self.cursor = self.cursor.wrapping_add(1);
        }
        self.status = Some(StatusCode::Success);

        Ok(())
    }

    fn crc32(&mut self, addr: u32, size: u32, repeat: u32) -> Result<u32, ConnectionError> {
        self.calls.push(Call::Crc32 { addr, size, repeat });
        if self.fail_crc32 {
            return Err(io_failure());
        }

        let data = self.read(addr, size);
        let mut hasher = crc32fast::Hasher::new();
        for _ in 0..=repeat {
            hasher.update(&data);
        }

        Ok(hasher.finalize())
    }

    fn reset(&mut self) -> Result<(), ConnectionError> {
        self.calls.push(Call::Reset);

        Ok(())
    }
}

/// Records every progress callback
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub inits: Vec<(u32, usize)>,
    pub updates: Vec<usize>,
    pub finishes: Vec<bool>,
}

impl ProgressCallbacks for RecordingProgress {
    fn init(&mut self, addr: u32, total: usize) {
        self.inits.push((addr, total));
    }

    fn update(&mut self, current: usize) {
        self.updates.push(current);
    }

    fn finish(&mut self, skipped: bool) {
        self.finishes.push(skipped);
    }
}

const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;

/// A program header for [build_elf32]
pub struct ElfSegment {
    pub kind: u32,
    pub paddr: u32,
    pub align: u32,
    pub data: Vec<u8>,
    /// Size in memory, if larger than the file contents
    pub mem_size: Option<u32>,
}

impl ElfSegment {
    pub fn load(paddr: u32, data: &[u8]) -> Self {
        ElfSegment {
            kind: PT_LOAD,
            paddr,
            align: 4,
            data: data.to_vec(),
            mem_size: None,
        }
    }

    pub fn note(data: &[u8]) -> Self {
        ElfSegment {
            kind: PT_NOTE,
            paddr: 0,
            align: 4,
            data: data.to_vec(),
            mem_size: None,
        }
    }

    pub fn with_align(mut self, align: u32) -> Self {
        self.align = align;
        self
    }
}

/// Assemble a little-endian ELF32 ARM executable with the given program
/// headers and no section headers
pub fn build_elf32(entry: u32, segments: &[ElfSegment]) -> Vec<u8> {
    const EHSIZE: u32 = 52;
    const PHENTSIZE: u32 = 32;

    let mut out = Vec::new();
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out.extend_from_slice(&40u16.to_le_bytes()); // EM_ARM
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&EHSIZE.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0x0500_0000u32.to_le_bytes());
    out.extend_from_slice(&(EHSIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHENTSIZE as u16).to_le_bytes());
    out.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    out.extend_from_slice(&40u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    assert_eq!(out.len(), EHSIZE as usize);

    let mut offset = EHSIZE + PHENTSIZE * segments.len() as u32;
    for segment in segments {
        let file_size = segment.data.len() as u32;
        for field in [
            segment.kind,
            offset,
            segment.paddr, // p_vaddr
            segment.paddr,
            file_size,
            segment.mem_size.unwrap_or(file_size),
            5, // PF_R | PF_X
            segment.align,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        offset += file_size;
    }

    for segment in segments {
        out.extend_from_slice(&segment.data);
    }

    out
}

/// `len` bytes of a repeating, recognizable pattern
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
