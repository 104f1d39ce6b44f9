//! Commands to work with the ROM serial bootloader

use std::{fmt, io::Write, time::Duration};

use strum::Display;

/// Largest packet the bootloader accepts, including the size and checksum
/// bytes
pub const MAX_PACKET_SIZE: usize = 255;
/// Largest block of data a single SEND_DATA command can carry
pub const MAX_BLOCK_SIZE: usize = MAX_PACKET_SIZE - 3;
/// Largest number of bytes a single MEMORY_READ command can return
pub const MAX_MEMORY_READ_BYTES: u8 = 253;
/// Largest number of words a single MEMORY_READ command can return
pub const MAX_MEMORY_READ_WORDS: u8 = 63;

/// Bytes sent to let the bootloader detect the baud rate
pub(crate) const SYNC_BYTES: [u8; 2] = [0x55, 0x55];

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
const BANK_ERASE_TIMEOUT: Duration = Duration::from_secs(10);
const CRC32_TIMEOUT_PER_MB: Duration = Duration::from_secs(8);

/// Types of commands that can be sent to the bootloader
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[non_exhaustive]
#[repr(u8)]
pub enum CommandType {
    /// Not a packet, the two auto-baud bytes
    Sync = 0x00,
    Ping = 0x20,
    Download = 0x21,
    GetStatus = 0x23,
    SendData = 0x24,
    Reset = 0x25,
    Crc32 = 0x27,
    GetChipId = 0x28,
    MemoryRead = 0x2A,
    BankErase = 0x2C,
    SetCcfg = 0x2D,
}

impl CommandType {
    /// Return the default timeout for the [CommandType] variant
    pub fn timeout(&self) -> Duration {
        match self {
            CommandType::BankErase => BANK_ERASE_TIMEOUT,
            _ => DEFAULT_TIMEOUT,
        }
    }

    /// Return a timeout for the command that scales with the amount of data
    /// the device has to process
    pub fn timeout_for_size(&self, size: u64) -> Duration {
        fn calc_timeout(timeout_per_mb: Duration, size: u64) -> Duration {
            let mb = size as f64 / 1_000_000.0;
            std::cmp::max(
                DEFAULT_TIMEOUT,
                Duration::from_millis((timeout_per_mb.as_millis() as f64 * mb) as u64),
            )
        }
        match self {
            CommandType::Crc32 => calc_timeout(CRC32_TIMEOUT_PER_MB, size),
            _ => self.timeout(),
        }
    }
}

/// Width of the accesses used by a MEMORY_READ command
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryAccess {
    #[default]
    Bytes = 0,
    Words = 1,
}

/// Available commands
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub enum Command<'a> {
    Sync,
    Ping,
    Download {
        address: u32,
        size: u32,
    },
    GetStatus,
    SendData {
        data: &'a [u8],
    },
    Reset,
    Crc32 {
        address: u32,
        size: u32,
        read_repeat: u32,
    },
    GetChipId,
    MemoryRead {
        address: u32,
        access: MemoryAccess,
        count: u8,
    },
    BankErase,
    SetCcfg {
        field: u32,
        value: u32,
    },
}

impl Command<'_> {
    /// Return the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Sync => CommandType::Sync,
            Command::Ping => CommandType::Ping,
            Command::Download { .. } => CommandType::Download,
            Command::GetStatus => CommandType::GetStatus,
            Command::SendData { .. } => CommandType::SendData,
            Command::Reset => CommandType::Reset,
            Command::Crc32 { .. } => CommandType::Crc32,
            Command::GetChipId => CommandType::GetChipId,
            Command::MemoryRead { .. } => CommandType::MemoryRead,
            Command::BankErase => CommandType::BankErase,
            Command::SetCcfg { .. } => CommandType::SetCcfg,
        }
    }

    /// Whether the bootloader answers this command with a response packet
    /// after its ACK
    pub fn has_response(&self) -> bool {
        matches!(
            self,
            Command::GetStatus
                | Command::Crc32 { .. }
                | Command::GetChipId
                | Command::MemoryRead { .. }
        )
    }

    /// Write a command
    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let mut payload = Vec::with_capacity(MAX_PACKET_SIZE);
        payload.push(self.command_type() as u8);

        match *self {
            Command::Sync => {
                writer.write_all(&SYNC_BYTES)?;
                return Ok(());
            }
            Command::Ping
            | Command::GetStatus
            | Command::Reset
            | Command::GetChipId
            | Command::BankErase => {}
            Command::Download { address, size } => {
                payload.extend_from_slice(&address.to_be_bytes());
                payload.extend_from_slice(&size.to_be_bytes());
            }
            Command::SendData { data } => {
                payload.extend_from_slice(data);
            }
            Command::Crc32 {
                address,
                size,
                read_repeat,
            } => {
                payload.extend_from_slice(&address.to_be_bytes());
                payload.extend_from_slice(&size.to_be_bytes());
                payload.extend_from_slice(&read_repeat.to_be_bytes());
            }
            Command::MemoryRead {
                address,
                access,
                count,
            } => {
                payload.extend_from_slice(&address.to_be_bytes());
                payload.push(access as u8);
                payload.push(count);
            }
            Command::SetCcfg { field, value } => {
                payload.extend_from_slice(&field.to_be_bytes());
                payload.extend_from_slice(&value.to_be_bytes());
            }
        }

        write_packet(writer, &payload)
    }
}

/// Outcome of the last command, as reported by GET_STATUS
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatusCode {
    Success,
    UnknownCommand,
    InvalidCommand,
    InvalidAddress,
    FlashFailure,
    Unrecognized(u8),
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Success => write!(f, "COMMAND_RET_SUCCESS"),
            StatusCode::UnknownCommand => write!(f, "COMMAND_RET_UNKNOWN_CMD"),
            StatusCode::InvalidCommand => write!(f, "COMMAND_RET_INVALID_CMD"),
            StatusCode::InvalidAddress => write!(f, "COMMAND_RET_INVALID_ADR"),
            StatusCode::FlashFailure => write!(f, "COMMAND_RET_FLASH_FAIL"),
            StatusCode::Unrecognized(raw) => write!(f, "unrecognized status {raw:#04x}"),
        }
    }
}

impl StatusCode {
    /// The raw value reported by the device
    pub fn raw(self) -> u8 {
        match self {
            StatusCode::Success => 0x40,
            StatusCode::UnknownCommand => 0x41,
            StatusCode::InvalidCommand => 0x42,
            StatusCode::InvalidAddress => 0x43,
            StatusCode::FlashFailure => 0x44,
            StatusCode::Unrecognized(raw) => raw,
        }
    }
}

impl From<u8> for StatusCode {
    fn from(raw: u8) -> Self {
        match raw {
            0x40 => StatusCode::Success,
            0x41 => StatusCode::UnknownCommand,
            0x42 => StatusCode::InvalidCommand,
            0x43 => StatusCode::InvalidAddress,
            0x44 => StatusCode::FlashFailure,
            raw => StatusCode::Unrecognized(raw),
        }
    }
}

/// Additive 8-bit checksum used by every packet
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

fn write_packet<W: Write>(mut writer: W, payload: &[u8]) -> std::io::Result<()> {
    if payload.len() + 2 > MAX_PACKET_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "packet of {} bytes exceeds the {MAX_PACKET_SIZE} byte limit",
                payload.len() + 2
            ),
        ));
    }

    writer.write_all(&[(payload.len() + 2) as u8, checksum(payload)])?;
    writer.write_all(payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn encode(command: Command<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        command.write(&mut buf).unwrap();
        buf
    }

    #[test]
    fn download_is_big_endian() {
        assert_eq!(
            encode(Command::Download {
                address: 0x0000_1000,
                size: 0x0001_0204,
            }),
            vec![0x0B, 0x38, 0x21, 0x00, 0x00, 0x10, 0x00, 0x00, 0x01, 0x02, 0x04]
        );
    }

    #[test]
    fn bare_commands_carry_only_the_opcode() {
        assert_eq!(encode(Command::Ping), vec![0x03, 0x20, 0x20]);
        assert_eq!(encode(Command::GetStatus), vec![0x03, 0x23, 0x23]);
        assert_eq!(encode(Command::BankErase), vec![0x03, 0x2C, 0x2C]);
    }

    #[test]
    fn sync_is_not_a_packet() {
        assert_eq!(encode(Command::Sync), vec![0x55, 0x55]);
    }

    #[test]
    fn crc32_carries_repeat_count() {
        let bytes = encode(Command::Crc32 {
            address: 0,
            size: 4,
            read_repeat: 2,
        });

        assert_eq!(bytes[0], 15);
        assert_eq!(&bytes[2..], &[0x27, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 2]);
        assert_eq!(bytes[1], 0x27 + 4 + 2);
    }

    #[test]
    fn memory_read_encodes_access_width() {
        assert_eq!(
            encode(Command::MemoryRead {
                address: 0x4009_1090,
                access: MemoryAccess::Words,
                count: 1,
            }),
            vec![0x09, 0x15, 0x2A, 0x40, 0x09, 0x10, 0x90, 0x01, 0x01]
        );
    }

    #[test]
    fn checksum_wraps() {
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn full_block_fits_in_a_packet() {
        let data = [0xA5; MAX_BLOCK_SIZE];
        let bytes = encode(Command::SendData { data: &data });

        assert_eq!(bytes.len(), MAX_PACKET_SIZE);
        assert_eq!(bytes[0] as usize, MAX_PACKET_SIZE);
    }

    #[test]
    fn oversized_block_is_rejected() {
        let data = [0u8; MAX_BLOCK_SIZE + 1];
        let mut buf = Vec::new();
        let err = Command::SendData { data: &data }.write(&mut buf).unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[test]
    fn status_codes_round_trip_through_raw_values() {
        for raw in 0x3Fu8..=0x45 {
            assert_eq!(StatusCode::from(raw).raw(), raw);
        }
        assert_eq!(StatusCode::from(0x40), StatusCode::Success);
        assert_eq!(StatusCode::from(0x44).to_string(), "COMMAND_RET_FLASH_FAIL");
    }
}
