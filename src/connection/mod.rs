//! Establish a connection with a target device
//!
//! The [Connection] struct abstracts over the serial connection and the
//! sending/decoding of bootloader packets, and provides the higher-level
//! operations used by the [Flasher](crate::Flasher) through the [Device]
//! trait.

use std::{
    io::{Read, Write},
    time::Duration,
};

use log::debug;
use serialport::{ClearBuffer, SerialPort};

use crate::{
    command::{
        checksum, Command, CommandType, MemoryAccess, StatusCode, MAX_BLOCK_SIZE,
        MAX_MEMORY_READ_BYTES, MAX_MEMORY_READ_WORDS,
    },
    error::{ConnectionError, ResultExt},
    flasher::Device,
};

const ACK: u8 = 0xCC;
const NACK: u8 = 0x33;

/// A byte stream to the bootloader with a configurable read timeout
pub trait Interface: Read + Write {
    /// Current read timeout
    fn timeout(&self) -> Duration;

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ConnectionError>;

    /// Drop any bytes received but not yet read
    fn clear_input(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

impl Interface for Box<dyn SerialPort> {
    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        (**self).set_timeout(timeout)?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), ConnectionError> {
        (**self).clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// An established connection with a target device
pub struct Connection<I = Box<dyn SerialPort>> {
    serial: I,
}

impl<I: Interface> Connection<I> {
    pub fn new(serial: I) -> Self {
        Connection { serial }
    }

    /// Turn the connection back into the underlying interface
    pub fn into_interface(self) -> I {
        self.serial
    }

    /// Run a command with a timeout defined by the command type
    pub fn with_timeout<T, F>(&mut self, timeout: Duration, mut f: F) -> Result<T, ConnectionError>
    where
        F: FnMut(&mut Connection<I>) -> Result<T, ConnectionError>,
    {
        let old_timeout = self.serial.timeout();
        self.serial.set_timeout(timeout)?;

        let result = f(self);

        self.serial.set_timeout(old_timeout)?;

        result
    }

    /// Write a command to the serial port
    pub fn write_command(&mut self, command: Command<'_>) -> Result<(), ConnectionError> {
        debug!("Writing command: {:?}", command.command_type());

        self.serial.clear_input()?;
        command.write(&mut self.serial)?;
        self.serial.flush()?;

        Ok(())
    }

    /// Wait for the device to acknowledge the last packet
    pub fn read_ack(&mut self, command: CommandType) -> Result<(), ConnectionError> {
        loop {
            match self.read_byte()? {
                0x00 => continue,
                ACK => return Ok(()),
                NACK => return Err(ConnectionError::Nack(command)),
                byte => return Err(ConnectionError::InvalidAck { command, byte }),
            }
        }
    }

    /// Read a response packet from the device and acknowledge it
    ///
    /// A packet with a bad checksum is answered with a NACK and reported as an
    /// error.
    pub fn read_response(&mut self, command: CommandType) -> Result<Vec<u8>, ConnectionError> {
        let size = loop {
            match self.read_byte()? {
                0x00 => continue,
                size => break size as usize,
            }
        };
        if size < 2 {
            return Err(ConnectionError::InvalidResponse {
                command,
                expected: 2,
                got: size,
            });
        }

        let expected = self.read_byte()?;
        let mut data = vec![0; size - 2];
        self.serial.read_exact(&mut data)?;

        let received = checksum(&data);
        if received != expected {
            self.serial.write_all(&[0x00, NACK])?;
            self.serial.flush()?;
            return Err(ConnectionError::ResponseChecksum {
                command,
                expected,
                received,
            });
        }

        self.serial.write_all(&[0x00, ACK])?;
        self.serial.flush()?;

        Ok(data)
    }

    /// Write a command and read its acknowledgement and response, if any
    pub fn command(&mut self, command: Command<'_>) -> Result<Vec<u8>, ConnectionError> {
        let ty = command.command_type();
        let timeout = match command {
            Command::Crc32 {
                size, read_repeat, ..
            } => ty.timeout_for_size(size as u64 * (read_repeat as u64 + 1)),
            _ => ty.timeout(),
        };

        self.with_timeout(timeout, |connection| {
            connection.write_command(command)?;
            connection.read_ack(ty)?;

            if command.has_response() {
                connection.read_response(ty)
            } else {
                Ok(Vec::new())
            }
        })
        .for_command(ty)
    }

    /// Send the auto-baud bytes and wait for the bootloader to acknowledge
    pub fn sync(&mut self) -> Result<(), ConnectionError> {
        match self.command(Command::Sync) {
            Ok(_) => Ok(()),
            Err(err @ ConnectionError::Io(_)) | Err(err @ ConnectionError::Serial(_)) => Err(err),
            Err(err) => {
                debug!("Sync failed: {}", err);
                Err(ConnectionError::SyncFailed)
            }
        }
    }

    pub fn ping(&mut self) -> Result<(), ConnectionError> {
        self.command(Command::Ping)?;
        Ok(())
    }

    pub fn get_status(&mut self) -> Result<StatusCode, ConnectionError> {
        let data = self.command(Command::GetStatus)?;
        let [status] = expect_len::<1>(CommandType::GetStatus, &data)?;

        Ok(StatusCode::from(status))
    }

    pub fn get_chip_id(&mut self) -> Result<u32, ConnectionError> {
        let data = self.command(Command::GetChipId)?;

        Ok(u32::from_be_bytes(expect_len(CommandType::GetChipId, &data)?))
    }

    pub fn bank_erase(&mut self) -> Result<(), ConnectionError> {
        self.command(Command::BankErase)?;
        Ok(())
    }

    pub fn download(&mut self, address: u32, size: u32) -> Result<(), ConnectionError> {
        self.command(Command::Download { address, size })?;
        Ok(())
    }

    pub fn send_data(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        if data.len() > MAX_BLOCK_SIZE {
            return Err(ConnectionError::OversizedBlock(data.len()));
        }

        self.command(Command::SendData { data })?;
        Ok(())
    }

    pub fn crc32(
        &mut self,
        address: u32,
        size: u32,
        read_repeat: u32,
    ) -> Result<u32, ConnectionError> {
        let data = self.command(Command::Crc32 {
            address,
            size,
            read_repeat,
        })?;

        Ok(u32::from_be_bytes(expect_len(CommandType::Crc32, &data)?))
    }

    /// Read `count` bytes or words of device memory starting at `address`
    ///
    /// Words are returned in the order the device sends them.
    pub fn memory_read(
        &mut self,
        address: u32,
        access: MemoryAccess,
        count: u8,
    ) -> Result<Vec<u8>, ConnectionError> {
        let (max, width) = match access {
            MemoryAccess::Bytes => (MAX_MEMORY_READ_BYTES, 1),
            MemoryAccess::Words => (MAX_MEMORY_READ_WORDS, 4),
        };
        if count > max {
            return Err(ConnectionError::OversizedRead { count, max });
        }

        let data = self.command(Command::MemoryRead {
            address,
            access,
            count,
        })?;

        let expected = count as usize * width;
        if data.len() != expected {
            return Err(ConnectionError::InvalidResponse {
                command: CommandType::MemoryRead,
                expected,
                got: data.len(),
            });
        }

        Ok(data)
    }

    pub fn set_ccfg(&mut self, field: u32, value: u32) -> Result<(), ConnectionError> {
        self.command(Command::SetCcfg { field, value })?;
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), ConnectionError> {
        self.command(Command::Reset)?;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, ConnectionError> {
        let mut byte = [0u8];
        self.serial.read_exact(&mut byte)?;

        Ok(byte[0])
    }
}

fn expect_len<const N: usize>(command: CommandType, data: &[u8]) -> Result<[u8; N], ConnectionError> {
    data.try_into()
        .map_err(|_| ConnectionError::InvalidResponse {
            command,
            expected: N,
            got: data.len(),
        })
}

impl<I: Interface> Device for Connection<I> {
    fn sync(&mut self) -> Result<(), ConnectionError> {
        Connection::sync(self)
    }

    fn bank_erase(&mut self) -> Result<(), ConnectionError> {
        Connection::bank_erase(self)
    }

    fn get_status(&mut self) -> Result<StatusCode, ConnectionError> {
        Connection::get_status(self)
    }

    fn download(&mut self, addr: u32, size: u32) -> Result<(), ConnectionError> {
        Connection::download(self, addr, size)
    }

    fn send_data(&mut self, block: &[u8]) -> Result<(), ConnectionError> {
        Connection::send_data(self, block)
    }

    fn crc32(&mut self, addr: u32, size: u32, repeat: u32) -> Result<u32, ConnectionError> {
        Connection::crc32(self, addr, size, repeat)
    }

    fn reset(&mut self) -> Result<(), ConnectionError> {
        Connection::reset(self)
    }
}
