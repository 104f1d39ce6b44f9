//! Library and application errors

use std::{
    fmt::{Display, Formatter},
    io,
};

use miette::Diagnostic;
use thiserror::Error;

use crate::command::{CommandType, StatusCode};

/// All possible errors returned by ccflash
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Error while communicating with the device")]
    #[diagnostic(transparent)]
    Connection(#[source] ConnectionError),

    #[error("Failed to write the image to flash")]
    #[diagnostic(transparent)]
    Transfer(#[from] TransferError),

    #[error("Failed to verify the flash contents")]
    #[diagnostic(transparent)]
    Verify(#[from] VerifyError),

    #[error("Verification of flash content failed")]
    #[diagnostic(
        code(ccflash::verify_failed),
        help("The device checksum does not match the image, try flashing the image again")
    )]
    VerifyFailed,

    #[error("Device rejected the {command} command with {status}")]
    #[diagnostic(code(ccflash::rejected))]
    Rejected {
        command: CommandType,
        status: StatusCode,
    },

    #[error("Supplied ELF image is not valid")]
    #[diagnostic(
        code(ccflash::invalid_elf),
        help("Make sure the path points to the ELF file produced by the linker, not a .bin or .hex file")
    )]
    InvalidElf(#[from] ElfError),

    #[error("Failed to open file: {0}")]
    #[diagnostic(code(ccflash::file_open))]
    FileOpenError(String, #[source] io::Error),

    #[error("No serial port was specified")]
    #[diagnostic(
        code(ccflash::no_serial),
        help("Pass the port with `--port`, set `CCFLASH_PORT`, or add `[connection] serial` to ccflash.toml")
    )]
    NoSerial,

    #[error("The serial port '{0}' could not be opened")]
    #[diagnostic(
        code(ccflash::serial_not_found),
        help("Make sure the correct device is connected to the host system")
    )]
    SerialNotFound(String),

    #[error("Failed to load configuration file '{0}'")]
    #[diagnostic(code(ccflash::config))]
    InvalidConfig(String, #[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Self::Connection(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Connection(err.into())
    }
}

#[cfg(feature = "serialport")]
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Self::Connection(err.into())
    }
}

/// Failures while erasing and writing an image
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum TransferError {
    #[error("Bank erase was rejected by the device: {0}")]
    #[diagnostic(
        code(ccflash::erase_rejected),
        help("The flash may be write protected, check the CCFG protection bits")
    )]
    EraseRejected(StatusCode),

    #[error("Download of {size} bytes at {addr:#010x} was rejected by the device: {status}")]
    #[diagnostic(
        code(ccflash::download_rejected),
        help("Make sure the image is linked for this device's flash layout")
    )]
    DownloadRejected {
        addr: u32,
        size: u32,
        status: StatusCode,
    },

    #[error("Data block {block} of the segment at {addr:#010x} was rejected by the device: {status}")]
    #[diagnostic(code(ccflash::block_rejected))]
    BlockRejected {
        addr: u32,
        block: usize,
        status: StatusCode,
    },

    #[error("Communication error while flashing device")]
    #[diagnostic(transparent)]
    CommFailure(#[source] ConnectionError),
}

impl From<ConnectionError> for TransferError {
    fn from(err: ConnectionError) -> Self {
        Self::CommFailure(err)
    }
}

/// Failures while comparing flash contents against an image
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum VerifyError {
    #[error("Communication error while verifying device")]
    #[diagnostic(transparent)]
    CommFailure(#[source] ConnectionError),
}

impl From<ConnectionError> for VerifyError {
    fn from(err: ConnectionError) -> Self {
        Self::CommFailure(err)
    }
}

/// Connection-related errors
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("Failed to synchronize with the bootloader")]
    #[diagnostic(
        code(ccflash::sync_failed),
        help("Ensure that the device is connected and held in bootloader mode while it resets")
    )]
    SyncFailed,

    #[error("The bootloader did not acknowledge the {0} command")]
    #[diagnostic(
        code(ccflash::nack),
        help("The packet was corrupted on the way to the device, or the command is not supported")
    )]
    Nack(CommandType),

    #[error("Unexpected byte {byte:#04x} while waiting for the acknowledgement of the {command} command")]
    #[diagnostic(code(ccflash::invalid_ack))]
    InvalidAck { command: CommandType, byte: u8 },

    #[error("Response to the {command} command has an invalid checksum, expected {expected:#04x} but received {received:#04x}")]
    #[diagnostic(code(ccflash::response_checksum))]
    ResponseChecksum {
        command: CommandType,
        expected: u8,
        received: u8,
    },

    #[error("Invalid response length for the {command} command, expected {expected} bytes, got {got}")]
    #[diagnostic(code(ccflash::invalid_response))]
    InvalidResponse {
        command: CommandType,
        expected: usize,
        got: usize,
    },

    #[error("Data block of {0} bytes is larger than the {max} bytes a packet can carry", max = crate::command::MAX_BLOCK_SIZE)]
    #[diagnostic(code(ccflash::oversized_block))]
    OversizedBlock(usize),

    #[error("Memory read of {count} units is larger than the {max} units a response can carry")]
    #[diagnostic(code(ccflash::oversized_read))]
    OversizedRead { count: u8, max: u8 },

    #[error("Timeout while running {0}command")]
    #[diagnostic(code(ccflash::timeout))]
    Timeout(TimedOutCommand),

    #[error("IO error while using serial port: {0}")]
    #[diagnostic(code(ccflash::io))]
    Io(#[source] io::Error),

    #[cfg(feature = "serialport")]
    #[error("IO error while using serial port: {0}")]
    #[diagnostic(code(ccflash::serial_error))]
    Serial(#[source] serialport::Error),
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => ConnectionError::Timeout(TimedOutCommand::default()),
            _ => ConnectionError::Io(err),
        }
    }
}

#[cfg(feature = "serialport")]
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
impl From<serialport::Error> for ConnectionError {
    fn from(err: serialport::Error) -> Self {
        use serialport::ErrorKind;

        match err.kind() {
            ErrorKind::Io(io::ErrorKind::TimedOut) => {
                ConnectionError::Timeout(TimedOutCommand::default())
            }
            _ => ConnectionError::Serial(err),
        }
    }
}

/// An executed command which has timed out
#[derive(Clone, Debug, Default)]
pub struct TimedOutCommand {
    command: Option<CommandType>,
}

impl Display for TimedOutCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.command {
            Some(command) => write!(f, "{} ", command),
            None => Ok(()),
        }
    }
}

impl From<CommandType> for TimedOutCommand {
    fn from(ct: CommandType) -> Self {
        TimedOutCommand { command: Some(ct) }
    }
}

/// Invalid ELF file error
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ElfError(&'static str);

impl From<&'static str> for ElfError {
    fn from(err: &'static str) -> Self {
        ElfError(err)
    }
}

pub(crate) trait ResultExt {
    /// Mark the command from which this error originates
    fn for_command(self, command: CommandType) -> Self;
}

impl<T> ResultExt for Result<T, ConnectionError> {
    fn for_command(self, command: CommandType) -> Self {
        match self {
            Err(ConnectionError::Timeout(_)) => Err(ConnectionError::Timeout(command.into())),
            res => res,
        }
    }
}
