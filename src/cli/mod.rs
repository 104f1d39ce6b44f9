//! CLI utilities used by the ccflash binary
//!
//! No stability guaranties apply

use std::{
    fs,
    num::ParseIntError,
    path::Path,
    time::Duration,
};

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use miette::{Result, WrapErr};
use serialport::{DataBits, FlowControl, Parity, StopBits};

use self::config::Config;
use crate::{
    connection::Connection,
    error::Error,
    flasher::{Flasher, ProgressCallbacks},
    FirmwareImage,
};

pub mod config;

/// Establish a connection with a target device
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct ConnectArgs {
    /// Serial port connected to target device
    #[arg(short = 'p', long, env = "CCFLASH_PORT")]
    pub port: Option<String>,
    /// Baud rate at which to communicate with target device
    #[arg(short = 's', long)]
    pub speed: Option<u32>,
    /// Serial read timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Open the serial port and wrap it in a [Flasher]
///
/// Command-line arguments take precedence over the configuration file.
pub fn connect(args: &ConnectArgs, config: &Config) -> Result<Flasher<Connection>> {
    let port = args
        .port
        .clone()
        .or_else(|| config.connection.serial.clone())
        .ok_or(Error::NoSerial)?;
    let baud = args.speed.unwrap_or_else(|| config.baudrate());
    let timeout = args
        .timeout
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.timeout());

    info!("Serial port: '{}' at {} baud", port, baud);
    debug!("Read timeout: {:?}", timeout);

    let serial = serialport::new(&port, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|err| match err.kind() {
            serialport::ErrorKind::NoDevice
            | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                Error::SerialNotFound(port.clone())
            }
            _ => Error::from(err),
        })
        .wrap_err_with(|| format!("Failed to open serial port {port}"))?;

    Ok(Flasher::new(Connection::new(serial)))
}

/// Read an ELF image from disk
pub fn read_image(path: &Path) -> Result<Vec<u8>> {
    let data =
        fs::read(path).map_err(|err| Error::FileOpenError(path.display().to_string(), err))?;

    Ok(data)
}

/// Parse an ELF image, reporting the file it came from on failure
pub fn parse_image<'a>(path: &Path, data: &'a [u8]) -> Result<FirmwareImage<'a>> {
    let image = FirmwareImage::from_data(data)
        .map_err(Error::from)
        .wrap_err_with(|| format!("Failed to parse image {}", path.display()))?;

    debug!("Image entry point: {:#010x}", image.entry());

    Ok(image)
}

/// Print the terminal outcome line of a flashing workflow
///
/// `SUCCESS` or `FAILURE` is written to stdout, and the error, if any, is
/// passed on so the process exits with a non-zero status.
pub fn report_outcome(result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            println!("SUCCESS");
            Ok(())
        }
        Err(err) => {
            println!("FAILURE");
            Err(err)
        }
    }
}

/// Parse an integer given in decimal or, with a `0x` prefix, in hexadecimal
pub fn parse_u32(input: &str) -> Result<u32, ParseIntError> {
    match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    }
}

/// Format memory contents as lines of 16 hex bytes prefixed with their address
pub fn hex_dump(address: u32, data: &[u8]) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(i, line)| {
            let bytes = line
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{:#010x}: {}", address.wrapping_add(i as u32 * 16), bytes)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Progress callback implementations for use in the CLI
#[derive(Default)]
pub struct CcflashProgress {
    pb: Option<ProgressBar>,
}

impl ProgressCallbacks for CcflashProgress {
    /// Initialize the progress bar
    fn init(&mut self, addr: u32, len: usize) {
        let pb = ProgressBar::new(len as u64)
            .with_message(format!("{addr:#010x}"))
            .with_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40}] {pos:>7}/{len:7} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );

        self.pb = Some(pb);
    }

    /// Update the progress bar
    fn update(&mut self, current: usize) {
        if let Some(ref pb) = self.pb {
            pb.set_position(current as u64);
        }
    }

    /// End the progress bar
    fn finish(&mut self, skipped: bool) {
        if let Some(ref pb) = self.pb {
            if skipped {
                pb.finish_with_message(format!("{} (skipped)", pb.message()));
            } else {
                pb.finish();
            }
        }
    }
}
