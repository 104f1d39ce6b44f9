//! Write a firmware image to a target device
//!
//! The [Flasher] struct drives a [Device] through the steps needed to put an
//! image into flash: a full chip erase, then a download and a series of data
//! blocks for every segment, with the device status checked after each
//! command. It can then compare the flash contents against the image by
//! having the device compute a CRC-32 over each segment.

use log::{debug, info, warn};

pub use self::device::Device;
use crate::{
    command::{StatusCode, MAX_BLOCK_SIZE},
    elf::{FirmwareImage, Segment},
    error::{ConnectionError, Error, TransferError, VerifyError},
};

mod device;

/// Progress update callbacks
pub trait ProgressCallbacks {
    /// Initialize some progress report
    fn init(&mut self, addr: u32, total: usize);
    /// Update some progress report
    fn update(&mut self, current: usize);
    /// Finish some progress report
    fn finish(&mut self, skipped: bool);
}

/// An empty implementation of [ProgressCallbacks] that does nothing
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultProgressCallback;

impl ProgressCallbacks for DefaultProgressCallback {
    fn init(&mut self, _addr: u32, _total: usize) {}
    fn update(&mut self, _current: usize) {}
    fn finish(&mut self, _skipped: bool) {}
}

/// Connect to and flash a target device
#[derive(Debug)]
pub struct Flasher<D> {
    device: D,
}

impl<D: Device> Flasher<D> {
    pub fn new(device: D) -> Self {
        Flasher { device }
    }

    /// The device being flashed
    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Synchronize with the bootloader
    pub fn sync(&mut self) -> Result<(), Error> {
        debug!("Synchronizing");
        self.device.sync()?;
        debug!("Synchronization success");

        Ok(())
    }

    /// Reset the device, starting the flashed application
    pub fn reset(&mut self) -> Result<(), Error> {
        debug!("Resetting device");
        self.device.reset()?;

        Ok(())
    }

    /// Erase the whole flash of the device
    pub fn erase_flash(&mut self) -> Result<(), TransferError> {
        info!("Mass erasing chip");
        self.device.bank_erase()?;

        match self.status()? {
            StatusCode::Success => Ok(()),
            status => Err(TransferError::EraseRejected(status)),
        }
    }

    /// Erase the flash and write every segment which lies within it
    ///
    /// Segments starting beyond the flash area are skipped without touching
    /// the device. The first failure aborts the whole operation, leaving the
    /// remaining segments unwritten.
    pub fn flash<'s, I>(
        &mut self,
        segments: I,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), TransferError>
    where
        I: IntoIterator<Item = Segment<'s>>,
    {
        self.erase_flash()?;

        for segment in segments {
            if !segment.is_flash() {
                info!(
                    "Skipping segment at {:#010x}, it starts after the flash area",
                    segment.addr
                );
                progress.init(segment.addr, 0);
                progress.finish(true);
                continue;
            }

            self.write_segment(&segment, progress)?;
        }

        info!("Flash done");

        Ok(())
    }

    fn write_segment(
        &mut self,
        segment: &Segment<'_>,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), TransferError> {
        let addr = segment.addr;
        let size = segment.size;

        info!(
            "Flashing segment at {:#010x} of size {} and alignment {}",
            addr, size, segment.align
        );

        if !segment.is_aligned() {
            warn!(
                "Segment at {:#010x} is {} bytes long, which is not a multiple of its alignment {}",
                addr, size, segment.align
            );
        }

        debug!("Sending Download for {} bytes at {:#010x}", size, addr);
        self.device.download(addr, size)?;

        match self.status()? {
            StatusCode::Success => {}
            status => return Err(TransferError::DownloadRejected { addr, size, status }),
        }

        let block_size = self.device.max_block_size().clamp(1, MAX_BLOCK_SIZE);
        let chunks = segment.data.chunks(block_size);
        progress.init(addr, chunks.len());

        for (i, block) in chunks.enumerate() {
            self.device.send_data(block)?;

            match self.status()? {
                StatusCode::Success => {}
                status => {
                    return Err(TransferError::BlockRejected {
                        addr,
                        block: i,
                        status,
                    })
                }
            }

            progress.update(i + 1);
        }

        progress.finish(false);

        Ok(())
    }

    /// Compare the flash contents with the segments of an image
    ///
    /// Returns `Ok(false)` as soon as one segment's checksum differs; later
    /// segments are not checked. A `repeat` above zero makes the device read
    /// every range `repeat` extra times, and the host checksum covers the
    /// same number of copies of the data. That mode is experimental.
    pub fn verify<'s, I>(&mut self, segments: I, repeat: u32) -> Result<bool, VerifyError>
    where
        I: IntoIterator<Item = Segment<'s>>,
    {
        if repeat > 0 {
            warn!(
                "Checksum repetition is experimental, verifying with {} extra read passes",
                repeat
            );
        }

        for segment in segments {
            if !segment.is_flash() {
                info!(
                    "Skipping segment at {:#010x}, it starts after the flash area",
                    segment.addr
                );
                continue;
            }

            info!(
                "Checking segment at {:#010x} of size {}",
                segment.addr, segment.size
            );

            debug!(
                "Sending CRC32 for {} bytes at {:#010x} with {} read repeats",
                segment.size, segment.addr, repeat
            );
            let target_crc = self.device.crc32(segment.addr, segment.size, repeat)?;
            let host_crc = checksum_crc32(&segment.data, repeat);

            debug!("Target CRC32 ({}): {:#010x}", repeat, target_crc);
            debug!("Host CRC32 ({}): {:#010x}", repeat, host_crc);

            if target_crc != host_crc {
                info!("Verification failed at segment {:#010x}", segment.addr);
                return Ok(false);
            }
        }

        info!("Verification succeeded");

        Ok(true)
    }

    /// Synchronize, write the image, verify it and reset the device
    ///
    /// Each step only runs if the previous one succeeded. A mismatch during
    /// verification is reported as [Error::VerifyFailed] and the device is
    /// left in the bootloader.
    pub fn program(
        &mut self,
        image: &FirmwareImage<'_>,
        progress: &mut dyn ProgressCallbacks,
    ) -> Result<(), Error> {
        self.sync()?;
        self.flash(image.segments(), progress)?;

        if !self.verify(image.segments(), 0)? {
            return Err(Error::VerifyFailed);
        }

        self.reset()
    }

    fn status(&mut self) -> Result<StatusCode, ConnectionError> {
        let status = self.device.get_status()?;
        debug!("Status: {}", status);

        Ok(status)
    }
}

/// CRC-32 (IEEE) of `repeat + 1` back to back copies of `data`
pub fn checksum_crc32(data: &[u8], repeat: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for _ in 0..=repeat {
        hasher.update(data);
    }

    hasher.finalize()
}
