use crate::{
    command::{StatusCode, MAX_BLOCK_SIZE},
    error::ConnectionError,
};

/// Operations the ROM bootloader offers for writing and checking flash
///
/// Every method is a single request/response exchange with the device. None
/// of them retry; a failed exchange is returned as a [ConnectionError].
/// Commands which change the state of the device report their outcome only
/// through a following [Device::get_status] call.
pub trait Device {
    /// Let the bootloader detect the baud rate and acknowledge the link
    fn sync(&mut self) -> Result<(), ConnectionError>;

    /// Erase all of the device's flash
    fn bank_erase(&mut self) -> Result<(), ConnectionError>;

    /// Status of the last command the device executed
    fn get_status(&mut self) -> Result<StatusCode, ConnectionError>;

    /// Prepare the device to receive `size` bytes to be written at `addr`
    fn download(&mut self, addr: u32, size: u32) -> Result<(), ConnectionError>;

    /// Send the next block of a download, at most [Device::max_block_size]
    /// bytes long
    fn send_data(&mut self, block: &[u8]) -> Result<(), ConnectionError>;

    /// CRC-32 of `size` bytes of device memory starting at `addr`, with the
    /// range read `repeat` more times after the first pass
    fn crc32(&mut self, addr: u32, size: u32, repeat: u32) -> Result<u32, ConnectionError>;

    /// Reset the device, leaving the bootloader
    fn reset(&mut self) -> Result<(), ConnectionError>;

    /// Largest block [Device::send_data] accepts
    fn max_block_size(&self) -> usize {
        MAX_BLOCK_SIZE
    }
}

impl<D: Device + ?Sized> Device for &mut D {
    fn sync(&mut self) -> Result<(), ConnectionError> {
        (**self).sync()
    }

    fn bank_erase(&mut self) -> Result<(), ConnectionError> {
        (**self).bank_erase()
    }

    fn get_status(&mut self) -> Result<StatusCode, ConnectionError> {
        (**self).get_status()
    }

    fn download(&mut self, addr: u32, size: u32) -> Result<(), ConnectionError> {
        (**self).download(addr, size)
    }

    fn send_data(&mut self, block: &[u8]) -> Result<(), ConnectionError> {
        (**self).send_data(block)
    }

    fn crc32(&mut self, addr: u32, size: u32, repeat: u32) -> Result<u32, ConnectionError> {
        (**self).crc32(addr, size, repeat)
    }

    fn reset(&mut self) -> Result<(), ConnectionError> {
        (**self).reset()
    }

    fn max_block_size(&self) -> usize {
        (**self).max_block_size()
    }
}
