//! Configuration store backends.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use thiserror_no_std::Error;

use super::ConfigStore;

/// Errors from the configuration store backends
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromError {
    #[error("I2C error talking to the EEPROM: {0:?}")]
    Bus(ErrorKind),

    #[error("access of {len} bytes at {offset} is outside the EEPROM")]
    OutOfRange { offset: u16, len: usize },
}

fn check_range(offset: u16, len: usize, size: usize) -> Result<(), EepromError> {
    if offset as usize + len > size {
        return Err(EepromError::OutOfRange { offset, len });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A RAM-backed configuration store that starts fully erased (0xFF).
pub struct RamEeprom<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> RamEeprom<N> {
    pub const fn new() -> Self {
        Self { bytes: [0xFF; N] }
    }

    /// Wraps an existing memory image.
    pub const fn from_image(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    pub fn image(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> Default for RamEeprom<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ConfigStore for RamEeprom<N> {
    type Error = EepromError;

    fn read_block(&mut self, offset: u16, buffer: &mut [u8]) -> Result<(), EepromError> {
        check_range(offset, buffer.len(), N)?;
        let start = offset as usize;
        buffer.copy_from_slice(&self.bytes[start..start + buffer.len()]);
        Ok(())
    }

    fn write_block(&mut self, offset: u16, bytes: &[u8]) -> Result<(), EepromError> {
        check_range(offset, bytes.len(), N)?;
        let start = offset as usize;
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// I2C EEPROM (24LC08 class)
// ---------------------------------------------------------------------------

/// Base 7-bit address; the upper address bits select the 256-byte block.
const BASE_ADDRESS: u8 = 0x50;
const BLOCK_SIZE: usize = 256;
const PAGE_SIZE: usize = 16;
const DEVICE_SIZE: usize = 1024;
/// Worst-case internal write cycle
const WRITE_CYCLE_MS: u32 = 5;

/// A 1 KiB I2C EEPROM addressed in four 256-byte blocks.
///
/// Writes are split on 16-byte page boundaries and each page waits out the
/// device write cycle before the next transfer.
pub struct I2cEeprom<I, D> {
    i2c: I,
    delay: D,
}

impl<I: I2c, D: DelayNs> I2cEeprom<I, D> {
    pub fn new(i2c: I, delay: D) -> Self {
        Self { i2c, delay }
    }

    /// Releases the bus and delay.
    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    fn device_address(offset: usize) -> u8 {
        BASE_ADDRESS | ((offset / BLOCK_SIZE) as u8 & 0x03)
    }
}

impl<I: I2c, D: DelayNs> ConfigStore for I2cEeprom<I, D> {
    type Error = EepromError;

    fn read_block(&mut self, offset: u16, buffer: &mut [u8]) -> Result<(), EepromError> {
        check_range(offset, buffer.len(), DEVICE_SIZE)?;

        let mut position = offset as usize;
        let mut done = 0;
        while done < buffer.len() {
            // Sequential reads do not cross into the next block address
            let chunk = (BLOCK_SIZE - position % BLOCK_SIZE).min(buffer.len() - done);
            self.i2c
                .write_read(
                    Self::device_address(position),
                    &[(position % BLOCK_SIZE) as u8],
                    &mut buffer[done..done + chunk],
                )
                .map_err(|e| {
                    log::error!("EEPROM read at {} failed: {:?}", position, e.kind());
                    EepromError::Bus(e.kind())
                })?;
            position += chunk;
            done += chunk;
        }
        Ok(())
    }

    fn write_block(&mut self, offset: u16, bytes: &[u8]) -> Result<(), EepromError> {
        check_range(offset, bytes.len(), DEVICE_SIZE)?;

        let mut position = offset as usize;
        let mut done = 0;
        let mut frame = [0u8; PAGE_SIZE + 1];
        while done < bytes.len() {
            let chunk = (PAGE_SIZE - position % PAGE_SIZE).min(bytes.len() - done);
            frame[0] = (position % BLOCK_SIZE) as u8;
            frame[1..=chunk].copy_from_slice(&bytes[done..done + chunk]);
            self.i2c
                .write(Self::device_address(position), &frame[..=chunk])
                .map_err(|e| {
                    log::error!("EEPROM write at {} failed: {:?}", position, e.kind());
                    EepromError::Bus(e.kind())
                })?;
            self.delay.delay_ms(WRITE_CYCLE_MS);
            position += chunk;
            done += chunk;
        }
        Ok(())
    }
}
