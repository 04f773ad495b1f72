//! The configuration EEPROM as a 1 KiB image file on the host.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fieldlog_core::config::{ConfigStore, EEPROM_SIZE, EepromError, RamEeprom};
use log::{info, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("EEPROM image I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Eeprom(EepromError),
}

/// A [`RamEeprom`] mirrored to a file. Every write rewrites the file, so the
/// image survives a restart the way the real EEPROM survives a power cycle.
pub struct FileEeprom {
    path: PathBuf,
    memory: RamEeprom<EEPROM_SIZE>,
}

impl FileEeprom {
    /// Loads `path`, or starts erased when it does not exist yet.
    ///
    /// An image of the wrong size is ignored and replaced on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ImageError> {
        let path = path.into();
        let memory = match fs::read(&path) {
            Ok(bytes) => match <[u8; EEPROM_SIZE]>::try_from(bytes.as_slice()) {
                Ok(image) => {
                    info!("Loaded EEPROM image {}", path.display());
                    RamEeprom::from_image(image)
                }
                Err(_) => {
                    warn!(
                        "{} is {} bytes, expected {}; starting erased",
                        path.display(),
                        bytes.len(),
                        EEPROM_SIZE
                    );
                    RamEeprom::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No EEPROM image at {}, starting erased", path.display());
                RamEeprom::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, memory })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> io::Result<()> {
        fs::write(&self.path, self.memory.image())
    }
}

impl ConfigStore for FileEeprom {
    type Error = ImageError;

    fn read_block(&mut self, offset: u16, buffer: &mut [u8]) -> Result<(), ImageError> {
        self.memory
            .read_block(offset, buffer)
            .map_err(ImageError::Eeprom)
    }

    fn write_block(&mut self, offset: u16, bytes: &[u8]) -> Result<(), ImageError> {
        self.memory
            .write_block(offset, bytes)
            .map_err(ImageError::Eeprom)?;
        self.save()?;
        Ok(())
    }
}
