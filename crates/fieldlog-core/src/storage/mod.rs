//! Measurement log storage.
//!
//! The controller writes CSV lines through [`MeasurementLog`], which owns the
//! current folder, file name and header. The byte-level volume access is a
//! [`LogStorage`] backend: [`SdCardLog`] on hardware, or a host directory in
//! the simulator.
//!
//! Files live at `DATA/<folder>/<epoch as 8 hex digits>.CSV`, so every name is
//! a valid FAT 8.3 name and sorts by creation time.

pub mod record;
#[cfg(feature = "storage-sdmmc")]
mod sd_card;

#[cfg(feature = "storage-sdmmc")]
pub use sd_card::*;

use alloc::string::String;
use core::fmt::{Debug, Write};

use log::{error, info, warn};

use crate::error::{DataloggerError, context, describe};

/// Top-level directory holding every log folder
pub const DATA_DIRECTORY: &str = "DATA";

/// Longest FAT 8.3 base name, also the folder name limit
pub const MAX_FOLDER_LEN: usize = 8;

/// Byte-level access to the removable log volume.
pub trait LogStorage {
    type Error: Debug;

    /// Checks the medium and prepares the data directory.
    fn mount(&mut self) -> Result<(), Self::Error>;

    /// Creates `DATA/<folder>/<file_name>` (and its folder), truncating any
    /// existing file, and makes it the current file.
    fn create_file(&mut self, folder: &str, file_name: &str) -> Result<(), Self::Error>;

    /// Appends bytes to the current file.
    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Flushes and releases the current file.
    fn flush_and_close(&mut self) -> Result<(), Self::Error>;

    /// Opens the current file again after [`LogStorage::flush_and_close`].
    fn reopen(&mut self) -> Result<(), Self::Error>;
}

/// File name for a log started at `epoch`.
pub fn log_file_name(epoch: u32) -> heapless::String<12> {
    let mut name = heapless::String::new();
    let _ = write!(name, "{:08X}.CSV", epoch);
    name
}

/// The append-only CSV sink used by the controller.
pub struct MeasurementLog<S> {
    storage: S,
    folder: heapless::String<MAX_FOLDER_LEN>,
    file_name: heapless::String<12>,
    header: String,
    open: bool,
}

impl<S: LogStorage> MeasurementLog<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            folder: heapless::String::new(),
            file_name: heapless::String::new(),
            header: String::new(),
            open: false,
        }
    }

    /// Mounts the medium. Failure here means no data can be kept.
    pub fn mount(&mut self) -> Result<(), DataloggerError> {
        self.storage.mount().map_err(|e| {
            error!("Log storage unavailable: {:?}", e);
            DataloggerError::StorageUnavailable(describe(&e))
        })
    }

    /// Starts a new file in `folder` and writes the header line.
    pub fn start_file(
        &mut self,
        folder: &str,
        epoch: u32,
        header: &str,
    ) -> Result<(), DataloggerError> {
        self.folder = context(folder);
        self.file_name = log_file_name(epoch);
        self.header.clear();
        self.header.push_str(header);
        self.open = false;

        if let Err(e) = self.storage.create_file(&self.folder, &self.file_name) {
            error!("Could not create {}/{}: {:?}", self.folder, self.file_name, e);
            self.file_name.clear();
            return Err(DataloggerError::LogFile(describe(&e)));
        }

        self.open = true;
        if let Err(e) = self.write_line(header) {
            // A file without its header is never appended to again
            self.open = false;
            if let Err(e) = self.storage.flush_and_close() {
                warn!("Releasing {} failed: {:?}", self.file_name, e);
            }
            self.file_name.clear();
            return Err(e);
        }
        info!("Logging to {}/{}/{}", DATA_DIRECTORY, self.folder, self.file_name);
        Ok(())
    }

    /// Appends one line to the current file.
    pub fn write_line(&mut self, line: &str) -> Result<(), DataloggerError> {
        if !self.open {
            return Err(DataloggerError::LogFile(context("no open log file")));
        }
        self.storage
            .append(line.as_bytes())
            .and_then(|_| self.storage.append(b"\n"))
            .map_err(|e| {
                error!("Log write failed: {:?}", e);
                DataloggerError::LogFile(describe(&e))
            })
    }

    /// Flushes and closes the current file before sleep.
    pub fn close(&mut self) -> Result<(), DataloggerError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.storage
            .flush_and_close()
            .map_err(|e| DataloggerError::LogFile(describe(&e)))
    }

    /// Reopens the current file, or starts a fresh one named for `epoch`
    /// when that fails or the last start never completed.
    pub fn reopen_or_rotate(&mut self, epoch: u32) -> Result<(), DataloggerError> {
        if self.file_name.is_empty() {
            if self.folder.is_empty() {
                return Err(DataloggerError::LogFile(context("no log file to reopen")));
            }
            return self.rotate(epoch);
        }
        match self.storage.reopen() {
            Ok(()) => {
                self.open = true;
                Ok(())
            }
            Err(e) => {
                warn!("Reopening {} failed ({:?}), starting a new file", self.file_name, e);
                self.rotate(epoch)
            }
        }
    }

    fn rotate(&mut self, epoch: u32) -> Result<(), DataloggerError> {
        let folder = self.folder.clone();
        let header = core::mem::take(&mut self.header);
        self.start_file(&folder, epoch, &header)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}
