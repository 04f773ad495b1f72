//! Log storage backends for the host.
//!
//! [`DirectoryLog`] writes the same `DATA/<folder>/<file>` tree the logger
//! writes to its SD card, directly into a host directory. [`ImageBlockDevice`]
//! instead exposes a FAT disk image as an `embedded-sdmmc` block device, so
//! the core's `SdCardLog` runs unchanged.

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, Timelike, Utc};
use embedded_sdmmc::{Block, BlockCount, BlockDevice, BlockIdx, TimeSource, Timestamp};
use fieldlog_core::storage::{DATA_DIRECTORY, LogStorage};
use log::{debug, info};

// ---------------------------------------------------------------------------
// Host directory
// ---------------------------------------------------------------------------

/// Log files in a host directory.
pub struct DirectoryLog {
    root: PathBuf,
    current: Option<PathBuf>,
    file: Option<File>,
}

impl DirectoryLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            current: None,
            file: None,
        }
    }

    /// Path of the file lines are currently appended to.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_deref()
    }
}

impl LogStorage for DirectoryLog {
    type Error = io::Error;

    fn mount(&mut self) -> io::Result<()> {
        let data = self.root.join(DATA_DIRECTORY);
        fs::create_dir_all(&data)?;
        info!("Log directory {}", data.display());
        Ok(())
    }

    fn create_file(&mut self, folder: &str, file_name: &str) -> io::Result<()> {
        let directory = self.root.join(DATA_DIRECTORY).join(folder);
        fs::create_dir_all(&directory)?;

        let path = directory.join(file_name);
        self.file = Some(File::create(&path)?);
        debug!("Created {}", path.display());
        self.current = Some(path);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no open log file"))?;
        file.write_all(bytes)
    }

    fn flush_and_close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    fn reopen(&mut self) -> io::Result<()> {
        let path = self
            .current_path()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no log file to reopen"))?;
        self.file = Some(OpenOptions::new().append(true).open(path)?);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FAT disk image
// ---------------------------------------------------------------------------

/// A pre-formatted FAT disk image file, read and written in 512-byte blocks.
pub struct ImageBlockDevice {
    file: RefCell<File>,
}

impl ImageBlockDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        info!("Using SD card image {}", path.display());
        Ok(Self {
            file: RefCell::new(file),
        })
    }

    fn seek_to(file: &mut File, index: BlockIdx) -> io::Result<()> {
        file.seek(SeekFrom::Start(u64::from(index.0) * Block::LEN as u64))?;
        Ok(())
    }
}

impl BlockDevice for ImageBlockDevice {
    type Error = io::Error;

    fn read(&self, blocks: &mut [Block], start_block_idx: BlockIdx) -> io::Result<()> {
        let mut file = self.file.borrow_mut();
        Self::seek_to(&mut file, start_block_idx)?;
        for block in blocks.iter_mut() {
            file.read_exact(&mut block.contents)?;
        }
        Ok(())
    }

    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> io::Result<()> {
        let mut file = self.file.borrow_mut();
        Self::seek_to(&mut file, start_block_idx)?;
        for block in blocks {
            file.write_all(&block.contents)?;
        }
        file.flush()
    }

    fn num_blocks(&self) -> io::Result<BlockCount> {
        let len = self.file.borrow().metadata()?.len();
        Ok(BlockCount((len / Block::LEN as u64) as u32))
    }
}

/// FAT timestamps from the host clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostTimeSource;

impl TimeSource for HostTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        let now = Utc::now();
        Timestamp {
            year_since_1970: (now.year() - 1970).clamp(0, 255) as u8,
            zero_indexed_month: now.month0() as u8,
            zero_indexed_day: now.day0() as u8,
            hours: now.hour() as u8,
            minutes: now.minute() as u8,
            seconds: now.second() as u8,
        }
    }
}
