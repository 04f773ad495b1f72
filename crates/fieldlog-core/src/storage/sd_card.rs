use embedded_sdmmc::{BlockDevice, Directory, Error, Mode, TimeSource, VolumeIdx, VolumeManager};

use super::{DATA_DIRECTORY, LogStorage, MAX_FOLDER_LEN};

/// FAT log storage on an SD card or any other [`BlockDevice`].
///
/// Every operation opens the volume, walks to the file and closes everything
/// again, so a power loss never leaves a file handle open across a write.
/// Appends go through `ReadWriteAppend` and finish with a flush.
pub struct SdCardLog<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    volume_mgr: VolumeManager<D, T, 4, 4, 1>,
    folder: heapless::String<MAX_FOLDER_LEN>,
    file_name: heapless::String<12>,
}

impl<D, T> SdCardLog<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    /// Create a new SD card log over a block device
    pub fn new(block_device: D, time_source: T) -> Self {
        let volume_mgr = VolumeManager::new(block_device, time_source);

        Self {
            volume_mgr,
            folder: heapless::String::new(),
            file_name: heapless::String::new(),
        }
    }

    /// Runs `f` on the current file opened with `mode`.
    fn with_current_file(
        &self,
        mode: Mode,
        f: impl FnOnce(&embedded_sdmmc::File<'_, D, T, 4, 4, 1>) -> Result<(), Error<D::Error>>,
    ) -> Result<(), Error<D::Error>> {
        // Open volume
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;

        // Walk DATA/<folder>
        let root_dir = volume0.open_root_dir()?;
        let data_dir = root_dir.open_dir(DATA_DIRECTORY)?;
        let folder_dir = data_dir.open_dir(self.folder.as_str())?;

        let file = folder_dir.open_file_in_dir(self.file_name.as_str(), mode)?;
        f(&file)?;

        // Explicitly close them to handle errors
        file.close()?;
        folder_dir.close()?;
        data_dir.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(())
    }
}

/// Creates a directory, treating an existing one as success.
fn ensure_dir<D, T>(
    parent: &Directory<'_, D, T, 4, 4, 1>,
    name: &str,
) -> Result<(), Error<D::Error>>
where
    D: BlockDevice,
    T: TimeSource,
{
    match parent.make_dir_in_dir(name) {
        Ok(()) | Err(Error::DirAlreadyExists) => Ok(()),
        Err(e) => Err(e),
    }
}

impl<D, T> LogStorage for SdCardLog<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    type Error = Error<D::Error>;

    fn mount(&mut self) -> Result<(), Self::Error> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        ensure_dir(&root_dir, DATA_DIRECTORY)?;
        root_dir.close()?;
        volume0.close()?;

        log::info!("SD card mounted");
        Ok(())
    }

    fn create_file(&mut self, folder: &str, file_name: &str) -> Result<(), Self::Error> {
        {
            let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
            let root_dir = volume0.open_root_dir()?;
            ensure_dir(&root_dir, DATA_DIRECTORY)?;
            let data_dir = root_dir.open_dir(DATA_DIRECTORY)?;
            ensure_dir(&data_dir, folder)?;
            data_dir.close()?;
            root_dir.close()?;
            volume0.close()?;
        }

        self.folder = crate::error::context(folder);
        self.file_name = crate::error::context(file_name);
        self.with_current_file(Mode::ReadWriteCreateOrTruncate, |_| Ok(()))
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.with_current_file(Mode::ReadWriteAppend, |file| {
            file.write(bytes)?;
            file.flush()
        })
    }

    fn flush_and_close(&mut self) -> Result<(), Self::Error> {
        // Every append already closed the file; nothing is held open.
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), Self::Error> {
        self.with_current_file(Mode::ReadWriteAppend, |_| Ok(()))
    }
}
