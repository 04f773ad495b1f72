//! Persistent device configuration.
//!
//! The configuration store is a small byte-addressed non-volatile memory
//! (a 1 KiB I2C EEPROM on the logger board). Its layout is fixed:
//!
//! | offset          | length | content                          |
//! |-----------------|--------|----------------------------------|
//! | 100             | 64     | [`DeviceSettings`]               |
//! | 256 + 64 * slot | 64     | sensor slot block, 12 slots      |
//!
//! Settings are loaded once at construction and every setter persists the
//! whole block immediately. Sensor slot blocks are described in
//! [`crate::sensors::slot_config`].

mod eeprom;

pub use eeprom::*;

use core::fmt::Debug;

use heapless::String;

use crate::sensors::slot_config::SLOT_BLOCK_LEN;

/// Total size of the configuration store
pub const EEPROM_SIZE: usize = 1024;

/// Offset of the settings block
pub const SETTINGS_ADDRESS: u16 = 100;

/// Size of the settings block
pub const SETTINGS_LEN: usize = 64;

/// Offset of the first sensor slot block
pub const SENSOR_SLOTS_ADDRESS: u16 = 256;

/// Number of sensor slots the store can hold
pub const TOTAL_SLOTS: u8 = 12;

/// Maximum site name length (a FAT 8.3 directory name)
pub const SITE_NAME_LEN: usize = 8;

/// Maximum number of bursts per measurement cycle
pub const MAX_BURST_NUMBER: u8 = 20;

/// Maximum inter-burst delay in seconds
pub const MAX_INTER_BURST_DELAY: u16 = 300;

/// Mode code written when nothing else is known
pub const DEFAULT_MODE_CODE: u8 = b'i';

/// Byte-range access to the non-volatile configuration memory.
pub trait ConfigStore {
    type Error: Debug;

    /// Fill `buffer` with the bytes starting at `offset`.
    fn read_block(&mut self, offset: u16, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Write `bytes` starting at `offset`.
    fn write_block(&mut self, offset: u16, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Offset of the block belonging to a zero-based sensor slot.
pub const fn slot_address(slot: u8) -> u16 {
    SENSOR_SLOTS_ADDRESS + (slot as u16) * (SLOT_BLOCK_LEN as u16)
}

// ---------------------------------------------------------------------------
// Settings block
// ---------------------------------------------------------------------------

// Field offsets inside the settings block
const MODE_OFFSET: usize = 0;
const SITE_NAME_OFFSET: usize = 1;
const INTERVAL_OFFSET: usize = 9;
const BURST_NUMBER_OFFSET: usize = 11;
const START_UP_DELAY_OFFSET: usize = 12;
const INTER_BURST_DELAY_OFFSET: usize = 14;
const DEPLOYMENT_ID_OFFSET: usize = 16;
const DEPLOYMENT_TIMESTAMP_OFFSET: usize = 32;

/// Device-wide settings persisted in the configuration store.
///
/// Binary format (little-endian, 64 bytes):
/// - mode: 1 byte (ASCII code)
/// - site_name: 8 bytes (zero padded)
/// - interval: 2 bytes (u16, minutes)
/// - burst_number: 1 byte
/// - start_up_delay: 2 bytes (u16, milliseconds)
/// - inter_burst_delay: 2 bytes (u16, seconds)
/// - deployment_identifier: 16 bytes
/// - deployment_timestamp: 4 bytes (u32, epoch seconds)
/// - reserved: 28 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Raw operating mode code, see [`crate::Mode::from_code`]
    pub mode_code: u8,
    /// Site name, also the log folder while deployed
    pub site_name: String<SITE_NAME_LEN>,
    /// Minutes between measurement cycles
    pub interval_minutes: u16,
    /// Bursts per measurement cycle
    pub burst_number: u8,
    /// Settle delay applied at the start of every measurement cycle
    pub start_up_delay_ms: u16,
    /// Pause between bursts of the same cycle
    pub inter_burst_delay_secs: u16,
    /// Opaque id of the current deployment
    pub deployment_identifier: [u8; 16],
    /// Epoch seconds at which the current deployment started
    pub deployment_timestamp: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            mode_code: DEFAULT_MODE_CODE,
            site_name: String::new(),
            interval_minutes: 1,
            burst_number: 1,
            start_up_delay_ms: 0,
            inter_burst_delay_secs: 0,
            deployment_identifier: [0; 16],
            deployment_timestamp: 0,
        }
    }
}

impl DeviceSettings {
    /// Decodes a settings block and applies the defaulting policy.
    pub fn from_bytes(bytes: &[u8; SETTINGS_LEN]) -> Self {
        let mut site_name = String::new();
        let raw_name = &bytes[SITE_NAME_OFFSET..SITE_NAME_OFFSET + SITE_NAME_LEN];
        // Erased memory reads as 0xFF and never forms a valid name
        if raw_name.iter().all(|b| b.is_ascii() && *b != 0xFF) {
            let len = raw_name.iter().position(|b| *b == 0).unwrap_or(SITE_NAME_LEN);
            if let Ok(name) = core::str::from_utf8(&raw_name[..len]) {
                let _ = site_name.push_str(name);
            }
        }

        let mut deployment_identifier = [0u8; 16];
        deployment_identifier
            .copy_from_slice(&bytes[DEPLOYMENT_ID_OFFSET..DEPLOYMENT_ID_OFFSET + 16]);

        let mut settings = Self {
            mode_code: bytes[MODE_OFFSET],
            site_name,
            interval_minutes: read_u16(bytes, INTERVAL_OFFSET),
            burst_number: bytes[BURST_NUMBER_OFFSET],
            start_up_delay_ms: read_u16(bytes, START_UP_DELAY_OFFSET),
            inter_burst_delay_secs: read_u16(bytes, INTER_BURST_DELAY_OFFSET),
            deployment_identifier,
            deployment_timestamp: read_u32(bytes, DEPLOYMENT_TIMESTAMP_OFFSET),
        };
        settings.apply_defaults();
        settings
    }

    /// Encodes the settings block.
    pub fn to_bytes(&self) -> [u8; SETTINGS_LEN] {
        let mut bytes = [0u8; SETTINGS_LEN];

        bytes[MODE_OFFSET] = self.mode_code;
        let name = self.site_name.as_bytes();
        bytes[SITE_NAME_OFFSET..SITE_NAME_OFFSET + name.len()].copy_from_slice(name);
        bytes[INTERVAL_OFFSET..INTERVAL_OFFSET + 2]
            .copy_from_slice(&self.interval_minutes.to_le_bytes());
        bytes[BURST_NUMBER_OFFSET] = self.burst_number;
        bytes[START_UP_DELAY_OFFSET..START_UP_DELAY_OFFSET + 2]
            .copy_from_slice(&self.start_up_delay_ms.to_le_bytes());
        bytes[INTER_BURST_DELAY_OFFSET..INTER_BURST_DELAY_OFFSET + 2]
            .copy_from_slice(&self.inter_burst_delay_secs.to_le_bytes());
        bytes[DEPLOYMENT_ID_OFFSET..DEPLOYMENT_ID_OFFSET + 16]
            .copy_from_slice(&self.deployment_identifier);
        bytes[DEPLOYMENT_TIMESTAMP_OFFSET..DEPLOYMENT_TIMESTAMP_OFFSET + 4]
            .copy_from_slice(&self.deployment_timestamp.to_le_bytes());

        bytes
    }

    /// Normalizes out-of-range values.
    ///
    /// - burst number 0 or above 20 becomes 1
    /// - inter-burst delay above 300 s becomes 0
    /// - interval 0 becomes 1 minute
    pub fn apply_defaults(&mut self) {
        if self.burst_number == 0 || self.burst_number > MAX_BURST_NUMBER {
            log::warn!(
                "Burst number {} out of range, defaulting to 1",
                self.burst_number
            );
            self.burst_number = 1;
        }
        if self.inter_burst_delay_secs > MAX_INTER_BURST_DELAY {
            log::warn!(
                "Inter-burst delay {} s out of range, defaulting to 0",
                self.inter_burst_delay_secs
            );
            self.inter_burst_delay_secs = 0;
        }
        if self.interval_minutes == 0 {
            self.interval_minutes = 1;
        }
    }

    /// Reads and decodes the settings block from the store.
    pub fn load<S: ConfigStore>(store: &mut S) -> Result<Self, S::Error> {
        let mut bytes = [0u8; SETTINGS_LEN];
        store.read_block(SETTINGS_ADDRESS, &mut bytes)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Encodes and writes the settings block to the store.
    pub fn store<S: ConfigStore>(&self, store: &mut S) -> Result<(), S::Error> {
        store.write_block(SETTINGS_ADDRESS, &self.to_bytes())
    }
}

/// Checks a site name for use as a FAT directory and CSV field.
pub fn is_valid_site_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= SITE_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_layout_fits_block() {
        assert!(DEPLOYMENT_TIMESTAMP_OFFSET + 4 <= SETTINGS_LEN);
        assert!(SETTINGS_ADDRESS as usize + SETTINGS_LEN <= SENSOR_SLOTS_ADDRESS as usize);
        assert_eq!(slot_address(TOTAL_SLOTS) as usize, EEPROM_SIZE);
    }

    #[test]
    fn test_settings_serialization() {
        let mut settings = DeviceSettings::default();
        settings.mode_code = b'l';
        settings.site_name = String::try_from("SITE1").unwrap();
        settings.interval_minutes = 15;
        settings.burst_number = 5;
        settings.start_up_delay_ms = 2000;
        settings.inter_burst_delay_secs = 30;
        settings.deployment_identifier = [0xAB; 16];
        settings.deployment_timestamp = 1_700_000_000;

        let decoded = DeviceSettings::from_bytes(&settings.to_bytes());

        assert_eq!(decoded, settings);
    }

    #[test]
    fn test_inter_burst_delay_500_normalized_to_zero() {
        let mut settings = DeviceSettings::default();
        settings.inter_burst_delay_secs = 500;

        let decoded = DeviceSettings::from_bytes(&settings.to_bytes());

        assert_eq!(decoded.inter_burst_delay_secs, 0);
    }

    #[test]
    fn test_burst_number_out_of_range_normalized() {
        for stored in [0u8, 21, 255] {
            let mut bytes = DeviceSettings::default().to_bytes();
            bytes[BURST_NUMBER_OFFSET] = stored;
            assert_eq!(DeviceSettings::from_bytes(&bytes).burst_number, 1);
        }
        for stored in 1..=MAX_BURST_NUMBER {
            let mut bytes = DeviceSettings::default().to_bytes();
            bytes[BURST_NUMBER_OFFSET] = stored;
            assert_eq!(DeviceSettings::from_bytes(&bytes).burst_number, stored);
        }
    }

    #[test]
    fn test_erased_block_loads_defaults() {
        let settings = DeviceSettings::from_bytes(&[0xFF; SETTINGS_LEN]);

        assert!(settings.site_name.is_empty());
        assert_eq!(settings.burst_number, 1);
        assert_eq!(settings.inter_burst_delay_secs, 0);
        assert_eq!(settings.mode_code, 0xFF);
    }

    #[test]
    fn test_load_and_store_through_ram_eeprom() {
        let mut store = RamEeprom::<EEPROM_SIZE>::new();
        let mut settings = DeviceSettings::default();
        settings.site_name = String::try_from("CREEK").unwrap();

        settings.store(&mut store).unwrap();
        let loaded = DeviceSettings::load(&mut store).unwrap();

        assert_eq!(loaded.site_name.as_str(), "CREEK");
    }

    #[test]
    fn test_site_name_validation() {
        assert!(is_valid_site_name("SITE1"));
        assert!(is_valid_site_name("a_b-c"));
        assert!(!is_valid_site_name(""));
        assert!(!is_valid_site_name("TOOLONGNAME"));
        assert!(!is_valid_site_name("A,B"));
        assert!(!is_valid_site_name("A/B"));
    }
}
