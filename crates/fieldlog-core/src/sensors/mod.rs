//! Sensor driver abstraction.
//!
//! Every configured slot is served by one [`SensorDriver`] trait object. The
//! drivers differ only in how they set up and acquire readings (analog, bus
//! addressed, pin-level, or synthetic); burst accumulation, column headers,
//! and configuration (de)serialization are shared through [`DriverCore`]
//! and the provided trait methods, so the controller treats all of them the
//! same way.

pub mod dht22;
pub mod driver_table;
pub mod driver_template;
pub mod generic_analog;
pub mod registry;
pub mod sht4x;
pub mod slot_config;

pub use driver_table::DriverTable;
pub use registry::DriverRegistry;
pub use slot_config::SlotConfig;

use alloc::string::{String, ToString};
use core::fmt::{self, Write};

use embedded_hal::delay::DelayNs;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror_no_std::Error;

use crate::config::TOTAL_SLOTS;
use crate::error::ConfigError;
use slot_config::SPECIFIC_PARTITION_LEN;

/// Maximum tag length
pub const MAX_TAG_LEN: usize = 5;

/// Reading cycle used when the stored value is out of range
pub const DEFAULT_READING_CYCLE: u8 = 10;

/// Largest accepted reading cycle
pub const MAX_READING_CYCLE: u8 = 100;

/// Maximum number of named channels a driver can accumulate
pub const MAX_CHANNELS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("{sensor}: {operation} failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },

    #[error("{sensor}: timed out during {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },

    #[error("{sensor}: initialization failed ({details})")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },

    #[error("no acknowledge from bus address {address:#04x}")]
    Bus { address: u8 },
}

/// How a driver reaches its sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Analog,
    I2c,
    Gpio,
    DriverTemplate,
}

/// Static identity of a driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorType {
    /// Code stored in the slot block
    pub code: u16,
    /// Name used by the command interface
    pub name: &'static str,
    pub protocol: Protocol,
}

/// Which ADC an analog channel is wired to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdcSelect {
    Internal,
    External,
}

/// A combined temperature / relative humidity reading.
///
/// Pin-level sensors report a failed conversion as NaN in either field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Humiture {
    pub temperature_celsius: f32,
    pub relative_humidity: f32,
}

impl Humiture {
    pub fn is_valid(&self) -> bool {
        !self.temperature_celsius.is_nan() && !self.relative_humidity.is_nan()
    }
}

/// Sensor-facing hardware access provided by the platform.
pub trait SensorIo: DelayNs {
    /// Raw conversion of an analog port.
    fn analog_read(&mut self, adc: AdcSelect, port: u8) -> Result<u16, SensorError>;

    /// Single-wire humidity/temperature read on a GPIO pin.
    fn read_humiture(&mut self, pin: u8) -> Result<Humiture, SensorError>;

    fn i2c_write(&mut self, address: u8, bytes: &[u8]) -> Result<(), SensorError>;

    fn i2c_read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), SensorError>;

    /// Wall clock in seconds since the Unix epoch.
    fn epoch_seconds(&mut self) -> u32;
}

// ---------------------------------------------------------------------------
// Common configuration
// ---------------------------------------------------------------------------

/// The header shared by every slot configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonConfig {
    pub sensor_type: u16,
    /// Zero-based slot index
    pub slot: u8,
    pub tag: heapless::String<MAX_TAG_LEN>,
    /// Readings per burst
    pub reading_cycle: u8,
}

impl CommonConfig {
    pub fn new(sensor_type: u16) -> Self {
        Self {
            sensor_type,
            slot: 0,
            tag: heapless::String::new(),
            reading_cycle: DEFAULT_READING_CYCLE,
        }
    }

    /// Reading cycle 0 or above 100 becomes 10.
    pub fn apply_defaults(&mut self) {
        if self.reading_cycle == 0 || self.reading_cycle > MAX_READING_CYCLE {
            self.reading_cycle = DEFAULT_READING_CYCLE;
        }
    }

    /// Splits a JSON configuration object into the common header and the
    /// remaining driver-specific fields.
    ///
    /// `slot`, `tag` and `readingCycle` are required. `type` is optional but
    /// must name `sensor_type` when present. The JSON slot is 1-based.
    pub fn from_json(
        object: &Map<String, Value>,
        sensor_type: SensorType,
    ) -> Result<(Self, Map<String, Value>), ConfigError> {
        let mut common = Self::new(sensor_type.code);
        let mut slot = None;
        let mut tag = None;
        let mut reading_cycle = None;
        let mut specific = Map::new();

        for (key, value) in object {
            match key.as_str() {
                "slot" => {
                    let invalid = ConfigError::InvalidSlot { max: TOTAL_SLOTS };
                    let number = value.as_u64().ok_or(invalid.clone())?;
                    if number == 0 || number > u64::from(TOTAL_SLOTS) {
                        return Err(invalid);
                    }
                    slot = Some(number as u8 - 1);
                }
                "type" => {
                    if value.as_str() != Some(sensor_type.name) {
                        return Err(ConfigError::TypeMismatch);
                    }
                }
                "tag" => {
                    let invalid = ConfigError::InvalidTag { max: MAX_TAG_LEN };
                    let text = value.as_str().ok_or(invalid.clone())?;
                    if !is_valid_tag(text) {
                        return Err(invalid);
                    }
                    tag = heapless::String::try_from(text).ok();
                }
                "readingCycle" => {
                    let number = value
                        .as_u64()
                        .filter(|n| (1..=u64::from(MAX_READING_CYCLE)).contains(n))
                        .ok_or(ConfigError::InvalidReadingCycle)?;
                    reading_cycle = Some(number as u8);
                }
                _ => {
                    specific.insert(key.clone(), value.clone());
                }
            }
        }

        common.slot = slot.ok_or(ConfigError::InvalidSlot { max: TOTAL_SLOTS })?;
        common.tag = tag.ok_or(ConfigError::InvalidTag { max: MAX_TAG_LEN })?;
        common.reading_cycle = reading_cycle.ok_or(ConfigError::InvalidReadingCycle)?;
        Ok((common, specific))
    }
}

/// Tags become CSV column prefixes, so they stay short and comma free.
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && tag
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b',' && b != b'"')
}

// ---------------------------------------------------------------------------
// Burst accumulation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct ChannelSum {
    name: &'static str,
    sum: f64,
    count: u32,
}

/// Per-burst state: the reading counter and running sums per named channel.
#[derive(Debug, Clone)]
pub struct BurstAccumulator {
    readings: u8,
    channels: heapless::Vec<ChannelSum, MAX_CHANNELS>,
}

impl BurstAccumulator {
    /// Channels beyond [`MAX_CHANNELS`] are ignored.
    pub fn new(channel_names: &[&'static str]) -> Self {
        let mut channels = heapless::Vec::new();
        for &name in channel_names.iter().take(MAX_CHANNELS) {
            let _ = channels.push(ChannelSum {
                name,
                sum: 0.0,
                count: 0,
            });
        }
        Self {
            readings: 0,
            channels,
        }
    }

    pub fn reset(&mut self) {
        self.readings = 0;
        for channel in self.channels.iter_mut() {
            channel.sum = 0.0;
            channel.count = 0;
        }
    }

    /// Counts one reading toward the burst threshold.
    pub fn increment(&mut self) {
        self.readings = self.readings.saturating_add(1);
    }

    pub fn readings(&self) -> u8 {
        self.readings
    }

    /// Adds a value to the running sum of channel `index`.
    pub fn add(&mut self, index: usize, value: f64) {
        if let Some(channel) = self.channels.get_mut(index) {
            channel.sum += value;
            channel.count += 1;
        }
    }

    /// Mean of channel `index`, `None` before the first value.
    pub fn mean(&self, index: usize) -> Option<f64> {
        let channel = self.channels.get(index)?;
        if channel.count == 0 {
            return None;
        }
        Some(channel.sum / f64::from(channel.count))
    }

    pub fn count(&self, index: usize) -> u32 {
        self.channels.get(index).map_or(0, |c| c.count)
    }

    /// Channel names with their current means.
    pub fn summary(&self) -> impl Iterator<Item = (&'static str, Option<f64>)> + '_ {
        self.channels
            .iter()
            .enumerate()
            .map(|(index, channel)| (channel.name, self.mean(index)))
    }
}

/// State shared by every driver implementation
#[derive(Debug, Clone)]
pub struct DriverCore {
    pub common: CommonConfig,
    pub burst: BurstAccumulator,
    data: String,
}

impl DriverCore {
    pub fn new(sensor_type: SensorType, channel_names: &[&'static str]) -> Self {
        Self {
            common: CommonConfig::new(sensor_type.code),
            burst: BurstAccumulator::new(channel_names),
            data: String::new(),
        }
    }

    /// The last captured, formatted reading.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Replaces the data string with formatted text.
    pub fn set_data(&mut self, args: fmt::Arguments<'_>) {
        self.data.clear();
        let _ = self.data.write_fmt(args);
    }

    /// Replaces the data string with one empty field per channel.
    pub fn clear_data(&mut self, channels: usize) {
        self.data.clear();
        for _ in 1..channels {
            self.data.push(',');
        }
    }
}

/// Result of a calibration step that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationOutcome {
    /// Intermediate step; nothing to persist yet
    Pending,
    /// The driver configuration changed and must be persisted
    Updated,
}

// ---------------------------------------------------------------------------
// Driver contract
// ---------------------------------------------------------------------------

/// The uniform contract every sensor driver implements.
///
/// Implementors provide identity, acquisition and their driver-specific
/// configuration. The remaining methods are provided in terms of those and
/// are not expected to be overridden.
pub trait SensorDriver {
    fn sensor_type(&self) -> SensorType;

    fn core(&self) -> &DriverCore;

    fn core_mut(&mut self) -> &mut DriverCore;

    /// Channel names without the tag prefix, e.g. `["temperature", "humidity"]`.
    fn base_column_headers(&self) -> &'static [&'static str];

    /// One-time protocol setup after the driver is configured.
    fn setup(&mut self, _io: &mut dyn SensorIo) -> Result<(), SensorError> {
        Ok(())
    }

    /// Called before the platform powers peripherals down.
    fn hibernate(&mut self, _io: &mut dyn SensorIo) {}

    /// Called after peripherals are powered and configured again.
    fn wake(&mut self, _io: &mut dyn SensorIo) {}

    /// Take one reading, update the data string and accumulate it into the
    /// burst means. Returns `false` and accumulates nothing when the reading
    /// is invalid.
    fn take_measurement(&mut self, io: &mut dyn SensorIo) -> bool;

    /// Resets driver-specific fields to their defaults.
    fn specific_defaults(&mut self);

    /// Encodes the driver-specific partition into `buffer`.
    fn write_specific_bytes(&self, buffer: &mut [u8]) -> Result<(), ConfigError>;

    /// Applies a stored driver-specific partition.
    fn configure_specific_bytes(&mut self, bytes: &[u8]) -> Result<(), ConfigError>;

    /// The driver-specific JSON fields.
    fn specific_json(&self) -> Map<String, Value>;

    /// Validates and applies driver-specific JSON fields. Unknown fields are
    /// rejected.
    fn configure_specific_json(&mut self, fields: Map<String, Value>) -> Result<(), ConfigError>;

    fn init_calibration(&mut self) {}

    fn calibration_step(
        &mut self,
        _step: &str,
        _args: &[&str],
        _io: &mut dyn SensorIo,
    ) -> Result<CalibrationOutcome, ConfigError> {
        Err(ConfigError::Calibration("not supported by this sensor"))
    }

    // -- provided ----------------------------------------------------------

    /// Zero-based slot index.
    fn slot(&self) -> u8 {
        self.core().common.slot
    }

    fn tag(&self) -> &str {
        self.core().common.tag.as_str()
    }

    fn data_string(&self) -> &str {
        self.core().data()
    }

    /// Channel names prefixed with the tag, comma separated.
    fn csv_column_headers(&self) -> String {
        let mut headers = String::new();
        for (i, name) in self.base_column_headers().iter().enumerate() {
            if i > 0 {
                headers.push(',');
            }
            let _ = write!(headers, "{}_{}", self.tag(), name);
        }
        headers
    }

    fn initialize_burst(&mut self) {
        self.core_mut().burst.reset();
    }

    fn increment_burst(&mut self) {
        self.core_mut().burst.increment();
    }

    /// True once the reading counter reaches the configured reading cycle.
    fn burst_completed(&self) -> bool {
        let core = self.core();
        core.burst.readings() >= core.common.reading_cycle
    }

    /// Mean of a channel over the current burst, by channel name.
    fn burst_summary_mean(&self, channel: &str) -> Option<f64> {
        self.core()
            .burst
            .summary()
            .find(|(name, _)| *name == channel)
            .and_then(|(_, mean)| mean)
    }

    /// Applies a stored slot block.
    fn configure(&mut self, config: &SlotConfig) -> Result<(), ConfigError> {
        if config.common.sensor_type != self.sensor_type().code {
            return Err(ConfigError::TypeMismatch);
        }
        self.configure_specific_bytes(&config.specific)?;
        let mut common = config.common.clone();
        common.apply_defaults();
        self.core_mut().common = common;
        Ok(())
    }

    /// The slot block describing this driver.
    fn configuration(&self) -> Result<SlotConfig, ConfigError> {
        let mut specific = [0u8; SPECIFIC_PARTITION_LEN];
        self.write_specific_bytes(&mut specific)?;
        Ok(SlotConfig {
            common: self.core().common.clone(),
            specific,
        })
    }

    /// Applies a JSON configuration object. On error the driver should be
    /// discarded.
    fn configure_from_json(&mut self, json: &Value) -> Result<(), ConfigError> {
        let object = json.as_object().ok_or(ConfigError::NotAnObject)?;
        let (common, specific) = CommonConfig::from_json(object, self.sensor_type())?;
        self.specific_defaults();
        self.configure_specific_json(specific)?;
        self.core_mut().common = common;
        Ok(())
    }

    /// JSON configuration object, with a 1-based slot.
    fn configuration_json(&self) -> Value {
        let common = &self.core().common;
        let mut object = self.specific_json();
        object.insert("slot".to_string(), Value::from(common.slot + 1));
        object.insert("type".to_string(), Value::from(self.sensor_type().name));
        object.insert("tag".to_string(), Value::from(common.tag.as_str()));
        object.insert("readingCycle".to_string(), Value::from(common.reading_cycle));
        Value::Object(object)
    }
}

// ---------------------------------------------------------------------------
// Helpers for driver implementations
// ---------------------------------------------------------------------------

/// Serializes a driver's specific configuration into a JSON map.
pub(crate) fn to_json_object<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Deserializes driver-specific JSON fields.
pub(crate) fn from_json_object<T: DeserializeOwned>(
    fields: Map<String, Value>,
) -> Result<T, ConfigError> {
    serde_json::from_value(Value::Object(fields)).map_err(|e| ConfigError::json(&e))
}

/// Encodes a driver-specific partition with postcard.
pub(crate) fn encode_specific<T: Serialize>(
    value: &T,
    buffer: &mut [u8],
) -> Result<(), ConfigError> {
    let len = buffer.len();
    postcard::to_slice(value, buffer)
        .map(|_| ())
        .map_err(|_| ConfigError::Encoding(len))
}

/// Decodes a driver-specific partition with postcard.
pub(crate) fn decode_specific<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ConfigError> {
    postcard::from_bytes(bytes).map_err(|e| {
        log::warn!("Stored driver configuration is unreadable: {:?}", e);
        ConfigError::InvalidField("driver configuration")
    })
}
