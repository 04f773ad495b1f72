//! Sensirion SHT4x temperature and humidity sensor on the I2C bus.
//!
//! Talks the raw command protocol: a one-byte measurement command, a fixed
//! conversion delay, then two CRC-protected 16-bit words.

use alloc::string::String;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    DriverCore, Protocol, SensorDriver, SensorError, SensorIo, SensorType, decode_specific,
    encode_specific, from_json_object, to_json_object,
};
use crate::error::ConfigError;

pub const SHT4X: SensorType = SensorType {
    code: 2,
    name: "sht4x",
    protocol: Protocol::I2c,
};

/// Factory address of the SHT40-AD1B
pub const DEFAULT_ADDRESS: u8 = 0x44;
/// Address of the SHT40-BD1B
pub const ALTERNATE_ADDRESS: u8 = 0x45;

const SOFT_RESET: u8 = 0x94;
const SOFT_RESET_MS: u32 = 1;

const CHANNELS: &[&str] = &["temperature", "humidity"];
const TEMPERATURE: usize = 0;
const HUMIDITY: usize = 1;

/// Measurement repeatability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    High,
    Medium,
    Low,
}

impl Precision {
    fn command(self) -> u8 {
        match self {
            Precision::High => 0xFD,
            Precision::Medium => 0xF6,
            Precision::Low => 0xE0,
        }
    }

    fn conversion_ms(self) -> u32 {
        match self {
            Precision::High => 10,
            Precision::Medium => 5,
            Precision::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sht4xConfig {
    #[serde(default = "default_address")]
    pub address: u8,
    #[serde(default)]
    pub precision: Precision,
}

fn default_address() -> u8 {
    DEFAULT_ADDRESS
}

impl Default for Sht4xConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            precision: Precision::High,
        }
    }
}

impl Sht4xConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.address != DEFAULT_ADDRESS && self.address != ALTERNATE_ADDRESS {
            return Err(ConfigError::InvalidField("address"));
        }
        Ok(())
    }
}

/// CRC-8 with polynomial 0x31 and initial value 0xFF.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

pub struct Sht4x {
    core: DriverCore,
    config: Sht4xConfig,
}

impl Sht4x {
    pub fn new() -> Self {
        Self {
            core: DriverCore::new(SHT4X, CHANNELS),
            config: Sht4xConfig::default(),
        }
    }

    pub fn config(&self) -> &Sht4xConfig {
        &self.config
    }

    /// Reads one conversion as (°C, %RH).
    fn measure(&self, io: &mut dyn SensorIo) -> Result<(f32, f32), SensorError> {
        io.i2c_write(self.config.address, &[self.config.precision.command()])?;
        io.delay_ms(self.config.precision.conversion_ms());

        let mut frame = [0u8; 6];
        io.i2c_read(self.config.address, &mut frame)?;
        if crc8(&frame[0..2]) != frame[2] || crc8(&frame[3..5]) != frame[5] {
            return Err(SensorError::ReadFailed {
                sensor: "SHT4x",
                operation: "measure temperature/humidity",
                details: "CRC mismatch",
            });
        }

        let raw_temperature = f32::from(u16::from_be_bytes([frame[0], frame[1]]));
        let raw_humidity = f32::from(u16::from_be_bytes([frame[3], frame[4]]));
        let temperature = -45.0 + 175.0 * raw_temperature / 65535.0;
        let humidity = (-6.0 + 125.0 * raw_humidity / 65535.0).clamp(0.0, 100.0);
        Ok((temperature, humidity))
    }
}

impl Default for Sht4x {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for Sht4x {
    fn sensor_type(&self) -> SensorType {
        SHT4X
    }

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }

    fn base_column_headers(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn setup(&mut self, io: &mut dyn SensorIo) -> Result<(), SensorError> {
        io.i2c_write(self.config.address, &[SOFT_RESET])
            .map_err(|e| {
                log::error!("SHT4x soft reset failed: {}", e);
                SensorError::InitializationFailed {
                    sensor: "SHT4x",
                    details: "no response to soft reset",
                }
            })?;
        io.delay_ms(SOFT_RESET_MS);
        debug!("SHT4x at {:#04x} ready", self.config.address);
        Ok(())
    }

    fn wake(&mut self, io: &mut dyn SensorIo) {
        if let Err(e) = self.setup(io) {
            warn!("SHT4x did not come back after sleep: {}", e);
        }
    }

    fn take_measurement(&mut self, io: &mut dyn SensorIo) -> bool {
        match self.measure(io) {
            Ok((temperature, humidity)) => {
                self.core
                    .set_data(format_args!("{:.2},{:.2}", temperature, humidity));
                self.core.burst.add(TEMPERATURE, f64::from(temperature));
                self.core.burst.add(HUMIDITY, f64::from(humidity));
                true
            }
            Err(e) => {
                warn!("SHT4x read failed: {}", e);
                self.core.clear_data(CHANNELS.len());
                false
            }
        }
    }

    fn specific_defaults(&mut self) {
        self.config = Sht4xConfig::default();
    }

    fn write_specific_bytes(&self, buffer: &mut [u8]) -> Result<(), ConfigError> {
        encode_specific(&self.config, buffer)
    }

    fn configure_specific_bytes(&mut self, bytes: &[u8]) -> Result<(), ConfigError> {
        let config: Sht4xConfig = decode_specific(bytes)?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn specific_json(&self) -> Map<String, Value> {
        to_json_object(&self.config)
    }

    fn configure_specific_json(&mut self, fields: Map<String, Value>) -> Result<(), ConfigError> {
        let config: Sht4xConfig = from_json_object(fields)?;
        config.validate()?;
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use serde_json::json;

    fn configured() -> Sht4x {
        let mut driver = Sht4x::new();
        driver
            .configure_from_json(&json!({
                "slot": 4, "type": "sht4x", "tag": "SHT", "readingCycle": 1, "address": 0x45
            }))
            .unwrap();
        driver
    }

    #[test]
    fn test_crc8_datasheet_vector() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn test_measurement_converts_words() {
        let mut driver = configured();
        let mut io = FakePlatform::new();
        // 25 °C and 50 %RH
        io.set_sht4x_words(0x6666, 0x72B0);

        assert!(driver.take_measurement(&mut io));
        assert_eq!(io.i2c_writes.last(), Some(&(0x45, 0xFD)));
        let temperature = driver.burst_summary_mean("temperature").unwrap();
        let humidity = driver.burst_summary_mean("humidity").unwrap();
        assert!((temperature - 25.0).abs() < 0.01);
        assert!((humidity - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_crc_mismatch_fails_reading() {
        let mut driver = configured();
        let mut io = FakePlatform::new();
        io.set_sht4x_words(0x6666, 0x72B0);
        io.i2c_frame[2] ^= 0xFF;

        assert!(!driver.take_measurement(&mut io));
        assert_eq!(driver.data_string(), ",");
    }

    #[test]
    fn test_setup_sends_soft_reset() {
        let mut driver = configured();
        let mut io = FakePlatform::new();
        driver.setup(&mut io).unwrap();
        assert_eq!(io.i2c_writes.first(), Some(&(0x45, SOFT_RESET)));
    }

    #[test]
    fn test_rejects_unknown_address() {
        let mut driver = Sht4x::new();
        let config = json!({"slot": 1, "tag": "S", "readingCycle": 1, "address": 0x40});
        assert_eq!(
            driver.configure_from_json(&config),
            Err(ConfigError::InvalidField("address"))
        );
    }

    #[test]
    fn test_json_round_trip() {
        let driver = configured();
        let mut rebuilt = Sht4x::new();
        rebuilt
            .configure_from_json(&driver.configuration_json())
            .unwrap();
        assert_eq!(rebuilt.config(), driver.config());
        assert_eq!(rebuilt.core().common, driver.core().common);
    }
}
