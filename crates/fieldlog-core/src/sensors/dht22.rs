//! DHT22 single-wire temperature and humidity sensor.

use alloc::string::String;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    DriverCore, Protocol, SensorDriver, SensorIo, SensorType, decode_specific, encode_specific,
    from_json_object, to_json_object,
};
use crate::error::ConfigError;

pub const DHT22: SensorType = SensorType {
    code: 1,
    name: "dht22",
    protocol: Protocol::Gpio,
};

/// Number of sensor pins on the board header
pub const GPIO_PINS: u8 = 7;

const CHANNELS: &[&str] = &["temperature", "humidity"];
const TEMPERATURE: usize = 0;
const HUMIDITY: usize = 1;

/// Stored configuration. The pin is zero-based here and 1-based in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dht22Config {
    pub sensor_pin: u8,
    pub cal_timestamp: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Dht22Json {
    sensor_pin: u8,
    #[serde(default)]
    cal_timestamp: u32,
}

pub struct Dht22 {
    core: DriverCore,
    config: Dht22Config,
}

impl Dht22 {
    pub fn new() -> Self {
        Self {
            core: DriverCore::new(DHT22, CHANNELS),
            config: Dht22Config::default(),
        }
    }

    pub fn config(&self) -> &Dht22Config {
        &self.config
    }
}

impl Default for Dht22 {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for Dht22 {
    fn sensor_type(&self) -> SensorType {
        DHT22
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

    fn take_measurement(&mut self, io: &mut dyn SensorIo) -> bool {
        let reading = match io.read_humiture(self.config.sensor_pin) {
            Ok(reading) if reading.is_valid() => reading,
            Ok(_) => {
                warn!("DHT22 on pin {} returned NaN", self.config.sensor_pin + 1);
                self.core.clear_data(CHANNELS.len());
                return false;
            }
            Err(e) => {
                warn!("DHT22 read failed: {}", e);
                self.core.clear_data(CHANNELS.len());
                return false;
            }
        };

        self.core.set_data(format_args!(
            "{:.2},{:.2}",
            reading.temperature_celsius, reading.relative_humidity
        ));
        self.core
            .burst
            .add(TEMPERATURE, f64::from(reading.temperature_celsius));
        self.core
            .burst
            .add(HUMIDITY, f64::from(reading.relative_humidity));
        true
    }

    fn specific_defaults(&mut self) {
        self.config = Dht22Config::default();
    }

    fn write_specific_bytes(&self, buffer: &mut [u8]) -> Result<(), ConfigError> {
        encode_specific(&self.config, buffer)
    }

    fn configure_specific_bytes(&mut self, bytes: &[u8]) -> Result<(), ConfigError> {
        let config: Dht22Config = decode_specific(bytes)?;
        if config.sensor_pin >= GPIO_PINS {
            return Err(ConfigError::InvalidField("sensor_pin"));
        }
        self.config = config;
        Ok(())
    }

    fn specific_json(&self) -> Map<String, Value> {
        to_json_object(&Dht22Json {
            sensor_pin: self.config.sensor_pin + 1,
            cal_timestamp: self.config.cal_timestamp,
        })
    }

    fn configure_specific_json(&mut self, fields: Map<String, Value>) -> Result<(), ConfigError> {
        let json: Dht22Json = from_json_object(fields)?;
        if json.sensor_pin == 0 || json.sensor_pin > GPIO_PINS {
            return Err(ConfigError::InvalidField("sensor_pin"));
        }
        self.config = Dht22Config {
            sensor_pin: json.sensor_pin - 1,
            cal_timestamp: json.cal_timestamp,
        };
        Ok(())
    }
}
