//! Template driver: a deterministic ramp with no hardware behind it.
//!
//! New drivers start as a copy of this one. It is also useful on the bench
//! to exercise bursts, headers and log output before any sensor is wired.

use alloc::string::String;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    DriverCore, Protocol, SensorDriver, SensorIo, SensorType, decode_specific, encode_specific,
    from_json_object, to_json_object,
};
use crate::error::ConfigError;

pub const DRIVER_TEMPLATE: SensorType = SensorType {
    code: 3,
    name: "driver_template",
    protocol: Protocol::DriverTemplate,
};

const CHANNELS: &[&str] = &["value"];
const VALUE: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverTemplateConfig {
    /// First value produced after setup
    #[serde(default)]
    pub start: i32,
    /// Added after every reading
    #[serde(default)]
    pub step: i32,
}

pub struct DriverTemplate {
    core: DriverCore,
    config: DriverTemplateConfig,
    next: i32,
}

impl DriverTemplate {
    pub fn new() -> Self {
        Self {
            core: DriverCore::new(DRIVER_TEMPLATE, CHANNELS),
            config: DriverTemplateConfig::default(),
            next: 0,
        }
    }

    pub fn config(&self) -> &DriverTemplateConfig {
        &self.config
    }
}

impl Default for DriverTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for DriverTemplate {
    fn sensor_type(&self) -> SensorType {
        DRIVER_TEMPLATE
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

    fn setup(&mut self, _io: &mut dyn SensorIo) -> Result<(), super::SensorError> {
        self.next = self.config.start;
        Ok(())
    }

    fn take_measurement(&mut self, _io: &mut dyn SensorIo) -> bool {
        let value = self.next;
        self.next = self.next.wrapping_add(self.config.step);
        self.core.set_data(format_args!("{}", value));
        self.core.burst.add(VALUE, f64::from(value));
        true
    }

    fn specific_defaults(&mut self) {
        self.config = DriverTemplateConfig::default();
    }

    fn write_specific_bytes(&self, buffer: &mut [u8]) -> Result<(), ConfigError> {
        encode_specific(&self.config, buffer)
    }

    fn configure_specific_bytes(&mut self, bytes: &[u8]) -> Result<(), ConfigError> {
        self.config = decode_specific(bytes)?;
        self.next = self.config.start;
        Ok(())
    }

    fn specific_json(&self) -> Map<String, Value> {
        to_json_object(&self.config)
    }

    fn configure_specific_json(&mut self, fields: Map<String, Value>) -> Result<(), ConfigError> {
        self.config = from_json_object(fields)?;
        self.next = self.config.start;
        Ok(())
    }
}
