//! Generic analog sensor on the internal or external ADC.
//!
//! Readings are reported raw and through a two-point linear calibration.
//! Calibration targets are scaled by `10^(3 - oom)`, where `oom` is the
//! order of magnitude of the low target, so the fitted slope and intercept
//! stay well conditioned in `f32` for both small and large physical ranges.

use alloc::string::String;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    AdcSelect, CalibrationOutcome, DriverCore, Protocol, SensorDriver, SensorIo, SensorType,
    decode_specific, encode_specific, from_json_object, to_json_object,
};
use crate::error::ConfigError;

pub const GENERIC_ANALOG: SensorType = SensorType {
    code: 0,
    name: "generic_analog",
    protocol: Protocol::Analog,
};

/// Number of analog ports on either ADC
pub const ANALOG_PORTS: u8 = 5;

/// Readings averaged per calibration point by default
pub const DEFAULT_CAL_BURST_LENGTH: u8 = 20;

/// Largest accepted calibration burst
pub const MAX_CAL_BURST_LENGTH: u8 = 200;

/// Spacing between calibration readings
const CAL_READING_SPACING_MS: u32 = 100;

const CHANNELS: &[&str] = &["raw", "cal"];
const RAW: usize = 0;
const CAL: usize = 1;

fn unity() -> f32 {
    1.0
}

fn default_order_of_magnitude() -> i8 {
    3
}

fn default_cal_burst_length() -> u8 {
    DEFAULT_CAL_BURST_LENGTH
}

/// Driver-specific configuration, shared by JSON and the stored partition.
///
/// An uncalibrated channel reports `cal == raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenericAnalogConfig {
    pub adc_select: AdcSelect,
    pub sensor_port: u8,
    #[serde(default = "unity")]
    pub m: f32,
    #[serde(default)]
    pub b: f32,
    #[serde(default = "default_order_of_magnitude")]
    pub order_of_magnitude: i8,
    #[serde(default)]
    pub x1: u16,
    #[serde(default)]
    pub x2: u16,
    #[serde(default)]
    pub y1: f32,
    #[serde(default)]
    pub y2: f32,
    #[serde(default)]
    pub cal_timestamp: u32,
    #[serde(default = "default_cal_burst_length")]
    pub cal_burst_length: u8,
}

impl Default for GenericAnalogConfig {
    fn default() -> Self {
        Self {
            adc_select: AdcSelect::Internal,
            sensor_port: 0,
            m: unity(),
            b: 0.0,
            order_of_magnitude: default_order_of_magnitude(),
            x1: 0,
            x2: 0,
            y1: 0.0,
            y2: 0.0,
            cal_timestamp: 0,
            cal_burst_length: DEFAULT_CAL_BURST_LENGTH,
        }
    }
}

impl GenericAnalogConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor_port >= ANALOG_PORTS {
            return Err(ConfigError::InvalidField("sensor_port"));
        }
        if self.cal_burst_length == 0 || self.cal_burst_length > MAX_CAL_BURST_LENGTH {
            return Err(ConfigError::InvalidField("cal_burst_length"));
        }
        Ok(())
    }
}

/// One measured calibration point
#[derive(Debug, Clone, Copy, PartialEq)]
struct CalibrationPoint {
    /// Physical value the sensor was exposed to
    target: f64,
    /// Mean raw reading
    reading: f64,
}

pub struct GenericAnalog {
    core: DriverCore,
    config: GenericAnalogConfig,
    low: Option<CalibrationPoint>,
    high: Option<CalibrationPoint>,
}

impl GenericAnalog {
    pub fn new() -> Self {
        Self {
            core: DriverCore::new(GENERIC_ANALOG, CHANNELS),
            config: GenericAnalogConfig::default(),
            low: None,
            high: None,
        }
    }

    pub fn config(&self) -> &GenericAnalogConfig {
        &self.config
    }

    /// Applies the calibration curve to a raw reading.
    pub fn calibrated(&self, raw: u16) -> f64 {
        let exponent = i32::from(self.config.order_of_magnitude) - 3;
        let scaled = f64::from(self.config.m) * f64::from(raw) + f64::from(self.config.b);
        scaled * libm::pow(10.0, f64::from(exponent))
    }

    /// Averages a calibration burst. Returns `(mean, variance)`.
    fn measure_calibration_point(&mut self, io: &mut dyn SensorIo) -> Option<(f64, f64)> {
        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        let mut count = 0u32;
        for i in 0..self.config.cal_burst_length {
            if i > 0 {
                io.delay_ms(CAL_READING_SPACING_MS);
            }
            match io.analog_read(self.config.adc_select, self.config.sensor_port) {
                Ok(raw) => {
                    let value = f64::from(raw);
                    sum += value;
                    sum_squares += value * value;
                    count += 1;
                }
                Err(e) => warn!("Calibration reading failed: {}", e),
            }
        }
        if count == 0 {
            return None;
        }
        let mean = sum / f64::from(count);
        let variance = sum_squares / f64::from(count) - mean * mean;
        Some((mean, variance.max(0.0)))
    }

    fn record_point(
        &mut self,
        args: &[&str],
        io: &mut dyn SensorIo,
    ) -> Result<CalibrationPoint, ConfigError> {
        let target = args
            .first()
            .ok_or(ConfigError::Calibration("missing target value"))?
            .parse::<f64>()
            .map_err(|_| ConfigError::Calibration("target value is not a number"))?;
        let (mean, variance) = self
            .measure_calibration_point(io)
            .ok_or(ConfigError::Calibration("no valid readings"))?;
        info!(
            "Calibration point {} -> mean {:.3}, variance {:.3}",
            target, mean, variance
        );
        Ok(CalibrationPoint {
            target,
            reading: mean,
        })
    }

    /// Fits the scaled line through both calibration points.
    fn compute_calibrated_curve(&mut self, timestamp: u32) -> Result<(), ConfigError> {
        let (Some(low), Some(high)) = (self.low, self.high) else {
            return Err(ConfigError::Calibration("incomplete calibration"));
        };
        if low.target <= 0.0 {
            return Err(ConfigError::Calibration("low target must be positive"));
        }

        let order_of_magnitude = libm::floor(libm::log10(low.target));
        let scale = libm::pow(10.0, 3.0 - order_of_magnitude);
        let y1 = low.target * scale;
        let y2 = high.target * scale;
        let x1 = libm::round(low.reading);
        let x2 = libm::round(high.reading);
        if x1 == x2 {
            return Err(ConfigError::Calibration("readings do not differ"));
        }

        let m = (y2 - y1) / (x2 - x1);
        let b = y1 - m * x1;

        self.config.m = m as f32;
        self.config.b = b as f32;
        self.config.order_of_magnitude = order_of_magnitude as i8;
        self.config.x1 = x1 as u16;
        self.config.x2 = x2 as u16;
        self.config.y1 = y1 as f32;
        self.config.y2 = y2 as f32;
        self.config.cal_timestamp = timestamp;
        info!("Calibrated: m = {}, b = {}, oom = {}", m, b, order_of_magnitude);
        Ok(())
    }
}

impl Default for GenericAnalog {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for GenericAnalog {
    fn sensor_type(&self) -> SensorType {
        GENERIC_ANALOG
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
        match io.analog_read(self.config.adc_select, self.config.sensor_port) {
            Ok(raw) => {
                let cal = self.calibrated(raw);
                self.core.set_data(format_args!("{},{:.3}", raw, cal));
                self.core.burst.add(RAW, f64::from(raw));
                self.core.burst.add(CAL, cal);
                true
            }
            Err(e) => {
                warn!("Slot {} analog read failed: {}", self.core.common.slot + 1, e);
                self.core.clear_data(CHANNELS.len());
                false
            }
        }
    }

    fn specific_defaults(&mut self) {
        self.config = GenericAnalogConfig::default();
    }

    fn write_specific_bytes(&self, buffer: &mut [u8]) -> Result<(), ConfigError> {
        encode_specific(&self.config, buffer)
    }

    fn configure_specific_bytes(&mut self, bytes: &[u8]) -> Result<(), ConfigError> {
        let config: GenericAnalogConfig = decode_specific(bytes)?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn specific_json(&self) -> Map<String, Value> {
        to_json_object(&self.config)
    }

    fn configure_specific_json(&mut self, fields: Map<String, Value>) -> Result<(), ConfigError> {
        let config: GenericAnalogConfig = from_json_object(fields)?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn init_calibration(&mut self) {
        self.low = None;
        self.high = None;
        info!("Calibration started for slot {}", self.core.common.slot + 1);
    }

    fn calibration_step(
        &mut self,
        step: &str,
        args: &[&str],
        io: &mut dyn SensorIo,
    ) -> Result<CalibrationOutcome, ConfigError> {
        match step {
            "low" => {
                self.low = Some(self.record_point(args, io)?);
                Ok(CalibrationOutcome::Pending)
            }
            "high" => {
                self.high = Some(self.record_point(args, io)?);
                Ok(CalibrationOutcome::Pending)
            }
            "store" => {
                let timestamp = io.epoch_seconds();
                self.compute_calibrated_curve(timestamp)?;
                Ok(CalibrationOutcome::Updated)
            }
            "set-cal-burst-length" => {
                let length = args
                    .first()
                    .and_then(|arg| arg.parse::<u8>().ok())
                    .filter(|n| (1..=MAX_CAL_BURST_LENGTH).contains(n))
                    .ok_or(ConfigError::Calibration("burst length must be 1 to 200"))?;
                self.config.cal_burst_length = length;
                Ok(CalibrationOutcome::Updated)
            }
            _ => Err(ConfigError::Calibration("unknown calibration step")),
        }
    }
}
