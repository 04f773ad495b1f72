//! The operations the control channel may perform on the controller.

use alloc::vec::Vec;

use log::{info, warn};
use serde_json::{Value, json};

use super::{Datalogger, Mode, ModeEvent};
use crate::config::{ConfigStore, TOTAL_SLOTS, is_valid_site_name};
use crate::error::{ConfigError, DataloggerError, context};
use crate::platform::Platform;
use crate::sensors::{CalibrationOutcome, SensorDriver};
use crate::sensors::slot_config::SlotConfig;
use crate::storage::LogStorage;
use crate::storage::record::{deployment_hex, device_hex};

/// Longest user note, in characters
pub const USER_NOTE_LEN: usize = 31;

/// Configuration and control operations, with 1-based slot numbers.
///
/// Every operation either applies completely or returns an error and leaves
/// the controller unchanged.
pub trait CommandSurface {
    /// Builds a driver of `sensor_type` from a JSON object, persists it and
    /// puts it in the driver table.
    fn set_sensor_configuration(
        &mut self,
        sensor_type: &str,
        json: &str,
    ) -> Result<(), DataloggerError>;

    /// Erases a slot and removes its driver.
    fn clear_slot(&mut self, slot: u8) -> Result<(), DataloggerError>;

    fn sensor_configuration(&self, slot: u8) -> Result<Value, DataloggerError>;

    /// Every active driver's configuration in table order.
    fn sensor_configurations(&self) -> Vec<Value>;

    /// Device settings, identity and sensors.
    fn configuration(&self) -> Value;

    fn set_interval(&mut self, minutes: u16) -> Result<(), DataloggerError>;

    fn set_burst_number(&mut self, bursts: u8) -> Result<(), DataloggerError>;

    fn set_start_up_delay(&mut self, millis: u16) -> Result<(), DataloggerError>;

    fn set_inter_burst_delay(&mut self, seconds: u16) -> Result<(), DataloggerError>;

    fn set_site_name(&mut self, name: &str) -> Result<(), DataloggerError>;

    fn set_user_note(&mut self, note: &str) -> Result<(), DataloggerError>;

    fn set_user_value(&mut self, value: i32);

    /// Runs a calibration step on the driver in `slot`. `init` starts a
    /// calibration; other steps are driver specific.
    fn calibrate(&mut self, slot: u8, step: &str, args: &[&str]) -> Result<(), DataloggerError>;

    /// Starts a deployment: new id and timestamp, log folder named after the
    /// site, mode logging.
    fn deploy(&mut self) -> Result<(), DataloggerError>;

    fn arm_deploy_on_trigger(&mut self) -> Result<(), DataloggerError>;

    fn enter_debugging(&mut self) -> Result<(), DataloggerError>;

    fn enter_interactive(&mut self) -> Result<(), DataloggerError>;

    /// Log a line on every interactive iteration.
    fn start_logging(&mut self);

    fn stop_logging(&mut self);

    fn mode(&self) -> Mode;
}

/// The source of control input, such as a serial console.
pub trait ControlChannel {
    /// True when unread input is waiting.
    fn input_pending(&mut self) -> bool;

    /// Reads pending input and executes it against `surface`.
    fn poll(&mut self, surface: &mut dyn CommandSurface);
}

/// A headless control channel with no input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoControl;

impl ControlChannel for NoControl {
    fn input_pending(&mut self) -> bool {
        false
    }

    fn poll(&mut self, _surface: &mut dyn CommandSurface) {}
}

/// 1-based slot number to table index.
fn slot_index(slot: u8) -> Result<u8, ConfigError> {
    if slot == 0 || slot > TOTAL_SLOTS {
        return Err(ConfigError::InvalidSlot { max: TOTAL_SLOTS });
    }
    Ok(slot - 1)
}

impl<E, L, P> CommandSurface for Datalogger<E, L, P>
where
    E: ConfigStore,
    L: LogStorage,
    P: Platform,
{
    fn set_sensor_configuration(
        &mut self,
        sensor_type: &str,
        json: &str,
    ) -> Result<(), DataloggerError> {
        let entry = self
            .registry
            .by_name(sensor_type)
            .ok_or_else(|| ConfigError::UnknownSensorType(context(sensor_type)))?;
        let value: Value = serde_json::from_str(json).map_err(|e| ConfigError::json(&e))?;

        let mut driver = entry.construct();
        driver.configure_from_json(&value)?;
        let block = driver.configuration()?;
        let index = driver.slot();

        self.store_slot(index, &block.to_bytes())?;
        if let Err(e) = driver.setup(&mut self.platform) {
            warn!("Slot {} setup failed: {}", index + 1, e);
        }
        self.drivers.insert_or_replace(driver);
        info!("Slot {} configured as {}", index + 1, sensor_type);

        self.restart_log_file()
    }

    fn clear_slot(&mut self, slot: u8) -> Result<(), DataloggerError> {
        let index = slot_index(slot)?;
        if !self.drivers.contains(index) {
            return Err(DataloggerError::SlotEmpty(slot));
        }

        self.store_slot(index, &SlotConfig::erased())?;
        self.drivers.remove(index);
        info!("Slot {} cleared", slot);

        self.restart_log_file()
    }

    fn sensor_configuration(&self, slot: u8) -> Result<Value, DataloggerError> {
        let index = slot_index(slot)?;
        self.drivers
            .get(index)
            .map(|d| d.configuration_json())
            .ok_or(DataloggerError::SlotEmpty(slot))
    }

    fn sensor_configurations(&self) -> Vec<Value> {
        self.drivers.configurations_json()
    }

    fn configuration(&self) -> Value {
        let settings = &self.settings;
        json!({
            "mode": self.mode.label(),
            "site_name": settings.site_name.as_str(),
            "interval": settings.interval_minutes,
            "burst_number": settings.burst_number,
            "start_up_delay": settings.start_up_delay_ms,
            "inter_burst_delay": settings.inter_burst_delay_secs,
            "deployment": deployment_hex(&settings.deployment_identifier).as_str(),
            "deployed_at": settings.deployment_timestamp,
            "uuid": device_hex(&self.device_id).as_str(),
            "user_note": self.user_note.as_str(),
            "user_value": self.user_value,
            "interactive_logging": self.interactive_logging,
            "sensors": self.drivers.configurations_json(),
        })
    }

    fn set_interval(&mut self, minutes: u16) -> Result<(), DataloggerError> {
        self.update_settings(|s| s.interval_minutes = minutes)
    }

    fn set_burst_number(&mut self, bursts: u8) -> Result<(), DataloggerError> {
        self.update_settings(|s| s.burst_number = bursts)
    }

    fn set_start_up_delay(&mut self, millis: u16) -> Result<(), DataloggerError> {
        self.update_settings(|s| s.start_up_delay_ms = millis)
    }

    fn set_inter_burst_delay(&mut self, seconds: u16) -> Result<(), DataloggerError> {
        self.update_settings(|s| s.inter_burst_delay_secs = seconds)
    }

    fn set_site_name(&mut self, name: &str) -> Result<(), DataloggerError> {
        if !is_valid_site_name(name) {
            return Err(ConfigError::InvalidSiteName.into());
        }
        self.update_settings(|s| s.site_name = context(name))
    }

    fn set_user_note(&mut self, note: &str) -> Result<(), DataloggerError> {
        let valid = note.len() <= USER_NOTE_LEN
            && note.bytes().all(|b| (b' '..=b'~').contains(&b) && b != b',');
        if !valid {
            return Err(ConfigError::InvalidUserNote.into());
        }
        self.user_note = context(note);
        Ok(())
    }

    fn set_user_value(&mut self, value: i32) {
        self.user_value = Some(value);
    }

    fn calibrate(&mut self, slot: u8, step: &str, args: &[&str]) -> Result<(), DataloggerError> {
        let index = slot_index(slot)?;
        let driver = self
            .drivers
            .get_mut(index)
            .ok_or(DataloggerError::SlotEmpty(slot))?;

        if step == "init" {
            driver.init_calibration();
            return Ok(());
        }

        let previous = driver.configuration()?;
        let outcome = driver.calibration_step(step, args, &mut self.platform)?;
        if outcome != CalibrationOutcome::Updated {
            return Ok(());
        }

        let block = driver.configuration()?;
        if let Err(e) = self.store_slot(index, &block.to_bytes()) {
            // The live driver keeps matching the stored block
            if let Some(driver) = self.drivers.get_mut(index) {
                if let Err(rollback) = driver.configure(&previous) {
                    warn!("Slot {} calibration could not be undone: {}", slot, rollback);
                }
            }
            return Err(e);
        }
        info!("Slot {} calibration stored", slot);
        Ok(())
    }

    fn deploy(&mut self) -> Result<(), DataloggerError> {
        self.deploy_now()
    }

    fn arm_deploy_on_trigger(&mut self) -> Result<(), DataloggerError> {
        self.change_mode(ModeEvent::Arm)
    }

    fn enter_debugging(&mut self) -> Result<(), DataloggerError> {
        self.change_mode(ModeEvent::Debug)?;
        self.folder = context(super::DEBUG_FOLDER);
        self.restart_log_file()
    }

    fn enter_interactive(&mut self) -> Result<(), DataloggerError> {
        let previous = self.mode;
        self.change_mode(ModeEvent::Exit)?;
        if previous == Mode::Interactive {
            return Ok(());
        }
        self.folder = context(super::INTERACTIVE_FOLDER);
        self.restart_log_file()
    }

    fn start_logging(&mut self) {
        self.interactive_logging = true;
    }

    fn stop_logging(&mut self) {
        self.interactive_logging = false;
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}
