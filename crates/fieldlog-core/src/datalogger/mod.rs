//! The datalogger controller.
//!
//! [`Datalogger`] owns the settings, the driver table, the measurement log
//! and the platform. The surrounding firmware calls [`Datalogger::setup`]
//! once and then [`Datalogger::step`] forever:
//!
//! - **interactive**: poll the control channel, optionally log a line
//! - **debugging**: poll, log a line, wait five seconds
//! - **logging**: one measurement pass per step until the burst completes,
//!   then the next burst or the sleep bracket and a new measurement cycle
//! - **deploy on trigger**: sleep, deploy on wake, start measuring
//!
//! A deploy requested from the control channel takes effect after the
//! current step, which then sleeps until the first measurement cycle.

mod commands;
mod cycle;
mod mode;

pub use commands::*;
pub use cycle::*;
pub use mode::*;

use alloc::string::String;

use embassy_time::Duration;
use log::{debug, error, info, warn};
use uuid::Builder;

use crate::config::{ConfigStore, DeviceSettings, TOTAL_SLOTS, slot_address};
use crate::error::{DataloggerError, context, describe};
use crate::platform::Platform;
use crate::power::WakeSource;
use crate::sensors::slot_config::{SLOT_BLOCK_LEN, SlotConfig};
use crate::sensors::{DriverRegistry, DriverTable, SensorDriver};
use crate::storage::record::{StatusFields, TimeAnchor, format_record, header_row};
use crate::storage::{LogStorage, MAX_FOLDER_LEN, MeasurementLog};

/// Log folder in interactive use and while armed
pub const INTERACTIVE_FOLDER: &str = "INTERACT";
/// Log folder in debugging mode
pub const DEBUG_FOLDER: &str = "DEBUG";
/// Log folder when the persisted mode was unreadable
pub const NOT_DEPLOYED_FOLDER: &str = "NODEPLOY";
/// Log folder for a deployment without a site name
pub const UNNAMED_FOLDER: &str = "UNNAMED";

/// Pause between debugging iterations
pub const DEBUG_INTERVAL_MS: u32 = 5000;

/// Times the control channel is polled when input arrives while deployed
pub const EXIT_POLL_ATTEMPTS: usize = 10;

/// The datalogger control core.
pub struct Datalogger<E, L, P> {
    config_store: E,
    log: MeasurementLog<L>,
    platform: P,
    registry: DriverRegistry,
    drivers: DriverTable,
    settings: DeviceSettings,
    mode: Mode,
    folder: heapless::String<MAX_FOLDER_LEN>,
    cycle: MeasurementCycle,
    device_id: [u8; 12],
    /// Set at construction, cleared after the first step or deploy
    power_cycle: bool,
    interactive_logging: bool,
    user_note: heapless::String<USER_NOTE_LEN>,
    user_value: Option<i32>,
}

impl<E, L, P> Datalogger<E, L, P>
where
    E: ConfigStore,
    L: LogStorage,
    P: Platform,
{
    /// Loads the settings and resolves the starting mode.
    ///
    /// An unrecognized persisted mode falls back to interactive.
    pub fn new(config_store: E, storage: L, platform: P) -> Result<Self, DataloggerError> {
        Self::with_registry(config_store, storage, platform, DriverRegistry::standard())
    }

    pub fn with_registry(
        mut config_store: E,
        storage: L,
        platform: P,
        registry: DriverRegistry,
    ) -> Result<Self, DataloggerError> {
        let settings = DeviceSettings::load(&mut config_store).map_err(persistence)?;

        let (mode, folder) = match Mode::from_code(settings.mode_code) {
            Some(Mode::Logging) => (Mode::Logging, deployment_folder(&settings)),
            Some(Mode::Debugging) => (Mode::Debugging, DEBUG_FOLDER),
            Some(mode) => (mode, INTERACTIVE_FOLDER),
            None => {
                error!(
                    "Stored mode {:#04x} is not valid, starting interactive",
                    settings.mode_code
                );
                (Mode::Interactive, NOT_DEPLOYED_FOLDER)
            }
        };
        let folder: heapless::String<MAX_FOLDER_LEN> = context(folder);
        info!("Starting in {} mode", mode.label());

        let device_id = platform.unique_id();
        let cycle = MeasurementCycle::new(settings.burst_number);

        Ok(Self {
            config_store,
            log: MeasurementLog::new(storage),
            platform,
            registry,
            drivers: DriverTable::new(),
            settings,
            mode,
            folder,
            cycle,
            device_id,
            power_cycle: true,
            interactive_logging: false,
            user_note: heapless::String::new(),
            user_value: None,
        })
    }

    /// Builds the driver table and opens the log.
    ///
    /// `Err(DataloggerError::StorageUnavailable)` means the log medium is
    /// missing; the caller should halt rather than run without storage.
    pub fn setup(&mut self) -> Result<(), DataloggerError> {
        self.platform.enable_watchdog();
        self.load_sensor_configurations()?;
        self.log.mount()?;
        self.restart_log_file()?;
        self.reset_cycle();
        info!(
            "Setup complete: {} sensor(s), interval {} min, {} burst(s)",
            self.drivers.len(),
            self.settings.interval_minutes,
            self.settings.burst_number
        );
        Ok(())
    }

    /// One iteration of the main loop.
    pub fn step(&mut self, control: &mut dyn ControlChannel) -> Result<(), DataloggerError> {
        self.platform.feed_watchdog();
        let result = match self.mode {
            Mode::Logging => self.logging_step(control),
            Mode::DeployOnTrigger => self.sleep_and_restart(control),
            Mode::Interactive | Mode::Debugging => self.interactive_step(control),
        };
        self.power_cycle = false;
        result
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn drivers(&self) -> &DriverTable {
        &self.drivers
    }

    pub fn log(&self) -> &MeasurementLog<L> {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MeasurementLog<L> {
        &mut self.log
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn config_store(&self) -> &E {
        &self.config_store
    }

    pub fn config_store_mut(&mut self) -> &mut E {
        &mut self.config_store
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn cycle(&self) -> &MeasurementCycle {
        &self.cycle
    }

    // -- loop bodies -------------------------------------------------------

    fn logging_step(&mut self, control: &mut dyn ControlChannel) -> Result<(), DataloggerError> {
        if self.power_cycle {
            info!("Power cycled while deployed, redeploying");
            self.deploy_now()?;
            return self.sleep_and_restart(control);
        }

        match self.cycle.advance(self.drivers.burst_completed()) {
            CycleStep::Measure => {
                self.measure(true);
                self.write_measurement()
            }
            CycleStep::NextBurst => {
                self.log_burst_summary();
                if self.exit_requested(control) {
                    return Ok(());
                }
                debug!(
                    "Burst {} of {} done",
                    self.cycle.completed_bursts(),
                    self.cycle.burst_number()
                );
                let delay = u32::from(self.settings.inter_burst_delay_secs) * 1000;
                if delay > 0 {
                    self.platform.delay_ms(delay);
                }
                self.drivers.initialize_burst();
                Ok(())
            }
            CycleStep::Sleep => {
                self.log_burst_summary();
                if self.exit_requested(control) {
                    return Ok(());
                }
                self.sleep_and_restart(control)
            }
        }
    }

    fn interactive_step(
        &mut self,
        control: &mut dyn ControlChannel,
    ) -> Result<(), DataloggerError> {
        control.poll(self);

        match self.mode {
            // A command deployed or armed the logger
            Mode::Logging | Mode::DeployOnTrigger => self.sleep_and_restart(control),
            Mode::Interactive => {
                if self.interactive_logging {
                    self.measure(false);
                    self.write_measurement()?;
                }
                Ok(())
            }
            Mode::Debugging => {
                self.measure(false);
                self.write_measurement()?;
                self.platform.delay_ms(DEBUG_INTERVAL_MS);
                Ok(())
            }
        }
    }

    /// Sleeps, then starts a measurement cycle unless the user asked to exit.
    /// An armed logger deploys first.
    ///
    /// The cycle restarts even when the log could not be reopened; the
    /// first write of the cycle then starts a new file.
    fn sleep_and_restart(
        &mut self,
        control: &mut dyn ControlChannel,
    ) -> Result<(), DataloggerError> {
        let (source, reopened) = self.stop_and_await_trigger();

        if source == WakeSource::ManualWake {
            info!("Woken by user");
            if self.exit_requested(control) {
                return Ok(());
            }
        }

        let result = if self.mode == Mode::DeployOnTrigger {
            info!("Trigger received");
            self.deploy_now()
        } else {
            reopened
        };
        self.start_measurement_cycle();
        result
    }

    /// Gives pending control input a chance to run and reports whether it
    /// left the logger interactive.
    fn exit_requested(&mut self, control: &mut dyn ControlChannel) -> bool {
        if !control.input_pending() {
            return false;
        }
        for _ in 0..EXIT_POLL_ATTEMPTS {
            control.poll(self);
        }
        if self.mode == Mode::Interactive {
            info!("Leaving deployment for interactive use");
            return true;
        }
        false
    }

    // -- sleep bracket -----------------------------------------------------

    /// Closes the log, powers down and sleeps until an alarm or manual wake,
    /// then brings everything back in dependency order. Returns the wake
    /// source along with the outcome of reopening the log.
    fn stop_and_await_trigger(&mut self) -> (WakeSource, Result<(), DataloggerError>) {
        let minutes = u64::from(self.settings.interval_minutes);
        info!("Sleeping for {} min", minutes);
        self.platform
            .schedule_alarm(Duration::from_secs(minutes * 60));

        for driver in self.drivers.iter_mut() {
            driver.hibernate(&mut self.platform);
        }
        let closed = self.log.close();
        self.platform.power_down_peripherals();
        self.platform.disable_watchdog();

        // Nothing but the wake sources may run until the mask is restored
        let mask = self.platform.mask_interrupts_except_wake();
        let source = self.platform.enter_low_power();
        self.platform.restore_interrupts(mask);

        self.platform.enable_watchdog();
        self.platform.enable_peripheral_bus();
        self.platform.reset_peripherals();
        self.platform.configure_peripherals();
        for driver in self.drivers.iter_mut() {
            driver.wake(&mut self.platform);
        }
        debug!("Awake ({:?})", source);

        if let Err(e) = closed {
            warn!("Closing the log before sleep failed: {}", e);
        }
        let epoch = self.platform.epoch_seconds();
        (source, self.log.reopen_or_rotate(epoch))
    }

    // -- measurement -------------------------------------------------------

    fn reset_cycle(&mut self) {
        let anchor = TimeAnchor::new(
            self.platform.epoch_seconds(),
            self.platform.uptime_millis(),
        );
        self.cycle.start(anchor, self.settings.burst_number);
        self.drivers.initialize_burst();
    }

    fn start_measurement_cycle(&mut self) {
        self.reset_cycle();
        let settle = u32::from(self.settings.start_up_delay_ms);
        if settle > 0 {
            debug!("Start-up delay {} ms", settle);
            self.platform.delay_ms(settle);
        }
    }

    fn measure(&mut self, performing_burst: bool) {
        let failures = self.drivers.measure_all(&mut self.platform, performing_burst);
        if failures > 0 {
            debug!("{} reading(s) failed this pass", failures);
        }
    }

    fn format_line(&mut self) -> String {
        let time = self.cycle.anchor().at(self.platform.uptime_millis());
        let battery_volts = self.platform.battery_volts();
        let status = StatusFields {
            site: &self.settings.site_name,
            deployment_identifier: &self.settings.deployment_identifier,
            deployment_timestamp: self.settings.deployment_timestamp,
            device_uuid: &self.device_id,
            time,
            battery_volts,
        };
        format_record(&status, &self.drivers, &self.user_note, self.user_value)
    }

    /// Appends a record. A failed write moves to a fresh file and retries
    /// once.
    fn write_measurement(&mut self) -> Result<(), DataloggerError> {
        let line = self.format_line();
        if let Err(e) = self.log.write_line(&line) {
            warn!("{}, starting a new log file", e);
            self.restart_log_file()?;
            self.log.write_line(&line)?;
        }
        Ok(())
    }

    fn log_burst_summary(&self) {
        for driver in self.drivers.iter() {
            for (channel, mean) in driver.core().burst.summary() {
                match mean {
                    Some(mean) => info!("{}_{} burst mean {:.3}", driver.tag(), channel, mean),
                    None => info!("{}_{} burst mean missing", driver.tag(), channel),
                }
            }
        }
    }

    // -- configuration -----------------------------------------------------

    fn load_sensor_configurations(&mut self) -> Result<(), DataloggerError> {
        self.drivers = DriverTable::new();
        let max_type = self.registry.max_type_code();

        for slot in 0..TOTAL_SLOTS {
            let mut block = [0u8; SLOT_BLOCK_LEN];
            self.config_store
                .read_block(slot_address(slot), &mut block)
                .map_err(persistence)?;

            let code = SlotConfig::stored_type(&block);
            if code > max_type {
                continue;
            }
            let (Some(entry), Some(mut config)) =
                (self.registry.by_code(code), SlotConfig::from_bytes(&block))
            else {
                continue;
            };
            config.common.slot = slot;

            let mut driver = entry.construct();
            if let Err(e) = driver.configure(&config) {
                warn!("Slot {} configuration ignored: {}", slot + 1, e);
                continue;
            }
            if let Err(e) = driver.setup(&mut self.platform) {
                warn!("Slot {} setup failed: {}", slot + 1, e);
            }
            debug!("Slot {}: {} '{}'", slot + 1, entry.sensor_type.name, driver.tag());
            self.drivers.insert_or_replace(driver);
        }

        if self.drivers.is_empty() {
            info!("No sensors configured");
        }
        Ok(())
    }

    fn store_slot(&mut self, slot: u8, block: &[u8; SLOT_BLOCK_LEN]) -> Result<(), DataloggerError> {
        self.config_store
            .write_block(slot_address(slot), block)
            .map_err(persistence)
    }

    /// Applies `change` to a copy of the settings, normalizes it and
    /// persists it. The live settings only change once the write succeeded.
    fn update_settings(
        &mut self,
        change: impl FnOnce(&mut DeviceSettings),
    ) -> Result<(), DataloggerError> {
        let mut settings = self.settings.clone();
        change(&mut settings);
        settings.apply_defaults();
        settings.store(&mut self.config_store).map_err(persistence)?;
        self.settings = settings;
        Ok(())
    }

    fn change_mode(&mut self, event: ModeEvent) -> Result<(), DataloggerError> {
        let next = transition(self.mode, event).ok_or(DataloggerError::InvalidTransition {
            mode: self.mode,
            event,
        })?;
        self.update_settings(|s| s.mode_code = next.code())?;
        info!("Moving from {} to {} mode", self.mode.label(), next.label());
        self.mode = next;
        Ok(())
    }

    /// Starts a new file in the current folder with the current header.
    fn restart_log_file(&mut self) -> Result<(), DataloggerError> {
        if let Err(e) = self.log.close() {
            warn!("Closing the previous log failed: {}", e);
        }
        let epoch = self.platform.epoch_seconds();
        let header = header_row(&self.drivers);
        self.log.start_file(&self.folder, epoch, &header)
    }

    fn deploy_now(&mut self) -> Result<(), DataloggerError> {
        let mut random = [0u8; 16];
        self.platform.fill_random(&mut random);
        let identifier = Builder::from_random_bytes(random).into_uuid();
        let timestamp = self.platform.epoch_seconds();

        let next = transition(self.mode, ModeEvent::Deploy).unwrap_or(Mode::Logging);
        self.update_settings(|s| {
            s.deployment_identifier = *identifier.as_bytes();
            s.deployment_timestamp = timestamp;
            s.mode_code = next.code();
        })?;
        self.mode = next;
        self.power_cycle = false;
        self.folder = context(deployment_folder(&self.settings));
        info!(
            "Deployed {} at {} into {}",
            identifier.simple(),
            timestamp,
            self.folder
        );

        self.restart_log_file()?;
        self.reset_cycle();
        Ok(())
    }
}

fn deployment_folder(settings: &DeviceSettings) -> &str {
    if settings.site_name.is_empty() {
        UNNAMED_FOLDER
    } else {
        &settings.site_name
    }
}

fn persistence(error: impl core::fmt::Debug) -> DataloggerError {
    DataloggerError::Persistence(describe(&error))
}
