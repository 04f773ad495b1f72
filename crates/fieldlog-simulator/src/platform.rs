//! A simulated logger board.
//!
//! Time runs `speedup` times faster than the host clock: every delay and
//! every sleep is shortened by that factor, and the uptime and wall clock
//! seen by the controller advance by the same factor. Sensor values come
//! from slow synthetic signals with a little seeded noise.

use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::Utc;
use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use fieldlog_core::Platform;
use fieldlog_core::power::{InterruptMask, PowerManagement, WakeLatch, WakeSource};
use fieldlog_core::sensors::sht4x::{DEFAULT_ADDRESS, crc8};
use fieldlog_core::sensors::{AdcSelect, Humiture, SensorError, SensorIo};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

// ---------------------------------------------------------------------------
// Board constants
// ---------------------------------------------------------------------------

/// Number of analog ports per ADC
const ANALOG_PORTS: u8 = 5;

/// Pin-level humidity sensors are wired to pins 0..7
const HUMITURE_PINS: u8 = 7;

/// Host time between checks for a manual wake while asleep
const WAKE_POLL: StdDuration = StdDuration::from_millis(20);

/// Interrupts enabled while awake, and the wake-only set while asleep
const AWAKE_INTERRUPTS: [u32; 4] = [0x0000_01FF, 0x0000_0003, 0, 0];
const WAKE_INTERRUPTS: [u32; 4] = [0x0000_0101, 0, 0, 0];

/// SHT4x measurement commands answered by the simulated sensor
const SHT4X_MEASURE: [u8; 3] = [0xFD, 0xF6, 0xE0];
const SHT4X_SOFT_RESET: u8 = 0x94;

// ---------------------------------------------------------------------------
// Synthetic signals
// ---------------------------------------------------------------------------

/// Generates sensor readings that vary smoothly over board time.
pub struct SignalGenerator {
    rng: StdRng,
    /// Probability that a pin-level read comes back as NaN
    humiture_fault_rate: f64,
}

impl SignalGenerator {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng,
            humiture_fault_rate: 0.02,
        }
    }

    /// Temperature: 20–26 °C sinusoidal with slow drift
    pub fn temperature(&mut self, t: f64) -> f64 {
        23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos() + self.noise(0.05)
    }

    /// Humidity: 40–60 % with a different period
    pub fn humidity(&mut self, t: f64) -> f64 {
        (50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos() + self.noise(0.2))
            .clamp(0.0, 100.0)
    }

    /// Raw conversion for an analog port. The internal ADC is 12 bit and the
    /// external one 16 bit; each port gets its own period.
    pub fn analog(&mut self, adc: AdcSelect, port: u8, t: f64) -> u16 {
        let full_scale = match adc {
            AdcSelect::Internal => 4095.0,
            AdcSelect::External => 65535.0,
        };
        let period = 60.0 * f64::from(port + 1);
        let level = 0.5 + 0.35 * (TAU * t / period).sin() + self.noise(0.002);
        (level.clamp(0.0, 1.0) * full_scale).round() as u16
    }

    fn humiture(&mut self, t: f64) -> Humiture {
        let temperature = self.temperature(t) as f32;
        let humidity = self.humidity(t) as f32;
        if self.rng.gen_bool(self.humiture_fault_rate) {
            // A DHT22 that misses its timing reports NaN
            return Humiture {
                temperature_celsius: f32::NAN,
                relative_humidity: humidity,
            };
        }
        Humiture {
            temperature_celsius: temperature,
            relative_humidity: humidity,
        }
    }

    /// An SHT4x response frame: two big-endian words, each followed by its CRC.
    fn sht4x_frame(&mut self, t: f64) -> [u8; 6] {
        let temperature = self.temperature(t);
        let humidity = self.humidity(t);
        let raw_temperature = (((temperature + 45.0) / 175.0) * 65535.0).round() as u16;
        let raw_humidity = (((humidity + 6.0) / 125.0) * 65535.0).round() as u16;

        let mut frame = [0u8; 6];
        frame[0..2].copy_from_slice(&raw_temperature.to_be_bytes());
        frame[2] = crc8(&frame[0..2]);
        frame[3..5].copy_from_slice(&raw_humidity.to_be_bytes());
        frame[5] = crc8(&frame[3..5]);
        frame
    }

    fn noise(&mut self, amplitude: f64) -> f64 {
        self.rng.gen_range(-amplitude..=amplitude)
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

pub struct SimPlatform {
    speedup: f64,
    started: Instant,
    start_epoch: u32,
    signals: SignalGenerator,
    entropy: StdRng,
    latch: &'static WakeLatch,

    /// Board time at which the alarm fires
    alarm: Option<StdDuration>,
    bus_powered: bool,
    interrupts: [u32; 4],
    /// Command waiting for the SHT4x read that follows it
    sht4x_command: Option<u8>,
}

impl SimPlatform {
    /// `seed` makes signals and deployment ids reproducible.
    pub fn new(speedup: f64, seed: Option<u64>, latch: &'static WakeLatch) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let signals = SignalGenerator::new(StdRng::seed_from_u64(rng.next_u64()));
        let start_epoch = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);

        Self {
            speedup,
            started: Instant::now(),
            start_epoch,
            signals,
            entropy: rng,
            latch,
            alarm: None,
            bus_powered: true,
            interrupts: AWAKE_INTERRUPTS,
            sht4x_command: None,
        }
    }

    /// Board time since boot.
    pub fn board_time(&self) -> StdDuration {
        self.started.elapsed().mul_f64(self.speedup)
    }

    fn board_seconds(&self) -> f64 {
        self.board_time().as_secs_f64()
    }

    /// Host time that passes while `board` elapses on the board.
    fn host_time(&self, board: StdDuration) -> StdDuration {
        board.div_f64(self.speedup)
    }

    fn require_bus(
        &self,
        sensor: &'static str,
        operation: &'static str,
    ) -> Result<(), SensorError> {
        if self.bus_powered {
            Ok(())
        } else {
            Err(SensorError::ReadFailed {
                sensor,
                operation,
                details: "peripheral power is off",
            })
        }
    }
}

impl DelayNs for SimPlatform {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(self.host_time(StdDuration::from_nanos(u64::from(ns))));
    }
}

impl SensorIo for SimPlatform {
    fn analog_read(&mut self, adc: AdcSelect, port: u8) -> Result<u16, SensorError> {
        self.require_bus("ADC", "analog read")?;
        if port >= ANALOG_PORTS {
            return Err(SensorError::ReadFailed {
                sensor: "ADC",
                operation: "analog read",
                details: "no such port",
            });
        }
        let t = self.board_seconds();
        Ok(self.signals.analog(adc, port, t))
    }

    fn read_humiture(&mut self, pin: u8) -> Result<Humiture, SensorError> {
        self.require_bus("DHT22", "read")?;
        if pin >= HUMITURE_PINS {
            return Err(SensorError::Timeout {
                sensor: "DHT22",
                operation: "start signal",
            });
        }
        let t = self.board_seconds();
        Ok(self.signals.humiture(t))
    }

    fn i2c_write(&mut self, address: u8, bytes: &[u8]) -> Result<(), SensorError> {
        if !self.bus_powered || address != DEFAULT_ADDRESS {
            return Err(SensorError::Bus { address });
        }
        match bytes.first() {
            Some(&SHT4X_SOFT_RESET) => self.sht4x_command = None,
            Some(command) if SHT4X_MEASURE.contains(command) => {
                self.sht4x_command = Some(*command);
            }
            _ => debug!("SHT4x ignored write {:02X?}", bytes),
        }
        Ok(())
    }

    fn i2c_read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), SensorError> {
        if !self.bus_powered || address != DEFAULT_ADDRESS {
            return Err(SensorError::Bus { address });
        }
        if self.sht4x_command.take().is_none() || buffer.len() != 6 {
            return Err(SensorError::ReadFailed {
                sensor: "SHT4x",
                operation: "read",
                details: "no conversion pending",
            });
        }
        let t = self.board_seconds();
        buffer.copy_from_slice(&self.signals.sht4x_frame(t));
        Ok(())
    }

    fn epoch_seconds(&mut self) -> u32 {
        self.start_epoch
            .saturating_add(u32::try_from(self.board_time().as_secs()).unwrap_or(u32::MAX))
    }
}

impl PowerManagement for SimPlatform {
    // The host has no watchdog to starve.
    fn feed_watchdog(&mut self) {}

    fn enable_watchdog(&mut self) {
        debug!("Watchdog enabled");
    }

    fn disable_watchdog(&mut self) {
        debug!("Watchdog disabled");
    }

    fn power_down_peripherals(&mut self) {
        self.bus_powered = false;
        self.sht4x_command = None;
        debug!("Peripheral power off");
    }

    fn enable_peripheral_bus(&mut self) {
        self.bus_powered = true;
        debug!("Peripheral power on");
    }

    fn reset_peripherals(&mut self) {
        self.sht4x_command = None;
    }

    fn configure_peripherals(&mut self) {
        debug!("ADC and expanders configured");
    }

    fn mask_interrupts_except_wake(&mut self) -> InterruptMask {
        let saved = self.interrupts;
        self.interrupts = WAKE_INTERRUPTS;
        InterruptMask::new(saved)
    }

    fn restore_interrupts(&mut self, mask: InterruptMask) {
        self.interrupts = *mask.saved();
    }

    fn schedule_alarm(&mut self, after: Duration) {
        let after = StdDuration::from_micros(after.as_micros());
        self.alarm = Some(self.board_time() + after);
    }

    fn enter_low_power(&mut self) -> WakeSource {
        let Some(deadline) = self.alarm.take() else {
            warn!("Entered low power with no alarm set; waking at once");
            return WakeSource::Alarm;
        };

        let board_sleep = deadline.saturating_sub(self.board_time());
        info!(
            "Sleeping {:.0} s ({:.1} s host time)",
            board_sleep.as_secs_f64(),
            self.host_time(board_sleep).as_secs_f64()
        );

        loop {
            if let Some(source) = self.latch.take() {
                return source;
            }
            let now = self.board_time();
            if now >= deadline {
                self.latch.record(WakeSource::Alarm);
                continue;
            }
            thread::sleep(self.host_time(deadline - now).min(WAKE_POLL));
        }
    }
}

impl Platform for SimPlatform {
    fn uptime_millis(&mut self) -> u32 {
        self.board_time().as_millis() as u32
    }

    /// A cell that starts full and sags slowly over board time.
    fn battery_volts(&mut self) -> f32 {
        let hours = self.board_seconds() / 3600.0;
        (4.15 - 0.002 * hours).max(3.3) as f32
    }

    fn unique_id(&self) -> [u8; 12] {
        *b"FIELDLOG-SIM"
    }

    fn fill_random(&mut self, buffer: &mut [u8]) {
        self.entropy.fill_bytes(buffer);
    }
}
