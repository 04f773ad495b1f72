//! Test doubles shared by the unit tests.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::config::{ConfigStore, EepromError, RamEeprom};
use crate::platform::Platform;
use crate::power::{InterruptMask, PowerManagement, WakeSource};
use crate::sensors::sht4x::crc8;
use crate::sensors::{AdcSelect, Humiture, SensorError, SensorIo};
use crate::storage::LogStorage;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// A scripted board with a virtual clock.
///
/// Uptime only advances through delays. The RTC epoch also advances by the
/// scheduled alarm on every sleep.
pub struct FakePlatform {
    pub analog: [u16; 5],
    pub analog_failures: u32,
    pub analog_reads: u32,
    pub humiture: Humiture,
    pub i2c_frame: [u8; 6],
    pub i2c_writes: Vec<(u8, u8)>,
    pub epoch_base: u32,
    pub elapsed_ns: u64,
    pub slept_secs: u64,
    pub delays_ms: Vec<u32>,
    /// Power management calls in order
    pub calls: Vec<&'static str>,
    pub sleeps: u32,
    pub alarm: Option<Duration>,
    /// Wake sources to report, `Alarm` once exhausted
    pub wake_sources: VecDeque<WakeSource>,
    pub random_counter: u8,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            analog: [0; 5],
            analog_failures: 0,
            analog_reads: 0,
            humiture: Humiture {
                temperature_celsius: 20.0,
                relative_humidity: 50.0,
            },
            i2c_frame: [0; 6],
            i2c_writes: Vec::new(),
            epoch_base: 1_700_000_000,
            elapsed_ns: 0,
            slept_secs: 0,
            delays_ms: Vec::new(),
            calls: Vec::new(),
            sleeps: 0,
            alarm: None,
            wake_sources: VecDeque::new(),
            random_counter: 0,
        }
    }

    /// Loads an SHT4x response frame with valid CRCs.
    pub fn set_sht4x_words(&mut self, temperature: u16, humidity: u16) {
        let t = temperature.to_be_bytes();
        let h = humidity.to_be_bytes();
        self.i2c_frame = [t[0], t[1], crc8(&t), h[0], h[1], crc8(&h)];
    }
}

impl DelayNs for FakePlatform {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += u64::from(ns);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delays_ms.push(ms);
        self.elapsed_ns += u64::from(ms) * 1_000_000;
    }
}

impl SensorIo for FakePlatform {
    fn analog_read(&mut self, _adc: AdcSelect, port: u8) -> Result<u16, SensorError> {
        self.analog_reads += 1;
        if self.analog_failures > 0 {
            self.analog_failures -= 1;
            return Err(SensorError::ReadFailed {
                sensor: "fake ADC",
                operation: "convert",
                details: "scripted failure",
            });
        }
        Ok(self.analog[port as usize])
    }

    fn read_humiture(&mut self, _pin: u8) -> Result<Humiture, SensorError> {
        Ok(self.humiture)
    }

    fn i2c_write(&mut self, address: u8, bytes: &[u8]) -> Result<(), SensorError> {
        self.i2c_writes.push((address, bytes.first().copied().unwrap_or(0)));
        Ok(())
    }

    fn i2c_read(&mut self, _address: u8, buffer: &mut [u8]) -> Result<(), SensorError> {
        let len = buffer.len().min(self.i2c_frame.len());
        buffer[..len].copy_from_slice(&self.i2c_frame[..len]);
        Ok(())
    }

    fn epoch_seconds(&mut self) -> u32 {
        self.epoch_base + (self.elapsed_ns / 1_000_000_000 + self.slept_secs) as u32
    }
}

impl PowerManagement for FakePlatform {
    fn feed_watchdog(&mut self) {}

    fn enable_watchdog(&mut self) {
        self.calls.push("enable_watchdog");
    }

    fn disable_watchdog(&mut self) {
        self.calls.push("disable_watchdog");
    }

    fn power_down_peripherals(&mut self) {
        self.calls.push("power_down_peripherals");
    }

    fn enable_peripheral_bus(&mut self) {
        self.calls.push("enable_peripheral_bus");
    }

    fn reset_peripherals(&mut self) {
        self.calls.push("reset_peripherals");
    }

    fn configure_peripherals(&mut self) {
        self.calls.push("configure_peripherals");
    }

    fn mask_interrupts_except_wake(&mut self) -> InterruptMask {
        self.calls.push("mask_interrupts");
        InterruptMask::new([0xA5; 4])
    }

    fn restore_interrupts(&mut self, mask: InterruptMask) {
        assert_eq!(mask.saved(), &[0xA5; 4]);
        self.calls.push("restore_interrupts");
    }

    fn schedule_alarm(&mut self, after: Duration) {
        self.calls.push("schedule_alarm");
        self.alarm = Some(after);
    }

    fn enter_low_power(&mut self) -> WakeSource {
        self.calls.push("enter_low_power");
        self.sleeps += 1;
        let source = self.wake_sources.pop_front().unwrap_or(WakeSource::Alarm);
        if source == WakeSource::Alarm {
            self.slept_secs += self.alarm.map_or(0, |a| a.as_secs());
        }
        source
    }
}

impl Platform for FakePlatform {
    fn uptime_millis(&mut self) -> u32 {
        (self.elapsed_ns / 1_000_000) as u32
    }

    fn battery_volts(&mut self) -> f32 {
        3.7
    }

    fn unique_id(&self) -> [u8; 12] {
        [0x5A; 12]
    }

    fn fill_random(&mut self, buffer: &mut [u8]) {
        for byte in buffer.iter_mut() {
            self.random_counter = self.random_counter.wrapping_add(1);
            *byte = self.random_counter;
        }
    }
}

// ---------------------------------------------------------------------------
// Log storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Mounted,
    Created(String, String),
    Line(String),
    Closed,
    Reopened,
}

/// Log storage that records every operation.
pub struct MemoryLog {
    pub events: Vec<LogEvent>,
    pending: String,
    pub fail_mount: bool,
    pub fail_reopen: bool,
    pub fail_append: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLogError;

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            pending: String::new(),
            fail_mount: false,
            fail_reopen: false,
            fail_append: false,
        }
    }

    /// Every complete line written, across all files.
    pub fn lines(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                LogEvent::Line(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of created files, in order.
    pub fn created(&self) -> Vec<(String, String)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                LogEvent::Created(folder, name) => Some((folder.clone(), name.clone())),
                _ => None,
            })
            .collect()
    }
}

impl LogStorage for MemoryLog {
    type Error = MemoryLogError;

    fn mount(&mut self) -> Result<(), MemoryLogError> {
        if self.fail_mount {
            return Err(MemoryLogError);
        }
        self.events.push(LogEvent::Mounted);
        Ok(())
    }

    fn create_file(&mut self, folder: &str, file_name: &str) -> Result<(), MemoryLogError> {
        self.events
            .push(LogEvent::Created(folder.into(), file_name.into()));
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), MemoryLogError> {
        if self.fail_append {
            return Err(MemoryLogError);
        }
        for byte in bytes {
            if *byte == b'\n' {
                let line = core::mem::take(&mut self.pending);
                self.events.push(LogEvent::Line(line));
            } else {
                self.pending.push(char::from(*byte));
            }
        }
        Ok(())
    }

    fn flush_and_close(&mut self) -> Result<(), MemoryLogError> {
        self.events.push(LogEvent::Closed);
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), MemoryLogError> {
        if self.fail_reopen {
            return Err(MemoryLogError);
        }
        self.events.push(LogEvent::Reopened);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Configuration store
// ---------------------------------------------------------------------------

/// A RAM configuration store whose writes can be made to fail.
pub struct FlakyEeprom {
    pub memory: RamEeprom<1024>,
    pub fail_writes: bool,
}

impl FlakyEeprom {
    pub fn new(memory: RamEeprom<1024>) -> Self {
        Self {
            memory,
            fail_writes: false,
        }
    }
}

impl ConfigStore for FlakyEeprom {
    type Error = EepromError;

    fn read_block(&mut self, offset: u16, buffer: &mut [u8]) -> Result<(), EepromError> {
        self.memory.read_block(offset, buffer)
    }

    fn write_block(&mut self, offset: u16, bytes: &[u8]) -> Result<(), EepromError> {
        if self.fail_writes {
            return Err(EepromError::Bus(ErrorKind::Other));
        }
        self.memory.write_block(offset, bytes)
    }
}

// ---------------------------------------------------------------------------
// I2C EEPROM
// ---------------------------------------------------------------------------

/// An I2C bus with a 24LC08-style EEPROM behind addresses 0x50..=0x53.
pub struct FakeI2c {
    pub memory: [u8; 1024],
    pointer: usize,
    /// Write transfers carrying data
    pub writes: usize,
    pub fail: bool,
}

impl FakeI2c {
    pub fn new() -> Self {
        Self {
            memory: [0xFF; 1024],
            pointer: 0,
            writes: 0,
            fail: false,
        }
    }
}

impl ErrorType for FakeI2c {
    type Error = ErrorKind;
}

impl I2c for FakeI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), ErrorKind> {
        if self.fail || !(0x50..=0x53).contains(&address) {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        let block = usize::from(address - 0x50) * 256;
        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    let Some((word, data)) = bytes.split_first() else {
                        continue;
                    };
                    self.pointer = block + usize::from(*word);
                    if !data.is_empty() {
                        self.memory[self.pointer..self.pointer + data.len()]
                            .copy_from_slice(data);
                        self.pointer += data.len();
                        self.writes += 1;
                    }
                }
                Operation::Read(buffer) => {
                    let len = buffer.len();
                    buffer.copy_from_slice(&self.memory[self.pointer..self.pointer + len]);
                    self.pointer += len;
                }
            }
        }
        Ok(())
    }
}

/// A delay that returns immediately.
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
