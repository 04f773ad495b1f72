//! Hardware-independent control core for the fieldlog datalogger
//!
//! This crate contains all platform-agnostic logic for the environmental
//! datalogger: the operating mode state machine, the burst and measurement
//! cycle scheduler, the sensor driver contract and its drivers, the driver
//! table, the persistent configuration layout, measurement log formatting,
//! and the call sequencing around low-power sleep.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the simulator and tests).
//! Hardware is reached only through the traits in [`platform`], [`power`],
//! [`config`] and [`storage`].

#![no_std]

extern crate alloc;

pub mod config;
pub mod datalogger;
pub mod error;
pub mod platform;
pub mod power;
pub mod sensors;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use datalogger::{CommandSurface, ControlChannel, Datalogger, Mode, NoControl};
pub use error::{ConfigError, DataloggerError};
pub use platform::Platform;
