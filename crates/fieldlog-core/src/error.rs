//! Error types shared across the control core

use core::fmt::{Debug, Write};

use heapless::String;
use thiserror_no_std::Error;

use crate::datalogger::{Mode, ModeEvent};

/// Capacity of the free-form context carried by storage and persistence errors
pub const ERROR_CONTEXT_LEN: usize = 64;

/// Rejected configuration input.
///
/// Returned synchronously by setters, sensor configuration and calibration.
/// Prior state is always left unchanged when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("slot must be between 1 and {max}")]
    InvalidSlot { max: u8 },

    #[error("tag must be 1 to {max} characters without commas")]
    InvalidTag { max: usize },

    #[error("readingCycle must be a positive integer")]
    InvalidReadingCycle,

    #[error("invalid value for field '{0}'")]
    InvalidField(&'static str),

    #[error("unknown sensor type '{0}'")]
    UnknownSensorType(String<24>),

    #[error("configuration type does not match the requested sensor type")]
    TypeMismatch,

    #[error("malformed configuration: {0}")]
    Json(String<ERROR_CONTEXT_LEN>),

    #[error("configuration must be a JSON object")]
    NotAnObject,

    #[error("driver configuration does not fit in {0} bytes")]
    Encoding(usize),

    #[error("site name must be 1 to 8 characters of A-Z, 0-9, '_' or '-'")]
    InvalidSiteName,

    #[error("user note must be at most 31 printable ASCII characters without commas")]
    InvalidUserNote,

    #[error("calibration: {0}")]
    Calibration(&'static str),
}

impl ConfigError {
    /// Wraps a serde_json error as a malformed configuration.
    pub fn json(error: &serde_json::Error) -> Self {
        ConfigError::Json(describe(error))
    }
}

/// Errors surfaced by the datalogger controller.
///
/// Everything except [`DataloggerError::StorageUnavailable`] returned from
/// [`Datalogger::setup`](crate::Datalogger::setup) is recoverable.
#[derive(Error, Debug)]
pub enum DataloggerError {
    #[error("invalid configuration: {0}")]
    Config(ConfigError),

    #[error("storage medium unavailable: {0}")]
    StorageUnavailable(String<ERROR_CONTEXT_LEN>),

    #[error("log file error: {0}")]
    LogFile(String<ERROR_CONTEXT_LEN>),

    #[error("configuration store error: {0}")]
    Persistence(String<ERROR_CONTEXT_LEN>),

    #[error("no sensor configured in slot {0}")]
    SlotEmpty(u8),

    #[error("cannot apply {event:?} while in {mode:?} mode")]
    InvalidTransition { mode: Mode, event: ModeEvent },
}

impl From<ConfigError> for DataloggerError {
    fn from(error: ConfigError) -> Self {
        DataloggerError::Config(error)
    }
}

/// Formats any debuggable error into a fixed-capacity context string.
///
/// Output beyond the capacity is dropped.
pub fn describe<const N: usize>(error: &impl Debug) -> String<N> {
    let mut text = String::new();
    let _ = write!(text, "{:?}", error);
    text
}

/// Copies as much of `text` as fits into a fixed-capacity string.
pub fn context<const N: usize>(text: &str) -> String<N> {
    let mut out = String::new();
    for c in text.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_truncates_long_errors() {
        let long = "x".repeat(200);
        let text: String<16> = describe(&long);
        assert!(text.len() <= 16);
    }

    #[test]
    fn test_context_truncates_on_char_boundary() {
        let text: String<4> = context("ab\u{e9}cd");
        assert_eq!(text.as_str(), "ab\u{e9}");
    }

    #[test]
    fn test_config_error_converts() {
        let err: DataloggerError = ConfigError::InvalidReadingCycle.into();
        assert!(matches!(
            err,
            DataloggerError::Config(ConfigError::InvalidReadingCycle)
        ));
    }
}
