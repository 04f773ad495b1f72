//! CSV record and header formatting.
//!
//! Every line starts with the status fields, then each driver's fields in
//! table order, then the user note and value:
//!
//! ```text
//! site,deployment,deployed_at,uuid,time.s,time.h,battery.V,<drivers...>,user_note,user_value
//! ```

use alloc::string::String;
use core::fmt::Write;

use chrono::{DateTime, Datelike, Timelike};
use uuid::Uuid;

use crate::sensors::DriverTable;

/// Column names of the status fields
pub const STATUS_HEADER: &str = "site,deployment,deployed_at,uuid,time.s,time.h,battery.V";

/// Column names of the trailing user fields
pub const USER_HEADER: &str = "user_note,user_value";

/// Wall-clock anchor for a measurement cycle.
///
/// The real-time clock has one-second resolution and may not tick while the
/// device sleeps, so line times are the anchor epoch plus uptime elapsed
/// since the anchor was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeAnchor {
    pub epoch: u32,
    pub offset_millis: u32,
}

/// A point in time with millisecond resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: u32,
    pub millis: u16,
}

impl TimeAnchor {
    pub fn new(epoch: u32, offset_millis: u32) -> Self {
        Self {
            epoch,
            offset_millis,
        }
    }

    pub fn at(&self, uptime_millis: u32) -> Timestamp {
        let elapsed = uptime_millis.wrapping_sub(self.offset_millis);
        Timestamp {
            seconds: self.epoch.wrapping_add(elapsed / 1000),
            millis: (elapsed % 1000) as u16,
        }
    }
}

/// Header row for the given driver table.
pub fn header_row(drivers: &DriverTable) -> String {
    let mut row = String::from(STATUS_HEADER);
    let columns = drivers.column_headers();
    if !columns.is_empty() {
        row.push(',');
        row.push_str(&columns);
    }
    row.push(',');
    row.push_str(USER_HEADER);
    row
}

/// `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn human_timestamp(seconds: u32) -> heapless::String<20> {
    let mut text = heapless::String::new();
    if let Some(time) = DateTime::from_timestamp(i64::from(seconds), 0) {
        let _ = write!(
            text,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            time.year(),
            time.month(),
            time.day(),
            time.hour(),
            time.minute(),
            time.second()
        );
    }
    text
}

/// Deployment id as 32 upper-case hex digits.
pub fn deployment_hex(identifier: &[u8; 16]) -> heapless::String<32> {
    let mut buffer = [0u8; 32];
    let hex = Uuid::from_bytes(*identifier).simple().encode_upper(&mut buffer);
    let mut text = heapless::String::new();
    let _ = text.push_str(hex);
    text
}

/// Device unique id as 24 upper-case hex digits.
pub fn device_hex(unique_id: &[u8; 12]) -> heapless::String<24> {
    let mut text = heapless::String::new();
    for byte in unique_id {
        let _ = write!(text, "{:02X}", byte);
    }
    text
}

/// Status fields written at the start of every record
#[derive(Debug, Clone, Copy)]
pub struct StatusFields<'a> {
    pub site: &'a str,
    pub deployment_identifier: &'a [u8; 16],
    pub deployment_timestamp: u32,
    pub device_uuid: &'a [u8; 12],
    pub time: Timestamp,
    pub battery_volts: f32,
}

/// One complete CSV record, without the line terminator.
pub fn format_record(
    status: &StatusFields<'_>,
    drivers: &DriverTable,
    user_note: &str,
    user_value: Option<i32>,
) -> String {
    let mut line = String::new();
    let _ = write!(
        line,
        "{},{},{},{},{}.{:03},{},{:.2}",
        status.site,
        deployment_hex(status.deployment_identifier),
        status.deployment_timestamp,
        device_hex(status.device_uuid),
        status.time.seconds,
        status.time.millis,
        human_timestamp(status.time.seconds),
        status.battery_volts
    );

    let fields = drivers.data_fields();
    if !drivers.is_empty() {
        line.push(',');
        line.push_str(&fields);
    }

    line.push(',');
    line.push_str(user_note);
    line.push(',');
    if let Some(value) = user_value {
        let _ = write!(line, "{}", value);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorDriver;
    use crate::sensors::driver_template::DriverTemplate;
    use alloc::boxed::Box;
    use serde_json::json;

    fn table() -> DriverTable {
        let mut driver = DriverTemplate::new();
        driver
            .configure_from_json(&json!({"slot": 1, "tag": "RAMP", "readingCycle": 1, "start": 7}))
            .unwrap();
        let mut table = DriverTable::new();
        table.insert_or_replace(Box::new(driver));
        table
    }

    #[test]
    fn test_header_row() {
        assert_eq!(
            header_row(&table()),
            "site,deployment,deployed_at,uuid,time.s,time.h,battery.V,RAMP_value,user_note,user_value"
        );
        assert_eq!(
            header_row(&DriverTable::new()),
            "site,deployment,deployed_at,uuid,time.s,time.h,battery.V,user_note,user_value"
        );
    }

    #[test]
    fn test_anchor_adds_elapsed_uptime() {
        let anchor = TimeAnchor::new(1_000, 5_000);
        assert_eq!(
            anchor.at(7_250),
            Timestamp {
                seconds: 1_002,
                millis: 250
            }
        );
    }

    #[test]
    fn test_human_timestamp() {
        assert_eq!(human_timestamp(0).as_str(), "1970-01-01 00:00:00");
        assert_eq!(human_timestamp(1_700_000_000).as_str(), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_hex_fields() {
        let mut id = [0u8; 16];
        id[0] = 0xAB;
        id[15] = 0x01;
        assert_eq!(
            deployment_hex(&id).as_str(),
            "AB000000000000000000000000000001"
        );
        assert_eq!(device_hex(&[0x0F; 12]).as_str(), "0F0F0F0F0F0F0F0F0F0F0F0F");
    }

    #[test]
    fn test_record_field_order() {
        let mut drivers = table();
        let mut io = crate::testing::FakePlatform::new();
        drivers.measure_all(&mut io, false);
        let status = StatusFields {
            site: "SITE1",
            deployment_identifier: &[0x11; 16],
            deployment_timestamp: 1_700_000_000,
            device_uuid: &[0x22; 12],
            time: Timestamp {
                seconds: 1_700_000_001,
                millis: 5,
            },
            battery_volts: 3.7,
        };

        let line = format_record(&status, &drivers, "rain", Some(-3));

        assert_eq!(
            line,
            "SITE1,11111111111111111111111111111111,1700000000,222222222222222222222222,\
             1700000001.005,2023-11-14 22:13:21,3.70,7,rain,-3"
        );
    }

    #[test]
    fn test_missing_user_value_is_empty() {
        let status = StatusFields {
            site: "S",
            deployment_identifier: &[0; 16],
            deployment_timestamp: 0,
            device_uuid: &[0; 12],
            time: Timestamp {
                seconds: 0,
                millis: 0,
            },
            battery_volts: 0.0,
        };
        let line = format_record(&status, &DriverTable::new(), "", None);
        assert!(line.ends_with(",0.00,,"));
    }
}
