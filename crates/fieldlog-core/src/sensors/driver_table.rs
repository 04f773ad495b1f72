//! The ordered table of live drivers, one per occupied slot.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, warn};
use serde_json::Value;

use super::{SensorDriver, SensorIo};

/// Live drivers in insertion order.
///
/// Slot indices are unique: inserting a driver for an occupied slot replaces
/// the existing one in place.
#[derive(Default)]
pub struct DriverTable {
    drivers: Vec<Box<dyn SensorDriver>>,
}

impl DriverTable {
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    fn position(&self, slot: u8) -> Option<usize> {
        self.drivers.iter().position(|d| d.slot() == slot)
    }

    pub fn contains(&self, slot: u8) -> bool {
        self.position(slot).is_some()
    }

    /// Driver bound to a zero-based slot.
    pub fn get(&self, slot: u8) -> Option<&(dyn SensorDriver + 'static)> {
        self.drivers
            .iter()
            .find(|d| d.slot() == slot)
            .map(|d| &**d)
    }

    pub fn get_mut(&mut self, slot: u8) -> Option<&mut (dyn SensorDriver + 'static)> {
        self.drivers
            .iter_mut()
            .find(|d| d.slot() == slot)
            .map(|d| &mut **d)
    }

    /// Replaces the driver at the same slot, or appends it.
    ///
    /// Returns the replaced driver.
    pub fn insert_or_replace(
        &mut self,
        driver: Box<dyn SensorDriver>,
    ) -> Option<Box<dyn SensorDriver>> {
        match self.position(driver.slot()) {
            Some(index) => Some(core::mem::replace(&mut self.drivers[index], driver)),
            None => {
                self.drivers.push(driver);
                None
            }
        }
    }

    /// Removes the driver at a slot, keeping the order of the others.
    pub fn remove(&mut self, slot: u8) -> Option<Box<dyn SensorDriver>> {
        let index = self.position(slot)?;
        Some(self.drivers.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(dyn SensorDriver + 'static)> {
        self.drivers.iter().map(|d| &**d)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (dyn SensorDriver + 'static)> {
        self.drivers.iter_mut().map(|d| &mut **d)
    }

    pub fn initialize_burst(&mut self) {
        for driver in self.drivers.iter_mut() {
            driver.initialize_burst();
        }
    }

    /// True when every driver has met its reading cycle.
    pub fn burst_completed(&self) -> bool {
        self.drivers.iter().all(|d| d.burst_completed())
    }

    /// One measurement pass over every driver.
    ///
    /// During a burst a successful reading also advances the driver's burst
    /// counter. Returns the number of failed readings.
    pub fn measure_all(&mut self, io: &mut dyn SensorIo, performing_burst: bool) -> usize {
        let mut failures = 0;
        for driver in self.drivers.iter_mut() {
            if driver.take_measurement(io) {
                if performing_burst {
                    driver.increment_burst();
                }
                debug!("Slot {}: {}", driver.slot() + 1, driver.data_string());
            } else {
                warn!("Slot {} measurement skipped", driver.slot() + 1);
                failures += 1;
            }
        }
        failures
    }

    /// Tagged column headers of every driver, comma separated.
    pub fn column_headers(&self) -> String {
        join(self.drivers.iter().map(|d| d.csv_column_headers()))
    }

    /// Current data strings of every driver, comma separated.
    pub fn data_fields(&self) -> String {
        join(self.drivers.iter().map(|d| String::from(d.data_string())))
    }

    pub fn configurations_json(&self) -> Vec<Value> {
        self.drivers.iter().map(|d| d.configuration_json()).collect()
    }
}

fn join(parts: impl Iterator<Item = String>) -> String {
    let mut joined = String::new();
    for (i, part) in parts.enumerate() {
        if i > 0 {
            joined.push(',');
        }
        joined.push_str(&part);
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::driver_template::DriverTemplate;
    use crate::sensors::generic_analog::GenericAnalog;
    use crate::testing::FakePlatform;
    use serde_json::json;

    fn template(slot: u8, reading_cycle: u8) -> Box<dyn SensorDriver> {
        let mut driver = DriverTemplate::new();
        driver
            .configure_from_json(&json!({
                "slot": slot, "tag": "T", "readingCycle": reading_cycle, "start": slot
            }))
            .unwrap();
        Box::new(driver)
    }

    fn slots(table: &DriverTable) -> Vec<u8> {
        table.iter().map(|d| d.slot()).collect()
    }

    #[test]
    fn test_insert_appends_new_slots() {
        let mut table = DriverTable::new();
        assert!(table.insert_or_replace(template(3, 1)).is_none());
        assert!(table.insert_or_replace(template(1, 1)).is_none());
        assert_eq!(slots(&table), [2, 0]);
    }

    #[test]
    fn test_replace_preserves_size_and_positions() {
        let mut table = DriverTable::new();
        table.insert_or_replace(template(1, 1));
        table.insert_or_replace(template(2, 1));
        table.insert_or_replace(template(3, 1));

        let replaced = table.insert_or_replace(template(2, 7));

        assert!(replaced.is_some());
        assert_eq!(table.len(), 3);
        assert_eq!(slots(&table), [0, 1, 2]);
        assert_eq!(table.get(1).unwrap().core().common.reading_cycle, 7);
    }

    #[test]
    fn test_remove_keeps_relative_order() {
        let mut table = DriverTable::new();
        for slot in 1..=4 {
            table.insert_or_replace(template(slot, 1));
        }

        assert!(table.remove(1).is_some());
        assert_eq!(table.len(), 3);
        assert_eq!(slots(&table), [0, 2, 3]);
        assert!(table.remove(1).is_none());
        assert!(!table.contains(1));
    }

    #[test]
    fn test_lagging_driver_keeps_burst_open() {
        let mut table = DriverTable::new();
        table.insert_or_replace(template(1, 1));
        table.insert_or_replace(template(2, 3));
        let mut io = FakePlatform::new();

        table.initialize_burst();
        table.measure_all(&mut io, true);
        assert!(table.get(0).unwrap().burst_completed());
        assert!(!table.burst_completed());

        table.measure_all(&mut io, true);
        assert!(!table.burst_completed());
        table.measure_all(&mut io, true);
        assert!(table.burst_completed());
    }

    #[test]
    fn test_failed_reading_does_not_advance_burst() {
        let mut analog = GenericAnalog::new();
        analog
            .configure_from_json(&json!({
                "slot": 1, "tag": "WL", "readingCycle": 2,
                "adc_select": "internal", "sensor_port": 0
            }))
            .unwrap();
        let mut table = DriverTable::new();
        table.insert_or_replace(Box::new(analog));
        let mut io = FakePlatform::new();
        io.analog[0] = 900;
        io.analog_failures = 1;

        table.initialize_burst();
        assert_eq!(table.measure_all(&mut io, true), 1);
        let driver = table.get(0).unwrap();
        assert_eq!(driver.core().burst.readings(), 0);
        assert!(!table.burst_completed());

        io.analog[0] = 100;
        assert_eq!(table.measure_all(&mut io, true), 0);
        assert!(!table.burst_completed());
        io.analog[0] = 300;
        table.measure_all(&mut io, true);

        assert!(table.burst_completed());
        let driver = table.get(0).unwrap();
        assert_eq!(driver.core().burst.readings(), 2);
        assert_eq!(driver.burst_summary_mean("raw"), Some(200.0));
    }

    #[test]
    fn test_measurement_outside_burst_does_not_count() {
        let mut table = DriverTable::new();
        table.insert_or_replace(template(1, 1));
        let mut io = FakePlatform::new();

        table.initialize_burst();
        table.measure_all(&mut io, false);

        assert!(!table.burst_completed());
    }

    #[test]
    fn test_headers_and_fields_join_in_order() {
        let mut table = DriverTable::new();
        table.insert_or_replace(template(2, 1));
        table.insert_or_replace(template(1, 1));
        let mut io = FakePlatform::new();
        table.measure_all(&mut io, false);

        assert_eq!(table.column_headers(), "T_value,T_value");
        assert_eq!(table.data_fields(), "2,1");
        assert_eq!(table.configurations_json().len(), 2);
    }

    #[test]
    fn test_empty_table_completes_immediately() {
        assert!(DriverTable::new().burst_completed());
    }
}
