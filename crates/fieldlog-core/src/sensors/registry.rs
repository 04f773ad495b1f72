//! Driver registry: sensor type code and name to constructor.

use alloc::boxed::Box;

use super::dht22::{DHT22, Dht22};
use super::driver_template::{DRIVER_TEMPLATE, DriverTemplate};
use super::generic_analog::{GENERIC_ANALOG, GenericAnalog};
use super::sht4x::{SHT4X, Sht4x};
use super::{SensorDriver, SensorType};

pub type DriverConstructor = fn() -> Box<dyn SensorDriver>;

/// One registered driver type
pub struct RegistryEntry {
    pub sensor_type: SensorType,
    construct: DriverConstructor,
}

impl RegistryEntry {
    pub const fn new(sensor_type: SensorType, construct: DriverConstructor) -> Self {
        Self {
            sensor_type,
            construct,
        }
    }

    /// Creates an unconfigured driver of this type.
    pub fn construct(&self) -> Box<dyn SensorDriver> {
        (self.construct)()
    }
}

fn new_generic_analog() -> Box<dyn SensorDriver> {
    Box::new(GenericAnalog::new())
}

fn new_dht22() -> Box<dyn SensorDriver> {
    Box::new(Dht22::new())
}

fn new_sht4x() -> Box<dyn SensorDriver> {
    Box::new(Sht4x::new())
}

fn new_driver_template() -> Box<dyn SensorDriver> {
    Box::new(DriverTemplate::new())
}

static STANDARD_DRIVERS: [RegistryEntry; 4] = [
    RegistryEntry::new(GENERIC_ANALOG, new_generic_analog),
    RegistryEntry::new(DHT22, new_dht22),
    RegistryEntry::new(SHT4X, new_sht4x),
    RegistryEntry::new(DRIVER_TEMPLATE, new_driver_template),
];

/// A fixed table of the driver types this firmware can instantiate.
#[derive(Clone, Copy)]
pub struct DriverRegistry {
    entries: &'static [RegistryEntry],
}

impl DriverRegistry {
    /// Every driver built into the firmware.
    pub const fn standard() -> Self {
        Self {
            entries: &STANDARD_DRIVERS,
        }
    }

    pub const fn with_entries(entries: &'static [RegistryEntry]) -> Self {
        Self { entries }
    }

    pub fn by_code(&self, code: u16) -> Option<&'static RegistryEntry> {
        let entries: &'static [RegistryEntry] = self.entries;
        entries.iter().find(|e| e.sensor_type.code == code)
    }

    pub fn by_name(&self, name: &str) -> Option<&'static RegistryEntry> {
        let entries: &'static [RegistryEntry] = self.entries;
        entries.iter().find(|e| e.sensor_type.name == name)
    }

    /// Highest valid type code. Stored codes above it mark an empty slot.
    pub fn max_type_code(&self) -> u16 {
        self.entries
            .iter()
            .map(|e| e.sensor_type.code)
            .max()
            .unwrap_or(0)
    }

    pub fn sensor_types(&self) -> impl Iterator<Item = SensorType> + use<> {
        let entries: &'static [RegistryEntry] = self.entries;
        entries.iter().map(|e| e.sensor_type)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_names_are_unique() {
        let registry = DriverRegistry::standard();
        for a in registry.sensor_types() {
            let same_code = registry.sensor_types().filter(|b| b.code == a.code).count();
            let same_name = registry.sensor_types().filter(|b| b.name == a.name).count();
            assert_eq!(same_code, 1);
            assert_eq!(same_name, 1);
        }
    }

    #[test]
    fn test_lookup_constructs_matching_driver() {
        let registry = DriverRegistry::standard();
        let entry = registry.by_name("dht22").unwrap();
        let driver = entry.construct();
        assert_eq!(driver.sensor_type(), DHT22);
        assert_eq!(registry.by_code(DHT22.code).unwrap().sensor_type, DHT22);
    }

    #[test]
    fn test_unknown_type() {
        let registry = DriverRegistry::standard();
        assert!(registry.by_name("bme280").is_none());
        assert!(registry.by_code(registry.max_type_code() + 1).is_none());
        assert_eq!(registry.max_type_code(), 3);
    }
}
