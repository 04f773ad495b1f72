//! Board services consumed by the controller.

use crate::power::PowerManagement;
use crate::sensors::SensorIo;

/// Everything the controller needs from the board besides storage and the
/// configuration memory.
pub trait Platform: SensorIo + PowerManagement {
    /// Milliseconds since boot. Wraps after about 49 days.
    fn uptime_millis(&mut self) -> u32;

    /// Battery voltage in volts.
    fn battery_volts(&mut self) -> f32;

    /// The microcontroller's factory unique id.
    fn unique_id(&self) -> [u8; 12];

    /// Fill `buffer` from the hardware entropy source.
    fn fill_random(&mut self, buffer: &mut [u8]);
}
