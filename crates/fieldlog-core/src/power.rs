//! Low-power sleep and wake.
//!
//! The platform implements [`PowerManagement`]; the controller owns the
//! order in which its operations are called (see
//! [`Datalogger`](crate::Datalogger)). Wake interrupts record their source in
//! a [`WakeLatch`] that the platform reads back after leaving the
//! low-power state.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Duration;

/// What ended a low-power wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSource {
    /// The real-time clock alarm for the next measurement cycle
    Alarm,
    /// The manual wake line (button or serial activity)
    ManualWake,
}

/// Interrupt enable state saved before sleeping.
///
/// Returned by [`PowerManagement::mask_interrupts_except_wake`] and consumed
/// by [`PowerManagement::restore_interrupts`], so every mask is restored
/// exactly once.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct InterruptMask {
    saved: [u32; 4],
}

impl InterruptMask {
    pub fn new(saved: [u32; 4]) -> Self {
        Self { saved }
    }

    pub fn saved(&self) -> &[u32; 4] {
        &self.saved
    }
}

/// Platform power control used by the sleep bracket.
pub trait PowerManagement {
    fn feed_watchdog(&mut self);

    fn enable_watchdog(&mut self);

    fn disable_watchdog(&mut self);

    /// Switch off every switchable peripheral rail.
    fn power_down_peripherals(&mut self);

    /// Enable the peripheral power rail and bus.
    fn enable_peripheral_bus(&mut self);

    /// Reset devices on the bus after power returns.
    fn reset_peripherals(&mut self);

    /// Configure devices (ADC, expanders) after reset.
    fn configure_peripherals(&mut self);

    /// Save the enabled interrupts and leave only the wake sources enabled.
    fn mask_interrupts_except_wake(&mut self) -> InterruptMask;

    /// Re-enable the interrupts saved in `mask`.
    fn restore_interrupts(&mut self, mask: InterruptMask);

    /// Arm the alarm to fire `after` from now.
    fn schedule_alarm(&mut self, after: Duration);

    /// Stop until a wake source fires.
    fn enter_low_power(&mut self) -> WakeSource;
}

/// Records which wake interrupt fired.
///
/// Written from interrupt context, read and cleared by the control thread.
pub struct WakeLatch {
    source: Mutex<CriticalSectionRawMutex, Cell<Option<WakeSource>>>,
}

impl WakeLatch {
    pub const fn new() -> Self {
        Self {
            source: Mutex::new(Cell::new(None)),
        }
    }

    /// Records a wake source. A manual wake is never overwritten by an
    /// alarm, so a user request is not lost when both fire.
    pub fn record(&self, source: WakeSource) {
        self.source.lock(|cell| {
            if cell.get() != Some(WakeSource::ManualWake) {
                cell.set(Some(source));
            }
        });
    }

    /// Returns and clears the recorded source.
    pub fn take(&self) -> Option<WakeSource> {
        self.source.lock(|cell| cell.take())
    }

    pub fn clear(&self) {
        self.source.lock(|cell| cell.set(None));
    }
}

impl Default for WakeLatch {
    fn default() -> Self {
        Self::new()
    }
}
