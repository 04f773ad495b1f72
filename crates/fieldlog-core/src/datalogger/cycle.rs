//! The burst and measurement cycle scheduler.
//!
//! A burst is one or more measurement passes over every driver, complete
//! when the slowest driver reaches its reading cycle. A measurement cycle is
//! `burst_number` bursts followed by sleep.

use crate::storage::record::TimeAnchor;

/// What the controller does after a measurement pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    /// The burst is still open; take another pass
    Measure,
    /// The burst completed and more remain in this cycle
    NextBurst,
    /// The last burst of the cycle completed
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementCycle {
    burst_number: u8,
    completed_bursts: u8,
    anchor: TimeAnchor,
}

impl MeasurementCycle {
    pub fn new(burst_number: u8) -> Self {
        Self {
            burst_number: burst_number.max(1),
            completed_bursts: 0,
            anchor: TimeAnchor::default(),
        }
    }

    /// Starts a new cycle anchored at `anchor`.
    pub fn start(&mut self, anchor: TimeAnchor, burst_number: u8) {
        self.anchor = anchor;
        self.burst_number = burst_number.max(1);
        self.completed_bursts = 0;
    }

    /// Advances the schedule given whether every driver finished its burst.
    pub fn advance(&mut self, burst_completed: bool) -> CycleStep {
        if !burst_completed {
            return CycleStep::Measure;
        }
        self.completed_bursts = self.completed_bursts.saturating_add(1);
        if self.completed_bursts < self.burst_number {
            CycleStep::NextBurst
        } else {
            CycleStep::Sleep
        }
    }

    pub fn anchor(&self) -> TimeAnchor {
        self.anchor
    }

    pub fn completed_bursts(&self) -> u8 {
        self.completed_bursts
    }

    pub fn burst_number(&self) -> u8 {
        self.burst_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_burst_keeps_measuring() {
        let mut cycle = MeasurementCycle::new(2);
        assert_eq!(cycle.advance(false), CycleStep::Measure);
        assert_eq!(cycle.completed_bursts(), 0);
    }

    #[test]
    fn test_n_bursts_then_sleep() {
        for n in 1..=20u8 {
            let mut cycle = MeasurementCycle::new(n);
            for _ in 1..n {
                assert_eq!(cycle.advance(true), CycleStep::NextBurst);
            }
            assert_eq!(cycle.advance(true), CycleStep::Sleep);
            assert_eq!(cycle.completed_bursts(), n);
        }
    }

    #[test]
    fn test_start_resets_counter_and_anchor() {
        let mut cycle = MeasurementCycle::new(3);
        cycle.advance(true);
        cycle.start(TimeAnchor::new(50, 7), 1);

        assert_eq!(cycle.completed_bursts(), 0);
        assert_eq!(cycle.anchor(), TimeAnchor::new(50, 7));
        assert_eq!(cycle.advance(true), CycleStep::Sleep);
    }
}
