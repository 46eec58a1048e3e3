//! Software zero-offset calibration.
//!
//! Channel B is assumed idle while calibration runs. Its mean current and power over
//! [`CALIBRATION_MEASUREMENTS`] samples become its offsets, and channel A offsets are derived from
//! them with fixed scale factors measured on the Sonoff POWCT board. A new cycle starts after every
//! completed one so the offsets keep tracking drift.

use log::info;

pub const CALIBRATION_MEASUREMENTS: u8 = 20;
pub const CURRENT_A_B_SCALE_FACTOR: f64 = 10.46;
pub const POWER_A_B_SCALE_FACTOR: f64 = -8.89;

/// Values added to every published current (A) and active power (W).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Offsets {
    pub current_a: f64,
    pub current_b: f64,
    pub power_a: f64,
    pub power_b: f64,
}

#[derive(Debug, Default)]
pub struct Calibration {
    enabled: bool,
    count: u8,
    sum_current_b: f64,
    sum_power_b: f64,
    offsets: Offsets,
}

impl Calibration {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn offsets(&self) -> Offsets {
        self.offsets
    }

    /// Samples collected in the running cycle.
    pub fn count(&self) -> u8 {
        self.count
    }

    /// Switch calibration on or off. Turning it off discards the running cycle.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        info!(
            "Calibration mode {}",
            if enabled { "ENABLED" } else { "DISABLED" }
        );
        if !enabled {
            self.reset_cycle();
        }
    }

    /// Record one offset-corrected channel B sample.
    ///
    /// Returns the new offsets when the sample completes a cycle.
    pub fn record(&mut self, current_b: f64, power_b: f64) -> Option<Offsets> {
        if !self.enabled {
            return None;
        }

        self.sum_current_b += current_b;
        self.sum_power_b += power_b;
        self.count += 1;

        if self.count < CALIBRATION_MEASUREMENTS {
            return None;
        }

        let count = f64::from(self.count);
        self.offsets.current_b -= self.sum_current_b / count;
        self.offsets.power_b -= self.sum_power_b / count;
        self.offsets.current_a = CURRENT_A_B_SCALE_FACTOR * self.offsets.current_b;
        self.offsets.power_a = POWER_A_B_SCALE_FACTOR * self.offsets.power_b;
        self.reset_cycle();

        info!(
            "Calibration offsets: I_A={:.4} I_B={:.4} P_A={:.3} P_B={:.3}",
            self.offsets.current_a, self.offsets.current_b, self.offsets.power_a, self.offsets.power_b
        );
        Some(self.offsets)
    }

    fn reset_cycle(&mut self) {
        self.count = 0;
        self.sum_current_b = 0.0;
        self.sum_power_b = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_calibration_ignores_samples() {
        let mut calibration = Calibration::default();
        assert_eq!(calibration.record(1.0, 1.0), None);
        assert_eq!(calibration.count(), 0);
    }

    #[test]
    fn offsets_after_full_cycle() {
        let mut calibration = Calibration::default();
        calibration.set_enabled(true);
        for _ in 0..CALIBRATION_MEASUREMENTS - 1 {
            assert_eq!(calibration.record(0.02, 1.5), None);
        }
        let offsets = calibration.record(0.02, 1.5).expect("cycle completes");

        assert!((offsets.current_b + 0.02).abs() < 1e-9);
        assert!((offsets.power_b + 1.5).abs() < 1e-9);
        assert!((offsets.current_a - 10.46 * -0.02).abs() < 1e-9);
        assert!((offsets.power_a - -8.89 * -1.5).abs() < 1e-9);
        assert_eq!(calibration.count(), 0);
    }

    #[test]
    fn offsets_accumulate_across_cycles() {
        let mut calibration = Calibration::default();
        calibration.set_enabled(true);
        for _ in 0..CALIBRATION_MEASUREMENTS {
            calibration.record(0.5, 0.0);
        }
        for _ in 0..CALIBRATION_MEASUREMENTS {
            calibration.record(0.25, 0.0);
        }
        assert!((calibration.offsets().current_b + 0.75).abs() < 1e-9);
    }

    #[test]
    fn disabling_discards_running_cycle() {
        let mut calibration = Calibration::default();
        calibration.set_enabled(true);
        calibration.record(1.0, 1.0);
        calibration.set_enabled(false);
        assert_eq!(calibration.count(), 0);
        assert_eq!(calibration.offsets(), Offsets::default());
    }
}
