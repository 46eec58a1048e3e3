//! Energy accounting from successive channel A active power samples.

use log::trace;

/// Interval between two saves of the energy totals.
pub const SAVE_INTERVAL_MS: u64 = 12 * 3_600_000;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct EnergyTotals {
    /// Energy drawn from the grid, Wh.
    pub received_wh: f64,
    /// Energy fed back to the grid, Wh.
    pub exported_wh: f64,
}

/// Persistent storage for [`EnergyTotals`], surviving reboots.
///
/// Implementations report their own failures; a failed load behaves like an empty store.
pub trait EnergyStore {
    fn load(&mut self) -> Option<EnergyTotals>;
    fn save(&mut self, totals: &EnergyTotals);
}

/// Direction of the energy added by a sample.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Flow {
    Received,
    Exported,
}

#[derive(Debug, Default)]
pub struct EnergyMeter {
    totals: EnergyTotals,
    last_sample: Option<(f64, u64)>,
    last_save_ms: Option<u64>,
}

impl EnergyMeter {
    pub fn new(totals: EnergyTotals) -> Self {
        Self {
            totals,
            ..Self::default()
        }
    }

    pub fn totals(&self) -> EnergyTotals {
        self.totals
    }

    /// Integrate `power_w` sampled at `now_ms` with the trapezoidal rule.
    ///
    /// The first sample only sets the starting point. Positive mean power counts as received,
    /// anything else as exported.
    pub fn record(&mut self, power_w: f64, now_ms: u64) -> Option<Flow> {
        let previous = self.last_sample.replace((power_w, now_ms));
        let (last_power, last_ms) = previous?;

        let delta_s = now_ms.saturating_sub(last_ms) as f64 / 1000.0;
        let mean_power = (last_power + power_w) / 2.0;
        let energy_wh = mean_power * delta_s / 3600.0;

        if mean_power > 0.0 {
            self.totals.received_wh += energy_wh;
            Some(Flow::Received)
        } else {
            self.totals.exported_wh -= energy_wh;
            Some(Flow::Exported)
        }
    }

    /// Save the totals when none were saved yet or [`SAVE_INTERVAL_MS`] has elapsed.
    pub fn persist(&mut self, store: &mut dyn EnergyStore, now_ms: u64) -> bool {
        let due = match self.last_save_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= SAVE_INTERVAL_MS,
        };
        if due {
            self.last_save_ms = Some(now_ms);
            store.save(&self.totals);
            trace!(
                "Saving accumulated energy: {:.3} Wh (R), {:.3} Wh (E)",
                self.totals.received_wh,
                self.totals.exported_wh
            );
        }
        due
    }
}
