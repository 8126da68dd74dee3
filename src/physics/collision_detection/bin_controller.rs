//! Adaptive control of the bin edge length and of the detection cadence.
//!
//! The kinematic worker reports bin statistics after every cycle. Once per observation
//! window the controller decides whether the bins are overfull (shrink), underused or too
//! numerous (grow), or fine (hold). Overfull and underused are both judged on the fullest
//! bin, with a gap between the two thresholds so that a scene which stops moving also stops
//! the bins from changing. The size of each change ramps towards a top rate while decisions
//! keep pointing the same way and drops back as soon as they stop doing so.

use crate::error::{DemError, DemResult};
use crate::physics::simulation_settings::BinControlSettings;

/// Bin statistics of one detection cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinObservation {
    /// Most geometries found in a single bin.
    pub max_occupancy: usize,
    /// Bins in the whole domain.
    pub total_bins: u64,
    /// Twice the number of contacts divided by the number of spheres.
    pub avg_contacts_per_sphere: f64,
}

/// Outcome of one observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinDecision {
    /// Bins are fine.
    Hold,
    /// Bins are overfull.
    Shrink,
    /// The fullest bin is underused, or bins are too numerous.
    Grow,
}

impl BinDecision {
    #[inline]
    fn direction(self) -> i8 {
        match self {
            BinDecision::Hold => 0,
            BinDecision::Shrink => -1,
            BinDecision::Grow => 1,
        }
    }
}

/// A change applied at the end of an observation window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinAdjustment {
    /// Direction of the change.
    pub decision: BinDecision,
    /// Bin size before the change.
    pub old_bin_size: f64,
    /// Bin size after the change.
    pub new_bin_size: f64,
    /// Detection cadence before the change.
    pub old_update_freq: u32,
    /// Detection cadence after the change.
    pub new_update_freq: u32,
}

/// Statistics accumulated over the current observation window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ObservationWindow {
    cycles: u32,
    max_occupancy: usize,
    max_total_bins: u64,
}

/// Adaptive bin size and cadence controller.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveBinController {
    settings: BinControlSettings,
    err_out_avg_contacts: f64,
    upper_bound_future_drift: u32,
    bin_size: f64,
    update_freq: f64,
    current_change_rate: f64,
    last_direction: i8,
    window: ObservationWindow,
    change_count: u64,
}

impl AdaptiveBinController {
    /// Creates a controller.
    ///
    /// # Arguments
    ///
    /// * `settings` - Controller tuning.
    /// * `bin_size` - Initial bin edge length.
    /// * `update_freq` - Initial detection cadence, in dynamic steps per cycle.
    /// * `err_out_avg_contacts` - Average contacts per sphere past which the run is aborted.
    /// * `upper_bound_future_drift` - Largest cadence the controller may select.
    pub fn new(
        settings: BinControlSettings,
        bin_size: f64,
        update_freq: u32,
        err_out_avg_contacts: f64,
        upper_bound_future_drift: u32,
    ) -> Self {
        Self {
            settings,
            err_out_avg_contacts,
            upper_bound_future_drift,
            bin_size,
            update_freq: update_freq.clamp(1, upper_bound_future_drift) as f64,
            current_change_rate: 0.0,
            last_direction: 0,
            window: ObservationWindow::default(),
            change_count: 0,
        }
    }

    /// Gets the bin edge length to use for the next cycle.
    #[inline]
    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    /// Overrides the bin edge length, for instance when the grid cannot hold the current one.
    #[inline]
    pub fn set_bin_size(&mut self, bin_size: f64) {
        debug_assert!(bin_size > 0.0, "Bin size must be positive.");
        self.bin_size = bin_size;
    }

    /// Gets the number of dynamic steps the next contact list may serve.
    #[inline]
    pub fn update_freq(&self) -> u32 {
        (self.update_freq.round() as u32).clamp(1, self.upper_bound_future_drift)
    }

    /// Gets the relative change applied by the last decision.
    #[inline]
    pub fn current_change_rate(&self) -> f64 {
        self.current_change_rate
    }

    /// Gets the number of bin size changes applied so far.
    #[inline]
    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    /// Gets the window occupancy band `(grow_below, shrink_above)`. A window whose fullest
    /// bin lies inside the band holds unless the domain has too many bins.
    pub fn occupancy_band(&self) -> (f64, f64) {
        let shrink_above =
            self.settings.upper_safety * self.settings.max_geometries_per_bin as f64;
        (self.settings.underuse_ratio * shrink_above, shrink_above)
    }

    fn decide(&self) -> BinDecision {
        let settings = &self.settings;
        let window = &self.window;
        let (grow_below, shrink_above) = self.occupancy_band();
        let occupancy = window.max_occupancy as f64;
        if occupancy > shrink_above {
            return BinDecision::Shrink;
        }
        let too_many_bins =
            window.max_total_bins as f64 > settings.lower_safety * settings.max_bin_count as f64;
        // A single bin already spans the domain; growing it changes nothing.
        let underused = occupancy < grow_below && window.max_total_bins > 1;
        if too_many_bins || underused {
            return BinDecision::Grow;
        }
        BinDecision::Hold
    }

    /// Records the statistics of one cycle and adapts the bins at the end of a window.
    ///
    /// # Returns
    ///
    /// * The change applied, if any. [`DemError::AverageContactsExceeded`] when the contact
    ///   density is past the ceiling; that check runs every cycle.
    pub fn observe(&mut self, observation: &BinObservation) -> DemResult<Option<BinAdjustment>> {
        if observation.avg_contacts_per_sphere > self.err_out_avg_contacts {
            return Err(DemError::AverageContactsExceeded {
                average: observation.avg_contacts_per_sphere,
                limit: self.err_out_avg_contacts,
            });
        }
        let window = &mut self.window;
        window.cycles += 1;
        window.max_occupancy = window.max_occupancy.max(observation.max_occupancy);
        window.max_total_bins = window.max_total_bins.max(observation.total_bins);

        if !self.settings.auto_bin_size || window.cycles < self.settings.observe_steps {
            return Ok(None);
        }
        let decision = self.decide();
        self.window = ObservationWindow::default();

        let direction = decision.direction();
        if direction == 0 {
            self.current_change_rate = 0.0;
            self.last_direction = 0;
            return Ok(None);
        }
        if direction != self.last_direction {
            self.current_change_rate = 0.0;
        }
        self.current_change_rate +=
            self.settings.change_rate_acc * (self.settings.top_change_rate - self.current_change_rate);
        self.last_direction = direction;

        let old_bin_size = self.bin_size;
        let old_update_freq = self.update_freq();
        let ratio = 1.0 + direction as f64 * self.current_change_rate;
        self.bin_size *= ratio;
        if self.settings.auto_update_freq {
            self.update_freq =
                (self.update_freq * ratio).clamp(1.0, self.upper_bound_future_drift as f64);
        }
        self.change_count += 1;
        Ok(Some(BinAdjustment {
            decision,
            old_bin_size,
            new_bin_size: self.bin_size,
            old_update_freq,
            new_update_freq: self.update_freq(),
        }))
    }
}
