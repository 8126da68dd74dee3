//! Configuration types for a solver run.
//!
//! Everything that tunes the two workers lives here: the time step and domain, the drift
//! protocol, the adaptive bin controller and the expansion margin rules.

use glam::DVec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{DemError, DemResult};

/// Limits on how far the dynamic worker may run ahead of contact detection.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DriftSettings {
    /// Maximum number of dynamic steps a single contact list may serve, even when the update
    /// frequency adapts upwards.
    pub upper_bound_future_drift: u32,
    /// Whether contact detection overlaps with time integration. When false, the dynamic
    /// worker only orders a detection cycle once its current list is exhausted and then
    /// waits for it.
    pub is_async: bool,
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            upper_bound_future_drift: 5000,
            is_async: true,
        }
    }
}

/// Tuning of the adaptive bin controller.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinControlSettings {
    /// Whether the bin edge length adapts during the run.
    pub auto_bin_size: bool,
    /// Whether the detection cadence follows bin size changes.
    pub auto_update_freq: bool,
    /// Top relative change applied to the bin size in one decision.
    pub top_change_rate: f64,
    /// Fraction of the gap between the current and the top change rate closed per decision,
    /// in (0, 1]. 1 means every change is applied at top speed.
    pub change_rate_acc: f64,
    /// Number of detection cycles in one observation window.
    pub observe_steps: u32,
    /// Past `upper_safety * max_geometries_per_bin` geometries in one bin, the bin shrinks.
    pub upper_safety: f64,
    /// Past `lower_safety * max_bin_count` bins in the domain, the bin grows.
    pub lower_safety: f64,
    /// Below `underuse_ratio * upper_safety * max_geometries_per_bin` geometries in the
    /// fullest bin, the bin grows. In (0, 1); the gap up to the shrink threshold is the band
    /// in which the bin size holds.
    pub underuse_ratio: f64,
    /// Most geometries a single bin may hold. Exceeding it is fatal.
    pub max_geometries_per_bin: usize,
    /// Most bins the domain may be split into.
    pub max_bin_count: u64,
}

impl Default for BinControlSettings {
    fn default() -> Self {
        Self {
            auto_bin_size: true,
            auto_update_freq: true,
            top_change_rate: 0.05,
            change_rate_acc: 0.1,
            observe_steps: 5,
            upper_safety: 0.5,
            lower_safety: 0.85,
            underuse_ratio: 0.25,
            max_geometries_per_bin: 256,
            max_bin_count: u32::MAX as u64,
        }
    }
}

/// Rules for the per-owner expansion margin used by contact detection.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MarginSettings {
    /// Largest owner speed taken into account. Faster owners are reported as anomalies.
    pub max_velocity: f64,
    /// Multiplier applied to the owner speed.
    pub expand_safety_multiplier: f64,
    /// Speed added to every owner's speed.
    pub expand_safety_adder: f64,
}

impl Default for MarginSettings {
    fn default() -> Self {
        Self {
            max_velocity: 50.0,
            expand_safety_multiplier: 1.0,
            expand_safety_adder: 0.0,
        }
    }
}

/// Main configuration of a solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverSettings {
    /// Integration step length (seconds).
    pub time_step: f64,
    /// Gravitational acceleration applied to every owner.
    pub gravity: DVec3,
    /// Lower corner of the simulation box.
    pub domain_min: DVec3,
    /// Extent of the simulation box.
    pub domain_size: DVec3,
    /// Initial bin edge length. Zero derives it from the largest sphere radius.
    pub initial_bin_size: f64,
    /// Initial number of dynamic steps one contact list may serve.
    pub initial_update_freq: u32,
    /// Drift protocol limits.
    pub drift: DriftSettings,
    /// Adaptive bin controller tuning.
    pub bins: BinControlSettings,
    /// Expansion margin rules.
    pub margins: MarginSettings,
    /// Average contacts per sphere past which the run is aborted.
    pub err_out_avg_contacts: f64,
    /// Device threads for the kinematic worker. Zero uses one per core.
    pub kinematic_threads: usize,
    /// Device threads for the dynamic worker. Zero uses one per core.
    pub dynamic_threads: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            time_step: 1e-5,
            gravity: DVec3::new(0.0, 0.0, -9.81),
            domain_min: DVec3::splat(-1.0),
            domain_size: DVec3::splat(2.0),
            initial_bin_size: 0.0,
            initial_update_freq: 10,
            drift: DriftSettings::default(),
            bins: BinControlSettings::default(),
            margins: MarginSettings::default(),
            err_out_avg_contacts: 100.0,
            kinematic_threads: 0,
            dynamic_threads: 0,
        }
    }
}

impl SolverSettings {
    /// Create settings with the given time step.
    #[must_use]
    pub fn with_time_step(time_step: f64) -> Self {
        Self {
            time_step,
            ..Default::default()
        }
    }

    /// Set the gravitational acceleration.
    #[must_use]
    pub fn with_gravity(mut self, gravity: DVec3) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set the simulation box from its lower corner and extent.
    #[must_use]
    pub fn with_domain(mut self, domain_min: DVec3, domain_size: DVec3) -> Self {
        self.domain_min = domain_min;
        self.domain_size = domain_size;
        self
    }

    /// Set the initial bin edge length.
    #[must_use]
    pub fn with_bin_size(mut self, bin_size: f64) -> Self {
        self.initial_bin_size = bin_size;
        self
    }

    /// Set the initial number of dynamic steps per detection cycle.
    #[must_use]
    pub fn with_update_freq(mut self, update_freq: u32) -> Self {
        self.initial_update_freq = update_freq;
        self
    }

    /// Set the drift protocol limits.
    #[must_use]
    pub fn with_drift(mut self, drift: DriftSettings) -> Self {
        self.drift = drift;
        self
    }

    /// Set the bin controller tuning.
    #[must_use]
    pub fn with_bins(mut self, bins: BinControlSettings) -> Self {
        self.bins = bins;
        self
    }

    /// Set the expansion margin rules.
    #[must_use]
    pub fn with_margins(mut self, margins: MarginSettings) -> Self {
        self.margins = margins;
        self
    }

    /// Set the average contacts per sphere past which the run is aborted.
    #[must_use]
    pub fn with_err_out_avg_contacts(mut self, limit: f64) -> Self {
        self.err_out_avg_contacts = limit;
        self
    }

    /// Set the number of device threads of both workers.
    #[must_use]
    pub fn with_threads(mut self, kinematic_threads: usize, dynamic_threads: usize) -> Self {
        self.kinematic_threads = kinematic_threads;
        self.dynamic_threads = dynamic_threads;
        self
    }

    /// Check every value is inside its valid range.
    pub fn validate(&self) -> DemResult<()> {
        fn invalid(message: &str) -> DemResult<()> {
            Err(DemError::InvalidSettings(message.to_owned()))
        }

        if !(self.time_step > 0.0 && self.time_step.is_finite()) {
            return invalid("time step must be positive and finite");
        }
        if !self.gravity.is_finite() || !self.domain_min.is_finite() {
            return invalid("gravity and domain corner must be finite");
        }
        if !(self.domain_size.min_element() > 0.0 && self.domain_size.is_finite()) {
            return invalid("domain size must be positive in every axis");
        }
        if self.initial_bin_size < 0.0 || !self.initial_bin_size.is_finite() {
            return invalid("initial bin size must be non-negative");
        }
        if self.initial_update_freq == 0 {
            return invalid("update frequency must be at least one step");
        }
        if self.drift.upper_bound_future_drift == 0 {
            return invalid("future drift bound must be at least one step");
        }
        let bins = &self.bins;
        if !(bins.top_change_rate > 0.0 && bins.top_change_rate < 1.0) {
            return invalid("bin top change rate must be in (0, 1)");
        }
        if !(bins.change_rate_acc > 0.0 && bins.change_rate_acc <= 1.0) {
            return invalid("bin change rate acceleration must be in (0, 1]");
        }
        if bins.observe_steps == 0 {
            return invalid("bin observation window must span at least one cycle");
        }
        if !(bins.upper_safety > 0.0 && bins.upper_safety <= 1.0)
            || !(bins.lower_safety > 0.0 && bins.lower_safety <= 1.0)
        {
            return invalid("bin safety factors must be in (0, 1]");
        }
        if !(bins.underuse_ratio > 0.0 && bins.underuse_ratio < 1.0) {
            return invalid("bin underuse ratio must be in (0, 1)");
        }
        if bins.max_geometries_per_bin < 2 || bins.max_bin_count == 0 {
            return invalid("bins must be able to hold at least two geometries");
        }
        if bins.max_bin_count > u32::MAX as u64 + 1 {
            return invalid("bin ids are 32 bit; max bin count cannot exceed 2^32");
        }
        let margins = &self.margins;
        if !(margins.max_velocity > 0.0)
            || margins.expand_safety_multiplier < 0.0
            || margins.expand_safety_adder < 0.0
        {
            return invalid("margin settings must be non-negative with a positive max velocity");
        }
        if !(self.err_out_avg_contacts > 0.0) {
            return invalid("average contact ceiling must be positive");
        }
        Ok(())
    }
}
