//! The kinematic worker: expansion margins, binning and contact detection.
//!
//! Runs on its own thread. Each ordered cycle turns an owner snapshot into a complete contact
//! list that stays valid for the number of dynamic steps the margins were sized for.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use glam::DVec3;
use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::error::{DemError, DemResult};
use crate::physics::anomalies::AnomalyLog;
use crate::physics::collision_detection::bin_controller::{AdaptiveBinController, BinObservation};
use crate::physics::collision_detection::bin_grid::BinGrid;
use crate::physics::collision_detection::broad_phase::{BroadPhase, BroadPhaseInput, BroadPhaseStats};
use crate::physics::collision_detection::contact_pair::{ContactPair, ContactProduct};
use crate::physics::geometry::GeometrySet;
use crate::physics::report_channel::{BinStatus, KinematicOrder, WorkerReportChannel};
use crate::physics::simulation_profiler::{SimulationProfiler, StageTiming};
use crate::physics::simulation_settings::SolverSettings;
use crate::utilities::compute_device::ComputeDevice;

const MARGIN_STAGE: &str = "kinematic.margins";
const DETECT_STAGE: &str = "kinematic.detect";
const CONTROL_STAGE: &str = "kinematic.bin_control";

/// Picks a bin size the grid can hold, starting from `bin_size`.
///
/// # Returns
///
/// * `bin_size` itself, or the smallest size in a geometric progression from it that fits in
///   the allowed bin count.
pub fn fit_bin_size(settings: &SolverSettings, bin_size: f64) -> DemResult<f64> {
    let mut size = bin_size;
    for _ in 0..256 {
        match BinGrid::new(
            settings.domain_min,
            settings.domain_size,
            size,
            settings.bins.max_bin_count,
        ) {
            Ok(_) => return Ok(size),
            Err(DemError::TooManyBins { .. }) => size *= 1.25,
            Err(err) => return Err(err),
        }
    }
    Err(DemError::InvalidSettings(format!(
        "no bin size from {bin_size} up fits in {} bins",
        settings.bins.max_bin_count
    )))
}

/// Chooses the bin size of the first cycle.
///
/// A size given in the settings is used as is. Otherwise bins start four times the largest
/// sphere radius wide, or a sixteenth of the longest domain edge without spheres, and are
/// enlarged until the grid fits.
pub fn initial_bin_size(settings: &SolverSettings, geometry: &GeometrySet) -> DemResult<f64> {
    if settings.initial_bin_size > 0.0 {
        return Ok(settings.initial_bin_size);
    }
    let largest = geometry.max_sphere_radius();
    let guess = if largest > 0.0 {
        4.0 * largest
    } else {
        settings.domain_size.max_element() / 16.0
    };
    fit_bin_size(settings, guess)
}

/// Computes the expansion margin of every owner.
///
/// The margin covers the distance an owner surface may travel while a contact list is in use:
/// the owner's speed, plus its spin times its bounding radius, capped at the max velocity and
/// scaled by the safety factors, over `drift_allowance` steps. The family's extra margin is
/// added on top.
///
/// # Returns
///
/// * The highest linear speed among the owners.
#[allow(clippy::too_many_arguments)]
pub fn expansion_margins(
    settings: &SolverSettings,
    lin_vel: &[DVec3],
    ang_vel: &[DVec3],
    family: &[u8],
    bounding_radius: &[f64],
    extra_margin: impl Fn(u8) -> f64 + Sync,
    drift_allowance: u32,
    anomalies: &AnomalyLog,
    margins: &mut Vec<f64>,
) -> f64 {
    let margin_settings = &settings.margins;
    let horizon = settings.time_step * drift_allowance as f64;
    margins.resize(lin_vel.len(), 0.0);
    margins
        .par_iter_mut()
        .enumerate()
        .map(|(owner, margin)| {
            let speed = lin_vel[owner].length();
            if speed > margin_settings.max_velocity {
                anomalies.record_over_max_velocity(owner, speed, margin_settings.max_velocity);
            }
            let surface_speed = (speed + ang_vel[owner].length() * bounding_radius[owner])
                .min(margin_settings.max_velocity);
            *margin = (surface_speed * margin_settings.expand_safety_multiplier
                + margin_settings.expand_safety_adder)
                * horizon
                + extra_margin(family[owner]);
            speed
        })
        .reduce(|| 0.0, f64::max)
}

/// State owned by the kinematic worker.
pub struct KinematicWorker {
    settings: SolverSettings,
    device: ComputeDevice,
    broad_phase: BroadPhase,
    controller: AdaptiveBinController,
    margins: Vec<f64>,
    profiler: SimulationProfiler,
    anomalies: Arc<AnomalyLog>,
    last_stats: BroadPhaseStats,
    cycles: u64,
}

impl KinematicWorker {
    /// Creates the worker and its compute device.
    ///
    /// # Arguments
    ///
    /// * `settings` - Validated solver settings.
    /// * `bin_size` - Bin edge length of the first cycle.
    /// * `anomalies` - Shared anomaly log.
    pub fn new(settings: SolverSettings, bin_size: f64, anomalies: Arc<AnomalyLog>) -> DemResult<Self> {
        let device = ComputeDevice::new("kinematic", settings.kinematic_threads)?;
        let controller = AdaptiveBinController::new(
            settings.bins,
            bin_size,
            settings.initial_update_freq,
            settings.err_out_avg_contacts,
            settings.drift.upper_bound_future_drift,
        );
        Ok(Self {
            settings,
            device,
            broad_phase: BroadPhase::new(),
            controller,
            margins: Vec::new(),
            profiler: SimulationProfiler::new(3),
            anomalies,
            last_stats: BroadPhaseStats::default(),
            cycles: 0,
        })
    }

    /// Gets the bin state the next cycle will use.
    pub fn bin_status(&self) -> BinStatus {
        BinStatus {
            bin_size: self.controller.bin_size(),
            update_freq: self.controller.update_freq(),
            change_count: self.controller.change_count(),
            avg_contacts_per_sphere: self.last_stats.avg_contacts_per_sphere,
            max_occupancy: self.last_stats.max_occupancy,
            occupied_bins: self.last_stats.occupied_bins,
        }
    }

    /// Gets the statistics of the last cycle.
    #[inline]
    pub fn last_stats(&self) -> BroadPhaseStats {
        self.last_stats
    }

    /// Gets the number of cycles run.
    #[inline]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Gets the scratch capacity of the worker, in bytes.
    pub fn scratch_capacity_bytes(&self) -> usize {
        self.broad_phase.arena().total_capacity_bytes()
    }

    /// Gets the accumulated stage timings.
    pub fn timings(&self) -> Vec<(&'static str, StageTiming)> {
        self.profiler.stages()
    }

    /// Clears the accumulated stage timings.
    pub fn clear_timings(&mut self) {
        self.profiler.clear();
    }

    /// Runs one detection cycle.
    ///
    /// # Arguments
    ///
    /// * `order` - The ordered cycle and its owner snapshot.
    /// * `pairs` - Buffer to fill, reused from an earlier cycle when possible.
    ///
    /// # Returns
    ///
    /// * The contact list, or a fatal error: too many geometries in a bin, too many bins, or
    ///   an average contact count past the configured ceiling.
    pub fn run_cycle(
        &mut self,
        order: &KinematicOrder,
        mut pairs: Vec<ContactPair>,
    ) -> DemResult<ContactProduct> {
        let snapshot = &order.snapshot;
        let scene = &snapshot.scene;
        let drift_allowance = self.controller.update_freq();

        let Self {
            settings,
            device,
            broad_phase,
            controller,
            margins,
            profiler,
            anomalies,
            ..
        } = self;

        profiler.start(MARGIN_STAGE);
        let max_speed = device.dispatch(|| {
            expansion_margins(
                settings,
                &snapshot.lin_vel,
                &snapshot.ang_vel,
                &snapshot.family,
                &scene.geometry.owner_bounding_radius,
                |family| scene.families.extra_margin(family),
                drift_allowance,
                anomalies,
                margins,
            )
        });
        anomalies.record_speed(max_speed);
        profiler.end(MARGIN_STAGE);

        if settings.bins.auto_bin_size {
            let fitted = fit_bin_size(settings, controller.bin_size())?;
            if fitted != controller.bin_size() {
                debug!(
                    from = controller.bin_size(),
                    to = fitted,
                    "bin size enlarged to fit the bin count limit"
                );
                controller.set_bin_size(fitted);
            }
        }
        let grid = BinGrid::new(
            settings.domain_min,
            settings.domain_size,
            controller.bin_size(),
            settings.bins.max_bin_count,
        )?;

        profiler.start(DETECT_STAGE);
        let input = BroadPhaseInput {
            geometry: &scene.geometry,
            families: &scene.families,
            position: &snapshot.position,
            orientation: &snapshot.orientation,
            owner_family: &snapshot.family,
            owner_margin: margins,
            grid: &grid,
            max_geometries_per_bin: settings.bins.max_geometries_per_bin,
        };
        let detected = device.dispatch(|| broad_phase.detect(&input, &mut pairs));
        profiler.end(DETECT_STAGE);
        let stats = detected?;

        profiler.start(CONTROL_STAGE);
        anomalies.record_avg_contacts(stats.avg_contacts_per_sphere, settings.err_out_avg_contacts);
        let adjustment = controller.observe(&BinObservation {
            max_occupancy: stats.max_occupancy,
            total_bins: grid.bin_count(),
            avg_contacts_per_sphere: stats.avg_contacts_per_sphere,
        });
        profiler.end(CONTROL_STAGE);
        if let Some(adjustment) = adjustment? {
            debug!(
                decision = ?adjustment.decision,
                old_bin_size = adjustment.old_bin_size,
                new_bin_size = adjustment.new_bin_size,
                old_update_freq = adjustment.old_update_freq,
                new_update_freq = adjustment.new_update_freq,
                "bins adapted"
            );
        }

        self.last_stats = stats;
        self.cycles += 1;
        trace!(
            cycle = order.cycle,
            stamp = snapshot.stamp,
            contacts = stats.contacts,
            max_occupancy = stats.max_occupancy,
            "cycle done"
        );
        Ok(ContactProduct {
            cycle: order.cycle,
            stamp: snapshot.stamp,
            drift_allowance,
            bin_size: grid.bin_size(),
            scene_epoch: scene.epoch,
            pairs,
        })
    }

    /// Serves ordered cycles until the channel terminates.
    ///
    /// A failed or panicking cycle is reported to the dynamic worker; the worker keeps serving
    /// orders afterwards.
    pub fn run(worker: Arc<Mutex<KinematicWorker>>, channel: Arc<WorkerReportChannel>) {
        info!("kinematic worker started");
        while let Ok(Some(order)) = channel.next_order() {
            let pairs = channel.take_recycled_pairs().unwrap_or_default();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut worker = worker
                    .lock()
                    .map_err(|_| DemError::WorkerPanicked("kinematic"))?;
                let product = worker.run_cycle(&order, pairs)?;
                Ok((product, worker.bin_status()))
            }))
            .unwrap_or(Err(DemError::WorkerPanicked("kinematic")));
            let delivered = match outcome {
                Ok((product, status)) => channel.signal_cycle_done(product, status),
                Err(err) => channel.report_kinematic_error(err),
            };
            if delivered.is_err() {
                break;
            }
        }
        info!("kinematic worker stopped");
    }
}
