//! The dynamic worker: force evaluation, integration and the consumer side of the drift
//! protocol.
//!
//! Before every step the worker makes sure its contact list is still valid: a list stamped at
//! step `s` with allowance `a` serves steps `s..s + a`. Fresh lists are ordered from the
//! kinematic worker whenever it is idle (asynchronous mode) or only once the current list is
//! exhausted (synchronous mode); the worker blocks only when its list is exhausted and the
//! replacement is not published yet.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use glam::{DQuat, DVec3};
use tracing::{info, trace, warn};

use crate::error::{DemError, DemResult};
use crate::physics::anomalies::AnomalyLog;
use crate::physics::collision_detection::contact_pair::{ContactPair, ContactProduct, ContactType};
use crate::physics::collision_detection::narrow_phase::{NarrowPhase, NarrowPhaseInput, Wrench};
use crate::physics::families::FamilyTable;
use crate::physics::force_models::IForceModel;
use crate::physics::materials::MaterialTable;
use crate::physics::owner_description::OwnerDescription;
use crate::physics::owners::OwnerSet;
use crate::physics::pose_integration::PoseIntegration;
use crate::physics::report_channel::{KinematicOrder, WaitOutcome, WorkerReportChannel};
use crate::physics::scene::{OwnerSnapshot, Scene};
use crate::physics::simulation_profiler::{SimulationProfiler, StageTiming};
use crate::physics::simulation_settings::SolverSettings;
use crate::physics::wildcards::{WildcardSchema, WildcardStore};
use crate::utilities::compute_device::ComputeDevice;

const FORCE_STAGE: &str = "dynamic.forces";
const INTEGRATE_STAGE: &str = "dynamic.integrate";
const HISTORY_STAGE: &str = "dynamic.contact_history";
const WAIT_STAGE: &str = "dynamic.wait_kinematic";

/// Work the caller hands to the dynamic worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicJob {
    /// Advance `count` steps, then optionally wait until both workers meet.
    Steps {
        /// Number of steps.
        count: u64,
        /// Whether to finish with a synchronous flush.
        sync: bool,
    },
}

/// Outcome of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Steps asked for.
    pub requested: u64,
    /// Steps taken.
    pub completed: u64,
    /// Whether a pause request ended the job early.
    pub paused: bool,
}

/// How the two workers cooperated so far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CollaborationStats {
    /// Dynamic steps taken.
    pub dynamic_steps: u64,
    /// Detection cycles ordered.
    pub cycles_ordered: u64,
    /// Contact lists put to use.
    pub cycles_consumed: u64,
    /// Contact lists dropped because the scene changed or a job failed.
    pub cycles_discarded: u64,
    /// Times the dynamic worker had to block on the kinematic worker.
    pub waits_on_kinematic: u64,
    /// Sum over consumed lists of how many steps old their owner state was.
    pub drift_at_consumption: u64,
}

impl CollaborationStats {
    /// Mean age, in steps, of the owner state behind each consumed contact list.
    pub fn average_drift_at_consumption(&self) -> f64 {
        if self.cycles_consumed == 0 {
            0.0
        } else {
            self.drift_at_consumption as f64 / self.cycles_consumed as f64
        }
    }
}

enum ContactState {
    Ready,
    Stopped,
}

/// State restored when a job fails.
struct Checkpoint {
    owners: OwnerSet,
    owner_wildcards: WildcardStore,
    pairs: Vec<ContactPair>,
    contact_wildcards: WildcardStore,
    step: u64,
    time: f64,
}

/// State owned by the dynamic worker.
pub struct DynamicWorker {
    settings: SolverSettings,
    device: ComputeDevice,
    scene: Arc<Scene>,
    schema: WildcardSchema,
    materials: MaterialTable,
    force_model: Arc<dyn IForceModel>,
    owners: OwnerSet,
    owner_wildcards: WildcardStore,
    pairs: Vec<ContactPair>,
    contact_wildcards: WildcardStore,
    spare_wildcards: WildcardStore,
    wrenches: Vec<Wrench>,
    stamp: Option<u64>,
    drift_allowance: u32,
    ordered_cycle: u64,
    consumed_cycle: u64,
    step: u64,
    time: f64,
    narrow_phase: NarrowPhase,
    profiler: SimulationProfiler,
    stats: CollaborationStats,
    channel: Arc<WorkerReportChannel>,
    anomalies: Arc<AnomalyLog>,
}

impl DynamicWorker {
    /// Creates the worker and its compute device.
    ///
    /// # Arguments
    ///
    /// * `settings` - Validated solver settings.
    /// * `scene` - Initial scene.
    /// * `owners` - Initial owners, matching the scene's geometry.
    /// * `materials` - Material table resolved for `force_model`.
    /// * `force_model` - Contact force law.
    /// * `channel` - Channel shared with the kinematic worker and the caller.
    /// * `anomalies` - Shared anomaly log.
    pub fn new(
        settings: SolverSettings,
        scene: Scene,
        owners: OwnerSet,
        materials: MaterialTable,
        force_model: Arc<dyn IForceModel>,
        channel: Arc<WorkerReportChannel>,
        anomalies: Arc<AnomalyLog>,
    ) -> DemResult<Self> {
        let device = ComputeDevice::new("dynamic", settings.dynamic_threads)?;
        let schema = WildcardSchema::new(force_model.contact_wildcards(), force_model.owner_wildcards());
        let mut owner_wildcards = WildcardStore::new(schema.owner_initial_values());
        owner_wildcards.resize(owners.len());
        let contact_wildcards = WildcardStore::new(schema.contact_initial_values());
        let spare_wildcards = contact_wildcards.clone();
        let drift_allowance = settings.initial_update_freq;
        Ok(Self {
            settings,
            device,
            scene: Arc::new(scene),
            schema,
            materials,
            force_model,
            wrenches: vec![Wrench::default(); owners.len()],
            owners,
            owner_wildcards,
            pairs: Vec::new(),
            contact_wildcards,
            spare_wildcards,
            stamp: None,
            drift_allowance,
            ordered_cycle: 0,
            consumed_cycle: 0,
            step: 0,
            time: 0.0,
            narrow_phase: NarrowPhase::new(),
            profiler: SimulationProfiler::new(4),
            stats: CollaborationStats::default(),
            channel,
            anomalies,
        })
    }

    /// Gets the owner state.
    #[inline]
    pub fn owners(&self) -> &OwnerSet {
        &self.owners
    }

    /// Gets the scene.
    #[inline]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Gets the contact list in use.
    #[inline]
    pub fn pairs(&self) -> &[ContactPair] {
        &self.pairs
    }

    /// Gets the net wrench of every owner from the last step.
    #[inline]
    pub fn wrenches(&self) -> &[Wrench] {
        &self.wrenches
    }

    /// Gets the simulation time.
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Gets the number of steps taken.
    #[inline]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Gets the step the contact list in use was computed from.
    #[inline]
    pub fn stamp(&self) -> Option<u64> {
        self.stamp
    }

    /// Gets the collaboration statistics.
    #[inline]
    pub fn stats(&self) -> CollaborationStats {
        self.stats
    }

    /// Gets the scratch capacity of the worker, in bytes.
    pub fn scratch_capacity_bytes(&self) -> usize {
        self.narrow_phase.arena().total_capacity_bytes()
    }

    /// Gets the accumulated stage timings.
    pub fn timings(&self) -> Vec<(&'static str, StageTiming)> {
        self.profiler.stages()
    }

    /// Clears the accumulated stage timings.
    pub fn clear_timings(&mut self) {
        self.profiler.clear();
    }

    /// Number of pairs in the contact list that are in geometric contact.
    pub fn active_contacts(&self) -> usize {
        self.narrow_phase.arena().scalars.num_contacts
    }

    /// Gets the values of an owner wildcard, one per owner.
    pub fn owner_wildcard(&self, name: &str) -> DemResult<Vec<f64>> {
        let slot = self.schema.owner_slot(name)?;
        Ok(self.owner_wildcards.slot_values(slot))
    }

    /// Sets the values of an owner wildcard, one per owner.
    pub fn set_owner_wildcard(&mut self, name: &str, values: &[f64]) -> DemResult<()> {
        let slot = self.schema.owner_slot(name)?;
        self.owner_wildcards.set_slot(name, slot, values)
    }

    /// Gets the values of a contact wildcard, one per pair of the contact list.
    pub fn contact_wildcard(&self, name: &str) -> DemResult<Vec<f64>> {
        let slot = self
            .schema
            .contact_slot(name)
            .ok_or_else(|| DemError::UnknownWildcard(name.to_owned()))?;
        Ok(self.contact_wildcards.slot_values(slot))
    }

    // Edits. Both workers must be at rendezvous.

    fn invalidate_contacts(&mut self) {
        self.stamp = None;
    }

    fn scene_mut(&mut self) -> &mut Scene {
        let scene = Arc::make_mut(&mut self.scene);
        scene.epoch += 1;
        scene
    }

    /// Appends owners. Descriptions must be validated.
    ///
    /// # Returns
    ///
    /// * The ids given to the new owners.
    pub fn add_owners(&mut self, descriptions: &[OwnerDescription]) -> Vec<u32> {
        let mut ids = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let id = self.owners.push(description);
            self.scene_mut().geometry.push_owner(id, description);
            self.owner_wildcards.push_initial();
            ids.push(id);
        }
        self.wrenches.resize(self.owners.len(), Wrench::default());
        self.invalidate_contacts();
        ids
    }

    /// Removes the flagged owners along with their geometry and contacts.
    ///
    /// Remaining owners, geometries and contacts are renumbered in order; contacts between
    /// remaining geometries keep their wildcards.
    pub fn remove_owners(&mut self, removed: &[bool]) {
        let owner_map = self.owners.remove(removed);
        let [sphere_map, triangle_map, analytical_map] =
            self.scene_mut().geometry.retain_owners(&owner_map);
        let kept_owners: Vec<bool> = removed.iter().map(|&gone| !gone).collect();
        self.owner_wildcards.retain(&kept_owners);

        let mut kept_pairs = Vec::with_capacity(self.pairs.len());
        for pair in &mut self.pairs {
            let geometry_b_map = match pair.contact_type {
                ContactType::SphereSphere => &sphere_map,
                ContactType::SphereTriangle => &triangle_map,
                ContactType::SpherePlane | ContactType::SphereCylinder => &analytical_map,
            };
            let remapped = (
                owner_map[pair.owner_a as usize],
                owner_map[pair.owner_b as usize],
                sphere_map[pair.geometry_a as usize],
                geometry_b_map[pair.geometry_b as usize],
            );
            if let (Some(owner_a), Some(owner_b), Some(geometry_a), Some(geometry_b)) = remapped {
                *pair = ContactPair {
                    owner_a,
                    owner_b,
                    geometry_a,
                    geometry_b,
                    ..*pair
                };
                kept_pairs.push(true);
            } else {
                kept_pairs.push(false);
            }
        }
        let mut index = 0;
        self.pairs.retain(|_| {
            index += 1;
            kept_pairs[index - 1]
        });
        self.contact_wildcards.retain(&kept_pairs);
        self.wrenches.truncate(self.owners.len());
        self.invalidate_contacts();
    }

    /// Moves every owner of family `from` into family `to`.
    ///
    /// # Returns
    ///
    /// * The number of owners moved.
    pub fn change_family(&mut self, from: u8, to: u8) -> usize {
        let mut moved = 0;
        for family in self.owners.family.iter_mut().filter(|family| **family == from) {
            *family = to;
            moved += 1;
        }
        if moved > 0 {
            self.invalidate_contacts();
        }
        moved
    }

    /// Edits the family rules.
    pub fn edit_families(
        &mut self,
        edit: impl FnOnce(&mut FamilyTable) -> DemResult<()>,
    ) -> DemResult<()> {
        edit(&mut self.scene_mut().families)?;
        self.invalidate_contacts();
        Ok(())
    }

    /// Overwrites the pose and velocities of one owner.
    pub fn set_owner_state(
        &mut self,
        owner: usize,
        position: Option<DVec3>,
        orientation: Option<DQuat>,
        lin_vel: Option<DVec3>,
        ang_vel: Option<DVec3>,
    ) -> DemResult<()> {
        self.owners.check(owner)?;
        if let Some(position) = position {
            self.owners.position[owner] = position;
        }
        if let Some(orientation) = orientation {
            self.owners.orientation[owner] = orientation.normalize();
        }
        if let Some(lin_vel) = lin_vel {
            self.owners.lin_vel[owner] = lin_vel;
        }
        if let Some(ang_vel) = ang_vel {
            self.owners.ang_vel[owner] = ang_vel;
        }
        self.invalidate_contacts();
        Ok(())
    }

    // Drift protocol.

    #[inline]
    fn drift_exhausted(&self) -> bool {
        match self.stamp {
            Some(stamp) => self.step - stamp >= self.drift_allowance as u64,
            None => true,
        }
    }

    fn order_cycle(&mut self) -> DemResult<()> {
        self.ordered_cycle += 1;
        self.stats.cycles_ordered += 1;
        let snapshot = OwnerSnapshot {
            stamp: self.step,
            scene: Arc::clone(&self.scene),
            position: self.owners.position.clone(),
            orientation: self.owners.orientation.clone(),
            lin_vel: self.owners.lin_vel.clone(),
            ang_vel: self.owners.ang_vel.clone(),
            family: self.owners.family.clone(),
        };
        self.channel.order_cycle(KinematicOrder {
            cycle: self.ordered_cycle,
            snapshot,
        })
    }

    fn consume(&mut self, product: ContactProduct) -> DemResult<()> {
        debug_assert!(
            product.cycle == self.ordered_cycle,
            "Only the ordered cycle can be published."
        );
        self.consumed_cycle = product.cycle;
        self.channel.mark_consumed(product.cycle);
        if product.scene_epoch != self.scene.epoch {
            self.stats.cycles_discarded += 1;
            return self.channel.recycle_pairs(product.pairs);
        }

        self.profiler.start(HISTORY_STAGE);
        let carried = self.narrow_phase.carry_over_history(
            &self.pairs,
            &self.contact_wildcards,
            &product.pairs,
            &mut self.spare_wildcards,
        );
        self.profiler.end(HISTORY_STAGE);
        let carried = carried?;
        std::mem::swap(&mut self.contact_wildcards, &mut self.spare_wildcards);
        let retired = std::mem::replace(&mut self.pairs, product.pairs);

        self.stamp = Some(product.stamp);
        self.drift_allowance = product.drift_allowance;
        self.stats.cycles_consumed += 1;
        self.stats.drift_at_consumption += self.step - product.stamp;
        trace!(
            cycle = product.cycle,
            stamp = product.stamp,
            step = self.step,
            pairs = self.pairs.len(),
            carried,
            "contact list consumed"
        );
        self.channel.recycle_pairs(retired)
    }

    fn prepare_contacts(&mut self, honor_stop: bool) -> DemResult<ContactState> {
        loop {
            if let Some(product) = self.channel.take_product()? {
                self.consume(product)?;
            }
            let exhausted = self.drift_exhausted();
            let in_flight = self.ordered_cycle > self.consumed_cycle;
            let stale = self.stamp != Some(self.step);
            if !in_flight && (exhausted || (self.settings.drift.is_async && stale)) {
                self.order_cycle()?;
            }
            if !exhausted {
                return Ok(ContactState::Ready);
            }

            self.stats.waits_on_kinematic += 1;
            self.profiler.start(WAIT_STAGE);
            let outcome = self.channel.wait_for_cycle(self.ordered_cycle, honor_stop);
            self.profiler.end(WAIT_STAGE);
            match outcome? {
                WaitOutcome::Ready(product) => self.consume(product)?,
                WaitOutcome::Stopped => return Ok(ContactState::Stopped),
            }
        }
    }

    fn step_once(&mut self) -> DemResult<()> {
        let drift = self.stamp.map_or(0, |stamp| self.step - stamp);
        let Self {
            settings,
            device,
            scene,
            materials,
            force_model,
            owners,
            owner_wildcards,
            pairs,
            contact_wildcards,
            wrenches,
            time,
            narrow_phase,
            profiler,
            anomalies,
            ..
        } = self;

        profiler.start(FORCE_STAGE);
        let input = NarrowPhaseInput {
            geometry: &scene.geometry,
            materials,
            force_model: &**force_model,
            owners,
            owner_wildcards,
            time: *time,
            time_step: settings.time_step,
        };
        let evaluated =
            device.dispatch(|| narrow_phase.evaluate(&input, pairs, contact_wildcards, wrenches));
        profiler.end(FORCE_STAGE);
        evaluated?;

        profiler.start(INTEGRATE_STAGE);
        let max_speed = device.dispatch(|| {
            PoseIntegration::integrate(
                owners,
                wrenches,
                &scene.families,
                settings.gravity,
                settings.time_step,
            )
        });
        profiler.end(INTEGRATE_STAGE);

        anomalies.record_speed(max_speed);
        let limit = settings.margins.max_velocity;
        if max_speed > limit {
            if let Some(owner) = owners.lin_vel.iter().position(|v| v.length() > limit) {
                anomalies.record_over_max_velocity(owner, owners.lin_vel[owner].length(), limit);
            }
        }

        self.step += 1;
        self.time += self.settings.time_step;
        self.stats.dynamic_steps += 1;
        self.channel.publish_step(self.step, drift);
        Ok(())
    }

    fn advance(&mut self, count: u64) -> DemResult<StepReport> {
        let mut report = StepReport {
            requested: count,
            ..Default::default()
        };
        while report.completed < count {
            if self.channel.stop_requested() {
                report.paused = true;
                break;
            }
            match self.prepare_contacts(true)? {
                ContactState::Ready => self.step_once()?,
                ContactState::Stopped => {
                    report.paused = true;
                    break;
                }
            }
            report.completed += 1;
        }
        Ok(report)
    }

    /// Waits for the cycle in flight, if any, and puts it to use. Ignores stop requests.
    ///
    /// Afterwards both workers are idle, every completed cycle is consumed and nothing waits
    /// in the channel.
    pub fn flush(&mut self) -> DemResult<()> {
        if let Some(product) = self.channel.take_product()? {
            self.consume(product)?;
        }
        if self.ordered_cycle > self.consumed_cycle {
            self.profiler.start(WAIT_STAGE);
            let outcome = self.channel.wait_for_cycle(self.ordered_cycle, false);
            self.profiler.end(WAIT_STAGE);
            match outcome? {
                WaitOutcome::Ready(product) => self.consume(product)?,
                WaitOutcome::Stopped => {
                    debug_assert!(false, "A flush does not honor stop requests.");
                }
            }
        }
        Ok(())
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            owners: self.owners.clone(),
            owner_wildcards: self.owner_wildcards.clone(),
            pairs: self.pairs.clone(),
            contact_wildcards: self.contact_wildcards.clone(),
            step: self.step,
            time: self.time,
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) -> DemResult<()> {
        self.channel.wait_kinematic_idle()?;
        if let Some(product) = self.channel.discard_pending()? {
            self.stats.cycles_discarded += 1;
            self.channel.recycle_pairs(product.pairs)?;
        }
        let completed = self.channel.kinematic_cycle();
        self.ordered_cycle = completed;
        self.consumed_cycle = completed;

        let Checkpoint {
            owners,
            owner_wildcards,
            pairs,
            contact_wildcards,
            step,
            time,
        } = checkpoint;
        self.owners = owners;
        self.owner_wildcards = owner_wildcards;
        self.pairs = pairs;
        self.contact_wildcards = contact_wildcards;
        self.step = step;
        self.time = time;
        self.wrenches.fill(Wrench::default());
        self.invalidate_contacts();
        self.channel.rewind(completed, step);
        Ok(())
    }

    /// Runs a job. A failed job leaves the owners, wildcards, contacts, step counter and time
    /// as they were when the job started.
    pub fn run_job(&mut self, job: DynamicJob) -> DemResult<StepReport> {
        let DynamicJob::Steps { count, sync } = job;
        let checkpoint = self.checkpoint();
        let outcome = self.advance(count).and_then(|report| {
            if sync {
                self.flush()?;
            }
            Ok(report)
        });
        if let Err(err) = &outcome {
            warn!(error = %err, step = self.step, "dynamic job failed; restoring its starting state");
            self.rollback(checkpoint)?;
        }
        outcome
    }

    /// Serves jobs until the channel terminates.
    pub fn run(worker: Arc<Mutex<DynamicWorker>>, channel: Arc<WorkerReportChannel>) {
        info!("dynamic worker started");
        while let Ok(Some(job)) = channel.next_job() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                worker
                    .lock()
                    .map_err(|_| DemError::WorkerPanicked("dynamic"))?
                    .run_job(job)
            }))
            .unwrap_or(Err(DemError::WorkerPanicked("dynamic")));
            if channel.post_job_result(outcome).is_err() {
                break;
            }
        }
        info!("dynamic worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::force_models::FrictionalHertzianForceModel;
    use crate::physics::geometry::GeometrySet;
    use crate::physics::materials::MaterialSet;

    fn worker(centers: &[DVec3]) -> DynamicWorker {
        let model = Arc::new(FrictionalHertzianForceModel);
        let mut materials = MaterialSet::default();
        materials.load(&[("E", 1e7), ("nu", 0.3), ("CoR", 0.5), ("mu", 0.3), ("Crr", 0.0)]);
        let table = materials
            .resolve(
                model.must_have_material_properties(),
                model.must_pairwise_material_properties(),
            )
            .unwrap();
        let mut owners = OwnerSet::default();
        let mut geometry = GeometrySet::default();
        for &center in centers {
            let description = OwnerDescription::sphere(center, 0.1, 1.0, 0);
            let id = owners.push(&description);
            geometry.push_owner(id, &description);
        }
        DynamicWorker::new(
            SolverSettings::default().with_threads(1, 1),
            Scene::new(geometry, FamilyTable::default()),
            owners,
            table,
            model,
            Arc::new(WorkerReportChannel::new()),
            Arc::new(AnomalyLog::new()),
        )
        .unwrap()
    }

    fn pair(a: u32, b: u32) -> ContactPair {
        ContactPair {
            contact_type: ContactType::SphereSphere,
            owner_a: a,
            owner_b: b,
            geometry_a: a,
            geometry_b: b,
        }
    }

    #[test]
    fn test_remove_owners_remaps_contacts_and_history() {
        let mut worker = worker(&[DVec3::ZERO, DVec3::X, DVec3::Y]);
        worker.pairs = vec![pair(0, 1), pair(1, 2)];
        worker.contact_wildcards.resize(2);
        worker.contact_wildcards.get_mut(0)[0] = 1.0;
        worker.contact_wildcards.get_mut(1)[0] = 2.0;
        let epoch = worker.scene().epoch;

        worker.remove_owners(&[true, false, false]);
        assert_eq!(worker.owners().len(), 2);
        assert_eq!(worker.pairs(), &[pair(0, 1)]);
        assert_eq!(worker.contact_wildcard("delta_tan_x").unwrap(), vec![2.0]);
        assert_eq!(worker.scene().geometry.spheres.len(), 2);
        assert!(worker.scene().epoch > epoch);
        assert_eq!(worker.stamp(), None);
    }

    #[test]
    fn test_add_owners_and_change_family() {
        let mut worker = worker(&[DVec3::ZERO]);
        let ids = worker.add_owners(&[
            OwnerDescription::sphere(DVec3::X, 0.1, 1.0, 0).with_family(3),
            OwnerDescription::sphere(DVec3::Y, 0.1, 1.0, 0).with_family(3),
        ]);
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(worker.wrenches().len(), 3);
        assert_eq!(worker.scene().geometry.spheres.len(), 3);
        assert_eq!(worker.change_family(3, 7), 2);
        assert_eq!(worker.owners().family, vec![0, 7, 7]);
        assert!(worker.owner_wildcard("anything").is_err());
    }

    #[test]
    fn test_collaboration_average() {
        let stats = CollaborationStats {
            cycles_consumed: 4,
            drift_at_consumption: 10,
            ..Default::default()
        };
        assert_eq!(stats.average_drift_at_consumption(), 2.5);
        assert_eq!(CollaborationStats::default().average_drift_at_consumption(), 0.0);
    }
}
