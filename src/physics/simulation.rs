use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use glam::{DQuat, DVec3};
use tracing::{info, warn};

use crate::error::{DemError, DemResult};
use crate::physics::anomalies::{AnomalyLog, AnomalyReport};
use crate::physics::collision_detection::contact_pair::ContactPair;
use crate::physics::dynamic_worker::{CollaborationStats, DynamicJob, DynamicWorker, StepReport};
use crate::physics::families::{family_id, FamilyTable};
use crate::physics::force_models::{FrictionalHertzianForceModel, IForceModel};
use crate::physics::geometry::GeometrySet;
use crate::physics::inspector::{Inspection, OwnerView};
use crate::physics::kinematic_worker::{initial_bin_size, KinematicWorker};
use crate::physics::materials::MaterialSet;
use crate::physics::owner_description::OwnerDescription;
use crate::physics::owners::OwnerSet;
use crate::physics::report_channel::{BinStatus, DriftCounters, WorkerReportChannel};
use crate::physics::scene::Scene;
use crate::physics::simulation_profiler::StageTiming;
use crate::physics::simulation_settings::SolverSettings;

/// Scene assembled before the workers start.
#[derive(Debug, Default)]
struct SceneSetup {
    owners: OwnerSet,
    geometry: GeometrySet,
    families: FamilyTable,
}

/// The running workers.
struct Workers {
    dynamic: Arc<Mutex<DynamicWorker>>,
    kinematic: Arc<Mutex<KinematicWorker>>,
    threads: Vec<JoinHandle<()>>,
}

/// Handle for steering a solver from other threads while it steps.
#[derive(Clone)]
pub struct SolverControl {
    channel: Arc<WorkerReportChannel>,
    anomalies: Arc<AnomalyLog>,
}

impl SolverControl {
    /// Asks the dynamic worker to stop at the next step boundary. Stepping calls return early
    /// and keep returning immediately until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.channel.request_stop();
    }

    /// Allows stepping again after a [`pause`](Self::pause).
    pub fn resume(&self) {
        self.channel.clear_stop();
    }

    /// Whether a pause is in effect.
    pub fn is_paused(&self) -> bool {
        self.channel.stop_requested()
    }

    /// Gets the drift and cycle counters of both workers.
    pub fn counters(&self) -> DriftCounters {
        self.channel.counters()
    }

    /// Gets the anomalies recorded since the last clear.
    pub fn anomalies(&self) -> AnomalyReport {
        self.anomalies.report()
    }

    /// Clears the anomaly log.
    pub fn clear_anomalies(&self) {
        self.anomalies.clear();
    }
}

/// Orchestrates a DEM simulation run by a kinematic and a dynamic worker.
///
/// Owners, materials, families and the force model are set up first. [`initialize`](Self::initialize)
/// resolves the configuration and starts both workers; afterwards the simulation advances
/// through [`do_dynamics`](Self::do_dynamics) and its synchronous variants. Scene edits after
/// initialization first bring both workers to rendezvous.
pub struct DemSolver {
    settings: SolverSettings,
    force_model: Arc<dyn IForceModel>,
    materials: MaterialSet,
    setup: SceneSetup,
    channel: Arc<WorkerReportChannel>,
    anomalies: Arc<AnomalyLog>,
    workers: Option<Workers>,
    poisoned: Option<DemError>,
}

impl DemSolver {
    /// Creates a solver with the frictional Hertzian force model.
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            force_model: Arc::new(FrictionalHertzianForceModel),
            materials: MaterialSet::default(),
            setup: SceneSetup::default(),
            channel: Arc::new(WorkerReportChannel::new()),
            anomalies: Arc::new(AnomalyLog::new()),
            workers: None,
            poisoned: None,
        }
    }

    /// Gets the settings.
    #[inline]
    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Gets a handle that can pause the solver and read its counters from other threads.
    pub fn control(&self) -> SolverControl {
        SolverControl {
            channel: Arc::clone(&self.channel),
            anomalies: Arc::clone(&self.anomalies),
        }
    }

    /// Whether [`initialize`](Self::initialize) succeeded.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.workers.is_some()
    }

    fn ensure_setup(&self) -> DemResult<()> {
        if self.workers.is_some() {
            Err(DemError::AlreadyInitialized)
        } else {
            Ok(())
        }
    }

    fn ensure_usable(&self) -> DemResult<&Workers> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }
        self.workers.as_ref().ok_or(DemError::NotInitialized)
    }

    fn dynamic(&self) -> DemResult<MutexGuard<'_, DynamicWorker>> {
        self.ensure_usable()?
            .dynamic
            .lock()
            .map_err(|_| DemError::WorkerPanicked("dynamic"))
    }

    fn kinematic(&self) -> DemResult<MutexGuard<'_, KinematicWorker>> {
        self.ensure_usable()?
            .kinematic
            .lock()
            .map_err(|_| DemError::WorkerPanicked("kinematic"))
    }

    // Configuration.

    /// Replaces the force model. Only valid before initialization.
    pub fn set_force_model(&mut self, force_model: impl IForceModel + 'static) -> DemResult<()> {
        self.ensure_setup()?;
        self.force_model = Arc::new(force_model);
        Ok(())
    }

    /// Gets the name of the force model.
    pub fn force_model_name(&self) -> &str {
        self.force_model.name()
    }

    /// Loads a material from named properties. Only valid before initialization.
    ///
    /// # Returns
    ///
    /// * The material index to reference from owner descriptions.
    pub fn load_material(&mut self, properties: &[(&str, f64)]) -> DemResult<u32> {
        self.ensure_setup()?;
        Ok(self.materials.load(properties))
    }

    /// Overrides a pairwise property for one material pair. Only valid before initialization.
    pub fn set_material_property_pair(
        &mut self,
        name: &str,
        material_a: u32,
        material_b: u32,
        value: f64,
    ) -> DemResult<()> {
        self.ensure_setup()?;
        self.materials.set_pair_property(name, material_a, material_b, value)
    }

    // Owners.

    /// Adds one owner.
    pub fn add_owner(&mut self, description: OwnerDescription) -> DemResult<u32> {
        let ids = self.add_owners(std::slice::from_ref(&description))?;
        Ok(ids[0])
    }

    /// Adds owners. After initialization this synchronizes the workers first.
    ///
    /// # Returns
    ///
    /// * The ids of the new owners, in order.
    pub fn add_owners(&mut self, descriptions: &[OwnerDescription]) -> DemResult<Vec<u32>> {
        for description in descriptions {
            description.validate(self.materials.len())?;
        }
        if self.workers.is_none() {
            let setup = &mut self.setup;
            return Ok(descriptions
                .iter()
                .map(|description| {
                    let id = setup.owners.push(description);
                    setup.geometry.push_owner(id, description);
                    id
                })
                .collect());
        }
        self.sync()?;
        Ok(self.dynamic()?.add_owners(descriptions))
    }

    /// Removes owners along with their geometry and contacts. The remaining owners are
    /// renumbered in order.
    pub fn remove_owners(&mut self, ids: &[u32]) -> DemResult<()> {
        let count = self.num_owners()?;
        let mut removed = vec![false; count];
        for &id in ids {
            let flag = removed
                .get_mut(id as usize)
                .ok_or(DemError::UnknownOwner(id as usize))?;
            *flag = true;
        }
        if self.workers.is_none() {
            let owner_map = self.setup.owners.remove(&removed);
            self.setup.geometry.retain_owners(&owner_map);
            return Ok(());
        }
        self.sync()?;
        self.dynamic()?.remove_owners(&removed);
        Ok(())
    }

    /// Moves every owner of family `from` into family `to`.
    ///
    /// # Returns
    ///
    /// * The number of owners moved.
    pub fn change_family(&mut self, from: u32, to: u32) -> DemResult<usize> {
        let (from, to) = (family_id(from)?, family_id(to)?);
        if self.workers.is_none() {
            let mut moved = 0;
            for family in self.setup.owners.family.iter_mut().filter(|family| **family == from) {
                *family = to;
                moved += 1;
            }
            return Ok(moved);
        }
        self.sync()?;
        Ok(self.dynamic()?.change_family(from, to))
    }

    // Families.

    fn edit_families(
        &mut self,
        edit: impl FnOnce(&mut FamilyTable) -> DemResult<()>,
    ) -> DemResult<()> {
        if self.workers.is_none() {
            return edit(&mut self.setup.families);
        }
        self.sync()?;
        self.dynamic()?.edit_families(edit)
    }

    /// Stops owners of families `a` and `b` from touching each other.
    pub fn disable_contact_between_families(&mut self, a: u32, b: u32) -> DemResult<()> {
        self.edit_families(|families| families.disable_contact(a, b))
    }

    /// Lets owners of families `a` and `b` touch each other again.
    pub fn enable_contact_between_families(&mut self, a: u32, b: u32) -> DemResult<()> {
        self.edit_families(|families| families.enable_contact(a, b))
    }

    /// Pins every owner of `family` in place.
    pub fn set_family_fixed(&mut self, family: u32) -> DemResult<()> {
        self.edit_families(|families| families.set_fixed(family))
    }

    /// Prescribes linear velocity components of `family`.
    ///
    /// # Arguments
    ///
    /// * `family` - Family to prescribe.
    /// * `lin_vel` - Value per axis; `None` leaves the axis free.
    /// * `dictate` - Whether prescribed axes ignore contact forces. Otherwise prescribed values
    ///   are overwritten each step and contact still acts on the other axes.
    pub fn set_family_prescribed_lin_vel(
        &mut self,
        family: u32,
        lin_vel: [Option<f64>; 3],
        dictate: bool,
    ) -> DemResult<()> {
        self.edit_families(|families| families.set_prescribed_lin_vel(family, lin_vel, dictate))
    }

    /// Prescribes angular velocity components of `family`.
    pub fn set_family_prescribed_ang_vel(
        &mut self,
        family: u32,
        ang_vel: [Option<f64>; 3],
        dictate: bool,
    ) -> DemResult<()> {
        self.edit_families(|families| families.set_prescribed_ang_vel(family, ang_vel, dictate))
    }

    /// Adds a constant linear acceleration to every owner of `family`.
    pub fn add_family_prescribed_acc(&mut self, family: u32, acc: DVec3) -> DemResult<()> {
        self.edit_families(|families| families.add_prescribed_acc(family, acc))
    }

    /// Adds a constant angular acceleration to every owner of `family`.
    pub fn add_family_prescribed_ang_acc(&mut self, family: u32, ang_acc: DVec3) -> DemResult<()> {
        self.edit_families(|families| families.add_prescribed_ang_acc(family, ang_acc))
    }

    /// Returns `family` to free motion.
    pub fn clear_family_prescription(&mut self, family: u32) -> DemResult<()> {
        self.edit_families(|families| families.clear_prescription(family))
    }

    /// Adds a fixed distance to the contact margin of every owner of `family`.
    pub fn set_family_extra_margin(&mut self, family: u32, margin: f64) -> DemResult<()> {
        self.edit_families(|families| families.set_extra_margin(family, margin))
    }

    // Lifecycle.

    /// Resolves materials against the force model and starts both workers.
    pub fn initialize(&mut self) -> DemResult<()> {
        self.ensure_setup()?;
        self.settings.validate()?;
        let model = &self.force_model;
        let materials = self.materials.resolve(
            model.must_have_material_properties(),
            model.must_pairwise_material_properties(),
        )?;
        let bin_size = initial_bin_size(&self.settings, &self.setup.geometry)?;

        let SceneSetup {
            owners,
            geometry,
            families,
        } = std::mem::take(&mut self.setup);
        let owner_count = owners.len();
        let sphere_count = geometry.spheres.len();
        let kinematic =
            KinematicWorker::new(self.settings.clone(), bin_size, Arc::clone(&self.anomalies))?;
        self.channel.set_bin_status(kinematic.bin_status())?;
        let dynamic = DynamicWorker::new(
            self.settings.clone(),
            Scene::new(geometry, families),
            owners,
            materials,
            Arc::clone(&self.force_model),
            Arc::clone(&self.channel),
            Arc::clone(&self.anomalies),
        )?;

        let kinematic = Arc::new(Mutex::new(kinematic));
        let dynamic = Arc::new(Mutex::new(dynamic));
        let mut threads = Vec::with_capacity(2);
        let spawned = [("dem-kinematic", true), ("dem-dynamic", false)]
            .into_iter()
            .try_for_each(|(name, is_kinematic)| {
                let channel = Arc::clone(&self.channel);
                let builder = std::thread::Builder::new().name(name.to_owned());
                let handle = if is_kinematic {
                    let worker = Arc::clone(&kinematic);
                    builder.spawn(move || KinematicWorker::run(worker, channel))
                } else {
                    let worker = Arc::clone(&dynamic);
                    builder.spawn(move || DynamicWorker::run(worker, channel))
                };
                threads.push(handle.map_err(|err| DemError::Device {
                    device: "worker threads",
                    reason: err.to_string(),
                })?);
                Ok(())
            });
        if let Err(err) = spawned {
            self.channel.terminate();
            for thread in threads {
                let _ = thread.join();
            }
            return Err(err);
        }

        info!(
            owners = owner_count,
            spheres = sphere_count,
            bin_size,
            force_model = self.force_model.name(),
            "solver initialized"
        );
        self.workers = Some(Workers {
            dynamic,
            kinematic,
            threads,
        });
        Ok(())
    }

    fn run_job(&mut self, job: DynamicJob) -> DemResult<StepReport> {
        self.ensure_usable()?;
        self.channel.submit_job(job)?;
        let outcome = self.channel.wait_job_result();
        if let Err(err) = &outcome {
            if err.is_unrecoverable() {
                warn!(error = %err, "solver poisoned");
                self.poisoned = Some(err.clone());
            }
        }
        outcome
    }

    /// Advances up to `steps` dynamic steps. The kinematic worker may still be busy when this
    /// returns.
    ///
    /// # Returns
    ///
    /// * How many steps ran. Fewer than asked only when paused. On error the simulation is
    ///   left as it was when the call started.
    pub fn do_dynamics(&mut self, steps: u64) -> DemResult<StepReport> {
        self.run_job(DynamicJob::Steps {
            count: steps,
            sync: false,
        })
    }

    /// Advances up to `steps` dynamic steps, then waits until both workers meet.
    pub fn do_dynamics_then_sync(&mut self, steps: u64) -> DemResult<StepReport> {
        self.run_job(DynamicJob::Steps {
            count: steps,
            sync: true,
        })
    }

    /// Waits until both workers meet: the cycle in flight, if any, is consumed and nothing
    /// is pending in the channel.
    pub fn sync(&mut self) -> DemResult<()> {
        self.do_dynamics_then_sync(0).map(|_| ())
    }

    // Queries.

    fn read_owners<R>(&self, read: impl FnOnce(&OwnerSet) -> DemResult<R>) -> DemResult<R> {
        if self.workers.is_none() {
            return read(&self.setup.owners);
        }
        let worker = self.dynamic()?;
        read(worker.owners())
    }

    /// Gets the number of owners.
    pub fn num_owners(&self) -> DemResult<usize> {
        self.read_owners(|owners| Ok(owners.len()))
    }

    /// Gets the position of an owner.
    pub fn owner_position(&self, owner: u32) -> DemResult<DVec3> {
        self.read_owners(|owners| {
            owners.check(owner as usize)?;
            Ok(owners.position[owner as usize])
        })
    }

    /// Gets the orientation of an owner.
    pub fn owner_orientation(&self, owner: u32) -> DemResult<DQuat> {
        self.read_owners(|owners| {
            owners.check(owner as usize)?;
            Ok(owners.orientation[owner as usize])
        })
    }

    /// Gets the linear velocity of an owner.
    pub fn owner_velocity(&self, owner: u32) -> DemResult<DVec3> {
        self.read_owners(|owners| {
            owners.check(owner as usize)?;
            Ok(owners.lin_vel[owner as usize])
        })
    }

    /// Gets the angular velocity of an owner.
    pub fn owner_angular_velocity(&self, owner: u32) -> DemResult<DVec3> {
        self.read_owners(|owners| {
            owners.check(owner as usize)?;
            Ok(owners.ang_vel[owner as usize])
        })
    }

    /// Gets the family of an owner.
    pub fn owner_family(&self, owner: u32) -> DemResult<u8> {
        self.read_owners(|owners| {
            owners.check(owner as usize)?;
            Ok(owners.family[owner as usize])
        })
    }

    fn set_owner_state(
        &mut self,
        owner: u32,
        position: Option<DVec3>,
        orientation: Option<DQuat>,
        lin_vel: Option<DVec3>,
        ang_vel: Option<DVec3>,
    ) -> DemResult<()> {
        let owner = owner as usize;
        if self.workers.is_none() {
            let owners = &mut self.setup.owners;
            owners.check(owner)?;
            if let Some(position) = position {
                owners.position[owner] = position;
            }
            if let Some(orientation) = orientation {
                owners.orientation[owner] = orientation.normalize();
            }
            if let Some(lin_vel) = lin_vel {
                owners.lin_vel[owner] = lin_vel;
            }
            if let Some(ang_vel) = ang_vel {
                owners.ang_vel[owner] = ang_vel;
            }
            return Ok(());
        }
        self.sync()?;
        self.dynamic()?
            .set_owner_state(owner, position, orientation, lin_vel, ang_vel)
    }

    /// Moves an owner.
    pub fn set_owner_position(&mut self, owner: u32, position: DVec3) -> DemResult<()> {
        self.set_owner_state(owner, Some(position), None, None, None)
    }

    /// Rotates an owner.
    pub fn set_owner_orientation(&mut self, owner: u32, orientation: DQuat) -> DemResult<()> {
        self.set_owner_state(owner, None, Some(orientation), None, None)
    }

    /// Sets the linear velocity of an owner.
    pub fn set_owner_velocity(&mut self, owner: u32, lin_vel: DVec3) -> DemResult<()> {
        self.set_owner_state(owner, None, None, Some(lin_vel), None)
    }

    /// Sets the angular velocity of an owner.
    pub fn set_owner_angular_velocity(&mut self, owner: u32, ang_vel: DVec3) -> DemResult<()> {
        self.set_owner_state(owner, None, None, None, Some(ang_vel))
    }

    /// Gets the values of an owner wildcard, one per owner.
    pub fn owner_wildcard(&self, name: &str) -> DemResult<Vec<f64>> {
        self.dynamic()?.owner_wildcard(name)
    }

    /// Sets the values of an owner wildcard; `values` must have one entry per owner.
    pub fn set_owner_wildcard(&mut self, name: &str, values: &[f64]) -> DemResult<()> {
        self.dynamic()?.set_owner_wildcard(name, values)
    }

    /// Gets the values of a contact wildcard, one per entry of [`contacts`](Self::contacts).
    pub fn contact_wildcard(&self, name: &str) -> DemResult<Vec<f64>> {
        self.dynamic()?.contact_wildcard(name)
    }

    /// Gets the contact list the dynamic worker currently uses.
    pub fn contacts(&self) -> DemResult<Vec<ContactPair>> {
        Ok(self.dynamic()?.pairs().to_vec())
    }

    /// Gets the number of pairs that were in geometric contact in the last step.
    pub fn num_contacts(&self) -> DemResult<usize> {
        Ok(self.dynamic()?.active_contacts())
    }

    /// Gets the simulation time.
    pub fn time(&self) -> DemResult<f64> {
        Ok(self.dynamic()?.time())
    }

    /// Gets the number of dynamic steps taken.
    pub fn step_count(&self) -> DemResult<u64> {
        Ok(self.dynamic()?.step())
    }

    /// Gets the bin state the kinematic worker will use next.
    pub fn bin_status(&self) -> DemResult<BinStatus> {
        self.ensure_usable()?;
        self.channel.bin_status()
    }

    /// Gets the bin edge length the kinematic worker will use next.
    pub fn bin_size(&self) -> DemResult<f64> {
        Ok(self.bin_status()?.bin_size)
    }

    /// Gets the number of dynamic steps each contact list may serve.
    pub fn update_freq(&self) -> DemResult<u32> {
        Ok(self.bin_status()?.update_freq)
    }

    /// Gets how the two workers cooperated so far.
    pub fn collaboration_stats(&self) -> DemResult<CollaborationStats> {
        Ok(self.dynamic()?.stats())
    }

    /// Gets the accumulated stage timings of both workers, kinematic stages first.
    pub fn timing_stats(&self) -> DemResult<Vec<(&'static str, StageTiming)>> {
        let mut stages = self.kinematic()?.timings();
        stages.extend(self.dynamic()?.timings());
        Ok(stages)
    }

    /// Clears the stage timings of both workers.
    pub fn clear_timing_stats(&self) -> DemResult<()> {
        self.kinematic()?.clear_timings();
        self.dynamic()?.clear_timings();
        Ok(())
    }

    /// Gets the scratch capacity of the kinematic and the dynamic worker, in bytes.
    pub fn scratch_capacity_bytes(&self) -> DemResult<(usize, usize)> {
        let kinematic = self.kinematic()?.scratch_capacity_bytes();
        Ok((kinematic, self.dynamic()?.scratch_capacity_bytes()))
    }

    /// Evaluates a quantity over the clump owners accepted by `filter`.
    pub fn inspect(
        &self,
        inspection: Inspection,
        filter: impl Fn(&OwnerView) -> bool + Sync,
    ) -> DemResult<f64> {
        self.read_owners(|owners| Ok(inspection.evaluate(owners, filter)))
    }

    /// Gets the anomalies recorded since the last clear.
    pub fn anomalies(&self) -> AnomalyReport {
        self.anomalies.report()
    }
}

impl Drop for DemSolver {
    fn drop(&mut self) {
        self.channel.terminate();
        if let Some(workers) = self.workers.take() {
            for thread in workers.threads {
                if thread.join().is_err() {
                    warn!("a worker thread panicked during shutdown");
                }
            }
        }
    }
}
