//! Exact contact evaluation on the dynamic worker.
//!
//! Each potential contact is re-tested against the owners' current poses. Pairs in geometric
//! contact go through the force model; pairs that are not get their wildcards reset. Every
//! pair contributes one wrench entry per owner, and the entries are reduced by owner with a
//! stable sort followed by a reduce-by-key, so the per-owner sums do not depend on thread
//! timing.

use std::ops::Add;

use bytemuck::{Pod, Zeroable};
use glam::DVec3;
use rayon::prelude::*;

use crate::error::DemResult;
use crate::physics::collision_detection::contact_pair::{ContactPair, ContactType};
use crate::physics::collision_detection::overlap_tests::{
    sphere_cylinder, sphere_plane, sphere_sphere, sphere_triangle, SphereContact,
};
use crate::physics::force_models::{ContactContext, IForceModel};
use crate::physics::geometry::{AnalyticalShape, GeometrySet};
use crate::physics::materials::MaterialTable;
use crate::physics::owners::OwnerSet;
use crate::physics::wildcards::WildcardStore;
use crate::utilities::memory::ScratchArena;
use crate::utilities::primitives::{reduce_by_key, sort_pairs_by_key};

/// Force and torque acting on an owner, about its origin.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Wrench {
    /// Net force.
    pub force: DVec3,
    /// Net torque.
    pub torque: DVec3,
}

impl Add for Wrench {
    type Output = Wrench;

    #[inline(always)]
    fn add(self, other: Wrench) -> Wrench {
        Wrench {
            force: self.force + other.force,
            torque: self.torque + other.torque,
        }
    }
}

/// Everything contact evaluation reads.
pub struct NarrowPhaseInput<'a> {
    /// Flattened geometry.
    pub geometry: &'a GeometrySet,
    /// Material properties resolved for the force model.
    pub materials: &'a MaterialTable,
    /// Contact force law.
    pub force_model: &'a dyn IForceModel,
    /// Current owner state.
    pub owners: &'a OwnerSet,
    /// Owner wildcards.
    pub owner_wildcards: &'a WildcardStore,
    /// Simulation time.
    pub time: f64,
    /// Step length.
    pub time_step: f64,
}

const HISTORY_KEYS: usize = 6;

/// Evaluates contact forces and reduces them per owner.
pub struct NarrowPhase {
    arena: ScratchArena<7>,
}

impl Default for NarrowPhase {
    fn default() -> Self {
        Self::new()
    }
}

/// Tests the current overlap of a pair.
///
/// # Returns
///
/// * The contact, the radius of geometry B and the material of geometry B.
#[inline(always)]
fn test_current_overlap(
    geometry: &GeometrySet,
    owners: &OwnerSet,
    pair: &ContactPair,
) -> (SphereContact, f64, u32) {
    let sphere = &geometry.spheres[pair.geometry_a as usize];
    let a = pair.owner_a as usize;
    let b = pair.owner_b as usize;
    let center = GeometrySet::sphere_center(sphere, owners.position[a], owners.orientation[a]);
    match pair.contact_type {
        ContactType::SphereSphere => {
            let other = &geometry.spheres[pair.geometry_b as usize];
            let other_center =
                GeometrySet::sphere_center(other, owners.position[b], owners.orientation[b]);
            (
                sphere_sphere(center, sphere.radius, other_center, other.radius),
                other.radius,
                other.material,
            )
        }
        ContactType::SphereTriangle => {
            let triangle = &geometry.triangles[pair.geometry_b as usize];
            let vertices =
                GeometrySet::triangle_vertices(triangle, owners.position[b], owners.orientation[b]);
            (
                sphere_triangle(center, sphere.radius, vertices),
                f64::INFINITY,
                triangle.material,
            )
        }
        ContactType::SpherePlane | ContactType::SphereCylinder => {
            let component = &geometry.analytical[pair.geometry_b as usize];
            let contact = match component
                .shape
                .to_world(owners.position[b], owners.orientation[b])
            {
                AnalyticalShape::Plane { point, normal } => {
                    sphere_plane(center, sphere.radius, point, normal)
                }
                AnalyticalShape::Cylinder {
                    center: axis_point,
                    axis,
                    radius,
                    inward,
                } => sphere_cylinder(center, sphere.radius, axis_point, axis, radius, inward),
            };
            (contact, f64::INFINITY, component.material)
        }
    }
}

/// Evaluates one pair.
///
/// # Returns
///
/// * The wrenches on owner A and owner B, or `None` when the pair is not in contact.
#[inline(always)]
fn evaluate_pair(
    input: &NarrowPhaseInput<'_>,
    pair: &ContactPair,
    wildcards: &mut [f64],
) -> Option<(Wrench, Wrench)> {
    let (contact, radius_b, material_b) = test_current_overlap(input.geometry, input.owners, pair);
    if contact.depth <= 0.0 {
        return None;
    }
    let owners = input.owners;
    let sphere = &input.geometry.spheres[pair.geometry_a as usize];
    let a = pair.owner_a as usize;
    let b = pair.owner_b as usize;
    let arm_a = contact.point - owners.position[a];
    let arm_b = contact.point - owners.position[b];
    let velocity_a = owners.lin_vel[a] + owners.ang_vel[a].cross(arm_a);
    let velocity_b = owners.lin_vel[b] + owners.ang_vel[b].cross(arm_b);
    let context = ContactContext {
        contact_type: pair.contact_type,
        owner_a: pair.owner_a,
        owner_b: pair.owner_b,
        family_a: owners.family[a],
        family_b: owners.family[b],
        point: contact.point,
        normal: contact.normal,
        overlap: contact.depth,
        radius_a: sphere.radius,
        radius_b,
        mass_a: owners.mass[a],
        mass_b: owners.mass[b],
        relative_velocity: velocity_a - velocity_b,
        ang_vel_a: owners.ang_vel[a],
        ang_vel_b: owners.ang_vel[b],
        time: input.time,
        time_step: input.time_step,
        owner_wildcards_a: input.owner_wildcards.get(a),
        owner_wildcards_b: input.owner_wildcards.get(b),
    };
    let material = input.materials.lookup(sphere.material, material_b);
    let result = input.force_model.compute(&context, &material, wildcards);
    Some((
        Wrench {
            force: result.force,
            torque: arm_a.cross(result.force) + result.torque_only_a,
        },
        Wrench {
            force: -result.force,
            torque: arm_b.cross(-result.force) + result.torque_only_b,
        },
    ))
}

impl NarrowPhase {
    /// Creates a narrow phase with empty scratch memory.
    pub fn new() -> Self {
        Self {
            arena: ScratchArena::new([
                "entry_keys",
                "entry_wrenches",
                "entry_keys_scratch",
                "entry_wrenches_scratch",
                "reduced_owners",
                "reduced_wrenches",
                "history_keys",
            ]),
        }
    }

    /// Gets the scratch arena, mostly for its statistics.
    #[inline]
    pub fn arena(&self) -> &ScratchArena<7> {
        &self.arena
    }

    /// Evaluates every pair and sums the resulting wrenches per owner.
    ///
    /// # Arguments
    ///
    /// * `input` - Current state.
    /// * `pairs` - Potential contacts.
    /// * `contact_wildcards` - One wildcard entry per pair.
    /// * `owner_wrenches` - Receives the net wrench of every owner.
    ///
    /// # Returns
    ///
    /// * The number of pairs in geometric contact.
    pub fn evaluate(
        &mut self,
        input: &NarrowPhaseInput<'_>,
        pairs: &[ContactPair],
        contact_wildcards: &mut WildcardStore,
        owner_wrenches: &mut [Wrench],
    ) -> DemResult<usize> {
        debug_assert!(
            contact_wildcards.len() == pairs.len(),
            "Every pair needs one wildcard entry."
        );
        debug_assert!(owner_wrenches.len() == input.owners.len());
        let entry_count = pairs.len() * 2;
        let stride = contact_wildcards.stride();
        let chunk = contact_wildcards.chunk_size();
        let (initial, wildcard_values) = contact_wildcards.parts_mut();

        let [keys, wrenches, keys_scratch, wrenches_scratch, unique_owners, reduced, _] =
            self.arena.buffers_mut();
        let keys = keys.acquire::<u32>(entry_count)?;
        let wrenches = wrenches.acquire::<Wrench>(entry_count)?;
        let active: usize = keys
            .par_chunks_mut(2)
            .zip(wrenches.par_chunks_mut(2))
            .zip(pairs.par_iter())
            .zip(wildcard_values.par_chunks_mut(chunk))
            .map(|(((keys, wrenches), pair), wildcards)| {
                keys[0] = pair.owner_a;
                keys[1] = pair.owner_b;
                let wildcards = &mut wildcards[..stride];
                match evaluate_pair(input, pair, wildcards) {
                    Some((on_a, on_b)) => {
                        wrenches[0] = on_a;
                        wrenches[1] = on_b;
                        1
                    }
                    None => {
                        wrenches[0] = Wrench::default();
                        wrenches[1] = Wrench::default();
                        wildcards.copy_from_slice(initial);
                        0
                    }
                }
            })
            .sum();

        sort_pairs_by_key(
            keys,
            wrenches,
            keys_scratch.acquire::<u32>(entry_count)?,
            wrenches_scratch.acquire::<Wrench>(entry_count)?,
        );
        let unique_owners = unique_owners.acquire::<u32>(entry_count)?;
        let reduced = reduced.acquire::<Wrench>(entry_count)?;
        let runs = reduce_by_key(keys, wrenches, unique_owners, reduced);

        owner_wrenches.fill(Wrench::default());
        for (&owner, &wrench) in unique_owners[..runs].iter().zip(&reduced[..runs]) {
            owner_wrenches[owner as usize] = wrench;
        }
        self.arena.scalars.num_contacts = active;
        Ok(active)
    }

    /// Builds the wildcards of a new contact list from the previous one.
    ///
    /// Pairs present in both lists keep their values; new pairs start from initial values.
    ///
    /// # Returns
    ///
    /// * The number of pairs whose history was carried over.
    pub fn carry_over_history(
        &mut self,
        old_pairs: &[ContactPair],
        old_wildcards: &WildcardStore,
        new_pairs: &[ContactPair],
        new_wildcards: &mut WildcardStore,
    ) -> DemResult<usize> {
        new_wildcards.clear();
        if new_wildcards.stride() == 0 || old_pairs.is_empty() {
            new_wildcards.resize(new_pairs.len());
            return Ok(0);
        }
        let sorted = self
            .arena
            .acquire::<[u64; 2]>(HISTORY_KEYS, old_pairs.len())?;
        for (slot, (index, pair)) in sorted.iter_mut().zip(old_pairs.iter().enumerate()) {
            *slot = [pair.history_key(), index as u64];
        }
        sorted.sort_unstable();
        let mut carried = 0;
        for pair in new_pairs {
            match sorted.binary_search_by_key(&pair.history_key(), |entry| entry[0]) {
                Ok(position) => {
                    new_wildcards.push_values(old_wildcards.get(sorted[position][1] as usize));
                    carried += 1;
                }
                Err(_) => new_wildcards.push_initial(),
            }
        }
        self.arena.scalars.num_prev_contacts = old_pairs.len();
        Ok(carried)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::force_models::LinearSpringForceModel;
    use crate::physics::geometry::SphereComponent;
    use crate::physics::owner_description::OwnerDescription;

    fn two_spheres(gap: f64) -> (GeometrySet, OwnerSet) {
        let mut geometry = GeometrySet::default();
        let mut owners = OwnerSet::default();
        for (owner, x) in [0.0, 0.2 + gap].into_iter().enumerate() {
            owners.push(&OwnerDescription::sphere(DVec3::new(x, 0.0, 0.0), 0.1, 1.0, 0));
            geometry.spheres.push(SphereComponent {
                owner: owner as u32,
                local_offset: DVec3::ZERO,
                radius: 0.1,
                material: 0,
            });
        }
        (geometry, owners)
    }

    fn pair() -> ContactPair {
        ContactPair {
            contact_type: ContactType::SphereSphere,
            owner_a: 0,
            owner_b: 1,
            geometry_a: 0,
            geometry_b: 1,
        }
    }

    #[test]
    fn test_equal_and_opposite_forces() {
        let (geometry, owners) = two_spheres(-0.01);
        let materials = MaterialTable::default();
        let model = LinearSpringForceModel::new(100.0, 0.0);
        let mut owner_wildcards = WildcardStore::new(Vec::new());
        owner_wildcards.resize(owners.len());
        let input = NarrowPhaseInput {
            geometry: &geometry,
            materials: &materials,
            force_model: &model,
            owners: &owners,
            owner_wildcards: &owner_wildcards,
            time: 0.0,
            time_step: 1e-4,
        };
        let mut wildcards = WildcardStore::new(vec![0.0; 3]);
        wildcards.resize(1);
        let mut wrenches = vec![Wrench::default(); 2];
        let active = NarrowPhase::new()
            .evaluate(&input, &[pair()], &mut wildcards, &mut wrenches)
            .unwrap();
        assert_eq!(active, 1);
        assert!((wrenches[0].force.x + 1.0).abs() < 1e-9);
        assert!((wrenches[1].force.x - 1.0).abs() < 1e-9);
        assert!(wrenches[0].torque.length() < 1e-12);
    }

    #[test]
    fn test_separated_pair_resets_wildcards() {
        let (geometry, owners) = two_spheres(0.01);
        let materials = MaterialTable::default();
        let model = LinearSpringForceModel::new(100.0, 0.0);
        let mut owner_wildcards = WildcardStore::new(Vec::new());
        owner_wildcards.resize(owners.len());
        let input = NarrowPhaseInput {
            geometry: &geometry,
            materials: &materials,
            force_model: &model,
            owners: &owners,
            owner_wildcards: &owner_wildcards,
            time: 0.0,
            time_step: 1e-4,
        };
        let mut wildcards = WildcardStore::new(vec![0.0; 3]);
        wildcards.resize(1);
        wildcards.get_mut(0)[1] = 3.0;
        let mut wrenches = vec![Wrench::default(); 2];
        let active = NarrowPhase::new()
            .evaluate(&input, &[pair()], &mut wildcards, &mut wrenches)
            .unwrap();
        assert_eq!(active, 0);
        assert_eq!(wildcards.get(0), &[0.0, 0.0, 0.0]);
        assert_eq!(wrenches[1], Wrench::default());
    }

    #[test]
    fn test_history_carries_over_matching_pairs() {
        let kept = pair();
        let dropped = ContactPair {
            geometry_b: 7,
            ..pair()
        };
        let fresh = ContactPair {
            geometry_b: 9,
            ..pair()
        };
        let mut old = WildcardStore::new(vec![0.0]);
        old.push_values(&[1.0]);
        old.push_values(&[2.0]);
        let mut new = WildcardStore::new(vec![0.0]);
        let carried = NarrowPhase::new()
            .carry_over_history(&[dropped, kept], &old, &[fresh, kept], &mut new)
            .unwrap();
        assert_eq!(carried, 1);
        assert_eq!(new.slot_values(0), vec![0.0, 2.0]);
    }
}
