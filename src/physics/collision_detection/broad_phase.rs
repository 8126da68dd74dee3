//! Bin-based contact detection.
//!
//! Every sphere and triangle is inflated by its owner's expansion margin and registered in
//! every bin its bounding box touches. Geometries sharing a bin are tested pairwise. A pair
//! sharing several bins is only reported by the bin holding the deepest point of its
//! inflated overlap, so the result has no duplicates and does not depend on thread timing.
//! Analytical boundaries are not binned; every sphere is tested against each of them.

use glam::{DQuat, DVec3};
use rayon::prelude::*;

use crate::error::{DemError, DemResult};
use crate::physics::collision_detection::bin_grid::BinGrid;
use crate::physics::collision_detection::contact_pair::{ContactPair, ContactType};
use crate::physics::collision_detection::overlap_tests::{
    sphere_cylinder, sphere_plane, sphere_sphere, sphere_triangle,
};
use crate::physics::families::FamilyTable;
use crate::physics::geometry::{AnalyticalShape, GeometrySet};
use crate::utilities::memory::ScratchArena;
use crate::utilities::primitives::{exclusive_scan, run_length_encode, sort_pairs_by_key};

const BUFFER_NAMES: [&str; 15] = [
    "sphere_centers",
    "sphere_radii",
    "triangle_vertices",
    "triangle_margins",
    "entity_min",
    "entity_max",
    "touch_counts",
    "touch_offsets",
    "bin_keys",
    "bin_entities",
    "bin_keys_scratch",
    "bin_entities_scratch",
    "bin_ids",
    "bin_counts",
    "bin_starts",
];

/// State of the owners as seen by one detection cycle.
pub struct BroadPhaseInput<'a> {
    /// Flattened geometry.
    pub geometry: &'a GeometrySet,
    /// Contact mask between families.
    pub families: &'a FamilyTable,
    /// Owner positions.
    pub position: &'a [DVec3],
    /// Owner orientations.
    pub orientation: &'a [DQuat],
    /// Owner families.
    pub owner_family: &'a [u8],
    /// Expansion margin of each owner.
    pub owner_margin: &'a [f64],
    /// Bin layout of this cycle.
    pub grid: &'a BinGrid,
    /// Most geometries a single bin may hold.
    pub max_geometries_per_bin: usize,
}

/// Bin statistics of one detection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BroadPhaseStats {
    /// Number of (bin, geometry) registrations.
    pub bin_geometry_pairs: usize,
    /// Most geometries found in a single bin.
    pub max_occupancy: usize,
    /// Bins holding at least one geometry.
    pub occupied_bins: u64,
    /// Number of pairs reported.
    pub contacts: usize,
    /// Twice the number of pairs divided by the number of spheres.
    pub avg_contacts_per_sphere: f64,
}

/// Finds potential contacts between inflated geometries.
///
/// Owns the kinematic worker's scratch arena; every intermediate array of a pass lives there.
pub struct BroadPhase {
    arena: ScratchArena<15>,
    analytical_world: Vec<AnalyticalShape>,
}

impl Default for BroadPhase {
    fn default() -> Self {
        Self::new()
    }
}

#[inline(always)]
fn home_point(point: DVec3, min_a: DVec3, max_a: DVec3, min_b: DVec3, max_b: DVec3) -> DVec3 {
    point.max(min_a.max(min_b)).min(max_a.min(max_b))
}

/// Entities below which a registration range is filled on the current thread.
const REGISTRATION_GRAIN: usize = 256;

/// Writes the (bin, entity) registrations of a contiguous entity range.
///
/// # Arguments
///
/// * `offsets` - Absolute slot of each entity's first registration.
/// * `first_entity` - Id of the first entity of the range.
/// * `keys` - Registration slots of the range, starting at `offsets[0]`.
/// * `entities` - Entity slots matching `keys`.
fn register_touched(
    grid: &BinGrid,
    entity_min: &[DVec3],
    entity_max: &[DVec3],
    offsets: &[usize],
    first_entity: usize,
    keys: &mut [u32],
    entities: &mut [u32],
) {
    let count = entity_min.len();
    if count <= REGISTRATION_GRAIN {
        let base = offsets.first().copied().unwrap_or(0);
        for local in 0..count {
            let mut slot = offsets[local] - base;
            let entity = (first_entity + local) as u32;
            grid.for_each_touched(entity_min[local], entity_max[local], |bin| {
                keys[slot] = bin;
                entities[slot] = entity;
                slot += 1;
            });
        }
        return;
    }
    let mid = count / 2;
    let split = offsets[mid] - offsets[0];
    let (min_low, min_high) = entity_min.split_at(mid);
    let (max_low, max_high) = entity_max.split_at(mid);
    let (offsets_low, offsets_high) = offsets.split_at(mid);
    let (keys_low, keys_high) = keys.split_at_mut(split);
    let (entities_low, entities_high) = entities.split_at_mut(split);
    rayon::join(
        || {
            register_touched(
                grid,
                min_low,
                max_low,
                offsets_low,
                first_entity,
                keys_low,
                entities_low,
            )
        },
        || {
            register_touched(
                grid,
                min_high,
                max_high,
                offsets_high,
                first_entity + mid,
                keys_high,
                entities_high,
            )
        },
    );
}

impl BroadPhase {
    /// Creates a broad phase with empty scratch memory.
    pub fn new() -> Self {
        Self {
            arena: ScratchArena::new(BUFFER_NAMES),
            analytical_world: Vec::new(),
        }
    }

    /// Gets the scratch arena, mostly for its statistics.
    #[inline]
    pub fn arena(&self) -> &ScratchArena<15> {
        &self.arena
    }

    /// Runs one detection pass.
    ///
    /// # Arguments
    ///
    /// * `input` - Owner state and bin layout of the cycle.
    /// * `pairs` - Receives the potential contacts. Cleared first; its capacity is kept.
    ///
    /// # Returns
    ///
    /// * Bin statistics, or [`DemError::BinOccupancyExceeded`] if a bin holds more
    ///   geometries than allowed.
    pub fn detect(
        &mut self,
        input: &BroadPhaseInput<'_>,
        pairs: &mut Vec<ContactPair>,
    ) -> DemResult<BroadPhaseStats> {
        let geometry = input.geometry;
        let grid = input.grid;
        let sphere_count = geometry.spheres.len();
        let triangle_count = geometry.triangles.len();
        let entity_count = sphere_count + triangle_count;
        pairs.clear();
        pairs.reserve(self.arena.scalars.num_prev_contacts);

        let [centers, radii, triangle_vertices, triangle_margins, entity_min, entity_max, touch_counts, touch_offsets, bin_keys, bin_entities, bin_keys_scratch, bin_entities_scratch, bin_ids, bin_counts, bin_starts] =
            self.arena.buffers_mut();

        let centers = centers.acquire::<DVec3>(sphere_count)?;
        let radii = radii.acquire::<f64>(sphere_count)?;
        centers
            .par_iter_mut()
            .zip(radii.par_iter_mut())
            .zip(geometry.spheres.par_iter())
            .for_each(|((center, radius), sphere)| {
                let owner = sphere.owner as usize;
                *center = GeometrySet::sphere_center(
                    sphere,
                    input.position[owner],
                    input.orientation[owner],
                );
                *radius = sphere.radius + input.owner_margin[owner];
            });
        let triangle_vertices = triangle_vertices.acquire::<[DVec3; 3]>(triangle_count)?;
        let triangle_margins = triangle_margins.acquire::<f64>(triangle_count)?;
        triangle_vertices
            .par_iter_mut()
            .zip(triangle_margins.par_iter_mut())
            .zip(geometry.triangles.par_iter())
            .for_each(|((vertices, margin), triangle)| {
                let owner = triangle.owner as usize;
                *vertices = GeometrySet::triangle_vertices(
                    triangle,
                    input.position[owner],
                    input.orientation[owner],
                );
                *margin = input.owner_margin[owner];
            });
        let centers: &[DVec3] = centers;
        let radii: &[f64] = radii;
        let triangle_vertices: &[[DVec3; 3]] = triangle_vertices;
        let triangle_margins: &[f64] = triangle_margins;

        // Inflated bounding boxes, spheres first then triangles.
        let entity_min = entity_min.acquire::<DVec3>(entity_count)?;
        let entity_max = entity_max.acquire::<DVec3>(entity_count)?;
        let touch_counts = touch_counts.acquire::<usize>(entity_count)?;
        entity_min
            .par_iter_mut()
            .zip(entity_max.par_iter_mut())
            .zip(touch_counts.par_iter_mut())
            .enumerate()
            .for_each(|(entity, ((min, max), count))| {
                let (low, high) = if entity < sphere_count {
                    let extent = DVec3::splat(radii[entity]);
                    (centers[entity] - extent, centers[entity] + extent)
                } else {
                    let triangle = entity - sphere_count;
                    let [a, b, c] = triangle_vertices[triangle];
                    let extent = DVec3::splat(triangle_margins[triangle]);
                    (a.min(b).min(c) - extent, a.max(b).max(c) + extent)
                };
                *min = low;
                *max = high;
                *count = grid.touched_count(low, high) as usize;
            });
        let entity_min: &[DVec3] = entity_min;
        let entity_max: &[DVec3] = entity_max;

        let touch_offsets = touch_offsets.acquire::<usize>(entity_count)?;
        let registrations = exclusive_scan(touch_counts, touch_offsets);

        let bin_keys = bin_keys.acquire::<u32>(registrations)?;
        let bin_entities = bin_entities.acquire::<u32>(registrations)?;
        register_touched(
            grid,
            entity_min,
            entity_max,
            touch_offsets,
            0,
            bin_keys,
            bin_entities,
        );
        // Registrations were written in entity order, so the stable sort keeps every bin's
        // members in increasing entity order.
        sort_pairs_by_key(
            bin_keys,
            bin_entities,
            bin_keys_scratch.acquire::<u32>(registrations)?,
            bin_entities_scratch.acquire::<u32>(registrations)?,
        );

        let bin_ids = bin_ids.acquire::<u32>(registrations)?;
        let bin_counts = bin_counts.acquire::<u32>(registrations)?;
        let runs = run_length_encode(bin_keys, bin_ids, bin_counts);
        let bin_starts = bin_starts.acquire::<u32>(runs)?;
        exclusive_scan(&bin_counts[..runs], bin_starts);
        let bin_ids: &[u32] = &bin_ids[..runs];
        let bin_counts: &[u32] = &bin_counts[..runs];
        let bin_starts: &[u32] = bin_starts;
        let bin_entities: &[u32] = bin_entities;

        let limit = input.max_geometries_per_bin;
        if let Some(run) = bin_counts
            .par_iter()
            .position_first(|&count| count as usize > limit)
        {
            return Err(DemError::BinOccupancyExceeded {
                bin: bin_ids[run],
                count: bin_counts[run] as usize,
                limit,
            });
        }
        let max_occupancy = bin_counts.par_iter().copied().max().unwrap_or(0) as usize;

        let test_pair = |entity_a: u32, entity_b: u32, bin: u32| -> Option<ContactPair> {
            let (a, b) = (entity_a as usize, entity_b as usize);
            // Members are sorted, so a triangle in A means both are triangles.
            if a >= sphere_count {
                return None;
            }
            let sphere = &geometry.spheres[a];
            let owner_a = sphere.owner;
            let (contact_type, owner_b, geometry_b, contact) = if b < sphere_count {
                let other = &geometry.spheres[b];
                (
                    ContactType::SphereSphere,
                    other.owner,
                    entity_b,
                    sphere_sphere(centers[a], radii[a], centers[b], radii[b]),
                )
            } else {
                let triangle = b - sphere_count;
                (
                    ContactType::SphereTriangle,
                    geometry.triangles[triangle].owner,
                    triangle as u32,
                    sphere_triangle(
                        centers[a],
                        radii[a] + triangle_margins[triangle],
                        triangle_vertices[triangle],
                    ),
                )
            };
            if owner_a == owner_b
                || !input.families.contact_enabled(
                    input.owner_family[owner_a as usize],
                    input.owner_family[owner_b as usize],
                )
                || contact.depth < 0.0
            {
                return None;
            }
            let home = home_point(
                contact.point,
                entity_min[a],
                entity_max[a],
                entity_min[b],
                entity_max[b],
            );
            if grid.bin_of(home) != bin {
                return None;
            }
            Some(ContactPair {
                contact_type,
                owner_a,
                owner_b,
                geometry_a: entity_a,
                geometry_b,
            })
        };

        pairs.par_extend((0..runs).into_par_iter().flat_map_iter(|run| {
            let start = bin_starts[run] as usize;
            let members = &bin_entities[start..start + bin_counts[run] as usize];
            let bin = bin_ids[run];
            let mut found = Vec::new();
            for (i, &entity_a) in members.iter().enumerate() {
                for &entity_b in &members[i + 1..] {
                    if let Some(pair) = test_pair(entity_a, entity_b, bin) {
                        found.push(pair);
                    }
                }
            }
            found
        }));

        if !geometry.analytical.is_empty() {
            self.analytical_world.clear();
            self.analytical_world
                .extend(geometry.analytical.iter().map(|component| {
                    let owner = component.owner as usize;
                    component
                        .shape
                        .to_world(input.position[owner], input.orientation[owner])
                }));
            let analytical_world = &self.analytical_world;
            pairs.par_extend((0..sphere_count).into_par_iter().flat_map_iter(|s| {
                let sphere = &geometry.spheres[s];
                geometry
                    .analytical
                    .iter()
                    .zip(analytical_world)
                    .enumerate()
                    .filter_map(move |(index, (component, shape))| {
                        if component.owner == sphere.owner
                            || !input.families.contact_enabled(
                                input.owner_family[sphere.owner as usize],
                                input.owner_family[component.owner as usize],
                            )
                        {
                            return None;
                        }
                        let radius = radii[s] + input.owner_margin[component.owner as usize];
                        let contact = match *shape {
                            AnalyticalShape::Plane { point, normal } => {
                                sphere_plane(centers[s], radius, point, normal)
                            }
                            AnalyticalShape::Cylinder {
                                center,
                                axis,
                                radius: cylinder_radius,
                                inward,
                            } => sphere_cylinder(
                                centers[s],
                                radius,
                                center,
                                axis,
                                cylinder_radius,
                                inward,
                            ),
                        };
                        (contact.depth >= 0.0).then_some(ContactPair {
                            contact_type: shape.contact_type(),
                            owner_a: sphere.owner,
                            owner_b: component.owner,
                            geometry_a: s as u32,
                            geometry_b: index as u32,
                        })
                    })
            }));
        }

        let contacts = pairs.len();
        let scalars = &mut self.arena.scalars;
        scalars.num_contacts = contacts;
        scalars.num_prev_contacts = contacts;
        Ok(BroadPhaseStats {
            bin_geometry_pairs: registrations,
            max_occupancy,
            occupied_bins: runs as u64,
            contacts,
            avg_contacts_per_sphere: if sphere_count > 0 {
                2.0 * contacts as f64 / sphere_count as f64
            } else {
                0.0
            },
        })
    }
}
