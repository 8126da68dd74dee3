//! Flattened geometry of every owner.
//!
//! Owners are described once, at authoring time, as clumps of spheres, triangle meshes or
//! analytical boundaries. The solver flattens those into three dense component lists with
//! one id space per kind; every component remembers its owner and stores its shape in the
//! owner's local frame.

use glam::{DQuat, DVec3};

use crate::physics::collision_detection::contact_pair::ContactType;
use crate::physics::owner_description::{OwnerDescription, OwnerShape};

/// A sphere component of a clump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereComponent {
    /// Owning owner id.
    pub owner: u32,
    /// Center of the sphere in the owner's local frame.
    pub local_offset: DVec3,
    /// Sphere radius.
    pub radius: f64,
    /// Material index.
    pub material: u32,
}

/// A triangle facet of a mesh owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleFacet {
    /// Owning owner id.
    pub owner: u32,
    /// Vertices in the owner's local frame.
    pub vertices: [DVec3; 3],
    /// Material index.
    pub material: u32,
}

/// Boundary shapes described by a closed-form equation rather than by geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalyticalShape {
    /// An infinite plane. Spheres on the side the normal points to are outside.
    Plane {
        /// Any point on the plane, in the owner's local frame.
        point: DVec3,
        /// Unit normal, in the owner's local frame.
        normal: DVec3,
    },
    /// An infinite cylinder surface.
    Cylinder {
        /// Any point on the axis, in the owner's local frame.
        center: DVec3,
        /// Unit axis direction, in the owner's local frame.
        axis: DVec3,
        /// Cylinder radius.
        radius: f64,
        /// Whether spheres are kept inside (a container wall) rather than outside.
        inward: bool,
    },
}

impl AnalyticalShape {
    /// Gets the contact type produced by a sphere touching this shape.
    #[inline]
    pub fn contact_type(&self) -> ContactType {
        match self {
            AnalyticalShape::Plane { .. } => ContactType::SpherePlane,
            AnalyticalShape::Cylinder { .. } => ContactType::SphereCylinder,
        }
    }

    /// Transforms the shape from the owner's local frame into the world frame.
    #[inline]
    pub fn to_world(&self, position: DVec3, orientation: DQuat) -> AnalyticalShape {
        match *self {
            AnalyticalShape::Plane { point, normal } => AnalyticalShape::Plane {
                point: position + orientation * point,
                normal: orientation * normal,
            },
            AnalyticalShape::Cylinder {
                center,
                axis,
                radius,
                inward,
            } => AnalyticalShape::Cylinder {
                center: position + orientation * center,
                axis: orientation * axis,
                radius,
                inward,
            },
        }
    }
}

/// An analytical boundary component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticalComponent {
    /// Owning owner id.
    pub owner: u32,
    /// Shape in the owner's local frame.
    pub shape: AnalyticalShape,
    /// Material index.
    pub material: u32,
}

/// Every geometric component in the scene, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometrySet {
    /// Sphere components. Index is the sphere geometry id.
    pub spheres: Vec<SphereComponent>,
    /// Triangle facets. Index is the triangle geometry id.
    pub triangles: Vec<TriangleFacet>,
    /// Analytical components. Index is the analytical geometry id.
    pub analytical: Vec<AnalyticalComponent>,
    /// Distance from each owner's origin to the farthest point of its spheres or triangles.
    /// Zero for purely analytical owners.
    pub owner_bounding_radius: Vec<f64>,
}

impl GeometrySet {
    /// Gets the largest sphere radius in the scene, or zero without spheres.
    pub fn max_sphere_radius(&self) -> f64 {
        self.spheres.iter().map(|s| s.radius).fold(0.0, f64::max)
    }

    /// Gets the total number of binned components, spheres first then triangles.
    #[inline]
    pub fn binned_count(&self) -> usize {
        self.spheres.len() + self.triangles.len()
    }

    /// Computes the world-space center of a sphere component.
    #[inline(always)]
    pub fn sphere_center(sphere: &SphereComponent, position: DVec3, orientation: DQuat) -> DVec3 {
        position + orientation * sphere.local_offset
    }

    /// Computes the world-space vertices of a triangle facet.
    #[inline(always)]
    pub fn triangle_vertices(
        triangle: &TriangleFacet,
        position: DVec3,
        orientation: DQuat,
    ) -> [DVec3; 3] {
        triangle.vertices.map(|v| position + orientation * v)
    }

    /// Flattens the geometry of a new owner into the component lists.
    ///
    /// # Arguments
    ///
    /// * `owner` - Id the owner received in the owner set.
    /// * `description` - Validated owner description.
    pub fn push_owner(&mut self, owner: u32, description: &OwnerDescription) {
        debug_assert!(
            owner as usize == self.owner_bounding_radius.len(),
            "Owners must be flattened in id order."
        );
        let mut bounding_radius: f64 = 0.0;
        match &description.shape {
            OwnerShape::Clump(spheres) => {
                for sphere in spheres {
                    bounding_radius = bounding_radius.max(sphere.offset.length() + sphere.radius);
                    self.spheres.push(SphereComponent {
                        owner,
                        local_offset: sphere.offset,
                        radius: sphere.radius,
                        material: sphere.material,
                    });
                }
            }
            OwnerShape::Mesh {
                triangles,
                material,
            } => {
                for &vertices in triangles {
                    for vertex in vertices {
                        bounding_radius = bounding_radius.max(vertex.length());
                    }
                    self.triangles.push(TriangleFacet {
                        owner,
                        vertices,
                        material: *material,
                    });
                }
            }
            OwnerShape::Analytical { shapes, material } => {
                self.analytical
                    .extend(shapes.iter().map(|&shape| AnalyticalComponent {
                        owner,
                        shape,
                        material: *material,
                    }));
            }
        }
        self.owner_bounding_radius.push(bounding_radius);
    }

    /// Drops every component of the removed owners and renumbers the rest.
    ///
    /// # Arguments
    ///
    /// * `owner_map` - New id of each old owner, or `None` when removed.
    ///
    /// # Returns
    ///
    /// * New id of each old sphere, triangle and analytical component, or `None` when dropped.
    pub fn retain_owners(&mut self, owner_map: &[Option<u32>]) -> [Vec<Option<u32>>; 3] {
        fn retain<T>(
            items: &mut Vec<T>,
            owner_map: &[Option<u32>],
            owner_of: impl Fn(&mut T) -> &mut u32,
        ) -> Vec<Option<u32>> {
            let mut mapping = Vec::with_capacity(items.len());
            let mut next = 0u32;
            let mut kept = Vec::with_capacity(items.len());
            for mut item in items.drain(..) {
                match owner_map[*owner_of(&mut item) as usize] {
                    Some(new_owner) => {
                        *owner_of(&mut item) = new_owner;
                        kept.push(item);
                        mapping.push(Some(next));
                        next += 1;
                    }
                    None => mapping.push(None),
                }
            }
            *items = kept;
            mapping
        }

        let spheres = retain(&mut self.spheres, owner_map, |s| &mut s.owner);
        let triangles = retain(&mut self.triangles, owner_map, |t| &mut t.owner);
        let analytical = retain(&mut self.analytical, owner_map, |a| &mut a.owner);
        let radii = std::mem::take(&mut self.owner_bounding_radius);
        self.owner_bounding_radius = radii
            .into_iter()
            .zip(owner_map)
            .filter_map(|(radius, new)| new.map(|_| radius))
            .collect();
        [spheres, triangles, analytical]
    }
}
