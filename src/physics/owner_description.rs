use glam::{DQuat, DVec3};

use crate::error::{DemError, DemResult};
use crate::physics::families::MAX_FAMILY;
use crate::physics::geometry::AnalyticalShape;

/// A sphere of a clump template, relative to the clump's origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClumpSphere {
    /// Center in the owner's local frame.
    pub offset: DVec3,
    /// Sphere radius.
    pub radius: f64,
    /// Material index.
    pub material: u32,
}

/// Geometry carried by an owner.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerShape {
    /// A rigid clump of one or more spheres.
    Clump(Vec<ClumpSphere>),
    /// A triangle mesh with a single material.
    Mesh {
        /// Triangles in the owner's local frame.
        triangles: Vec<[DVec3; 3]>,
        /// Material index of every facet.
        material: u32,
    },
    /// One or more analytical boundaries with a single material.
    Analytical {
        /// Shapes in the owner's local frame.
        shapes: Vec<AnalyticalShape>,
        /// Material index of every shape.
        material: u32,
    },
}

/// Describes an owner's initial state and geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerDescription {
    /// Position of the owner's origin.
    pub position: DVec3,
    /// Orientation of the owner.
    pub orientation: DQuat,
    /// Linear velocity.
    pub lin_vel: DVec3,
    /// Angular velocity in the world frame.
    pub ang_vel: DVec3,
    /// Mass.
    pub mass: f64,
    /// Principal moments of inertia in the owner's local frame.
    pub moi: DVec3,
    /// Family number. Must not exceed [`MAX_FAMILY`].
    pub family: u32,
    /// Geometry.
    pub shape: OwnerShape,
}

impl OwnerDescription {
    /// Creates a single-sphere clump with the moment of inertia of a solid ball.
    pub fn sphere(position: DVec3, radius: f64, mass: f64, material: u32) -> Self {
        let moment = 0.4 * mass * radius * radius;
        Self {
            position,
            orientation: DQuat::IDENTITY,
            lin_vel: DVec3::ZERO,
            ang_vel: DVec3::ZERO,
            mass,
            moi: DVec3::splat(moment),
            family: 0,
            shape: OwnerShape::Clump(vec![ClumpSphere {
                offset: DVec3::ZERO,
                radius,
                material,
            }]),
        }
    }

    /// Creates a clump from its component spheres.
    pub fn clump(position: DVec3, spheres: Vec<ClumpSphere>, mass: f64, moi: DVec3) -> Self {
        Self {
            position,
            orientation: DQuat::IDENTITY,
            lin_vel: DVec3::ZERO,
            ang_vel: DVec3::ZERO,
            mass,
            moi,
            family: 0,
            shape: OwnerShape::Clump(spheres),
        }
    }

    /// Creates a mesh owner. Meshes are usually placed in a fixed or prescribed family.
    pub fn mesh(position: DVec3, triangles: Vec<[DVec3; 3]>, material: u32) -> Self {
        Self {
            position,
            orientation: DQuat::IDENTITY,
            lin_vel: DVec3::ZERO,
            ang_vel: DVec3::ZERO,
            mass: 1.0,
            moi: DVec3::ONE,
            family: 0,
            shape: OwnerShape::Mesh {
                triangles,
                material,
            },
        }
    }

    /// Creates an analytical boundary owner at the origin.
    pub fn analytical(shapes: Vec<AnalyticalShape>, material: u32) -> Self {
        Self {
            position: DVec3::ZERO,
            orientation: DQuat::IDENTITY,
            lin_vel: DVec3::ZERO,
            ang_vel: DVec3::ZERO,
            mass: 1.0,
            moi: DVec3::ONE,
            family: 0,
            shape: OwnerShape::Analytical { shapes, material },
        }
    }

    /// Sets the family number.
    #[must_use]
    pub fn with_family(mut self, family: u32) -> Self {
        self.family = family;
        self
    }

    /// Sets the linear velocity.
    #[must_use]
    pub fn with_velocity(mut self, lin_vel: DVec3) -> Self {
        self.lin_vel = lin_vel;
        self
    }

    /// Sets the angular velocity.
    #[must_use]
    pub fn with_angular_velocity(mut self, ang_vel: DVec3) -> Self {
        self.ang_vel = ang_vel;
        self
    }

    /// Sets the orientation.
    #[must_use]
    pub fn with_orientation(mut self, orientation: DQuat) -> Self {
        self.orientation = orientation;
        self
    }

    /// Sets the mass properties.
    #[must_use]
    pub fn with_mass(mut self, mass: f64, moi: DVec3) -> Self {
        self.mass = mass;
        self.moi = moi;
        self
    }

    /// Checks the description can be added to a scene with `material_count` materials.
    pub fn validate(&self, material_count: usize) -> DemResult<()> {
        if self.family > MAX_FAMILY {
            return Err(DemError::FamilyOutOfRange {
                family: self.family,
                max: MAX_FAMILY,
            });
        }
        if !(self.mass > 0.0 && self.mass.is_finite()) || !(self.moi.min_element() > 0.0) {
            return Err(DemError::InvalidSettings(
                "owner mass and moments of inertia must be positive".to_owned(),
            ));
        }
        if !self.position.is_finite() || !self.lin_vel.is_finite() || !self.ang_vel.is_finite() {
            return Err(DemError::InvalidSettings(
                "owner state must be finite".to_owned(),
            ));
        }
        let check_material = |material: u32| {
            if material as usize >= material_count {
                Err(DemError::InvalidSettings(format!(
                    "material {material} is not loaded ({material_count} materials)"
                )))
            } else {
                Ok(())
            }
        };
        match &self.shape {
            OwnerShape::Clump(spheres) => {
                if spheres.is_empty() {
                    return Err(DemError::InvalidSettings(
                        "a clump needs at least one sphere".to_owned(),
                    ));
                }
                for sphere in spheres {
                    if !(sphere.radius > 0.0) {
                        return Err(DemError::InvalidSettings(
                            "sphere radii must be positive".to_owned(),
                        ));
                    }
                    check_material(sphere.material)?;
                }
            }
            OwnerShape::Mesh { material, .. } | OwnerShape::Analytical { material, .. } => {
                check_material(*material)?
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_inertia() {
        let description = OwnerDescription::sphere(DVec3::ZERO, 0.5, 2.0, 0);
        assert!((description.moi.x - 0.2).abs() < 1e-12);
        assert!(description.validate(1).is_ok());
    }

    #[test]
    fn test_validation() {
        let description = OwnerDescription::sphere(DVec3::ZERO, 0.5, 2.0, 3);
        assert!(matches!(
            description.validate(1),
            Err(DemError::InvalidSettings(_))
        ));

        let description = OwnerDescription::sphere(DVec3::ZERO, 0.5, 2.0, 0).with_family(256);
        assert_eq!(
            description.validate(1),
            Err(DemError::FamilyOutOfRange {
                family: 256,
                max: 255
            })
        );

        let description = OwnerDescription::sphere(DVec3::ZERO, 0.5, 0.0, 0);
        assert!(description.validate(1).is_err());
    }
}
