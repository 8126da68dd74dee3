//! Storage of per-owner state.
//!
//! An owner is the rigid entity that carries mass and kinematics: a clump, a mesh or an
//! analytical boundary. State is laid out as parallel arrays indexed by owner id so the
//! dynamic worker can integrate every owner with one pass per array.

use glam::{DQuat, DVec3};

use crate::error::{DemError, DemResult};
use crate::physics::owner_description::{OwnerDescription, OwnerShape};

/// Kind of geometry an owner carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    /// Rigid clump of spheres.
    Clump,
    /// Triangle mesh.
    Mesh,
    /// Analytical boundary.
    Analytical,
}

impl From<&OwnerShape> for OwnerKind {
    fn from(shape: &OwnerShape) -> Self {
        match shape {
            OwnerShape::Clump(_) => OwnerKind::Clump,
            OwnerShape::Mesh { .. } => OwnerKind::Mesh,
            OwnerShape::Analytical { .. } => OwnerKind::Analytical,
        }
    }
}

/// Per-owner state, structure of arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerSet {
    /// Geometry kind of each owner.
    pub kind: Vec<OwnerKind>,
    /// Position of each owner's origin.
    pub position: Vec<DVec3>,
    /// Orientation of each owner.
    pub orientation: Vec<DQuat>,
    /// Linear velocity of each owner.
    pub lin_vel: Vec<DVec3>,
    /// World-frame angular velocity of each owner.
    pub ang_vel: Vec<DVec3>,
    /// Mass of each owner.
    pub mass: Vec<f64>,
    /// Principal moments of inertia of each owner.
    pub moi: Vec<DVec3>,
    /// Family of each owner.
    pub family: Vec<u8>,
}

impl OwnerSet {
    /// Gets the number of owners.
    #[inline]
    pub fn len(&self) -> usize {
        self.position.len()
    }

    /// Whether the set has no owners.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Appends an owner and returns its id. The description must already be validated.
    pub fn push(&mut self, description: &OwnerDescription) -> u32 {
        debug_assert!(description.family <= u8::MAX as u32, "Family must be validated first.");
        let id = self.len() as u32;
        self.kind.push(OwnerKind::from(&description.shape));
        self.position.push(description.position);
        self.orientation.push(description.orientation.normalize());
        self.lin_vel.push(description.lin_vel);
        self.ang_vel.push(description.ang_vel);
        self.mass.push(description.mass);
        self.moi.push(description.moi);
        self.family.push(description.family as u8);
        id
    }

    /// Fails with [`DemError::UnknownOwner`] unless `owner` names a live owner.
    #[inline]
    pub fn check(&self, owner: usize) -> DemResult<()> {
        if owner < self.len() {
            Ok(())
        } else {
            Err(DemError::UnknownOwner(owner))
        }
    }

    /// Removes the flagged owners, keeping the rest in order.
    ///
    /// # Returns
    ///
    /// * New id of each old owner, or `None` when removed.
    pub fn remove(&mut self, removed: &[bool]) -> Vec<Option<u32>> {
        debug_assert!(removed.len() == self.len());
        fn retain<T>(items: &mut Vec<T>, removed: &[bool]) {
            let mut index = 0;
            items.retain(|_| {
                let keep = !removed[index];
                index += 1;
                keep
            });
        }
        retain(&mut self.kind, removed);
        retain(&mut self.position, removed);
        retain(&mut self.orientation, removed);
        retain(&mut self.lin_vel, removed);
        retain(&mut self.ang_vel, removed);
        retain(&mut self.mass, removed);
        retain(&mut self.moi, removed);
        retain(&mut self.family, removed);

        let mut next = 0u32;
        removed
            .iter()
            .map(|&gone| {
                if gone {
                    None
                } else {
                    next += 1;
                    Some(next - 1)
                }
            })
            .collect()
    }

    /// Computes the kinetic energy of one owner.
    #[inline]
    pub fn kinetic_energy(&self, owner: usize) -> f64 {
        let local_ang_vel = self.orientation[owner].inverse() * self.ang_vel[owner];
        0.5 * self.mass[owner] * self.lin_vel[owner].length_squared()
            + 0.5 * (self.moi[owner] * local_ang_vel * local_ang_vel).element_sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_remove() {
        let mut owners = OwnerSet::default();
        for i in 0..4 {
            let description = OwnerDescription::sphere(DVec3::splat(i as f64), 0.1, 1.0, 0)
                .with_family(i);
            assert_eq!(owners.push(&description), i);
        }
        let map = owners.remove(&[false, true, false, true]);
        assert_eq!(map, vec![Some(0), None, Some(1), None]);
        assert_eq!(owners.len(), 2);
        assert_eq!(owners.position[1], DVec3::splat(2.0));
        assert_eq!(owners.family, vec![0, 2]);
        assert!(owners.check(1).is_ok());
        assert_eq!(owners.check(2), Err(DemError::UnknownOwner(2)));
    }

    #[test]
    fn test_kinetic_energy() {
        let mut owners = OwnerSet::default();
        let description = OwnerDescription::sphere(DVec3::ZERO, 1.0, 2.0, 0)
            .with_velocity(DVec3::new(3.0, 0.0, 0.0))
            .with_angular_velocity(DVec3::new(0.0, 0.0, 1.0));
        owners.push(&description);
        // 0.5 * 2 * 9 + 0.5 * 0.8 * 1
        assert!((owners.kinetic_energy(0) - 9.4).abs() < 1e-12);
    }
}
