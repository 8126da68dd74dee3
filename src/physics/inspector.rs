use glam::DVec3;
use rayon::prelude::*;

use crate::physics::owners::{OwnerKind, OwnerSet};

/// Reduced quantities that can be measured over the clump owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inspection {
    /// Highest owner z coordinate.
    MaxZ,
    /// Lowest owner z coordinate.
    MinZ,
    /// Sum of owner masses.
    TotalMass,
    /// Highest owner speed.
    MaxAbsVelocity,
    /// Sum of translational and rotational kinetic energy.
    KineticEnergy,
}

/// Read-only view of one owner, handed to inspection filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwnerView {
    /// Owner id.
    pub id: usize,
    /// Position.
    pub position: DVec3,
    /// Linear velocity.
    pub lin_vel: DVec3,
    /// Mass.
    pub mass: f64,
    /// Family.
    pub family: u8,
}

impl Inspection {
    #[inline]
    fn identity(self) -> f64 {
        match self {
            Inspection::MaxZ | Inspection::MaxAbsVelocity => f64::NEG_INFINITY,
            Inspection::MinZ => f64::INFINITY,
            Inspection::TotalMass | Inspection::KineticEnergy => 0.0,
        }
    }

    #[inline]
    fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Inspection::MaxZ | Inspection::MaxAbsVelocity => a.max(b),
            Inspection::MinZ => a.min(b),
            Inspection::TotalMass | Inspection::KineticEnergy => a + b,
        }
    }

    #[inline]
    fn measure(self, owners: &OwnerSet, owner: usize) -> f64 {
        match self {
            Inspection::MaxZ | Inspection::MinZ => owners.position[owner].z,
            Inspection::TotalMass => owners.mass[owner],
            Inspection::MaxAbsVelocity => owners.lin_vel[owner].length(),
            Inspection::KineticEnergy => owners.kinetic_energy(owner),
        }
    }

    /// Evaluates the quantity over every clump owner accepted by `filter`.
    ///
    /// # Returns
    ///
    /// * The reduced value. With no owner selected, sums are zero, and extrema are the
    ///   infinity of the opposite sign.
    pub fn evaluate(self, owners: &OwnerSet, filter: impl Fn(&OwnerView) -> bool + Sync) -> f64 {
        (0..owners.len())
            .into_par_iter()
            .filter(|&owner| owners.kind[owner] == OwnerKind::Clump)
            .filter(|&owner| {
                filter(&OwnerView {
                    id: owner,
                    position: owners.position[owner],
                    lin_vel: owners.lin_vel[owner],
                    mass: owners.mass[owner],
                    family: owners.family[owner],
                })
            })
            .map(|owner| self.measure(owners, owner))
            .reduce(|| self.identity(), |a, b| self.combine(a, b))
    }
}
