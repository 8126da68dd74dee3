use glam::{DQuat, DVec3};

use crate::physics::families::FamilyTable;
use crate::physics::geometry::GeometrySet;

/// Static description of what is simulated: geometry and family rules.
///
/// Shared read-only by both workers through an `Arc`. Every change goes through the dynamic
/// worker while both workers are at rendezvous, and bumps the epoch so contact lists computed
/// against an older scene are recognized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    /// Flattened geometry.
    pub geometry: GeometrySet,
    /// Family rules.
    pub families: FamilyTable,
    /// Revision counter.
    pub epoch: u64,
}

impl Scene {
    /// Creates a scene at epoch zero.
    pub fn new(geometry: GeometrySet, families: FamilyTable) -> Self {
        Self {
            geometry,
            families,
            epoch: 0,
        }
    }
}

/// Owner state handed to the kinematic worker with an order.
#[derive(Debug, Clone)]
pub struct OwnerSnapshot {
    /// Dynamic step the state belongs to.
    pub stamp: u64,
    /// Scene the state refers to.
    pub scene: std::sync::Arc<Scene>,
    /// Owner positions.
    pub position: Vec<DVec3>,
    /// Owner orientations.
    pub orientation: Vec<DQuat>,
    /// Owner linear velocities.
    pub lin_vel: Vec<DVec3>,
    /// Owner angular velocities.
    pub ang_vel: Vec<DVec3>,
    /// Owner families.
    pub family: Vec<u8>,
}

impl OwnerSnapshot {
    /// Gets the number of owners in the snapshot.
    #[inline]
    pub fn len(&self) -> usize {
        self.position.len()
    }

    /// Whether the snapshot holds no owner.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }
}
