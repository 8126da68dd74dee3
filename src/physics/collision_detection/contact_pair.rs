/// Geometric kind of a contact. The first geometry of a contact is always a sphere.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContactType {
    /// Sphere against sphere. Geometry A has the smaller sphere id.
    SphereSphere = 0,
    /// Sphere against mesh triangle.
    SphereTriangle = 1,
    /// Sphere against analytical plane.
    SpherePlane = 2,
    /// Sphere against analytical cylinder.
    SphereCylinder = 3,
}

const GEOMETRY_BITS: u32 = 31;
const GEOMETRY_MASK: u64 = (1 << GEOMETRY_BITS) - 1;

/// A potential contact produced by contact detection.
///
/// `geometry_a` is a sphere id; `geometry_b` is a sphere, triangle or analytical id depending
/// on the contact type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContactPair {
    /// Kind of the pair.
    pub contact_type: ContactType,
    /// Owner of geometry A.
    pub owner_a: u32,
    /// Owner of geometry B.
    pub owner_b: u32,
    /// Sphere id of geometry A.
    pub geometry_a: u32,
    /// Id of geometry B in the id space of its kind.
    pub geometry_b: u32,
}

impl ContactPair {
    /// Identity of the pair across contact lists. Two pairs with the same key describe the
    /// same two geometries.
    #[inline(always)]
    pub fn history_key(&self) -> u64 {
        debug_assert!(
            (self.geometry_a as u64) <= GEOMETRY_MASK && (self.geometry_b as u64) <= GEOMETRY_MASK,
            "Geometry ids must fit in 31 bits."
        );
        ((self.contact_type as u64) << (2 * GEOMETRY_BITS))
            | ((self.geometry_a as u64) << GEOMETRY_BITS)
            | self.geometry_b as u64
    }
}

/// Output of one contact detection cycle.
#[derive(Debug, Clone, Default)]
pub struct ContactProduct {
    /// 1-based number of the detection cycle that produced the list.
    pub cycle: u64,
    /// Dynamic step whose owner state the list was computed from.
    pub stamp: u64,
    /// Number of dynamic steps, counted from `stamp`, the list may serve.
    pub drift_allowance: u32,
    /// Bin edge length used by the cycle.
    pub bin_size: f64,
    /// Scene revision the list refers to.
    pub scene_epoch: u64,
    /// Potential contacts.
    pub pairs: Vec<ContactPair>,
}
