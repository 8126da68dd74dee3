//! Family table: per-family prescribed motion, extra contact margin and the contact mask
//! between family pairs.

use glam::DVec3;

use crate::error::{DemError, DemResult};

/// Largest family number an owner can carry.
pub const MAX_FAMILY: u32 = u8::MAX as u32;

const FAMILY_COUNT: usize = MAX_FAMILY as usize + 1;

/// Checks `family` fits in the family id range.
#[inline]
pub fn family_id(family: u32) -> DemResult<u8> {
    u8::try_from(family).map_err(|_| DemError::FamilyOutOfRange {
        family,
        max: MAX_FAMILY,
    })
}

/// Motion prescribed on every owner of a family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FamilyPrescription {
    /// Owners never move and ignore every force.
    pub fixed: bool,
    /// Per-axis linear velocity override.
    pub lin_vel: [Option<f64>; 3],
    /// Per-axis angular velocity override.
    pub ang_vel: [Option<f64>; 3],
    /// Whether prescribed axes ignore contact forces. Otherwise forces act on top of the
    /// prescribed velocity during the step.
    pub dictate: bool,
    /// Acceleration added to gravity and contact accelerations.
    pub added_acc: DVec3,
    /// Angular acceleration added to the contact angular acceleration.
    pub added_ang_acc: DVec3,
}

impl Default for FamilyPrescription {
    fn default() -> Self {
        Self {
            fixed: false,
            lin_vel: [None; 3],
            ang_vel: [None; 3],
            dictate: true,
            added_acc: DVec3::ZERO,
            added_ang_acc: DVec3::ZERO,
        }
    }
}

impl FamilyPrescription {
    /// Whether the family moves exactly as the solver would integrate it.
    #[inline]
    pub fn is_free(&self) -> bool {
        *self == Self::default()
    }
}

/// Family-indexed settings shared by both workers.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyTable {
    /// One bit per family pair; a set bit disables contact between the two families.
    contact_disabled: Vec<[u64; 4]>,
    prescriptions: Vec<FamilyPrescription>,
    extra_margin: Vec<f64>,
}

impl Default for FamilyTable {
    fn default() -> Self {
        Self {
            contact_disabled: vec![[0; 4]; FAMILY_COUNT],
            prescriptions: vec![FamilyPrescription::default(); FAMILY_COUNT],
            extra_margin: vec![0.0; FAMILY_COUNT],
        }
    }
}

impl FamilyTable {
    /// Whether owners of families `a` and `b` may touch.
    #[inline(always)]
    pub fn contact_enabled(&self, a: u8, b: u8) -> bool {
        self.contact_disabled[a as usize][(b >> 6) as usize] & (1u64 << (b & 63)) == 0
    }

    fn set_contact_bit(&mut self, a: u8, b: u8, disabled: bool) {
        for (x, y) in [(a, b), (b, a)] {
            let word = &mut self.contact_disabled[x as usize][(y >> 6) as usize];
            if disabled {
                *word |= 1u64 << (y & 63);
            } else {
                *word &= !(1u64 << (y & 63));
            }
        }
    }

    /// Disables contact between two families. A family may be masked against itself.
    pub fn disable_contact(&mut self, a: u32, b: u32) -> DemResult<()> {
        let (a, b) = (family_id(a)?, family_id(b)?);
        self.set_contact_bit(a, b, true);
        Ok(())
    }

    /// Re-enables contact between two families.
    pub fn enable_contact(&mut self, a: u32, b: u32) -> DemResult<()> {
        let (a, b) = (family_id(a)?, family_id(b)?);
        self.set_contact_bit(a, b, false);
        Ok(())
    }

    /// Gets the prescription of a family.
    #[inline]
    pub fn prescription(&self, family: u8) -> &FamilyPrescription {
        &self.prescriptions[family as usize]
    }

    /// Gets a mutable prescription of a family.
    pub fn prescription_mut(&mut self, family: u32) -> DemResult<&mut FamilyPrescription> {
        Ok(&mut self.prescriptions[family_id(family)? as usize])
    }

    /// Marks every owner of the family as fixed in place.
    pub fn set_fixed(&mut self, family: u32) -> DemResult<()> {
        let prescription = self.prescription_mut(family)?;
        prescription.fixed = true;
        Ok(())
    }

    /// Prescribes the linear velocity along the given axes.
    pub fn set_prescribed_lin_vel(
        &mut self,
        family: u32,
        lin_vel: [Option<f64>; 3],
        dictate: bool,
    ) -> DemResult<()> {
        let prescription = self.prescription_mut(family)?;
        prescription.lin_vel = lin_vel;
        prescription.dictate = dictate;
        Ok(())
    }

    /// Prescribes the angular velocity along the given axes.
    pub fn set_prescribed_ang_vel(
        &mut self,
        family: u32,
        ang_vel: [Option<f64>; 3],
        dictate: bool,
    ) -> DemResult<()> {
        let prescription = self.prescription_mut(family)?;
        prescription.ang_vel = ang_vel;
        prescription.dictate = dictate;
        Ok(())
    }

    /// Adds an acceleration to every owner of the family.
    pub fn add_prescribed_acc(&mut self, family: u32, acc: DVec3) -> DemResult<()> {
        self.prescription_mut(family)?.added_acc += acc;
        Ok(())
    }

    /// Adds an angular acceleration to every owner of the family.
    pub fn add_prescribed_ang_acc(&mut self, family: u32, ang_acc: DVec3) -> DemResult<()> {
        self.prescription_mut(family)?.added_ang_acc += ang_acc;
        Ok(())
    }

    /// Removes every prescription of the family.
    pub fn clear_prescription(&mut self, family: u32) -> DemResult<()> {
        *self.prescription_mut(family)? = FamilyPrescription::default();
        Ok(())
    }

    /// Gets the extra detection margin of a family.
    #[inline(always)]
    pub fn extra_margin(&self, family: u8) -> f64 {
        self.extra_margin[family as usize]
    }

    /// Sets an extra detection margin for every owner of the family.
    pub fn set_extra_margin(&mut self, family: u32, margin: f64) -> DemResult<()> {
        if !(margin >= 0.0 && margin.is_finite()) {
            return Err(DemError::InvalidSettings(
                "family extra margin must be non-negative".to_owned(),
            ));
        }
        self.extra_margin[family_id(family)? as usize] = margin;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_mask_is_symmetric() {
        let mut table = FamilyTable::default();
        assert!(table.contact_enabled(1, 200));
        table.disable_contact(1, 200).unwrap();
        assert!(!table.contact_enabled(1, 200));
        assert!(!table.contact_enabled(200, 1));
        assert!(table.contact_enabled(1, 1));
        table.enable_contact(200, 1).unwrap();
        assert!(table.contact_enabled(1, 200));
    }

    #[test]
    fn test_family_range() {
        let mut table = FamilyTable::default();
        assert!(table.set_fixed(255).is_ok());
        assert_eq!(
            table.set_fixed(256),
            Err(DemError::FamilyOutOfRange {
                family: 256,
                max: 255
            })
        );
        assert!(table.disable_contact(0, 1000).is_err());
    }

    #[test]
    fn test_prescriptions() {
        let mut table = FamilyTable::default();
        assert!(table.prescription(3).is_free());
        table
            .set_prescribed_lin_vel(3, [None, None, Some(-0.5)], true)
            .unwrap();
        table.add_prescribed_acc(3, DVec3::X).unwrap();
        let prescription = table.prescription(3);
        assert_eq!(prescription.lin_vel[2], Some(-0.5));
        assert_eq!(prescription.added_acc, DVec3::X);
        assert!(!prescription.is_free());
        table.clear_prescription(3).unwrap();
        assert!(table.prescription(3).is_free());
    }
}
