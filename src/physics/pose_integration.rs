use glam::{DQuat, DVec3};
use rayon::prelude::*;

use crate::physics::collision_detection::narrow_phase::Wrench;
use crate::physics::families::{FamilyPrescription, FamilyTable};
use crate::physics::owners::OwnerSet;

/// Provides helper functions for integrating owner poses.
pub struct PoseIntegration;

impl PoseIntegration {
    /// Integrates an orientation by a world-frame angular velocity over dt.
    #[inline(always)]
    pub fn integrate_orientation(orientation: DQuat, angular_velocity: DVec3, dt: f64) -> DQuat {
        // Piecewise constant angular velocity over the step.
        let speed = angular_velocity.length();
        if speed > 1e-15 {
            let half_angle = speed * dt * 0.5;
            let scale = half_angle.sin() / speed;
            let q = DQuat::from_xyzw(
                angular_velocity.x * scale,
                angular_velocity.y * scale,
                angular_velocity.z * scale,
                half_angle.cos(),
            );
            (q * orientation).normalize()
        } else {
            orientation
        }
    }

    /// Converts a world-frame torque into a world-frame angular acceleration for an owner
    /// with principal moments `moi` in its local frame.
    #[inline(always)]
    pub fn angular_acceleration(orientation: DQuat, moi: DVec3, torque: DVec3) -> DVec3 {
        let local_torque = orientation.inverse() * torque;
        orientation * (local_torque / moi)
    }

    #[inline(always)]
    fn apply_axes(
        velocity: &mut DVec3,
        acceleration: DVec3,
        prescribed: &[Option<f64>; 3],
        dictate: bool,
        dt: f64,
    ) {
        for axis in 0..3 {
            velocity[axis] = match prescribed[axis] {
                Some(value) if dictate => value,
                Some(value) => value + acceleration[axis] * dt,
                None => velocity[axis] + acceleration[axis] * dt,
            };
        }
    }

    /// Advances one owner by symplectic Euler: velocities first, then poses with the new
    /// velocities.
    #[inline(always)]
    #[allow(clippy::too_many_arguments)]
    pub fn integrate_owner(
        position: &mut DVec3,
        orientation: &mut DQuat,
        lin_vel: &mut DVec3,
        ang_vel: &mut DVec3,
        mass: f64,
        moi: DVec3,
        wrench: &Wrench,
        prescription: &FamilyPrescription,
        gravity: DVec3,
        dt: f64,
    ) {
        if prescription.fixed {
            *lin_vel = DVec3::ZERO;
            *ang_vel = DVec3::ZERO;
            return;
        }
        let acceleration = wrench.force / mass + gravity + prescription.added_acc;
        let angular_acceleration = Self::angular_acceleration(*orientation, moi, wrench.torque)
            + prescription.added_ang_acc;
        Self::apply_axes(
            lin_vel,
            acceleration,
            &prescription.lin_vel,
            prescription.dictate,
            dt,
        );
        Self::apply_axes(
            ang_vel,
            angular_acceleration,
            &prescription.ang_vel,
            prescription.dictate,
            dt,
        );
        *position += *lin_vel * dt;
        *orientation = Self::integrate_orientation(*orientation, *ang_vel, dt);
    }

    /// Advances every owner by one step.
    ///
    /// # Arguments
    ///
    /// * `owners` - Owner state to advance.
    /// * `wrenches` - Net contact wrench of every owner.
    /// * `families` - Family prescriptions.
    /// * `gravity` - Gravitational acceleration.
    /// * `dt` - Step length.
    ///
    /// # Returns
    ///
    /// * The speed of the fastest owner after the step.
    pub fn integrate(
        owners: &mut OwnerSet,
        wrenches: &[Wrench],
        families: &FamilyTable,
        gravity: DVec3,
        dt: f64,
    ) -> f64 {
        debug_assert!(wrenches.len() == owners.len());
        let OwnerSet {
            position,
            orientation,
            lin_vel,
            ang_vel,
            mass,
            moi,
            family,
            ..
        } = owners;
        position
            .par_iter_mut()
            .zip(orientation.par_iter_mut())
            .zip(lin_vel.par_iter_mut())
            .zip(ang_vel.par_iter_mut())
            .zip(mass.par_iter())
            .zip(moi.par_iter())
            .zip(family.par_iter())
            .zip(wrenches.par_iter())
            .map(
                |(((((((position, orientation), lin_vel), ang_vel), &mass), &moi), &family), wrench)| {
                    Self::integrate_owner(
                        position,
                        orientation,
                        lin_vel,
                        ang_vel,
                        mass,
                        moi,
                        wrench,
                        families.prescription(family),
                        gravity,
                        dt,
                    );
                    lin_vel.length()
                },
            )
            .reduce(|| 0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::owner_description::OwnerDescription;
    use approx::assert_relative_eq;

    fn single_owner(family: u32) -> OwnerSet {
        let mut owners = OwnerSet::default();
        owners.push(&OwnerDescription::sphere(DVec3::ZERO, 0.5, 2.0, 0).with_family(family));
        owners
    }

    #[test]
    fn test_symplectic_euler_under_gravity() {
        let mut owners = single_owner(0);
        let families = FamilyTable::default();
        let gravity = DVec3::new(0.0, 0.0, -10.0);
        let speed = PoseIntegration::integrate(&mut owners, &[Wrench::default()], &families, gravity, 0.1);
        assert_relative_eq!(owners.lin_vel[0].z, -1.0);
        assert_relative_eq!(owners.position[0].z, -0.1);
        assert_relative_eq!(speed, 1.0);
    }

    #[test]
    fn test_force_and_torque() {
        let mut owners = single_owner(0);
        let families = FamilyTable::default();
        let wrench = Wrench {
            force: DVec3::new(4.0, 0.0, 0.0),
            torque: DVec3::new(0.0, 0.0, 0.2),
        };
        PoseIntegration::integrate(&mut owners, &[wrench], &families, DVec3::ZERO, 0.5);
        assert_relative_eq!(owners.lin_vel[0].x, 1.0);
        // moi = 0.4 * 2 * 0.25 = 0.2
        assert_relative_eq!(owners.ang_vel[0].z, 0.5);
        let (axis, angle) = owners.orientation[0].to_axis_angle();
        assert_relative_eq!(angle, 0.25, epsilon = 1e-12);
        assert_relative_eq!(axis.z, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_prescriptions() {
        let mut owners = single_owner(1);
        let mut families = FamilyTable::default();
        families.set_fixed(1).unwrap();
        owners.lin_vel[0] = DVec3::ONE;
        PoseIntegration::integrate(&mut owners, &[Wrench::default()], &families, DVec3::NEG_Z, 1.0);
        assert_eq!(owners.position[0], DVec3::ZERO);
        assert_eq!(owners.lin_vel[0], DVec3::ZERO);

        let mut owners = single_owner(2);
        families
            .set_prescribed_lin_vel(2, [Some(3.0), None, None], true)
            .unwrap();
        let wrench = Wrench {
            force: DVec3::new(100.0, 0.0, 0.0),
            torque: DVec3::ZERO,
        };
        PoseIntegration::integrate(&mut owners, &[wrench], &families, DVec3::NEG_Z, 1.0);
        assert_eq!(owners.lin_vel[0].x, 3.0);
        assert_eq!(owners.lin_vel[0].z, -1.0);
    }
}
