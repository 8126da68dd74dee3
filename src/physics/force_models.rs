//! Pluggable contact force models.
//!
//! A force model turns the geometry and kinematics of one contact into a force on geometry A
//! (B receives the opposite). The solver adds the moment of that force about each owner; the
//! model only returns additional pure torques such as rolling resistance. Models declare the
//! material properties and wildcards they need so everything can be validated and laid out
//! before the first step.

use std::f64::consts::PI;

use glam::DVec3;

use crate::physics::collision_detection::contact_pair::ContactType;
use crate::physics::materials::PairMaterial;
use crate::physics::wildcards::WildcardDeclaration;

const TINY: f64 = 1e-12;

/// Everything known about one geometric contact.
#[derive(Debug, Clone, Copy)]
pub struct ContactContext<'a> {
    /// Kind of the contact.
    pub contact_type: ContactType,
    /// Owner of geometry A.
    pub owner_a: u32,
    /// Owner of geometry B.
    pub owner_b: u32,
    /// Family of owner A.
    pub family_a: u8,
    /// Family of owner B.
    pub family_b: u8,
    /// World-space contact point.
    pub point: DVec3,
    /// Unit contact normal pointing from B to A.
    pub normal: DVec3,
    /// Penetration depth, positive.
    pub overlap: f64,
    /// Radius of sphere A.
    pub radius_a: f64,
    /// Radius of geometry B. Infinite for triangles and analytical boundaries.
    pub radius_b: f64,
    /// Mass of owner A.
    pub mass_a: f64,
    /// Mass of owner B.
    pub mass_b: f64,
    /// Velocity of A's material point at the contact minus B's.
    pub relative_velocity: DVec3,
    /// Angular velocity of owner A.
    pub ang_vel_a: DVec3,
    /// Angular velocity of owner B.
    pub ang_vel_b: DVec3,
    /// Simulation time.
    pub time: f64,
    /// Step length.
    pub time_step: f64,
    /// Owner wildcards of owner A.
    pub owner_wildcards_a: &'a [f64],
    /// Owner wildcards of owner B.
    pub owner_wildcards_b: &'a [f64],
}

impl ContactContext<'_> {
    /// Effective radius of the contact.
    #[inline(always)]
    pub fn effective_radius(&self) -> f64 {
        if self.radius_b.is_finite() {
            self.radius_a * self.radius_b / (self.radius_a + self.radius_b)
        } else {
            self.radius_a
        }
    }

    /// Effective mass of the contact.
    #[inline(always)]
    pub fn effective_mass(&self) -> f64 {
        self.mass_a * self.mass_b / (self.mass_a + self.mass_b)
    }

    /// Normal component of the relative velocity. Negative when approaching.
    #[inline(always)]
    pub fn normal_velocity(&self) -> f64 {
        self.relative_velocity.dot(self.normal)
    }

    /// Tangential component of the relative velocity.
    #[inline(always)]
    pub fn tangential_velocity(&self) -> DVec3 {
        self.relative_velocity - self.normal * self.normal_velocity()
    }
}

/// Output of a force model for one contact.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContactForce {
    /// Force on geometry A. B receives the negation.
    pub force: DVec3,
    /// Pure torque on owner A, on top of the moment of `force`.
    pub torque_only_a: DVec3,
    /// Pure torque on owner B, on top of the moment of `-force`.
    pub torque_only_b: DVec3,
}

/// Contact force law used by the dynamic worker.
pub trait IForceModel: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Material properties every material must define, in the order
    /// [`PairMaterial::a`] and [`PairMaterial::b`] present them.
    fn must_have_material_properties(&self) -> &[&'static str] {
        &[]
    }

    /// Properties resolved per material pair, in the order [`PairMaterial::pair`] presents
    /// them.
    fn must_pairwise_material_properties(&self) -> &[&'static str] {
        &[]
    }

    /// Wildcards stored per contact and carried over between contact lists.
    fn contact_wildcards(&self) -> &[WildcardDeclaration] {
        &[]
    }

    /// Wildcards stored per owner.
    fn owner_wildcards(&self) -> &[WildcardDeclaration] {
        &[]
    }

    /// Computes the force of one contact in geometric overlap.
    ///
    /// # Arguments
    ///
    /// * `contact` - Geometry and kinematics of the contact.
    /// * `material` - Resolved material properties.
    /// * `wildcards` - The contact's wildcards, in declaration order. Changes persist.
    fn compute(
        &self,
        contact: &ContactContext<'_>,
        material: &PairMaterial<'_>,
        wildcards: &mut [f64],
    ) -> ContactForce;
}

const TANGENTIAL_HISTORY: [WildcardDeclaration; 3] = [
    WildcardDeclaration::new("delta_tan_x", 0.0),
    WildcardDeclaration::new("delta_tan_y", 0.0),
    WildcardDeclaration::new("delta_tan_z", 0.0),
];

/// Integrates the tangential spring and caps the result by Coulomb friction.
///
/// # Returns
///
/// * The tangential force. `history` holds the updated spring elongation.
#[inline(always)]
fn tangential_spring(
    contact: &ContactContext<'_>,
    history: &mut [f64],
    stiffness: f64,
    damping: f64,
    max_force: f64,
) -> DVec3 {
    let normal = contact.normal;
    let tangential_velocity = contact.tangential_velocity();
    let mut delta = DVec3::new(history[0], history[1], history[2]);
    // Keep the elongation in the current tangent plane as the contact rotates.
    delta -= normal * delta.dot(normal);
    delta += tangential_velocity * contact.time_step;
    let mut force = -stiffness * delta - damping * tangential_velocity;
    let magnitude = force.length();
    if magnitude > max_force {
        if magnitude > TINY {
            force *= max_force / magnitude;
        }
        if stiffness > TINY {
            delta = -(force + damping * tangential_velocity) / stiffness;
        }
    }
    history[0] = delta.x;
    history[1] = delta.y;
    history[2] = delta.z;
    force
}

/// Linear spring-dashpot contact with optional Coulomb friction.
///
/// Parameters are constants of the model rather than material properties, which makes it a
/// convenient reference law for tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearSpringForceModel {
    /// Normal stiffness.
    pub stiffness: f64,
    /// Normal damping coefficient.
    pub damping: f64,
    /// Friction coefficient. Zero disables the tangential spring.
    pub friction: f64,
    /// Tangential stiffness.
    pub tangential_stiffness: f64,
}

impl LinearSpringForceModel {
    /// Creates a frictionless spring-dashpot.
    pub fn new(stiffness: f64, damping: f64) -> Self {
        Self {
            stiffness,
            damping,
            friction: 0.0,
            tangential_stiffness: 0.0,
        }
    }

    /// Adds Coulomb friction with a tangential spring.
    #[must_use]
    pub fn with_friction(mut self, friction: f64, tangential_stiffness: f64) -> Self {
        self.friction = friction;
        self.tangential_stiffness = tangential_stiffness;
        self
    }
}

impl IForceModel for LinearSpringForceModel {
    fn name(&self) -> &str {
        "linear_spring"
    }

    fn contact_wildcards(&self) -> &[WildcardDeclaration] {
        &TANGENTIAL_HISTORY
    }

    fn compute(
        &self,
        contact: &ContactContext<'_>,
        _material: &PairMaterial<'_>,
        wildcards: &mut [f64],
    ) -> ContactForce {
        let magnitude = self.stiffness * contact.overlap - self.damping * contact.normal_velocity();
        let normal_force = contact.normal * magnitude;
        let mut force = normal_force;
        if self.friction > 0.0 {
            force += tangential_spring(
                contact,
                wildcards,
                self.tangential_stiffness,
                0.0,
                self.friction * magnitude.abs(),
            );
        }
        ContactForce {
            force,
            ..Default::default()
        }
    }
}

/// Hertz-Mindlin contact with viscous damping from the coefficient of restitution, Coulomb
/// friction on a history-carrying tangential spring and rolling resistance.
///
/// Per material: Young's modulus `E` and Poisson's ratio `nu`. Per pair: coefficient of
/// restitution `CoR`, friction coefficient `mu` and rolling resistance coefficient `Crr`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrictionalHertzianForceModel;

const HERTZIAN_MUST_HAVE: [&str; 2] = ["E", "nu"];
const HERTZIAN_PAIRWISE: [&str; 3] = ["CoR", "mu", "Crr"];

impl IForceModel for FrictionalHertzianForceModel {
    fn name(&self) -> &str {
        "frictional_hertzian"
    }

    fn must_have_material_properties(&self) -> &[&'static str] {
        &HERTZIAN_MUST_HAVE
    }

    fn must_pairwise_material_properties(&self) -> &[&'static str] {
        &HERTZIAN_PAIRWISE
    }

    fn contact_wildcards(&self) -> &[WildcardDeclaration] {
        &TANGENTIAL_HISTORY
    }

    fn compute(
        &self,
        contact: &ContactContext<'_>,
        material: &PairMaterial<'_>,
        wildcards: &mut [f64],
    ) -> ContactForce {
        let (e_a, nu_a) = (material.a[0], material.a[1]);
        let (e_b, nu_b) = (material.b[0], material.b[1]);
        let (restitution, friction, rolling) = (material.pair[0], material.pair[1], material.pair[2]);

        let e_contact = 1.0 / ((1.0 - nu_a * nu_a) / e_a + (1.0 - nu_b * nu_b) / e_b);
        let g_contact = 1.0
            / (2.0 * (2.0 - nu_a) * (1.0 + nu_a) / e_a + 2.0 * (2.0 - nu_b) * (1.0 + nu_b) / e_b);
        let mass = contact.effective_mass();
        let sqrt_rd = (contact.effective_radius() * contact.overlap).sqrt();

        let sn = 2.0 * e_contact * sqrt_rd;
        let log_e = restitution.max(TINY).ln();
        let beta = log_e / (log_e * log_e + PI * PI).sqrt();
        let two_sqrt_five_sixths = 2.0 * (5.0f64 / 6.0).sqrt();
        let k_n = 2.0 / 3.0 * sn;
        let gamma_n = two_sqrt_five_sixths * beta * (sn * mass).sqrt();
        let normal_magnitude = k_n * contact.overlap + gamma_n * contact.normal_velocity();
        let mut force = contact.normal * normal_magnitude;

        let k_t = 8.0 * g_contact * sqrt_rd;
        let gamma_t = -two_sqrt_five_sixths * beta * (mass * k_t).sqrt();
        force += tangential_spring(
            contact,
            wildcards,
            k_t,
            gamma_t,
            friction * normal_magnitude.abs(),
        );

        let mut torque_only_a = DVec3::ZERO;
        let mut torque_only_b = DVec3::ZERO;
        if rolling > 0.0 {
            let relative_spin = contact.ang_vel_a - contact.ang_vel_b;
            if let Some(direction) = relative_spin.try_normalize() {
                let resistance = rolling * normal_magnitude.abs();
                torque_only_a = -direction * resistance * contact.radius_a;
                if contact.radius_b.is_finite() {
                    torque_only_b = direction * resistance * contact.radius_b;
                }
            }
        }
        ContactForce {
            force,
            torque_only_a,
            torque_only_b,
        }
    }
}
