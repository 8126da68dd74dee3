use approx::assert_relative_eq;
use glam::DVec3;
use rust_dem::{
    ContactContext, ContactForce, DemError, DemSolver, IForceModel, Inspection,
    LinearSpringForceModel, OwnerDescription, PairMaterial, SolverSettings, WildcardDeclaration,
};

fn settings() -> SolverSettings {
    SolverSettings::with_time_step(1e-3)
        .with_gravity(DVec3::ZERO)
        .with_domain(DVec3::splat(-1.0), DVec3::splat(2.0))
        .with_threads(1, 1)
}

/// Two spheres flying head-on at each other, in families 1 and 2.
fn head_on(disable_contact: bool) -> DemSolver {
    let mut solver = DemSolver::new(settings());
    solver
        .set_force_model(LinearSpringForceModel::new(1e4, 0.0))
        .unwrap();
    let material = solver.load_material(&[]).unwrap();
    solver
        .add_owners(&[
            OwnerDescription::sphere(DVec3::new(-0.5, 0.0, 0.0), 0.1, 1.0, material)
                .with_velocity(DVec3::X)
                .with_family(1),
            OwnerDescription::sphere(DVec3::new(0.5, 0.0, 0.0), 0.1, 1.0, material)
                .with_velocity(-DVec3::X)
                .with_family(2),
        ])
        .unwrap();
    if disable_contact {
        solver.disable_contact_between_families(1, 2).unwrap();
    }
    solver.initialize().unwrap();
    solver
}

#[test]
fn test_disabled_families_pass_through_each_other() {
    let mut solver = head_on(true);
    solver.do_dynamics_then_sync(1000).unwrap();
    assert_relative_eq!(solver.owner_position(0).unwrap().x, 0.5, epsilon = 1e-9);
    assert_relative_eq!(solver.owner_position(1).unwrap().x, -0.5, epsilon = 1e-9);
    assert!(solver.contacts().unwrap().is_empty());
}

#[test]
fn test_enabled_families_bounce() {
    let mut solver = head_on(false);
    solver.do_dynamics_then_sync(1000).unwrap();
    assert!(solver.owner_position(0).unwrap().x < -0.1);
    assert!(solver.owner_velocity(0).unwrap().x < 0.0);
    assert!(solver.owner_position(1).unwrap().x > 0.1);
}

#[test]
fn test_family_rules_change_mid_run() {
    let mut solver = head_on(true);
    solver.do_dynamics(100).unwrap();
    solver.enable_contact_between_families(1, 2).unwrap();
    solver.do_dynamics_then_sync(900).unwrap();
    // Contact came back in time to stop them passing.
    assert!(solver.owner_position(0).unwrap().x < 0.0);

    solver.set_family_fixed(5).unwrap();
    assert_eq!(solver.change_family(1, 5).unwrap(), 1);
    assert_eq!(solver.owner_family(0).unwrap(), 5);
    let pinned = solver.owner_position(0).unwrap();
    solver.do_dynamics_then_sync(10).unwrap();
    assert_eq!(solver.owner_position(0).unwrap(), pinned);
    assert_eq!(solver.owner_velocity(0).unwrap(), DVec3::ZERO);
}

#[test]
fn test_prescribed_velocity_overrides_motion() {
    let mut solver = head_on(true);
    solver
        .set_family_prescribed_lin_vel(2, [Some(0.0), Some(0.25), None], true)
        .unwrap();
    solver.do_dynamics_then_sync(100).unwrap();
    let velocity = solver.owner_velocity(1).unwrap();
    assert_eq!(velocity.x, 0.0);
    assert_eq!(velocity.y, 0.25);
    assert_relative_eq!(solver.owner_position(1).unwrap().y, 0.025, epsilon = 1e-12);
}

#[test]
fn test_add_and_remove_owners_mid_run() {
    let mut solver = head_on(true);
    solver.do_dynamics(50).unwrap();
    let id = solver
        .add_owner(OwnerDescription::sphere(DVec3::new(0.0, 0.5, 0.0), 0.1, 2.0, 0))
        .unwrap();
    assert_eq!(id, 2);
    assert_eq!(solver.num_owners().unwrap(), 3);
    solver.do_dynamics_then_sync(50).unwrap();
    assert_eq!(solver.owner_position(2).unwrap(), DVec3::new(0.0, 0.5, 0.0));
    assert_eq!(solver.inspect(Inspection::TotalMass, |_| true).unwrap(), 4.0);

    solver.remove_owners(&[0]).unwrap();
    assert_eq!(solver.num_owners().unwrap(), 2);
    // Former owner 1 is now owner 0.
    assert_relative_eq!(solver.owner_velocity(0).unwrap().x, -1.0);
    assert_eq!(
        solver.inspect(Inspection::TotalMass, |view| view.family == 0).unwrap(),
        2.0
    );
    solver.do_dynamics_then_sync(10).unwrap();
    assert_eq!(solver.step_count().unwrap(), 110);
    assert_eq!(
        solver.owner_position(5).unwrap_err(),
        DemError::UnknownOwner(5)
    );
}

/// Spring whose stiffness is scaled by the product of the owners' charges.
struct ChargedSpring;

const CHARGE: [WildcardDeclaration; 1] = [WildcardDeclaration::new("charge", 1.0)];

impl IForceModel for ChargedSpring {
    fn name(&self) -> &str {
        "charged_spring"
    }

    fn owner_wildcards(&self) -> &[WildcardDeclaration] {
        &CHARGE
    }

    fn compute(
        &self,
        contact: &ContactContext<'_>,
        _material: &PairMaterial<'_>,
        _wildcards: &mut [f64],
    ) -> ContactForce {
        let scale = contact.owner_wildcards_a[0] * contact.owner_wildcards_b[0];
        ContactForce {
            force: contact.normal * 1e4 * scale * contact.overlap,
            ..Default::default()
        }
    }
}

#[test]
fn test_owner_wildcards_feed_the_force_model() {
    let mut solver = DemSolver::new(settings());
    solver.set_force_model(ChargedSpring).unwrap();
    let material = solver.load_material(&[]).unwrap();
    solver
        .add_owners(&[
            OwnerDescription::sphere(DVec3::ZERO, 0.1, 1.0, material),
            OwnerDescription::sphere(DVec3::new(0.15, 0.0, 0.0), 0.1, 1.0, material),
        ])
        .unwrap();
    solver.initialize().unwrap();
    assert_eq!(solver.owner_wildcard("charge").unwrap(), vec![1.0, 1.0]);
    assert_eq!(
        solver.set_owner_wildcard("charge", &[1.0]),
        Err(DemError::WildcardLengthMismatch {
            name: "charge".to_owned(),
            expected: 2,
            found: 1,
        })
    );
    assert!(matches!(
        solver.set_owner_wildcard("mass", &[1.0, 1.0]),
        Err(DemError::UnknownWildcard(_))
    ));

    // No charge, no force.
    solver.set_owner_wildcard("charge", &[0.0, 3.0]).unwrap();
    solver.do_dynamics_then_sync(1).unwrap();
    assert_eq!(solver.owner_velocity(0).unwrap(), DVec3::ZERO);

    solver.set_owner_wildcard("charge", &[2.0, 3.0]).unwrap();
    solver.do_dynamics_then_sync(1).unwrap();
    // Overlap 0.05 with stiffness 6e4 for one millisecond.
    assert_relative_eq!(solver.owner_velocity(0).unwrap().x, -3.0, epsilon = 1e-9);
    assert_relative_eq!(solver.owner_velocity(1).unwrap().x, 3.0, epsilon = 1e-9);
}

#[test]
fn test_contact_wildcards_follow_contact_list() {
    let mut solver = DemSolver::new(settings());
    solver
        .set_force_model(LinearSpringForceModel::new(1e4, 0.0).with_friction(0.5, 1e3))
        .unwrap();
    let material = solver.load_material(&[]).unwrap();
    solver
        .add_owners(&[
            OwnerDescription::sphere(DVec3::ZERO, 0.1, 1.0, material),
            OwnerDescription::sphere(DVec3::new(0.19, 0.0, 0.0), 0.1, 1.0, material)
                .with_velocity(DVec3::new(0.0, 0.1, 0.0)),
        ])
        .unwrap();
    solver.initialize().unwrap();
    solver.do_dynamics_then_sync(3).unwrap();
    let slip = solver.contact_wildcard("delta_tan_y").unwrap();
    assert_eq!(slip.len(), solver.contacts().unwrap().len());
    assert_eq!(slip.len(), 1);
    assert!(slip[0] != 0.0);
    assert!(matches!(
        solver.contact_wildcard("spin"),
        Err(DemError::UnknownWildcard(_))
    ));
}
