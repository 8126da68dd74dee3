use approx::assert_relative_eq;
use glam::DVec3;
use rust_dem::{
    BinControlSettings, ContactType, DemSolver, Inspection, LinearSpringForceModel,
    OwnerDescription, SolverSettings,
};

const STIFFNESS: f64 = 1e4;
const TIME_STEP: f64 = 1e-3;

fn two_spheres(speed: f64) -> DemSolver {
    let settings = SolverSettings::with_time_step(TIME_STEP)
        .with_gravity(DVec3::ZERO)
        .with_domain(DVec3::splat(-10.0), DVec3::splat(20.0))
        .with_bin_size(2.0)
        .with_bins(BinControlSettings {
            auto_bin_size: false,
            ..Default::default()
        })
        .with_threads(2, 2);
    let mut solver = DemSolver::new(settings);
    solver
        .set_force_model(LinearSpringForceModel::new(STIFFNESS, 0.0))
        .unwrap();
    let material = solver.load_material(&[]).unwrap();
    solver
        .add_owners(&[
            OwnerDescription::sphere(DVec3::ZERO, 1.0, 1.0, material)
                .with_velocity(DVec3::new(speed, 0.0, 0.0)),
            OwnerDescription::sphere(DVec3::new(1.9, 0.0, 0.0), 1.0, 1.0, material)
                .with_velocity(DVec3::new(-speed, 0.0, 0.0)),
        ])
        .unwrap();
    solver.initialize().unwrap();
    solver
}

#[test]
fn test_overlapping_spheres_bounce_apart() {
    let mut solver = two_spheres(0.1);
    let report = solver.do_dynamics_then_sync(1).unwrap();
    assert_eq!(report.completed, 1);
    assert!(!report.paused);

    let contacts = solver.contacts().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].contact_type, ContactType::SphereSphere);
    assert_eq!((contacts[0].owner_a, contacts[0].owner_b), (0, 1));
    assert_eq!(solver.num_contacts().unwrap(), 1);
    assert_eq!(solver.bin_size().unwrap(), 2.0);

    // Overlap 0.1 pushes with k * 0.1 for one step.
    let impulse = STIFFNESS * 0.1 * TIME_STEP;
    let v0 = solver.owner_velocity(0).unwrap();
    let v1 = solver.owner_velocity(1).unwrap();
    assert!(v0.x < 0.0 && v1.x > 0.0);
    assert_relative_eq!(v0.x, 0.1 - impulse, epsilon = 1e-12);
    assert_relative_eq!(v1.x, -0.1 + impulse, epsilon = 1e-12);
    assert_relative_eq!(v0.y, 0.0);
    assert_relative_eq!(v0.z, 0.0);
}

#[test]
fn test_momentum_is_conserved_through_contact() {
    let mut solver = two_spheres(0.5);
    solver.do_dynamics_then_sync(200).unwrap();
    let momentum = solver.owner_velocity(0).unwrap() + solver.owner_velocity(1).unwrap();
    assert_relative_eq!(momentum.length(), 0.0, epsilon = 1e-9);
    // The spheres separate once the spring has released.
    let gap = solver.owner_position(1).unwrap().x - solver.owner_position(0).unwrap().x;
    assert!(gap > 2.0, "spheres still overlap: gap {gap}");
    assert_eq!(solver.num_contacts().unwrap(), 0);
    assert!(solver.inspect(Inspection::KineticEnergy, |_| true).unwrap() > 0.0);
}

#[test]
fn test_sphere_comes_to_rest_on_plane() {
    let settings = SolverSettings::with_time_step(1e-4)
        .with_domain(DVec3::splat(-1.0), DVec3::splat(2.0))
        .with_threads(1, 1);
    let mut solver = DemSolver::new(settings);
    solver
        .set_force_model(LinearSpringForceModel::new(1e5, 300.0))
        .unwrap();
    let material = solver.load_material(&[]).unwrap();
    let ball = solver
        .add_owner(OwnerDescription::sphere(
            DVec3::new(0.0, 0.0, 0.15),
            0.1,
            1.0,
            material,
        ))
        .unwrap();
    solver
        .add_owner(
            OwnerDescription::analytical(
                vec![rust_dem::AnalyticalShape::Plane {
                    point: DVec3::ZERO,
                    normal: DVec3::Z,
                }],
                material,
            )
            .with_family(1),
        )
        .unwrap();
    solver.set_family_fixed(1).unwrap();
    solver.initialize().unwrap();

    solver.do_dynamics_then_sync(5000).unwrap();
    let z = solver.owner_position(ball).unwrap().z;
    assert!(z > 0.099 && z < 0.1001, "ball rests at z = {z}");
    assert!(solver.owner_velocity(ball).unwrap().length() < 0.05);
    assert_eq!(solver.owner_position(1).unwrap(), DVec3::ZERO);
    assert!(!solver.anomalies().any());
}
