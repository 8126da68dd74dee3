use std::thread;
use std::time::Duration;

use glam::DVec3;
use rust_dem::{
    AnalyticalShape, BinControlSettings, DemError, DemSolver, DriftSettings,
    LinearSpringForceModel, OwnerDescription, SolverSettings,
};

const RADIUS: f64 = 0.05;

fn settings(drift: DriftSettings, update_freq: u32) -> SolverSettings {
    SolverSettings::with_time_step(1e-4)
        .with_domain(DVec3::splat(-1.0), DVec3::splat(2.0))
        .with_update_freq(update_freq)
        .with_drift(drift)
        .with_threads(2, 2)
}

/// A 4x4x4 lattice of spheres above a fixed floor, each with its own velocity.
fn lattice(settings: SolverSettings) -> DemSolver {
    let mut solver = DemSolver::new(settings);
    solver
        .set_force_model(LinearSpringForceModel::new(1e4, 5.0))
        .unwrap();
    let material = solver.load_material(&[]).unwrap();
    let mut descriptions = Vec::new();
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                let position = DVec3::new(i as f64, j as f64, k as f64) * 0.12 - 0.2;
                let velocity = DVec3::new((j as f64 - 1.5) * 0.2, (k as f64 - 1.5) * 0.2, 0.0);
                descriptions.push(
                    OwnerDescription::sphere(position, RADIUS, 1e-3, material)
                        .with_velocity(velocity),
                );
            }
        }
    }
    descriptions.push(
        OwnerDescription::analytical(
            vec![AnalyticalShape::Plane {
                point: DVec3::new(0.0, 0.0, -0.3),
                normal: DVec3::Z,
            }],
            material,
        )
        .with_family(1),
    );
    solver.add_owners(&descriptions).unwrap();
    solver.set_family_fixed(1).unwrap();
    solver.initialize().unwrap();
    solver
}

#[test]
fn test_drift_stays_bounded_while_workers_overlap() {
    let bound = 8;
    let mut solver = lattice(settings(
        DriftSettings {
            upper_bound_future_drift: bound,
            is_async: true,
        },
        4,
    ));
    let control = solver.control();
    for _ in 0..20 {
        let report = solver.do_dynamics(25).unwrap();
        assert_eq!(report.completed, 25);
        let counters = control.counters();
        assert!(counters.consumed_cycle <= counters.kinematic_cycle);
        assert!(counters.kinematic_cycle - counters.consumed_cycle <= 1);
        assert!(counters.max_cycle_lead <= 1);
        assert!(counters.max_step_drift < bound as u64);
    }
    assert!(solver.update_freq().unwrap() <= bound);

    solver.sync().unwrap();
    let counters = control.counters();
    assert_eq!(counters.kinematic_cycle, counters.consumed_cycle);
    assert_eq!(counters.dynamic_step, 500);

    let stats = solver.collaboration_stats().unwrap();
    assert_eq!(stats.dynamic_steps, 500);
    assert_eq!(stats.cycles_ordered, stats.cycles_consumed + stats.cycles_discarded);
    assert!(stats.cycles_consumed >= 500 / bound as u64);
    assert!(stats.average_drift_at_consumption() < bound as f64);
}

#[test]
fn test_synchronous_mode_orders_on_exhaustion_only() {
    let mut settings = settings(
        DriftSettings {
            upper_bound_future_drift: 100,
            is_async: false,
        },
        5,
    );
    settings.bins = BinControlSettings {
        auto_bin_size: false,
        auto_update_freq: false,
        ..Default::default()
    };
    let mut solver = lattice(settings);
    solver.do_dynamics_then_sync(100).unwrap();

    let stats = solver.collaboration_stats().unwrap();
    assert_eq!(stats.cycles_ordered, 20);
    assert_eq!(stats.cycles_consumed, 20);
    assert_eq!(stats.waits_on_kinematic, 20);
    assert_eq!(stats.drift_at_consumption, 0);
    assert_eq!(solver.control().counters().max_step_drift, 4);
}

#[test]
fn test_sync_reaches_rendezvous() {
    let mut solver = lattice(settings(DriftSettings::default(), 10));
    let control = solver.control();
    for steps in [1, 37, 3] {
        let report = solver.do_dynamics_then_sync(steps).unwrap();
        assert_eq!(report.completed, steps);
        let counters = control.counters();
        assert_eq!(counters.kinematic_cycle, counters.consumed_cycle);
    }
    assert_eq!(control.counters().dynamic_step, 41);
    assert_eq!(solver.step_count().unwrap(), 41);
    assert!((solver.time().unwrap() - 41.0 * 1e-4).abs() < 1e-12);
}

#[test]
fn test_pause_is_sticky_until_resume() {
    let mut solver = lattice(settings(DriftSettings::default(), 10));
    let control = solver.control();
    control.pause();
    assert!(control.is_paused());
    let report = solver.do_dynamics(10).unwrap();
    assert_eq!(report.completed, 0);
    assert!(report.paused);

    control.resume();
    let report = solver.do_dynamics_then_sync(10).unwrap();
    assert_eq!(report.completed, 10);
    assert!(!report.paused);
}

#[test]
fn test_pause_from_another_thread_stops_long_run() {
    let mut solver = lattice(settings(DriftSettings::default(), 10));
    let control = solver.control();
    let pauser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        control.pause();
    });
    let requested = 50_000_000;
    let report = solver.do_dynamics(requested).unwrap();
    pauser.join().unwrap();
    assert!(report.paused);
    assert!(report.completed < requested);

    // A flush ignores the pause and leaves both workers at rendezvous.
    solver.sync().unwrap();
    let counters = solver.control().counters();
    assert_eq!(counters.kinematic_cycle, counters.consumed_cycle);
    assert_eq!(solver.step_count().unwrap(), report.completed);
    solver.control().resume();
}

#[test]
fn test_fatal_error_leaves_state_not_advanced() {
    let settings = settings(DriftSettings::default(), 10).with_err_out_avg_contacts(3.0);
    let mut solver = DemSolver::new(settings);
    solver
        .set_force_model(LinearSpringForceModel::new(1e3, 0.0))
        .unwrap();
    let material = solver.load_material(&[]).unwrap();
    solver
        .add_owners(&[
            OwnerDescription::sphere(DVec3::new(-0.5, 0.0, 0.0), RADIUS, 1.0, material),
            OwnerDescription::sphere(DVec3::new(0.5, 0.0, 0.0), RADIUS, 1.0, material),
        ])
        .unwrap();
    solver.initialize().unwrap();
    solver.do_dynamics_then_sync(10).unwrap();
    let position = solver.owner_position(0).unwrap();
    let time = solver.time().unwrap();

    // Eight spheres piled into one spot: 28 pairs for 10 spheres.
    let pile: Vec<_> = (0..8)
        .map(|i| {
            OwnerDescription::sphere(DVec3::new(0.0, 0.0, i as f64 * 0.01), RADIUS, 1.0, material)
        })
        .collect();
    let ids = solver.add_owners(&pile).unwrap();
    let err = solver.do_dynamics(5).unwrap_err();
    assert!(matches!(err, DemError::AverageContactsExceeded { limit, .. } if limit == 3.0));
    assert_eq!(solver.step_count().unwrap(), 10);
    assert_eq!(solver.time().unwrap(), time);
    assert_eq!(solver.owner_position(0).unwrap(), position);
    assert!(solver.anomalies().over_avg_contacts);
    let counters = solver.control().counters();
    assert_eq!(counters.kinematic_cycle, counters.consumed_cycle);
    assert_eq!(counters.dynamic_step, 10);

    // Not poisoned: removing the pile makes the run healthy again.
    solver.remove_owners(&ids).unwrap();
    let report = solver.do_dynamics_then_sync(5).unwrap();
    assert_eq!(report.completed, 5);
    assert_eq!(solver.step_count().unwrap(), 15);
}
