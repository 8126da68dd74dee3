//! Discrete-element-method engine for rigid sphere clumps, triangle meshes and analytical
//! primitives.
//!
//! A simulation is run by two long-lived workers. The kinematic worker bins every geometry
//! on an adaptive uniform grid and publishes candidate contact lists; the dynamic worker
//! evaluates contact forces, integrates owner motion and orders fresh lists while it keeps
//! stepping on the last one. A contact list stamped at dynamic step `s` serves at most
//! `update_freq` steps, with expansion margins sized so no contact can be missed meanwhile.
//!
//! ```no_run
//! use glam::DVec3;
//! use rust_dem::{DemSolver, OwnerDescription, SolverSettings};
//!
//! let mut solver = DemSolver::new(SolverSettings::with_time_step(1e-5));
//! let material = solver
//!     .load_material(&[("E", 1e8), ("nu", 0.3), ("CoR", 0.5), ("mu", 0.3), ("Crr", 0.0)])
//!     .unwrap();
//! solver
//!     .add_owner(OwnerDescription::sphere(DVec3::ZERO, 0.01, 1e-3, material))
//!     .unwrap();
//! solver.initialize().unwrap();
//! solver.do_dynamics_then_sync(1000).unwrap();
//! ```

pub mod error;
pub mod physics;
pub mod utilities;

pub use error::{DemError, DemResult, ErrorKind};
pub use physics::anomalies::AnomalyReport;
pub use physics::collision_detection::contact_pair::{ContactPair, ContactType};
pub use physics::dynamic_worker::{CollaborationStats, StepReport};
pub use physics::force_models::{
    ContactContext, ContactForce, FrictionalHertzianForceModel, IForceModel,
    LinearSpringForceModel,
};
pub use physics::geometry::AnalyticalShape;
pub use physics::inspector::{Inspection, OwnerView};
pub use physics::materials::PairMaterial;
pub use physics::owner_description::{ClumpSphere, OwnerDescription, OwnerShape};
pub use physics::report_channel::{BinStatus, DriftCounters};
pub use physics::simulation::{DemSolver, SolverControl};
pub use physics::simulation_settings::{
    BinControlSettings, DriftSettings, MarginSettings, SolverSettings,
};
pub use physics::wildcards::WildcardDeclaration;
