pub mod anomalies;
pub mod collision_detection;
pub mod dynamic_worker;
pub mod families;
pub mod force_models;
pub mod geometry;
pub mod inspector;
pub mod kinematic_worker;
pub mod materials;
pub mod owner_description;
pub mod owners;
pub mod pose_integration;
pub mod report_channel;
pub mod scene;
pub mod simulation;
pub mod simulation_profiler;
pub mod simulation_settings;
pub mod wildcards;
