pub mod bin_controller;
pub mod bin_grid;
pub mod broad_phase;
pub mod contact_pair;
pub mod narrow_phase;
pub mod overlap_tests;
