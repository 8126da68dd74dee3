//! Memory management utilities for the simulation workers.
//!
//! Every contact-detection and force-reduction pass borrows its temporary arrays from a
//! per-worker arena instead of allocating on each step.

pub mod scratch_arena;

pub use scratch_arena::{ScratchArena, ScratchBuffer, ScratchScalars};
