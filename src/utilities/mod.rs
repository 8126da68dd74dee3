pub mod compute_device;
pub mod memory;
pub mod primitives;
