//! Error types for the DEM engine.
//!
//! Configuration errors are reported and abort the current call. Device errors mean some
//! worker-owned resource could not be created or grown; the solver refuses further work
//! after one. Recoverable anomalies are not errors at all; they go to the
//! [`AnomalyLog`](crate::physics::anomalies::AnomalyLog).

use thiserror::Error;

/// Coarse classification of a [`DemError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The run is configured in a way that cannot proceed.
    Configuration,
    /// Allocation or dispatch on a compute device failed.
    Device,
    /// A worker thread died or its shared state became unusable.
    Worker,
}

/// Errors that can occur while configuring or advancing a simulation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DemError {
    /// A material does not define a property the force model must have.
    #[error("material {material} does not define property `{property}` required by the force model")]
    MissingMaterialProperty {
        /// Property name.
        property: String,
        /// Offending material index.
        material: usize,
    },

    /// A pairwise property has neither a pair override nor values on both materials.
    #[error(
        "pairwise property `{property}` cannot be resolved for materials {material_a} and {material_b}"
    )]
    UnresolvedPairwiseProperty {
        /// Property name.
        property: String,
        /// First material index.
        material_a: usize,
        /// Second material index.
        material_b: usize,
    },

    /// A wildcard array does not have one entry per target entity.
    #[error("wildcard `{name}` has {found} values, expected {expected}")]
    WildcardLengthMismatch {
        /// Wildcard name.
        name: String,
        /// Number of entities the array must cover.
        expected: usize,
        /// Number of values supplied.
        found: usize,
    },

    /// A wildcard name is not declared by the force model.
    #[error("wildcard `{0}` is not declared by the force model")]
    UnknownWildcard(String),

    /// A family number exceeds the representable maximum.
    #[error("family {family} exceeds the maximum allowed family number {max}")]
    FamilyOutOfRange {
        /// Requested family.
        family: u32,
        /// Largest representable family.
        max: u32,
    },

    /// The average number of contacts per sphere grew past the configured ceiling.
    #[error(
        "average contacts per sphere reached {average:.2}, above the limit of {limit:.2}; contact margins are out of control"
    )]
    AverageContactsExceeded {
        /// Observed average.
        average: f64,
        /// Configured ceiling.
        limit: f64,
    },

    /// A single bin holds more geometries than the bin layout can represent.
    #[error("bin {bin} holds {count} geometries, above the limit of {limit}")]
    BinOccupancyExceeded {
        /// Bin id.
        bin: u32,
        /// Geometries found in the bin.
        count: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The current bin size would need more bins than bin ids can address.
    #[error("bin size {bin_size} needs {requested} bins, more than the representable {max}")]
    TooManyBins {
        /// Bin edge length.
        bin_size: f64,
        /// Bins the domain would need.
        requested: u64,
        /// Representable bin count.
        max: u64,
    },

    /// A settings value is out of its valid range.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// An owner id does not name a live owner.
    #[error("owner {0} does not exist")]
    UnknownOwner(usize),

    /// The call needs an initialized solver.
    #[error("the solver has not been initialized")]
    NotInitialized,

    /// The call is only valid before initialization.
    #[error("the solver is already initialized")]
    AlreadyInitialized,

    /// Growing a scratch buffer failed.
    #[error("failed to grow scratch buffer `{buffer}` to {bytes} bytes")]
    ScratchAllocation {
        /// Scratch buffer name.
        buffer: &'static str,
        /// Requested capacity.
        bytes: usize,
    },

    /// A compute device could not be created or dispatched to.
    #[error("compute device `{device}` failed: {reason}")]
    Device {
        /// Device name.
        device: &'static str,
        /// Backend message.
        reason: String,
    },

    /// A worker thread panicked or left shared state poisoned.
    #[error("worker `{0}` panicked")]
    WorkerPanicked(&'static str),
}

impl DemError {
    /// Classifies the error by the error-handling taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ScratchAllocation { .. } | Self::Device { .. } => ErrorKind::Device,
            Self::WorkerPanicked(_) => ErrorKind::Worker,
            _ => ErrorKind::Configuration,
        }
    }

    /// Whether the solver must refuse any further work after this error.
    pub fn is_unrecoverable(&self) -> bool {
        self.kind() != ErrorKind::Configuration
    }
}

/// Result type for DEM operations.
pub type DemResult<T> = std::result::Result<T, DemError>;
