use glam::DVec3;

use crate::error::{DemError, DemResult};

/// Uniform grid of cubic bins covering the simulation box.
///
/// Bin ids are dense `u32`s with x varying fastest. Positions outside the box are clamped
/// into the boundary bins, so every point maps to exactly one bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinGrid {
    origin: DVec3,
    bin_size: f64,
    inverse_bin_size: f64,
    dims: [u32; 3],
}

impl BinGrid {
    /// Creates a grid over a box.
    ///
    /// # Arguments
    ///
    /// * `domain_min` - Lower corner of the box.
    /// * `domain_size` - Extent of the box.
    /// * `bin_size` - Bin edge length.
    /// * `max_bin_count` - Most bins the grid may contain.
    ///
    /// # Returns
    ///
    /// * The grid, or [`DemError::TooManyBins`] when the box needs more bins than allowed.
    pub fn new(
        domain_min: DVec3,
        domain_size: DVec3,
        bin_size: f64,
        max_bin_count: u64,
    ) -> DemResult<Self> {
        if !(bin_size > 0.0 && bin_size.is_finite()) {
            return Err(DemError::InvalidSettings(format!(
                "bin size must be positive and finite, got {bin_size}"
            )));
        }
        let max = max_bin_count.min(u32::MAX as u64 + 1);
        let per_axis = (domain_size / bin_size).ceil().max(DVec3::ONE);
        let requested = per_axis.x * per_axis.y * per_axis.z;
        if requested > max as f64 {
            return Err(DemError::TooManyBins {
                bin_size,
                requested: requested.min(u64::MAX as f64) as u64,
                max,
            });
        }
        Ok(Self {
            origin: domain_min,
            bin_size,
            inverse_bin_size: 1.0 / bin_size,
            dims: [per_axis.x as u32, per_axis.y as u32, per_axis.z as u32],
        })
    }

    /// Gets the bin edge length.
    #[inline]
    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    /// Gets the number of bins along each axis.
    #[inline]
    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    /// Gets the total number of bins.
    #[inline]
    pub fn bin_count(&self) -> u64 {
        self.dims.iter().map(|&d| d as u64).product()
    }

    /// Maps a position to integer bin coordinates, clamped into the grid.
    #[inline(always)]
    pub fn cell_of(&self, position: DVec3) -> [u32; 3] {
        let scaled = ((position - self.origin) * self.inverse_bin_size).floor();
        let axis = |value: f64, dim: u32| -> u32 {
            // NaN maps to bin 0.
            value.clamp(0.0, (dim - 1) as f64) as u32
        };
        [
            axis(scaled.x, self.dims[0]),
            axis(scaled.y, self.dims[1]),
            axis(scaled.z, self.dims[2]),
        ]
    }

    /// Gets the id of a bin from its coordinates.
    #[inline(always)]
    pub fn bin_id(&self, [x, y, z]: [u32; 3]) -> u32 {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    /// Gets the id of the bin containing a position.
    #[inline(always)]
    pub fn bin_of(&self, position: DVec3) -> u32 {
        self.bin_id(self.cell_of(position))
    }

    /// Gets the inclusive coordinate range of the bins touched by a box.
    #[inline(always)]
    pub fn cell_range(&self, min: DVec3, max: DVec3) -> ([u32; 3], [u32; 3]) {
        (self.cell_of(min), self.cell_of(max))
    }

    /// Counts the bins touched by a box.
    #[inline(always)]
    pub fn touched_count(&self, min: DVec3, max: DVec3) -> u64 {
        let (low, high) = self.cell_range(min, max);
        (0..3).map(|i| (high[i] - low[i] + 1) as u64).product()
    }

    /// Calls `visit` with the id of every bin touched by a box, in increasing id order.
    #[inline]
    pub fn for_each_touched(&self, min: DVec3, max: DVec3, mut visit: impl FnMut(u32)) {
        let (low, high) = self.cell_range(min, max);
        for z in low[2]..=high[2] {
            for y in low[1]..=high[1] {
                for x in low[0]..=high[0] {
                    visit(self.bin_id([x, y, z]));
                }
            }
        }
    }
}
