use bytemuck::Pod;

use crate::error::{DemError, DemResult};

/// Backing storage unit. Every typed view handed out starts on a word boundary, so any
/// `Pod` type with an alignment of at most 8 can be viewed in place.
type Word = u64;
const WORD_SIZE: usize = std::mem::size_of::<Word>();

/// A growable region of untyped scratch memory.
///
/// Capacity only ever grows: it tracks the high-water mark of every request made against it
/// during a run. Memory is not cleared between acquisitions, so callers must fully write any
/// region they read back.
pub struct ScratchBuffer {
    words: Vec<Word>,
    name: &'static str,
    high_water_bytes: usize,
}

impl ScratchBuffer {
    /// Creates an empty scratch buffer.
    pub fn new(name: &'static str) -> Self {
        Self {
            words: Vec::new(),
            name,
            high_water_bytes: 0,
        }
    }

    /// Gets the name the buffer was created with.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Gets the number of bytes currently backed by the buffer.
    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.words.len() * WORD_SIZE
    }

    /// Gets the largest request ever made against this buffer.
    #[inline]
    pub fn high_water_bytes(&self) -> usize {
        self.high_water_bytes
    }

    /// Ensures at least `size_needed` bytes are backed, growing if necessary.
    ///
    /// Growth is geometric so a slowly increasing requirement does not reallocate on every
    /// cycle. The buffer never shrinks.
    pub fn reserve_bytes(&mut self, size_needed: usize) -> DemResult<()> {
        let needed_words = size_needed.div_ceil(WORD_SIZE);
        if needed_words > self.words.len() {
            let target_words = needed_words.max(self.words.len() + self.words.len() / 2);
            let additional = target_words - self.words.len();
            self.words
                .try_reserve_exact(additional)
                .map_err(|_| DemError::ScratchAllocation {
                    buffer: self.name,
                    bytes: target_words * WORD_SIZE,
                })?;
            self.words.resize(target_words, 0);
            tracing::trace!(
                buffer = self.name,
                bytes = target_words * WORD_SIZE,
                "grew scratch buffer"
            );
        }
        self.high_water_bytes = self.high_water_bytes.max(size_needed);
        Ok(())
    }

    /// Returns a byte view of at least `size_needed` bytes, growing the buffer if needed.
    pub fn acquire_bytes(&mut self, size_needed: usize) -> DemResult<&mut [u8]> {
        self.reserve_bytes(size_needed)?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words[..]);
        Ok(&mut bytes[..size_needed])
    }

    /// Returns a typed view of exactly `count` elements, growing the buffer if needed.
    ///
    /// # Arguments
    ///
    /// * `count` - Number of `T` elements the caller needs.
    ///
    /// # Returns
    ///
    /// * A mutable slice over the buffer's memory. Contents are whatever the previous user
    ///   of the buffer left behind.
    pub fn acquire<T: Pod>(&mut self, count: usize) -> DemResult<&mut [T]> {
        debug_assert!(
            std::mem::align_of::<T>() <= WORD_SIZE,
            "Scratch buffers can only hand out types aligned to at most 8 bytes."
        );
        let name = self.name;
        let size_needed = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(DemError::ScratchAllocation {
                buffer: name,
                bytes: usize::MAX,
            })?;
        let bytes = self.acquire_bytes(size_needed)?;
        bytemuck::try_cast_slice_mut(bytes).map_err(|_| DemError::ScratchAllocation {
            buffer: name,
            bytes: size_needed,
        })
    }
}

/// Small scalar slots every detection or reduction pass may reuse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScratchScalars {
    /// Number of contacts found by the current pass.
    pub num_contacts: usize,
    /// Number of contacts found by the previous pass. Used as a sizing hint.
    pub num_prev_contacts: usize,
}

/// Per-worker set of named scratch buffers plus scalar slots.
///
/// Each worker owns exactly one arena; arenas are never shared between workers. Buffers are
/// independent, so a pass that needs several non-aliasing regions at once destructures
/// [`ScratchArena::buffers_mut`].
pub struct ScratchArena<const N: usize> {
    buffers: [ScratchBuffer; N],
    /// Scalar slots.
    pub scalars: ScratchScalars,
}

impl<const N: usize> ScratchArena<N> {
    /// Creates an arena with one buffer per name.
    ///
    /// # Arguments
    ///
    /// * `names` - Names of the independent buffers, in index order.
    pub fn new(names: [&'static str; N]) -> Self {
        Self {
            buffers: names.map(ScratchBuffer::new),
            scalars: ScratchScalars::default(),
        }
    }

    /// Gets the number of named buffers.
    #[inline]
    pub fn buffer_count(&self) -> usize {
        N
    }

    /// Gets all buffers so disjoint ones can be borrowed simultaneously.
    #[inline]
    pub fn buffers_mut(&mut self) -> &mut [ScratchBuffer; N] {
        &mut self.buffers
    }

    /// Convenience for a single typed acquisition from one buffer.
    pub fn acquire<T: Pod>(&mut self, index: usize, count: usize) -> DemResult<&mut [T]> {
        self.buffers[index].acquire(count)
    }

    /// Gets the name and capacity of each buffer, in index order.
    pub fn capacities(&self) -> Vec<(&'static str, usize)> {
        self.buffers
            .iter()
            .map(|buffer| (buffer.name(), buffer.capacity_bytes()))
            .collect()
    }

    /// Gets the total number of bytes backed by all buffers of the arena.
    pub fn total_capacity_bytes(&self) -> usize {
        self.buffers.iter().map(ScratchBuffer::capacity_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_grows_to_request() {
        let mut buffer = ScratchBuffer::new("keys");
        assert_eq!(buffer.capacity_bytes(), 0);
        let view = buffer.acquire::<u32>(10).unwrap();
        assert_eq!(view.len(), 10);
        assert!(buffer.capacity_bytes() >= 40);
        assert_eq!(buffer.high_water_bytes(), 40);
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let mut buffer = ScratchBuffer::new("pairs");
        let requests = [100usize, 3, 4000, 1, 0, 2500, 4001, 17];
        let mut last_capacity = 0;
        for &count in &requests {
            buffer.acquire::<u64>(count).unwrap();
            assert!(buffer.capacity_bytes() >= last_capacity);
            assert!(buffer.capacity_bytes() >= count * 8);
            last_capacity = buffer.capacity_bytes();
        }
        assert_eq!(buffer.high_water_bytes(), 4001 * 8);
    }

    #[test]
    fn test_views_are_reused_not_reallocated() {
        let mut buffer = ScratchBuffer::new("reuse");
        buffer.acquire::<u32>(64).unwrap().fill(7);
        let capacity = buffer.capacity_bytes();
        let view = buffer.acquire::<u32>(32).unwrap();
        assert!(view.iter().all(|&v| v == 7));
        assert_eq!(buffer.capacity_bytes(), capacity);
    }

    #[test]
    fn test_typed_views_of_vectors() {
        let mut buffer = ScratchBuffer::new("forces");
        let view = buffer.acquire::<glam::DVec3>(5).unwrap();
        view[4] = glam::DVec3::new(1.0, 2.0, 3.0);
        assert_eq!(view[4].y, 2.0);
    }

    #[test]
    fn test_arena_buffers_are_independent() {
        let mut arena = ScratchArena::new(["a", "b"]);
        let [a, b] = arena.buffers_mut();
        let a = a.acquire::<u32>(4).unwrap();
        let b = b.acquire::<u32>(4).unwrap();
        a.fill(1);
        b.fill(2);
        assert!(a.iter().all(|&v| v == 1));
        assert_eq!(arena.buffer_count(), 2);
        let total: usize = arena.capacities().iter().map(|&(_, bytes)| bytes).sum();
        assert_eq!(arena.total_capacity_bytes(), total);
        assert_eq!(arena.capacities()[1].0, "b");
    }
}
