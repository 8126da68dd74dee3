//! Primitive bulk operations over flat arrays: stable key sort, prefix scan, run-length
//! encoding and reduce-by-key.
//!
//! All operations are deterministic for a fixed input order. None of them allocate: the
//! caller supplies every output and scratch slice, usually from a
//! [`ScratchArena`](crate::utilities::memory::ScratchArena).

use std::ops::Add;

use rayon::prelude::*;

/// Keys histogrammed by one task of the sort's counting pass.
const HISTOGRAM_CHUNK: usize = 1 << 14;

fn reorder_for_byte<V: Copy>(
    source_keys: &[u32],
    target_keys: &mut [u32],
    source_values: &[V],
    target_values: &mut [V],
    bucket_starts: &mut [u32],
    shift: u32,
) {
    for (&key, &value) in source_keys.iter().zip(source_values) {
        let slot = &mut bucket_starts[((key >> shift) & 0xFF) as usize];
        target_keys[*slot as usize] = key;
        target_values[*slot as usize] = value;
        *slot += 1;
    }
}

/// Sorts `keys` ascending, carrying `values` along. The sort is stable: equal keys keep
/// their input order.
///
/// Only as many byte passes as the largest key needs are run. The counting pass runs on the
/// current rayon pool; the scatter passes are sequential.
///
/// # Arguments
///
/// * `keys` - Keys to sort. Holds the sorted keys on return.
/// * `values` - Values paired with `keys`. Holds the reordered values on return.
/// * `keys_scratch` - At least `keys.len()` elements of scratch.
/// * `values_scratch` - At least `keys.len()` elements of scratch.
pub fn sort_pairs_by_key<V: Copy>(
    keys: &mut [u32],
    values: &mut [V],
    keys_scratch: &mut [u32],
    values_scratch: &mut [V],
) {
    let count = keys.len();
    debug_assert!(values.len() == count, "Every key needs exactly one value.");
    debug_assert!(
        keys_scratch.len() >= count && values_scratch.len() >= count,
        "Scratch regions must be able to hold every key and value."
    );
    if count < 2 {
        return;
    }
    let keys_scratch = &mut keys_scratch[..count];
    let values_scratch = &mut values_scratch[..count];

    let max_key = keys.par_iter().copied().max().unwrap_or(0);
    let pass_count = ((32 - max_key.leading_zeros()) as usize).div_ceil(8).max(1);

    // Byte histograms of every pass, counted per chunk in parallel.
    let mut bucket_counts = keys
        .par_chunks(HISTOGRAM_CHUNK)
        .map(|chunk| {
            let mut counts = [0u32; 1024];
            for &key in chunk {
                for pass in 0..pass_count {
                    counts[pass * 256 + ((key >> (pass * 8)) & 0xFF) as usize] += 1;
                }
            }
            counts
        })
        .reduce(
            || [0u32; 1024],
            |mut total, counts| {
                for (sum, count) in total.iter_mut().zip(counts) {
                    *sum += count;
                }
                total
            },
        );
    // Exclusive partial sums per byte slice turn counts into bucket start indices.
    for pass in 0..pass_count {
        let mut sum = 0;
        for bucket in &mut bucket_counts[pass * 256..(pass + 1) * 256] {
            let temp = *bucket;
            *bucket = sum;
            sum += temp;
        }
    }

    for pass in 0..pass_count {
        let starts = &mut bucket_counts[pass * 256..(pass + 1) * 256];
        let shift = (pass * 8) as u32;
        if pass % 2 == 0 {
            reorder_for_byte(keys, keys_scratch, values, values_scratch, starts, shift);
        } else {
            reorder_for_byte(keys_scratch, keys, values_scratch, values, starts, shift);
        }
    }
    if pass_count % 2 == 1 {
        keys.copy_from_slice(keys_scratch);
        values.copy_from_slice(values_scratch);
    }
}

/// Writes the exclusive prefix sum of `input` into `output` and returns the total.
///
/// `output[i]` is the sum of `input[..i]`.
pub fn exclusive_scan<T>(input: &[T], output: &mut [T]) -> T
where
    T: Copy + Default + Add<Output = T>,
{
    debug_assert!(output.len() >= input.len(), "Scan output is too small.");
    let mut sum = T::default();
    for (value, slot) in input.iter().zip(output.iter_mut()) {
        *slot = sum;
        sum = sum + *value;
    }
    sum
}

/// Collapses runs of equal adjacent keys.
///
/// # Returns
///
/// * The number of runs. `unique_out[..runs]` holds each run's key and `counts_out[..runs]`
///   its length. On sorted input every key appears in exactly one run.
pub fn run_length_encode(keys: &[u32], unique_out: &mut [u32], counts_out: &mut [u32]) -> usize {
    let mut runs = 0usize;
    for &key in keys {
        if runs > 0 && unique_out[runs - 1] == key {
            counts_out[runs - 1] += 1;
        } else {
            unique_out[runs] = key;
            counts_out[runs] = 1;
            runs += 1;
        }
    }
    runs
}

/// Sums `values` over runs of equal adjacent keys.
///
/// Values inside a run are summed in input order, so the result is bit-reproducible for a
/// fixed input.
///
/// # Returns
///
/// * The number of runs written to `unique_out` and `reduced_out`.
pub fn reduce_by_key<V>(
    keys: &[u32],
    values: &[V],
    unique_out: &mut [u32],
    reduced_out: &mut [V],
) -> usize
where
    V: Copy + Add<Output = V>,
{
    debug_assert!(values.len() == keys.len(), "Every key needs exactly one value.");
    let mut runs = 0usize;
    for (&key, &value) in keys.iter().zip(values) {
        if runs > 0 && unique_out[runs - 1] == key {
            reduced_out[runs - 1] = reduced_out[runs - 1] + value;
        } else {
            unique_out[runs] = key;
            reduced_out[runs] = value;
            runs += 1;
        }
    }
    runs
}
