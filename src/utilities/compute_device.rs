use crate::error::{DemError, DemResult};

/// Bulk-parallel execution resource owned by one worker.
///
/// Each worker is single threaded in its control flow but hands data-parallel passes (binning,
/// pair generation, force evaluation, integration) to its own device. Work dispatched to a
/// device runs to completion before `dispatch` returns, so a worker only observes stop
/// requests between device operations.
pub struct ComputeDevice {
    name: &'static str,
    pool: rayon::ThreadPool,
}

impl ComputeDevice {
    /// Creates a device backed by `thread_count` threads. Zero picks one thread per core.
    ///
    /// # Arguments
    ///
    /// * `name` - Name used for the device's threads and in errors.
    /// * `thread_count` - Number of device threads.
    pub fn new(name: &'static str, thread_count: usize) -> DemResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .thread_name(move |index| format!("{name}-device-{index}"))
            .build()
            .map_err(|err| DemError::Device {
                device: name,
                reason: err.to_string(),
            })?;
        Ok(Self { name, pool })
    }

    /// Gets the name of the device.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Gets the number of threads available to the device.
    #[inline]
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `operation` on the device and waits for it to finish.
    ///
    /// Parallel iterators used inside `operation` execute on the device's threads.
    #[inline]
    pub fn dispatch<R, F>(&self, operation: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(operation)
    }
}
