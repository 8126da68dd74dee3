use std::collections::HashMap;
use std::time::Instant;

/// Accumulated timing of one named stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTiming {
    /// Total time spent in the stage, in seconds.
    pub total_seconds: f64,
    /// Number of times the stage ran.
    pub count: u64,
}

impl StageTiming {
    /// Mean duration of one run of the stage, in seconds.
    #[inline]
    pub fn mean_seconds(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_seconds / self.count as f64
        }
    }
}

/// Accumulates wall-clock time per stage of a worker.
///
/// Stages are keyed by static names and reported in the order they first ran.
#[derive(Debug, Clone, Default)]
pub struct SimulationProfiler {
    stages: HashMap<&'static str, StageTiming>,
    order: Vec<&'static str>,
    start_timestamps: HashMap<&'static str, Instant>,
}

impl SimulationProfiler {
    /// Creates a profiler with room for the given number of stages.
    pub fn new(initial_stage_count: usize) -> Self {
        Self {
            stages: HashMap::with_capacity(initial_stage_count),
            order: Vec::with_capacity(initial_stage_count),
            start_timestamps: HashMap::with_capacity(initial_stage_count),
        }
    }

    /// Gets the accumulated timing of the given stage, if it ever ran.
    pub fn get(&self, stage: &'static str) -> Option<StageTiming> {
        self.stages.get(stage).copied()
    }

    /// Starts timing a stage.
    pub fn start(&mut self, stage: &'static str) {
        debug_assert!(
            !self.start_timestamps.contains_key(stage),
            "Cannot start a stage that has already been started."
        );
        self.start_timestamps.insert(stage, Instant::now());
    }

    /// Ends timing a stage and accumulates the elapsed time.
    pub fn end(&mut self, stage: &'static str) {
        let end_time = Instant::now();
        let Some(start_time) = self.start_timestamps.remove(stage) else {
            debug_assert!(
                false,
                "To end a stage, it must currently be active (started and not already stopped)."
            );
            return;
        };
        let elapsed = end_time.duration_since(start_time).as_secs_f64();
        let timing = self.stages.entry(stage).or_insert_with(|| {
            self.order.push(stage);
            StageTiming::default()
        });
        timing.total_seconds += elapsed;
        timing.count += 1;
    }

    /// Times `operation` as the given stage.
    #[inline]
    pub fn time<R>(&mut self, stage: &'static str, operation: impl FnOnce() -> R) -> R {
        self.start(stage);
        let result = operation();
        self.end(stage);
        result
    }

    /// Gets every stage in first-run order.
    pub fn stages(&self) -> Vec<(&'static str, StageTiming)> {
        self.order
            .iter()
            .map(|&stage| (stage, self.stages[stage]))
            .collect()
    }

    /// Clears all accumulated stage times.
    pub fn clear(&mut self) {
        debug_assert!(
            self.start_timestamps.is_empty(),
            "It's likely that some stage was left unended from the previous run."
        );
        self.stages.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_in_first_run_order() {
        let mut profiler = SimulationProfiler::new(2);
        profiler.time("integrate", || ());
        profiler.time("forces", || ());
        profiler.time("integrate", || ());
        let stages = profiler.stages();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].0, "integrate");
        assert_eq!(stages[0].1.count, 2);
        assert_eq!(profiler.get("forces").map(|t| t.count), Some(1));
        assert!(profiler.get("binning").is_none());
        profiler.clear();
        assert!(profiler.stages().is_empty());
    }
}
