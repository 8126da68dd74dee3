//! Cross-worker record of recoverable abnormal conditions.
//!
//! Anomalies never stop a run on their own. Both workers record into the same log through
//! atomics, and the caller reads a snapshot whenever convenient.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Snapshot of the anomaly log.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnomalyReport {
    /// Some owner moved faster than the configured max velocity.
    pub over_max_velocity: bool,
    /// Number of times an over-speed owner was seen.
    pub over_max_velocity_events: u64,
    /// Highest owner speed seen, in any state.
    pub max_observed_speed: f64,
    /// The average contacts per sphere exceeded its ceiling.
    pub over_avg_contacts: bool,
    /// Highest average contacts per sphere seen.
    pub max_avg_contacts: f64,
}

impl AnomalyReport {
    /// Whether anything abnormal was recorded.
    pub fn any(&self) -> bool {
        self.over_max_velocity || self.over_avg_contacts
    }
}

/// Atomic maximum over non-negative `f64`s stored as bits. Non-negative floats order the
/// same way as their bit patterns.
#[derive(Debug, Default)]
struct AtomicMaxF64(AtomicU64);

impl AtomicMaxF64 {
    #[inline]
    fn record(&self, value: f64) {
        if value >= 0.0 {
            self.0.fetch_max(value.to_bits(), Ordering::Relaxed);
        }
    }

    #[inline]
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Shared anomaly log.
#[derive(Debug, Default)]
pub struct AnomalyLog {
    over_max_velocity: AtomicBool,
    over_max_velocity_events: AtomicU64,
    max_observed_speed: AtomicMaxF64,
    over_avg_contacts: AtomicBool,
    max_avg_contacts: AtomicMaxF64,
}

impl AnomalyLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the speed of the fastest owner seen by a pass.
    pub fn record_speed(&self, speed: f64) {
        self.max_observed_speed.record(speed);
    }

    /// Records an owner faster than the configured max velocity.
    pub fn record_over_max_velocity(&self, owner: usize, speed: f64, limit: f64) {
        self.max_observed_speed.record(speed);
        self.over_max_velocity_events.fetch_add(1, Ordering::Relaxed);
        if !self.over_max_velocity.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                owner,
                speed,
                limit,
                "owner exceeds the max velocity; its contact margin is capped"
            );
        }
    }

    /// Records the average contacts per sphere of a detection cycle.
    pub fn record_avg_contacts(&self, average: f64, limit: f64) {
        self.max_avg_contacts.record(average);
        if average > limit {
            self.over_avg_contacts.store(true, Ordering::Relaxed);
        }
    }

    /// Takes a snapshot of the log.
    pub fn report(&self) -> AnomalyReport {
        AnomalyReport {
            over_max_velocity: self.over_max_velocity.load(Ordering::Relaxed),
            over_max_velocity_events: self.over_max_velocity_events.load(Ordering::Relaxed),
            max_observed_speed: self.max_observed_speed.load(),
            over_avg_contacts: self.over_avg_contacts.load(Ordering::Relaxed),
            max_avg_contacts: self.max_avg_contacts.load(),
        }
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.over_max_velocity.store(false, Ordering::Relaxed);
        self.over_max_velocity_events.store(0, Ordering::Relaxed);
        self.max_observed_speed.reset();
        self.over_avg_contacts.store(false, Ordering::Relaxed);
        self.max_avg_contacts.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_clears() {
        let log = AnomalyLog::new();
        assert!(!log.report().any());
        log.record_speed(3.0);
        log.record_over_max_velocity(4, 12.0, 10.0);
        log.record_over_max_velocity(5, 11.0, 10.0);
        log.record_avg_contacts(2.5, 100.0);
        let report = log.report();
        assert!(report.over_max_velocity);
        assert_eq!(report.over_max_velocity_events, 2);
        assert_eq!(report.max_observed_speed, 12.0);
        assert!(!report.over_avg_contacts);
        assert_eq!(report.max_avg_contacts, 2.5);
        log.clear();
        assert_eq!(log.report(), AnomalyReport::default());
    }
}
