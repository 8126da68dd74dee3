//! Synchronization between the caller, the dynamic worker and the kinematic worker.
//!
//! The dynamic worker orders detection cycles; the kinematic worker runs each ordered cycle
//! and publishes the resulting contact list. At most one cycle is in flight at a time, and a
//! published list moves into the dynamic worker by value, so the kinematic worker never
//! writes a buffer the dynamic worker is reading. Counters are mirrored in atomics so
//! monitoring never takes the lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crossbeam_utils::{Backoff, CachePadded};

use crate::error::{DemError, DemResult};
use crate::physics::collision_detection::contact_pair::{ContactPair, ContactProduct};
use crate::physics::dynamic_worker::{DynamicJob, StepReport};
use crate::physics::scene::OwnerSnapshot;

/// A detection cycle ordered by the dynamic worker.
#[derive(Debug, Clone)]
pub struct KinematicOrder {
    /// 1-based id of the cycle.
    pub cycle: u64,
    /// Owner state the cycle must detect contacts for.
    pub snapshot: OwnerSnapshot,
}

/// Bin state last published by the kinematic worker.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BinStatus {
    /// Bin edge length the next cycle will use.
    pub bin_size: f64,
    /// Dynamic steps the next contact list may serve.
    pub update_freq: u32,
    /// Bin size changes applied so far.
    pub change_count: u64,
    /// Average contacts per sphere of the last cycle.
    pub avg_contacts_per_sphere: f64,
    /// Most geometries found in a single bin in the last cycle.
    pub max_occupancy: usize,
    /// Bins holding at least one geometry in the last cycle.
    pub occupied_bins: u64,
}

/// Counter values for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftCounters {
    /// Cycles the kinematic worker completed.
    pub kinematic_cycle: u64,
    /// Cycles the dynamic worker consumed.
    pub consumed_cycle: u64,
    /// Dynamic steps taken.
    pub dynamic_step: u64,
    /// Largest lead of completed over consumed cycles seen.
    pub max_cycle_lead: u64,
    /// Largest number of steps a contact list served past its stamp.
    pub max_step_drift: u64,
}

/// Result of waiting for a cycle.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The awaited cycle was published.
    Ready(ContactProduct),
    /// A stop was requested first.
    Stopped,
}

#[derive(Default)]
struct ChannelState {
    job: Option<DynamicJob>,
    job_result: Option<DemResult<StepReport>>,
    order: Option<KinematicOrder>,
    kinematic_busy: bool,
    product: Option<ContactProduct>,
    recycled_pairs: Vec<ContactPair>,
    kinematic_error: Option<DemError>,
    bin_status: BinStatus,
    terminate: bool,
}

/// The worker report channel.
pub struct WorkerReportChannel {
    state: Mutex<ChannelState>,
    kinematic_wakeup: Condvar,
    dynamic_wakeup: Condvar,
    caller_wakeup: Condvar,
    stop_requested: AtomicBool,
    kinematic_cycle: CachePadded<AtomicU64>,
    consumed_cycle: CachePadded<AtomicU64>,
    dynamic_step: CachePadded<AtomicU64>,
    max_cycle_lead: AtomicU64,
    max_step_drift: AtomicU64,
}

impl Default for WorkerReportChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn poisoned<T>(_: T) -> DemError {
    DemError::WorkerPanicked("report channel")
}

impl WorkerReportChannel {
    /// Creates an idle channel.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            kinematic_wakeup: Condvar::new(),
            dynamic_wakeup: Condvar::new(),
            caller_wakeup: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            kinematic_cycle: CachePadded::new(AtomicU64::new(0)),
            consumed_cycle: CachePadded::new(AtomicU64::new(0)),
            dynamic_step: CachePadded::new(AtomicU64::new(0)),
            max_cycle_lead: AtomicU64::new(0),
            max_step_drift: AtomicU64::new(0),
        }
    }

    #[inline]
    fn lock(&self) -> DemResult<MutexGuard<'_, ChannelState>> {
        self.state.lock().map_err(poisoned)
    }

    // Caller side.

    /// Hands a job to the dynamic worker.
    pub fn submit_job(&self, job: DynamicJob) -> DemResult<()> {
        let mut state = self.lock()?;
        debug_assert!(
            state.job.is_none() && state.job_result.is_none(),
            "Only one job may be outstanding."
        );
        state.job = Some(job);
        self.dynamic_wakeup.notify_all();
        Ok(())
    }

    /// Blocks until the dynamic worker finished the submitted job.
    pub fn wait_job_result(&self) -> DemResult<StepReport> {
        let mut state = self.lock()?;
        loop {
            if let Some(result) = state.job_result.take() {
                return result;
            }
            if state.terminate {
                return Err(DemError::WorkerPanicked("dynamic"));
            }
            state = self.caller_wakeup.wait(state).map_err(poisoned)?;
        }
    }

    /// Asks the dynamic worker to stop at the next step boundary.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        // Taking the lock orders the store before any waiter re-checks the flag.
        if let Ok(_state) = self.lock() {
            self.dynamic_wakeup.notify_all();
        }
    }

    /// Withdraws a stop request.
    pub fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::Release);
    }

    /// Whether a stop is requested.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Tells both workers to exit.
    pub fn terminate(&self) {
        if let Ok(mut state) = self.lock() {
            state.terminate = true;
        }
        self.kinematic_wakeup.notify_all();
        self.dynamic_wakeup.notify_all();
        self.caller_wakeup.notify_all();
    }

    // Dynamic worker side.

    /// Blocks until a job arrives. `None` means the worker must exit.
    pub fn next_job(&self) -> DemResult<Option<DynamicJob>> {
        let mut state = self.lock()?;
        loop {
            if state.terminate {
                return Ok(None);
            }
            if let Some(job) = state.job.take() {
                return Ok(Some(job));
            }
            state = self.dynamic_wakeup.wait(state).map_err(poisoned)?;
        }
    }

    /// Returns the result of a job to the caller.
    pub fn post_job_result(&self, result: DemResult<StepReport>) -> DemResult<()> {
        let mut state = self.lock()?;
        state.job_result = Some(result);
        self.caller_wakeup.notify_all();
        Ok(())
    }

    /// Orders a detection cycle. No other cycle may be in flight.
    pub fn order_cycle(&self, order: KinematicOrder) -> DemResult<()> {
        let mut state = self.lock()?;
        debug_assert!(
            state.order.is_none() && !state.kinematic_busy && state.product.is_none(),
            "A cycle is already in flight."
        );
        tracing::trace!(cycle = order.cycle, stamp = order.snapshot.stamp, "cycle ordered");
        state.order = Some(order);
        self.kinematic_wakeup.notify_all();
        Ok(())
    }

    /// Takes the published contact list, if any.
    ///
    /// # Returns
    ///
    /// * The error of the last ordered cycle if the kinematic worker failed it.
    pub fn take_product(&self) -> DemResult<Option<ContactProduct>> {
        let mut state = self.lock()?;
        if let Some(err) = state.kinematic_error.take() {
            return Err(err);
        }
        Ok(state.product.take())
    }

    /// Blocks until cycle `cycle` is published.
    ///
    /// # Arguments
    ///
    /// * `cycle` - Id of the awaited cycle, which must be ordered already.
    /// * `honor_stop` - Whether a stop request ends the wait.
    ///
    /// # Returns
    ///
    /// * The published list, [`WaitOutcome::Stopped`], or the error the kinematic worker
    ///   raised for the cycle.
    pub fn wait_for_cycle(&self, cycle: u64, honor_stop: bool) -> DemResult<WaitOutcome> {
        let backoff = Backoff::new();
        while self.kinematic_cycle.load(Ordering::Acquire) < cycle && !backoff.is_completed() {
            if honor_stop && self.stop_requested() {
                break;
            }
            backoff.snooze();
        }
        let mut state = self.lock()?;
        loop {
            if let Some(err) = state.kinematic_error.take() {
                return Err(err);
            }
            if state.product.as_ref().is_some_and(|p| p.cycle >= cycle) {
                if let Some(product) = state.product.take() {
                    return Ok(WaitOutcome::Ready(product));
                }
            }
            if honor_stop && self.stop_requested() {
                return Ok(WaitOutcome::Stopped);
            }
            if state.terminate {
                return Err(DemError::WorkerPanicked("kinematic"));
            }
            state = self.dynamic_wakeup.wait(state).map_err(poisoned)?;
        }
    }

    /// Blocks until no cycle is queued or running.
    pub fn wait_kinematic_idle(&self) -> DemResult<()> {
        let mut state = self.lock()?;
        while (state.kinematic_busy || state.order.is_some()) && !state.terminate {
            state = self.dynamic_wakeup.wait(state).map_err(poisoned)?;
        }
        Ok(())
    }

    /// Drops whatever the kinematic worker published or raised. The worker must be idle.
    ///
    /// # Returns
    ///
    /// * The dropped contact list, if there was one.
    pub fn discard_pending(&self) -> DemResult<Option<ContactProduct>> {
        let mut state = self.lock()?;
        state.kinematic_error = None;
        Ok(state.product.take())
    }

    /// Gives a consumed pair buffer back to the kinematic worker for reuse.
    pub fn recycle_pairs(&self, mut pairs: Vec<ContactPair>) -> DemResult<()> {
        let mut state = self.lock()?;
        if pairs.capacity() > state.recycled_pairs.capacity() {
            pairs.clear();
            state.recycled_pairs = pairs;
        }
        Ok(())
    }

    /// Records that the dynamic worker consumed cycle `cycle`.
    #[inline]
    pub fn mark_consumed(&self, cycle: u64) {
        self.consumed_cycle.store(cycle, Ordering::Release);
    }

    /// Records the dynamic step counter and how far the current list served past its stamp.
    #[inline]
    pub fn publish_step(&self, step: u64, drift: u64) {
        self.dynamic_step.store(step, Ordering::Release);
        self.max_step_drift.fetch_max(drift, Ordering::Relaxed);
    }

    /// Resets the atomic counters after the dynamic worker rolled back.
    pub fn rewind(&self, cycle: u64, step: u64) {
        self.consumed_cycle.store(cycle, Ordering::Release);
        self.dynamic_step.store(step, Ordering::Release);
    }

    // Kinematic worker side.

    /// Blocks until a cycle is ordered. `None` means the worker must exit.
    pub fn next_order(&self) -> DemResult<Option<KinematicOrder>> {
        let mut state = self.lock()?;
        loop {
            if state.terminate {
                return Ok(None);
            }
            if let Some(order) = state.order.take() {
                state.kinematic_busy = true;
                return Ok(Some(order));
            }
            state = self.kinematic_wakeup.wait(state).map_err(poisoned)?;
        }
    }

    /// Takes the recycled pair buffer, empty but with capacity.
    pub fn take_recycled_pairs(&self) -> DemResult<Vec<ContactPair>> {
        Ok(std::mem::take(&mut self.lock()?.recycled_pairs))
    }

    /// Publishes a finished cycle and wakes the dynamic worker.
    pub fn signal_cycle_done(&self, product: ContactProduct, status: BinStatus) -> DemResult<()> {
        let mut state = self.lock()?;
        let cycle = product.cycle;
        debug_assert!(
            cycle == self.kinematic_cycle.load(Ordering::Acquire) + 1,
            "Cycles complete in order."
        );
        state.product = Some(product);
        state.bin_status = status;
        state.kinematic_busy = false;
        self.kinematic_cycle.store(cycle, Ordering::Release);
        let lead = cycle.saturating_sub(self.consumed_cycle.load(Ordering::Acquire));
        self.max_cycle_lead.fetch_max(lead, Ordering::Relaxed);
        self.dynamic_wakeup.notify_all();
        Ok(())
    }

    /// Reports that the ordered cycle failed.
    pub fn report_kinematic_error(&self, err: DemError) -> DemResult<()> {
        let mut state = self.lock()?;
        state.kinematic_error = Some(err);
        state.kinematic_busy = false;
        self.dynamic_wakeup.notify_all();
        Ok(())
    }

    /// Updates the published bin state without a cycle.
    pub fn set_bin_status(&self, status: BinStatus) -> DemResult<()> {
        self.lock()?.bin_status = status;
        Ok(())
    }

    // Monitoring.

    /// Gets the bin state last published.
    pub fn bin_status(&self) -> DemResult<BinStatus> {
        Ok(self.lock()?.bin_status)
    }

    /// Whether a published list waits to be consumed.
    pub fn has_pending_product(&self) -> DemResult<bool> {
        Ok(self.lock()?.product.is_some())
    }

    /// Reads every counter.
    pub fn counters(&self) -> DriftCounters {
        DriftCounters {
            kinematic_cycle: self.kinematic_cycle.load(Ordering::Acquire),
            consumed_cycle: self.consumed_cycle.load(Ordering::Acquire),
            dynamic_step: self.dynamic_step.load(Ordering::Acquire),
            max_cycle_lead: self.max_cycle_lead.load(Ordering::Relaxed),
            max_step_drift: self.max_step_drift.load(Ordering::Relaxed),
        }
    }

    /// Gets the number of completed cycles.
    #[inline]
    pub fn kinematic_cycle(&self) -> u64 {
        self.kinematic_cycle.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::scene::Scene;
    use std::sync::Arc;
    use std::thread;

    fn order(cycle: u64) -> KinematicOrder {
        KinematicOrder {
            cycle,
            snapshot: OwnerSnapshot {
                stamp: 0,
                scene: Arc::new(Scene::default()),
                position: Vec::new(),
                orientation: Vec::new(),
                lin_vel: Vec::new(),
                ang_vel: Vec::new(),
                family: Vec::new(),
            },
        }
    }

    fn product(cycle: u64) -> ContactProduct {
        ContactProduct {
            cycle,
            drift_allowance: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_cycle_handoff_across_threads() {
        let channel = Arc::new(WorkerReportChannel::new());
        let kinematic = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                while let Ok(Some(order)) = channel.next_order() {
                    channel
                        .signal_cycle_done(product(order.cycle), BinStatus::default())
                        .unwrap();
                }
            })
        };
        for cycle in 1..=3 {
            channel.order_cycle(order(cycle)).unwrap();
            match channel.wait_for_cycle(cycle, true).unwrap() {
                WaitOutcome::Ready(product) => assert_eq!(product.cycle, cycle),
                WaitOutcome::Stopped => panic!("no stop was requested"),
            }
            channel.mark_consumed(cycle);
        }
        channel.terminate();
        kinematic.join().unwrap();
        let counters = channel.counters();
        assert_eq!(counters.kinematic_cycle, 3);
        assert_eq!(counters.consumed_cycle, 3);
        assert_eq!(counters.max_cycle_lead, 1);
    }

    #[test]
    fn test_stop_ends_wait_only_when_honored() {
        let channel = WorkerReportChannel::new();
        channel.order_cycle(order(1)).unwrap();
        channel.request_stop();
        assert!(matches!(
            channel.wait_for_cycle(1, true).unwrap(),
            WaitOutcome::Stopped
        ));
        channel.clear_stop();
        assert!(!channel.stop_requested());
    }

    #[test]
    fn test_kinematic_error_reaches_dynamic_side() {
        let channel = WorkerReportChannel::new();
        channel.order_cycle(order(1)).unwrap();
        let taken = channel.next_order().unwrap().unwrap();
        assert_eq!(taken.cycle, 1);
        channel
            .report_kinematic_error(DemError::AverageContactsExceeded {
                average: 200.0,
                limit: 100.0,
            })
            .unwrap();
        channel.wait_kinematic_idle().unwrap();
        assert!(matches!(
            channel.wait_for_cycle(1, false),
            Err(DemError::AverageContactsExceeded { .. })
        ));
        assert!(channel.take_product().unwrap().is_none());
    }

    #[test]
    fn test_pair_buffers_are_recycled() {
        let channel = WorkerReportChannel::new();
        channel.recycle_pairs(Vec::with_capacity(16)).unwrap();
        let pairs = channel.take_recycled_pairs().unwrap();
        assert!(pairs.is_empty());
        assert!(pairs.capacity() >= 16);
        assert_eq!(channel.take_recycled_pairs().unwrap().capacity(), 0);
    }
}
