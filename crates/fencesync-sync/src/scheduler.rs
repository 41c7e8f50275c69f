//! Run gating and periodic triggers
//!
//! A [`PeriodicTrigger`] owns one Tokio task that ticks at a fixed period
//! and invokes a callback. The callback only spawns a run; transfer logic
//! never executes on the tick itself. A [`RunGate`] per configuration keeps
//! overlapping ticks and manual requests from running the same
//! configuration twice at once.
//!
//! ## Flow
//!
//! ```text
//! interval tick ──→ on_tick() ──→ tokio::spawn(run)
//!                                     │
//!                               RunGate::try_begin
//!                               Idle → Running            (run)
//!                               Running → RunningWithPending (coalesce)
//!                               RunGate::finish
//!                               RunningWithPending → Running (rerun once)
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ============================================================================
// RunGate
// ============================================================================

/// Re-entrancy state of one configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Idle,
    Running,
    /// A run is in flight and one more was requested meanwhile
    RunningWithPending,
}

/// Serializes runs of one configuration, coalescing overlapping requests
/// into at most one pending rerun
#[derive(Debug, Default)]
pub struct RunGate {
    state: Mutex<GateState>,
}

impl RunGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tries to start a run
    ///
    /// Returns `true` if the caller now owns the run. Otherwise a rerun is
    /// recorded and the caller must not run.
    pub fn try_begin(&self) -> bool {
        let mut state = self.lock();
        match *state {
            GateState::Idle => {
                *state = GateState::Running;
                true
            }
            GateState::Running | GateState::RunningWithPending => {
                *state = GateState::RunningWithPending;
                false
            }
        }
    }

    /// Ends a run
    ///
    /// Returns `true` if a rerun was requested meanwhile; the caller then
    /// still owns the gate and must run again before calling `finish`.
    pub fn finish(&self) -> bool {
        let mut state = self.lock();
        match *state {
            GateState::RunningWithPending => {
                *state = GateState::Running;
                true
            }
            GateState::Running | GateState::Idle => {
                *state = GateState::Idle;
                false
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        *self.lock()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state() != GateState::Idle
    }
}

// ============================================================================
// InFlightTracker
// ============================================================================

/// Counts executing transfer passes so shutdown can wait for them
#[derive(Debug, Default)]
pub struct InFlightTracker {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlightTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a pass as started until the returned guard is dropped
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Waits until no pass is executing, at most `timeout`
    ///
    /// Returns `true` if the count reached zero in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Decrements the in-flight count on drop, even if the pass was abandoned
#[derive(Debug)]
pub struct InFlightGuard<'a>(&'a InFlightTracker);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ============================================================================
// PeriodicTrigger
// ============================================================================

/// A cancellable fixed-period timer task
///
/// The first tick fires one full period after start. Missed ticks are
/// skipped rather than bursted. Dropping the trigger cancels it.
#[derive(Debug)]
pub struct PeriodicTrigger {
    token: CancellationToken,
    handle: JoinHandle<()>,
    period: Duration,
}

impl PeriodicTrigger {
    /// Starts a trigger as a child of `parent`, so cancelling the parent
    /// (engine shutdown) stops it too
    pub fn start<F>(
        name: impl Into<String>,
        period: Duration,
        parent: &CancellationToken,
        on_tick: F,
    ) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let name = name.into();
        let token = parent.child_token();
        let task_token = token.clone();

        info!(trigger = %name, period_secs = period.as_secs(), "Starting periodic trigger");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!(trigger = %name, "Tick");
                        on_tick();
                    }
                }
            }

            debug!(trigger = %name, "Periodic trigger stopped");
        });

        Self {
            token,
            handle,
            period,
        }
    }

    /// Stops future ticks; a run already spawned by a tick is not affected
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.handle.is_finished()
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for PeriodicTrigger {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn gate_runs_once_and_coalesces_overlaps() {
        let gate = RunGate::new();
        assert!(gate.try_begin());
        assert_eq!(gate.state(), GateState::Running);

        // Two overlapping requests collapse into one pending rerun.
        assert!(!gate.try_begin());
        assert!(!gate.try_begin());
        assert_eq!(gate.state(), GateState::RunningWithPending);

        assert!(gate.finish());
        assert_eq!(gate.state(), GateState::Running);
        assert!(!gate.finish());
        assert_eq!(gate.state(), GateState::Idle);
        assert!(!gate.is_busy());
    }

    #[test]
    fn gate_finish_when_idle_is_harmless() {
        let gate = RunGate::new();
        assert!(!gate.finish());
        assert!(gate.try_begin());
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_waits_for_guards() {
        let tracker = Arc::new(InFlightTracker::new());
        let guard = tracker.enter();
        assert_eq!(tracker.count(), 1);
        assert!(!tracker.wait_idle(Duration::from_secs(1)).await);

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_idle(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(guard);
        assert!(waiter.await.unwrap());
        assert_eq!(tracker.count(), 0);
    }

    fn counting_trigger(
        period: Duration,
        parent: &CancellationToken,
    ) -> (PeriodicTrigger, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let trigger = PeriodicTrigger::start("test", period, parent, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (trigger, count)
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_ticks_once_per_period_without_immediate_tick() {
        let parent = CancellationToken::new();
        let (trigger, count) = counting_trigger(Duration::from_secs(10), &parent);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(trigger.period(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_trigger_stops_ticking() {
        let parent = CancellationToken::new();
        let (trigger, count) = counting_trigger(Duration::from_secs(10), &parent);

        tokio::time::sleep(Duration::from_secs(15)).await;
        trigger.cancel();
        assert!(trigger.is_cancelled());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_children() {
        let parent = CancellationToken::new();
        let (_a, count_a) = counting_trigger(Duration::from_secs(10), &parent);
        let (_b, count_b) = counting_trigger(Duration::from_secs(7), &parent);

        parent.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count_a.load(Ordering::SeqCst), 0);
        assert_eq!(count_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_trigger_cancels_it() {
        let parent = CancellationToken::new();
        let (trigger, count) = counting_trigger(Duration::from_secs(10), &parent);
        drop(trigger);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
