//! Self-rescheduling poll timer with an adaptive interval.
//!
//! Two states: Idle (no pending timer) and Scheduled (timer armed for
//! `interval` seconds). The timer is re-armed after each cycle completes,
//! so cycles never overlap — one timer-driven worker. Cancellation only
//! reaches a timer that has not fired yet; a cycle in flight always runs
//! to completion. Before a cycle runs,
//! the interval is raised to the previous cycle's duration when that cycle
//! overran it; a full adjustment therefore takes two consecutive slow
//! cycles, since the check precedes the current cycle's own measurement.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// What the scheduler drives: one poll cycle per tick.
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    /// Run one poll cycle and report its wall-clock duration.
    async fn run_cycle(&self) -> Duration;

    /// Interval persisted by the command surface, read between cycles so a
    /// CLI `interval` change reaches a running daemon.
    async fn interval_override(&self) -> Option<u64>;
}

struct SchedulerState {
    /// Seconds between cycles; 0 means scheduling is disabled.
    interval: u64,
    /// Duration of the previous cycle, feeding the adaptive rule.
    last_cycle: Duration,
    /// Pending timer task, present only in the Scheduled state. The handle
    /// covers the sleeping phase only: a timer that has fired removes
    /// itself before running the cycle, so aborting it never interrupts
    /// an in-flight cycle.
    timer: Option<JoinHandle<()>>,
    /// Cleared by `deactivate`; a cycle finishing while inactive does not
    /// re-arm the timer.
    active: bool,
    /// True while a cycle is in flight. Interval changes made then are
    /// recorded but not armed; the cycle re-arms with the new value when
    /// it finishes, keeping cycles non-overlapping.
    running: bool,
    /// Last value read from the persisted interval setting. The setting is
    /// applied only when it changes, so it does not undo adaptive raises
    /// on every cycle.
    persisted: Option<u64>,
}

struct Inner {
    runner: Arc<dyn CycleRunner>,
    state: Mutex<SchedulerState>,
}

/// Timer-driven poll scheduler. Cloning shares the same state.
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<Inner>,
}

impl PollScheduler {
    pub fn new(runner: Arc<dyn CycleRunner>, interval_seconds: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                state: Mutex::new(SchedulerState {
                    interval: interval_seconds,
                    last_cycle: Duration::ZERO,
                    timer: None,
                    active: false,
                    running: false,
                    persisted: None,
                }),
            }),
        }
    }

    /// Current interval in seconds.
    pub fn interval(&self) -> u64 {
        self.lock().interval
    }

    /// True when a timer is armed for the next cycle.
    pub fn is_scheduled(&self) -> bool {
        self.lock().timer.is_some()
    }

    /// Run one cycle immediately, then arm the timer (unless the interval
    /// is 0, in which case the scheduler stays Idle).
    pub async fn activate(&self) {
        self.lock().active = true;
        self.run_once().await;
    }

    /// Cancel any pending timer and go Idle. An in-flight cycle is never
    /// interrupted; it finishes, and then does not re-arm the timer.
    pub fn deactivate(&self) {
        let mut state = self.lock();
        state.active = false;
        match state.timer.take() {
            Some(timer) => {
                timer.abort();
                tracing::info!("Pending check canceled");
            }
            None => tracing::info!("No pending check to cancel"),
        }
    }

    /// Change the interval. 0 cancels the pending timer and disables
    /// scheduling; a positive value cancels and re-arms the timer with the
    /// new cadence immediately. During an in-flight cycle the value is
    /// recorded and the cycle's own re-arm uses it.
    pub fn set_interval(&self, seconds: u64) {
        if seconds == 0 {
            let mut state = self.lock();
            state.interval = 0;
            if let Some(timer) = state.timer.take() {
                timer.abort();
                tracing::info!("Pending check canceled");
            }
            tracing::info!("Scheduling disabled");
            return;
        }

        {
            let mut state = self.lock();
            state.interval = seconds;
            tracing::info!(seconds = seconds, "New update interval");
            if state.running {
                return;
            }
        }
        self.schedule_next();
    }

    /// One scheduler tick: adapt the interval, run the cycle, re-arm.
    async fn run_once(&self) {
        {
            let mut state = self.lock();
            state.running = true;
            let previous = state.last_cycle.as_secs();
            if state.interval > 0 && previous >= state.interval {
                tracing::info!(
                    from = state.interval,
                    to = previous,
                    "Raising the interval to the previous cycle's duration"
                );
                state.interval = previous;
            }
        }

        let took = self.inner.runner.run_cycle().await;

        // Apply the persisted interval only when it changed since the last
        // read; an override that merely still exists must not keep
        // reverting adaptive raises.
        if let Some(persisted) = self.inner.runner.interval_override().await {
            let mut state = self.lock();
            if state.persisted != Some(persisted) {
                state.persisted = Some(persisted);
                if persisted != state.interval {
                    tracing::info!(
                        from = state.interval,
                        to = persisted,
                        "Applying the persisted interval"
                    );
                    state.interval = persisted;
                }
            }
        }

        {
            let mut state = self.lock();
            state.last_cycle = took;
            state.running = false;
        }
        self.schedule_next();
    }

    /// Arm the timer for the next cycle, canceling any pending one first.
    fn schedule_next(&self) {
        let mut state = self.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if !state.active {
            tracing::info!("Scheduler deactivated, not re-arming");
            return;
        }
        if state.interval == 0 {
            tracing::info!("Scheduling disabled since the interval is 0s");
            return;
        }

        let seconds = state.interval;
        let scheduler = self.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            // The abortable phase ends here: drop our own handle before the
            // cycle starts, so cancellation can only stop a timer that has
            // not fired yet, never a cycle in flight.
            scheduler.lock().timer = None;
            scheduler.run_once().await;
        }));
        tracing::info!(seconds = seconds, "Scheduled next check");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        // The state mutex is never held across an await, so poisoning only
        // happens if a holder panicked; propagate that.
        self.inner
            .state
            .lock()
            .expect("scheduler state mutex poisoned")
    }
}
