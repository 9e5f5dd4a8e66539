//! Admission Scheduler
//!
//! Drains the wait queue while the quota allows and keeps a single wake
//! timer armed so a queue blocked on capacity always gets another pass.
//!
//! All mutable state sits behind one mutex. A drain pass takes the lock for
//! each step and releases it before completing a ticket, so waiters are never
//! woken while the lock is held. The `draining` flag collapses concurrent
//! drain triggers into a single active pass; the active pass re-reads the
//! queue on every step and so picks up entries enqueued meanwhile.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::config::LimiterConfig;
use super::queue::{CancelToken, Completion, WaitQueue, WaitQueueEntry};
use super::quota::QuotaState;
use super::reconcile::{MergeOutcome, QuotaMetadata, QuotaReconciler};
use crate::metrics;

/// The pending wake timer
#[derive(Debug)]
struct SchedulerTimer {
    /// Distinguishes this timer from ones disarmed earlier
    generation: u64,

    handle: JoinHandle<()>,
}

/// State guarded by the scheduler mutex
#[derive(Debug)]
struct SchedulerState {
    quota: QuotaState,
    queue: WaitQueue,
    timer: Option<SchedulerTimer>,
    timer_generation: u64,
    draining: bool,
    /// Id handed to the next enqueued ticket
    next_ticket: u64,
}

impl Drop for SchedulerState {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

/// Point-in-time view of the limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Last known window limit
    pub limit: u32,

    /// Admissions available right now
    pub remaining: u32,

    /// Milliseconds until the window resets
    pub resets_in_ms: u64,

    /// Tickets waiting for admission
    pub queued: usize,

    /// Whether a wake timer is pending
    pub timer_armed: bool,
}

/// One decision of a drain pass
enum Step {
    /// Nothing more to do in this pass
    Idle,
    /// Head ticket admitted and charged
    Admit(WaitQueueEntry),
    /// Head ticket was cancelled; discarded without charge
    Discard(WaitQueueEntry),
}

/// Releases the in-progress flag if a drain pass unwinds
struct DrainGuard<'a> {
    scheduler: &'a Scheduler,
    finished: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.scheduler.lock().draining = false;
        }
    }
}

/// Admission scheduler shared by all clones of a limiter
#[derive(Debug)]
pub(crate) struct Scheduler {
    state: Mutex<SchedulerState>,
    reconciler: QuotaReconciler,
    wake_margin: Duration,
    fresh_window: Duration,
    runtime: Handle,
}

impl Scheduler {
    /// Create a scheduler bound to the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub(crate) fn new(config: &LimiterConfig) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                quota: QuotaState::new(config.initial_limit, config.initial_remaining, now),
                queue: WaitQueue::new(),
                timer: None,
                timer_generation: 0,
                draining: false,
                next_ticket: 0,
            }),
            reconciler: QuotaReconciler::new(config.reset_margin())
                .with_max_horizon(config.max_reset_horizon()),
            wake_margin: config.wake_margin(),
            fresh_window: config.fresh_window(),
            runtime: Handle::current(),
        })
    }

    /// Every step leaves the state consistent, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a ticket and trigger a drain pass
    ///
    /// The id is assigned under the lock, so ids follow queue order.
    pub(crate) fn enqueue(self: &Arc<Self>, cancel: CancelToken, completion: Completion) -> u64 {
        let id = {
            let mut state = self.lock();
            let id = state.next_ticket;
            state.next_ticket += 1;
            state.queue.push(WaitQueueEntry::new(id, cancel, completion));
            metrics::QUEUE_DEPTH.set(state.queue.len() as i64);
            trace!(ticket = id, queued = state.queue.len(), "Ticket enqueued");
            id
        };
        self.drain();
        id
    }

    /// Admit as many queued tickets as the quota allows
    ///
    /// Returns immediately if another pass is already running.
    pub(crate) fn drain(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }

        let mut guard = DrainGuard {
            scheduler: self,
            finished: false,
        };

        loop {
            match self.next_step() {
                Step::Idle => break,
                Step::Admit(entry) => {
                    let ticket = entry.id();
                    let waited = entry.waited(Instant::now());
                    metrics::ADMISSIONS_GRANTED_TOTAL.inc();
                    metrics::ADMISSION_WAIT_SECONDS.observe(waited.as_secs_f64());
                    if entry.admit() {
                        debug!(ticket, waited_ms = waited.as_millis() as u64, "Ticket admitted");
                    } else {
                        debug!(ticket, "Ticket admitted but waiter already gone");
                    }
                }
                Step::Discard(entry) => {
                    debug!(ticket = entry.id(), "Cancelled ticket discarded");
                    metrics::ADMISSIONS_CANCELLED_TOTAL.inc();
                    entry.reject();
                }
            }
        }

        // next_step cleared the flag under the lock when it returned Idle
        guard.finished = true;
    }

    /// Decide the next action of the current drain pass
    fn next_step(self: &Arc<Self>) -> Step {
        let mut state = self.lock();

        if state.queue.is_empty() {
            state.draining = false;
            return Step::Idle;
        }

        // The timer is the only thing that restores capacity
        self.arm_timer(&mut state);

        if !state.quota.has_capacity() {
            trace!(queued = state.queue.len(), "No capacity, waiting for wake timer");
            state.draining = false;
            return Step::Idle;
        }

        let Some(entry) = state.queue.pop_head() else {
            state.draining = false;
            return Step::Idle;
        };
        metrics::QUEUE_DEPTH.set(state.queue.len() as i64);

        if entry.is_cancelled() {
            return Step::Discard(entry);
        }

        state.quota.consume();
        metrics::QUOTA_REMAINING.set(i64::from(state.quota.remaining()));
        Step::Admit(entry)
    }

    /// Arm the wake timer for the current reset unless one is pending
    fn arm_timer(self: &Arc<Self>, state: &mut SchedulerState) {
        if let Some(timer) = &state.timer {
            if !timer.handle.is_finished() {
                return;
            }
        }

        let delay = state.quota.wake_delay(Instant::now(), self.wake_margin);
        state.timer_generation += 1;
        let generation = state.timer_generation;

        // Weak so a pending timer never keeps the limiter alive
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.on_timer_fired(generation);
            }
        });

        trace!(generation, delay_ms = delay.as_millis() as u64, "Wake timer armed");
        state.timer = Some(SchedulerTimer { generation, handle });
    }

    /// Refill the quota and resume draining
    fn on_timer_fired(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.lock();
            match &state.timer {
                Some(timer) if timer.generation == generation => {}
                _ => {
                    trace!(generation, "Ignoring disarmed wake timer");
                    return;
                }
            }
            state.timer = None;

            let remaining = state.quota.refill(Instant::now(), self.fresh_window);
            metrics::REFILLS_TOTAL.inc();
            metrics::QUOTA_REMAINING.set(i64::from(remaining));
            debug!(
                remaining,
                limit = state.quota.limit(),
                queued = state.queue.len(),
                "Quota refilled"
            );
        }

        self.drain();
    }

    /// Disarm the pending wake timer, if any
    pub(crate) fn stop_timer(&self) {
        let timer = self.lock().timer.take();
        if let Some(timer) = timer {
            timer.handle.abort();
            debug!(generation = timer.generation, "Wake timer disarmed");
        }
    }

    /// Merge response metadata and resume draining
    pub(crate) fn reconcile(self: &Arc<Self>, metadata: &QuotaMetadata) -> MergeOutcome {
        let outcome = {
            let mut state = self.lock();
            let outcome = self.reconciler.merge(
                &mut state.quota,
                metadata,
                Instant::now(),
                Utc::now().timestamp_millis(),
            );

            match outcome {
                MergeOutcome::Accepted => info!(
                    limit = state.quota.limit(),
                    resets_in_ms = state.quota.time_until_reset(Instant::now()).as_millis() as u64,
                    "Adopted server quota window"
                ),
                MergeOutcome::Stale => debug!(
                    reported_limit = metadata.limit,
                    reported_reset = metadata.reset_epoch_secs,
                    "Ignoring stale quota window"
                ),
                MergeOutcome::OutOfRange => warn!(
                    reported_limit = metadata.limit,
                    reported_reset = metadata.reset_epoch_secs,
                    "Ignoring quota window beyond the reset horizon"
                ),
            }
            outcome
        };

        metrics::METADATA_UPDATES_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();

        self.drain();
        outcome
    }

    pub(crate) fn snapshot(&self) -> QuotaSnapshot {
        let state = self.lock();
        QuotaSnapshot {
            limit: state.quota.limit(),
            remaining: state.quota.remaining(),
            resets_in_ms: state.quota.time_until_reset(Instant::now()).as_millis() as u64,
            queued: state.queue.len(),
            timer_armed: state
                .timer
                .as_ref()
                .is_some_and(|timer| !timer.handle.is_finished()),
        }
    }
}
