//! Display/AI cadence, the single-flight AI guard, and per-model decimation.
//!
//! ```text
//!  frame ─► CadenceGate(display) ─► FrameWindow
//!        └► CadenceGate(ai) ─► InFlight::try_acquire ─► cycle
//!                                  │ busy
//!                                  └─► dropped (never queued)
//! ```
//!
//! Cadence is measured on frame timestamps, so replay and live capture pace
//! identically and tests need no wall clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

// ─── Cadence ────────────────────────────────────────────────────────────────

/// Fires at most once per `interval_us` of frame time.
#[derive(Clone, Debug)]
pub struct CadenceGate {
    interval_us: i64,
    last_us: Option<i64>,
}

impl CadenceGate {
    pub fn new(interval_us: i64) -> Self {
        Self {
            interval_us: interval_us.max(0),
            last_us: None,
        }
    }

    /// Whether a frame stamped `timestamp_us` is due.  A due frame becomes
    /// the new reference point.
    ///
    /// Fires on the first frame, once the interval has elapsed, and whenever
    /// the clock runs backwards (source restart).
    pub fn is_due(&mut self, timestamp_us: i64) -> bool {
        let due = match self.last_us {
            None => true,
            Some(last) if timestamp_us < last => true,
            Some(last) => timestamp_us - last >= self.interval_us,
        };
        if due {
            self.last_us = Some(timestamp_us);
        }
        due
    }

    pub fn reset(&mut self) {
        self.last_us = None;
    }
}

// ─── Single-flight guard ────────────────────────────────────────────────────

/// At most one AI cycle in flight.  A second acquire while busy fails
/// immediately instead of waiting.
#[derive(Clone, Debug, Default)]
pub struct InFlight {
    inner: Arc<InFlightInner>,
}

#[derive(Debug, Default)]
struct InFlightInner {
    busy: AtomicBool,
    idle: Notify,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<InFlightPermit> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightPermit {
                inner: Arc::clone(&self.inner),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Resolve once no cycle is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await is not missed.
            notified.as_mut().enable();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }
}

/// Held by the running cycle; dropping it frees the slot.
#[derive(Debug)]
pub struct InFlightPermit {
    inner: Arc<InFlightInner>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.inner.busy.store(false, Ordering::Release);
        self.inner.idle.notify_waiters();
    }
}

// ─── Decimation ─────────────────────────────────────────────────────────────

/// Runs on every `every`-th cycle, starting with the first.  `0` and `1`
/// both mean "every cycle".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decimator {
    every: u32,
}

impl Decimator {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
        }
    }

    pub fn runs_on(&self, cycle: u64) -> bool {
        cycle % u64::from(self.every) == 0
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────────────

/// What one incoming frame is due for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tick {
    pub display: bool,
    pub ai: bool,
}

/// Which models one AI cycle runs.  The multi-output head runs every cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CyclePlan {
    pub index: u64,
    pub run_segmentation: bool,
    pub run_ejection_fraction: bool,
}

#[derive(Clone, Debug)]
pub struct PipelineScheduler {
    display: CadenceGate,
    ai: CadenceGate,
    segmentation: Decimator,
    ejection_fraction: Decimator,
    next_cycle: u64,
}

impl PipelineScheduler {
    pub fn new(
        display_interval_us: i64,
        ai_interval_us: i64,
        segmentation_every: u32,
        ef_every: u32,
    ) -> Self {
        Self {
            display: CadenceGate::new(display_interval_us),
            ai: CadenceGate::new(ai_interval_us),
            segmentation: Decimator::new(segmentation_every),
            ejection_fraction: Decimator::new(ef_every),
            next_cycle: 0,
        }
    }

    /// Classify one frame.  An AI tick implies nothing about whether a
    /// cycle actually starts; that depends on the in-flight guard.
    pub fn on_frame(&mut self, timestamp_us: i64) -> Tick {
        Tick {
            display: self.display.is_due(timestamp_us),
            ai: self.ai.is_due(timestamp_us),
        }
    }

    /// Allocate the next cycle.  Call only for cycles that start.
    pub fn plan_cycle(&mut self) -> CyclePlan {
        let index = self.next_cycle;
        self.next_cycle += 1;
        CyclePlan {
            index,
            run_segmentation: self.segmentation.runs_on(index),
            run_ejection_fraction: self.ejection_fraction.runs_on(index),
        }
    }

    /// Forget cadence history and restart decimation at cycle 0.
    pub fn reset(&mut self) {
        self.display.reset();
        self.ai.reset();
        self.next_cycle = 0;
    }
}
