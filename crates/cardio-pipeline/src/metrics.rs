use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

use cardio_core::error::{EngineError, Result};

/// Atomic pipeline counters.
#[derive(Debug)]
pub struct PipelineMetrics {
    /// Frames handed to the pipeline.
    pub frames_received: AtomicU64,
    /// Frames that passed the display cadence and entered the window.
    pub frames_displayed: AtomicU64,
    /// Frames that were due for an AI cycle.
    pub ai_triggers: AtomicU64,
    /// AI triggers refused because a cycle was already in flight.
    pub ai_dropped: AtomicU64,
    pub cycles_started: AtomicU64,
    pub cycles_completed: AtomicU64,
    /// Cycles that aborted before producing a report.
    pub cycles_failed: AtomicU64,
    /// Cycles whose report belonged to a stopped session.
    pub cycles_discarded: AtomicU64,
    pub gate_rejections: AtomicU64,
    pub inference_failures: AtomicU64,
    /// Completed reports lost to a full result channel.
    pub results_dropped: AtomicU64,
    /// Cumulative wall-clock time of finished cycles in microseconds.
    pub cycle_total_us: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_displayed: u64,
    pub ai_triggers: u64,
    pub ai_dropped: u64,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycles_discarded: u64,
    pub gate_rejections: u64,
    pub inference_failures: u64,
    pub results_dropped: u64,
    pub avg_cycle_us: u64,
}

impl PipelineMetrics {
    /// Allocate a fresh [`PipelineMetrics`] with all counters zeroed.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames_received: AtomicU64::new(0),
            frames_displayed: AtomicU64::new(0),
            ai_triggers: AtomicU64::new(0),
            ai_dropped: AtomicU64::new(0),
            cycles_started: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            cycles_discarded: AtomicU64::new(0),
            gate_rejections: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            results_dropped: AtomicU64::new(0),
            cycle_total_us: AtomicU64::new(0),
        })
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Acquire);
        let finished = load(&self.cycles_completed) + load(&self.cycles_discarded);
        MetricsSnapshot {
            frames_received: load(&self.frames_received),
            frames_displayed: load(&self.frames_displayed),
            ai_triggers: load(&self.ai_triggers),
            ai_dropped: load(&self.ai_dropped),
            cycles_started: load(&self.cycles_started),
            cycles_completed: load(&self.cycles_completed),
            cycles_failed: load(&self.cycles_failed),
            cycles_discarded: load(&self.cycles_discarded),
            gate_rejections: load(&self.gate_rejections),
            inference_failures: load(&self.inference_failures),
            results_dropped: load(&self.results_dropped),
            avg_cycle_us: if finished > 0 {
                load(&self.cycle_total_us) / finished
            } else {
                0
            },
        }
    }

    /// Validate ordering invariants.  Must hold once no cycle is in flight.
    pub fn validate(&self) -> bool {
        let s = self.snapshot();
        s.frames_received >= s.frames_displayed
            && s.frames_received >= s.ai_triggers
            && s.ai_triggers == s.ai_dropped + s.cycles_started
            && s.cycles_started == s.cycles_completed + s.cycles_failed + s.cycles_discarded
            && s.cycles_completed >= s.results_dropped
    }

    pub fn enforce(&self) -> Result<()> {
        if self.validate() {
            return Ok(());
        }
        let s = self.snapshot();
        Err(EngineError::Pipeline(format!(
            "Pipeline counter violation: received={} displayed={} triggers={} dropped={} \
             started={} completed={} failed={} discarded={}",
            s.frames_received,
            s.frames_displayed,
            s.ai_triggers,
            s.ai_dropped,
            s.cycles_started,
            s.cycles_completed,
            s.cycles_failed,
            s.cycles_discarded,
        )))
    }

    pub fn report(&self) {
        let s = self.snapshot();
        info!(
            frames_received = s.frames_received,
            frames_displayed = s.frames_displayed,
            ai_triggers = s.ai_triggers,
            ai_dropped = s.ai_dropped,
            cycles_completed = s.cycles_completed,
            cycles_failed = s.cycles_failed,
            cycles_discarded = s.cycles_discarded,
            gate_rejections = s.gate_rejections,
            inference_failures = s.inference_failures,
            results_dropped = s.results_dropped,
            avg_cycle_us = s.avg_cycle_us,
            "Pipeline summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_are_consistent() {
        let m = PipelineMetrics::new();
        assert!(m.validate());
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn in_flight_cycle_breaks_the_invariant() {
        let m = PipelineMetrics::new();
        PipelineMetrics::bump(&m.frames_received);
        PipelineMetrics::bump(&m.ai_triggers);
        PipelineMetrics::bump(&m.cycles_started);
        assert!(!m.validate());
        assert!(matches!(m.enforce(), Err(EngineError::Pipeline(_))));

        PipelineMetrics::bump(&m.cycles_completed);
        m.cycle_total_us.fetch_add(1_500, Ordering::Relaxed);
        assert!(m.validate());
        assert_eq!(m.snapshot().avg_cycle_us, 1_500);
    }
}
