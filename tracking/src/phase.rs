use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::node::NodeTracking;
use crate::result::ExecResult;
use crate::source::HeapSampler;

/// Phase number of the implicit initialization phase.
pub const INITIAL_PHASE_NUM: i32 = i32::MIN;
/// Phase number of the implicit finalization phase.
pub const FINAL_PHASE_NUM: i32 = i32::MAX;

/// Execution-time value reported before a phase has started.
pub const EXECUTION_TIME_UNKNOWN: i64 = -1;

/// Live per-phase state: lifecycle timestamps, peak heap usage and the
/// phase's nodes. The node list is fixed at construction.
pub struct PhaseTracking {
    heap: Arc<dyn HeapSampler>,

    pub phase_num: i32,
    pub result: ExecResult,
    pub peak_memory_utilization: u64,
    pub nodes: Vec<NodeTracking>,
    pub start_timestamp_ms: i64,
    pub end_timestamp_ms: i64,

    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl PhaseTracking {
    pub fn new(phase_num: i32, heap: Arc<dyn HeapSampler>, nodes: Vec<NodeTracking>) -> Self {
        Self {
            heap,
            phase_num,
            result: ExecResult::NotAvailable,
            peak_memory_utilization: 0,
            nodes,
            start_timestamp_ms: 0,
            end_timestamp_ms: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.finished_at.is_none()
    }

    pub fn node_by_id(&self, node_id: &str) -> Option<&NodeTracking> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }

    pub fn node_by_id_mut(&mut self, node_id: &str) -> Option<&mut NodeTracking> {
        self.nodes.iter_mut().find(|node| node.node_id == node_id)
    }

    /// Elapsed execution time: live while running, frozen once finished,
    /// `None` before start.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (None, _) => None,
            (Some(started), Some(finished)) => Some(finished.saturating_duration_since(started)),
            (Some(started), None) => Some(now.saturating_duration_since(started)),
        }
    }

    /// Execution time in milliseconds, [`EXECUTION_TIME_UNKNOWN`] before
    /// start.
    pub fn execution_time_ms(&self, now: Instant) -> i64 {
        self.elapsed(now)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(EXECUTION_TIME_UNKNOWN)
    }

    pub fn on_started(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.start_timestamp_ms = unix_millis();
    }

    /// One sampling pass: heap peak, then all nodes.
    pub fn gather(&mut self, now: Instant) {
        self.peak_memory_utilization = self.peak_memory_utilization.max(self.heap.heap_used());

        let elapsed = self.elapsed(now).unwrap_or(Duration::ZERO);
        for node in self.nodes.iter_mut() {
            node.gather(elapsed, now);
        }
    }

    /// Freezes the phase with its terminal result and zeroes the
    /// instantaneous rates of every port underneath it.
    pub fn on_finished(&mut self, result: ExecResult, now: Instant) {
        self.finished_at = Some(now);
        self.end_timestamp_ms = unix_millis();
        self.result = result;

        for node in self.nodes.iter_mut() {
            node.on_phase_finished();
        }
    }
}

pub(crate) fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_millis() as i64)
        .unwrap_or(0)
}

impl std::fmt::Debug for PhaseTracking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseTracking")
            .field("phase_num", &self.phase_num)
            .field("result", &self.result)
            .field("peak_memory_utilization", &self.peak_memory_utilization)
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}
