use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::warn;

use common::seq_id_type;

use crate::phase::{unix_millis, PhaseTracking, EXECUTION_TIME_UNKNOWN};
use crate::result::{ErrorDetail, ExecResult};

seq_id_type!(RunId);

/// Job category a run belongs to. Carried on every lifecycle event so that
/// consumers caring about one category only can filter on it.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug, Display, Serialize, Deserialize)]
pub enum JobKind {
    #[default]
    #[strum(serialize = "etlGraph")]
    Etl,
    #[strum(serialize = "jobflow")]
    Jobflow,
}

/// Live state of one whole graph execution.
///
/// The tree underneath (phases, nodes, ports) mirrors the graph's static
/// structure and is created eagerly at registration; only numeric fields
/// mutate afterwards, and only from the run's monitor task.
pub struct RunTracking {
    pub run_id: RunId,
    pub graph_name: String,
    pub job_kind: JobKind,
    pub result: ExecResult,
    pub error: Option<ErrorDetail>,
    pub phases: Vec<PhaseTracking>,
    pub start_timestamp_ms: i64,
    pub end_timestamp_ms: i64,

    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    running_phase_idx: Option<usize>,
    last_phase_result: ExecResult,
}

impl RunTracking {
    pub fn new<S: Into<String>>(
        run_id: RunId,
        graph_name: S,
        job_kind: JobKind,
        phases: Vec<PhaseTracking>,
    ) -> Self {
        assert!(
            phases
                .windows(2)
                .all(|pair| pair[0].phase_num < pair[1].phase_num),
            "phase numbers must be strictly increasing"
        );

        Self {
            run_id,
            graph_name: graph_name.into(),
            job_kind,
            result: ExecResult::NotAvailable,
            error: None,
            phases,
            start_timestamp_ms: 0,
            end_timestamp_ms: 0,
            started_at: None,
            finished_at: None,
            running_phase_idx: None,
            last_phase_result: ExecResult::NotAvailable,
        }
    }

    pub fn phase_by_num(&self, phase_num: i32) -> Option<&PhaseTracking> {
        self.phases.iter().find(|phase| phase.phase_num == phase_num)
    }

    pub fn phase_by_num_mut(&mut self, phase_num: i32) -> Option<&mut PhaseTracking> {
        self.phases
            .iter_mut()
            .find(|phase| phase.phase_num == phase_num)
    }

    /// The phase most recently started. Stays addressable after the phase
    /// finishes so that final tracking can still be reported against it.
    pub fn current_phase(&self) -> Option<&PhaseTracking> {
        self.running_phase_idx.map(|idx| &self.phases[idx])
    }

    /// The result reported for the most recently finished phase. The control
    /// layer derives the final run result from it.
    pub fn provisional_result(&self) -> ExecResult {
        self.last_phase_result
    }

    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (None, _) => None,
            (Some(started), Some(finished)) => Some(finished.saturating_duration_since(started)),
            (Some(started), None) => Some(now.saturating_duration_since(started)),
        }
    }

    pub fn execution_time_ms(&self, now: Instant) -> i64 {
        self.elapsed(now)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(EXECUTION_TIME_UNKNOWN)
    }

    pub fn on_run_started(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.start_timestamp_ms = unix_millis();
        self.result = ExecResult::Running;
    }

    pub fn on_phase_started(&mut self, phase_num: i32, now: Instant) {
        let Some(idx) = self
            .phases
            .iter()
            .position(|phase| phase.phase_num == phase_num)
        else {
            warn!(run_id = %self.run_id, phase_num, "phase-started for unknown phase ignored");
            return;
        };

        self.running_phase_idx = Some(idx);
        self.phases[idx].on_started(now);
    }

    /// One sampling pass. Finished phases are frozen and need no resampling,
    /// so this delegates to the currently running phase only.
    pub fn gather(&mut self, now: Instant) {
        if let Some(idx) = self.running_phase_idx {
            if self.phases[idx].is_running() {
                self.phases[idx].gather(now);
            }
        }
    }

    /// Finishes the current phase: one last gather so the final counter
    /// values are captured, then the freeze that zeroes instantaneous rates.
    pub fn on_phase_finished(&mut self, result: ExecResult, now: Instant) {
        let Some(idx) = self.running_phase_idx else {
            warn!(run_id = %self.run_id, "phase-finished with no running phase ignored");
            return;
        };

        let phase = &mut self.phases[idx];
        if phase.is_running() {
            phase.gather(now);
        }
        phase.on_finished(result, now);
        self.last_phase_result = result;
    }

    /// A node reported completion; resample it so its terminal counters are
    /// captured without waiting for the next tick.
    pub fn on_node_finished(&mut self, node_id: &str, now: Instant) {
        let Some(idx) = self.running_phase_idx else {
            return;
        };
        let phase = &mut self.phases[idx];
        let Some(elapsed) = phase.elapsed(now) else {
            return;
        };
        match phase.node_by_id_mut(node_id) {
            Some(node) => node.gather(elapsed, now),
            None => {
                warn!(run_id = %self.run_id, node_id, "node-finished for unknown node ignored")
            }
        }
    }

    pub fn on_run_finished(
        &mut self,
        result: ExecResult,
        error: Option<ErrorDetail>,
        now: Instant,
    ) {
        self.finished_at = Some(now);
        self.end_timestamp_ms = unix_millis();
        self.result = result;
        if result == ExecResult::Error {
            self.error = error;
        }
    }
}

impl std::fmt::Debug for RunTracking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTracking")
            .field("run_id", &self.run_id)
            .field("graph_name", &self.graph_name)
            .field("job_kind", &self.job_kind)
            .field("result", &self.result)
            .field("phases", &self.phases)
            .finish_non_exhaustive()
    }
}
