use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::source::PortCounters;

/// Samples closer together than this are discarded as noise; totals still
/// advance but the flow/peak computation keeps its previous value.
pub const MIN_TIMESLICE: Duration = Duration::from_millis(100);

const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, Serialize, Deserialize)]
pub enum PortKind {
    #[strum(serialize = "In")]
    Input,
    #[strum(serialize = "Out")]
    Output,
}

/// Direction-specific metrics carried on top of the common port fields.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PortDetail {
    Input {
        used_memory: i32,
        reader_waiting_time: Duration,
    },
    Output {
        writer_waiting_time: Duration,
    },
}

impl PortDetail {
    pub fn kind(&self) -> PortKind {
        match self {
            PortDetail::Input { .. } => PortKind::Input,
            PortDetail::Output { .. } => PortKind::Output,
        }
    }
}

/// Live per-port state.
///
/// Holds a handle into the engine's edge buffer for zero-overhead counter
/// reads, which is exactly why it must never cross a serialization boundary;
/// see [`crate::snapshot::PortSnapshot`] for the decoupled mirror.
pub struct PortTracking {
    counters: Arc<dyn PortCounters>,

    pub index: usize,
    pub total_records: u64,
    pub total_bytes: u64,
    pub record_flow: u64,
    pub record_peak: u64,
    pub byte_flow: u64,
    pub byte_peak: u64,
    pub waiting_records: i32,
    pub average_waiting_records: i32,
    pub detail: PortDetail,

    last_sample_at: Option<Instant>,
}

impl PortTracking {
    pub fn input(index: usize, counters: Arc<dyn PortCounters>) -> Self {
        Self::new(
            index,
            counters,
            PortDetail::Input {
                used_memory: 0,
                reader_waiting_time: Duration::ZERO,
            },
        )
    }

    pub fn output(index: usize, counters: Arc<dyn PortCounters>) -> Self {
        Self::new(
            index,
            counters,
            PortDetail::Output {
                writer_waiting_time: Duration::ZERO,
            },
        )
    }

    fn new(index: usize, counters: Arc<dyn PortCounters>, detail: PortDetail) -> Self {
        Self {
            counters,
            index,
            total_records: 0,
            total_bytes: 0,
            record_flow: 0,
            record_peak: 0,
            byte_flow: 0,
            byte_peak: 0,
            waiting_records: 0,
            average_waiting_records: 0,
            detail,
            last_sample_at: None,
        }
    }

    pub fn kind(&self) -> PortKind {
        self.detail.kind()
    }

    /// One sampling pass over the port's counters.
    ///
    /// Flows are records(bytes)-per-second computed over the interval since
    /// the last accepted sample; intervals under [`MIN_TIMESLICE`] are
    /// rejected and keep the previous flow values.
    pub fn gather(&mut self, now: Instant) {
        let new_total_records = self.counters.total_records();
        let new_total_bytes = self.counters.total_bytes();

        match self.last_sample_at {
            None => self.last_sample_at = Some(now),
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed > MIN_TIMESLICE {
                    self.record_flow =
                        flow_per_sec(new_total_records.saturating_sub(self.total_records), elapsed);
                    self.record_peak = self.record_peak.max(self.record_flow);

                    self.byte_flow =
                        flow_per_sec(new_total_bytes.saturating_sub(self.total_bytes), elapsed);
                    self.byte_peak = self.byte_peak.max(self.byte_flow);

                    self.last_sample_at = Some(now);
                }
            }
        }

        self.total_records = new_total_records;
        self.total_bytes = new_total_bytes;

        self.waiting_records = self.counters.waiting_records();
        // Historical smoother, kept verbatim: moves halfway toward the
        // absolute difference, collapsing sign information.
        self.average_waiting_records =
            (self.waiting_records - self.average_waiting_records).abs() / 2;

        match &mut self.detail {
            PortDetail::Input {
                used_memory,
                reader_waiting_time,
            } => {
                *used_memory = self.counters.buffer_memory_used();
                *reader_waiting_time = self.counters.reader_waiting_time();
            }
            PortDetail::Output {
                writer_waiting_time,
            } => {
                *writer_waiting_time = self.counters.writer_waiting_time();
            }
        }
    }

    /// The port is no longer producing; instantaneous rates zero out while
    /// totals and peaks are preserved for historical reporting.
    pub fn on_phase_finished(&mut self) {
        self.record_flow = 0;
        self.byte_flow = 0;
    }
}

fn flow_per_sec(delta: u64, elapsed: Duration) -> u64 {
    let elapsed_ns = elapsed.as_nanos().max(1);
    ((delta as u128) * NANOS_PER_SEC / elapsed_ns) as u64
}

impl std::fmt::Debug for PortTracking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortTracking")
            .field("index", &self.index)
            .field("kind", &self.kind())
            .field("total_records", &self.total_records)
            .field("total_bytes", &self.total_bytes)
            .field("record_flow", &self.record_flow)
            .field("record_peak", &self.record_peak)
            .field("byte_flow", &self.byte_flow)
            .field("byte_peak", &self.byte_peak)
            .field("waiting_records", &self.waiting_records)
            .finish_non_exhaustive()
    }
}
