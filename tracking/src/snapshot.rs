use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::node::NodeTracking;
use crate::phase::PhaseTracking;
use crate::port::{PortDetail, PortKind, PortTracking};
use crate::result::{ErrorDetail, ExecResult};
use crate::run::{JobKind, RunId, RunTracking};

/// Point-in-time copy of one port's metrics. Plain data, no engine handles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub index: usize,
    pub kind: PortKind,
    pub total_records: u64,
    pub total_bytes: u64,
    pub record_flow: u64,
    pub record_peak: u64,
    pub byte_flow: u64,
    pub byte_peak: u64,
    pub waiting_records: i32,
    pub average_waiting_records: i32,
    pub detail: PortDetail,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub node_name: String,
    pub result: ExecResult,
    pub total_cpu_time: Duration,
    pub total_user_time: Duration,
    pub usage_cpu: f32,
    pub peak_usage_cpu: f32,
    pub usage_user: f32,
    pub peak_usage_user: f32,
    pub used_memory: i64,
    pub input_ports: Vec<PortSnapshot>,
    pub output_ports: Vec<PortSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub phase_num: i32,
    pub result: ExecResult,
    pub execution_time_ms: i64,
    pub peak_memory_utilization: u64,
    pub nodes: Vec<NodeSnapshot>,
}

/// Immutable, fully serializable copy of a run's whole tracking tree.
///
/// Built on demand for transmission to remote monitoring clients; it never
/// changes after creation and stays valid after the run ends or is evicted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub graph_name: String,
    pub job_kind: JobKind,
    pub result: ExecResult,
    pub error: Option<ErrorDetail>,
    pub start_timestamp_ms: i64,
    pub end_timestamp_ms: i64,
    pub execution_time_ms: i64,
    pub current_phase_num: Option<i32>,
    pub phases: Vec<PhaseSnapshot>,
}

impl PortSnapshot {
    pub fn capture(port: &PortTracking) -> Self {
        Self {
            index: port.index,
            kind: port.kind(),
            total_records: port.total_records,
            total_bytes: port.total_bytes,
            record_flow: port.record_flow,
            record_peak: port.record_peak,
            byte_flow: port.byte_flow,
            byte_peak: port.byte_peak,
            waiting_records: port.waiting_records,
            average_waiting_records: port.average_waiting_records,
            detail: port.detail,
        }
    }
}

impl NodeSnapshot {
    pub fn capture(node: &NodeTracking) -> Self {
        Self {
            node_id: node.node_id.clone(),
            node_name: node.node_name.clone(),
            result: node.result,
            total_cpu_time: node.total_cpu_time,
            total_user_time: node.total_user_time,
            usage_cpu: node.usage_cpu,
            peak_usage_cpu: node.peak_usage_cpu,
            usage_user: node.usage_user,
            peak_usage_user: node.peak_usage_user,
            used_memory: node.used_memory,
            input_ports: node.input_ports.iter().map(PortSnapshot::capture).collect(),
            output_ports: node.output_ports.iter().map(PortSnapshot::capture).collect(),
        }
    }
}

impl PhaseSnapshot {
    pub fn capture(phase: &PhaseTracking, now: Instant) -> Self {
        Self {
            phase_num: phase.phase_num,
            result: phase.result,
            execution_time_ms: phase.execution_time_ms(now),
            peak_memory_utilization: phase.peak_memory_utilization,
            nodes: phase.nodes.iter().map(NodeSnapshot::capture).collect(),
        }
    }
}

impl RunSnapshot {
    pub fn capture(run: &RunTracking, now: Instant) -> Self {
        Self {
            run_id: run.run_id,
            graph_name: run.graph_name.clone(),
            job_kind: run.job_kind,
            result: run.result,
            error: run.error.clone(),
            start_timestamp_ms: run.start_timestamp_ms,
            end_timestamp_ms: run.end_timestamp_ms,
            execution_time_ms: run.execution_time_ms(now),
            current_phase_num: run.current_phase().map(|phase| phase.phase_num),
            phases: run
                .phases
                .iter()
                .map(|phase| PhaseSnapshot::capture(phase, now))
                .collect(),
        }
    }

    pub fn phase(&self, phase_num: i32) -> Option<&PhaseSnapshot> {
        self.phases.iter().find(|phase| phase.phase_num == phase_num)
    }

    /// The wire encoding handed to remote clients.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl PhaseSnapshot {
    pub fn node(&self, node_id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }
}
