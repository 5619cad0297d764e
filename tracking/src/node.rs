use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use tracing::warn;

use crate::port::PortTracking;
use crate::result::ExecResult;
use crate::source::NodeProbe;

/// Live per-node state, aggregating the node's ports.
///
/// CPU fields and peaks are monotonically non-decreasing within one run.
pub struct NodeTracking {
    probe: Arc<dyn NodeProbe>,

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
    pub input_ports: Vec<PortTracking>,
    pub output_ports: Vec<PortTracking>,

    // Worker threads are recycled between nodes; the first observation per
    // thread id is the baseline and only the delta counts toward this node.
    initial_cpu_time: HashMap<u64, Duration>,
    initial_user_time: HashMap<u64, Duration>,
    accounting_warned: bool,
}

impl NodeTracking {
    pub fn new<S: Into<String>>(
        node_id: S,
        node_name: S,
        probe: Arc<dyn NodeProbe>,
        input_ports: Vec<PortTracking>,
        output_ports: Vec<PortTracking>,
    ) -> Self {
        Self {
            probe,
            node_id: node_id.into(),
            node_name: node_name.into(),
            result: ExecResult::NotAvailable,
            total_cpu_time: Duration::ZERO,
            total_user_time: Duration::ZERO,
            usage_cpu: 0.0,
            peak_usage_cpu: 0.0,
            usage_user: 0.0,
            peak_usage_user: 0.0,
            used_memory: 0,
            input_ports,
            output_ports,
            initial_cpu_time: HashMap::new(),
            initial_user_time: HashMap::new(),
            accounting_warned: false,
        }
    }

    pub fn has_ports(&self) -> bool {
        !self.input_ports.is_empty() || !self.output_ports.is_empty()
    }

    pub fn input_port(&self, index: usize) -> Option<&PortTracking> {
        self.input_ports.iter().find(|port| port.index == index)
    }

    pub fn output_port(&self, index: usize) -> Option<&PortTracking> {
        self.output_ports.iter().find(|port| port.index == index)
    }

    /// One sampling pass: node result, CPU/user accounting, then all ports.
    ///
    /// `phase_elapsed` is the owning phase's execution time so far; it is the
    /// denominator of the usage fractions.
    pub fn gather(&mut self, phase_elapsed: Duration, now: Instant) {
        self.result = self.probe.result();
        if self.result != ExecResult::Running && self.result != ExecResult::FinishedOk {
            return;
        }

        match self.probe.thread_times() {
            Some(samples) => {
                let mut cpu = Duration::ZERO;
                let mut user = Duration::ZERO;
                for sample in samples {
                    cpu += consume_delta(&mut self.initial_cpu_time, sample.thread_id, sample.cpu);
                    user +=
                        consume_delta(&mut self.initial_user_time, sample.thread_id, sample.user);
                }
                if cpu > self.total_cpu_time {
                    self.total_cpu_time = cpu;
                }
                if user > self.total_user_time {
                    self.total_user_time = user;
                }
            }
            None => {
                if !self.accounting_warned {
                    warn!(
                        node_id = %self.node_id,
                        "thread CPU accounting unsupported, cpu metrics stay at zero"
                    );
                    self.accounting_warned = true;
                }
            }
        }

        if !phase_elapsed.is_zero() {
            self.usage_cpu =
                (self.total_cpu_time.as_secs_f64() / phase_elapsed.as_secs_f64()) as f32;
            self.peak_usage_cpu = self.peak_usage_cpu.max(self.usage_cpu);

            self.usage_user =
                (self.total_user_time.as_secs_f64() / phase_elapsed.as_secs_f64()) as f32;
            self.peak_usage_user = self.peak_usage_user.max(self.usage_user);
        }

        for port in self.input_ports.iter_mut() {
            port.gather(now);
        }
        for port in self.output_ports.iter_mut() {
            port.gather(now);
        }

        self.used_memory = self.probe.used_memory();
    }

    pub fn on_phase_finished(&mut self) {
        for port in self.input_ports.iter_mut() {
            port.on_phase_finished();
        }
        for port in self.output_ports.iter_mut() {
            port.on_phase_finished();
        }
    }
}

/// First observation of a thread id only records the baseline and yields
/// zero; later observations yield time consumed since then.
fn consume_delta(
    baselines: &mut HashMap<u64, Duration>,
    thread_id: u64,
    observed: Duration,
) -> Duration {
    match baselines.get(&thread_id) {
        None => {
            baselines.insert(thread_id, observed);
            Duration::ZERO
        }
        Some(initial) => observed.saturating_sub(*initial),
    }
}

impl std::fmt::Debug for NodeTracking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTracking")
            .field("node_id", &self.node_id)
            .field("node_name", &self.node_name)
            .field("result", &self.result)
            .field("total_cpu_time", &self.total_cpu_time)
            .field("usage_cpu", &self.usage_cpu)
            .field("input_ports", &self.input_ports)
            .field("output_ports", &self.output_ports)
            .finish_non_exhaustive()
    }
}
