use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::error;

use common::Shared;

use crate::endpoint::{EventKind, MonitorEndpoint, TrackingEvent};
use crate::result::{ErrorDetail, ExecResult};
use crate::run::{JobKind, RunId, RunTracking};

/// Control messages driven into a run's monitor task by the execution-control
/// layer.
#[derive(Debug)]
pub enum MonitorMessage {
    RunStarted,
    PhaseStarted { phase_num: i32 },
    NodeFinished { node_id: String },
    PhaseFinished { result: ExecResult },
    RunFinished {
        result: ExecResult,
        error: Option<ErrorDetail>,
    },
    Gather,
    Exit,
}

/// Per-run monitor: the one and only writer of that run's live tracking
/// tree.
///
/// Gathers at the configured sample interval and on every lifecycle
/// transition, republishing each transition as a [`TrackingEvent`]. The
/// interval handle is re-read every tick, so
/// [`MonitorEndpoint::set_sample_interval`] applies immediately.
#[derive(Debug)]
pub struct Monitor {
    task_handle: Option<JoinHandle<()>>,
    tx: UnboundedSender<MonitorMessage>,
}

impl Monitor {
    pub fn spawn(
        endpoint: MonitorEndpoint,
        live: Shared<RunTracking>,
        sample_interval_ms: Arc<AtomicU64>,
    ) -> Self {
        let (tx, rx) = unbounded_channel::<MonitorMessage>();
        let task_handle: JoinHandle<()> = tokio::spawn(async move {
            monitor_loop(rx, live, endpoint, sample_interval_ms).await;
        });

        Self {
            task_handle: Some(task_handle),
            tx,
        }
    }

    pub fn send(&self, msg: MonitorMessage) {
        self.tx.send(msg).unwrap();
    }

    pub fn run_started(&self) {
        self.send(MonitorMessage::RunStarted);
    }

    pub fn phase_started(&self, phase_num: i32) {
        self.send(MonitorMessage::PhaseStarted { phase_num });
    }

    pub fn node_finished<S: Into<String>>(&self, node_id: S) {
        self.send(MonitorMessage::NodeFinished {
            node_id: node_id.into(),
        });
    }

    pub fn phase_finished(&self, result: ExecResult) {
        self.send(MonitorMessage::PhaseFinished { result });
    }

    pub fn run_finished(&self, result: ExecResult, error: Option<ErrorDetail>) {
        self.send(MonitorMessage::RunFinished { result, error });
    }

    /// Forces a gather outside the periodic schedule.
    pub fn gather_now(&self) {
        self.send(MonitorMessage::Gather);
    }

    pub fn exit(&mut self) {
        // The task also ends on RunFinished; this tolerates both orders.
        let _ = self.tx.send(MonitorMessage::Exit);
        self.task_handle.take();
    }

    /// Waits for the monitor task to terminate. Intended for orderly
    /// teardown after [`Monitor::run_finished`].
    pub async fn join(&mut self) {
        if let Some(task_handle) = self.task_handle.take() {
            if let Err(join_error) = task_handle.await {
                error!("Monitor task failed: {}", join_error);
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.task_handle.is_some() {
            error!("Monitor dropped while the task is still running; call Monitor::exit() first");
        }
    }
}

async fn monitor_loop(
    mut rx: UnboundedReceiver<MonitorMessage>,
    live: Shared<RunTracking>,
    endpoint: MonitorEndpoint,
    sample_interval_ms: Arc<AtomicU64>,
) {
    let (run_id, job_kind) = {
        let run = live.read();
        (run.run_id, run.job_kind)
    };

    'monitor: loop {
        let interval = Duration::from_millis(sample_interval_ms.load(Ordering::Relaxed).max(1));

        let msg = tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break 'monitor };
                Some(msg)
            }
            _ = tokio::time::sleep(interval) => None,
        };

        let now = Instant::now();
        match msg {
            // Periodic tick: resample the running phase.
            None => {
                let gathered = {
                    let mut run = live.write();
                    let running = run.result.is_running();
                    if running {
                        run.gather(now);
                    }
                    running
                };
                if gathered {
                    publish(&endpoint, run_id, job_kind, EventKind::TrackingUpdated);
                }
            }
            Some(MonitorMessage::Exit) => break 'monitor,
            Some(MonitorMessage::Gather) => {
                live.write().gather(now);
                publish(&endpoint, run_id, job_kind, EventKind::TrackingUpdated);
            }
            Some(MonitorMessage::RunStarted) => {
                live.write().on_run_started(now);
                publish(&endpoint, run_id, job_kind, EventKind::RunStarted);
            }
            Some(MonitorMessage::PhaseStarted { phase_num }) => {
                live.write().on_phase_started(phase_num, now);
                publish(&endpoint, run_id, job_kind, EventKind::PhaseStarted { phase_num });
            }
            Some(MonitorMessage::NodeFinished { node_id }) => {
                live.write().on_node_finished(&node_id, now);
                publish(&endpoint, run_id, job_kind, EventKind::NodeFinished { node_id });
            }
            Some(MonitorMessage::PhaseFinished { result }) => {
                let phase_num = {
                    let mut run = live.write();
                    run.on_phase_finished(result, now);
                    run.current_phase().map(|phase| phase.phase_num)
                };
                if let Some(phase_num) = phase_num {
                    publish(
                        &endpoint,
                        run_id,
                        job_kind,
                        EventKind::PhaseFinished { phase_num, result },
                    );
                }
            }
            Some(MonitorMessage::RunFinished { result, error }) => {
                live.write().on_run_finished(result, error, now);
                publish(&endpoint, run_id, job_kind, EventKind::RunFinished { result });
                break 'monitor;
            }
        }
    }
}

fn publish(endpoint: &MonitorEndpoint, run_id: RunId, job_kind: JobKind, kind: EventKind) {
    endpoint.publish(TrackingEvent {
        run_id,
        job_kind,
        kind,
    });
}
