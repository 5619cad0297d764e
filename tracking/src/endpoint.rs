use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use common::Shared;

use crate::result::ExecResult;
use crate::run::{JobKind, RunId, RunTracking};
use crate::snapshot::{NodeSnapshot, PhaseSnapshot, RunSnapshot};
use crate::source::RunControl;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointError {
    #[error("run {0} is not registered")]
    RunNotFound(RunId),
    #[error("run {0} is already registered")]
    AlreadyRegistered(RunId),
    #[error("run {run_id} has no phase {phase_num}")]
    PhaseNotFound { run_id: RunId, phase_num: i32 },
    #[error("run {run_id} phase {phase_num} has no node {node_id}")]
    NodeNotFound {
        run_id: RunId,
        phase_num: i32,
        node_id: String,
    },
}

pub type EndpointResult<T> = std::result::Result<T, EndpointError>;

/// Lifecycle notification broadcast to subscribers.
///
/// One event type for all job categories; `job_kind` replaces the legacy
/// per-kind notification names, which remain reconstructible at the
/// transport boundary from `kind` + `job_kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub run_id: RunId,
    pub job_kind: JobKind,
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq, Display, Serialize, Deserialize)]
pub enum EventKind {
    RunStarted,
    TrackingUpdated,
    PhaseStarted { phase_num: i32 },
    NodeFinished { node_id: String },
    PhaseFinished { phase_num: i32, result: ExecResult },
    RunFinished { result: ExecResult },
}

struct RegisteredRun {
    live: Shared<RunTracking>,
    control: Arc<dyn RunControl>,
    sample_interval_ms: Arc<AtomicU64>,
}

struct Subscriber {
    filter: Box<dyn Fn(RunId) -> bool + Send + Sync>,
    tx: UnboundedSender<TrackingEvent>,
}

struct EndpointInner {
    runs: RwLock<HashMap<RunId, RegisteredRun>>,
    subscribers: RwLock<Vec<Subscriber>>,
}

/// Process-wide monitoring endpoint: the multi-run registry plus the
/// notification channel that routes queries, commands and lifecycle events
/// by run id.
///
/// Explicitly constructed and injected, never a singleton, so independent
/// instances can coexist in tests. The registry is the single structure in
/// the subsystem mutated from multiple threads; everything else is per-run,
/// single-writer state.
#[derive(Clone)]
pub struct MonitorEndpoint {
    inner: Arc<EndpointInner>,
}

impl Default for MonitorEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorEndpoint {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                runs: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Informational engine identification for remote clients.
    pub fn engine_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn register_run(
        &self,
        live: Shared<RunTracking>,
        control: Arc<dyn RunControl>,
    ) -> EndpointResult<()> {
        let run_id = live.read().run_id;
        let mut runs = self.inner.runs.write();
        if runs.contains_key(&run_id) {
            return Err(EndpointError::AlreadyRegistered(run_id));
        }

        runs.insert(
            run_id,
            RegisteredRun {
                live,
                control,
                sample_interval_ms: Arc::new(AtomicU64::new(
                    DEFAULT_SAMPLE_INTERVAL.as_millis() as u64
                )),
            },
        );
        Ok(())
    }

    /// Evicts a run. Unknown ids are reported but harmless; other
    /// registered runs are untouched.
    pub fn unregister_run(&self, run_id: RunId) -> EndpointResult<()> {
        match self.inner.runs.write().remove(&run_id) {
            Some(_) => Ok(()),
            None => {
                warn!(%run_id, "unregister of unknown run");
                Err(EndpointError::RunNotFound(run_id))
            }
        }
    }

    pub fn registered_runs(&self) -> Vec<RunId> {
        self.inner.runs.read().keys().copied().collect()
    }

    /// Full deep-copy snapshot of the run's live tree.
    pub fn snapshot(&self, run_id: RunId) -> EndpointResult<RunSnapshot> {
        let runs = self.inner.runs.read();
        let run = runs.get(&run_id).ok_or(EndpointError::RunNotFound(run_id))?;
        let live = run.live.read();
        Ok(RunSnapshot::capture(&live, Instant::now()))
    }

    pub fn phase_snapshot(&self, run_id: RunId, phase_num: i32) -> EndpointResult<PhaseSnapshot> {
        let runs = self.inner.runs.read();
        let run = runs.get(&run_id).ok_or(EndpointError::RunNotFound(run_id))?;
        let live = run.live.read();
        let phase = live
            .phase_by_num(phase_num)
            .ok_or(EndpointError::PhaseNotFound { run_id, phase_num })?;
        Ok(PhaseSnapshot::capture(phase, Instant::now()))
    }

    pub fn node_snapshot(
        &self,
        run_id: RunId,
        phase_num: i32,
        node_id: &str,
    ) -> EndpointResult<NodeSnapshot> {
        let runs = self.inner.runs.read();
        let run = runs.get(&run_id).ok_or(EndpointError::RunNotFound(run_id))?;
        let live = run.live.read();
        let phase = live
            .phase_by_num(phase_num)
            .ok_or(EndpointError::PhaseNotFound { run_id, phase_num })?;
        let node = phase
            .node_by_id(node_id)
            .ok_or_else(|| EndpointError::NodeNotFound {
                run_id,
                phase_num,
                node_id: node_id.to_string(),
            })?;
        Ok(NodeSnapshot::capture(node))
    }

    /// Forwards an abort request to the run's execution-control layer. The
    /// resulting terminal state arrives later through the normal lifecycle
    /// callbacks.
    pub fn abort_run(&self, run_id: RunId, wait_for_completion: bool) -> EndpointResult<()> {
        let control = {
            let runs = self.inner.runs.read();
            let run = runs.get(&run_id).ok_or(EndpointError::RunNotFound(run_id))?;
            Arc::clone(&run.control)
        };
        control.abort(wait_for_completion);
        Ok(())
    }

    pub fn set_sample_interval(&self, run_id: RunId, interval: Duration) -> EndpointResult<()> {
        let runs = self.inner.runs.read();
        let run = runs.get(&run_id).ok_or(EndpointError::RunNotFound(run_id))?;
        run.sample_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn sample_interval(&self, run_id: RunId) -> EndpointResult<Duration> {
        let runs = self.inner.runs.read();
        let run = runs.get(&run_id).ok_or(EndpointError::RunNotFound(run_id))?;
        Ok(Duration::from_millis(
            run.sample_interval_ms.load(Ordering::Relaxed),
        ))
    }

    /// Live handle to the run's sample interval, read by the run's monitor
    /// task every tick so interval changes apply without re-registration.
    pub fn sample_interval_handle(&self, run_id: RunId) -> EndpointResult<Arc<AtomicU64>> {
        let runs = self.inner.runs.read();
        let run = runs.get(&run_id).ok_or(EndpointError::RunNotFound(run_id))?;
        Ok(Arc::clone(&run.sample_interval_ms))
    }

    /// Write handle to the run's live tree, for the run's monitor task.
    pub fn live_run(&self, run_id: RunId) -> EndpointResult<Shared<RunTracking>> {
        let runs = self.inner.runs.read();
        let run = runs.get(&run_id).ok_or(EndpointError::RunNotFound(run_id))?;
        Ok(run.live.clone())
    }

    /// Subscribes to lifecycle events. The filter runs on the publisher
    /// side, so a client monitoring run A never observes events of run B.
    pub fn subscribe<F>(&self, filter: F) -> UnboundedReceiver<TrackingEvent>
    where
        F: Fn(RunId) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = unbounded_channel();
        self.inner.subscribers.write().push(Subscriber {
            filter: Box::new(filter),
            tx,
        });
        rx
    }

    /// Broadcasts an event to all subscribers whose filter accepts its run
    /// id. Subscribers whose receiver is gone are dropped.
    pub fn publish(&self, event: TrackingEvent) {
        self.inner.subscribers.write().retain(|subscriber| {
            if (subscriber.filter)(event.run_id) {
                subscriber.tx.send(event.clone()).is_ok()
            } else {
                !subscriber.tx.is_closed()
            }
        });
    }
}

impl std::fmt::Debug for MonitorEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorEndpoint")
            .field("runs", &self.registered_runs())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use common::Shared;

    use crate::endpoint::{
        EndpointError, EventKind, MonitorEndpoint, TrackingEvent, DEFAULT_SAMPLE_INTERVAL,
    };
    use crate::run::{JobKind, RunId};
    use crate::tests::mocks::{build_run, StubControl};

    fn register(endpoint: &MonitorEndpoint, run_id: u64, name: &str) -> (RunId, Arc<StubControl>) {
        let run_id = RunId::from_u64(run_id);
        let fixture = build_run(run_id, name, &[(0, &[(1, 1)])]);
        let control = Arc::new(StubControl::default());
        endpoint
            .register_run(Shared::new(fixture.tracking), control.clone())
            .unwrap();
        (run_id, control)
    }

    #[test]
    fn runs_are_isolated_by_id() {
        let endpoint = MonitorEndpoint::new();
        let (run_a, _) = register(&endpoint, 1, "orders");
        let (run_b, _) = register(&endpoint, 2, "invoices");

        let snapshot_a = endpoint.snapshot(run_a).unwrap();
        assert_eq!(snapshot_a.run_id, run_a);
        assert_eq!(snapshot_a.graph_name, "orders");

        let snapshot_b = endpoint.snapshot(run_b).unwrap();
        assert_eq!(snapshot_b.graph_name, "invoices");

        let missing = RunId::from_u64(3);
        assert_eq!(
            endpoint.snapshot(missing),
            Err(EndpointError::RunNotFound(missing))
        );
    }

    #[test]
    fn duplicate_registration_rejected() {
        let endpoint = MonitorEndpoint::new();
        let (run_a, _) = register(&endpoint, 1, "orders");

        let fixture = build_run(run_a, "impostor", &[(0, &[(0, 0)])]);
        let control = Arc::new(StubControl::default());
        assert_eq!(
            endpoint.register_run(Shared::new(fixture.tracking), control),
            Err(EndpointError::AlreadyRegistered(run_a))
        );

        // The existing run is untouched.
        assert_eq!(endpoint.snapshot(run_a).unwrap().graph_name, "orders");
    }

    #[test]
    fn unregister_is_idempotent_and_isolated() {
        let endpoint = MonitorEndpoint::new();
        let (run_a, _) = register(&endpoint, 1, "orders");
        let (run_b, _) = register(&endpoint, 2, "invoices");

        assert!(endpoint.unregister_run(run_a).is_ok());
        assert_eq!(
            endpoint.unregister_run(run_a),
            Err(EndpointError::RunNotFound(run_a))
        );

        assert!(endpoint.snapshot(run_b).is_ok());
    }

    #[test]
    fn phase_and_node_snapshot_queries() {
        let endpoint = MonitorEndpoint::new();
        let (run_a, _) = register(&endpoint, 1, "orders");

        let phase = endpoint.phase_snapshot(run_a, 0).unwrap();
        assert_eq!(phase.phase_num, 0);

        let node = endpoint.node_snapshot(run_a, 0, "N0_0").unwrap();
        assert_eq!(node.node_id, "N0_0");

        assert_eq!(
            endpoint.phase_snapshot(run_a, 9),
            Err(EndpointError::PhaseNotFound {
                run_id: run_a,
                phase_num: 9
            })
        );
        assert_eq!(
            endpoint.node_snapshot(run_a, 0, "NOPE"),
            Err(EndpointError::NodeNotFound {
                run_id: run_a,
                phase_num: 0,
                node_id: "NOPE".to_string()
            })
        );
    }

    #[test]
    fn abort_is_forwarded_to_the_control_layer() {
        let endpoint = MonitorEndpoint::new();
        let (run_a, control) = register(&endpoint, 1, "orders");

        endpoint.abort_run(run_a, true).unwrap();
        endpoint.abort_run(run_a, false).unwrap();
        assert_eq!(control.abort_calls(), [true, false]);

        let missing = RunId::from_u64(9);
        assert_eq!(
            endpoint.abort_run(missing, true),
            Err(EndpointError::RunNotFound(missing))
        );
    }

    #[test]
    fn sample_interval_roundtrip() {
        let endpoint = MonitorEndpoint::new();
        let (run_a, _) = register(&endpoint, 1, "orders");

        assert_eq!(
            endpoint.sample_interval(run_a).unwrap(),
            DEFAULT_SAMPLE_INTERVAL
        );

        endpoint
            .set_sample_interval(run_a, Duration::from_millis(250))
            .unwrap();
        assert_eq!(
            endpoint.sample_interval(run_a).unwrap(),
            Duration::from_millis(250)
        );

        // The monitor-side handle observes the change without re-resolving.
        let handle = endpoint.sample_interval_handle(run_a).unwrap();
        endpoint
            .set_sample_interval(run_a, Duration::from_millis(70))
            .unwrap();
        assert_eq!(handle.load(std::sync::atomic::Ordering::Relaxed), 70);
    }

    #[test]
    fn subscribers_only_see_filtered_runs() {
        let endpoint = MonitorEndpoint::new();
        let run_a = RunId::from_u64(1);
        let run_b = RunId::from_u64(2);

        let mut rx_a = endpoint.subscribe(move |id| id == run_a);
        let mut rx_all = endpoint.subscribe(|_| true);

        endpoint.publish(TrackingEvent {
            run_id: run_a,
            job_kind: JobKind::Etl,
            kind: EventKind::RunStarted,
        });
        endpoint.publish(TrackingEvent {
            run_id: run_b,
            job_kind: JobKind::Jobflow,
            kind: EventKind::RunStarted,
        });

        let only = rx_a.try_recv().unwrap();
        assert_eq!(only.run_id, run_a);
        assert!(rx_a.try_recv().is_err());

        assert_eq!(rx_all.try_recv().unwrap().run_id, run_a);
        assert_eq!(rx_all.try_recv().unwrap().run_id, run_b);
    }

    #[test]
    fn engine_version_reported() {
        let endpoint = MonitorEndpoint::new();
        assert_eq!(endpoint.engine_version(), env!("CARGO_PKG_VERSION"));
    }
}
