
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Shared;

use crate::endpoint::MonitorEndpoint;
use crate::monitor::Monitor;
use crate::result::{ErrorDetail, ExecResult};
use crate::run::RunId;
use crate::snapshot::RunSnapshot;
use crate::tests::mocks::{build_run, StubControl};

#[test]
fn fresh_registration_mirrors_graph_structure() {
    let shape: &[(i32, &[(usize, usize)])] = &[
        (0, &[(0, 2), (1, 1)]),
        (1, &[(2, 1)]),
        (2, &[(1, 0), (1, 0), (2, 2)]),
    ];
    let fixture = build_run(RunId::from_u64(100), "warehouse", shape);
    let run = &fixture.tracking;

    assert_eq!(run.result, ExecResult::NotAvailable);
    assert_eq!(run.phases.len(), 3);

    for (phase, (phase_num, nodes)) in run.phases.iter().zip(shape) {
        assert_eq!(phase.phase_num, *phase_num);
        assert_eq!(phase.result, ExecResult::NotAvailable);
        assert_eq!(phase.peak_memory_utilization, 0);
        assert_eq!(phase.nodes.len(), nodes.len());

        for (node, &(input_count, output_count)) in phase.nodes.iter().zip(nodes.iter()) {
            assert_eq!(node.result, ExecResult::NotAvailable);
            assert_eq!(node.total_cpu_time, Duration::ZERO);
            assert_eq!(node.usage_cpu, 0.0);
            assert_eq!(node.input_ports.len(), input_count);
            assert_eq!(node.output_ports.len(), output_count);

            for port in node.input_ports.iter().chain(node.output_ports.iter()) {
                assert_eq!(port.total_records, 0);
                assert_eq!(port.total_bytes, 0);
                assert_eq!(port.record_flow, 0);
                assert_eq!(port.record_peak, 0);
                assert_eq!(port.waiting_records, 0);
            }
        }
    }
}

#[tokio::test]
async fn two_runs_tracked_concurrently_stay_isolated() {
    let endpoint = MonitorEndpoint::new();

    let run_a = RunId::next();
    let run_b = RunId::next();
    let fixture_a = build_run(run_a, "orders", &[(0, &[(0, 1)])]);
    let fixture_b = build_run(run_b, "invoices", &[(0, &[(0, 1)]), (1, &[(1, 0)])]);
    let ports_a = fixture_a.ports.clone();
    let ports_b = fixture_b.ports.clone();

    let live_a = Shared::new(fixture_a.tracking);
    let live_b = Shared::new(fixture_b.tracking);
    endpoint
        .register_run(live_a.clone(), Arc::new(StubControl::default()))
        .unwrap();
    endpoint
        .register_run(live_b.clone(), Arc::new(StubControl::default()))
        .unwrap();

    let mut events_a = endpoint.subscribe(move |id| id == run_a);

    let mut monitor_a = Monitor::spawn(
        endpoint.clone(),
        live_a,
        endpoint.sample_interval_handle(run_a).unwrap(),
    );
    let mut monitor_b = Monitor::spawn(
        endpoint.clone(),
        live_b,
        endpoint.sample_interval_handle(run_b).unwrap(),
    );

    monitor_a.run_started();
    monitor_a.phase_started(0);
    monitor_b.run_started();
    monitor_b.phase_started(0);

    ports_a[0].set_records(111);
    ports_b[0].set_records(999);
    monitor_a.gather_now();
    monitor_b.gather_now();

    monitor_a.phase_finished(ExecResult::FinishedOk);
    monitor_a.run_finished(ExecResult::FinishedOk, None);
    monitor_a.join().await;

    let error = ErrorDetail::new("disk full").with_node("N1_0", None);
    monitor_b.phase_finished(ExecResult::Error);
    monitor_b.run_finished(ExecResult::Error, Some(error));
    monitor_b.join().await;

    let snapshot_a = endpoint.snapshot(run_a).unwrap();
    assert_eq!(snapshot_a.run_id, run_a);
    assert_eq!(snapshot_a.graph_name, "orders");
    assert_eq!(snapshot_a.result, ExecResult::FinishedOk);
    assert!(snapshot_a.error.is_none());
    assert_eq!(snapshot_a.phases[0].nodes[0].output_ports[0].total_records, 111);

    let snapshot_b = endpoint.snapshot(run_b).unwrap();
    assert_eq!(snapshot_b.graph_name, "invoices");
    assert_eq!(snapshot_b.result, ExecResult::Error);
    assert_eq!(snapshot_b.error.as_ref().unwrap().message, "disk full");
    assert_eq!(snapshot_b.phases[0].nodes[0].output_ports[0].total_records, 999);

    // Events routed to run A's subscriber never mention run B.
    while let Ok(event) = events_a.try_recv() {
        assert_eq!(event.run_id, run_a);
    }

    // Evicting one run leaves the other queryable.
    endpoint.unregister_run(run_a).unwrap();
    assert!(endpoint.snapshot(run_a).is_err());
    assert!(endpoint.snapshot(run_b).is_ok());
}

#[tokio::test]
async fn finished_run_keeps_serving_stable_snapshots() {
    let endpoint = MonitorEndpoint::new();
    let run_id = RunId::next();
    let fixture = build_run(run_id, "orders", &[(0, &[(0, 1)])]);
    let ports = fixture.ports.clone();

    let live = Shared::new(fixture.tracking);
    endpoint
        .register_run(live.clone(), Arc::new(StubControl::default()))
        .unwrap();

    let mut monitor = Monitor::spawn(
        endpoint.clone(),
        live,
        endpoint.sample_interval_handle(run_id).unwrap(),
    );

    monitor.run_started();
    monitor.phase_started(0);
    ports[0].set_records(250);
    monitor.gather_now();
    monitor.phase_finished(ExecResult::Aborted);
    monitor.run_finished(ExecResult::Aborted, None);
    monitor.join().await;

    // A client polling a finished run gets the frozen state indefinitely,
    // never an error, so post-mortem inspection stays possible.
    let first = endpoint.snapshot(run_id).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = endpoint.snapshot(run_id).unwrap();

    assert_eq!(first.result, ExecResult::Aborted);
    assert_eq!(first.phases[0].nodes[0].output_ports[0].total_records, 250);
    assert_eq!(first.phases[0].nodes[0].output_ports[0].record_flow, 0);
    assert_eq!(second.result, first.result);
    assert_eq!(second.phases, first.phases);
}

#[test]
fn snapshot_survives_run_teardown() {
    let endpoint = MonitorEndpoint::new();
    let run_id = RunId::next();
    let mut fixture = build_run(run_id, "orders", &[(0, &[(0, 1)])]);

    let t0 = Instant::now();
    fixture.tracking.on_run_started(t0);
    fixture.tracking.on_phase_started(0, t0);
    fixture.tracking.gather(t0);
    fixture.ports[0].set_records(64);
    fixture.tracking.gather(t0 + Duration::from_millis(150));

    endpoint
        .register_run(
            Shared::new(fixture.tracking),
            Arc::new(StubControl::default()),
        )
        .unwrap();

    let snapshot: RunSnapshot = endpoint.snapshot(run_id).unwrap();
    endpoint.unregister_run(run_id).unwrap();
    drop(endpoint);

    // No back-references into engine objects: the copy outlives everything.
    assert_eq!(snapshot.phases[0].nodes[0].output_ports[0].total_records, 64);
    assert!(snapshot.to_json().unwrap().contains("\"orders\""));
}
