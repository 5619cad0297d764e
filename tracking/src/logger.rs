use tokio::task::JoinHandle;
use tracing::info;

use common::output_stream::OutputStream;

use crate::endpoint::{EventKind, MonitorEndpoint};
use crate::run::RunId;
use crate::snapshot::{PhaseSnapshot, PortSnapshot, RunSnapshot};

/// Destination for rendered tracking lines.
#[derive(Clone, Debug)]
pub enum LogSink {
    Tracing,
    Capture(OutputStream),
}

impl LogSink {
    fn line(&self, line: String) {
        match self {
            LogSink::Tracing => info!(target: "tracking", "{}", line),
            LogSink::Capture(stream) => stream.write(line),
        }
    }
}

/// Console logger of one run's tracking information.
///
/// Subscribes to the run's lifecycle events: every tracking update is
/// rendered as a node/port table, each phase finish as a final table with
/// whole-phase average rates, and the run finish as the phase summary, after
/// which the logger detaches.
pub struct TrackingLogger;

impl TrackingLogger {
    pub fn attach(endpoint: &MonitorEndpoint, run_id: RunId) -> JoinHandle<()> {
        Self::attach_with_sink(endpoint, run_id, LogSink::Tracing)
    }

    pub fn attach_with_sink(
        endpoint: &MonitorEndpoint,
        run_id: RunId,
        sink: LogSink,
    ) -> JoinHandle<()> {
        let mut rx = endpoint.subscribe(move |id| id == run_id);
        let endpoint = endpoint.clone();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event.kind {
                    EventKind::TrackingUpdated => {
                        if let Ok(snapshot) = endpoint.snapshot(run_id) {
                            print_processing_status(&sink, &snapshot, false);
                        }
                    }
                    EventKind::PhaseFinished { result, .. } => {
                        if let Ok(snapshot) = endpoint.snapshot(run_id) {
                            print_processing_status(&sink, &snapshot, true);
                            if let Some(phase) = current_phase(&snapshot) {
                                sink.line(format!(
                                    "Execution of phase [{}] finished with {} - elapsed time(sec): {}",
                                    phase.phase_num,
                                    result,
                                    phase.execution_time_ms.max(0) / 1000
                                ));
                            }
                        }
                    }
                    EventKind::RunFinished { .. } => {
                        if let Ok(snapshot) = endpoint.snapshot(run_id) {
                            print_phases_summary(&sink, &snapshot);
                        }
                        break;
                    }
                    _ => {}
                }
            }
        })
    }
}

fn current_phase(snapshot: &RunSnapshot) -> Option<&PhaseSnapshot> {
    snapshot
        .current_phase_num
        .and_then(|phase_num| snapshot.phase(phase_num))
}

fn print_processing_status(sink: &LogSink, snapshot: &RunSnapshot, final_tracking: bool) {
    let Some(phase) = current_phase(snapshot) else {
        return;
    };

    if final_tracking {
        sink.line(format!(
            "----------------------** Final tracking for phase [{}] **---------------------",
            phase.phase_num
        ));
        sink.line(
            "Node                   ID         Port      #Records         #KB aRec/s   aKB/s"
                .to_string(),
        );
    } else {
        sink.line(format!(
            "---------------------** Start of tracking for phase [{}] **-------------------",
            phase.phase_num
        ));
        sink.line(
            "Node                   ID         Port      #Records         #KB  Rec/s    KB/s"
                .to_string(),
        );
    }
    sink.line("-".repeat(81));

    let execution_secs = (snapshot.execution_time_ms.max(0) / 1000) as u64;

    for node in phase.nodes.iter() {
        sink.line(format!(
            "{:<23}{:<41}{:>15}",
            node.node_name, node.node_id, node.result
        ));

        let cpu = format_cpu(if final_tracking {
            node.peak_usage_cpu
        } else {
            node.usage_cpu
        });

        let mut cpu_printed = false;
        for port in node.input_ports.iter().chain(node.output_ports.iter()) {
            let prefix = if cpu_printed {
                " ".repeat(13)
            } else {
                cpu_printed = true;
                format!(" %cpu: {:<6}", cpu)
            };
            sink.line(port_row(&prefix, port, final_tracking, execution_secs));
        }

        // CPU usage is reported even for components without ports.
        if !cpu_printed {
            sink.line(format!(" %cpu: {}", cpu));
        }
    }
    sink.line(
        "---------------------------------** End of Log **--------------------------------"
            .to_string(),
    );
}

fn port_row(prefix: &str, port: &PortSnapshot, final_tracking: bool, execution_secs: u64) -> String {
    let record_rate = if final_tracking && execution_secs > 0 {
        port.total_records / execution_secs
    } else {
        port.record_flow
    };
    let byte_rate_kb = if final_tracking && execution_secs > 0 {
        (port.total_bytes >> 10) / execution_secs
    } else {
        port.byte_flow >> 10
    };

    format!(
        "{}{:<5}{:>2}{:>14}{:>12}{:>7}{:>8}",
        prefix,
        format!("{}:", port.kind),
        port.index,
        port.total_records,
        port.total_bytes >> 10,
        record_rate,
        byte_rate_kb
    )
}

fn format_cpu(usage: f32) -> String {
    if usage >= 0.01 {
        format!("{:.2}", usage)
    } else {
        "..".to_string()
    }
}

fn print_phases_summary(sink: &LogSink, snapshot: &RunSnapshot) {
    sink.line(
        "-----------------------** Summary of Phases execution **---------------------"
            .to_string(),
    );
    sink.line(
        "Phase#            Finished Status         RunTime(sec)    MemoryAllocation(KB)"
            .to_string(),
    );
    for phase in snapshot.phases.iter() {
        sink.line(format!(
            "{:<18}{:<24}{:>12}{:>20}",
            phase.phase_num,
            phase.result.to_string(),
            phase.execution_time_ms.max(0) / 1000,
            phase.peak_memory_utilization >> 10
        ));
    }
    sink.line(
        "------------------------------** End of Summary **---------------------------"
            .to_string(),
    );
}
