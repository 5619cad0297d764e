use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Terminal-state taxonomy for runs, phases and nodes.
///
/// These labels are decided by the execution-control layer; the tracking
/// subsystem only records and republishes them.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug, Display, Serialize, Deserialize)]
pub enum ExecResult {
    #[default]
    #[strum(serialize = "N/A")]
    NotAvailable,
    #[strum(serialize = "RUNNING")]
    Running,
    #[strum(serialize = "FINISHED_OK")]
    FinishedOk,
    #[strum(serialize = "ABORTED")]
    Aborted,
    #[strum(serialize = "ERROR")]
    Error,
    #[strum(serialize = "TIMEOUT")]
    Timeout,
}

impl ExecResult {
    pub fn is_running(&self) -> bool {
        matches!(self, ExecResult::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecResult::FinishedOk | ExecResult::Aborted | ExecResult::Error | ExecResult::Timeout
        )
    }
}

/// Failure description captured when a run ends with [`ExecResult::Error`].
///
/// Identifies the failing node when the control layer can attribute the
/// failure, plus the flattened cause chain for post-mortem inspection.
#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub node_id: Option<String>,
    pub component_type: Option<String>,
    pub cause_chain: Vec<String>,
}

impl ErrorDetail {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_node<S: Into<String>>(mut self, node_id: S, component_type: Option<String>) -> Self {
        self.node_id = Some(node_id.into());
        self.component_type = component_type;
        self
    }

    /// Flattens an error and its sources into a cause chain.
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let mut chain = error.chain();
        let message = chain
            .next()
            .map(|cause| cause.to_string())
            .unwrap_or_default();
        Self {
            message,
            node_id: None,
            component_type: None,
            cause_chain: chain.map(|cause| cause.to_string()).collect(),
        }
    }
}
