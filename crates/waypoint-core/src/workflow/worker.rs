//! Collaborator contract for executing a single step.
//!
//! The engine never runs business logic itself. An embedding application
//! supplies a `StepWorker` that performs the step's work and reports the
//! artifacts it produced. Workers must tolerate being invoked more than once
//! for the same step (retries, resumed runs).

use std::collections::BTreeMap;

use serde_json::Value;
use waypoint_types::workflow::{Artifact, WorkflowState, WorkflowStep};

/// Artifacts produced by a step: artifact name -> file path.
pub type ArtifactPaths = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Explicit context passed to every worker call.
///
/// A read-only view of the run at dispatch time. Anything process-wide the
/// worker needs (clients, caches) lives on the worker itself, not here.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub workflow_id: String,
    /// 1-based attempt number of this invocation.
    pub attempt: u32,
    pub variables: BTreeMap<String, Value>,
    pub artifacts: BTreeMap<String, Artifact>,
}

impl StepContext {
    /// Snapshot the parts of `state` a worker may consult.
    pub fn from_state(state: &WorkflowState) -> Self {
        Self {
            workflow_id: state.workflow_id.clone(),
            attempt: 1,
            variables: state.variables.clone(),
            artifacts: state.artifacts.clone(),
        }
    }

    /// Path of a complete artifact, if available.
    pub fn artifact_path(&self, name: &str) -> Option<&str> {
        self.artifacts.get(name).map(|a| a.path.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Error kind reported for timeouts.
pub const TIMEOUT_KIND: &str = "timeout";

/// Error kind reported for cancellations.
pub const CANCELLED_KIND: &str = "cancelled";

/// Tagged failure of a step attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// The worker reported a failure. `kind` classifies it for retry
    /// decisions (e.g. "io", "rate_limit", "validation").
    #[error("{message}")]
    Failed { kind: String, message: String },

    /// The attempt exceeded the per-step timeout.
    #[error("timed out after {secs}s")]
    TimedOut { secs: f64 },

    /// The run was cancelled while the step was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl StepError {
    /// Shorthand for a worker failure of the given kind.
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Classification used by `RetryConfig::retryable_errors`.
    pub fn kind(&self) -> &str {
        match self {
            StepError::Failed { kind, .. } => kind,
            StepError::TimedOut { .. } => TIMEOUT_KIND,
            StepError::Cancelled => CANCELLED_KIND,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// StepWorker trait
// ---------------------------------------------------------------------------

/// Executes the business logic of one step.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition). The engine
/// runs each call on its own task, so the returned future must be `Send`
/// and must not block the thread; blocking work belongs on the worker's own
/// pool (e.g. `tokio::task::spawn_blocking`).
pub trait StepWorker: Send + Sync {
    /// Run `step` and return the artifacts it produced.
    fn execute_step(
        &self,
        step: &WorkflowStep,
        ctx: &StepContext,
    ) -> impl std::future::Future<Output = Result<ArtifactPaths, StepError>> + Send;
}
