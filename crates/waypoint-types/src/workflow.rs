//! Workflow domain types for waypoint.
//!
//! Defines the immutable workflow definition handed to the engine
//! (`Workflow`, `WorkflowStep`), the mutable run state that the execution loop
//! owns and persists (`WorkflowState`), and the per-step execution log
//! (`StepExecution`).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format of the start timestamp embedded in a run's `workflow_id`.
pub const RUN_ID_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A workflow definition as produced by an external loader.
///
/// Loaded once per run and never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Stable identifier of the definition (e.g. "greenfield-fullstack").
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Definition version string (e.g. "1.0.0").
    pub version: String,
    /// Ordered steps. Order matters only for validation of the first step
    /// and for stable iteration; execution order comes from artifacts.
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// Look up a step by its ID.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// A single unit of work delegated to an external worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within the workflow.
    pub id: String,
    /// Worker label. Opaque to the engine.
    pub agent: String,
    /// Action label. Opaque to the engine.
    pub action: String,
    /// Artifact names that must be complete before this step may run.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Artifact names this step produces.
    #[serde(default)]
    pub creates: Vec<String>,
    /// How a failure of this step affects the rest of the run.
    #[serde(default)]
    pub condition: StepCondition,
    /// Whether this step is a quality gate (drives `on_gates` checkpoints).
    #[serde(default)]
    pub gate: bool,
    /// Free-form metadata passed through to the worker.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowStep {
    /// Create a required, non-gate step with no metadata.
    pub fn new(id: impl Into<String>, agent: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            action: action.into(),
            requires: Vec::new(),
            creates: Vec::new(),
            condition: StepCondition::Required,
            gate: false,
            metadata: HashMap::new(),
        }
    }

    /// Builder-style helper: add required artifacts.
    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(names.into_iter().map(Into::into));
        self
    }

    /// Builder-style helper: add created artifacts.
    pub fn creates<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.creates.extend(names.into_iter().map(Into::into));
        self
    }

    /// Builder-style helper: set the step condition.
    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Builder-style helper: flag the step as a gate.
    pub fn as_gate(mut self) -> Self {
        self.gate = true;
        self
    }

    /// Whether a failure of this step must fail the run.
    pub fn is_required(&self) -> bool {
        matches!(self.condition, StepCondition::Required)
    }
}

/// Failure semantics of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    /// Failure fails the run and skips dependents.
    #[default]
    Required,
    /// Failure waives the step's artifacts; dependents still run.
    Optional,
    /// Runs like an optional step; the worker decides whether it applies.
    Conditional,
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// A named output of a step, backed by a file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: String,
    pub status: ArtifactStatus,
    /// ID of the step that produced (or was supposed to produce) it.
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Availability of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Complete,
    /// The optional producer failed; consumers proceed without it.
    Waived,
}

impl ArtifactStatus {
    /// Whether a consumer's requirement on this artifact is satisfied.
    pub fn satisfies_requirement(self) -> bool {
        matches!(self, ArtifactStatus::Complete | ArtifactStatus::Waived)
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Blocked,
}

impl WorkflowStatus {
    /// Terminal statuses end the execution loop.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Blocked
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::NotStarted => "not_started",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one workflow run.
///
/// Exclusively owned and mutated by the execution loop; persisted at
/// checkpoints. Collections that are written to disk use ordered maps so
/// snapshots of identical runs are byte-identical modulo timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// `{workflow.id}-{start timestamp}`.
    pub workflow_id: String,
    /// Name of the definition this run executes.
    #[serde(default)]
    pub workflow_name: String,
    /// Most recently dispatched step.
    #[serde(default)]
    pub current_step: Option<String>,
    /// Completed step IDs in completion order, no duplicates.
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub skipped_steps: Vec<String>,
    /// Steps whose final attempt failed.
    #[serde(default)]
    pub failed_steps: Vec<String>,
    /// Why each skipped step was skipped.
    #[serde(default)]
    pub skip_reasons: BTreeMap<String, String>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub error: Option<String>,
    /// Append-only execution log.
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    /// Create the initial state for a run of `workflow` starting at `started_at`.
    pub fn new(workflow: &Workflow, started_at: DateTime<Utc>) -> Self {
        Self {
            workflow_id: format!(
                "{}-{}",
                workflow.id,
                started_at.format(RUN_ID_TIMESTAMP_FORMAT)
            ),
            workflow_name: workflow.name.clone(),
            current_step: None,
            completed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            failed_steps: Vec::new(),
            skip_reasons: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            variables: BTreeMap::new(),
            status: WorkflowStatus::NotStarted,
            error: None,
            step_executions: Vec::new(),
            started_at,
            completed_at: None,
        }
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_id)
    }

    pub fn is_skipped(&self, step_id: &str) -> bool {
        self.skipped_steps.iter().any(|s| s == step_id)
    }

    pub fn is_failed(&self, step_id: &str) -> bool {
        self.failed_steps.iter().any(|s| s == step_id)
    }

    /// Record a completed step, keeping `completed_steps` unique.
    pub fn mark_completed(&mut self, step_id: &str) {
        if !self.is_completed(step_id) {
            self.completed_steps.push(step_id.to_string());
        }
    }

    /// Record a failed step, keeping `failed_steps` unique.
    pub fn mark_failed(&mut self, step_id: &str) {
        if !self.is_failed(step_id) {
            self.failed_steps.push(step_id.to_string());
        }
    }

    /// Record a skipped step with its reason. The first reason wins.
    pub fn mark_skipped(&mut self, step_id: &str, reason: impl Into<String>) {
        if !self.is_skipped(step_id) {
            self.skipped_steps.push(step_id.to_string());
        }
        self.skip_reasons
            .entry(step_id.to_string())
            .or_insert_with(|| reason.into());
    }

    /// Number of steps that are done one way or another.
    pub fn accounted_steps(&self) -> usize {
        self.completed_steps.len() + self.skipped_steps.len() + self.failed_steps.len()
    }

    /// Completion time of the most recently finished step execution.
    pub fn last_step_finished_at(&self) -> Option<DateTime<Utc>> {
        self.step_executions
            .iter()
            .filter_map(|e| e.completed_at)
            .max()
    }
}

// ---------------------------------------------------------------------------
// Step execution log
// ---------------------------------------------------------------------------

/// Status of one step execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// Execution record of a single step within a run.
///
/// Transitions only `running -> completed` or `running -> failed`; the
/// transition helpers ignore any attempt to leave a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub agent: String,
    pub action: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in seconds, set on completion.
    #[serde(default)]
    pub duration_secs: Option<f64>,
    pub status: StepExecutionStatus,
    #[serde(default)]
    pub error: Option<String>,
    /// Number of attempts made, including the final one.
    #[serde(default)]
    pub attempts: u32,
}

impl StepExecution {
    /// A fresh `running` record for `step`, started at `now`.
    pub fn start(step: &WorkflowStep, now: DateTime<Utc>) -> Self {
        Self {
            step_id: step.id.clone(),
            agent: step.agent.clone(),
            action: step.action.clone(),
            started_at: now,
            completed_at: None,
            duration_secs: None,
            status: StepExecutionStatus::Running,
            error: None,
            attempts: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == StepExecutionStatus::Running
    }

    /// Transition `running -> completed`. Returns false if already terminal.
    pub fn complete(&mut self, now: DateTime<Utc>, attempts: u32) -> bool {
        self.finish(now, attempts, StepExecutionStatus::Completed, None)
    }

    /// Transition `running -> failed`. Returns false if already terminal.
    pub fn fail(&mut self, now: DateTime<Utc>, attempts: u32, error: impl Into<String>) -> bool {
        self.finish(now, attempts, StepExecutionStatus::Failed, Some(error.into()))
    }

    fn finish(
        &mut self,
        now: DateTime<Utc>,
        attempts: u32,
        status: StepExecutionStatus,
        error: Option<String>,
    ) -> bool {
        if !self.is_running() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(now);
        self.duration_secs = Some((now - self.started_at).num_milliseconds() as f64 / 1000.0);
        self.attempts = attempts;
        self.error = error;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
