//! The resumable execution loop.
//!
//! `WorkflowEngine` drives a `WorkflowRun` through
//! `not_started -> running -> {completed | failed | blocked}`:
//! resolve ready steps, execute them as one bounded-parallel batch, merge the
//! results into the run state, consult the checkpoint policy, repeat. Step
//! failures stay inside the loop (retried, then propagated to dependents as
//! skips); only run-level conditions escape as `EngineError`.
//!
//! The loop is the single writer of `WorkflowState`. Snapshots are written
//! only between batches, so no persisted state ever has a step frozen in
//! `running`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use waypoint_types::checkpoint::{CleanupReport, SnapshotQuery};
use waypoint_types::config::EngineConfig;
use waypoint_types::error::StateError;
use waypoint_types::workflow::{
    Artifact, ArtifactStatus, Workflow, WorkflowState, WorkflowStatus, WorkflowStep,
};

use crate::repository::state::StateStore;

use super::checkpoint::CheckpointPolicy;
use super::executor::ParallelExecutor;
use super::health::{HealthReport, health_report};
use super::resolver::{find_ready_steps, missing_requirements, producer_map, transitive_dependents};
use super::validation::{ValidationError, validate_workflow};
use super::worker::{ArtifactPaths, StepContext, StepError, StepWorker};

/// Prefix of every skip reason caused by an upstream failure.
const DEPENDENCY_SKIP_PREFIX: &str = "Dependency '";

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Run-level errors that escape the execution loop.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid workflow: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("workflow timed out after {secs}s")]
    WorkflowTimeout { secs: u64 },

    #[error("workflow run cancelled")]
    Cancelled,

    #[error("workflow run '{0}' already finished")]
    AlreadyFinished(String),

    #[error("snapshot of run '{found}' does not belong to workflow '{expected}'")]
    SnapshotMismatch { expected: String, found: String },
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// One run of a workflow: the definition, its mutable state, and the
/// checkpoint policy that watches it.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    workflow: Arc<Workflow>,
    state: WorkflowState,
    policy: CheckpointPolicy,
    last_snapshot: Option<PathBuf>,
}

impl WorkflowRun {
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn into_state(self) -> WorkflowState {
        self.state
    }

    pub fn policy(&self) -> &CheckpointPolicy {
        &self.policy
    }

    /// Mutable access to the policy, e.g. to switch modes between runs.
    pub fn policy_mut(&mut self) -> &mut CheckpointPolicy {
        &mut self.policy
    }

    /// Path of the most recent snapshot written (or loaded) for this run.
    pub fn last_snapshot(&self) -> Option<&PathBuf> {
        self.last_snapshot.as_ref()
    }

    /// Seed a variable visible to workers through `StepContext`.
    pub fn set_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.state.variables.insert(key.into(), value);
    }

    /// Health of the run right now.
    pub fn health(&self, stuck_threshold: Duration) -> HealthReport {
        self.health_at(stuck_threshold, Utc::now())
    }

    pub fn health_at(&self, stuck_threshold: Duration, now: DateTime<Utc>) -> HealthReport {
        health_report(&self.state, self.workflow.steps.len(), stuck_threshold, now)
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Resumable workflow execution engine.
///
/// Generic over the step worker and the snapshot store so it runs equally
/// against the filesystem store or an in-memory test double.
pub struct WorkflowEngine<W: StepWorker, S: StateStore> {
    executor: ParallelExecutor<W>,
    store: S,
    config: EngineConfig,
}

impl<W: StepWorker + 'static, S: StateStore> WorkflowEngine<W, S> {
    pub fn new(worker: Arc<W>, store: S, config: EngineConfig) -> Self {
        let executor = ParallelExecutor::new(
            worker,
            config.max_parallel,
            Duration::from_secs(config.step_timeout_secs),
            config.retry.clone(),
        );
        Self {
            executor,
            store,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate `workflow` and create a new run in `running` state.
    pub fn start(&self, workflow: Workflow) -> Result<WorkflowRun, EngineError> {
        validate_workflow(&workflow)?;

        let mut state = WorkflowState::new(&workflow, Utc::now());
        state.status = WorkflowStatus::Running;

        tracing::info!(
            workflow_id = %state.workflow_id,
            steps = workflow.steps.len(),
            "workflow run started"
        );

        let policy = CheckpointPolicy::new(self.config.checkpoint.clone())
            .with_total_steps(workflow.steps.len());
        Ok(WorkflowRun {
            workflow: Arc::new(workflow),
            state,
            policy,
            last_snapshot: None,
        })
    }

    /// Rebuild a run of `workflow` from a persisted snapshot.
    ///
    /// A `failed` or `blocked` run is re-armed: its failed steps, the
    /// dependency skips they caused and any waived artifacts are cleared so
    /// those steps run again. A `completed` run cannot be resumed.
    pub async fn resume(
        &self,
        workflow: Workflow,
        query: SnapshotQuery,
    ) -> Result<WorkflowRun, EngineError> {
        validate_workflow(&workflow)?;

        let (mut state, metadata) = self.store.load_state(&query).await?;
        if !state.workflow_id.starts_with(&format!("{}-", workflow.id)) {
            return Err(EngineError::SnapshotMismatch {
                expected: workflow.id.clone(),
                found: state.workflow_id,
            });
        }

        match state.status {
            WorkflowStatus::Completed => {
                return Err(EngineError::AlreadyFinished(state.workflow_id));
            }
            WorkflowStatus::Failed | WorkflowStatus::Blocked => rearm(&mut state),
            WorkflowStatus::NotStarted | WorkflowStatus::Running => {
                state.status = WorkflowStatus::Running;
            }
        }

        tracing::info!(
            workflow_id = %state.workflow_id,
            path = %metadata.path.display(),
            completed = state.completed_steps.len(),
            migrated_from = metadata.migrated_from.as_deref().unwrap_or("-"),
            "workflow run resumed"
        );

        let mut policy = CheckpointPolicy::new(self.config.checkpoint.clone())
            .with_total_steps(workflow.steps.len());
        if let Some(checkpoint) = &metadata.checkpoint {
            policy = policy.with_decisions(checkpoint.step_count);
        }
        policy.record_checkpoint_at(None, metadata.saved_at);

        Ok(WorkflowRun {
            workflow: Arc::new(workflow),
            state,
            policy,
            last_snapshot: Some(metadata.path),
        })
    }

    /// Start `workflow` and drive it to a terminal status.
    pub async fn execute(&self, workflow: Workflow) -> Result<WorkflowRun, EngineError> {
        let mut run = self.start(workflow)?;
        self.run(&mut run, &CancellationToken::new()).await?;
        Ok(run)
    }

    /// Drive `run` until it reaches a terminal status.
    ///
    /// On workflow timeout the in-memory state is marked failed and nothing
    /// is written, so the last snapshot on disk stays as it was. Any other
    /// run-level error marks the run failed and attempts one final save.
    pub async fn run(
        &self,
        run: &mut WorkflowRun,
        cancel: &CancellationToken,
    ) -> Result<WorkflowStatus, EngineError> {
        if run.state.status.is_terminal() {
            return Err(EngineError::AlreadyFinished(run.state.workflow_id.clone()));
        }
        run.state.status = WorkflowStatus::Running;

        let secs = self
            .config
            .effective_workflow_timeout_secs(run.workflow.steps.len());
        let outcome = tokio::time::timeout(Duration::from_secs(secs), self.drive(run, cancel)).await;

        match outcome {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(err)) => {
                self.fail_run(run, &err).await;
                Err(err)
            }
            Err(_elapsed) => {
                let now = Utc::now();
                let message = format!("workflow timed out after {secs}s");
                for exec in run.state.step_executions.iter_mut().filter(|e| e.is_running()) {
                    let attempts = exec.attempts.max(1);
                    exec.fail(now, attempts, message.clone());
                }
                run.state.status = WorkflowStatus::Failed;
                run.state.error = Some(message);
                run.state.completed_at = Some(now);
                tracing::error!(
                    workflow_id = %run.state.workflow_id,
                    timeout_secs = secs,
                    last_snapshot = ?run.last_snapshot,
                    "workflow timed out"
                );
                Err(EngineError::WorkflowTimeout { secs })
            }
        }
    }

    /// Persist `run` now, whatever the checkpoint mode.
    pub async fn checkpoint_now(&self, run: &mut WorkflowRun) -> Result<PathBuf, EngineError> {
        self.persist(run, None).await
    }

    /// Apply the configured retention policy to the snapshot store.
    pub async fn cleanup(&self) -> Result<CleanupReport, EngineError> {
        Ok(self.store.execute_cleanup(&self.config.cleanup).await?)
    }

    /// Health of `run` using the configured stuck threshold.
    pub fn health(&self, run: &WorkflowRun) -> HealthReport {
        run.health(Duration::from_secs(self.config.stuck_threshold_secs))
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        run: &mut WorkflowRun,
        cancel: &CancellationToken,
    ) -> Result<WorkflowStatus, EngineError> {
        let workflow = Arc::clone(&run.workflow);

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let ready: Vec<WorkflowStep> = {
                let state = &run.state;
                let completed: HashSet<&str> =
                    state.completed_steps.iter().map(String::as_str).collect();
                let excluded: HashSet<&str> = state
                    .skipped_steps
                    .iter()
                    .chain(state.failed_steps.iter())
                    .map(String::as_str)
                    .collect();
                find_ready_steps(
                    &workflow.steps,
                    &completed,
                    &HashSet::new(),
                    &excluded,
                    &state.artifacts,
                )
                .into_iter()
                .cloned()
                .collect()
            };

            if ready.is_empty() {
                return self.finish(run).await;
            }

            run.state.current_step = ready.first().map(|s| s.id.clone());
            let ctx = StepContext::from_state(&run.state);
            let results = self
                .executor
                .execute_parallel(&ready, &ctx, &mut run.state.step_executions, cancel)
                .await;

            let mut trigger: Option<&WorkflowStep> = None;
            for result in results {
                let Some(step) = workflow.step(&result.step_id) else {
                    continue;
                };
                match result.outcome {
                    Ok(paths) => {
                        record_success(&mut run.state, step, paths);
                        if run.policy.should_checkpoint(step, &run.state, step.gate) {
                            trigger = Some(step);
                        }
                    }
                    Err(err) => record_failure(&mut run.state, &workflow, step, &err),
                }
            }

            // One snapshot per batch, after every step in it has settled.
            if let Some(step) = trigger {
                self.persist(run, Some(step)).await?;
            }
        }
    }

    /// Settle a run that has no ready steps left.
    async fn finish(&self, run: &mut WorkflowRun) -> Result<WorkflowStatus, EngineError> {
        let state = &mut run.state;
        let pending: Vec<&WorkflowStep> = run
            .workflow
            .steps
            .iter()
            .filter(|s| !state.is_completed(&s.id) && !state.is_skipped(&s.id) && !state.is_failed(&s.id))
            .collect();
        let required_failures: Vec<&str> = run
            .workflow
            .steps
            .iter()
            .filter(|s| s.is_required() && state.is_failed(&s.id))
            .map(|s| s.id.as_str())
            .collect();

        let (status, error) = if pending.is_empty() {
            if required_failures.is_empty() {
                (WorkflowStatus::Completed, None)
            } else {
                let mut message = format!("required step(s) failed: {}", required_failures.join(", "));
                if !state.skipped_steps.is_empty() {
                    message.push_str(&format!("; skipped: {}", state.skipped_steps.join(", ")));
                }
                (WorkflowStatus::Failed, Some(message))
            }
        } else {
            let (hard_failure, message) = describe_blockage(&run.workflow, state, &pending);
            let status = if hard_failure || !required_failures.is_empty() {
                WorkflowStatus::Failed
            } else {
                WorkflowStatus::Blocked
            };
            (status, Some(message))
        };

        state.status = status;
        state.error = error;
        state.completed_at = Some(Utc::now());

        if status == WorkflowStatus::Completed {
            tracing::info!(
                workflow_id = %state.workflow_id,
                completed = state.completed_steps.len(),
                skipped = state.skipped_steps.len(),
                "workflow run completed"
            );
        } else {
            tracing::warn!(
                workflow_id = %state.workflow_id,
                status = %status,
                error = state.error.as_deref().unwrap_or(""),
                "workflow run did not complete"
            );
        }

        if self.config.checkpoint.enabled {
            self.persist(run, None).await?;
        }
        Ok(status)
    }

    /// Write a snapshot of `run` and tell the policy about it.
    async fn persist(
        &self,
        run: &mut WorkflowRun,
        trigger: Option<&WorkflowStep>,
    ) -> Result<PathBuf, EngineError> {
        let metadata = run.policy.get_checkpoint_metadata(&run.state, trigger);
        let path = self
            .store
            .save_state(&run.state, Some(&metadata), self.config.compress_snapshots)
            .await?;
        run.policy.record_checkpoint(trigger.map(|s| s.id.as_str()));
        tracing::debug!(
            workflow_id = %run.state.workflow_id,
            path = %path.display(),
            trigger = trigger.map(|s| s.id.as_str()).unwrap_or("-"),
            "checkpoint saved"
        );
        run.last_snapshot = Some(path.clone());
        Ok(path)
    }

    /// Mark the run failed after a run-level error and try one final save.
    async fn fail_run(&self, run: &mut WorkflowRun, err: &EngineError) {
        let now = Utc::now();
        for exec in run.state.step_executions.iter_mut().filter(|e| e.is_running()) {
            let attempts = exec.attempts.max(1);
            exec.fail(now, attempts, err.to_string());
        }
        run.state.status = WorkflowStatus::Failed;
        run.state.error = Some(err.to_string());
        run.state.completed_at = Some(now);

        tracing::error!(workflow_id = %run.state.workflow_id, error = %err, "workflow run failed");

        if let Err(save_err) = self.persist(run, None).await {
            tracing::error!(
                workflow_id = %run.state.workflow_id,
                error = %save_err,
                "final checkpoint save failed"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// State merging
// ---------------------------------------------------------------------------

fn record_success(state: &mut WorkflowState, step: &WorkflowStep, paths: ArtifactPaths) {
    state.mark_completed(&step.id);
    let now = Utc::now();
    for (name, path) in paths {
        state.artifacts.insert(
            name.clone(),
            Artifact {
                name,
                path,
                status: ArtifactStatus::Complete,
                created_by: step.id.clone(),
                created_at: now,
            },
        );
    }
    for name in &step.creates {
        let produced = state
            .artifacts
            .get(name)
            .is_some_and(|a| a.status == ArtifactStatus::Complete);
        if !produced {
            tracing::warn!(
                workflow_id = %state.workflow_id,
                step_id = %step.id,
                artifact = %name,
                "step completed without producing a declared artifact"
            );
        }
    }
}

fn record_failure(state: &mut WorkflowState, workflow: &Workflow, step: &WorkflowStep, err: &StepError) {
    state.mark_failed(&step.id);

    if !step.is_required() {
        let now = Utc::now();
        for name in &step.creates {
            state.artifacts.insert(
                name.clone(),
                Artifact {
                    name: name.clone(),
                    path: String::new(),
                    status: ArtifactStatus::Waived,
                    created_by: step.id.clone(),
                    created_at: now,
                },
            );
        }
        tracing::info!(
            workflow_id = %state.workflow_id,
            step_id = %step.id,
            waived = step.creates.len(),
            "optional step failed, outputs waived"
        );
        return;
    }

    for (dependent, via) in transitive_dependents(&step.id, &workflow.steps) {
        if state.is_completed(dependent) {
            continue;
        }
        let reason = if via == step.id {
            format!("{DEPENDENCY_SKIP_PREFIX}{via}' failed: {err}")
        } else {
            format!("{DEPENDENCY_SKIP_PREFIX}{via}' not executed")
        };
        tracing::debug!(step_id = %dependent, reason = %reason, "skipping dependent step");
        state.mark_skipped(dependent, reason);
    }
}

/// Enumerate why each pending step cannot run.
///
/// Returns whether the blockage stems from a failure, and the message.
fn describe_blockage(workflow: &Workflow, state: &WorkflowState, pending: &[&WorkflowStep]) -> (bool, String) {
    let producers = producer_map(&workflow.steps);
    let mut hard_failure = false;
    let mut parts = Vec::new();

    for step in pending {
        for name in missing_requirements(step, &state.artifacts) {
            let cause = match producers.get(name) {
                None => "no step creates it".to_string(),
                Some(p) if state.is_failed(p) => {
                    hard_failure = true;
                    format!("producer '{p}' failed")
                }
                Some(p) if state.is_skipped(p) => {
                    hard_failure = true;
                    format!("producer '{p}' was skipped")
                }
                Some(p) if state.is_completed(p) => {
                    format!("producer '{p}' completed without creating it")
                }
                Some(p) => format!("producer '{p}' has not run"),
            };
            parts.push(format!("step '{}' is missing artifact '{name}' ({cause})", step.id));
        }
    }

    (
        hard_failure,
        format!("{} pending step(s) cannot proceed: {}", pending.len(), parts.join("; ")),
    )
}

/// Clear failures and their consequences so a failed or blocked run can
/// continue.
fn rearm(state: &mut WorkflowState) {
    state.failed_steps.clear();
    state
        .artifacts
        .retain(|_, a| a.status != ArtifactStatus::Waived);

    let dependency_skips: Vec<String> = state
        .skip_reasons
        .iter()
        .filter(|(_, reason)| reason.starts_with(DEPENDENCY_SKIP_PREFIX))
        .map(|(id, _)| id.clone())
        .collect();
    state.skipped_steps.retain(|id| !dependency_skips.contains(id));
    for id in &dependency_skips {
        state.skip_reasons.remove(id);
    }

    state.status = WorkflowStatus::Running;
    state.error = None;
    state.completed_at = None;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
