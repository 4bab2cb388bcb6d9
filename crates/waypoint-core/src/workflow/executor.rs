//! Bounded-parallel batch execution with per-step timeout and retry.
//!
//! `ParallelExecutor` runs one batch of ready steps. Each step runs as its own
//! task inside a `tokio::JoinSet`; a counting semaphore caps how many are
//! executing at once. A failure, timeout or panic in one task never touches
//! its siblings. Results come back sorted by step ID no matter which task
//! finished first, so identical inputs produce identical snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use waypoint_types::config::RetryConfig;
use waypoint_types::workflow::{StepExecution, WorkflowStep};

use super::retry::RetryHandler;
use super::worker::{ArtifactPaths, StepContext, StepError, StepWorker};

// ---------------------------------------------------------------------------
// StepExecutionResult
// ---------------------------------------------------------------------------

/// Final outcome of one step in a batch (after all retries).
#[derive(Debug, Clone)]
pub struct StepExecutionResult {
    pub step_id: String,
    /// Terminal execution record (completed or failed).
    pub execution: StepExecution,
    /// Produced artifacts, or the error of the last attempt.
    pub outcome: Result<ArtifactPaths, StepError>,
}

impl StepExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

// ---------------------------------------------------------------------------
// ParallelExecutor
// ---------------------------------------------------------------------------

/// Runs batches of steps against a `StepWorker`.
pub struct ParallelExecutor<W: StepWorker> {
    worker: Arc<W>,
    max_parallel: usize,
    step_timeout: Duration,
    retry: RetryConfig,
}

impl<W: StepWorker + 'static> ParallelExecutor<W> {
    /// `max_parallel` of zero is treated as one.
    pub fn new(worker: Arc<W>, max_parallel: usize, step_timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            worker,
            max_parallel: max_parallel.max(1),
            step_timeout,
            retry,
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Execute `steps` concurrently and return one result per step, sorted by
    /// step ID.
    ///
    /// A `running` record is appended to `log` for every step before any
    /// task waits on the semaphore; each record is finalised in place when
    /// its step finishes. On return, no record created here is still
    /// `running`.
    pub async fn execute_parallel(
        &self,
        steps: &[WorkflowStep],
        ctx: &StepContext,
        log: &mut Vec<StepExecution>,
        cancel: &CancellationToken,
    ) -> Vec<StepExecutionResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut join_set = JoinSet::new();
        let mut log_index: BTreeMap<String, usize> = BTreeMap::new();

        tracing::debug!(
            workflow_id = %ctx.workflow_id,
            steps = steps.len(),
            max_parallel = self.max_parallel,
            "dispatching batch"
        );

        for step in steps {
            log.push(StepExecution::start(step, Utc::now()));
            log_index.insert(step.id.clone(), log.len() - 1);

            let worker = Arc::clone(&self.worker);
            let semaphore = Arc::clone(&semaphore);
            let step = step.clone();
            let step_ctx = ctx.clone();
            let retry = self.retry.clone();
            let step_timeout = self.step_timeout;
            let token = cancel.clone();

            join_set.spawn(async move {
                let (attempts, outcome) = run_with_retry(
                    worker.as_ref(),
                    &step,
                    step_ctx,
                    &semaphore,
                    step_timeout,
                    &retry,
                    &token,
                )
                .await;
                (step.id, attempts, outcome)
            });
        }

        let mut finished: BTreeMap<String, (u32, Result<ArtifactPaths, StepError>)> = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((step_id, attempts, outcome)) => {
                    finished.insert(step_id, (attempts, outcome));
                }
                Err(e) => {
                    // The owning step is recovered below as the one with no result.
                    tracing::error!(error = %e, "step task failed to complete");
                }
            }
        }

        let mut results = Vec::with_capacity(log_index.len());
        for (step_id, idx) in log_index {
            let (attempts, outcome) = finished.remove(&step_id).unwrap_or_else(|| {
                (1, Err(StepError::failed("panic", "step task panicked")))
            });

            let now = Utc::now();
            let record = &mut log[idx];
            match &outcome {
                Ok(_) => {
                    record.complete(now, attempts);
                }
                Err(err) => {
                    tracing::warn!(
                        workflow_id = %ctx.workflow_id,
                        step_id = %step_id,
                        attempts,
                        error = %err,
                        "step failed"
                    );
                    record.fail(now, attempts, err.to_string());
                }
            }

            results.push(StepExecutionResult {
                step_id,
                execution: record.clone(),
                outcome,
            });
        }

        results
    }
}

// ---------------------------------------------------------------------------
// Per-step task body
// ---------------------------------------------------------------------------

/// Run one step until it succeeds, exhausts its retries, or is cancelled.
///
/// Returns the number of attempts made alongside the final outcome.
async fn run_with_retry<W: StepWorker>(
    worker: &W,
    step: &WorkflowStep,
    mut ctx: StepContext,
    semaphore: &Semaphore,
    step_timeout: Duration,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> (u32, Result<ArtifactPaths, StepError>) {
    let mut attempt: u32 = 1;
    loop {
        ctx.attempt = attempt;
        let err = match run_attempt(worker, step, &ctx, semaphore, step_timeout, cancel).await {
            Ok(artifacts) => return (attempt, Ok(artifacts)),
            Err(err) => err,
        };

        if !RetryHandler::should_retry(retry, attempt, &err) {
            return (attempt, Err(err));
        }

        let backoff = RetryHandler::backoff_duration(retry, attempt);
        tracing::warn!(
            step_id = %step.id,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "step attempt failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => return (attempt, Err(StepError::Cancelled)),
            _ = tokio::time::sleep(backoff) => {}
        }
        attempt += 1;
    }
}

/// A single attempt: wait for a concurrency slot, then call the worker under
/// the step timeout. The slot is released between retries.
async fn run_attempt<W: StepWorker>(
    worker: &W,
    step: &WorkflowStep,
    ctx: &StepContext,
    semaphore: &Semaphore,
    step_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ArtifactPaths, StepError> {
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return Err(StepError::Cancelled),
        permit = semaphore.acquire() => permit.map_err(|_| StepError::Cancelled)?,
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(StepError::Cancelled),
        result = tokio::time::timeout(step_timeout, worker.execute_step(step, ctx)) => {
            match result {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(StepError::TimedOut {
                    secs: step_timeout.as_secs_f64(),
                }),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
