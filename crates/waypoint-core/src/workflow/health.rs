//! Run health reporting.
//!
//! A read-only view over a `WorkflowState` for monitoring: progress, elapsed
//! time, and whether a running workflow looks stuck.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use waypoint_types::workflow::{WorkflowState, WorkflowStatus};

/// Health snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: WorkflowStatus,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub progress_percent: f64,
    pub current_step: Option<String>,
    pub elapsed_seconds: f64,
    /// Running, and no step has finished for longer than the threshold.
    pub is_stuck: bool,
    /// Seconds since the last step finished (or since the run started).
    pub time_since_last_step: f64,
    pub error: Option<String>,
}

/// Build a health report for `state` at `now`.
///
/// Elapsed time stops at `completed_at` once the run has finished.
pub fn health_report(
    state: &WorkflowState,
    total_steps: usize,
    stuck_threshold: Duration,
    now: DateTime<Utc>,
) -> HealthReport {
    let end = state.completed_at.unwrap_or(now);
    let last_activity = state.last_step_finished_at().unwrap_or(state.started_at);
    let time_since_last_step = seconds_between(last_activity, now);

    let done = state.completed_steps.len() + state.skipped_steps.len();
    let progress_percent = if total_steps == 0 {
        0.0
    } else {
        (done as f64 / total_steps as f64 * 100.0).min(100.0)
    };

    HealthReport {
        status: state.status,
        completed_steps: state.completed_steps.len(),
        total_steps,
        progress_percent,
        current_step: state.current_step.clone(),
        elapsed_seconds: seconds_between(state.started_at, end),
        is_stuck: state.status == WorkflowStatus::Running
            && time_since_last_step > stuck_threshold.as_secs_f64(),
        time_since_last_step,
        error: state.error.clone(),
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds().max(0)) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use waypoint_types::workflow::{StepExecution, Workflow, WorkflowStep};

    fn running_state(started: DateTime<Utc>) -> WorkflowState {
        let wf = Workflow {
            id: "wf".to_string(),
            name: "wf".to_string(),
            version: "1".to_string(),
            steps: vec![WorkflowStep::new("a", "x", "y"), WorkflowStep::new("b", "x", "y")],
        };
        let mut state = WorkflowState::new(&wf, started);
        state.status = WorkflowStatus::Running;
        state
    }

    #[test]
    fn test_stuck_when_no_step_finished_past_threshold() {
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let state = running_state(t0);
        let threshold = Duration::from_secs(300);

        let early = health_report(&state, 2, threshold, t0 + chrono::Duration::seconds(120));
        assert!(!early.is_stuck);

        let late = health_report(&state, 2, threshold, t0 + chrono::Duration::seconds(301));
        assert!(late.is_stuck);
        assert_eq!(late.time_since_last_step, 301.0);
        assert_eq!(late.elapsed_seconds, 301.0);
    }

    #[test]
    fn test_last_finished_step_resets_stuck_clock() {
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let mut state = running_state(t0);
        let mut exec = StepExecution::start(&WorkflowStep::new("a", "x", "y"), t0);
        exec.complete(t0 + chrono::Duration::seconds(400), 1);
        state.step_executions.push(exec);
        state.mark_completed("a");

        let report = health_report(&state, 2, Duration::from_secs(300), t0 + chrono::Duration::seconds(500));
        assert!(!report.is_stuck);
        assert_eq!(report.time_since_last_step, 100.0);
        assert_eq!(report.progress_percent, 50.0);
        assert_eq!(report.completed_steps, 1);
    }

    #[test]
    fn test_finished_run_is_never_stuck() {
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let mut state = running_state(t0);
        state.status = WorkflowStatus::Failed;
        state.error = Some("boom".to_string());
        state.completed_at = Some(t0 + chrono::Duration::seconds(10));

        let report = health_report(&state, 2, Duration::from_secs(1), t0 + chrono::Duration::hours(2));
        assert!(!report.is_stuck);
        assert_eq!(report.elapsed_seconds, 10.0);
        assert_eq!(report.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_report_serializes() {
        let state = running_state(Utc::now());
        let json = serde_json::to_value(health_report(&state, 2, Duration::from_secs(300), Utc::now())).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["total_steps"], 2);
    }
}
