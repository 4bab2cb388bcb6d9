//! Checkpoint policy engine.
//!
//! `CheckpointPolicy` is a stateful decision function over the stream of
//! step completions: after each step the execution loop asks it whether to
//! persist a snapshot now. It never writes anything itself; the loop calls
//! `record_checkpoint` once a snapshot has actually been saved.

use chrono::{DateTime, Utc};
use waypoint_types::checkpoint::{CheckpointConfig, CheckpointFrequency, CheckpointMetadata};
use waypoint_types::workflow::{WorkflowState, WorkflowStep};

// ---------------------------------------------------------------------------
// CheckpointPolicy
// ---------------------------------------------------------------------------

/// Decides when the execution loop writes a snapshot.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    config: CheckpointConfig,
    /// Number of `should_checkpoint` calls so far, whatever they returned.
    decisions: u64,
    last_checkpoint_at: Option<DateTime<Utc>>,
    last_checkpoint_step: Option<String>,
    /// Step count of the workflow, when known.
    total_steps: Option<usize>,
}

impl CheckpointPolicy {
    pub fn new(config: CheckpointConfig) -> Self {
        Self {
            config,
            decisions: 0,
            last_checkpoint_at: None,
            last_checkpoint_step: None,
            total_steps: None,
        }
    }

    /// Let progress estimates use the real step count.
    pub fn with_total_steps(mut self, total: usize) -> Self {
        self.total_steps = Some(total);
        self
    }

    /// Continue counting from `decisions` already made, e.g. on resume.
    pub fn with_decisions(mut self, decisions: u64) -> Self {
        self.decisions = decisions;
        self
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Swap the configuration mid-run. The decision counter is kept.
    pub fn set_config(&mut self, config: CheckpointConfig) {
        self.config = config;
    }

    pub fn decisions(&self) -> u64 {
        self.decisions
    }

    pub fn last_checkpoint_at(&self) -> Option<DateTime<Utc>> {
        self.last_checkpoint_at
    }

    pub fn last_checkpoint_step(&self) -> Option<&str> {
        self.last_checkpoint_step.as_deref()
    }

    /// Whether a snapshot should be written after `step` completed.
    pub fn should_checkpoint(&mut self, step: &WorkflowStep, state: &WorkflowState, is_gate: bool) -> bool {
        self.should_checkpoint_at(step, state, is_gate, Utc::now())
    }

    /// `should_checkpoint` with an explicit clock.
    ///
    /// Always advances the decision counter, so `every_n_steps` stays
    /// aligned even if the mode is changed between calls.
    pub fn should_checkpoint_at(
        &mut self,
        step: &WorkflowStep,
        _state: &WorkflowState,
        is_gate: bool,
        now: DateTime<Utc>,
    ) -> bool {
        self.decisions += 1;

        if !self.config.enabled {
            return false;
        }

        let decision = match self.config.frequency {
            CheckpointFrequency::EveryStep => true,
            CheckpointFrequency::EveryNSteps => self.decisions % self.config.interval.max(1) == 0,
            CheckpointFrequency::OnGates => is_gate,
            CheckpointFrequency::TimeBased => match self.last_checkpoint_at {
                None => true,
                Some(last) => {
                    let elapsed = (now - last).num_milliseconds().max(0) as u64;
                    elapsed >= self.config.interval.saturating_mul(1000)
                }
            },
            CheckpointFrequency::Manual => false,
        };

        tracing::trace!(
            step_id = %step.id,
            decision_count = self.decisions,
            frequency = ?self.config.frequency,
            decision,
            "checkpoint decision"
        );
        decision
    }

    /// Note that a snapshot was written after `step_id`.
    pub fn record_checkpoint(&mut self, step_id: Option<&str>) {
        self.record_checkpoint_at(step_id, Utc::now());
    }

    pub fn record_checkpoint_at(&mut self, step_id: Option<&str>, at: DateTime<Utc>) {
        self.last_checkpoint_at = Some(at);
        if let Some(id) = step_id {
            self.last_checkpoint_step = Some(id.to_string());
        }
    }

    /// Observability payload stored alongside a snapshot.
    pub fn get_checkpoint_metadata(
        &self,
        state: &WorkflowState,
        step: Option<&WorkflowStep>,
    ) -> CheckpointMetadata {
        CheckpointMetadata {
            checkpoint_time: Utc::now(),
            step_count: self.decisions,
            current_step: state.current_step.clone(),
            completed_count: state.completed_steps.len(),
            skipped_count: state.skipped_steps.len(),
            progress_percentage: self.progress_percentage(state),
            workflow_status: state.status,
            trigger_step_id: step.map(|s| s.id.clone()),
            trigger_agent: step.map(|s| s.agent.clone()),
            trigger_action: step.map(|s| s.action.clone()),
        }
    }

    /// Best-effort progress estimate in percent.
    ///
    /// With a known step count this is the share of completed or skipped
    /// steps. Without one it is `done / (done + 1)`, which grows with each
    /// finished step but never reaches 100. Approximate; not a correctness
    /// signal.
    pub fn progress_percentage(&self, state: &WorkflowState) -> f64 {
        let done = (state.completed_steps.len() + state.skipped_steps.len()) as f64;
        match self.total_steps {
            Some(0) => 100.0,
            Some(total) => (done / total as f64 * 100.0).min(100.0),
            None => done / (done + 1.0) * 100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use waypoint_types::workflow::{Workflow, WorkflowStatus};

    fn fixture() -> (WorkflowStep, WorkflowState) {
        let step = WorkflowStep::new("prd", "pm", "create-prd");
        let wf = Workflow {
            id: "wf".to_string(),
            name: "wf".to_string(),
            version: "1".to_string(),
            steps: vec![step.clone()],
        };
        let state = WorkflowState::new(&wf, Utc::now());
        (step, state)
    }

    fn policy(frequency: CheckpointFrequency, interval: u64) -> CheckpointPolicy {
        CheckpointPolicy::new(CheckpointConfig::new(frequency, interval))
    }

    #[test]
    fn test_every_step_always() {
        let (step, state) = fixture();
        let mut p = policy(CheckpointFrequency::EveryStep, 1);
        assert!((0..5).all(|_| p.should_checkpoint(&step, &state, false)));
    }

    #[test]
    fn test_every_n_steps_true_on_multiples() {
        let (step, state) = fixture();
        for k in 1..=5u64 {
            let mut p = policy(CheckpointFrequency::EveryNSteps, k);
            for call in 1..=20u64 {
                let decision = p.should_checkpoint(&step, &state, false);
                assert_eq!(decision, call % k == 0, "k={k} call={call}");
            }
        }
    }

    #[test]
    fn test_counter_advances_across_mode_switch() {
        let (step, state) = fixture();
        let mut p = policy(CheckpointFrequency::Manual, 1);
        assert!(!p.should_checkpoint(&step, &state, false));
        assert!(!p.should_checkpoint(&step, &state, false));
        p.set_config(CheckpointConfig::new(CheckpointFrequency::EveryNSteps, 3));
        // Third decision overall.
        assert!(p.should_checkpoint(&step, &state, false));
        assert_eq!(p.decisions(), 3);
    }

    #[test]
    fn test_seeded_decisions_keep_cadence() {
        let (step, state) = fixture();
        let mut p = policy(CheckpointFrequency::EveryNSteps, 2).with_decisions(1);
        assert!(p.should_checkpoint(&step, &state, false));
        assert!(!p.should_checkpoint(&step, &state, false));
        assert_eq!(p.decisions(), 3);
    }

    #[test]
    fn test_on_gates() {
        let (step, state) = fixture();
        let mut p = policy(CheckpointFrequency::OnGates, 1);
        assert!(!p.should_checkpoint(&step, &state, false));
        assert!(p.should_checkpoint(&step, &state, true));
    }

    #[test]
    fn test_time_based() {
        let (step, state) = fixture();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let mut p = policy(CheckpointFrequency::TimeBased, 60);

        // No checkpoint yet
        assert!(p.should_checkpoint_at(&step, &state, false, t0));
        p.record_checkpoint_at(Some("prd"), t0);

        assert!(!p.should_checkpoint_at(&step, &state, false, t0 + chrono::Duration::seconds(59)));
        assert!(p.should_checkpoint_at(&step, &state, false, t0 + chrono::Duration::seconds(60)));
        assert_eq!(p.last_checkpoint_step(), Some("prd"));
    }

    #[test]
    fn test_manual_and_disabled_never() {
        let (step, state) = fixture();
        let mut manual = policy(CheckpointFrequency::Manual, 1);
        assert!(!manual.should_checkpoint(&step, &state, true));

        let mut disabled = CheckpointPolicy::new(CheckpointConfig {
            enabled: false,
            ..CheckpointConfig::default()
        });
        assert!(!disabled.should_checkpoint(&step, &state, true));
        assert_eq!(disabled.decisions(), 1);
    }

    #[test]
    fn test_metadata_fields() {
        let (step, mut state) = fixture();
        state.status = WorkflowStatus::Running;
        state.current_step = Some("prd".to_string());
        state.mark_completed("prd");

        let mut p = policy(CheckpointFrequency::EveryStep, 1).with_total_steps(4);
        p.should_checkpoint(&step, &state, false);
        let meta = p.get_checkpoint_metadata(&state, Some(&step));

        assert_eq!(meta.step_count, 1);
        assert_eq!(meta.completed_count, 1);
        assert_eq!(meta.skipped_count, 0);
        assert_eq!(meta.progress_percentage, 25.0);
        assert_eq!(meta.workflow_status, WorkflowStatus::Running);
        assert_eq!(meta.trigger_agent.as_deref(), Some("pm"));
        assert_eq!(meta.trigger_action.as_deref(), Some("create-prd"));

        let bare = p.get_checkpoint_metadata(&state, None);
        assert!(bare.trigger_step_id.is_none());
    }

    #[test]
    fn test_progress_estimate_without_total() {
        let (_, mut state) = fixture();
        let p = policy(CheckpointFrequency::EveryStep, 1);
        assert_eq!(p.progress_percentage(&state), 0.0);
        state.mark_completed("a");
        assert_eq!(p.progress_percentage(&state), 50.0);
        state.mark_skipped("b", "x");
        state.mark_completed("c");
        assert_eq!(p.progress_percentage(&state), 75.0);
    }
}
