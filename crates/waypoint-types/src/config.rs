//! Engine configuration types for waypoint.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls
//! parallelism, timeouts, retry, checkpointing, retention and logging.
//! Every field has a default so a partial (or missing) file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointConfig, CleanupPolicy};

/// Top-level configuration for the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently executing steps.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Per-attempt step timeout in seconds.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Whole-run timeout in seconds. Never below twice the step timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_timeout_secs: Option<u64>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub cleanup: CleanupPolicy,

    /// Gzip snapshot files.
    #[serde(default)]
    pub compress_snapshots: bool,

    /// A running workflow with no finished step for this long is "stuck".
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,

    /// Snapshot directory override (defaults to `{data_dir}/state`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_parallel() -> usize {
    8
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_stuck_threshold_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            step_timeout_secs: default_step_timeout_secs(),
            workflow_timeout_secs: None,
            retry: RetryConfig::default(),
            checkpoint: CheckpointConfig::default(),
            cleanup: CleanupPolicy::default(),
            compress_snapshots: false,
            stuck_threshold_secs: default_stuck_threshold_secs(),
            state_dir: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Effective whole-run timeout for a workflow with `step_count` steps.
    ///
    /// A configured value is raised to at least twice the step timeout. When
    /// unset, every step is allowed two full step timeouts.
    pub fn effective_workflow_timeout_secs(&self, step_count: usize) -> u64 {
        let floor = self.step_timeout_secs.saturating_mul(2);
        match self.workflow_timeout_secs {
            Some(secs) => secs.max(floor),
            None => floor.saturating_mul(step_count.max(1) as u64),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry Configuration
// ---------------------------------------------------------------------------

/// Retry configuration for step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_seconds")]
    pub initial_backoff_seconds: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: f64,
    /// Error kinds worth retrying. `None` retries every kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable_errors: Option<Vec<String>>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_seconds() -> f64 {
    1.0
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_seconds() -> f64 {
    60.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_seconds: default_initial_backoff_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_seconds: default_max_backoff_seconds(),
            retryable_errors: None,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointFrequency;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.step_timeout_secs, 300);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.stuck_threshold_secs, 300);
        assert!(!config.compress_snapshots);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_engine_config_partial_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
max_parallel = 2
step_timeout_secs = 30

[retry]
max_attempts = 5
retryable_errors = ["io", "timeout"]

[checkpoint]
frequency = "on_gates"
"#,
        )
        .unwrap();
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.step_timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(
            config.retry.retryable_errors,
            Some(vec!["io".to_string(), "timeout".to_string()])
        );
        assert_eq!(config.checkpoint.frequency, CheckpointFrequency::OnGates);
        assert_eq!(config.cleanup.keep_latest, 1);
    }

    #[test]
    fn test_effective_workflow_timeout_floor() {
        let mut config = EngineConfig {
            step_timeout_secs: 60,
            ..EngineConfig::default()
        };
        // Unset: two step timeouts per step.
        assert_eq!(config.effective_workflow_timeout_secs(5), 600);
        assert_eq!(config.effective_workflow_timeout_secs(0), 120);

        // Configured below the floor is raised to it.
        config.workflow_timeout_secs = Some(30);
        assert_eq!(config.effective_workflow_timeout_secs(5), 120);

        config.workflow_timeout_secs = Some(3600);
        assert_eq!(config.effective_workflow_timeout_secs(5), 3600);
    }

    #[test]
    fn test_no_retry() {
        let retry = RetryConfig::no_retry();
        assert_eq!(retry.max_attempts, 1);
        assert!(retry.retryable_errors.is_none());
    }
}
