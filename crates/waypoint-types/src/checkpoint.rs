//! Checkpoint, snapshot and retention types.
//!
//! `CheckpointConfig` drives the policy engine in `waypoint-core`;
//! `StateMetadata`, `SnapshotInfo` and `CleanupReport` are what the snapshot
//! store hands back to callers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowStatus;

/// Schema version written into every new snapshot.
pub const CURRENT_SCHEMA_VERSION: &str = "1.2";

// ---------------------------------------------------------------------------
// Checkpoint policy configuration
// ---------------------------------------------------------------------------

/// When the execution loop writes a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointFrequency {
    /// After every completed step.
    #[default]
    EveryStep,
    /// On every `interval`-th decision.
    EveryNSteps,
    /// Only after gate steps.
    OnGates,
    /// When `interval` seconds have passed since the last checkpoint.
    TimeBased,
    /// Never automatically; callers request checkpoints explicitly.
    Manual,
}

/// Checkpoint policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub frequency: CheckpointFrequency,
    /// Step count for `every_n_steps`, seconds for `time_based`.
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_interval() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            frequency: CheckpointFrequency::EveryStep,
            interval: default_interval(),
            enabled: true,
        }
    }
}

impl CheckpointConfig {
    /// Shorthand for a given frequency with the given interval.
    pub fn new(frequency: CheckpointFrequency, interval: u64) -> Self {
        Self {
            frequency,
            interval,
            enabled: true,
        }
    }
}

/// Observability payload stored alongside a policy-triggered snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_time: DateTime<Utc>,
    /// Number of policy decisions made so far in this run.
    pub step_count: u64,
    pub current_step: Option<String>,
    pub completed_count: usize,
    pub skipped_count: usize,
    /// Best-effort estimate; see `CheckpointPolicy::progress_percentage`.
    pub progress_percentage: f64,
    pub workflow_status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_action: Option<String>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Which snapshot to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotQuery {
    /// Newest snapshot of the given run.
    Latest(String),
    /// Newest snapshot of any run.
    Newest,
    /// An explicit snapshot file.
    Path(PathBuf),
}

/// Metadata returned next to a loaded state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMetadata {
    /// File the state was read from.
    pub path: PathBuf,
    /// Schema version as stored on disk (before any migration).
    pub version: String,
    /// Set when the stored version predates `CURRENT_SCHEMA_VERSION`.
    pub migrated_from: Option<String>,
    pub saved_at: DateTime<Utc>,
    pub checksum: String,
    pub compressed: bool,
    pub checkpoint: Option<CheckpointMetadata>,
}

/// A snapshot file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub workflow_id: String,
    pub saved_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub compressed: bool,
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Snapshot retention policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delete snapshots older than this many days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    /// Newest snapshots per run that are never deleted.
    #[serde(default = "default_keep_latest")]
    pub keep_latest: usize,
    /// Upper bound on the total size of the snapshot directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_mb: Option<f64>,
}

fn default_keep_latest() -> usize {
    1
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: Some(30),
            keep_latest: default_keep_latest(),
            max_size_mb: None,
        }
    }
}

/// Outcome of a cleanup sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    /// The policy is disabled; nothing was inspected.
    Disabled,
    Completed,
}

/// Report returned by a cleanup sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub status: CleanupStatus,
    /// Deleted snapshot files, oldest first.
    pub deleted: Vec<PathBuf>,
    pub freed_mb: f64,
}

impl CleanupReport {
    pub fn disabled() -> Self {
        Self {
            status: CleanupStatus::Disabled,
            deleted: Vec::new(),
            freed_mb: 0.0,
        }
    }
}
