//! Snapshot store trait definition.
//!
//! Defines the storage interface for versioned run-state snapshots. The
//! infrastructure layer (waypoint-infra) implements this trait on the local
//! filesystem.

use std::path::PathBuf;

use waypoint_types::checkpoint::{
    CheckpointMetadata, CleanupPolicy, CleanupReport, SnapshotInfo, SnapshotQuery, StateMetadata,
};
use waypoint_types::error::StateError;
use waypoint_types::workflow::WorkflowState;

/// Repository trait for run-state snapshots.
///
/// Snapshots are immutable once written; a save always produces a new file.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StateStore: Send + Sync {
    /// Persist `state` as a new snapshot and return its location.
    ///
    /// `checkpoint` rides along for observability; `compress` gzips the file.
    fn save_state(
        &self,
        state: &WorkflowState,
        checkpoint: Option<&CheckpointMetadata>,
        compress: bool,
    ) -> impl std::future::Future<Output = Result<PathBuf, StateError>> + Send;

    /// Load and verify a snapshot, migrating older schema versions.
    fn load_state(
        &self,
        query: &SnapshotQuery,
    ) -> impl std::future::Future<Output = Result<(WorkflowState, StateMetadata), StateError>> + Send;

    /// List snapshots, oldest first, optionally restricted to one run.
    fn list_snapshots(
        &self,
        workflow_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<SnapshotInfo>, StateError>> + Send;

    /// Apply a retention policy and report what was removed.
    fn execute_cleanup(
        &self,
        policy: &CleanupPolicy,
    ) -> impl std::future::Future<Output = Result<CleanupReport, StateError>> + Send;
}
