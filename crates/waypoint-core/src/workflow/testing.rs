//! Test doubles shared by the workflow tests: a scripted `StepWorker` and an
//! in-memory `StateStore`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use waypoint_types::checkpoint::{
    CURRENT_SCHEMA_VERSION, CheckpointMetadata, CleanupPolicy, CleanupReport, CleanupStatus,
    SnapshotInfo, SnapshotQuery, StateMetadata,
};
use waypoint_types::error::StateError;
use waypoint_types::workflow::{WorkflowState, WorkflowStep};

use crate::repository::state::StateStore;

use super::worker::{ArtifactPaths, StepContext, StepError, StepWorker};

// ---------------------------------------------------------------------------
// ScriptedWorker
// ---------------------------------------------------------------------------

/// Behaviour of one step under `ScriptedWorker`.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub delay: Duration,
    /// The first `failures` calls fail.
    pub failures: u32,
    pub kind: &'static str,
    pub panic: bool,
    /// Succeed without reporting any artifacts.
    pub omit_artifacts: bool,
}

impl Script {
    pub fn delay_ms(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
            ..Self::default()
        }
    }

    pub fn fail_times(failures: u32, kind: &'static str) -> Self {
        Self {
            failures,
            kind,
            ..Self::default()
        }
    }

    pub fn always_fail(kind: &'static str) -> Self {
        Self::fail_times(u32::MAX, kind)
    }

    pub fn no_artifacts() -> Self {
        Self {
            omit_artifacts: true,
            ..Self::default()
        }
    }

    pub fn panics() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }
}

/// Worker whose per-step behaviour is scripted up front. Unscripted steps
/// succeed immediately. Every success reports `out/{name}` for each
/// artifact in `creates`.
#[derive(Default)]
pub struct ScriptedWorker {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, u32>>,
    order: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, step_id: &str, script: Script) -> Self {
        self.scripts.insert(step_id.to_string(), script);
        self
    }

    pub fn calls(&self, step_id: &str) -> u32 {
        self.calls.lock().unwrap().get(step_id).copied().unwrap_or(0)
    }

    /// Step IDs in the order their calls started.
    pub fn call_order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl StepWorker for ScriptedWorker {
    async fn execute_step(
        &self,
        step: &WorkflowStep,
        _ctx: &StepContext,
    ) -> Result<ArtifactPaths, StepError> {
        let script = self.scripts.get(&step.id).cloned().unwrap_or_default();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(step.id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        self.order.lock().unwrap().push(step.id.clone());

        if script.panic {
            panic!("scripted panic in {}", step.id);
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(script.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if call <= script.failures {
            return Err(StepError::failed(
                script.kind,
                format!("{} failed on call {call}", step.id),
            ));
        }
        if script.omit_artifacts {
            return Ok(ArtifactPaths::new());
        }
        Ok(step
            .creates
            .iter()
            .map(|name| (name.clone(), format!("out/{name}")))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

/// One saved snapshot.
#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub path: PathBuf,
    pub state: WorkflowState,
    pub checkpoint: Option<CheckpointMetadata>,
    pub saved_at: DateTime<Utc>,
}

/// `StateStore` that keeps snapshots in a vector.
#[derive(Default)]
pub struct MemoryStateStore {
    saved: Mutex<Vec<SavedSnapshot>>,
    fail_saves: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail with a storage error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn snapshots(&self) -> Vec<SavedSnapshot> {
        self.saved.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<SavedSnapshot> {
        self.saved.lock().unwrap().last().cloned()
    }
}

impl StateStore for MemoryStateStore {
    async fn save_state(
        &self,
        state: &WorkflowState,
        checkpoint: Option<&CheckpointMetadata>,
        _compress: bool,
    ) -> Result<PathBuf, StateError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StateError::Storage("disk full".to_string()));
        }
        let mut saved = self.saved.lock().unwrap();
        let path = PathBuf::from(format!("mem/{}_{}.json", state.workflow_id, saved.len()));
        saved.push(SavedSnapshot {
            path: path.clone(),
            state: state.clone(),
            checkpoint: checkpoint.cloned(),
            saved_at: Utc::now(),
        });
        Ok(path)
    }

    async fn load_state(
        &self,
        query: &SnapshotQuery,
    ) -> Result<(WorkflowState, StateMetadata), StateError> {
        let saved = self.saved.lock().unwrap();
        let found = match query {
            SnapshotQuery::Latest(id) => saved.iter().rev().find(|s| &s.state.workflow_id == id),
            SnapshotQuery::Newest => saved.last(),
            SnapshotQuery::Path(path) => saved.iter().find(|s| &s.path == path),
        };
        let snap = found.ok_or_else(|| StateError::NotFound(format!("{query:?}")))?;
        Ok((
            snap.state.clone(),
            StateMetadata {
                path: snap.path.clone(),
                version: CURRENT_SCHEMA_VERSION.to_string(),
                migrated_from: None,
                saved_at: snap.saved_at,
                checksum: String::new(),
                compressed: false,
                checkpoint: snap.checkpoint.clone(),
            },
        ))
    }

    async fn list_snapshots(&self, workflow_id: Option<&str>) -> Result<Vec<SnapshotInfo>, StateError> {
        let saved = self.saved.lock().unwrap();
        Ok(saved
            .iter()
            .filter(|s| workflow_id.is_none_or(|id| s.state.workflow_id == id))
            .map(|s| SnapshotInfo {
                path: s.path.clone(),
                workflow_id: s.state.workflow_id.clone(),
                saved_at: s.saved_at,
                size_bytes: 0,
                compressed: false,
            })
            .collect())
    }

    async fn execute_cleanup(&self, policy: &CleanupPolicy) -> Result<CleanupReport, StateError> {
        if !policy.enabled {
            return Ok(CleanupReport::disabled());
        }
        Ok(CleanupReport {
            status: CleanupStatus::Completed,
            deleted: Vec::new(),
            freed_mb: 0.0,
        })
    }
}
