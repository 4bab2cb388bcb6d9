//! Filesystem snapshot store.
//!
//! Implements the `StateStore` trait from `waypoint-core`. Every save writes
//! a new immutable file into one directory:
//!
//! ```text
//! {dir}/
//!   greenfield-20260301T090000_20260301T090412123456Z.json
//!   greenfield-20260301T090000_20260301T091530000001Z.json.gz
//! ```
//!
//! File names are `{workflow_id}_{saved_at}` so a plain sort is chronological
//! per run. Writes go to `{name}.tmp` first and are renamed into place, so a
//! reader never observes a partial snapshot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use waypoint_core::repository::state::StateStore;
use waypoint_types::checkpoint::{
    CheckpointMetadata, CleanupPolicy, CleanupReport, CleanupStatus, SnapshotInfo, SnapshotQuery,
    StateMetadata,
};
use waypoint_types::error::StateError;
use waypoint_types::workflow::WorkflowState;

use super::cleanup::{plan_cleanup, size_mb};
use super::codec::{compress, decode_snapshot, encode_snapshot};

/// Timestamp format embedded in snapshot file names (microsecond precision).
pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";

const JSON_EXT: &str = ".json";
const GZIP_EXT: &str = ".json.gz";
const TMP_EXT: &str = ".tmp";

/// Snapshot store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_snapshot(&self, path: &Path) -> Result<(WorkflowState, StateMetadata), StateError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(path.display().to_string()));
            }
            Err(e) => {
                return Err(StateError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let decoded = decode_snapshot(&bytes, &path.display().to_string())?;
        tracing::debug!(
            path = %path.display(),
            workflow_id = %decoded.state.workflow_id,
            version = %decoded.version,
            "snapshot loaded"
        );

        let metadata = StateMetadata {
            path: path.to_path_buf(),
            version: decoded.version,
            migrated_from: decoded.migrated_from,
            saved_at: decoded.saved_at,
            checksum: decoded.checksum,
            compressed: decoded.compressed,
            checkpoint: decoded.checkpoint,
        };
        Ok((decoded.state, metadata))
    }

    async fn scan(&self) -> Result<Vec<SnapshotInfo>, StateError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StateError::Storage(format!(
                    "failed to list {}: {e}",
                    self.dir.display()
                )));
            }
        };

        let mut snapshots = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(StateError::Storage(format!("failed to list snapshots: {e}"))),
            };
            let name = entry.file_name();
            let Some((workflow_id, saved_at, compressed)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            let size_bytes = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => continue,
            };
            snapshots.push(SnapshotInfo {
                path: entry.path(),
                workflow_id,
                saved_at,
                size_bytes,
                compressed,
            });
        }

        snapshots.sort_by(|a, b| a.saved_at.cmp(&b.saved_at).then_with(|| a.path.cmp(&b.path)));
        Ok(snapshots)
    }
}

impl StateStore for FileStateStore {
    async fn save_state(
        &self,
        state: &WorkflowState,
        checkpoint: Option<&CheckpointMetadata>,
        compress_snapshot: bool,
    ) -> Result<PathBuf, StateError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StateError::Storage(format!("failed to create {}: {e}", self.dir.display()))
        })?;

        // Same-microsecond saves get distinct, still-ordered names.
        let mut saved_at = Utc::now();
        let mut path = self.dir.join(snapshot_file_name(&state.workflow_id, saved_at, compress_snapshot));
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            saved_at += chrono::Duration::microseconds(1);
            path = self.dir.join(snapshot_file_name(&state.workflow_id, saved_at, compress_snapshot));
        }

        let (json, checksum) = encode_snapshot(state, checkpoint, saved_at)?;
        let bytes = if compress_snapshot { compress(&json)? } else { json };

        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_EXT);
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            StateError::Storage(format!("failed to write {}: {e}", tmp.display()))
        })?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StateError::Storage(format!(
                "failed to move snapshot into place at {}: {e}",
                path.display()
            )));
        }

        tracing::debug!(
            workflow_id = %state.workflow_id,
            path = %path.display(),
            bytes = bytes.len(),
            checksum = %checksum,
            "snapshot saved"
        );
        Ok(path)
    }

    async fn load_state(
        &self,
        query: &SnapshotQuery,
    ) -> Result<(WorkflowState, StateMetadata), StateError> {
        match query {
            SnapshotQuery::Path(path) => self.read_snapshot(path).await,
            SnapshotQuery::Latest(workflow_id) => {
                let path = self
                    .scan()
                    .await?
                    .into_iter()
                    .rfind(|s| &s.workflow_id == workflow_id)
                    .map(|s| s.path)
                    .ok_or_else(|| {
                        StateError::NotFound(format!("no snapshot for workflow '{workflow_id}'"))
                    })?;
                let (state, metadata) = self.read_snapshot(&path).await?;
                if &state.workflow_id != workflow_id {
                    return Err(StateError::corrupted(
                        path.display(),
                        format!(
                            "file name names run '{workflow_id}' but contents belong to '{}'",
                            state.workflow_id
                        ),
                    ));
                }
                Ok((state, metadata))
            }
            SnapshotQuery::Newest => {
                let path = self.scan().await?.pop().map(|s| s.path).ok_or_else(|| {
                    StateError::NotFound(format!("no snapshots in {}", self.dir.display()))
                })?;
                self.read_snapshot(&path).await
            }
        }
    }

    async fn list_snapshots(&self, workflow_id: Option<&str>) -> Result<Vec<SnapshotInfo>, StateError> {
        let mut snapshots = self.scan().await?;
        if let Some(id) = workflow_id {
            snapshots.retain(|s| s.workflow_id == id);
        }
        Ok(snapshots)
    }

    async fn execute_cleanup(&self, policy: &CleanupPolicy) -> Result<CleanupReport, StateError> {
        if !policy.enabled {
            return Ok(CleanupReport::disabled());
        }

        let snapshots = self.scan().await?;
        let planned = plan_cleanup(&snapshots, policy, Utc::now());

        let mut deleted = Vec::with_capacity(planned.len());
        for snap in planned {
            match tokio::fs::remove_file(&snap.path).await {
                Ok(()) => {
                    tracing::info!(
                        path = %snap.path.display(),
                        workflow_id = %snap.workflow_id,
                        "deleted expired snapshot"
                    );
                    deleted.push(snap);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %snap.path.display(), error = %e, "failed to delete snapshot");
                }
            }
        }

        let freed_mb = size_mb(&deleted);
        Ok(CleanupReport {
            status: CleanupStatus::Completed,
            deleted: deleted.into_iter().map(|s| s.path).collect(),
            freed_mb,
        })
    }
}

// ---------------------------------------------------------------------------
// File naming
// ---------------------------------------------------------------------------

/// Escape a workflow ID for use in a file name.
///
/// ASCII alphanumerics and `-_.` pass through; every other byte becomes
/// `~XX` (uppercase hex), `~` included. Distinct IDs never share a name.
pub fn encode_workflow_id(workflow_id: &str) -> String {
    let mut out = String::with_capacity(workflow_id.len());
    for byte in workflow_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("~{byte:02X}"));
        }
    }
    out
}

/// Inverse of [`encode_workflow_id`]. `None` for names it never produces.
pub fn decode_workflow_id(encoded: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut rest = encoded.as_bytes();
    while let Some((&first, tail)) = rest.split_first() {
        if first == b'~' {
            let hex = tail.get(..2)?;
            let hex = std::str::from_utf8(hex).ok()?;
            let byte = u8::from_str_radix(hex, 16).ok()?;
            if hex != format!("{byte:02X}") {
                return None;
            }
            bytes.push(byte);
            rest = &tail[2..];
        } else if first.is_ascii_alphanumeric() || matches!(first, b'-' | b'_' | b'.') {
            bytes.push(first);
            rest = tail;
        } else {
            return None;
        }
    }
    String::from_utf8(bytes).ok()
}

/// `{workflow_id}_{saved_at}.json[.gz]`
pub fn snapshot_file_name(workflow_id: &str, saved_at: DateTime<Utc>, compressed: bool) -> String {
    format!(
        "{}_{}{}",
        encode_workflow_id(workflow_id),
        saved_at.format(SNAPSHOT_TIMESTAMP_FORMAT),
        if compressed { GZIP_EXT } else { JSON_EXT }
    )
}

/// Parse a snapshot file name into `(workflow_id, saved_at, compressed)`.
///
/// Temporary files and anything else in the directory yield `None`.
pub fn parse_file_name(name: &str) -> Option<(String, DateTime<Utc>, bool)> {
    let (stem, compressed) = if let Some(stem) = name.strip_suffix(GZIP_EXT) {
        (stem, true)
    } else {
        (name.strip_suffix(JSON_EXT)?, false)
    };
    let (encoded_id, timestamp) = stem.rsplit_once('_')?;
    if encoded_id.is_empty() {
        return None;
    }
    let workflow_id = decode_workflow_id(encoded_id)?;
    let saved_at = NaiveDateTime::parse_from_str(timestamp, SNAPSHOT_TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    Some((workflow_id, saved_at, compressed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
