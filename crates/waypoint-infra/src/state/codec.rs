//! Snapshot encoding and verified decoding.
//!
//! On-disk layout (schema 1.2):
//!
//! ```text
//! { "version": "1.2", ...WorkflowState fields...,
//!   "metadata": { "saved_at", "checksum", "checkpoint"? } }
//! ```
//!
//! The checksum covers the whole document minus `metadata.checksum`. Decoding
//! never guesses: invalid gzip or JSON, a missing required field, a checksum
//! mismatch or a field of the wrong type is a `StateError::Corrupted` naming
//! the problem.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Deserialize;
use serde_json::{Map, Value};
use waypoint_types::checkpoint::{CURRENT_SCHEMA_VERSION, CheckpointMetadata};
use waypoint_types::error::StateError;
use waypoint_types::workflow::WorkflowState;

use crate::crypto::hash::canonical_checksum;

use super::migration::migrate;

/// Top-level fields every readable snapshot must carry.
pub const REQUIRED_FIELDS: &[&str] = &[
    "version",
    "workflow_id",
    "started_at",
    "completed_steps",
    "status",
];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A decoded, verified and migrated snapshot.
#[derive(Debug, Clone)]
pub struct DecodedSnapshot {
    pub state: WorkflowState,
    /// Version as stored on disk.
    pub version: String,
    pub migrated_from: Option<String>,
    pub saved_at: DateTime<Utc>,
    pub checksum: String,
    pub compressed: bool,
    pub checkpoint: Option<CheckpointMetadata>,
}

#[derive(Debug, Deserialize)]
struct SnapshotMetadata {
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    checkpoint: Option<CheckpointMetadata>,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize `state` into a current-version snapshot document.
///
/// Returns the pretty-printed JSON bytes and the checksum embedded in them.
pub fn encode_snapshot(
    state: &WorkflowState,
    checkpoint: Option<&CheckpointMetadata>,
    saved_at: DateTime<Utc>,
) -> Result<(Vec<u8>, String), StateError> {
    let mut doc = match serde_json::to_value(state) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(StateError::Storage("state did not serialize to an object".to_string())),
        Err(e) => return Err(StateError::Storage(format!("failed to serialize state: {e}"))),
    };
    doc.insert("version".to_string(), Value::String(CURRENT_SCHEMA_VERSION.to_string()));

    let mut metadata = Map::new();
    metadata.insert("saved_at".to_string(), Value::String(saved_at.to_rfc3339()));
    if let Some(checkpoint) = checkpoint {
        let value = serde_json::to_value(checkpoint)
            .map_err(|e| StateError::Storage(format!("failed to serialize checkpoint metadata: {e}")))?;
        metadata.insert("checkpoint".to_string(), value);
    }
    doc.insert("metadata".to_string(), Value::Object(metadata));

    let mut value = Value::Object(doc);
    let checksum = canonical_checksum(&value);
    if let Some(Value::Object(metadata)) = value.get_mut("metadata") {
        metadata.insert("checksum".to_string(), Value::String(checksum.clone()));
    }

    let bytes = serde_json::to_vec_pretty(&value)
        .map_err(|e| StateError::Storage(format!("failed to serialize snapshot: {e}")))?;
    Ok((bytes, checksum))
}

/// Gzip `bytes`.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, StateError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| StateError::Storage(format!("gzip compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| StateError::Storage(format!("gzip compression failed: {e}")))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode snapshot bytes read from `path`.
///
/// Gzip is detected from the content, not the file name.
pub fn decode_snapshot(bytes: &[u8], path: &str) -> Result<DecodedSnapshot, StateError> {
    let compressed = bytes.starts_with(&GZIP_MAGIC);
    let raw = if compressed {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| StateError::corrupted(path, format!("invalid gzip data: {e}")))?;
        out
    } else {
        bytes.to_vec()
    };

    let value: Value = serde_json::from_slice(&raw)
        .map_err(|e| StateError::corrupted(path, format!("invalid JSON: {e}")))?;
    let Value::Object(mut doc) = value else {
        return Err(StateError::corrupted(path, "top-level value is not an object"));
    };

    for field in REQUIRED_FIELDS {
        if !doc.contains_key(*field) {
            return Err(StateError::corrupted(path, format!("missing required field '{field}'")));
        }
    }
    let version = match &doc["version"] {
        Value::String(v) => v.clone(),
        other => {
            return Err(StateError::corrupted(
                path,
                format!("field 'version' must be a string, found {other}"),
            ));
        }
    };

    let checksum = verify_checksum(&mut doc, path)?;

    let metadata_value = doc.remove("metadata").unwrap_or(Value::Null);
    let metadata: SnapshotMetadata = serde_json::from_value(metadata_value)
        .map_err(|e| StateError::corrupted(path, format!("invalid metadata: {e}")))?;

    let migrated_from = migrate(&mut doc, &version)?;
    doc.remove("version");

    let state: WorkflowState = serde_json::from_value(Value::Object(doc))
        .map_err(|e| StateError::corrupted(path, format!("invalid state fields: {e}")))?;
    let saved_at = metadata.saved_at.unwrap_or(state.started_at);

    Ok(DecodedSnapshot {
        state,
        version,
        migrated_from,
        saved_at,
        checksum,
        compressed,
        checkpoint: metadata.checkpoint,
    })
}

/// Check `metadata.checksum` against the document's content and return it.
/// Leaves `doc` with the checksum field removed.
fn verify_checksum(doc: &mut Map<String, Value>, path: &str) -> Result<String, StateError> {
    let stored = match doc.get_mut("metadata") {
        Some(Value::Object(metadata)) => metadata.remove("checksum"),
        Some(_) => return Err(StateError::corrupted(path, "field 'metadata' is not an object")),
        None => None,
    };
    let stored = match stored {
        Some(Value::String(s)) => s,
        Some(_) => return Err(StateError::corrupted(path, "field 'metadata.checksum' is not a string")),
        None => return Err(StateError::corrupted(path, "missing required field 'metadata.checksum'")),
    };

    let actual = canonical_checksum(&Value::Object(doc.clone()));
    if actual != stored {
        return Err(StateError::corrupted(
            path,
            format!("checksum mismatch (stored {stored}, computed {actual})"),
        ));
    }
    Ok(stored)
}
