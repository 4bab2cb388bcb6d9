//! Snapshot schema migration.
//!
//! Snapshots are migrated as raw JSON before typed decoding, one version at
//! a time, until they reach `CURRENT_SCHEMA_VERSION`. Each step only adds
//! fields with empty defaults; nothing already present is overwritten.
//!
//! History:
//! - `1.0`: no `skipped_steps`, `artifacts`, `variables`
//! - `1.1`: adds them
//! - `1.2`: adds `workflow_name`, `failed_steps`, `skip_reasons`, `error`,
//!   `step_executions`, `completed_at`

use serde_json::{Map, Value, json};
use waypoint_types::checkpoint::CURRENT_SCHEMA_VERSION;
use waypoint_types::error::StateError;

/// Every schema version this build can read.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0", "1.1", CURRENT_SCHEMA_VERSION];

/// Bring `doc` from `version` up to `CURRENT_SCHEMA_VERSION` in place.
///
/// Returns the original version when a migration ran, `None` when the
/// document was already current.
pub fn migrate(doc: &mut Map<String, Value>, version: &str) -> Result<Option<String>, StateError> {
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(None);
    }

    let mut current = version.to_string();
    while current != CURRENT_SCHEMA_VERSION {
        current = match current.as_str() {
            "1.0" => migrate_1_0_to_1_1(doc),
            "1.1" => migrate_1_1_to_1_2(doc),
            other => {
                return Err(StateError::Migration {
                    from: other.to_string(),
                    reason: format!(
                        "unsupported schema version (supported: {})",
                        SUPPORTED_VERSIONS.join(", ")
                    ),
                });
            }
        };
        doc.insert("version".to_string(), Value::String(current.clone()));
    }

    tracing::info!(
        from = version,
        to = CURRENT_SCHEMA_VERSION,
        "migrated snapshot schema"
    );
    Ok(Some(version.to_string()))
}

fn migrate_1_0_to_1_1(doc: &mut Map<String, Value>) -> String {
    insert_default(doc, "skipped_steps", json!([]));
    insert_default(doc, "artifacts", json!({}));
    insert_default(doc, "variables", json!({}));
    "1.1".to_string()
}

fn migrate_1_1_to_1_2(doc: &mut Map<String, Value>) -> String {
    let name = doc
        .get("workflow_id")
        .and_then(Value::as_str)
        .map(workflow_name_from_id)
        .unwrap_or_default();
    insert_default(doc, "workflow_name", Value::String(name));
    insert_default(doc, "failed_steps", json!([]));
    insert_default(doc, "skip_reasons", json!({}));
    insert_default(doc, "error", Value::Null);
    insert_default(doc, "step_executions", json!([]));
    insert_default(doc, "completed_at", Value::Null);
    "1.2".to_string()
}

/// Older snapshots never stored the definition name; the run ID prefix
/// (`{workflow.id}-{timestamp}`) is the best available stand-in.
fn workflow_name_from_id(workflow_id: &str) -> String {
    match workflow_id.rsplit_once('-') {
        Some((prefix, _)) => prefix.to_string(),
        None => workflow_id.to_string(),
    }
}

fn insert_default(doc: &mut Map<String, Value>, key: &str, value: Value) {
    if !doc.contains_key(key) || (doc[key].is_null() && !value.is_null()) {
        doc.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_0_doc() -> Map<String, Value> {
        let value = json!({
            "version": "1.0",
            "workflow_id": "greenfield-20260101T000000",
            "started_at": "2026-01-01T00:00:00Z",
            "current_step": "prd",
            "completed_steps": ["brief"],
            "status": "running",
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_migrate_1_0_adds_defaults() {
        let mut doc = v1_0_doc();
        let from = migrate(&mut doc, "1.0").unwrap();

        assert_eq!(from.as_deref(), Some("1.0"));
        assert_eq!(doc["version"], CURRENT_SCHEMA_VERSION);
        assert_eq!(doc["skipped_steps"], json!([]));
        assert_eq!(doc["artifacts"], json!({}));
        assert_eq!(doc["variables"], json!({}));
        assert_eq!(doc["failed_steps"], json!([]));
        assert_eq!(doc["workflow_name"], "greenfield");
        // Untouched
        assert_eq!(doc["completed_steps"], json!(["brief"]));
    }

    #[test]
    fn test_migrate_keeps_existing_values() {
        let mut doc = v1_0_doc();
        doc.insert("variables".to_string(), json!({"project": "atlas"}));
        migrate(&mut doc, "1.0").unwrap();
        assert_eq!(doc["variables"]["project"], "atlas");
    }

    #[test]
    fn test_current_version_is_noop() {
        let mut doc = v1_0_doc();
        doc.insert("version".to_string(), json!(CURRENT_SCHEMA_VERSION));
        let before = doc.clone();
        assert_eq!(migrate(&mut doc, CURRENT_SCHEMA_VERSION).unwrap(), None);
        assert_eq!(doc, before);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut doc = v1_0_doc();
        for version in ["0.9", "2.0", "1.3", ""] {
            let err = migrate(&mut doc, version).unwrap_err();
            match err {
                StateError::Migration { from, .. } => assert_eq!(from, version),
                other => panic!("expected migration error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_workflow_name_from_id() {
        assert_eq!(workflow_name_from_id("brown-field-20260101T000000"), "brown-field");
        assert_eq!(workflow_name_from_id("plain"), "plain");
    }
}
