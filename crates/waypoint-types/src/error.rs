use thiserror::Error;

/// Errors from the snapshot store (used by the `StateStore` trait in waypoint-core).
#[derive(Debug, Error)]
pub enum StateError {
    /// The snapshot exists but cannot be trusted: invalid JSON or gzip, a
    /// missing required field, a checksum mismatch, or a type mismatch.
    #[error("corrupted snapshot '{path}': {reason}")]
    Corrupted { path: String, reason: String },

    /// The snapshot's schema version cannot be migrated to the current one.
    #[error("cannot migrate snapshot from version '{from}': {reason}")]
    Migration { from: String, reason: String },

    #[error("snapshot not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StateError {
    /// Shorthand for a corruption error on `path`.
    pub fn corrupted(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        StateError::Corrupted {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, StateError::Corrupted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupted_message_names_invariant() {
        let err = StateError::corrupted("/tmp/a.json", "missing required field 'workflow_id'");
        let msg = err.to_string();
        assert!(msg.starts_with("corrupted snapshot"));
        assert!(msg.contains("workflow_id"));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_migration_message() {
        let err = StateError::Migration {
            from: "9.0".to_string(),
            reason: "newer than supported".to_string(),
        };
        assert!(err.to_string().contains("9.0"));
        assert!(!err.is_corruption());
    }
}
