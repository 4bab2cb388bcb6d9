//! Retention planning for snapshot files.
//!
//! Pure: decides which snapshots a `CleanupPolicy` removes, given the
//! listing and the current time. The store performs the deletions.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use waypoint_types::checkpoint::{CleanupPolicy, SnapshotInfo};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Snapshots to delete under `policy`, oldest first.
///
/// 1. With `retention_days`, everything older than the window goes.
/// 2. With `max_size_mb`, the oldest survivors go until the total fits.
///
/// The newest `keep_latest` snapshots of every workflow are never selected.
pub fn plan_cleanup(
    snapshots: &[SnapshotInfo],
    policy: &CleanupPolicy,
    now: DateTime<Utc>,
) -> Vec<SnapshotInfo> {
    if !policy.enabled {
        return Vec::new();
    }

    let mut ordered: Vec<&SnapshotInfo> = snapshots.iter().collect();
    ordered.sort_by(|a, b| a.saved_at.cmp(&b.saved_at).then_with(|| a.path.cmp(&b.path)));

    let protected = protected_paths(&ordered, policy.keep_latest);
    let mut doomed: HashSet<&PathBuf> = HashSet::new();

    if let Some(days) = policy.retention_days {
        let cutoff = now - Duration::days(i64::from(days));
        for snap in &ordered {
            if snap.saved_at < cutoff && !protected.contains(&snap.path) {
                doomed.insert(&snap.path);
            }
        }
    }

    if let Some(max_mb) = policy.max_size_mb {
        let limit = (max_mb.max(0.0) * BYTES_PER_MB) as u64;
        let mut total: u64 = ordered
            .iter()
            .filter(|s| !doomed.contains(&s.path))
            .map(|s| s.size_bytes)
            .sum();
        for snap in &ordered {
            if total <= limit {
                break;
            }
            if doomed.contains(&snap.path) || protected.contains(&snap.path) {
                continue;
            }
            doomed.insert(&snap.path);
            total = total.saturating_sub(snap.size_bytes);
        }
    }

    ordered
        .into_iter()
        .filter(|s| doomed.contains(&s.path))
        .cloned()
        .collect()
}

/// Paths of the newest `keep_latest` snapshots per workflow.
fn protected_paths(ordered: &[&SnapshotInfo], keep_latest: usize) -> HashSet<PathBuf> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut protected = HashSet::new();
    for snap in ordered.iter().rev() {
        let count = seen.entry(snap.workflow_id.as_str()).or_insert(0);
        if *count < keep_latest {
            protected.insert(snap.path.clone());
        }
        *count += 1;
    }
    protected
}

/// Total size of `snapshots` in megabytes.
pub fn size_mb(snapshots: &[SnapshotInfo]) -> f64 {
    snapshots.iter().map(|s| s.size_bytes).sum::<u64>() as f64 / BYTES_PER_MB
}
