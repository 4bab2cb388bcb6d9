//! Ready-step resolution and artifact-derived dependency queries.
//!
//! Steps never name each other directly: a step depends on another when it
//! requires an artifact the other creates. Everything in this module is a
//! pure function over the definition and the current run state, so it is
//! safe to call after every state mutation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use waypoint_types::workflow::{Artifact, WorkflowStep};

// ---------------------------------------------------------------------------
// Ready steps
// ---------------------------------------------------------------------------

/// Compute the steps that may run now.
///
/// A step is ready iff it is absent from `completed`, `running` and
/// `excluded` (skipped or failed steps), and every name in its `requires`
/// maps to an artifact that satisfies the requirement (complete or waived).
///
/// Returned in definition order.
pub fn find_ready_steps<'a>(
    steps: &'a [WorkflowStep],
    completed: &HashSet<&str>,
    running: &HashSet<&str>,
    excluded: &HashSet<&str>,
    available_artifacts: &BTreeMap<String, Artifact>,
) -> Vec<&'a WorkflowStep> {
    steps
        .iter()
        .filter(|s| {
            let id = s.id.as_str();
            !completed.contains(id) && !running.contains(id) && !excluded.contains(id)
        })
        .filter(|s| {
            s.requires.iter().all(|name| {
                available_artifacts
                    .get(name)
                    .is_some_and(|a| a.status.satisfies_requirement())
            })
        })
        .collect()
}

/// The requirements of `step` that `available_artifacts` does not satisfy.
pub fn missing_requirements<'a>(
    step: &'a WorkflowStep,
    available_artifacts: &BTreeMap<String, Artifact>,
) -> Vec<&'a str> {
    step.requires
        .iter()
        .filter(|name| {
            !available_artifacts
                .get(name.as_str())
                .is_some_and(|a| a.status.satisfies_requirement())
        })
        .map(String::as_str)
        .collect()
}

// ---------------------------------------------------------------------------
// Dependency queries
// ---------------------------------------------------------------------------

/// Map each artifact name to the ID of the step that creates it.
pub fn producer_map(steps: &[WorkflowStep]) -> HashMap<&str, &str> {
    steps
        .iter()
        .flat_map(|s| s.creates.iter().map(move |name| (name.as_str(), s.id.as_str())))
        .collect()
}

/// IDs of the steps whose outputs `step` requires, deduplicated.
pub fn direct_dependencies<'a>(step: &WorkflowStep, steps: &'a [WorkflowStep]) -> Vec<&'a str> {
    let producers = producer_map(steps);
    let mut deps: BTreeSet<&str> = BTreeSet::new();
    for name in &step.requires {
        if let Some(producer) = producers.get(name.as_str()) {
            deps.insert(*producer);
        }
    }
    deps.into_iter().collect()
}

/// IDs of the steps that require at least one artifact `step_id` creates.
pub fn direct_dependents<'a>(step_id: &str, steps: &'a [WorkflowStep]) -> Vec<&'a str> {
    let Some(step) = steps.iter().find(|s| s.id == step_id) else {
        return Vec::new();
    };
    let created: HashSet<&str> = step.creates.iter().map(String::as_str).collect();
    steps
        .iter()
        .filter(|s| s.id != step_id && s.requires.iter().any(|r| created.contains(r.as_str())))
        .map(|s| s.id.as_str())
        .collect()
}

/// Every step that transitively requires the output of `step_id`, paired
/// with the step through which the dependency was discovered.
///
/// Breadth-first, so each dependent is paired with its nearest upstream
/// step. If `step_id` is not found, returns an empty vec.
pub fn transitive_dependents<'a>(
    step_id: &'a str,
    steps: &'a [WorkflowStep],
) -> Vec<(&'a str, &'a str)> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([step_id]);
    let mut out = Vec::new();
    visited.insert(step_id);

    while let Some(current) = queue.pop_front() {
        for dependent in direct_dependents(current, steps) {
            if visited.insert(dependent) {
                out.push((dependent, current));
                queue.push_back(dependent);
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
