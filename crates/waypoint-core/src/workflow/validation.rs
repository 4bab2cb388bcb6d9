//! Workflow graph validation performed before a run starts.
//!
//! Uses `petgraph` to model artifact-derived step dependencies as a directed
//! graph. A topological sort detects cycles; the remaining checks catch
//! graphs the execution loop could never finish (duplicate IDs, ambiguous
//! producers, requirements nobody creates, an unsatisfiable first step).

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use waypoint_types::workflow::Workflow;

/// Errors that make a workflow impossible to run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("workflow '{0}' has no steps")]
    NoSteps(String),

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("artifact '{artifact}' is created by both '{first}' and '{second}'")]
    DuplicateProducer {
        artifact: String,
        first: String,
        second: String,
    },

    #[error("step '{step_id}' requires artifact '{artifact}' which no step creates")]
    UnknownArtifact { step_id: String, artifact: String },

    #[error("first step '{step_id}' requires {missing:?} and can never start")]
    UnsatisfiableFirstStep { step_id: String, missing: Vec<String> },

    #[error("cycle detected involving step '{0}'")]
    CycleDetected(String),
}

/// Validate that `workflow` can run to completion from an empty artifact set.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), ValidationError> {
    let Some(first) = workflow.steps.first() else {
        return Err(ValidationError::NoSteps(workflow.id.clone()));
    };

    // Unique step IDs
    let mut seen: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(ValidationError::DuplicateStepId(step.id.clone()));
        }
    }

    // One producer per artifact
    let mut producers: HashMap<&str, &str> = HashMap::new();
    for step in &workflow.steps {
        for name in &step.creates {
            if let Some(existing) = producers.insert(name.as_str(), step.id.as_str()) {
                return Err(ValidationError::DuplicateProducer {
                    artifact: name.clone(),
                    first: existing.to_string(),
                    second: step.id.clone(),
                });
            }
        }
    }

    if !first.requires.is_empty() {
        return Err(ValidationError::UnsatisfiableFirstStep {
            step_id: first.id.clone(),
            missing: first.requires.clone(),
        });
    }

    // Build directed graph: edge from producer -> consumer
    let id_to_idx: HashMap<&str, usize> = workflow
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: Vec<_> = workflow
        .steps
        .iter()
        .map(|s| graph.add_node(s.id.as_str()))
        .collect();

    for step in &workflow.steps {
        let to_idx = id_to_idx[step.id.as_str()];
        for name in &step.requires {
            let producer = producers.get(name.as_str()).ok_or_else(|| {
                ValidationError::UnknownArtifact {
                    step_id: step.id.clone(),
                    artifact: name.clone(),
                }
            })?;
            let from_idx = id_to_idx[producer];
            graph.add_edge(nodes[from_idx], nodes[to_idx], ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        ValidationError::CycleDetected(graph[cycle.node_id()].to_string())
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_types::workflow::WorkflowStep;

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        Workflow {
            id: "wf".to_string(),
            name: "Test".to_string(),
            version: "1".to_string(),
            steps,
        }
    }

    fn step(id: &str, requires: &[&str], creates: &[&str]) -> WorkflowStep {
        WorkflowStep::new(id, "agent", "act")
            .requires(requires.iter().copied())
            .creates(creates.iter().copied())
    }

    #[test]
    fn test_valid_chain() {
        let wf = workflow(vec![
            step("a", &[], &["a.md"]),
            step("b", &["a.md"], &["b.md"]),
            step("c", &["a.md", "b.md"], &[]),
        ]);
        assert!(validate_workflow(&wf).is_ok());
    }

    #[test]
    fn test_no_steps() {
        let err = validate_workflow(&workflow(vec![])).unwrap_err();
        assert_eq!(err, ValidationError::NoSteps("wf".to_string()));
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_first_step_with_requirements_rejected() {
        let wf = workflow(vec![
            step("b", &["a.md"], &["b.md"]),
            step("a", &[], &["a.md"]),
        ]);
        let err = validate_workflow(&wf).unwrap_err();
        assert!(matches!(err, ValidationError::UnsatisfiableFirstStep { ref step_id, .. } if step_id == "b"));
        assert!(err.to_string().contains("a.md"));
    }

    #[test]
    fn test_duplicate_step_id() {
        let wf = workflow(vec![step("a", &[], &[]), step("a", &[], &[])]);
        assert_eq!(
            validate_workflow(&wf).unwrap_err(),
            ValidationError::DuplicateStepId("a".to_string())
        );
    }

    #[test]
    fn test_duplicate_producer() {
        let wf = workflow(vec![step("a", &[], &["x.md"]), step("b", &[], &["x.md"])]);
        let err = validate_workflow(&wf).unwrap_err();
        assert!(err.to_string().contains("'x.md' is created by both 'a' and 'b'"));
    }

    #[test]
    fn test_unknown_artifact() {
        let wf = workflow(vec![step("a", &[], &[]), step("b", &["ghost.md"], &[])]);
        let err = validate_workflow(&wf).unwrap_err();
        assert!(err.to_string().contains("ghost.md"));
        assert!(err.to_string().contains("no step creates"));
    }

    #[test]
    fn test_cycle_detected() {
        let wf = workflow(vec![
            step("root", &[], &[]),
            step("b", &["c.md"], &["b.md"]),
            step("c", &["b.md"], &["c.md"]),
        ]);
        let err = validate_workflow(&wf).unwrap_err();
        assert!(err.to_string().contains("cycle detected"), "got: {err}");
    }
}
