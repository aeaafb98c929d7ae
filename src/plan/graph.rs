use std::collections::{BTreeMap, BTreeSet};

use crate::error::PlanError;
use crate::plan::types::{Plan, PlanStep};

// ─── Step graph ──────────────────────────────────────────────────────────────

/// Dependency view over a plan's steps.
///
/// Edges run dependency → dependent. Validation happens once, before any
/// step runs; the executor then drives scheduling off the adjacency and
/// in-degree maps without re-walking the plan.
#[derive(Debug, Clone)]
pub struct StepGraph {
    /// dependency id → dependent ids, sorted for deterministic dispatch.
    adjacency: BTreeMap<String, Vec<String>>,
    /// step id → number of unfinished dependencies.
    in_degree: BTreeMap<String, usize>,
}

impl StepGraph {
    /// Build and fully validate the graph. Rejects empty or duplicate step
    /// ids, dependencies on unknown steps, input references to steps not
    /// listed in `depends_on`, and cycles (reported with the offending path).
    pub fn build(plan: &Plan) -> Result<Self, PlanError> {
        let step_ids = validate_ids(&plan.steps)?;
        validate_references(&plan.steps)?;

        let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut in_degree: BTreeMap<String, usize> = BTreeMap::new();

        for id in &step_ids {
            adjacency.entry(id.clone()).or_default();
            in_degree.insert(id.clone(), 0);
        }

        for step in &plan.steps {
            for dep in &step.depends_on {
                if !step_ids.contains(dep) {
                    return Err(PlanError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if let Some(dependents) = adjacency.get_mut(dep) {
                    dependents.push(step.id.clone());
                }
                *in_degree.entry(step.id.clone()).or_insert(0) += 1;
            }
        }

        for dependents in adjacency.values_mut() {
            dependents.sort_unstable();
        }

        let graph = Self {
            adjacency,
            in_degree,
        };
        graph.validate_cycle_free(&step_ids)?;
        Ok(graph)
    }

    /// Steps with no unfinished dependencies, in deterministic order.
    pub fn ready_steps(&self) -> Vec<String> {
        self.in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Record completion of `id`; returns the dependents it unlocked.
    pub fn complete(&mut self, id: &str) -> Vec<String> {
        let mut unlocked = Vec::new();
        let Some(dependents) = self.adjacency.get(id) else {
            return unlocked;
        };
        for dependent in dependents.clone() {
            if let Some(degree) = self.in_degree.get_mut(&dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    unlocked.push(dependent);
                }
            }
        }
        // A completed step never becomes ready again.
        self.in_degree.remove(id);
        unlocked
    }

    /// Kahn's algorithm over the validated graph. Deterministic: ties break
    /// alphabetically.
    pub fn topological_order(&self) -> Result<Vec<String>, PlanError> {
        let mut in_degree = self.in_degree.clone();
        let mut queue: BTreeSet<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| id.clone())
            .collect();

        let mut sorted = Vec::with_capacity(in_degree.len());
        while let Some(id) = queue.pop_first() {
            sorted.push(id.clone());
            if let Some(dependents) = self.adjacency.get(&id) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.insert(dependent.clone());
                        }
                    }
                }
            }
        }

        if sorted.len() != self.in_degree.len() {
            return Err(PlanError::Cyclic {
                path: "unresolvable dependency order".into(),
            });
        }
        Ok(sorted)
    }

    fn validate_cycle_free(&self, step_ids: &BTreeSet<String>) -> Result<(), PlanError> {
        let mut states: BTreeMap<&str, NodeState> = BTreeMap::new();
        let mut stack: Vec<&str> = Vec::new();

        for id in step_ids {
            if states.contains_key(id.as_str()) {
                continue;
            }
            if let Some(path) = self.detect_cycle(id, &mut states, &mut stack) {
                return Err(PlanError::Cyclic {
                    path: path.join(" -> "),
                });
            }
        }
        Ok(())
    }

    fn detect_cycle<'a>(
        &'a self,
        id: &'a str,
        states: &mut BTreeMap<&'a str, NodeState>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        states.insert(id, NodeState::Visiting);
        stack.push(id);

        if let Some(dependents) = self.adjacency.get(id) {
            for dependent in dependents {
                match states.get(dependent.as_str()) {
                    Some(NodeState::Visiting) => {
                        let start = stack
                            .iter()
                            .position(|entry| *entry == dependent)
                            .unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(ToString::to_string).collect();
                        cycle.push(dependent.clone());
                        return Some(cycle);
                    }
                    Some(NodeState::Visited) => {}
                    None => {
                        if let Some(path) = self.detect_cycle(dependent, states, stack) {
                            return Some(path);
                        }
                    }
                }
            }
        }

        stack.pop();
        states.insert(id, NodeState::Visited);
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Visiting,
    Visited,
}

// ─── Validation passes ───────────────────────────────────────────────────────

fn validate_ids(steps: &[PlanStep]) -> Result<BTreeSet<String>, PlanError> {
    let mut ids = BTreeSet::new();
    for step in steps {
        if step.id.trim().is_empty() {
            return Err(PlanError::EmptyStepId);
        }
        if !ids.insert(step.id.clone()) {
            return Err(PlanError::DuplicateStep(step.id.clone()));
        }
    }
    Ok(ids)
}

/// Every `FROM_<id>` input must name a declared dependency, so reference
/// resolution is a pure function of (graph, completed results).
fn validate_references(steps: &[PlanStep]) -> Result<(), PlanError> {
    for step in steps {
        for (key, value) in &step.inputs {
            if let Some(target) = PlanStep::reference_target(value) {
                if !step.depends_on.contains(target) {
                    return Err(PlanError::UndeclaredReference {
                        step: step.id.clone(),
                        key: key.clone(),
                        referenced: target.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::PlanStep;
    use serde_json::json;

    fn plan_of(steps: Vec<PlanStep>) -> Plan {
        Plan::new("query", "test", steps)
    }

    #[test]
    fn linear_chain_orders_correctly() {
        let plan = plan_of(vec![
            PlanStep::tool_call("a", "compute"),
            PlanStep::sanity_check("b").depends(&["a"]),
            PlanStep::finalization("c").depends(&["b"]),
        ]);
        let graph = StepGraph::build(&plan).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_exposes_parallel_ready_set() {
        let plan = plan_of(vec![
            PlanStep::tool_call("a", "compute"),
            PlanStep::tool_call("b", "compute"),
            PlanStep::finalization("c").depends(&["a", "b"]),
        ]);
        let graph = StepGraph::build(&plan).unwrap();
        assert_eq!(graph.ready_steps(), vec!["a", "b"]);
    }

    #[test]
    fn complete_unlocks_dependents() {
        let plan = plan_of(vec![
            PlanStep::tool_call("a", "compute"),
            PlanStep::tool_call("b", "compute"),
            PlanStep::finalization("c").depends(&["a", "b"]),
        ]);
        let mut graph = StepGraph::build(&plan).unwrap();
        assert!(graph.complete("a").is_empty());
        assert_eq!(graph.complete("b"), vec!["c"]);
    }

    #[test]
    fn two_cycle_is_rejected_with_path() {
        let plan = plan_of(vec![
            PlanStep::tool_call("a", "compute").depends(&["b"]),
            PlanStep::tool_call("b", "compute").depends(&["a"]),
        ]);
        let err = StepGraph::build(&plan).unwrap_err();
        match err {
            PlanError::Cyclic { path } => {
                assert!(path.contains("a"));
                assert!(path.contains("b"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_cycle_is_rejected() {
        let plan = plan_of(vec![PlanStep::tool_call("a", "compute").depends(&["a"])]);
        assert!(matches!(
            StepGraph::build(&plan),
            Err(PlanError::Cyclic { .. })
        ));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let plan = plan_of(vec![PlanStep::finalization("done").depends(&["ghost"])]);
        assert!(matches!(
            StepGraph::build(&plan),
            Err(PlanError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn duplicate_step_id_is_rejected() {
        let plan = plan_of(vec![
            PlanStep::tool_call("a", "compute"),
            PlanStep::tool_call("a", "compute"),
        ]);
        assert!(matches!(
            StepGraph::build(&plan),
            Err(PlanError::DuplicateStep(id)) if id == "a"
        ));
    }

    #[test]
    fn empty_step_id_is_rejected() {
        let plan = plan_of(vec![PlanStep::tool_call("  ", "compute")]);
        assert!(matches!(StepGraph::build(&plan), Err(PlanError::EmptyStepId)));
    }

    #[test]
    fn undeclared_reference_is_rejected() {
        let plan = plan_of(vec![
            PlanStep::tool_call("search", "web_search"),
            PlanStep::tool_call("calc", "compute").with_input("value", json!("FROM_search")),
        ]);
        assert!(matches!(
            StepGraph::build(&plan),
            Err(PlanError::UndeclaredReference { .. })
        ));
    }

    #[test]
    fn declared_reference_is_accepted() {
        let plan = plan_of(vec![
            PlanStep::tool_call("search", "web_search"),
            PlanStep::tool_call("calc", "compute")
                .with_input("value", json!("FROM_search"))
                .depends(&["search"]),
        ]);
        assert!(StepGraph::build(&plan).is_ok());
    }

    #[test]
    fn empty_plan_builds() {
        let plan = plan_of(Vec::new());
        let graph = StepGraph::build(&plan).unwrap();
        assert!(graph.ready_steps().is_empty());
        assert!(graph.topological_order().unwrap().is_empty());
    }

    #[test]
    fn cycle_in_subgraph_is_found() {
        let plan = plan_of(vec![
            PlanStep::tool_call("a", "compute"),
            PlanStep::tool_call("b", "compute").depends(&["a", "d"]),
            PlanStep::tool_call("c", "compute").depends(&["b"]),
            PlanStep::tool_call("d", "compute").depends(&["c"]),
        ]);
        assert!(matches!(
            StepGraph::build(&plan),
            Err(PlanError::Cyclic { .. })
        ));
    }
}
