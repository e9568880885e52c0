// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::subproblem::{Subproblem, SubproblemId};
use crate::errors::{ProgressiveError, Result};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Subproblems whose output this one consumes.
    deps: Vec<SubproblemId>,
    /// Subproblems that consume this one's output.
    dependents: Vec<SubproblemId>,
}

/// Dependency graph over the subproblems of one run.
#[derive(Debug, Clone)]
pub struct SubproblemGraph {
    nodes: HashMap<SubproblemId, DagNode>,
    order: Vec<SubproblemId>,
}

impl SubproblemGraph {
    /// Build the graph from subproblems listed in post-order.
    ///
    /// Fails with a configuration error on an unknown dependency or a cycle.
    pub fn build(subproblems: &[Subproblem]) -> Result<Self> {
        let mut nodes: HashMap<SubproblemId, DagNode> = HashMap::new();
        let mut order = Vec::with_capacity(subproblems.len());

        for sp in subproblems {
            let previous = nodes.insert(
                sp.id.clone(),
                DagNode {
                    deps: sp.depends_on.clone(),
                    dependents: Vec::new(),
                },
            );
            if previous.is_some() {
                return Err(ProgressiveError::config(format!(
                    "duplicate subproblem id '{}'",
                    sp.id
                )));
            }
            order.push(sp.id.clone());
        }

        for sp in subproblems {
            for dep in &sp.depends_on {
                match nodes.get_mut(dep) {
                    Some(dep_node) => dep_node.dependents.push(sp.id.clone()),
                    None => {
                        return Err(ProgressiveError::config(format!(
                            "subproblem '{}' depends on unknown subproblem '{}'",
                            sp.id, dep
                        )));
                    }
                }
            }
        }

        let graph = Self { nodes, order };
        graph.ensure_acyclic()?;
        Ok(graph)
    }

    fn ensure_acyclic(&self) -> Result<()> {
        // Edge direction: dep -> dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in &self.order {
            graph.add_node(id.as_str());
        }
        for (id, node) in &self.nodes {
            for dep in &node.deps {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(ProgressiveError::config(format!(
                "cycle detected in subproblem graph involving '{}'",
                cycle.node_id()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &SubproblemId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn dependents_of(&self, id: &SubproblemId) -> &[SubproblemId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every subproblem that (transitively) consumes `id`'s output.
    pub fn transitive_dependents(&self, id: &SubproblemId) -> Vec<SubproblemId> {
        let mut seen: HashSet<&SubproblemId> = HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<&SubproblemId> = self.dependents_of(id).iter().collect();

        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next.clone());
            stack.extend(self.dependents_of(next).iter());
        }

        out
    }
}
