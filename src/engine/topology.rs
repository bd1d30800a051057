//! Task-level view of the adaptor graph built with petgraph.

use std::collections::HashMap;

use petgraph::algo::{is_cyclic_directed, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use super::manager::Manager;
use crate::core::{AdaptorId, TaskId};

/// Nodes are tasks, edges are adaptors (source task -> target task).
pub struct Topology {
    graph: DiGraph<TaskId, AdaptorId>,
    index: HashMap<TaskId, NodeIndex>,
}

impl Topology {
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Tasks in dependency order, or `None` if adaptors form a cycle.
    pub fn topological_order(&self) -> Option<Vec<TaskId>> {
        toposort(&self.graph, None)
            .ok()
            .map(|nodes| nodes.into_iter().map(|n| self.graph[n]).collect())
    }

    /// Strongly connected sets of tasks that feed back into themselves,
    /// including single tasks wired to their own inputs.
    pub fn cycles(&self) -> Vec<Vec<TaskId>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|n| self.graph.find_edge(*n, *n).is_some())
            })
            .map(|scc| scc.into_iter().map(|n| self.graph[n]).collect())
            .collect()
    }

    /// Tasks directly fed by `task`.
    pub fn dependents(&self, task: TaskId) -> Vec<TaskId> {
        let Some(&node) = self.index.get(&task) else {
            return Vec::new();
        };
        let mut out: Vec<TaskId> = self.graph.neighbors(node).map(|n| self.graph[n]).collect();
        out.sort();
        out.dedup();
        out
    }
}

impl Manager {
    /// Snapshot of the current task -> task adaptor structure.
    pub fn topology(&self) -> Topology {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for task in self.tasks() {
            index.insert(task.id(), graph.add_node(task.id()));
        }
        for adaptor in self.adaptors() {
            let (Some(&s), Some(&t)) = (
                index.get(&adaptor.source().task),
                index.get(&adaptor.target().task),
            ) else {
                continue;
            };
            graph.add_edge(s, t, adaptor.id());
        }
        Topology { graph, index }
    }
}
