//! Dependency graph assembly.
//!
//! Edges are never stored by the caller; every run recomputes them from
//! what each task declares through
//! [`Resource::dependencies`](crate::Resource::dependencies). Construction
//! validates the whole graph (names, duplicates, dangling references,
//! cycles) before the executor makes a single network call.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::EngineError;
use crate::target::Target;
use crate::task::{Task, TaskKey};

pub(crate) struct Node<T: Target> {
    pub key: TaskKey,
    pub task: Arc<dyn Task<T>>,
}

impl<T: Target> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            task: Arc::clone(&self.task),
        }
    }
}

/// The validated task graph for one convergence run.
///
/// Edges point from dependency to dependent, so topological order walks
/// sources first. The graph owns its tasks for the duration of the run.
pub(crate) struct TaskGraph<T: Target> {
    pub graph: DiGraph<Node<T>, ()>,
    pub index: HashMap<TaskKey, NodeIndex>,
}

impl<T: Target> std::fmt::Debug for TaskGraph<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

impl<T: Target> TaskGraph<T> {
    pub fn build(tasks: Vec<Arc<dyn Task<T>>>) -> Result<Self, EngineError> {
        // Deterministic node order: sort by (kind, name) up front so wave
        // tie-breaking and reports are stable across runs.
        let mut keyed = tasks
            .into_iter()
            .map(|task| {
                let name = task.name().ok_or(EngineError::UnnamedTask(task.kind()))?;
                Ok((TaskKey { kind: task.kind(), name }, task))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for (key, task) in keyed {
            if index.contains_key(&key) {
                return Err(EngineError::DuplicateTask(key));
            }
            let node = graph.add_node(Node {
                key: key.clone(),
                task,
            });
            index.insert(key, node);
        }

        let nodes: Vec<NodeIndex> = graph.node_indices().collect();
        for node in nodes {
            let key = graph[node].key.clone();
            for dependency in graph[node].task.dependencies() {
                match index.get(&dependency) {
                    Some(&dep_node) => {
                        graph.add_edge(dep_node, node, ());
                    }
                    None => {
                        return Err(EngineError::UnknownDependency {
                            task: key,
                            dependency,
                        });
                    }
                }
            }
        }

        let built = Self { graph, index };
        built.reject_cycles()?;
        Ok(built)
    }

    /// A reference cycle is a fatal configuration error, reported before
    /// any discovery happens.
    fn reject_cycles(&self) -> Result<(), EngineError> {
        if petgraph::algo::toposort(&self.graph, None).is_ok() {
            return Ok(());
        }

        // Name the participants to make the error actionable.
        let mut members: Vec<TaskKey> = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || scc
                        .first()
                        .is_some_and(|&n| self.graph.find_edge(n, n).is_some())
            })
            .flatten()
            .map(|node| self.graph[node].key.clone())
            .collect();
        members.sort();

        let path = members
            .iter()
            .map(TaskKey::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        Err(EngineError::Cycle(path))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Direct dependencies of a node.
    pub fn dependencies_of(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, Direction::Incoming)
    }

    /// Direct dependents of a node.
    pub fn dependents_of(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, Direction::Outgoing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{erase, Network, Subnet};

    #[test]
    fn resolves_edges_from_declared_references() {
        let net = Network::new("main").cidr("10.0.0.0/16");
        let sub = Subnet::new("a").cidr("10.0.0.0/24").network(&net);

        let graph = TaskGraph::build(vec![erase(net), erase(sub)]).unwrap();
        assert_eq!(graph.len(), 2);

        let sub_node = graph.index[&TaskKey::new("Subnet", "a")];
        let deps: Vec<_> = graph.dependencies_of(sub_node).collect();
        assert_eq!(deps, vec![graph.index[&TaskKey::new("Network", "main")]]);
    }

    #[test]
    fn duplicate_task_is_rejected() {
        let err = TaskGraph::build(vec![
            erase(Network::new("main")),
            erase(Network::new("main")),
        ])
        .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTask(_)));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let ghost = Network::new("ghost");
        let sub = Subnet::new("a").cidr("10.0.0.0/24").network(&ghost);

        let err = TaskGraph::build(vec![erase(sub)]).unwrap_err();
        match err {
            EngineError::UnknownDependency { task, dependency } => {
                assert_eq!(task.to_string(), "Subnet/a");
                assert_eq!(dependency.to_string(), "Network/ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unnamed_task_is_rejected() {
        let err = TaskGraph::build(vec![erase(Network::unnamed())]).unwrap_err();
        assert!(matches!(err, EngineError::UnnamedTask("Network")));
    }

    #[test]
    fn cycle_is_rejected_with_members_named() {
        let mut a = Network::new("a");
        let b = Network::new("b").peer(&a);
        a = a.peer(&b);

        let err = TaskGraph::build(vec![erase(a), erase(b)]).unwrap_err();
        match err {
            EngineError::Cycle(path) => {
                assert!(path.contains("Network/a"));
                assert!(path.contains("Network/b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let a = Network::new("a");
        let a = a.clone().peer(&a);

        let err = TaskGraph::build(vec![erase(a)]).unwrap_err();
        assert!(matches!(err, EngineError::Cycle(_)));
    }
}
