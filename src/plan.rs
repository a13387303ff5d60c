//! Topological layering of the task graph into waves.
//!
//! Kahn-style: wave 0 is every task with no dependency; once a wave
//! completes, every task whose dependencies are now satisfied forms the
//! next. Within a wave tasks are independent. The (kind, name) ordering
//! inside each wave is for presentation and logging only; correctness
//! never depends on it.

use petgraph::graph::NodeIndex;

use crate::graph::TaskGraph;
use crate::target::Target;
use crate::task::TaskKey;

/// The static execution plan: tasks grouped into dependency waves,
/// assuming every task succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub waves: Vec<Vec<TaskKey>>,
}

impl Plan {
    pub fn task_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, wave) in self.waves.iter().enumerate() {
            write!(f, "wave {i}:")?;
            for key in wave {
                write!(f, " {key}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Layer the graph into waves of node indices.
///
/// Each wave comes out sorted by task key. The graph is already known to
/// be acyclic, so every node lands in exactly one wave, including tasks
/// with no dependencies and no dependents.
pub(crate) fn layers<T: Target>(graph: &TaskGraph<T>) -> Vec<Vec<NodeIndex>> {
    let mut remaining: Vec<usize> = graph
        .graph
        .node_indices()
        .map(|node| graph.dependencies_of(node).count())
        .collect();
    let mut emitted = vec![false; remaining.len()];
    let mut waves = Vec::new();
    let mut done = 0;

    while done < remaining.len() {
        let mut wave: Vec<NodeIndex> = graph
            .graph
            .node_indices()
            .filter(|node| !emitted[node.index()] && remaining[node.index()] == 0)
            .collect();
        wave.sort_by(|a, b| graph.graph[*a].key.cmp(&graph.graph[*b].key));

        for &node in &wave {
            emitted[node.index()] = true;
            done += 1;
            for dependent in graph.dependents_of(node) {
                remaining[dependent.index()] -= 1;
            }
        }

        waves.push(wave);
    }

    waves
}

pub(crate) fn to_plan<T: Target>(graph: &TaskGraph<T>, waves: &[Vec<NodeIndex>]) -> Plan {
    Plan {
        waves: waves
            .iter()
            .map(|wave| wave.iter().map(|&n| graph.graph[n].key.clone()).collect())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{erase, Network, Subnet};

    #[test]
    fn waves_respect_dependencies() {
        let net = Network::new("main").cidr("10.0.0.0/16");
        let sub_a = Subnet::new("a").cidr("10.0.0.0/24").network(&net);
        let sub_b = Subnet::new("b").cidr("10.0.1.0/24").network(&net);

        let graph = TaskGraph::build(vec![erase(sub_b), erase(net), erase(sub_a)]).unwrap();
        let plan = to_plan(&graph, &layers(&graph));

        assert_eq!(plan.waves.len(), 2);
        assert_eq!(plan.waves[0], vec![TaskKey::new("Network", "main")]);
        // Siblings sorted by key for presentation.
        assert_eq!(
            plan.waves[1],
            vec![TaskKey::new("Subnet", "a"), TaskKey::new("Subnet", "b")]
        );
        assert_eq!(plan.task_count(), 3);
    }

    #[test]
    fn isolated_task_lands_in_exactly_one_wave() {
        let net = Network::new("solo");
        let graph = TaskGraph::build(vec![erase(net)]).unwrap();
        let plan = to_plan(&graph, &layers(&graph));

        assert_eq!(plan.waves.len(), 1);
        assert_eq!(plan.waves[0], vec![TaskKey::new("Network", "solo")]);
    }

    #[test]
    fn chain_layers_one_per_wave() {
        let a = Network::new("a");
        let b = Network::new("b").peer(&a);
        let c = Network::new("c").peer(&b);

        let graph = TaskGraph::build(vec![erase(c), erase(a), erase(b)]).unwrap();
        let waves = layers(&graph);
        assert_eq!(waves.len(), 3);
        assert!(waves.iter().all(|w| w.len() == 1));
    }
}
