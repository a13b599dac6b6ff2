//! Directed acyclic task graphs.
//!
//! A `TaskGraph` is pure data: task ids, their payloads and the `upstream >>
//! downstream` edges between them. Building one has no side effects, so a
//! graph can be rendered, validated or inspected without touching any
//! external system.

use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use snafu::OptionExt;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::{
    CycleSnafu, DuplicateTaskSnafu, GraphError, SelfDependencySnafu, UnknownTaskSnafu,
};

use super::task::TaskId;

/// A dependency graph of tasks carrying payloads of type `T`.
#[derive(Debug, Clone)]
pub struct TaskGraph<T> {
    graph: DiGraph<T, ()>,
    index: IndexMap<TaskId, NodeIndex>,
}

impl<T> Default for TaskGraph<T> {
    fn default() -> Self {
        Self {
            graph: DiGraph::new(),
            index: IndexMap::new(),
        }
    }
}

impl<T> TaskGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Ids must be unique within the graph.
    pub fn add_task(&mut self, id: impl Into<TaskId>, payload: T) -> Result<(), GraphError> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return DuplicateTaskSnafu { id: id.to_string() }.fail();
        }
        let node = self.graph.add_node(payload);
        self.index.insert(id, node);
        Ok(())
    }

    /// Declare that `downstream` may only start after `upstream` succeeded.
    ///
    /// Declaring the same edge twice is a no-op.
    pub fn add_edge(&mut self, upstream: &str, downstream: &str) -> Result<(), GraphError> {
        if upstream == downstream {
            return SelfDependencySnafu { id: upstream }.fail();
        }
        let from = self.node(upstream, upstream, downstream)?;
        let to = self.node(downstream, upstream, downstream)?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Add edges so that `ids` run strictly one after another.
    pub fn chain<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<(), GraphError> {
        for pair in ids.windows(2) {
            self.add_edge(pair[0].as_ref(), pair[1].as_ref())?;
        }
        Ok(())
    }

    fn node(&self, id: &str, upstream: &str, downstream: &str) -> Result<NodeIndex, GraphError> {
        self.index.get(id).copied().context(UnknownTaskSnafu {
            upstream,
            downstream,
            missing: id,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Task ids in registration order.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.index.keys()
    }

    /// Payload registered for `id`.
    pub fn payload(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|node| &self.graph[*node])
    }

    /// Direct upstream dependencies of `id`, in registration order.
    pub fn upstream(&self, id: &str) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct downstream dependents of `id`, in registration order.
    pub fn downstream(&self, id: &str) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&TaskId> {
        let Some(node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors_directed(*node, direction).collect();
        nodes.sort();
        nodes.into_iter().map(|n| self.id_of(n)).collect()
    }

    fn id_of(&self, node: NodeIndex) -> &TaskId {
        // Node indices are never removed, so they line up with insertion order.
        self.index
            .get_index(node.index())
            .map(|(id, _)| id)
            .unwrap_or_else(|| unreachable!("node {node:?} without id"))
    }

    /// All edges as `(upstream, downstream)` pairs, sorted by registration order.
    pub fn edges(&self) -> Vec<(&TaskId, &TaskId)> {
        let mut edges: Vec<(NodeIndex, NodeIndex)> = self
            .graph
            .raw_edges()
            .iter()
            .map(|e| (e.source(), e.target()))
            .collect();
        edges.sort();
        edges
            .into_iter()
            .map(|(from, to)| (self.id_of(from), self.id_of(to)))
            .collect()
    }

    /// Whether `downstream` transitively depends on `upstream`.
    pub fn depends_on(&self, downstream: &str, upstream: &str) -> bool {
        match (self.index.get(upstream), self.index.get(downstream)) {
            (Some(from), Some(to)) if from != to => {
                has_path_connecting(&self.graph, *from, *to, None)
            }
            _ => false,
        }
    }

    /// Check the graph is acyclic and return a deterministic topological order.
    ///
    /// Among tasks that are ready at the same time, the one registered first
    /// comes first.
    pub fn validate(&self) -> Result<Vec<&TaskId>, GraphError> {
        self.ordered_nodes()
            .map(|nodes| nodes.into_iter().map(|n| self.id_of(n)).collect())
    }

    fn ordered_nodes(&self) -> Result<Vec<NodeIndex>, GraphError> {
        if let Err(cycle) = toposort(&self.graph, None) {
            return CycleSnafu {
                id: self.id_of(cycle.node_id()).to_string(),
            }
            .fail();
        }

        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        Ok(order)
    }

    /// Whether the graph admits exactly one execution order.
    pub fn is_total_order(&self) -> bool {
        match self.ordered_nodes() {
            Ok(order) => order
                .windows(2)
                .all(|pair| self.graph.contains_edge(pair[0], pair[1])),
            Err(_) => false,
        }
    }

    /// Decompose into a validated execution plan.
    pub(crate) fn into_plan(self) -> Result<Vec<PlannedTask<T>>, GraphError> {
        self.ordered_nodes()?;

        let mut planned: Vec<PlannedTask<T>> = Vec::with_capacity(self.len());
        let ids: Vec<TaskId> = self.index.keys().cloned().collect();
        let edges: Vec<(usize, usize)> = self
            .graph
            .raw_edges()
            .iter()
            .map(|e| (e.source().index(), e.target().index()))
            .collect();

        let (nodes, _) = self.graph.into_nodes_edges();
        for (id, node) in ids.into_iter().zip(nodes) {
            planned.push(PlannedTask {
                id,
                payload: node.weight,
                upstream: Vec::new(),
                downstream: Vec::new(),
            });
        }
        for (from, to) in edges {
            planned[from].downstream.push(to);
            planned[to].upstream.push(from);
        }
        for task in &mut planned {
            task.upstream.sort_unstable();
            task.downstream.sort_unstable();
        }
        Ok(planned)
    }
}

/// A task with its dependencies resolved to plan positions.
#[derive(Debug)]
pub(crate) struct PlannedTask<T> {
    pub id: TaskId,
    pub payload: T,
    pub upstream: Vec<usize>,
    pub downstream: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<'a>(items: impl IntoIterator<Item = &'a TaskId>) -> Vec<&'a str> {
        items.into_iter().map(|id| id.as_str()).collect()
    }

    fn diamond() -> TaskGraph<u32> {
        let mut graph = TaskGraph::new();
        for (i, id) in ["check", "raw", "tmp", "load"].iter().enumerate() {
            graph.add_task(*id, i as u32).unwrap();
        }
        graph.add_edge("check", "raw").unwrap();
        graph.add_edge("check", "tmp").unwrap();
        graph.add_edge("raw", "load").unwrap();
        graph.add_edge("tmp", "load").unwrap();
        graph
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", ()).unwrap();
        let err = graph.add_task("a", ()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTask { .. }));
    }

    #[test]
    fn test_edge_to_unknown_task_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", ()).unwrap();
        let err = graph.add_edge("a", "b").unwrap_err();
        match err {
            GraphError::UnknownTask { missing, .. } => assert_eq!(missing, "b"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            graph.add_edge("a", "a").unwrap_err(),
            GraphError::SelfDependency { .. }
        ));
    }

    #[test]
    fn test_duplicate_edge_is_noop() {
        let mut graph = diamond();
        graph.add_edge("check", "raw").unwrap();
        assert_eq!(graph.edges().len(), 4);
    }

    #[test]
    fn test_neighbors_and_order() {
        let graph = diamond();
        assert_eq!(ids(graph.upstream("load")), vec!["raw", "tmp"]);
        assert_eq!(ids(graph.downstream("check")), vec!["raw", "tmp"]);
        assert_eq!(
            ids(graph.validate().unwrap()),
            vec!["check", "raw", "tmp", "load"]
        );
        assert!(graph.depends_on("load", "check"));
        assert!(!graph.depends_on("raw", "tmp"));
        assert!(!graph.is_total_order());
        assert_eq!(graph.payload("tmp"), Some(&2));
    }

    #[test]
    fn test_chain_is_total_order() {
        let mut graph = TaskGraph::new();
        let names = ["a", "b", "c", "d"];
        for name in names {
            graph.add_task(name, ()).unwrap();
        }
        graph.chain(&names).unwrap();
        assert!(graph.is_total_order());
        assert_eq!(ids(graph.validate().unwrap()), names.to_vec());
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = diamond();
        graph.add_edge("load", "check").unwrap();
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert!(graph.into_plan().is_err());
    }

    #[test]
    fn test_into_plan_resolves_edges() {
        let plan = diamond().into_plan().unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].id.as_str(), "check");
        assert_eq!(plan[0].downstream, vec![1, 2]);
        assert_eq!(plan[3].upstream, vec![1, 2]);
        assert_eq!(plan[3].payload, 3);
    }
}
