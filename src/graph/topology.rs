//! Topological analysis and sorting of graphs.
//!
//! Provides algorithms for:
//! - Topological sorting
//! - The sub-pipeline feeding one node
//! - Dependency depth

use crate::core::error::{GraphError, GraphResult, NodeId};
use crate::core::image::Pixel;
use crate::graph::structure::ProcessingGraph;
use std::collections::{HashMap, HashSet, VecDeque};

/// Analyzer for graph topology.
pub struct TopologyAnalyzer<'a, T: Pixel> {
    graph: &'a ProcessingGraph<T>,
}

impl<'a, T: Pixel> TopologyAnalyzer<'a, T> {
    /// Create a new analyzer for the given graph.
    pub fn new(graph: &'a ProcessingGraph<T>) -> Self {
        Self { graph }
    }

    /// Get the topological sort order (Kahn's algorithm).
    ///
    /// Returns nodes in an order where producers come before consumers. Ties
    /// keep insertion order.
    pub fn topological_sort(&self) -> GraphResult<Vec<NodeId>> {
        self.sort_subset(&self.graph.node_ids().collect::<Vec<_>>())
    }

    /// The nodes an update of `terminal` can touch, producers first and
    /// `terminal` last.
    pub fn pipeline_order(&self, terminal: NodeId) -> GraphResult<Vec<NodeId>> {
        if !self.graph.has_node(terminal) {
            return Err(GraphError::NodeNotFound(terminal));
        }
        let mut members = self.graph.get_upstream(terminal);
        members.push(terminal);
        self.sort_subset(&members)
    }

    fn sort_subset(&self, members: &[NodeId]) -> GraphResult<Vec<NodeId>> {
        let member_set: HashSet<NodeId> = members.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = members.iter().map(|&id| (id, 0)).collect();
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for conn in self.graph.connections() {
            if member_set.contains(&conn.from) && member_set.contains(&conn.to.node_id) {
                adjacency.entry(conn.from).or_default().push(conn.to.node_id);
                *in_degree.entry(conn.to.node_id).or_default() += 1;
            }
        }

        // Start with nodes that have no incoming edges
        let mut queue: VecDeque<NodeId> = members
            .iter()
            .copied()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut result = Vec::with_capacity(members.len());

        while let Some(node) = queue.pop_front() {
            result.push(node);

            for neighbor in adjacency.get(&node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*neighbor);
                    }
                }
            }
        }

        // If we haven't visited all nodes, there's a cycle
        if result.len() != members.len() {
            let remaining: Vec<NodeId> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(&id, _)| id)
                .collect();

            return Err(GraphError::CycleDetected { nodes: remaining });
        }

        Ok(result)
    }

    /// Length of the longest producer chain ending at `node_id`.
    ///
    /// Depth 0 = source nodes (no dependencies)
    pub fn node_depth(&self, node_id: NodeId) -> GraphResult<usize> {
        let order = self.pipeline_order(node_id)?;
        let mut depth: HashMap<NodeId, usize> = HashMap::new();

        for &id in &order {
            let d = self
                .graph
                .connections_to(id)
                .filter_map(|conn| depth.get(&conn.from))
                .max()
                .map_or(0, |parent| parent + 1);
            depth.insert(id, d);
        }

        Ok(depth.get(&node_id).copied().unwrap_or(0))
    }

    /// Check if the graph has any cycles.
    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::join::JoinSeriesFilter;
    use crate::filters::pointwise::ShiftScaleFilter;

    fn shift() -> ShiftScaleFilter {
        ShiftScaleFilter::new(0.0, 1.0)
    }

    #[test]
    fn test_topological_sort() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        let node3 = graph.add(shift());
        let node1 = graph.add(shift());
        let node2 = graph.add(shift());

        graph.connect(node1, node2, 0).unwrap();
        graph.connect(node2, node3, 0).unwrap();

        let analyzer = TopologyAnalyzer::new(&graph);
        let sorted = analyzer.topological_sort().unwrap();

        assert_eq!(sorted, vec![node1, node2, node3]);
        assert!(!analyzer.has_cycle());
    }

    #[test]
    fn test_pipeline_order_ignores_unrelated_nodes() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        // Diamond: a -> b, a -> c, (b, c) -> join; plus an unrelated node.
        let a = graph.add(shift());
        let b = graph.add(shift());
        let c = graph.add(shift());
        let join = graph.add(JoinSeriesFilter::new());
        let unrelated = graph.add(shift());

        graph.connect(a, b, 0).unwrap();
        graph.connect(a, c, 0).unwrap();
        graph.connect(b, join, 0).unwrap();
        graph.connect(c, join, 1).unwrap();

        let analyzer = TopologyAnalyzer::new(&graph);
        let order = analyzer.pipeline_order(join).unwrap();

        assert_eq!(order.len(), 4);
        assert_eq!(order[0], a);
        assert_eq!(order[3], join);
        assert!(!order.contains(&unrelated));

        assert_eq!(analyzer.node_depth(join).unwrap(), 2);
        assert_eq!(analyzer.node_depth(a).unwrap(), 0);
    }
}
