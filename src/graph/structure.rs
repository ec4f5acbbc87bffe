//! Graph structure and node management.
//!
//! The ProcessingGraph owns every node, its output image and the connections
//! between nodes. It also keeps the modification clock that the update
//! orchestrator uses to decide which nodes are stale.

use crate::core::error::{ConnectionId, GraphError, GraphResult, NodeId, PipelineResult};
use crate::core::image::{Image, ImageInformation, Pixel};
use crate::core::node::{InputArity, ProcessObject, UpdateState};
use crate::core::region::Region;
use crate::execution::engine::{ExecutionStats, UpdateOrchestrator};
use crate::execution::streaming::MemoryTracker;
use crate::graph::connection::{Connection, Endpoint};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};

/// A node instance in the graph.
///
/// Holds the filter, the output image the filter fills, and the timestamps
/// that drive re-execution.
pub struct GraphNode<T: Pixel> {
    /// Unique identifier
    pub id: NodeId,
    /// Optional display name override
    pub label: Option<String>,
    filter: Box<dyn ProcessObject<T>>,
    pub(crate) output: Image<T>,
    pub(crate) release_data: bool,
    pub(crate) state: UpdateState,
    /// Clock value of the last parameter or connection change.
    pub(crate) modified: u64,
    /// Largest `modified` over this node and everything upstream.
    pub(crate) pipeline_modified: u64,
    /// Clock value when the output information was last generated.
    pub(crate) information_time: u64,
    /// Clock value of the last successful execution.
    pub(crate) update_time: u64,
}

impl<T: Pixel> std::fmt::Debug for GraphNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("filter", &self.filter.metadata().name)
            .field("label", &self.label)
            .field("output", &self.output)
            .field("release_data", &self.release_data)
            .field("state", &self.state)
            .field("modified", &self.modified)
            .field("update_time", &self.update_time)
            .finish()
    }
}

impl<T: Pixel> GraphNode<T> {
    /// Create a new graph node with a filter.
    pub fn new(filter: Box<dyn ProcessObject<T>>) -> Self {
        Self {
            id: NodeId::new(),
            label: None,
            filter,
            output: Image::default(),
            release_data: false,
            state: UpdateState::Idle,
            modified: 0,
            pipeline_modified: 0,
            information_time: 0,
            update_time: 0,
        }
    }

    /// Create with a specific ID.
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Free the output buffer as soon as every consumer has read it.
    pub fn with_release_data(mut self, release: bool) -> Self {
        self.release_data = release;
        self
    }

    /// Get the display name (label or filter name).
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.filter.metadata().name)
    }

    /// The filter implementation.
    pub fn filter(&self) -> &dyn ProcessObject<T> {
        self.filter.as_ref()
    }

    /// The output image.
    pub fn output(&self) -> &Image<T> {
        &self.output
    }

    /// Where the node is in the current update cycle.
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Clock value of the last modification.
    pub fn modified_time(&self) -> u64 {
        self.modified
    }

    /// Clock value of the last successful execution; 0 if never executed.
    pub fn update_time(&self) -> u64 {
        self.update_time
    }

    /// Whether the output must be recomputed to satisfy its requested region.
    pub fn needs_update(&self) -> bool {
        self.output.requested_region_is_outside_buffered() || self.update_time < self.pipeline_modified
    }
}

/// The main processing graph structure.
///
/// Uses IndexMap to maintain insertion order for consistent iteration.
#[derive(Debug)]
pub struct ProcessingGraph<T: Pixel> {
    /// All nodes in the graph, indexed by ID.
    nodes: IndexMap<NodeId, GraphNode<T>>,
    /// All connections in the graph.
    connections: Vec<Connection>,
    /// Modification clock; strictly increasing.
    clock: u64,
    /// Number of update cycles started.
    cycle: u64,
    /// Bytes held by node outputs.
    memory: MemoryTracker,
}

impl<T: Pixel> ProcessingGraph<T> {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            connections: Vec::new(),
            clock: 0,
            cycle: 0,
            memory: MemoryTracker::unlimited(),
        }
    }

    // ========================================================================
    // Node Management
    // ========================================================================

    /// Add a node to the graph.
    pub fn add_node(&mut self, mut node: GraphNode<T>) -> NodeId {
        let id = node.id;
        node.modified = self.tick();
        self.nodes.insert(id, node);
        id
    }

    /// Add a boxed filter and return the node ID.
    pub fn add_filter(&mut self, filter: Box<dyn ProcessObject<T>>) -> NodeId {
        self.add_node(GraphNode::new(filter))
    }

    /// Add a filter and return the node ID.
    pub fn add<F: ProcessObject<T>>(&mut self, filter: F) -> NodeId {
        self.add_filter(Box::new(filter))
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all connections involving this node. Nodes that read
    /// from it become modified.
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<GraphNode<T>> {
        if !self.has_node(id) {
            return Err(GraphError::NodeNotFound(id));
        }

        let involved: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.from == id || c.to.node_id == id)
            .map(|c| c.id)
            .collect();
        for conn_id in involved {
            self.disconnect(conn_id)?;
        }

        let node = self
            .nodes
            .shift_remove(&id)
            .ok_or(GraphError::NodeNotFound(id))?;
        self.memory.release(node.output.byte_size());
        Ok(node)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, id: NodeId) -> GraphResult<&GraphNode<T>> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut GraphNode<T>> {
        self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
    }

    /// Check if a node exists.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Get all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode<T>> {
        self.nodes.values()
    }

    /// Get all node IDs.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Set a node's display label.
    pub fn set_label(&mut self, id: NodeId, label: impl Into<String>) -> GraphResult<()> {
        self.node_mut(id)?.label = Some(label.into());
        Ok(())
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Borrow a node's filter as its concrete type.
    pub fn filter<F: 'static>(&self, id: NodeId) -> GraphResult<&F> {
        self.get_node(id)?
            .filter
            .as_any()
            .downcast_ref::<F>()
            .ok_or_else(|| GraphError::FilterTypeMismatch {
                node_id: id,
                expected: std::any::type_name::<F>().to_string(),
            })
    }

    /// Mutably borrow a node's filter as its concrete type.
    ///
    /// The node is marked modified, so the next update re-executes it and
    /// everything downstream.
    pub fn filter_mut<F: 'static>(&mut self, id: NodeId) -> GraphResult<&mut F> {
        let now = self.tick();
        let node = self.node_mut(id)?;
        node.modified = now;
        node.filter
            .as_any_mut()
            .downcast_mut::<F>()
            .ok_or_else(|| GraphError::FilterTypeMismatch {
                node_id: id,
                expected: std::any::type_name::<F>().to_string(),
            })
    }

    /// Mark a node modified without touching its parameters.
    pub fn modified(&mut self, id: NodeId) -> GraphResult<()> {
        let now = self.tick();
        self.node_mut(id)?.modified = now;
        Ok(())
    }

    // ========================================================================
    // Connection Management
    // ========================================================================

    /// Connect the output of `from_node` to input `input` of `to_node`.
    pub fn connect(&mut self, from_node: NodeId, to_node: NodeId, input: usize) -> GraphResult<ConnectionId> {
        self.get_node(from_node)?;
        let arity = self.get_node(to_node)?.filter.metadata().inputs;

        if !arity.accepts(input) {
            return Err(GraphError::InputOutOfRange {
                node_id: to_node,
                input,
            });
        }

        if self.is_input_connected(to_node, input) {
            return Err(GraphError::InputAlreadyConnected {
                node_id: to_node,
                input,
            });
        }

        // Check for cycles
        if self.is_reachable(to_node, from_node) {
            return Err(GraphError::CycleDetected {
                nodes: vec![from_node, to_node],
            });
        }

        let connection = Connection::new(from_node, Endpoint::new(to_node, input));
        let id = connection.id;
        self.connections.push(connection);

        self.node_mut(from_node)?.output.consumers_mut().register(to_node);
        self.modified(to_node)?;
        Ok(id)
    }

    /// Remove a connection by ID.
    pub fn disconnect(&mut self, id: ConnectionId) -> GraphResult<Connection> {
        let pos = self
            .connections
            .iter()
            .position(|c| c.id == id)
            .ok_or(GraphError::ConnectionNotFound(id))?;
        let connection = self.connections.remove(pos);

        let still_reads = self
            .connections
            .iter()
            .any(|c| c.from == connection.from && c.to.node_id == connection.to.node_id);
        if !still_reads {
            if let Ok(producer) = self.node_mut(connection.from) {
                producer.output.consumers_mut().unregister(connection.to.node_id);
            }
        }
        if self.has_node(connection.to.node_id) {
            self.modified(connection.to.node_id)?;
        }
        Ok(connection)
    }

    /// Get all connections.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Get all connections from a node.
    pub fn connections_from(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.from == node_id)
    }

    /// Get all connections to a node.
    pub fn connections_to(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections
            .iter()
            .filter(move |c| c.to.node_id == node_id)
    }

    /// Check if an input is already connected.
    pub fn is_input_connected(&self, node_id: NodeId, input: usize) -> bool {
        self.connections
            .iter()
            .any(|c| c.to.node_id == node_id && c.to.input == input)
    }

    /// Get the number of connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Producers feeding `node_id`, in input order.
    ///
    /// Fails with [`GraphError::MissingInput`] if a required input is not
    /// connected, or if a variadic node has a gap in its inputs.
    pub fn input_ids(&self, node_id: NodeId) -> GraphResult<Vec<NodeId>> {
        let arity = self.get_node(node_id)?.filter.metadata().inputs;
        let mut connected: Vec<(usize, NodeId)> = self
            .connections_to(node_id)
            .map(|c| (c.to.input, c.from))
            .collect();
        connected.sort_by_key(|(input, _)| *input);

        let count = match arity {
            InputArity::Fixed(n) => n,
            InputArity::Variadic { min } => connected.len().max(min),
        };

        let mut inputs = Vec::with_capacity(count);
        for input in 0..count {
            match connected.get(input) {
                Some(&(index, producer)) if index == input => inputs.push(producer),
                _ => return Err(GraphError::MissingInput { node_id, input }),
            }
        }
        Ok(inputs)
    }

    // ========================================================================
    // Images and Regions
    // ========================================================================

    /// A node's output image.
    pub fn output(&self, id: NodeId) -> GraphResult<&Image<T>> {
        Ok(&self.get_node(id)?.output)
    }

    /// A node's output information, as of the last information pass.
    pub fn information(&self, id: NodeId) -> GraphResult<&ImageInformation> {
        Ok(self.get_node(id)?.output.information())
    }

    /// Ask for `region` of a node's output on the next update.
    pub fn set_requested_region(&mut self, id: NodeId, region: Region) -> GraphResult<()> {
        self.node_mut(id)?.output.set_requested_region(region);
        Ok(())
    }

    /// Go back to requesting the largest region.
    pub fn clear_requested_region(&mut self, id: NodeId) -> GraphResult<()> {
        self.node_mut(id)?.output.clear_requested_region();
        Ok(())
    }

    /// Free a node's output once all its consumers have read it in a cycle.
    pub fn set_release_data_flag(&mut self, id: NodeId, release: bool) -> GraphResult<()> {
        self.node_mut(id)?.release_data = release;
        Ok(())
    }

    /// Whether a node's output is freed after its consumers have read it.
    pub fn release_data_flag(&self, id: NodeId) -> GraphResult<bool> {
        Ok(self.get_node(id)?.release_data)
    }

    /// Free a node's output buffer now.
    pub fn release_output(&mut self, id: NodeId) -> GraphResult<()> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))?;
        let bytes = node.output.byte_size();
        node.output.release_data();
        self.memory.release(bytes);
        log::trace!("Released output of node {} ({} bytes)", id, bytes);
        Ok(())
    }

    /// Accounting of bytes held by node outputs.
    pub fn memory(&self) -> &MemoryTracker {
        &self.memory
    }

    // ========================================================================
    // Updating
    // ========================================================================

    /// Bring a node's output information up to date.
    pub fn update_output_information(&mut self, id: NodeId) -> PipelineResult<()> {
        UpdateOrchestrator::default().update_output_information(self, id)
    }

    /// Bring a node's requested region up to date with default options.
    pub fn update(&mut self, id: NodeId) -> PipelineResult<ExecutionStats> {
        UpdateOrchestrator::default().update(self, id)
    }

    /// Advance the modification clock.
    pub(crate) fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Start a new update cycle.
    pub(crate) fn next_cycle(&mut self) -> u64 {
        self.cycle += 1;
        self.cycle
    }

    // ========================================================================
    // Graph Analysis
    // ========================================================================

    /// Check if `target` is reachable from `start` following connections.
    pub fn is_reachable(&self, start: NodeId, target: NodeId) -> bool {
        if start == target {
            return true;
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }

            if visited.insert(current) {
                for conn in self.connections_from(current) {
                    queue.push_back(conn.to.node_id);
                }
            }
        }

        false
    }

    /// Get all nodes that depend on the given node (downstream).
    pub fn get_downstream(&self, node_id: NodeId) -> Vec<NodeId> {
        self.walk(node_id, |graph, current| {
            graph.connections_from(current).map(|c| c.to.node_id).collect()
        })
    }

    /// Get all nodes that the given node depends on (upstream).
    pub fn get_upstream(&self, node_id: NodeId) -> Vec<NodeId> {
        self.walk(node_id, |graph, current| {
            graph.connections_to(current).map(|c| c.from).collect()
        })
    }

    fn walk<F>(&self, start: NodeId, next: F) -> Vec<NodeId>
    where
        F: Fn(&Self, NodeId) -> Vec<NodeId>,
    {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = next(self, start).into();

        while let Some(current) = queue.pop_front() {
            if visited.insert(current) {
                result.push(current);
                queue.extend(next(self, current));
            }
        }

        result
    }

    /// Get nodes with no incoming connections (source nodes).
    pub fn get_source_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .filter(|&id| !self.connections.iter().any(|c| c.to.node_id == *id))
            .copied()
            .collect()
    }

    /// Get nodes with no outgoing connections (sink nodes).
    pub fn get_sink_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .keys()
            .filter(|&id| !self.connections.iter().any(|c| c.from == *id))
            .copied()
            .collect()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Clear all nodes and connections.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.connections.clear();
        self.memory.reset();
    }
}

impl<T: Pixel> Default for ProcessingGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::join::JoinSeriesFilter;
    use crate::filters::pointwise::ShiftScaleFilter;

    fn shift() -> ShiftScaleFilter {
        ShiftScaleFilter::new(1.0, 1.0)
    }

    #[test]
    fn test_add_remove_node() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        let id = graph.add(shift());
        assert_eq!(graph.node_count(), 1);
        assert!(graph.has_node(id));

        graph.remove_node(id).unwrap();
        assert_eq!(graph.node_count(), 0);
        assert!(!graph.has_node(id));
    }

    #[test]
    fn test_connect_nodes() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        let node1 = graph.add(shift());
        let node2 = graph.add(shift());

        let conn_id = graph.connect(node1, node2, 0).unwrap();
        assert_eq!(graph.connection_count(), 1);
        assert_eq!(graph.output(node1).unwrap().consumers().len(), 1);
        assert_eq!(graph.input_ids(node2).unwrap(), vec![node1]);

        graph.disconnect(conn_id).unwrap();
        assert_eq!(graph.connection_count(), 0);
        assert!(graph.output(node1).unwrap().consumers().is_empty());
        assert!(matches!(
            graph.input_ids(node2),
            Err(GraphError::MissingInput { input: 0, .. })
        ));
    }

    #[test]
    fn test_input_validation() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        let node1 = graph.add(shift());
        let node2 = graph.add(shift());
        let node3 = graph.add(shift());

        assert!(matches!(
            graph.connect(node1, node2, 1),
            Err(GraphError::InputOutOfRange { input: 1, .. })
        ));

        graph.connect(node1, node2, 0).unwrap();
        assert!(matches!(
            graph.connect(node3, node2, 0),
            Err(GraphError::InputAlreadyConnected { .. })
        ));
    }

    #[test]
    fn test_variadic_inputs_must_be_contiguous() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        let a = graph.add(shift());
        let b = graph.add(shift());
        let join = graph.add(JoinSeriesFilter::new());

        graph.connect(a, join, 0).unwrap();
        graph.connect(b, join, 2).unwrap();
        assert!(matches!(
            graph.input_ids(join),
            Err(GraphError::MissingInput { input: 1, .. })
        ));

        graph.connect(a, join, 1).unwrap();
        assert_eq!(graph.input_ids(join).unwrap(), vec![a, a, b]);
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        let node1 = graph.add(shift());
        let node2 = graph.add(shift());
        let node3 = graph.add(shift());

        graph.connect(node1, node2, 0).unwrap();
        graph.connect(node2, node3, 0).unwrap();

        // This should fail - would create cycle
        let result = graph.connect(node3, node1, 0);
        assert!(matches!(result, Err(GraphError::CycleDetected { .. })));
    }

    #[test]
    fn test_filter_access_marks_modified() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();
        let id = graph.add(shift());
        let before = graph.get_node(id).unwrap().modified_time();

        graph.filter_mut::<ShiftScaleFilter>(id).unwrap().set_scale(3.0);
        assert!(graph.get_node(id).unwrap().modified_time() > before);
        assert_eq!(graph.filter::<ShiftScaleFilter>(id).unwrap().scale(), 3.0);

        assert!(matches!(
            graph.filter::<JoinSeriesFilter>(id),
            Err(GraphError::FilterTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_source_sink_nodes() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        let node1 = graph.add(shift());
        let node2 = graph.add(shift());
        let node3 = graph.add(shift());

        graph.connect(node1, node2, 0).unwrap();
        graph.connect(node2, node3, 0).unwrap();

        let sources = graph.get_source_nodes();
        assert_eq!(sources, vec![node1]);

        let sinks = graph.get_sink_nodes();
        assert_eq!(sinks, vec![node3]);
    }

    #[test]
    fn test_upstream_downstream() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        let node1 = graph.add(shift());
        let node2 = graph.add(shift());
        let node3 = graph.add(shift());

        graph.connect(node1, node2, 0).unwrap();
        graph.connect(node2, node3, 0).unwrap();

        let downstream = graph.get_downstream(node1);
        assert_eq!(downstream.len(), 2);
        assert!(downstream.contains(&node2));
        assert!(downstream.contains(&node3));

        let upstream = graph.get_upstream(node3);
        assert_eq!(upstream.len(), 2);
        assert!(upstream.contains(&node1));
        assert!(upstream.contains(&node2));
    }

    #[test]
    fn test_remove_node_disconnects_consumers() {
        let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();

        let node1 = graph.add(shift());
        let node2 = graph.add(shift());
        graph.connect(node1, node2, 0).unwrap();

        graph.remove_node(node2).unwrap();
        assert_eq!(graph.connection_count(), 0);
        assert!(graph.output(node1).unwrap().consumers().is_empty());
    }
}
