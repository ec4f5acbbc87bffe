//! Error types for Strata.
//!
//! Uses thiserror for structured errors with context. Region and graph errors
//! are serializable so a consumer can report them verbatim; every error that
//! concerns a particular node carries its [`NodeId`].
//!
//! Nothing here is retried by the pipeline: an error aborts the `update()`
//! call that raised it and propagates to the consumer unchanged.

use crate::core::region::Region;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a node ID from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Unique identifier for a connection in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Top-level error type for Strata.
///
/// This enum encompasses all error categories and enables automatic
/// conversion between specific error types.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors from region negotiation and buffer access.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegionError {
    #[error("Region {region} is outside of {bounds}")]
    OutOfBounds { region: Region, bounds: Region },

    #[error(
        "Node {node_id} requested {requested} from input {input}, \
         which can only provide {largest}"
    )]
    InvalidRequestedRegion {
        node_id: NodeId,
        input: usize,
        requested: Region,
        largest: Region,
    },

    #[error("Buffer for {region} has been released")]
    StaleBufferAccess { region: Region },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Buffer holds {got} pixels but the region has {expected} cells")]
    BufferSizeMismatch { expected: usize, got: usize },
}

/// Errors related to graph structure and operations.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    #[error("Node {node_id} has no input {input}")]
    InputOutOfRange { node_id: NodeId, input: usize },

    #[error("Input {input} on node {node_id} is already connected")]
    InputAlreadyConnected { node_id: NodeId, input: usize },

    #[error("Missing required input {input} on node {node_id}")]
    MissingInput { node_id: NodeId, input: usize },

    #[error("Cycle detected in graph involving nodes: {nodes:?}")]
    CycleDetected { nodes: Vec<NodeId> },

    #[error("Node {node_id} is not a {expected}")]
    FilterTypeMismatch { node_id: NodeId, expected: String },
}

/// Errors raised while a node computes its output.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Node {node_id} execution failed: {error}")]
    NodeExecution { node_id: NodeId, error: String },

    #[error("Node {node_id} received inconsistent inputs: {reason}")]
    InconsistentInputs { node_id: NodeId, reason: String },

    #[error("Out of memory: need {required} bytes, limit is {limit} bytes")]
    OutOfMemory { required: usize, limit: usize },

    #[error("Sink failed to write division {division}: {error}")]
    Sink { division: usize, error: String },

    #[error("{0}")]
    Other(String),
}

// ============================================================================
// Error Utilities
// ============================================================================

impl RegionError {
    /// Get the node ID that caused this error, if applicable.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            RegionError::InvalidRequestedRegion { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }
}

impl ExecutionError {
    /// Get the node ID that caused this error, if applicable.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            ExecutionError::NodeExecution { node_id, .. }
            | ExecutionError::InconsistentInputs { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }
}

impl PipelineError {
    /// Get the node ID that caused this error, if applicable.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            PipelineError::Region(e) => e.node_id(),
            PipelineError::Execution(e) => e.node_id(),
            PipelineError::Graph(GraphError::NodeNotFound(id))
            | PipelineError::Graph(GraphError::MissingInput { node_id: id, .. })
            | PipelineError::Graph(GraphError::InputOutOfRange { node_id: id, .. }) => Some(*id),
            _ => None,
        }
    }
}

/// Result type alias for region operations.
pub type RegionResult<T> = Result<T, RegionError>;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for execution operations.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
