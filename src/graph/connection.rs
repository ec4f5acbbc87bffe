//! Connection types for the graph.

use crate::core::error::{ConnectionId, NodeId};
use serde::{Deserialize, Serialize};

/// The receiving end of a connection (node + input index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// The node ID.
    pub node_id: NodeId,
    /// The input index on that node.
    pub input: usize,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(node_id: NodeId, input: usize) -> Self {
        Self { node_id, input }
    }
}

/// Data flow from one node's output into another node's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Unique identifier for this connection.
    pub id: ConnectionId,
    /// Producing node.
    pub from: NodeId,
    /// Consuming endpoint.
    pub to: Endpoint,
}

impl Connection {
    /// Create a new connection.
    pub fn new(from: NodeId, to: Endpoint) -> Self {
        Self {
            id: ConnectionId::new(),
            from,
            to,
        }
    }

    /// Create with a specific ID.
    pub fn with_id(mut self, id: ConnectionId) -> Self {
        self.id = id;
        self
    }
}
