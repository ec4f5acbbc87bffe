//! Graph module for managing processing graphs.
//!
//! A processing graph is a directed acyclic graph (DAG) where nodes are
//! pipeline stages and edges carry images from one stage's output into
//! another stage's input.

pub mod structure;
pub mod connection;
pub mod topology;

// Re-export commonly used types
pub use structure::{GraphNode, ProcessingGraph};
pub use connection::{Connection, Endpoint};
pub use topology::TopologyAnalyzer;
