//! Core types and traits for the Strata pipeline.
//!
//! This module contains the foundational types that make up the pipeline:
//! - Regions and images
//! - Region iterators
//! - The node capability trait and metadata
//! - Error types
//! - The execution context

pub mod region;
pub mod image;
pub mod iterator;
pub mod error;
pub mod context;
pub mod node;

// Re-export commonly used types
pub use region::Region;
pub use image::{ConsumerTable, Image, ImageInformation, Pixel};
pub use iterator::{RegionConstIterator, RegionIterator, RegionWalker};
pub use error::{ExecutionError, GraphError, NodeId, PipelineError, PipelineResult, RegionError};
pub use context::ExecutionContext;
pub use node::{Category, InputArity, NodeMetadata, ProcessObject, UpdateState};
