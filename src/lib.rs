//! # Strata - Demand-driven N-dimensional Image Pipelines
//!
//! Strata connects processing stages into a directed acyclic graph and
//! computes only what a consumer asks for. Asking a node for a region of its
//! output negotiates, stage by stage, the smallest input regions needed to
//! produce it, and re-uses any buffered output that is still valid.
//!
//! ## Features
//!
//! - **Region propagation**: nodes translate output requests into input
//!   requests, so crops and slices only read what they need
//! - **Re-execution avoidance**: nodes whose buffered output covers the
//!   request, and whose upstream is unchanged, are skipped
//! - **Streaming**: outputs larger than memory are produced in divisions
//!   with bounded buffers
//! - **Early release**: intermediate outputs can be freed as soon as every
//!   consumer has read them
//! - **Extensible**: add stages by implementing [`ProcessObject`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata::prelude::*;
//!
//! let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();
//!
//! let info = ImageInformation::new(Region::from_size([256, 256, 64]));
//! let source = graph.add(SourceNode::new(FunctionSource::new(info, |index: &[i64]| {
//!     index.iter().sum::<i64>() as f32
//! })));
//! let smooth = graph.add(MeanFilter::new(1).with_boundary(BoundaryCondition::Clamp));
//! graph.connect(source, smooth, 0)?;
//!
//! // Produce only one slab of the output.
//! graph.set_requested_region(smooth, Region::new([0, 0, 10], [256, 256, 4]))?;
//! let stats = graph.update(smooth)?;
//!
//! // Or stream the whole output in 8 divisions.
//! let orchestrator = UpdateOrchestrator::default();
//! let mut sink = MemoryImageSink::new();
//! StreamingWriter::new(8).write(&orchestrator, &mut graph, smooth, &mut sink)?;
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: regions, images, iterators, the node trait and errors
//! - [`graph`]: graph structure and topology analysis
//! - [`execution`]: update orchestration, progress and streaming
//! - [`filters`]: built-in stages and the filter registry
//! - [`config`]: TOML pipeline configuration
//!
//! [`ProcessObject`]: crate::core::node::ProcessObject

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod execution;
pub mod filters;
pub mod graph;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use strata::prelude::*;
/// ```
pub mod prelude {
    // Regions and images
    pub use crate::core::image::{Image, ImageInformation, Pixel};
    pub use crate::core::iterator::{RegionConstIterator, RegionIterator};
    pub use crate::core::region::Region;

    // Node traits and types
    pub use crate::core::context::ExecutionContext;
    pub use crate::core::node::{Category, InputArity, NodeMetadata, ProcessObject, UpdateState};

    // Errors
    pub use crate::core::error::{
        ExecutionError, GraphError, NodeId, PipelineError, PipelineResult, RegionError,
    };

    // Graph
    pub use crate::graph::connection::{Connection, Endpoint};
    pub use crate::graph::structure::{GraphNode, ProcessingGraph};
    pub use crate::graph::topology::TopologyAnalyzer;

    // Execution
    pub use crate::execution::engine::{ExecutionOptions, ExecutionStats, UpdateOrchestrator};
    pub use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate, SkipReason};
    pub use crate::execution::streaming::{
        ImageSink, MemoryImageSink, MemoryTracker, RawFileSink, StreamDivisions, StreamSplitter,
        StreamingSummary, StreamingWriter,
    };

    // Filters
    pub use crate::filters::extract::ExtractFilter;
    pub use crate::filters::join::JoinSeriesFilter;
    pub use crate::filters::monitor::{MonitorHandle, PipelineMonitor};
    pub use crate::filters::neighborhood::{BoundaryCondition, MeanFilter};
    pub use crate::filters::pointwise::ShiftScaleFilter;
    pub use crate::filters::registry::{FilterFactory, FilterRegistry, RegistryEntry};
    pub use crate::filters::source::{FunctionSource, ImageSource, MemorySource, SourceNode};

    // Configuration
    pub use crate::config::PipelineConfig;
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
