//! Execution module.
//!
//! Runs update cycles over a processing graph and streams large outputs
//! division by division.

pub mod engine;
pub mod progress;
pub mod streaming;

pub use engine::{ExecutionOptions, ExecutionStats, UpdateOrchestrator};
pub use progress::{ProgressTracker, ProgressUpdate};
pub use streaming::{
    ImageSink, MemoryImageSink, MemoryTracker, RawFileSink, StreamDivisions, StreamSplitter,
    StreamingSummary, StreamingWriter,
};
