//! Filter module.
//!
//! Contains the pipeline stages that ship with Strata and the registry used
//! to create them by id.

pub mod extract;
pub mod join;
pub mod monitor;
pub mod neighborhood;
pub mod pointwise;
pub mod registry;
pub mod source;

use crate::core::image::Pixel;

pub use extract::ExtractFilter;
pub use join::JoinSeriesFilter;
pub use monitor::{MonitorHandle, PipelineMonitor};
pub use neighborhood::{BoundaryCondition, MeanFilter};
pub use pointwise::ShiftScaleFilter;
pub use registry::{FilterFactory, FilterRegistry};
pub use source::{FunctionSource, ImageSource, MemorySource, SourceNode};

/// Register all built-in filters.
pub fn register_builtins<T: Pixel>(registry: &mut FilterRegistry<T>) {
    registry.register(|| Box::new(ShiftScaleFilter::default()));
    registry.register(|| Box::new(MeanFilter::default()));
    registry.register(|| Box::new(ExtractFilter::default()));
    registry.register(|| Box::new(JoinSeriesFilter::new()));
    registry.register(|| Box::new(PipelineMonitor::new()));
}
