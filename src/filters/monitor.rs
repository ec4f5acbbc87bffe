//! Pass-through instrumentation.

use crate::core::context::ExecutionContext;
use crate::core::error::PipelineResult;
use crate::core::image::Pixel;
use crate::core::node::{Category, NodeMetadata, ProcessObject};
use crate::core::region::Region;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MonitorState {
    updates: usize,
    regions: Vec<Region>,
}

/// Shared view of a [`PipelineMonitor`]'s records.
///
/// Handles stay valid after the monitor has been moved into a graph.
#[derive(Debug, Clone, Default)]
pub struct MonitorHandle {
    state: Arc<Mutex<MonitorState>>,
}

impl MonitorHandle {
    /// How many times the monitor executed.
    pub fn number_of_updates(&self) -> usize {
        self.state.lock().updates
    }

    /// The requested region of every execution, oldest first.
    pub fn updated_regions(&self) -> Vec<Region> {
        self.state.lock().regions.clone()
    }

    /// Forget all records.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.updates = 0;
        state.regions.clear();
    }
}

/// Copies its input unchanged and records every execution.
#[derive(Debug, Clone, Default)]
pub struct PipelineMonitor {
    handle: MonitorHandle,
}

impl PipelineMonitor {
    /// Create a monitor with empty records.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the records.
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }
}

impl<T: Pixel> ProcessObject<T> for PipelineMonitor {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("monitor", "Pipeline Monitor")
            .category(Category::Utility)
            .description("Passes its input through and counts executions")
            .tags(["debug", "passthrough"])
            .build()
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_, T>) -> PipelineResult<()> {
        let input = ctx.input(0)?;
        let region = ctx.requested_region();
        ctx.output_mut().paste_from(&region, input, &region)?;

        let mut state = self.handle.state.lock();
        state.updates += 1;
        state.regions.push(region);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::ImageInformation;
    use crate::filters::source::{FunctionSource, SourceNode};
    use crate::graph::structure::ProcessingGraph;

    #[test]
    fn test_monitor_records_regions() {
        let mut graph = ProcessingGraph::new();
        let info = ImageInformation::new(Region::from_size([4, 4]));
        let source = graph.add(SourceNode::new(FunctionSource::new(info, |index: &[i64]| index[1] as f32)));
        let monitor = PipelineMonitor::new();
        let handle = monitor.handle();
        let id = graph.add(monitor);
        graph.connect(source, id, 0).unwrap();

        graph.set_requested_region(id, Region::new([0, 0], [4, 2])).unwrap();
        graph.update(id).unwrap();
        graph.set_requested_region(id, Region::new([0, 2], [4, 2])).unwrap();
        graph.update(id).unwrap();
        graph.update(id).unwrap();

        assert_eq!(handle.number_of_updates(), 2);
        assert_eq!(
            handle.updated_regions(),
            vec![Region::new([0, 0], [4, 2]), Region::new([0, 2], [4, 2])]
        );
        assert_eq!(graph.output(id).unwrap().pixel(&[1, 3]).unwrap(), 3.0);

        handle.clear();
        assert_eq!(handle.number_of_updates(), 0);
    }
}
