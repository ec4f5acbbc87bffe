//! Stacking images into a series along a new axis.

use crate::core::context::ExecutionContext;
use crate::core::error::{ExecutionError, GraphError, NodeId, PipelineResult};
use crate::core::image::{ImageInformation, Pixel};
use crate::core::node::{Category, NodeMetadata, ProcessObject};
use crate::core::region::Region;
use std::any::Any;

/// Joins N images of dimension D into one image of dimension D + 1.
///
/// Input `k` becomes slice `k` along the new, slowest axis. All inputs must
/// share the same largest region.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSeriesFilter {
    spacing: f64,
    origin: f64,
}

impl JoinSeriesFilter {
    /// Create a join with unit spacing and zero origin on the new axis.
    pub fn new() -> Self {
        Self {
            spacing: 1.0,
            origin: 0.0,
        }
    }

    /// Set the spacing of the new axis.
    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = spacing;
        self
    }

    /// Set the origin of the new axis.
    pub fn with_origin(mut self, origin: f64) -> Self {
        self.origin = origin;
        self
    }

    /// Spacing of the new axis.
    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Origin of the new axis.
    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Set the spacing of the new axis.
    pub fn set_spacing(&mut self, spacing: f64) {
        self.spacing = spacing;
    }

    /// Set the origin of the new axis.
    pub fn set_origin(&mut self, origin: f64) {
        self.origin = origin;
    }
}

impl Default for JoinSeriesFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// The output request without its last axis.
fn lower_dimensions(region: &Region) -> Region {
    let axes: Vec<usize> = (0..region.dimension() - 1).collect();
    region.project(&axes)
}

impl<T: Pixel> ProcessObject<T> for JoinSeriesFilter {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("join_series", "Join Series")
            .category(Category::Join)
            .description("Stacks its inputs along a new last axis")
            .variadic_inputs(1)
            .parameter("spacing", "Spacing of the new axis")
            .parameter("origin", "Origin of the new axis")
            .tags(["stack", "volume"])
            .build()
    }

    fn generate_output_information(
        &self,
        node_id: NodeId,
        inputs: &[&ImageInformation],
    ) -> PipelineResult<ImageInformation> {
        let first = inputs.first().ok_or(GraphError::MissingInput { node_id, input: 0 })?;

        if let Some((input, info)) = inputs
            .iter()
            .enumerate()
            .find(|(_, info)| info.largest_possible_region != first.largest_possible_region)
        {
            return Err(ExecutionError::InconsistentInputs {
                node_id,
                reason: format!(
                    "input {} covers {}, input 0 covers {}",
                    input, info.largest_possible_region, first.largest_possible_region
                ),
            }
            .into());
        }

        Ok(first.appended(0, inputs.len(), self.origin, self.spacing))
    }

    fn generate_input_requested_region(
        &self,
        _node_id: NodeId,
        output_requested: &Region,
        inputs: &[&ImageInformation],
    ) -> PipelineResult<Vec<Region>> {
        Ok(vec![lower_dimensions(output_requested); inputs.len()])
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_, T>) -> PipelineResult<()> {
        let region = ctx.requested_region();
        let axis = region.dimension() - 1;
        let lower = lower_dimensions(&region);

        for slice in region.index_at(axis)..region.end_at(axis) {
            let input = ctx.input(slice as usize)?;
            let dest = region.with_index_at(axis, slice).with_size_at(axis, 1);
            ctx.output_mut().paste_from(&dest, input, &lower)?;
        }
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
    use crate::core::error::PipelineError;
    use crate::core::image::Image;
    use crate::filters::source::{MemorySource, SourceNode};
    use crate::graph::structure::ProcessingGraph;

    fn plane(graph: &mut ProcessingGraph<u16>, size: [usize; 2], value: u16) -> NodeId {
        let info = ImageInformation::new(Region::from_size(size)).with_origin([5.0, 6.0]);
        graph.add(SourceNode::new(MemorySource::new(Image::filled(info, value))))
    }

    #[test]
    fn test_join_stacks_inputs() {
        let mut graph = ProcessingGraph::new();
        let join = graph.add(JoinSeriesFilter::new().with_spacing(2.5).with_origin(-1.0));
        for value in 0..3 {
            let source = plane(&mut graph, [2, 2], value);
            graph.connect(source, join, value as usize).unwrap();
        }
        graph.update(join).unwrap();

        let output = graph.output(join).unwrap();
        assert_eq!(output.largest_possible_region(), &Region::from_size([2, 2, 3]));
        assert_eq!(output.information().spacing, vec![1.0, 1.0, 2.5]);
        assert_eq!(output.information().origin, vec![5.0, 6.0, -1.0]);
        assert_eq!(output.buffer().unwrap(), &[0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_join_copies_only_requested_slices() {
        let mut graph = ProcessingGraph::new();
        let join = graph.add(JoinSeriesFilter::new());
        let sources: Vec<NodeId> = (0..4).map(|v| plane(&mut graph, [3, 3], v)).collect();
        for (input, &source) in sources.iter().enumerate() {
            graph.connect(source, join, input).unwrap();
        }

        graph.set_requested_region(join, Region::new([1, 0, 2], [2, 3, 1])).unwrap();
        graph.update(join).unwrap();

        let output = graph.output(join).unwrap();
        assert_eq!(output.buffered_region(), &Region::new([1, 0, 2], [2, 3, 1]));
        assert!(output.buffer().unwrap().iter().all(|&v| v == 2));
        for &source in &sources {
            assert_eq!(
                graph.output(source).unwrap().requested_region(),
                &Region::new([1, 0], [2, 3])
            );
        }
    }

    #[test]
    fn test_join_rejects_mismatched_inputs() {
        let mut graph = ProcessingGraph::new();
        let join = graph.add(JoinSeriesFilter::new());
        let a = plane(&mut graph, [2, 2], 0);
        let b = plane(&mut graph, [2, 3], 0);
        graph.connect(a, join, 0).unwrap();
        graph.connect(b, join, 1).unwrap();

        let error = graph.update(join).unwrap_err();
        assert!(matches!(
            error,
            PipelineError::Execution(ExecutionError::InconsistentInputs { .. })
        ));
    }
}
