//! Region extraction: cropping and slicing.
//!
//! The extraction region selects a box of the input. Axes given a size of
//! zero are collapsed, so extracting `size = [4, 4, 0]` at `z = 2` from a
//! volume yields the 2D slice at that depth.

use crate::core::context::ExecutionContext;
use crate::core::error::{ExecutionError, GraphError, NodeId, PipelineResult, RegionError};
use crate::core::image::{ImageInformation, Pixel};
use crate::core::node::{Category, NodeMetadata, ProcessObject};
use crate::core::region::Region;
use std::any::Any;

/// Extracts a sub-region, optionally dropping axes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractFilter {
    extraction_region: Option<Region>,
}

impl ExtractFilter {
    /// Extract `region` from the input.
    pub fn new(region: Region) -> Self {
        Self {
            extraction_region: Some(region),
        }
    }

    /// The extraction region, if set.
    pub fn extraction_region(&self) -> Option<&Region> {
        self.extraction_region.as_ref()
    }

    /// Set the extraction region.
    pub fn set_extraction_region(&mut self, region: Region) {
        self.extraction_region = Some(region);
    }

    /// Input axes that survive into the output.
    fn kept_axes(region: &Region) -> Vec<usize> {
        (0..region.dimension()).filter(|&d| region.size_at(d) > 0).collect()
    }

    fn region(&self, node_id: NodeId) -> PipelineResult<&Region> {
        self.extraction_region.as_ref().ok_or_else(|| {
            ExecutionError::NodeExecution {
                node_id,
                error: "extraction region not set".to_string(),
            }
            .into()
        })
    }

    /// The input region holding the pixels of `output_region`.
    fn input_region(extraction: &Region, output_region: &Region) -> Region {
        let mut kept = 0;
        let mut index = Vec::with_capacity(extraction.dimension());
        let mut size = Vec::with_capacity(extraction.dimension());
        for d in 0..extraction.dimension() {
            if extraction.size_at(d) > 0 {
                index.push(output_region.index_at(kept));
                size.push(output_region.size_at(kept));
                kept += 1;
            } else {
                index.push(extraction.index_at(d));
                size.push(1);
            }
        }
        Region::new(index, size)
    }
}

impl<T: Pixel> ProcessObject<T> for ExtractFilter {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("extract", "Extract")
            .category(Category::Extract)
            .description("Crops a region; zero-size axes are removed from the output")
            .parameter("region", "Index and size to extract; size 0 collapses an axis")
            .tags(["crop", "slice"])
            .build()
    }

    fn generate_output_information(
        &self,
        node_id: NodeId,
        inputs: &[&ImageInformation],
    ) -> PipelineResult<ImageInformation> {
        let extraction = self.region(node_id)?;
        let input = inputs.first().ok_or(GraphError::MissingInput { node_id, input: 0 })?;

        if extraction.dimension() != input.dimension() {
            return Err(RegionError::DimensionMismatch {
                expected: input.dimension(),
                got: extraction.dimension(),
            }
            .into());
        }

        let kept = Self::kept_axes(extraction);
        let footprint = Region::new(
            extraction.index().to_vec(),
            extraction.size().iter().map(|&s| s.max(1)).collect::<Vec<_>>(),
        );
        if kept.is_empty() || !footprint.is_inside(&input.largest_possible_region) {
            return Err(RegionError::OutOfBounds {
                region: extraction.clone(),
                bounds: input.largest_possible_region.clone(),
            }
            .into());
        }

        let mut information = input.project(&kept);
        information.largest_possible_region = extraction.project(&kept);
        Ok(information)
    }

    fn generate_input_requested_region(
        &self,
        node_id: NodeId,
        output_requested: &Region,
        _inputs: &[&ImageInformation],
    ) -> PipelineResult<Vec<Region>> {
        let extraction = self.region(node_id)?;
        Ok(vec![Self::input_region(extraction, output_requested)])
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_, T>) -> PipelineResult<()> {
        let extraction = self.region(ctx.node_id)?;
        let input = ctx.input(0)?;
        let region = ctx.requested_region();
        let source = Self::input_region(extraction, &region);
        ctx.output_mut().paste_from(&region, input, &source)?;
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
    use crate::filters::source::{FunctionSource, SourceNode};
    use crate::graph::structure::ProcessingGraph;

    fn volume(graph: &mut ProcessingGraph<i32>) -> NodeId {
        let info = ImageInformation::new(Region::from_size([4, 3, 5])).with_spacing([1.0, 2.0, 3.0]);
        graph.add(SourceNode::new(FunctionSource::new(info, |index: &[i64]| {
            (index[0] + 10 * index[1] + 100 * index[2]) as i32
        })))
    }

    #[test]
    fn test_slice_collapses_axis() {
        let mut graph = ProcessingGraph::new();
        let source = volume(&mut graph);
        let extract = graph.add(ExtractFilter::new(Region::new([0, 0, 2], [4, 3, 0])));
        graph.connect(source, extract, 0).unwrap();
        graph.update(extract).unwrap();

        let output = graph.output(extract).unwrap();
        assert_eq!(output.dimension(), 2);
        assert_eq!(output.information().spacing, vec![1.0, 2.0]);
        assert_eq!(output.pixel(&[3, 1]).unwrap(), 213);

        // Only the slice was read from the source.
        assert_eq!(
            graph.output(source).unwrap().buffered_region(),
            &Region::new([0, 0, 2], [4, 3, 1])
        );
    }

    #[test]
    fn test_crop_keeps_index() {
        let mut graph = ProcessingGraph::new();
        let source = volume(&mut graph);
        let extract = graph.add(ExtractFilter::new(Region::new([1, 0, 1], [2, 0, 3])));
        graph.connect(source, extract, 0).unwrap();

        graph.update_output_information(extract).unwrap();
        assert_eq!(
            graph.output(extract).unwrap().largest_possible_region(),
            &Region::new([1, 1], [2, 3])
        );

        graph.set_requested_region(extract, Region::new([2, 3], [1, 1])).unwrap();
        graph.update(extract).unwrap();
        assert_eq!(graph.output(extract).unwrap().pixel(&[2, 3]).unwrap(), 302);
    }

    #[test]
    fn test_extraction_outside_input() {
        let mut graph = ProcessingGraph::new();
        let source = volume(&mut graph);
        let extract = graph.add(ExtractFilter::new(Region::new([0, 0, 5], [4, 3, 0])));
        graph.connect(source, extract, 0).unwrap();

        let error = graph.update(extract).unwrap_err();
        assert!(matches!(error, PipelineError::Region(RegionError::OutOfBounds { .. })));
    }

    #[test]
    fn test_unset_region() {
        let mut graph = ProcessingGraph::new();
        let source = volume(&mut graph);
        let extract = graph.add(ExtractFilter::default());
        graph.connect(source, extract, 0).unwrap();

        let error = graph.update(extract).unwrap_err();
        assert_eq!(error.node_id(), Some(extract));
    }

    #[test]
    fn test_changing_region_reexecutes() {
        let mut graph = ProcessingGraph::new();
        let source = volume(&mut graph);
        let extract = graph.add(ExtractFilter::new(Region::new([0, 0, 0], [4, 3, 0])));
        graph.connect(source, extract, 0).unwrap();
        graph.update(extract).unwrap();

        graph
            .filter_mut::<ExtractFilter>(extract)
            .unwrap()
            .set_extraction_region(Region::new([0, 0, 4], [4, 3, 0]));
        graph.update(extract).unwrap();
        assert_eq!(graph.output(extract).unwrap().pixel(&[0, 0]).unwrap(), 400);
    }
}
