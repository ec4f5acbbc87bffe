//! Neighbourhood filters.
//!
//! Each output pixel depends on a box of input pixels around it, so the
//! region requested from the input is the output request grown by the
//! radius on every axis.

use crate::core::context::ExecutionContext;
use crate::core::error::{NodeId, PipelineResult, RegionError};
use crate::core::image::{compute_offset_table, Image, ImageInformation, Pixel};
use crate::core::iterator::RegionWalker;
use crate::core::node::{Category, NodeMetadata, ProcessObject};
use crate::core::region::Region;
use crate::execution::streaming::StreamSplitter;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;

/// What happens where the neighbourhood leaves the input image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryCondition {
    /// The whole neighbourhood must exist; requesting output near the edge
    /// fails with [`RegionError::InvalidRequestedRegion`].
    #[default]
    Strict,
    /// Out-of-image neighbours take the value of the nearest edge pixel.
    Clamp,
}

/// Box mean over a `(2r + 1)^D` neighbourhood.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanFilter {
    radius: usize,
    boundary: BoundaryCondition,
}

impl MeanFilter {
    /// Create a mean filter with the given radius.
    pub fn new(radius: usize) -> Self {
        Self {
            radius,
            boundary: BoundaryCondition::default(),
        }
    }

    /// Set the boundary condition.
    pub fn with_boundary(mut self, boundary: BoundaryCondition) -> Self {
        self.boundary = boundary;
        self
    }

    /// Neighbourhood radius, the same on every axis.
    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Set the neighbourhood radius.
    pub fn set_radius(&mut self, radius: usize) {
        self.radius = radius;
    }

    /// The boundary condition.
    pub fn boundary(&self) -> BoundaryCondition {
        self.boundary
    }

    /// Set the boundary condition.
    pub fn set_boundary(&mut self, boundary: BoundaryCondition) {
        self.boundary = boundary;
    }

    /// Offsets of every neighbour relative to the centre.
    fn neighbourhood(&self, dim: usize) -> Vec<Vec<i64>> {
        let r = self.radius as i64;
        let mut offsets = vec![Vec::with_capacity(dim)];
        for _ in 0..dim {
            offsets = offsets
                .into_iter()
                .flat_map(|prefix| {
                    (-r..=r).map(move |delta| {
                        let mut next = prefix.clone();
                        next.push(delta);
                        next
                    })
                })
                .collect();
        }
        offsets
    }

    fn mean_block<T: Pixel>(
        &self,
        input: &Image<T>,
        block: &Region,
        neighbourhood: &[Vec<i64>],
    ) -> PipelineResult<Vec<T>> {
        let buffer = input.buffer()?;
        let largest = input.largest_possible_region();
        let dim = block.dimension();
        let table = compute_offset_table(block.size());

        let mut walker = RegionWalker::new(block, &table, block)?;
        let mut values = Vec::with_capacity(block.number_of_cells());
        let mut neighbour = vec![0i64; dim];

        while !walker.is_at_end() {
            let centre = walker.index();
            let mut sum = 0.0;
            for delta in neighbourhood {
                for d in 0..dim {
                    neighbour[d] = centre[d] + delta[d];
                    if self.boundary == BoundaryCondition::Clamp {
                        neighbour[d] = neighbour[d].clamp(largest.index_at(d), largest.end_at(d) - 1);
                    }
                }
                let offset = input.compute_offset(&neighbour).ok_or_else(|| RegionError::OutOfBounds {
                    region: Region::new(neighbour.clone(), vec![1; dim]),
                    bounds: input.buffered_region().clone(),
                })?;
                sum += buffer[offset].to_f64();
            }
            values.push(T::from_f64(sum / neighbourhood.len() as f64));
            walker.advance();
        }
        Ok(values)
    }
}

impl Default for MeanFilter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<T: Pixel> ProcessObject<T> for MeanFilter {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("mean", "Mean")
            .category(Category::Neighborhood)
            .description("Replaces each pixel with the mean of its neighbourhood")
            .parameter("radius", "Neighbourhood half-width on every axis")
            .parameter("boundary", "strict or clamp")
            .tags(["smoothing", "blur"])
            .parallel()
            .build()
    }

    fn generate_input_requested_region(
        &self,
        _node_id: NodeId,
        output_requested: &Region,
        inputs: &[&ImageInformation],
    ) -> PipelineResult<Vec<Region>> {
        let padded = output_requested.padded(&vec![self.radius; output_requested.dimension()]);
        let requested = match self.boundary {
            BoundaryCondition::Strict => padded,
            BoundaryCondition::Clamp => inputs
                .first()
                .map(|info| padded.cropped_to(&info.largest_possible_region))
                .unwrap_or(padded),
        };
        Ok(vec![requested; inputs.len()])
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_, T>) -> PipelineResult<()> {
        let input = ctx.input(0)?;
        let region = ctx.requested_region();
        if region.is_empty() {
            return Ok(());
        }

        let threads = match ctx.threads() {
            0 => rayon::current_num_threads(),
            n => n,
        };
        // Slabs along the outermost axis are contiguous in the output, so
        // the block results concatenate in buffer order.
        let blocks: Vec<Region> =
            StreamSplitter::plan_along(&region, region.dimension() - 1, threads).collect();
        let neighbourhood = self.neighbourhood(region.dimension());

        let results = blocks
            .par_iter()
            .map(|block| self.mean_block(input, block, &neighbourhood))
            .collect::<PipelineResult<Vec<_>>>()?;

        let output = ctx.output_mut().buffer_mut()?;
        let mut start = 0;
        for values in results {
            output[start..start + values.len()].copy_from_slice(&values);
            start += values.len();
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
