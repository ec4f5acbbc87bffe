//! Source nodes: the start of every pipeline.
//!
//! A [`SourceNode`] wraps an [`ImageSource`], which describes the image it
//! can produce and fills any requested sub-region on demand. Readers for
//! concrete file formats plug in here.

use crate::core::context::ExecutionContext;
use crate::core::error::{NodeId, PipelineResult};
use crate::core::image::{Image, ImageInformation, Pixel};
use crate::core::iterator::RegionIterator;
use crate::core::node::{Category, NodeMetadata, ProcessObject};
use crate::core::region::Region;
use std::any::Any;
use std::sync::Arc;

/// Provides pixels for a source node.
pub trait ImageSource<T: Pixel>: Send + Sync + 'static {
    /// Largest region and geometry of the image.
    fn information(&self) -> PipelineResult<ImageInformation>;

    /// Fill `output` over `region`. The output is already allocated over
    /// exactly that region.
    fn read(&self, region: &Region, output: &mut Image<T>) -> PipelineResult<()>;
}

/// Pipeline node producing pixels from an [`ImageSource`].
#[derive(Debug, Clone)]
pub struct SourceNode<S> {
    source: S,
}

impl<S> SourceNode<S> {
    /// Wrap a source.
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Mutable access to the wrapped source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<T: Pixel, S: ImageSource<T>> ProcessObject<T> for SourceNode<S> {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("source", "Source")
            .category(Category::Source)
            .description("Produces pixels for any requested region")
            .inputs(0)
            .tag("reader")
            .build()
    }

    fn generate_output_information(
        &self,
        _node_id: NodeId,
        _inputs: &[&ImageInformation],
    ) -> PipelineResult<ImageInformation> {
        self.source.information()
    }

    fn generate_input_requested_region(
        &self,
        _node_id: NodeId,
        _output_requested: &Region,
        _inputs: &[&ImageInformation],
    ) -> PipelineResult<Vec<Region>> {
        Ok(Vec::new())
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_, T>) -> PipelineResult<()> {
        let region = ctx.requested_region();
        self.source.read(&region, ctx.output_mut())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Serves sub-regions of an image held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource<T: Pixel> {
    image: Image<T>,
}

impl<T: Pixel> MemorySource<T> {
    /// Serve `image`, which must buffer its largest region.
    pub fn new(image: Image<T>) -> Self {
        Self { image }
    }

    /// The served image.
    pub fn image(&self) -> &Image<T> {
        &self.image
    }

    /// Replace the served image.
    pub fn set_image(&mut self, image: Image<T>) {
        self.image = image;
    }
}

impl<T: Pixel> ImageSource<T> for MemorySource<T> {
    fn information(&self) -> PipelineResult<ImageInformation> {
        Ok(self.image.information().clone())
    }

    fn read(&self, region: &Region, output: &mut Image<T>) -> PipelineResult<()> {
        output.paste_from(region, &self.image, region)?;
        Ok(())
    }
}

/// Computes every pixel from its lattice index.
pub struct FunctionSource<T: Pixel> {
    information: ImageInformation,
    generator: Arc<dyn Fn(&[i64]) -> T + Send + Sync>,
}

impl<T: Pixel> FunctionSource<T> {
    /// Create a source whose pixel at `index` is `generator(index)`.
    pub fn new<F>(information: ImageInformation, generator: F) -> Self
    where
        F: Fn(&[i64]) -> T + Send + Sync + 'static,
    {
        Self {
            information,
            generator: Arc::new(generator),
        }
    }

    /// Change the image extent and geometry.
    pub fn set_information(&mut self, information: ImageInformation) {
        self.information = information;
    }
}

impl<T: Pixel> Clone for FunctionSource<T> {
    fn clone(&self) -> Self {
        Self {
            information: self.information.clone(),
            generator: self.generator.clone(),
        }
    }
}

impl<T: Pixel> std::fmt::Debug for FunctionSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSource")
            .field("information", &self.information)
            .finish_non_exhaustive()
    }
}

impl<T: Pixel> ImageSource<T> for FunctionSource<T> {
    fn information(&self) -> PipelineResult<ImageInformation> {
        Ok(self.information.clone())
    }

    fn read(&self, region: &Region, output: &mut Image<T>) -> PipelineResult<()> {
        let mut it = RegionIterator::new(output, region)?;
        while !it.is_at_end() {
            it.set((self.generator)(&it.index()));
            it.advance();
        }
        Ok(())
    }
}
