//! Execution context.
//!
//! The context hands a node read access to its inputs and exclusive access
//! to its own output for the duration of one execution.

use crate::core::error::{ExecutionError, GraphError, NodeId, PipelineResult};
use crate::core::image::{Image, Pixel};
use crate::core::region::Region;

/// Context provided during node execution.
#[derive(Debug)]
pub struct ExecutionContext<'a, T: Pixel> {
    /// ID of the node being executed.
    pub node_id: NodeId,
    /// Input images, in input order.
    inputs: Vec<&'a Image<T>>,
    /// The node's output, allocated over its requested region.
    output: &'a mut Image<T>,
    /// Threads the node may use internally (0 = rayon default).
    threads: usize,
}

impl<'a, T: Pixel> ExecutionContext<'a, T> {
    /// Create a new execution context.
    pub fn new(node_id: NodeId, inputs: Vec<&'a Image<T>>, output: &'a mut Image<T>) -> Self {
        Self {
            node_id,
            inputs,
            output,
            threads: 0,
        }
    }

    /// Set the thread budget for internal parallelism.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Get an input image by index.
    pub fn input(&self, index: usize) -> PipelineResult<&'a Image<T>> {
        self.inputs.get(index).copied().ok_or_else(|| {
            GraphError::MissingInput {
                node_id: self.node_id,
                input: index,
            }
            .into()
        })
    }

    /// All input images.
    pub fn inputs(&self) -> &[&'a Image<T>] {
        &self.inputs
    }

    /// Number of inputs.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// The output image.
    pub fn output(&self) -> &Image<T> {
        &*self.output
    }

    /// Mutable access to the output image.
    pub fn output_mut(&mut self) -> &mut Image<T> {
        &mut *self.output
    }

    /// The region this execution must fill.
    pub fn requested_region(&self) -> Region {
        self.output.requested_region().clone()
    }

    /// Thread budget for internal parallelism (0 = rayon default).
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Build a node execution error for this node.
    pub fn error(&self, message: impl Into<String>) -> ExecutionError {
        ExecutionError::NodeExecution {
            node_id: self.node_id,
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PipelineError;
    use crate::core::image::ImageInformation;

    #[test]
    fn test_input_access() {
        let info = ImageInformation::new(Region::from_size([2, 2]));
        let input = Image::filled(info.clone(), 5u8);
        let mut output = Image::new(info);
        output.set_requested_region(Region::new([1, 0], [1, 2]));

        let node_id = NodeId::new();
        let ctx = ExecutionContext::new(node_id, vec![&input], &mut output).with_threads(2);

        assert_eq!(ctx.input_count(), 1);
        assert_eq!(ctx.input(0).unwrap().pixel(&[1, 1]).unwrap(), 5);
        assert_eq!(ctx.requested_region(), Region::new([1, 0], [1, 2]));
        assert_eq!(ctx.threads(), 2);
        assert!(matches!(
            ctx.input(1),
            Err(PipelineError::Graph(GraphError::MissingInput { input: 1, .. }))
        ));
    }

    #[test]
    fn test_error_carries_node_id() {
        let mut output: Image<f32> = Image::default();
        let node_id = NodeId::new();
        let ctx = ExecutionContext::new(node_id, Vec::new(), &mut output);
        assert_eq!(ctx.error("boom").node_id(), Some(node_id));
    }
}
