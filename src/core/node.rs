//! ProcessObject trait and node metadata.
//!
//! Every stage of a pipeline implements [`ProcessObject`]. A node takes part
//! in three negotiation steps driven by the update orchestrator:
//!
//! 1. **Information**: describe the output (largest region and geometry)
//!    from the inputs' information, before any pixel exists.
//! 2. **Region request**: given the region a consumer wants from the output,
//!    say which region is needed from each input.
//! 3. **Execution**: fill the output buffer over its requested region.

use crate::core::context::ExecutionContext;
use crate::core::error::{GraphError, NodeId, PipelineResult};
use crate::core::image::{ImageInformation, Pixel};
use crate::core::region::Region;
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Category for organizing filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Produces data without inputs.
    Source,
    /// Per-pixel arithmetic.
    Pointwise,
    /// Reads a neighbourhood around each output pixel.
    Neighborhood,
    /// Crops or slices its input.
    Extract,
    /// Combines several inputs.
    Join,
    /// Pass-through and instrumentation.
    Utility,
    /// Custom/user-defined
    #[default]
    Custom,
}

impl Category {
    /// Get the display name for this category.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Source => "Source",
            Category::Pointwise => "Pointwise",
            Category::Neighborhood => "Neighborhood",
            Category::Extract => "Extract",
            Category::Join => "Join",
            Category::Utility => "Utility",
            Category::Custom => "Custom",
        }
    }

    /// Get all categories in display order.
    pub fn all() -> &'static [Category] {
        &[
            Category::Source,
            Category::Pointwise,
            Category::Neighborhood,
            Category::Extract,
            Category::Join,
            Category::Utility,
            Category::Custom,
        ]
    }
}

/// How many inputs a node accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputArity {
    /// Exactly this many inputs, all required.
    Fixed(usize),
    /// Any number of inputs, at least `min`, connected without gaps.
    Variadic {
        /// Minimum number of connected inputs.
        min: usize,
    },
}

impl InputArity {
    /// Whether `input` is a valid input index.
    pub fn accepts(&self, input: usize) -> bool {
        match self {
            InputArity::Fixed(n) => input < *n,
            InputArity::Variadic { .. } => true,
        }
    }

    /// Number of inputs that must be connected.
    pub fn required(&self) -> usize {
        match self {
            InputArity::Fixed(n) => *n,
            InputArity::Variadic { min } => *min,
        }
    }
}

/// A user-facing parameter of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter name.
    pub name: String,
    /// What it controls.
    pub description: String,
}

/// Metadata describing a filter node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Unique identifier for this filter type (e.g., "mean")
    pub id: String,
    /// Human-readable name (e.g., "Mean")
    pub name: String,
    /// Category for organization
    pub category: Category,
    /// Detailed description
    pub description: String,
    /// Version string
    pub version: String,
    /// Accepted inputs
    pub inputs: InputArity,
    /// Tunable parameters
    pub parameters: Vec<ParameterInfo>,
    /// Searchable tags
    pub tags: Vec<String>,
    /// Whether execution splits work across threads
    pub parallel: bool,
}

impl NodeMetadata {
    /// Create a new metadata builder.
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> NodeMetadataBuilder {
        NodeMetadataBuilder::new(id, name)
    }

    /// Get all parameter names.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Whether the node has no inputs.
    pub fn is_source(&self) -> bool {
        self.inputs == InputArity::Fixed(0)
    }
}

/// Builder for NodeMetadata.
pub struct NodeMetadataBuilder {
    id: String,
    name: String,
    category: Category,
    description: String,
    version: String,
    inputs: InputArity,
    parameters: Vec<ParameterInfo>,
    tags: Vec<String>,
    parallel: bool,
}

impl NodeMetadataBuilder {
    /// Create a new builder with required fields. Defaults to one input.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: Category::Custom,
            description: String::new(),
            version: "1.0.0".to_string(),
            inputs: InputArity::Fixed(1),
            parameters: Vec::new(),
            tags: Vec::new(),
            parallel: false,
        }
    }

    /// Set the category.
    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Accept exactly `count` inputs.
    pub fn inputs(mut self, count: usize) -> Self {
        self.inputs = InputArity::Fixed(count);
        self
    }

    /// Accept any number of inputs, at least `min`.
    pub fn variadic_inputs(mut self, min: usize) -> Self {
        self.inputs = InputArity::Variadic { min };
        self
    }

    /// Add a parameter.
    pub fn parameter(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.parameters.push(ParameterInfo {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add multiple tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags.extend(tags.into_iter().map(|t| t.into()));
        self
    }

    /// Mark as splitting its work across threads.
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Build the metadata.
    pub fn build(self) -> NodeMetadata {
        NodeMetadata {
            id: self.id,
            name: self.name,
            category: self.category,
            description: self.description,
            version: self.version,
            inputs: self.inputs,
            parameters: self.parameters,
            tags: self.tags,
            parallel: self.parallel,
        }
    }
}

/// Where a node is within one update cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateState {
    /// Not touched in the current cycle.
    #[default]
    Idle,
    /// Waiting for input information.
    InformationPending,
    /// Output information is up to date.
    InformationReady,
    /// Input requested regions have been set.
    RequestPropagated,
    /// Computing the output.
    Executing,
    /// Output covers the requested region.
    Executed,
}

/// The capability every pipeline stage implements.
///
/// Nodes are stored as trait objects, so the set of stages is open. A node
/// only sees its own inputs and output; walking the graph is the
/// orchestrator's job.
///
/// # Example Implementation
///
/// ```ignore
/// struct Negate;
///
/// impl ProcessObject<f32> for Negate {
///     fn metadata(&self) -> NodeMetadata {
///         NodeMetadata::builder("negate", "Negate")
///             .category(Category::Pointwise)
///             .build()
///     }
///
///     fn execute(&self, ctx: &mut ExecutionContext<'_, f32>) -> PipelineResult<()> {
///         let input = ctx.input(0)?;
///         let region = ctx.requested_region();
///         let values: Vec<f32> = RegionConstIterator::new(input, &region)?.map(|v| -v).collect();
///         ctx.output_mut().buffer_mut()?.copy_from_slice(&values);
///         Ok(())
///     }
///
///     fn as_any(&self) -> &dyn Any { self }
///     fn as_any_mut(&mut self) -> &mut dyn Any { self }
/// }
/// ```
pub trait ProcessObject<T: Pixel>: Send + Sync + 'static {
    /// Get the metadata for this filter.
    fn metadata(&self) -> NodeMetadata;

    /// Describe the output from the inputs' information.
    ///
    /// The default copies the first input's information unchanged.
    fn generate_output_information(
        &self,
        node_id: NodeId,
        inputs: &[&ImageInformation],
    ) -> PipelineResult<ImageInformation> {
        inputs
            .first()
            .map(|info| (*info).clone())
            .ok_or_else(|| GraphError::MissingInput { node_id, input: 0 }.into())
    }

    /// Regions needed from each input to produce `output_requested`.
    ///
    /// The default requests the same region from every input. The
    /// orchestrator checks every returned region against the input's
    /// largest region.
    fn generate_input_requested_region(
        &self,
        node_id: NodeId,
        output_requested: &Region,
        inputs: &[&ImageInformation],
    ) -> PipelineResult<Vec<Region>> {
        let _ = node_id;
        Ok(vec![output_requested.clone(); inputs.len()])
    }

    /// Fill the output over its requested region.
    ///
    /// The output buffer is already allocated over exactly the requested
    /// region when this is called.
    fn execute(&self, ctx: &mut ExecutionContext<'_, T>) -> PipelineResult<()>;

    /// Upcast for parameter access through the graph.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for parameter access through the graph.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
