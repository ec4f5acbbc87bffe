//! Demand-driven update orchestration.
//!
//! An update of a terminal node runs in three passes over the nodes feeding
//! it:
//!
//! 1. **Information**: sources describe their largest region and geometry,
//!    and every downstream node derives its own output information.
//! 2. **Request propagation**: starting at the terminal, each node that is
//!    out of date translates its requested region into the regions it needs
//!    from its inputs.
//! 3. **Execution**: producers run before consumers, each over exactly its
//!    requested region.
//!
//! Nodes whose buffered output already covers the requested region, and
//! whose upstream has not changed since they last ran, are skipped.

use crate::core::context::ExecutionContext;
use crate::core::error::{ExecutionError, GraphResult, NodeId, PipelineResult, RegionError};
use crate::core::image::{Image, ImageInformation, Pixel};
use crate::core::node::UpdateState;
use crate::core::region::Region;
use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate, SkipReason};
use crate::graph::structure::ProcessingGraph;
use crate::graph::topology::TopologyAnalyzer;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Execution options.
#[derive(Clone, Default)]
pub struct ExecutionOptions {
    /// Threads available to nodes (0 = rayon's global pool).
    pub threads: usize,
    /// Byte limit for node output buffers (0 = unlimited).
    pub memory_limit: usize,
    /// Progress callback.
    pub progress_callback: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("threads", &self.threads)
            .field("memory_limit", &self.memory_limit)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl ExecutionOptions {
    /// Create a new options builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set memory limit in bytes.
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Set memory limit in megabytes.
    pub fn with_memory_limit_mb(mut self, mb: usize) -> Self {
        self.memory_limit = mb * 1024 * 1024;
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    /// Total execution time.
    pub total_duration: Duration,
    /// Number of nodes executed.
    pub nodes_executed: usize,
    /// Number of nodes whose output was already up to date.
    pub nodes_skipped: usize,
    /// Executed nodes, in execution order.
    pub executed: Vec<NodeId>,
    /// Peak bytes held by node outputs so far.
    pub peak_memory: usize,
}

/// Runs update cycles on a [`ProcessingGraph`].
pub struct UpdateOrchestrator {
    options: ExecutionOptions,
    tracker: ProgressTracker,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("options", &self.options)
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}

impl Default for UpdateOrchestrator {
    fn default() -> Self {
        Self::new(ExecutionOptions::default())
    }
}

impl UpdateOrchestrator {
    /// Create an orchestrator.
    ///
    /// A dedicated thread pool is built when `options.threads` is non-zero.
    pub fn new(options: ExecutionOptions) -> Self {
        let mut tracker = ProgressTracker::new();
        if let Some(callback) = &options.progress_callback {
            tracker = tracker.with_callback(callback.clone());
        }

        let pool = if options.threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(options.threads)
                .build()
                .map_err(|e| log::warn!("Falling back to the global thread pool: {}", e))
                .ok()
        } else {
            None
        };

        Self {
            options,
            tracker,
            pool,
        }
    }

    /// The options this orchestrator runs with.
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Progress reporting for updates run by this orchestrator.
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    // ========================================================================
    // Information
    // ========================================================================

    /// Bring the output information of `id` and everything upstream up to
    /// date. Nodes whose upstream has not changed keep their information.
    pub fn update_output_information<T: Pixel>(
        &self,
        graph: &mut ProcessingGraph<T>,
        id: NodeId,
    ) -> PipelineResult<()> {
        let mut visited = HashMap::new();
        self.refresh_information(graph, id, &mut visited)?;
        Ok(())
    }

    /// Returns the pipeline modification time of `id`.
    fn refresh_information<T: Pixel>(
        &self,
        graph: &mut ProcessingGraph<T>,
        id: NodeId,
        visited: &mut HashMap<NodeId, u64>,
    ) -> PipelineResult<u64> {
        if let Some(&pipeline_modified) = visited.get(&id) {
            return Ok(pipeline_modified);
        }

        let inputs = graph.input_ids(id)?;
        let node = graph.node_mut(id)?;
        node.state = UpdateState::InformationPending;
        let mut pipeline_modified = node.modified;

        for &input in &inputs {
            pipeline_modified = pipeline_modified.max(self.refresh_information(graph, input, visited)?);
        }

        let node = graph.get_node(id)?;
        let current = node.information_time > 0 && node.information_time > pipeline_modified;
        if !current {
            let infos = input_information(graph, &inputs)?;
            let refs: Vec<&ImageInformation> = infos.iter().collect();
            let information = node.filter().generate_output_information(id, &refs)?;
            log::trace!(
                "Node {} largest region is {}",
                id,
                information.largest_possible_region
            );

            let now = graph.tick();
            let node = graph.node_mut(id)?;
            node.output.set_information(information);
            node.information_time = now;
        }

        let node = graph.node_mut(id)?;
        node.pipeline_modified = pipeline_modified;
        node.state = UpdateState::InformationReady;
        visited.insert(id, pipeline_modified);
        Ok(pipeline_modified)
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Make the output of `id` hold valid pixels for its requested region.
    ///
    /// When no region was requested the largest region is produced.
    pub fn update<T: Pixel>(&self, graph: &mut ProcessingGraph<T>, id: NodeId) -> PipelineResult<ExecutionStats> {
        let start_time = Instant::now();
        let order = TopologyAnalyzer::new(graph).pipeline_order(id)?;
        let cycle = graph.next_cycle();
        graph.memory().set_limit(self.options.memory_limit);

        for &node_id in &order {
            graph.node_mut(node_id)?.state = UpdateState::Idle;
        }
        expect_readers(graph, &order, cycle)?;

        self.tracker.start(id, order.len());
        log::debug!("Update cycle {} for node {} ({} nodes)", cycle, id, order.len());

        let mut stats = ExecutionStats::default();
        if let Err(error) = self.run_cycle(graph, id, cycle, &mut stats) {
            log::error!("Update of node {} failed: {}", id, error);
            self.tracker.report_error(error.node_id(), error.to_string());
            return Err(error);
        }

        stats.total_duration = start_time.elapsed();
        stats.peak_memory = graph.memory().peak_usage();
        self.tracker.complete();
        log::debug!(
            "Update cycle {} finished: {} executed, {} skipped in {:?}",
            cycle,
            stats.nodes_executed,
            stats.nodes_skipped,
            stats.total_duration
        );
        Ok(stats)
    }

    fn run_cycle<T: Pixel>(
        &self,
        graph: &mut ProcessingGraph<T>,
        id: NodeId,
        cycle: u64,
        stats: &mut ExecutionStats,
    ) -> PipelineResult<()> {
        self.update_output_information(graph, id)?;
        graph.output(id)?.verify_requested_region()?;
        self.propagate(graph, id, cycle, stats)
    }

    /// Request propagation followed by execution, depth-first from `id`.
    fn propagate<T: Pixel>(
        &self,
        graph: &mut ProcessingGraph<T>,
        id: NodeId,
        cycle: u64,
        stats: &mut ExecutionStats,
    ) -> PipelineResult<()> {
        let node = graph.get_node(id)?;
        if !node.needs_update() {
            log::trace!("Node {} is up to date", id);
            self.tracker.node_skipped(id, SkipReason::UpToDate);
            stats.nodes_skipped += 1;
            graph.node_mut(id)?.state = UpdateState::Executed;
            // Nothing upstream will be read on behalf of this node.
            let producers: IndexSet<NodeId> = graph.connections_to(id).map(|c| c.from).collect();
            return self.release_inputs(graph, id, producers.into_iter(), cycle);
        }

        let requested = node.output().requested_region().clone();
        let inputs = graph.input_ids(id)?;
        let infos = input_information(graph, &inputs)?;
        let refs: Vec<&ImageInformation> = infos.iter().collect();
        let regions = node.filter().generate_input_requested_region(id, &requested, &refs)?;

        if regions.len() != inputs.len() {
            return Err(ExecutionError::NodeExecution {
                node_id: id,
                error: format!(
                    "produced {} input requests for {} inputs",
                    regions.len(),
                    inputs.len()
                ),
            }
            .into());
        }

        // A producer feeding several inputs is asked for the union.
        let mut per_producer: IndexMap<NodeId, Region> = IndexMap::new();
        for (input, (&producer, region)) in inputs.iter().zip(regions).enumerate() {
            let largest = &infos[input].largest_possible_region;
            if !region.is_inside(largest) {
                return Err(RegionError::InvalidRequestedRegion {
                    node_id: id,
                    input,
                    requested: region,
                    largest: largest.clone(),
                }
                .into());
            }
            match per_producer.get_mut(&producer) {
                Some(existing) => *existing = existing.bounding_union(&region),
                None => {
                    per_producer.insert(producer, region);
                }
            }
        }
        graph.node_mut(id)?.state = UpdateState::RequestPropagated;

        // Updating a producer may re-run its own producers over other
        // regions, so deeper nodes go first.
        let analyzer = TopologyAnalyzer::new(graph);
        let mut producers: Vec<(usize, NodeId)> = per_producer
            .keys()
            .map(|&producer| analyzer.node_depth(producer).map(|depth| (depth, producer)))
            .collect::<GraphResult<_>>()?;
        producers.sort_by(|a, b| b.0.cmp(&a.0));

        for &(_, producer) in &producers {
            let region = per_producer[&producer].clone();
            graph.set_requested_region(producer, region)?;
            self.propagate(graph, producer, cycle, stats)?;
        }

        self.execute_node(graph, id, &inputs, stats)?;
        self.release_inputs(graph, id, per_producer.keys().copied(), cycle)
    }

    fn execute_node<T: Pixel>(
        &self,
        graph: &mut ProcessingGraph<T>,
        id: NodeId,
        inputs: &[NodeId],
        stats: &mut ExecutionStats,
    ) -> PipelineResult<()> {
        let node = graph.node_mut(id)?;
        node.state = UpdateState::Executing;
        let name = node.display_name();
        let mut output = std::mem::take(&mut node.output);
        let region = output.requested_region().clone();

        self.tracker.node_started(id, name.clone(), region.clone());
        log::debug!("Executing {} ({}) over {}", name, id, region);

        let required = region.number_of_cells() * std::mem::size_of::<T>();
        graph.memory().release(output.byte_size());
        if !graph.memory().try_allocate(required) {
            output.release_data();
            let limit = graph.memory().limit();
            let node = graph.node_mut(id)?;
            node.output = output;
            node.state = UpdateState::Idle;
            return Err(ExecutionError::OutOfMemory { required, limit }.into());
        }
        output.allocate(&region);

        let exec_start = Instant::now();
        let result = self.run_filter(graph, id, inputs, &mut output);
        let duration = exec_start.elapsed();

        if result.is_err() {
            // A failed node never exposes partial output.
            graph.memory().release(output.byte_size());
            output.release_data();
        }

        let now = graph.tick();
        let node = graph.node_mut(id)?;
        node.output = output;
        match result {
            Ok(()) => {
                node.update_time = now;
                node.state = UpdateState::Executed;
                stats.nodes_executed += 1;
                stats.executed.push(id);
                self.tracker.node_completed(id, duration.as_millis() as u64);
                Ok(())
            }
            Err(error) => {
                node.state = UpdateState::Idle;
                Err(error)
            }
        }
    }

    fn run_filter<T: Pixel>(
        &self,
        graph: &ProcessingGraph<T>,
        id: NodeId,
        inputs: &[NodeId],
        output: &mut Image<T>,
    ) -> PipelineResult<()> {
        let images = inputs
            .iter()
            .map(|&input| graph.output(input))
            .collect::<GraphResult<Vec<_>>>()?;
        let filter = graph.get_node(id)?.filter();
        let mut ctx = ExecutionContext::new(id, images, output).with_threads(self.options.threads);

        match &self.pool {
            Some(pool) => pool.install(|| filter.execute(&mut ctx)),
            None => filter.execute(&mut ctx),
        }
    }

    /// Record that `consumer` read its producers this cycle and free the
    /// outputs nobody needs anymore.
    fn release_inputs<T: Pixel>(
        &self,
        graph: &mut ProcessingGraph<T>,
        consumer: NodeId,
        producers: impl Iterator<Item = NodeId>,
        cycle: u64,
    ) -> PipelineResult<()> {
        for producer in producers {
            let node = graph.node_mut(producer)?;
            node.output.consumers_mut().mark_read(consumer, cycle);
            if node.release_data && node.output.is_allocated() && node.output.consumers().all_read_in(cycle) {
                log::debug!("Every reader of {} in cycle {} is done, releasing", producer, cycle);
                graph.release_output(producer)?;
            }
        }
        Ok(())
    }
}

/// Arm each producer in `order` with the consumers that take part in this
/// update. Consumers outside the pipeline are never waited for.
fn expect_readers<T: Pixel>(graph: &mut ProcessingGraph<T>, order: &[NodeId], cycle: u64) -> GraphResult<()> {
    let mut readers: IndexMap<NodeId, IndexSet<NodeId>> =
        order.iter().map(|&id| (id, IndexSet::new())).collect();
    for &consumer in order {
        for connection in graph.connections_to(consumer) {
            if let Some(set) = readers.get_mut(&connection.from) {
                set.insert(consumer);
            }
        }
    }
    for (producer, set) in readers {
        graph.node_mut(producer)?.output.consumers_mut().expect_readers(cycle, set);
    }
    Ok(())
}

fn input_information<T: Pixel>(
    graph: &ProcessingGraph<T>,
    inputs: &[NodeId],
) -> GraphResult<Vec<ImageInformation>> {
    inputs
        .iter()
        .map(|&input| graph.information(input).cloned())
        .collect()
}
