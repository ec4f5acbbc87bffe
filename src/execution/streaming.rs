//! Streamed processing for outputs larger than memory.
//!
//! Instead of updating a terminal node over its whole largest region at
//! once, a [`StreamingWriter`] splits that region into divisions, updates
//! the pipeline once per division and hands each finished division to an
//! [`ImageSink`]. Only one division's worth of every buffer is alive at a
//! time, and the assembled result is identical to a single-pass update.
//!
//! # Example
//!
//! ```ignore
//! let writer = StreamingWriter::new(8);
//! let mut sink = RawFileSink::<f32>::new("volume.raw");
//! let summary = writer.write(&orchestrator, &mut graph, terminal, &mut sink)?;
//! println!("peak memory: {} bytes", summary.peak_memory);
//! ```

use crate::core::error::{ExecutionError, NodeId, PipelineResult};
use crate::core::image::{compute_offset_table, Image, ImageInformation, Pixel};
use crate::core::iterator::RegionWalker;
use crate::core::region::Region;
use crate::execution::engine::UpdateOrchestrator;
use crate::graph::structure::ProcessingGraph;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

// ============================================================================
// Division planning
// ============================================================================

/// Partitions a region into contiguous slabs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamSplitter;

impl StreamSplitter {
    /// Split `region` into `count` slabs along its largest axis.
    ///
    /// The count is clamped to the extent of that axis (and to at least one),
    /// so every division holds at least one slice.
    pub fn plan(region: &Region, count: usize) -> StreamDivisions {
        Self::plan_along(region, region.largest_axis(), count)
    }

    /// Split `region` into `count` slabs along `axis`.
    pub fn plan_along(region: &Region, axis: usize, count: usize) -> StreamDivisions {
        let extent = region.size_at(axis);
        StreamDivisions {
            region: region.clone(),
            axis,
            count: count.clamp(1, extent.max(1)),
            next: 0,
        }
    }
}

/// The divisions of one plan, produced lazily in order.
///
/// Earlier divisions take the remainder when the extent does not divide
/// evenly. Cloning or calling [`StreamDivisions::restart`] replays the same
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDivisions {
    region: Region,
    axis: usize,
    count: usize,
    next: usize,
}

impl StreamDivisions {
    /// The region being partitioned.
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// The axis divisions are cut along.
    pub fn axis(&self) -> usize {
        self.axis
    }

    /// Total number of divisions in the plan.
    pub fn number_of_divisions(&self) -> usize {
        self.count
    }

    /// The `index`-th division.
    pub fn division(&self, index: usize) -> Option<Region> {
        if index >= self.count {
            return None;
        }
        let extent = self.region.size_at(self.axis);
        let base = extent / self.count;
        let remainder = extent % self.count;
        let start = index * base + index.min(remainder);
        let size = base + usize::from(index < remainder);
        Some(
            self.region
                .with_index_at(self.axis, self.region.index_at(self.axis) + start as i64)
                .with_size_at(self.axis, size),
        )
    }

    /// Go back to the first division.
    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl Iterator for StreamDivisions {
    type Item = Region;

    fn next(&mut self) -> Option<Region> {
        let division = self.division(self.next)?;
        self.next += 1;
        Some(division)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next.min(self.count);
        (remaining, Some(remaining))
    }
}

// ============================================================================
// Memory accounting
// ============================================================================

/// Memory tracker for node output buffers.
#[derive(Debug)]
pub struct MemoryTracker {
    /// Current memory usage in bytes.
    current: AtomicUsize,
    /// Peak memory usage in bytes.
    peak: AtomicUsize,
    /// Memory limit in bytes (0 = unlimited).
    limit: AtomicUsize,
}

impl MemoryTracker {
    /// Create a new memory tracker with the given limit.
    pub fn new(limit: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit),
        }
    }

    /// A tracker that only records usage.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Change the limit (0 = unlimited).
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    /// Try to allocate memory. Returns true if successful.
    pub fn try_allocate(&self, bytes: usize) -> bool {
        let limit = self.limit();
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            if limit > 0 && current + bytes > limit {
                return false;
            }
            match self.current.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(current + bytes, Ordering::SeqCst);
                    return true;
                }
                Err(c) => current = c,
            }
        }
    }

    /// Release allocated memory.
    pub fn release(&self, bytes: usize) {
        let _ = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::Relaxed, |c| Some(c.saturating_sub(bytes)));
    }

    /// Get current memory usage.
    pub fn current_usage(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Get peak memory usage.
    pub fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Start measuring the peak from the current usage.
    pub fn reset_peak(&self) {
        self.peak.store(self.current_usage(), Ordering::Relaxed);
    }

    /// Forget all usage.
    pub fn reset(&self) {
        self.current.store(0, Ordering::Relaxed);
        self.peak.store(0, Ordering::Relaxed);
    }

    /// Get remaining available memory; `usize::MAX` when unlimited.
    pub fn available(&self) -> usize {
        match self.limit() {
            0 => usize::MAX,
            limit => limit.saturating_sub(self.current_usage()),
        }
    }

    /// Get the memory limit (0 = unlimited).
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::unlimited()
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Destination for streamed divisions.
pub trait ImageSink<T: Pixel> {
    /// Prepare for an image with the given information.
    fn initialize(&mut self, information: &ImageInformation) -> PipelineResult<()>;

    /// Persist one division. `image` buffers at least `region`.
    fn write_division(&mut self, index: usize, region: &Region, image: &Image<T>) -> PipelineResult<()>;

    /// Flush and close.
    fn finalize(&mut self) -> PipelineResult<()>;
}

/// In-memory sink that assembles divisions into one image.
#[derive(Debug)]
pub struct MemoryImageSink<T: Pixel> {
    image: Option<Image<T>>,
}

impl<T: Pixel> MemoryImageSink<T> {
    /// Create a new memory sink.
    pub fn new() -> Self {
        Self { image: None }
    }

    /// The assembled image so far.
    pub fn image(&self) -> Option<&Image<T>> {
        self.image.as_ref()
    }

    /// Take the final image.
    pub fn take_image(self) -> Option<Image<T>> {
        self.image
    }
}

impl<T: Pixel> Default for MemoryImageSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pixel> ImageSink<T> for MemoryImageSink<T> {
    fn initialize(&mut self, information: &ImageInformation) -> PipelineResult<()> {
        let mut image = Image::new(information.clone());
        image.allocate(&information.largest_possible_region);
        self.image = Some(image);
        Ok(())
    }

    fn write_division(&mut self, index: usize, region: &Region, image: &Image<T>) -> PipelineResult<()> {
        let output = self.image.as_mut().ok_or_else(|| ExecutionError::Sink {
            division: index,
            error: "sink not initialized".to_string(),
        })?;
        output.paste_from(region, image, region)?;
        Ok(())
    }

    fn finalize(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}

/// Sink that writes raw pixels, row-major in native byte order, to a file.
///
/// The file is sized for the whole largest region up front; each division
/// is written at its final position, one row at a time.
#[derive(Debug)]
pub struct RawFileSink<T: Pixel> {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    layout: Option<(Region, Vec<usize>)>,
    _pixel: PhantomData<T>,
}

impl<T: Pixel> RawFileSink<T> {
    /// Create a sink writing to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            layout: None,
            _pixel: PhantomData,
        }
    }

    /// The output path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Pixel> ImageSink<T> for RawFileSink<T> {
    fn initialize(&mut self, information: &ImageInformation) -> PipelineResult<()> {
        let largest = information.largest_possible_region.clone();
        let file = File::create(&self.path)?;
        file.set_len((largest.number_of_cells() * std::mem::size_of::<T>()) as u64)?;
        log::debug!("Writing {} to {}", largest, self.path.display());

        self.file = Some(BufWriter::new(file));
        self.layout = Some((largest.clone(), compute_offset_table(largest.size())));
        Ok(())
    }

    fn write_division(&mut self, index: usize, region: &Region, image: &Image<T>) -> PipelineResult<()> {
        let Self { file, layout, .. } = self;
        let sink_error = |error: String| ExecutionError::Sink {
            division: index,
            error,
        };
        let (file, (largest, offset_table)) = match (file.as_mut(), layout.as_ref()) {
            (Some(file), Some(layout)) => (file, layout),
            _ => return Err(sink_error("sink not initialized".to_string()).into()),
        };
        if region.is_empty() {
            return Ok(());
        }

        let pixels = image.copy_region(region)?;
        let row_starts = RegionWalker::new(largest, offset_table, &region.with_size_at(0, 1))?;
        for (offset, row) in row_starts.zip(pixels.chunks(region.size_at(0))) {
            file.seek(SeekFrom::Start((offset * std::mem::size_of::<T>()) as u64))
                .map_err(|e| sink_error(e.to_string()))?;
            file.write_all(bytemuck::cast_slice(row))
                .map_err(|e| sink_error(e.to_string()))?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> PipelineResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

// ============================================================================
// Streaming writer
// ============================================================================

/// Summary of one streamed write.
#[derive(Debug, Clone, Default)]
pub struct StreamingSummary {
    /// Divisions written.
    pub divisions: usize,
    /// Node executions across all divisions.
    pub nodes_executed: usize,
    /// Largest number of bytes held by node outputs at once.
    pub peak_memory: usize,
    /// Wall time of the whole write.
    pub duration: Duration,
}

/// Drives a terminal node division by division into a sink.
#[derive(Debug, Clone)]
pub struct StreamingWriter {
    divisions: usize,
}

impl StreamingWriter {
    /// Create a writer using `divisions` divisions.
    pub fn new(divisions: usize) -> Self {
        Self { divisions }
    }

    /// The requested number of divisions.
    pub fn divisions(&self) -> usize {
        self.divisions
    }

    /// The division plan for `terminal`'s largest region.
    pub fn plan<T: Pixel>(
        &self,
        orchestrator: &UpdateOrchestrator,
        graph: &mut ProcessingGraph<T>,
        terminal: NodeId,
    ) -> PipelineResult<StreamDivisions> {
        orchestrator.update_output_information(graph, terminal)?;
        let largest = graph.output(terminal)?.largest_possible_region().clone();
        Ok(StreamSplitter::plan(&largest, self.divisions))
    }

    /// Write `terminal`'s whole largest region into `sink`.
    ///
    /// The terminal's output is released after each division is written, and
    /// its requested region is cleared once the write finishes or fails.
    pub fn write<T: Pixel>(
        &self,
        orchestrator: &UpdateOrchestrator,
        graph: &mut ProcessingGraph<T>,
        terminal: NodeId,
        sink: &mut dyn ImageSink<T>,
    ) -> PipelineResult<StreamingSummary> {
        let started = Instant::now();
        let result = self.write_divisions(orchestrator, graph, terminal, sink);
        let cleared = graph.clear_requested_region(terminal);

        let mut summary = result?;
        cleared?;
        summary.peak_memory = graph.memory().peak_usage();
        summary.duration = started.elapsed();
        Ok(summary)
    }

    fn write_divisions<T: Pixel>(
        &self,
        orchestrator: &UpdateOrchestrator,
        graph: &mut ProcessingGraph<T>,
        terminal: NodeId,
        sink: &mut dyn ImageSink<T>,
    ) -> PipelineResult<StreamingSummary> {
        let plan = self.plan(orchestrator, graph, terminal)?;
        let total = plan.number_of_divisions();
        let information = graph.information(terminal)?.clone();

        graph.memory().reset_peak();
        sink.initialize(&information)?;
        log::info!(
            "Streaming {} in {} divisions along axis {}",
            plan.region(),
            total,
            plan.axis()
        );

        let mut summary = StreamingSummary::default();
        for (index, region) in plan.enumerate() {
            orchestrator.tracker().division_started(index, total, region.clone());
            log::debug!("Division {}/{}: {}", index + 1, total, region);

            graph.set_requested_region(terminal, region.clone())?;
            let stats = orchestrator.update(graph, terminal)?;
            sink.write_division(index, &region, graph.output(terminal)?)?;
            graph.release_output(terminal)?;

            summary.divisions += 1;
            summary.nodes_executed += stats.nodes_executed;
            orchestrator.tracker().division_completed(index, total);
        }

        sink.finalize()?;
        Ok(summary)
    }
}
