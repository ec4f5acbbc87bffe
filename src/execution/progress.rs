//! Progress tracking for updates and streamed writes.

use crate::core::error::NodeId;
use crate::core::region::Region;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// An update of `terminal` has started.
    Started {
        terminal: NodeId,
        total_nodes: usize,
    },
    /// A node has started executing.
    NodeStarted {
        node_id: NodeId,
        node_name: String,
        region: Region,
    },
    /// A node has finished executing.
    NodeCompleted {
        node_id: NodeId,
        duration_ms: u64,
        index: usize,
        total: usize,
    },
    /// A node did not need to execute.
    NodeSkipped {
        node_id: NodeId,
        reason: SkipReason,
    },
    /// A stream division is about to be requested.
    DivisionStarted {
        index: usize,
        total: usize,
        region: Region,
    },
    /// A stream division has been handed to the sink.
    DivisionCompleted {
        index: usize,
        total: usize,
    },
    /// The update has completed.
    Completed {
        total_duration_ms: u64,
        nodes_processed: usize,
        nodes_skipped: usize,
    },
    /// An error occurred.
    Error {
        node_id: Option<NodeId>,
        message: String,
    },
}

/// Reason why a node was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Buffered output already covers the requested region and nothing
    /// upstream changed.
    UpToDate,
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Counts node executions within one update and forwards events to an
/// optional callback.
pub struct ProgressTracker {
    /// Number of nodes the update can touch.
    total_nodes: AtomicU64,
    /// Number of nodes executed.
    completed_nodes: AtomicU64,
    /// Number of nodes skipped.
    skipped_nodes: AtomicU64,
    /// Start time.
    start_time: parking_lot::Mutex<Option<Instant>>,
    /// Progress callback.
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self {
            total_nodes: AtomicU64::new(0),
            completed_nodes: AtomicU64::new(0),
            skipped_nodes: AtomicU64::new(0),
            start_time: parking_lot::Mutex::new(None),
            callback: None,
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Start tracking an update of `terminal` touching up to `total_nodes`.
    pub fn start(&self, terminal: NodeId, total_nodes: usize) {
        self.total_nodes.store(total_nodes as u64, Ordering::Relaxed);
        self.completed_nodes.store(0, Ordering::Relaxed);
        self.skipped_nodes.store(0, Ordering::Relaxed);
        *self.start_time.lock() = Some(Instant::now());
        self.send_update(ProgressUpdate::Started {
            terminal,
            total_nodes,
        });
    }

    /// Report that a node has started.
    pub fn node_started(&self, node_id: NodeId, node_name: String, region: Region) {
        self.send_update(ProgressUpdate::NodeStarted {
            node_id,
            node_name,
            region,
        });
    }

    /// Report that a node has completed.
    pub fn node_completed(&self, node_id: NodeId, duration_ms: u64) {
        let completed = self.completed_nodes.fetch_add(1, Ordering::Relaxed) as usize + 1;
        self.send_update(ProgressUpdate::NodeCompleted {
            node_id,
            duration_ms,
            index: completed,
            total: self.total_nodes.load(Ordering::Relaxed) as usize,
        });
    }

    /// Report that a node was skipped.
    pub fn node_skipped(&self, node_id: NodeId, reason: SkipReason) {
        self.skipped_nodes.fetch_add(1, Ordering::Relaxed);
        self.send_update(ProgressUpdate::NodeSkipped { node_id, reason });
    }

    /// Report that a stream division is starting.
    pub fn division_started(&self, index: usize, total: usize, region: Region) {
        self.send_update(ProgressUpdate::DivisionStarted { index, total, region });
    }

    /// Report that a stream division was written.
    pub fn division_completed(&self, index: usize, total: usize) {
        self.send_update(ProgressUpdate::DivisionCompleted { index, total });
    }

    /// Report an error.
    pub fn report_error(&self, node_id: Option<NodeId>, message: String) {
        self.send_update(ProgressUpdate::Error { node_id, message });
    }

    /// Complete tracking.
    pub fn complete(&self) {
        let started = *self.start_time.lock();
        let duration = started
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        self.send_update(ProgressUpdate::Completed {
            total_duration_ms: duration,
            nodes_processed: self.completed_nodes.load(Ordering::Relaxed) as usize,
            nodes_skipped: self.skipped_nodes.load(Ordering::Relaxed) as usize,
        });
    }

    /// Share of the touched nodes handled so far, as a percentage.
    pub fn progress_percent(&self) -> f32 {
        let total = self.total_nodes.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        let completed = self.completed_nodes.load(Ordering::Relaxed);
        let skipped = self.skipped_nodes.load(Ordering::Relaxed);
        ((completed + skipped) as f32 / total as f32) * 100.0
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
