//! Pipeline configuration loaded from TOML.
//!
//! ```toml
//! divisions = 8
//! threads = 4
//! memory_limit_mb = 256
//! release_data = true
//! ```

use crate::core::error::PipelineResult;
use crate::execution::engine::ExecutionOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for a streamed pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Number of stream divisions.
    pub divisions: usize,
    /// Worker threads (0 = all available).
    pub threads: usize,
    /// Memory limit for node outputs in megabytes (0 = unlimited).
    pub memory_limit_mb: usize,
    /// Free intermediate outputs once downstream nodes have read them.
    pub release_data: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            divisions: 1,
            threads: 0,
            memory_limit_mb: 0,
            release_data: false,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> PipelineResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_toml_str(&source)
    }

    /// Execution options for the orchestrator.
    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions::new()
            .with_threads(self.threads)
            .with_memory_limit_mb(self.memory_limit_mb)
    }
}
