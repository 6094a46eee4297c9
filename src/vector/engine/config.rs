//! Engine configuration.
//!
//! Every field has a default, so a JSON file only needs the values it
//! changes:
//!
//! ```
//! use quiver::vector::engine::config::EngineConfig;
//!
//! let config: EngineConfig = serde_json::from_str(r#"{"flush_max_records": 64}"#).unwrap();
//! assert_eq!(config.flush_max_records, 64);
//! assert_eq!(config.overfetch_factor, 3);
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::vector::core::metadata::MetadataLimits;
use crate::vector::search::PlannerConfig;

/// Approximate searches fetch at least this many times `k` before filtering.
pub const MIN_OVERFETCH_FACTOR: usize = 2;

/// Tunables shared by every index of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Buffered records that trigger a flush.
    pub flush_max_records: usize,

    /// Buffered bytes that trigger a flush.
    pub flush_max_bytes: usize,

    /// Segments with fewer records than this stay on flat scan.
    pub flat_threshold: usize,

    /// Multiplier on k for approximate backends; at least 2.
    pub overfetch_factor: usize,

    /// Live records sampled per segment to estimate filter selectivity.
    pub selectivity_sample: usize,

    /// Run flushes and ANN builds on worker threads. When disabled they run
    /// inline on the calling thread.
    pub background_tasks: bool,

    pub build_workers: usize,

    /// Attempts per segment before it is marked degraded.
    pub build_max_attempts: u32,

    /// Base delay between build attempts; doubled after each failure.
    pub build_backoff_ms: u64,

    /// Write built ANN structures next to their segments.
    pub persist_ann_indexes: bool,

    pub max_top_k: usize,
    pub max_batch: usize,
    pub max_dimension: usize,
    pub max_metadata_keys: usize,
    pub max_metadata_bytes: usize,
    pub max_key_bytes: usize,
    pub max_list_page: usize,

    /// Queries through the async service are abandoned after this long.
    pub query_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_max_records: 1000,
            flush_max_bytes: 8 * 1024 * 1024,
            flat_threshold: 1024,
            overfetch_factor: 3,
            selectivity_sample: 64,
            background_tasks: true,
            build_workers: num_cpus::get().clamp(1, 4),
            build_max_attempts: 3,
            build_backoff_ms: 100,
            persist_ann_indexes: true,
            max_top_k: 1000,
            max_batch: 500,
            max_dimension: 4096,
            max_metadata_keys: 50,
            max_metadata_bytes: 40 * 1024,
            max_key_bytes: 1024,
            max_list_page: 1000,
            query_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: EngineConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("flush_max_records", self.flush_max_records),
            ("flush_max_bytes", self.flush_max_bytes),
            ("build_workers", self.build_workers),
            ("max_top_k", self.max_top_k),
            ("max_batch", self.max_batch),
            ("max_dimension", self.max_dimension),
            ("max_key_bytes", self.max_key_bytes),
            ("max_list_page", self.max_list_page),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(QuiverError::invalid_config(format!("{name} must be greater than zero")));
        }
        if self.overfetch_factor < MIN_OVERFETCH_FACTOR {
            return Err(QuiverError::invalid_config(format!(
                "overfetch_factor must be at least {MIN_OVERFETCH_FACTOR}, got {}",
                self.overfetch_factor
            )));
        }
        if self.build_max_attempts == 0 {
            return Err(QuiverError::invalid_config("build_max_attempts must be greater than zero"));
        }
        Ok(())
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            overfetch_factor: self.overfetch_factor,
            selectivity_sample: self.selectivity_sample,
            max_top_k: self.max_top_k,
        }
    }

    pub fn metadata_limits(&self) -> MetadataLimits {
        MetadataLimits {
            max_keys: self.max_metadata_keys,
            max_bytes: self.max_metadata_bytes,
            max_key_bytes: self.max_key_bytes,
        }
    }

    /// Configuration that runs every flush and build on the calling thread.
    pub fn inline() -> Self {
        Self {
            background_tasks: false,
            ..Self::default()
        }
    }
}
