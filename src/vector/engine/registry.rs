//! Named logical indexes over one storage backend.
//!
//! Each index lives in its own namespace `indexes/<name>/` of the shared
//! storage and owns its buffer, manifest and segments independently. The
//! registry only maps names to [`IndexManager`] handles and shares one
//! [`BuildScheduler`] between them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{QuiverError, Result};
use crate::storage::Storage;
use crate::storage::prefixed::PrefixedStorage;
use crate::vector::core::distance::DistanceMetric;
use crate::vector::core::record::{SegmentId, VectorRecord};
use crate::vector::engine::config::EngineConfig;
use crate::vector::engine::cursor::{ListVectorsPage, ListVectorsRequest, VectorEntry};
use crate::vector::engine::scheduler::BuildScheduler;
use crate::vector::engine::{DESCRIPTOR_NAME, IndexManager, IndexStats, scheduler_for};
use crate::vector::index::config::{BackendKind, IndexDescriptor};
use crate::vector::search::{QueryRequest, QueryResponse};
use crate::vector::segment::store::CompactionOutcome;

/// Prefix under which every index namespace lives.
pub const INDEXES_PREFIX: &str = "indexes/";

/// Short description of a registered index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub backend: BackendKind,
}

#[derive(Debug)]
pub struct IndexRegistry {
    storage: Arc<dyn Storage>,
    config: EngineConfig,
    scheduler: Arc<BuildScheduler>,
    indexes: RwLock<AHashMap<String, IndexManager>>,
    name_pattern: Regex,
    version: AtomicU64,
}

impl IndexRegistry {
    /// An empty registry; existing indexes in `storage` are not loaded.
    pub fn new(storage: Arc<dyn Storage>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = Arc::new(scheduler_for(&config)?);
        let name_pattern = Regex::new(r"^[A-Za-z0-9_-]{1,255}$")
            .map_err(|e| QuiverError::internal(format!("Index name pattern: {e}")))?;
        Ok(Self {
            storage,
            config,
            scheduler,
            indexes: RwLock::new(AHashMap::new()),
            name_pattern,
            version: AtomicU64::new(0),
        })
    }

    /// Load every index found under [`INDEXES_PREFIX`].
    pub fn open(storage: Arc<dyn Storage>, config: EngineConfig) -> Result<Self> {
        let registry = Self::new(storage, config)?;
        let suffix = format!("/{DESCRIPTOR_NAME}");
        let names: Vec<String> = registry
            .storage
            .list(INDEXES_PREFIX)?
            .iter()
            .filter_map(|object| object.strip_prefix(INDEXES_PREFIX)?.strip_suffix(suffix.as_str()))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect();

        {
            let mut indexes = registry.indexes.write();
            for name in names {
                let manager = IndexManager::open(
                    name.clone(),
                    registry.namespace(&name),
                    registry.config.clone(),
                    registry.scheduler.clone(),
                )?;
                indexes.insert(name, manager);
            }
            info!("Opened {} indexes", indexes.len());
        }
        Ok(registry)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Incremented on every create and delete.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn namespace(&self, name: &str) -> Arc<dyn Storage> {
        Arc::new(PrefixedStorage::new(
            format!("{INDEXES_PREFIX}{name}/"),
            self.storage.clone(),
        ))
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if !self.name_pattern.is_match(name) {
            return Err(QuiverError::validation(format!(
                "Index name {name:?} must be 1 to 255 characters of letters, digits, '-' or '_'"
            )));
        }
        Ok(())
    }

    pub fn create_index(&self, name: &str, descriptor: IndexDescriptor) -> Result<IndexManager> {
        self.validate_name(name)?;
        let mut indexes = self.indexes.write();
        if indexes.contains_key(name) {
            return Err(QuiverError::already_exists(format!("Index {name}")));
        }
        let manager = IndexManager::create(
            name,
            descriptor,
            self.namespace(name),
            self.config.clone(),
            self.scheduler.clone(),
        )
        .map_err(|e| match e {
            QuiverError::AlreadyExists(_) => QuiverError::already_exists(format!("Index {name}")),
            other => other,
        })?;
        indexes.insert(name.to_string(), manager.clone());
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(manager)
    }

    pub fn get_index(&self, name: &str) -> Result<IndexManager> {
        self.indexes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QuiverError::not_found(format!("Index {name}")))
    }

    /// Unregister `name` and delete its objects.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        let manager = self
            .indexes
            .write()
            .remove(name)
            .ok_or_else(|| QuiverError::not_found(format!("Index {name}")))?;
        self.version.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = manager.destroy() {
            warn!("Index {name} unregistered but its objects were not all deleted: {e}");
            return Err(e);
        }
        Ok(())
    }

    /// Indexes sorted by name.
    pub fn list_indexes(&self) -> Vec<IndexSummary> {
        let mut summaries: Vec<IndexSummary> = self
            .indexes
            .read()
            .values()
            .map(|manager| {
                let descriptor = manager.descriptor();
                IndexSummary {
                    name: manager.name().to_string(),
                    dimension: descriptor.dimension,
                    metric: descriptor.metric,
                    backend: descriptor.backend_kind(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub fn put_vectors(&self, name: &str, records: Vec<VectorRecord>) -> Result<()> {
        self.get_index(name)?.put_vectors(records)
    }

    pub fn delete_vectors<S: AsRef<str>>(&self, name: &str, keys: &[S]) -> Result<usize> {
        self.get_index(name)?.delete_vectors(keys)
    }

    pub fn get_vectors<S: AsRef<str>>(
        &self,
        name: &str,
        keys: &[S],
        include_vector: bool,
        include_metadata: bool,
    ) -> Result<Vec<VectorEntry>> {
        self.get_index(name)?.get_vectors(keys, include_vector, include_metadata)
    }

    pub fn query(&self, name: &str, request: &QueryRequest) -> Result<QueryResponse> {
        self.get_index(name)?.query(request)
    }

    pub fn list_vectors(
        &self,
        name: &str,
        request: &ListVectorsRequest,
    ) -> Result<ListVectorsPage> {
        self.get_index(name)?.list_vectors(request)
    }

    pub fn flush(&self, name: &str) -> Result<Option<SegmentId>> {
        self.get_index(name)?.flush()
    }

    pub fn compact(&self, name: &str) -> Result<CompactionOutcome> {
        self.get_index(name)?.compact()
    }

    pub fn stats(&self, name: &str) -> Result<IndexStats> {
        Ok(self.get_index(name)?.stats())
    }

    /// Wait for background flushes and builds of all indexes.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        self.scheduler.wait_idle(timeout)
    }
}
