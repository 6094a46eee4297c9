//! # Quiver
//!
//! A vector similarity search engine core. Records are buffered in memory,
//! sealed into immutable segments, indexed per segment by a flat, HNSW or
//! IVF-PQ structure built in the background, and served by filtered top-K
//! queries that read an atomic snapshot of the segment set.
//!
//! ```
//! use std::sync::Arc;
//!
//! use quiver::storage::memory::MemoryStorage;
//! use quiver::vector::core::distance::DistanceMetric;
//! use quiver::vector::core::record::VectorRecord;
//! use quiver::vector::engine::config::EngineConfig;
//! use quiver::vector::engine::registry::IndexRegistry;
//! use quiver::vector::filter::FilterExpr;
//! use quiver::vector::index::config::IndexDescriptor;
//! use quiver::vector::search::QueryRequest;
//!
//! # fn main() -> quiver::error::Result<()> {
//! let registry = IndexRegistry::new(Arc::new(MemoryStorage::new()), EngineConfig::inline())?;
//! registry.create_index("songs", IndexDescriptor::flat(2, DistanceMetric::Cosine))?;
//! registry.put_vectors(
//!     "songs",
//!     vec![
//!         VectorRecord::new("a", vec![1.0, 0.0]).with_field("genre", "jazz"),
//!         VectorRecord::new("b", vec![0.9, 0.1]).with_field("genre", "rock"),
//!     ],
//! )?;
//!
//! let request =
//!     QueryRequest::new(vec![1.0, 0.0], 5).with_filter(FilterExpr::equals("genre", "rock"));
//! let response = registry.query("songs", &request)?;
//! assert_eq!(response.keys(), vec!["b"]);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod error;
pub mod storage;
pub mod util;
pub mod vector;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
