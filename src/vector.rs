//! Vector storage and similarity search.
//!
//! Layers, from the bottom up:
//!
//! - [`core`]: records, metadata, tombstones and distance metrics.
//! - [`filter`]: metadata filter expressions compiled into predicates.
//! - [`index`]: the flat, HNSW and IVF-PQ search structures.
//! - [`segment`]: the write buffer, immutable segments, their codec and the
//!   manifest-backed store.
//! - [`search`]: per-segment query planning and result merging.
//! - [`engine`]: index lifecycle, background builds, the registry of named
//!   indexes and the async service facade.

pub mod core;
pub mod engine;
pub mod filter;
pub mod index;
pub mod search;
pub mod segment;
