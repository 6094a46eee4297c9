//! Core data structures for vector search.
//!
//! This module contains the record model shared by every other layer:
//! records and their metadata, tombstones, and distance metrics.

pub mod distance;
pub mod metadata;
pub mod record;
