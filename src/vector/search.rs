//! Filtered top-k query execution.
//!
//! [`planner::QueryPlanner`] validates a [`request::QueryRequest`], compiles
//! its filter once, searches every source of a snapshot and merges the
//! per-source candidates into one ranking ordered by distance, then key.

pub mod planner;
pub mod request;

pub use planner::{PlannerConfig, QueryPlanner};
pub use request::{QueryHit, QueryRequest, QueryResponse, QueryStats};
