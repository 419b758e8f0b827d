//! Mosaic Shard Rebalancer
//!
//! Redistributes the shards produced by the graph partitioner across the
//! target directories that the edge engines read from:
//! - Catalog: discover tile, meta and statistics shards in the source dirs
//! - Planner: assign shards to targets round-robin by sorted filename
//! - Concat: write one aligned, trailer-terminated output file per target
//! - Executor: run all of it in parallel with per-category failure isolation

pub mod catalog;
pub mod concat;
pub mod config;
pub mod executor;
pub mod planner;

// Re-export main types
pub use catalog::{CatalogError, ShardCatalog, ShardCollision, ShardFile};
pub use concat::{ConcatError, ConcatSummary, Concatenator, ShardPlacement};
pub use config::{
    split_paths, CategoryDirs, ConfigError, IoSettings, LayoutConfig, RebalancerConfig,
    WorkerSettings,
};
pub use executor::{
    CategoryOutcome, Executor, PartialRebalanceState, ProgressStatus, ProgressUpdate,
    RebalanceError, RebalanceReport, TargetOutcome,
};
pub use planner::{assign, PlannerError, TargetAssignment};
