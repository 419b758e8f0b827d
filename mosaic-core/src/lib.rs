//! Mosaic Core Library
//!
//! Core abstractions shared by the Mosaic tooling.
//! This crate provides:
//! - Shard categories and their direct-I/O layout rules
//! - CPU topology parsing (sockets, physical cores, SMT siblings)
//! - The SMT placement policy for edge-engine worker pools
//! - Common error handling

pub mod category;
pub mod error;
pub mod placement;
pub mod topology;

pub use category::{Category, IoPolicy};
pub use error::{MosaicError, Result};
pub use placement::{
    decide, DeploymentTarget, FetcherMode, PlacementDecision, PlacementRequest, RoleThreads,
    RoundingPolicy,
};
pub use topology::{
    parse_cpuinfo, CHeader, CoreKey, CpuRecord, PythonModule, TopologyModel, CPUINFO_PATH,
};

/// Block size required for direct I/O on the engines' data devices
pub const BLOCK_ALIGNMENT: u64 = 4096;

/// Zero bytes reserved after the last shard of an aligned output file.
/// The engines overwrite this region with block-aligned writes.
pub const TRAILER_SIZE: u64 = 1024 * 1024; // 1 MiB

/// Name of the global statistics file copied into every meta target
pub const GLOBAL_STATS_FILE_NAME: &str = "stat.dat";
