//! Round-robin Planner
//!
//! Assigns every cataloged shard to exactly one target directory by walking
//! the canonical (filename-sorted) order and dealing shards out in a cycle:
//! `0, 1, …, N-1, 0, 1, …`.
//!
//! Properties:
//! - counts per target differ by at most one
//! - the same filename set and target count always give the same mapping
//! - discovery order does not matter, only the sorted names do
//!
//! Adding or removing a shard shifts every later shard to a different target.
//! Callers must not rely on assignments staying put across catalog changes.

use crate::catalog::{ShardCatalog, ShardFile};
use mosaic_core::Category;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, instrument};

/// Planner errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlannerError {
    #[error("No target directories for category {0}")]
    NoTargets(Category),
}

pub type Result<T> = std::result::Result<T, PlannerError>;

/// Immutable shard-to-target mapping for one category
#[derive(Debug, Clone)]
pub struct TargetAssignment {
    category: Category,
    per_target: Vec<Vec<ShardFile>>,
    index: HashMap<String, usize>,
}

impl TargetAssignment {
    pub fn category(&self) -> Category {
        self.category
    }

    /// Number of target directories
    pub fn target_count(&self) -> usize {
        self.per_target.len()
    }

    /// Shards for one target, in concatenation order
    pub fn shards_for(&self, target: usize) -> &[ShardFile] {
        self.per_target
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Target index of a shard by filename
    pub fn target_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Shard count per target
    pub fn counts(&self) -> Vec<usize> {
        self.per_target.iter().map(Vec::len).collect()
    }

    /// Total number of assigned shards
    pub fn total_shards(&self) -> usize {
        self.index.len()
    }

    /// Consume into per-target shard lists
    pub fn into_targets(self) -> Vec<Vec<ShardFile>> {
        self.per_target
    }

    /// Summary of the assignment
    pub fn summary(&self) -> String {
        format!(
            "{}: {} shards over {} targets {:?}",
            self.category,
            self.total_shards(),
            self.target_count(),
            self.counts()
        )
    }
}

/// Deal the catalog's shards over `target_count` targets
#[instrument(skip(catalog), fields(category = %catalog.category(), shards = catalog.len()))]
pub fn assign(catalog: &ShardCatalog, target_count: usize) -> Result<TargetAssignment> {
    if target_count == 0 {
        return Err(PlannerError::NoTargets(catalog.category()));
    }

    let mut per_target: Vec<Vec<ShardFile>> = vec![Vec::new(); target_count];
    let mut index = HashMap::with_capacity(catalog.len());

    for (position, shard) in catalog.shards().iter().enumerate() {
        let target = position % target_count;
        index.insert(shard.name.clone(), target);
        per_target[target].push(shard.clone());
    }

    let assignment = TargetAssignment {
        category: catalog.category(),
        per_target,
        index,
    };
    debug!(summary = %assignment.summary(), "Assigned shards");

    Ok(assignment)
}
