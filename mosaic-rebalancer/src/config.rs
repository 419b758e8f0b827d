//! Rebalancer configuration
//!
//! Loaded from a TOML file, then environment variables, then command-line
//! overrides, and validated once before any work starts. The validated
//! record is passed down explicitly; nothing below reads global state.
//!
//! ```toml
//! [layout]
//! globals_dir = "/data/globals"
//! mirror_meta = ["/nvme0/edge/meta/mic0", "/nvme1/edge/meta/mic1"]
//!
//! [layout.tile]
//! sources = ["/grc/out0/tile", "/grc/out1/tile"]
//! targets = ["/nvme0/tile/mic0", "/nvme1/tile/mic1"]
//!
//! [layout.meta]
//! sources = ["/grc/out0/meta", "/grc/out1/meta"]
//! targets = ["/nvme0/meta/mic0", "/nvme1/meta/mic1"]
//!
//! [io]
//! align = true
//!
//! [workers]
//! category_workers = 3
//!
//! [placement]
//! engines = 2
//! target = "host"
//! ```

use mosaic_core::{Category, IoPolicy, PlacementRequest, GLOBAL_STATS_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Source and target directories of one category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDirs {
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub targets: Vec<PathBuf>,
}

/// Where shards come from and where they go
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default)]
    pub tile: CategoryDirs,

    #[serde(default)]
    pub meta: CategoryDirs,

    /// Statistics shards; shares the meta directories when unset
    #[serde(default)]
    pub stat: Option<CategoryDirs>,

    /// Directory holding the global `stat.dat`
    #[serde(default)]
    pub globals_dir: Option<PathBuf>,

    /// Extra meta directories (one per meta target) that receive copies of
    /// `stat.dat` and `tile_stats.dat` after a successful run
    #[serde(default)]
    pub mirror_meta: Vec<PathBuf>,
}

/// Output layout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoSettings {
    /// Apply block alignment and trailers to tile and meta outputs
    #[serde(default = "default_align")]
    pub align: bool,

    /// Remove existing outputs in the targets before writing
    #[serde(default)]
    pub clean: bool,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            align: default_align(),
            clean: false,
        }
    }
}

fn default_align() -> bool {
    true
}

/// Worker pool sizing. Both set to 1 gives a fully sequential run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Categories processed at once
    #[serde(default = "default_category_workers")]
    pub category_workers: usize,

    /// Targets written at once per category; defaults to the target count
    #[serde(default)]
    pub target_workers: Option<usize>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            category_workers: default_category_workers(),
            target_workers: None,
        }
    }
}

fn default_category_workers() -> usize {
    Category::ALL.len()
}

/// Complete rebalancer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebalancerConfig {
    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub io: IoSettings,

    #[serde(default)]
    pub workers: WorkerSettings,

    /// Engine thread sizing used by the placement report
    #[serde(default)]
    pub placement: PlacementRequest,
}

impl RebalancerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RebalancerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `MOSAIC_*` environment variable overrides
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_parse::<usize>("MOSAIC_CATEGORY_WORKERS")? {
            self.workers.category_workers = v;
        }
        if let Some(v) = env_parse::<usize>("MOSAIC_TARGET_WORKERS")? {
            self.workers.target_workers = Some(v);
        }
        if let Some(v) = env_parse::<bool>("MOSAIC_ALIGN")? {
            self.io.align = v;
        }
        if let Ok(dir) = std::env::var("MOSAIC_GLOBALS_DIR") {
            self.layout.globals_dir = Some(PathBuf::from(dir));
        }
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for category in Category::ALL {
            let dirs = self.dirs_for(category);
            if dirs.sources.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "no source directories for {}",
                    category
                )));
            }
            if dirs.targets.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "no target directories for {}",
                    category
                )));
            }
            // Each output file must have exactly one writer
            let mut seen = HashSet::new();
            for target in &dirs.targets {
                if !seen.insert(target) {
                    return Err(ConfigError::ValidationError(format!(
                        "target directory {:?} listed twice for {}",
                        target, category
                    )));
                }
            }
        }

        if self.workers.category_workers == 0 {
            return Err(ConfigError::ValidationError(
                "category_workers must be > 0".to_string(),
            ));
        }
        if self.workers.target_workers == Some(0) {
            return Err(ConfigError::ValidationError(
                "target_workers must be > 0".to_string(),
            ));
        }

        // Engines find a tile file and its index at the same target position
        let tile_targets = self.layout.tile.targets.len();
        let meta_targets = self.layout.meta.targets.len();
        if tile_targets != meta_targets {
            return Err(ConfigError::ValidationError(format!(
                "{} tile targets but {} meta targets; tile and meta outputs must pair up",
                tile_targets, meta_targets
            )));
        }

        if !self.layout.mirror_meta.is_empty() {
            if self.layout.mirror_meta.len() != meta_targets {
                return Err(ConfigError::ValidationError(format!(
                    "mirror_meta has {} entries but there are {} meta targets",
                    self.layout.mirror_meta.len(),
                    meta_targets
                )));
            }
            let stat_targets = self.dirs_for(Category::Stat).targets.len();
            if stat_targets != meta_targets {
                return Err(ConfigError::ValidationError(format!(
                    "mirror_meta needs one stat target per meta target, got {} stat and {} meta",
                    stat_targets, meta_targets
                )));
            }
        }

        Ok(())
    }

    /// Directories of a category
    pub fn dirs_for(&self, category: Category) -> &CategoryDirs {
        match category {
            Category::Tile => &self.layout.tile,
            Category::Meta => &self.layout.meta,
            Category::Stat => self.layout.stat.as_ref().unwrap_or(&self.layout.meta),
        }
    }

    /// Effective I/O policy of a category
    pub fn io_policy(&self, category: Category) -> IoPolicy {
        category.io_policy().with_alignment_enabled(self.io.align)
    }

    /// Concurrent target writers for a category
    pub fn target_workers_for(&self, category: Category) -> usize {
        self.workers
            .target_workers
            .unwrap_or_else(|| self.dirs_for(category).targets.len())
            .max(1)
    }

    /// Path of the global statistics file, if configured
    pub fn global_stats_path(&self) -> Option<PathBuf> {
        self.layout
            .globals_dir
            .as_ref()
            .map(|dir| dir.join(GLOBAL_STATS_FILE_NAME))
    }

    /// Output file of a category in one of its targets
    pub fn output_path(&self, category: Category, target: usize) -> Option<PathBuf> {
        self.dirs_for(category)
            .targets
            .get(target)
            .map(|dir| dir.join(category.output_file_name()))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(None),
    }
}

/// Split a `:`-separated directory list, skipping empty entries
pub fn split_paths(list: &str) -> Vec<PathBuf> {
    list.split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}
