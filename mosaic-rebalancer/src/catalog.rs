//! Shard Catalog
//!
//! Discovers the shard files of one category across the source directories
//! and puts them in their canonical order (lexicographic by filename).
//!
//! Shards are looked up directly inside each source directory and inside its
//! immediate subdirectories, which is where the partitioner leaves them.
//! A filename seen twice is resolved in favor of the later discovery and
//! reported as a [`ShardCollision`].

use mosaic_core::Category;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Cannot read source directory {path:?}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Shard filename is not valid UTF-8: {path:?}")]
    NonUtf8Name { path: PathBuf },

    #[error("Cannot stat shard {path:?}: {source}")]
    ShardMetadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// One physical shard file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFile {
    /// Full source path
    pub path: PathBuf,
    /// Filename, also the sort key and identity of the shard
    pub name: String,
    pub category: Category,
    /// Size in bytes at discovery time
    pub size: u64,
}

/// Two source files carrying the same shard filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardCollision {
    pub name: String,
    /// The file that stays in the catalog
    pub kept: PathBuf,
    /// The file that was dropped
    pub dropped: PathBuf,
}

/// Sorted set of shards for one category
#[derive(Debug, Clone)]
pub struct ShardCatalog {
    category: Category,
    shards: Vec<ShardFile>,
    collisions: Vec<ShardCollision>,
    files_on_disk: usize,
}

impl ShardCatalog {
    /// Scan `sources` in order for shards of `category`
    #[instrument(skip(sources), fields(sources = sources.len()))]
    pub fn discover(category: Category, sources: &[PathBuf]) -> Result<Self> {
        let mut by_name: BTreeMap<String, ShardFile> = BTreeMap::new();
        let mut collisions = Vec::new();
        let mut files_on_disk = 0;

        for source in sources {
            for (path, name) in candidate_files(source, category)? {
                let size = fs::metadata(&path)
                    .map_err(|e| CatalogError::ShardMetadata {
                        path: path.clone(),
                        source: e,
                    })?
                    .len();
                files_on_disk += 1;

                let shard = ShardFile {
                    path: path.clone(),
                    name: name.clone(),
                    category,
                    size,
                };

                if let Some(previous) = by_name.insert(name.clone(), shard) {
                    warn!(
                        %category,
                        shard = %name,
                        kept = ?path,
                        dropped = ?previous.path,
                        "Duplicate shard filename across sources, keeping the last one"
                    );
                    collisions.push(ShardCollision {
                        name,
                        kept: path,
                        dropped: previous.path,
                    });
                }
            }
        }

        let shards: Vec<ShardFile> = by_name.into_values().collect();

        info!(
            %category,
            shards = shards.len(),
            files_on_disk,
            collisions = collisions.len(),
            "Cataloged shards"
        );

        Ok(Self {
            category,
            shards,
            collisions,
            files_on_disk,
        })
    }

    /// Build a catalog from already known shards (sorted and deduplicated here)
    pub fn from_shards(category: Category, shards: impl IntoIterator<Item = ShardFile>) -> Self {
        let mut by_name = BTreeMap::new();
        let mut collisions = Vec::new();
        let mut files_on_disk = 0;
        for shard in shards {
            files_on_disk += 1;
            let (name, path) = (shard.name.clone(), shard.path.clone());
            if let Some(previous) = by_name.insert(name.clone(), shard) {
                collisions.push(ShardCollision {
                    name,
                    kept: path,
                    dropped: previous.path,
                });
            }
        }
        Self {
            category,
            shards: by_name.into_values().collect(),
            collisions,
            files_on_disk,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Shards in canonical (filename) order
    pub fn shards(&self) -> &[ShardFile] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Duplicate filenames seen during discovery
    pub fn collisions(&self) -> &[ShardCollision] {
        &self.collisions
    }

    /// Number of matching files found, duplicates included
    pub fn files_on_disk(&self) -> usize {
        self.files_on_disk
    }

    /// Total bytes of the cataloged shards
    pub fn total_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.size).sum()
    }
}

/// Matching files directly in `source` and one directory level below it,
/// visited in path order, paired with their shard names.
fn candidate_files(source: &Path, category: Category) -> Result<Vec<(PathBuf, String)>> {
    let mut found = Vec::new();

    for entry in sorted_entries(source)? {
        if entry.is_dir() {
            for nested in sorted_entries(&entry)? {
                if nested.is_file() {
                    if let Some(name) = shard_name(&nested, category)? {
                        found.push((nested, name));
                    }
                }
            }
        } else if entry.is_file() {
            if let Some(name) = shard_name(&entry, category)? {
                found.push((entry, name));
            }
        }
    }

    debug!(source = ?source, %category, found = found.len(), "Scanned source directory");
    Ok(found)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let unreadable = |e| CatalogError::SourceUnreadable {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(unreadable)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(unreadable)?;
    entries.sort();
    Ok(entries)
}

/// Shard name of `path` if it belongs to `category`.
///
/// Names are the catalog key, so a candidate that is not valid UTF-8 is an
/// error rather than a lossy conversion that could merge distinct shards.
fn shard_name(path: &Path, category: Category) -> Result<Option<String>> {
    let Some(raw) = path.file_name() else {
        return Ok(None);
    };
    match raw.to_str() {
        Some(name) if category.matches(name) => Ok(Some(name.to_string())),
        Some(_) => Ok(None),
        // Prefixes are ASCII, so the lossy form matches exactly when the raw bytes do
        None if category.matches(&raw.to_string_lossy()) => Err(CatalogError::NonUtf8Name {
            path: path.to_path_buf(),
        }),
        None => Ok(None),
    }
}
