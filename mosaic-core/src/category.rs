//! Shard categories
//!
//! A partitioned graph is stored as three kinds of shard files. Each kind has
//! a fixed filename prefix, a fixed output filename after rebalancing, and its
//! own rules for direct-I/O alignment.

use crate::error::{MosaicError, Result};
use crate::{BLOCK_ALIGNMENT, TRAILER_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shard category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Edge tile data
    Tile,
    /// Tile index
    Meta,
    /// Per-tile statistics
    Stat,
}

impl Category {
    /// All categories, in the order the rebalancer launches them
    pub const ALL: [Category; 3] = [Category::Tile, Category::Meta, Category::Stat];

    /// Filename prefix identifying shards of this category
    pub fn prefix(&self) -> &'static str {
        match self {
            Category::Tile => "eb-",
            Category::Meta => "ebi-",
            Category::Stat => "ebs-",
        }
    }

    /// Name of the single concatenated file written per target directory
    pub fn output_file_name(&self) -> &'static str {
        match self {
            Category::Tile => "tiles.dat",
            Category::Meta => "meta.dat",
            Category::Stat => "tile_stats.dat",
        }
    }

    /// I/O policy for this category
    pub fn io_policy(&self) -> IoPolicy {
        match self {
            Category::Tile | Category::Meta => IoPolicy {
                alignment: Some(BLOCK_ALIGNMENT),
                trailer: Some(TRAILER_SIZE),
            },
            Category::Stat => IoPolicy::unaligned(),
        }
    }

    /// Whether a filename belongs to this category
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(self.prefix())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tile => "tile",
            Category::Meta => "meta",
            Category::Stat => "stat",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tile" => Ok(Category::Tile),
            "meta" => Ok(Category::Meta),
            "stat" => Ok(Category::Stat),
            other => Err(MosaicError::UnknownCategory(other.to_string())),
        }
    }
}

/// How shard bytes are laid out in a category's output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoPolicy {
    /// Each shard is zero-padded up to a multiple of this many bytes
    pub alignment: Option<u64>,
    /// Zero bytes appended after the last shard
    pub trailer: Option<u64>,
}

impl IoPolicy {
    /// Plain concatenation, no padding and no trailer
    pub fn unaligned() -> Self {
        Self {
            alignment: None,
            trailer: None,
        }
    }

    /// Policy with alignment and trailer switched off when `enabled` is false
    pub fn with_alignment_enabled(self, enabled: bool) -> Self {
        if enabled {
            self
        } else {
            Self::unaligned()
        }
    }

    /// Length of `len` bytes after padding to the alignment unit
    pub fn padded_len(&self, len: u64) -> u64 {
        match self.alignment {
            Some(unit) if unit > 0 => len.div_ceil(unit) * unit,
            _ => len,
        }
    }

    /// Number of zero bytes needed after `len` bytes of shard content
    pub fn padding_for(&self, len: u64) -> u64 {
        self.padded_len(len) - len
    }

    pub fn trailer_len(&self) -> u64 {
        self.trailer.unwrap_or(0)
    }
}
