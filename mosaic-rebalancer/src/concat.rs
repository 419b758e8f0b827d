//! Aligned Concatenator
//!
//! Writes one target's shards, in order, into that target's single output
//! file. For aligned categories each shard is zero-padded to the block size
//! and a zeroed trailer is appended after the last shard; the engines later
//! overwrite the trailer with block-aligned writes.
//!
//! The output is opened in append mode for every write and is synced once
//! the target is complete. Nothing is truncated: re-running into a non-empty
//! output appends after the existing bytes.

use crate::catalog::ShardFile;
use mosaic_core::IoPolicy;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument};

/// Concatenation errors
#[derive(Error, Debug)]
pub enum ConcatError {
    #[error("Failed to read shard {path:?}: {source}")]
    ShardRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConcatError>;

/// Where one shard landed in the output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlacement {
    pub name: String,
    /// Byte offset of the shard within the output file
    pub offset: u64,
    /// Raw shard length
    pub len: u64,
    /// Length including alignment padding
    pub padded_len: u64,
}

/// Result of concatenating one target
#[derive(Debug, Clone)]
pub struct ConcatSummary {
    pub output: PathBuf,
    pub shards: Vec<ShardPlacement>,
    /// Bytes appended by this run, padding and trailer included
    pub bytes_written: u64,
    pub trailer: u64,
    pub duration: Duration,
}

/// Concatenates shards under one category's I/O policy
#[derive(Debug, Clone, Copy)]
pub struct Concatenator {
    policy: IoPolicy,
}

impl Concatenator {
    pub fn new(policy: IoPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> IoPolicy {
        self.policy
    }

    /// Append `shards` to `output` in the given order
    #[instrument(skip(self, shards), fields(shards = shards.len()))]
    pub fn concat(&self, output: &Path, shards: &[ShardFile]) -> Result<ConcatSummary> {
        let start = Instant::now();

        // Create up front so targets without shards still get their file
        let mut offset = append_to(output, &[])?;
        let base = offset;
        let mut placements = Vec::with_capacity(shards.len());

        for shard in shards {
            let mut content = fs::read(&shard.path).map_err(|e| ConcatError::ShardRead {
                path: shard.path.clone(),
                source: e,
            })?;
            let len = content.len() as u64;
            let padded_len = self.policy.padded_len(len);
            content.resize(padded_len as usize, 0);

            append_to(output, &content)?;

            placements.push(ShardPlacement {
                name: shard.name.clone(),
                offset,
                len,
                padded_len,
            });
            offset += padded_len;
        }

        let trailer = self.policy.trailer_len();
        if trailer > 0 {
            offset = append_to(output, &vec![0u8; trailer as usize])?;
        }

        sync(output)?;

        let summary = ConcatSummary {
            output: output.to_path_buf(),
            shards: placements,
            bytes_written: offset - base,
            trailer,
            duration: start.elapsed(),
        };
        debug!(
            output = ?output,
            bytes = summary.bytes_written,
            duration = ?summary.duration,
            "Target written"
        );
        Ok(summary)
    }
}

/// Append `bytes` and return the resulting file length
fn append_to(path: &Path, bytes: &[u8]) -> Result<u64> {
    let write_err = |e| ConcatError::Write {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    Ok(file.metadata().map_err(write_err)?.len())
}

fn sync(path: &Path) -> Result<()> {
    File::options()
        .append(true)
        .open(path)
        .and_then(|f| f.sync_all())
        .map_err(|e| ConcatError::Write {
            path: path.to_path_buf(),
            source: e,
        })
}
