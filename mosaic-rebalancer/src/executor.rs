//! Rebalance Executor
//!
//! Runs a full rebalance:
//! 1. every category (tile, meta, stat) concurrently: catalog, assign, then
//!    write all of its targets concurrently
//! 2. wait for all categories; a failing category does not stop the others
//! 3. only if everything succeeded, copy the global `stat.dat` into every
//!    meta target, then refresh the optional meta mirrors
//!
//! Concurrency is bounded by two semaphores: one across categories and one
//! per category across its targets. Each output file has exactly one writer,
//! and bytes within a file are always written in shard order.
//!
//! There is no rollback. Outputs of a failed run stay on disk and a rerun
//! appends to them, so targets must be cleared (or `clean` set) before retrying.

use crate::catalog::{CatalogError, ShardCatalog, ShardCollision, ShardFile};
use crate::concat::{ConcatError, ConcatSummary, Concatenator};
use crate::config::RebalancerConfig;
use crate::planner::{self, PlannerError, TargetAssignment};
use futures::future::join_all;
use mosaic_core::{Category, GLOBAL_STATS_FILE_NAME};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, instrument, warn};

/// Rebalance errors
#[derive(Error, Debug)]
pub enum RebalanceError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Concat(#[from] ConcatError),

    #[error("Cannot prepare target directory {path:?}: {source}")]
    TargetSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot remove previous output {path:?}: {source}")]
    Clean {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy {from:?} to {to:?}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mirror {mirror:?} has no meta or stat target at position {target}")]
    MirrorUnmatched { mirror: PathBuf, target: usize },

    #[error("Worker pool closed")]
    PoolClosed,

    #[error("Worker task panicked: {0}")]
    TaskPanicked(String),
}

pub type Result<T> = std::result::Result<T, RebalanceError>;

/// An output file that already held data when the run started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialRebalanceState {
    pub category: Category,
    pub output: PathBuf,
    pub existing_bytes: u64,
}

/// Result of writing one target
#[derive(Debug)]
pub struct TargetOutcome {
    pub target: usize,
    pub dir: PathBuf,
    /// Shards assigned to this target
    pub shards: usize,
    pub result: Result<ConcatSummary>,
}

impl TargetOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of one category pipeline
#[derive(Debug)]
pub struct CategoryOutcome {
    pub category: Category,
    /// Catalog or planning failure; no target was written
    pub error: Option<RebalanceError>,
    pub targets: Vec<TargetOutcome>,
    pub collisions: Vec<ShardCollision>,
    pub partial_state: Vec<PartialRebalanceState>,
    pub files_on_disk: usize,
    pub unique_shards: usize,
    pub duration: Duration,
}

impl CategoryOutcome {
    fn new(category: Category) -> Self {
        Self {
            category,
            error: None,
            targets: Vec::new(),
            collisions: Vec::new(),
            partial_state: Vec::new(),
            files_on_disk: 0,
            unique_shards: 0,
            duration: Duration::ZERO,
        }
    }

    fn failed(category: Category, error: RebalanceError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(category)
        }
    }

    /// Every target of the category was written
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.targets.iter().all(TargetOutcome::succeeded)
    }

    pub fn failed_targets(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.targets.iter().filter(|t| !t.succeeded())
    }

    /// Shards written into the outputs of this category
    pub fn shards_written(&self) -> usize {
        self.targets
            .iter()
            .filter_map(|t| t.result.as_ref().ok())
            .map(|s| s.shards.len())
            .sum()
    }

    pub fn bytes_written(&self) -> u64 {
        self.targets
            .iter()
            .filter_map(|t| t.result.as_ref().ok())
            .map(|s| s.bytes_written)
            .sum()
    }
}

/// Overall rebalance result
#[derive(Debug, Default)]
pub struct RebalanceReport {
    pub categories: Vec<CategoryOutcome>,
    /// Meta targets that received the global stats file
    pub global_stats_copied: Vec<PathBuf>,
    /// Mirror directories that were refreshed
    pub mirrored: Vec<PathBuf>,
    /// Failure of the global stats copy or mirror step
    pub finalize_error: Option<RebalanceError>,
    pub duration: Duration,
}

impl RebalanceReport {
    /// Every category, the global stats copy and the mirrors succeeded
    pub fn succeeded(&self) -> bool {
        self.categories_succeeded() && self.finalize_error.is_none()
    }

    fn categories_succeeded(&self) -> bool {
        self.categories.iter().all(CategoryOutcome::succeeded)
    }

    pub fn failed_categories(&self) -> Vec<Category> {
        self.categories
            .iter()
            .filter(|c| !c.succeeded())
            .map(|c| c.category)
            .collect()
    }

    pub fn category(&self, category: Category) -> Option<&CategoryOutcome> {
        self.categories.iter().find(|c| c.category == category)
    }

    pub fn collisions(&self) -> impl Iterator<Item = &ShardCollision> {
        self.categories.iter().flat_map(|c| c.collisions.iter())
    }

    pub fn partial_state(&self) -> impl Iterator<Item = &PartialRebalanceState> {
        self.categories.iter().flat_map(|c| c.partial_state.iter())
    }

    pub fn total_bytes(&self) -> u64 {
        self.categories.iter().map(CategoryOutcome::bytes_written).sum()
    }

    /// Summary string
    pub fn summary(&self) -> String {
        let ok = self.categories.iter().filter(|c| c.succeeded()).count();
        format!(
            "{} of {} categories succeeded, {} bytes written, {} collisions, {} pre-existing outputs in {:?}",
            ok,
            self.categories.len(),
            self.total_bytes(),
            self.collisions().count(),
            self.partial_state().count(),
            self.duration
        )
    }
}

/// Progress update for a category or target
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub category: Category,
    /// `None` for category-level events
    pub target: Option<usize>,
    pub status: ProgressStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressStatus {
    Cataloged { shards: usize },
    Running,
    Completed { bytes: u64 },
    Failed(String),
}

/// Parallel rebalance executor
pub struct Executor {
    config: Arc<RebalancerConfig>,
    /// Bounds how many categories run at once
    category_semaphore: Arc<Semaphore>,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl Executor {
    /// Create an executor for a validated configuration
    pub fn new(config: RebalancerConfig) -> Self {
        let category_semaphore = Arc::new(Semaphore::new(config.workers.category_workers.max(1)));
        Self {
            config: Arc::new(config),
            category_semaphore,
            progress_tx: None,
        }
    }

    /// Create executor with progress channel
    pub fn with_progress(config: RebalancerConfig) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(256);
        let mut executor = Self::new(config);
        executor.progress_tx = Some(tx);
        (executor, rx)
    }

    pub fn config(&self) -> &RebalancerConfig {
        &self.config
    }

    /// Run the rebalance to completion
    #[instrument(skip(self))]
    pub async fn execute(&self) -> RebalanceReport {
        let start = Instant::now();
        let mut report = RebalanceReport::default();

        info!(
            category_workers = self.config.workers.category_workers,
            align = self.config.io.align,
            clean = self.config.io.clean,
            "Starting rebalance"
        );

        let handles: Vec<_> = Category::ALL
            .iter()
            .map(|&category| {
                let executor = self.clone_for_task();
                tokio::spawn(async move {
                    let _permit = match executor.category_semaphore.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => return CategoryOutcome::failed(category, RebalanceError::PoolClosed),
                    };
                    executor.run_category(category).await
                })
            })
            .collect();

        for (category, joined) in Category::ALL.iter().zip(join_all(handles).await) {
            match joined {
                Ok(outcome) => report.categories.push(outcome),
                Err(e) => {
                    error!(%category, error = %e, "Category task panicked");
                    report.categories.push(CategoryOutcome::failed(
                        *category,
                        RebalanceError::TaskPanicked(e.to_string()),
                    ));
                }
            }
        }

        if report.categories_succeeded() {
            let config = self.config.clone();
            let finalized = tokio::task::spawn_blocking(move || finalize(&config)).await;
            match finalized {
                Ok(Ok((copied, mirrored))) => {
                    report.global_stats_copied = copied;
                    report.mirrored = mirrored;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Finalizing rebalance failed");
                    report.finalize_error = Some(e);
                }
                Err(e) => report.finalize_error = Some(RebalanceError::TaskPanicked(e.to_string())),
            }
        } else {
            warn!(
                failed = ?report.failed_categories(),
                "Skipping global stats copy because categories failed"
            );
        }

        report.duration = start.elapsed();
        info!(summary = %report.summary(), "Rebalance complete");
        report
    }

    /// Catalog, assign and write one category
    #[instrument(skip(self))]
    async fn run_category(&self, category: Category) -> CategoryOutcome {
        let start = Instant::now();
        let config = self.config.clone();

        let prepared = tokio::task::spawn_blocking(move || prepare_category(&config, category))
            .await
            .unwrap_or_else(|e| Err(RebalanceError::TaskPanicked(e.to_string())));

        let (partial_state, catalog, assignment) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(%category, error = %e, "Category pipeline failed before writing");
                self.report_progress(category, None, ProgressStatus::Failed(e.to_string()))
                    .await;
                let mut outcome = CategoryOutcome::failed(category, e);
                outcome.duration = start.elapsed();
                return outcome;
            }
        };

        let mut outcome = CategoryOutcome::new(category);
        outcome.partial_state = partial_state;
        outcome.collisions = catalog.collisions().to_vec();
        outcome.files_on_disk = catalog.files_on_disk();
        outcome.unique_shards = catalog.len();

        self.report_progress(
            category,
            None,
            ProgressStatus::Cataloged {
                shards: catalog.len(),
            },
        )
        .await;

        outcome.targets = self.write_targets(category, assignment).await;
        outcome.duration = start.elapsed();

        info!(
            %category,
            shards = outcome.unique_shards,
            written = outcome.shards_written(),
            bytes = outcome.bytes_written(),
            failed_targets = outcome.failed_targets().count(),
            duration = ?outcome.duration,
            "Category finished"
        );
        outcome
    }

    /// Fan the assignment out over the category's targets
    async fn write_targets(
        &self,
        category: Category,
        assignment: TargetAssignment,
    ) -> Vec<TargetOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.target_workers_for(category)));
        let concatenator = Concatenator::new(self.config.io_policy(category));
        let dirs = self.config.dirs_for(category).targets.clone();

        let mut outcomes = Vec::with_capacity(dirs.len());
        let mut pending = Vec::with_capacity(dirs.len());

        for (target, (dir, shards)) in dirs.into_iter().zip(assignment.into_targets()).enumerate() {
            let shard_count = shards.len();
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    outcomes.push(TargetOutcome {
                        target,
                        dir,
                        shards: shard_count,
                        result: Err(RebalanceError::PoolClosed),
                    });
                    continue;
                }
            };

            self.report_progress(category, Some(target), ProgressStatus::Running)
                .await;

            let target_dir = dir.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                write_target(&target_dir, category, &shards, concatenator)
            });
            pending.push((target, dir, shard_count, handle));
        }

        for (target, dir, shard_count, handle) in pending {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(RebalanceError::TaskPanicked(e.to_string())));

            let status = match &result {
                Ok(summary) => ProgressStatus::Completed {
                    bytes: summary.bytes_written,
                },
                Err(e) => {
                    error!(%category, target, dir = ?dir, error = %e, "Target failed");
                    ProgressStatus::Failed(e.to_string())
                }
            };
            self.report_progress(category, Some(target), status).await;

            outcomes.push(TargetOutcome {
                target,
                dir,
                shards: shard_count,
                result,
            });
        }

        outcomes.sort_by_key(|t| t.target);
        outcomes
    }

    /// Report progress update
    async fn report_progress(
        &self,
        category: Category,
        target: Option<usize>,
        status: ProgressStatus,
    ) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx
                .send(ProgressUpdate {
                    category,
                    target,
                    status,
                })
                .await;
        }
    }

    /// Clone executor state for spawning task
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            category_semaphore: self.category_semaphore.clone(),
            progress_tx: self.progress_tx.clone(),
        }
    }
}

/// Clean or inspect existing outputs, then catalog and assign
fn prepare_category(
    config: &RebalancerConfig,
    category: Category,
) -> Result<(Vec<PartialRebalanceState>, ShardCatalog, TargetAssignment)> {
    let partial_state = inspect_targets(config, category)?;
    let dirs = config.dirs_for(category);
    let catalog = ShardCatalog::discover(category, &dirs.sources)?;
    let assignment = planner::assign(&catalog, dirs.targets.len())?;
    Ok((partial_state, catalog, assignment))
}

/// Remove previous outputs when cleaning, otherwise warn about non-empty ones
fn inspect_targets(
    config: &RebalancerConfig,
    category: Category,
) -> Result<Vec<PartialRebalanceState>> {
    let mut partial = Vec::new();

    for dir in &config.dirs_for(category).targets {
        let output = dir.join(category.output_file_name());

        if config.io.clean {
            remove_if_exists(&output)?;
            if category == Category::Meta {
                remove_if_exists(&dir.join(GLOBAL_STATS_FILE_NAME))?;
            }
            continue;
        }

        if let Ok(meta) = fs::metadata(&output) {
            if meta.len() > 0 {
                warn!(
                    %category,
                    output = ?output,
                    existing_bytes = meta.len(),
                    "Output already holds data; this run will append to it. Clear the target first"
                );
                partial.push(PartialRebalanceState {
                    category,
                    output,
                    existing_bytes: meta.len(),
                });
            }
        }
    }

    Ok(partial)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RebalanceError::Clean {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn write_target(
    dir: &Path,
    category: Category,
    shards: &[ShardFile],
    concatenator: Concatenator,
) -> Result<ConcatSummary> {
    fs::create_dir_all(dir).map_err(|e| RebalanceError::TargetSetup {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let output = dir.join(category.output_file_name());
    Ok(concatenator.concat(&output, shards)?)
}

/// Copy the global stats into every meta target, then refresh mirrors
fn finalize(config: &RebalancerConfig) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let meta_targets = &config.dirs_for(Category::Meta).targets;
    let mut copied = Vec::new();

    match config.global_stats_path() {
        Some(global_stats) => {
            for dir in meta_targets {
                copy_file(&global_stats, &dir.join(GLOBAL_STATS_FILE_NAME))?;
                copied.push(dir.clone());
            }
            info!(source = ?global_stats, targets = copied.len(), "Copied global stats");
        }
        None => info!("No globals directory configured, skipping global stats copy"),
    }

    let mut mirrored = Vec::new();
    for (target, mirror) in config.layout.mirror_meta.iter().enumerate() {
        let unmatched = || RebalanceError::MirrorUnmatched {
            mirror: mirror.clone(),
            target,
        };
        let meta_dir = meta_targets.get(target).ok_or_else(unmatched)?;
        let tile_stats = config
            .output_path(Category::Stat, target)
            .ok_or_else(unmatched)?;
        if same_dir(meta_dir, mirror) {
            continue;
        }
        fs::create_dir_all(mirror).map_err(|e| RebalanceError::TargetSetup {
            path: mirror.clone(),
            source: e,
        })?;

        if config.layout.globals_dir.is_some() {
            copy_file(
                &meta_dir.join(GLOBAL_STATS_FILE_NAME),
                &mirror.join(GLOBAL_STATS_FILE_NAME),
            )?;
        }
        copy_file(
            &tile_stats,
            &mirror.join(Category::Stat.output_file_name()),
        )?;
        mirrored.push(mirror.clone());
    }
    if !mirrored.is_empty() {
        info!(mirrors = mirrored.len(), "Mirrored meta statistics");
    }

    Ok((copied, mirrored))
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map_err(|e| RebalanceError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryDirs, LayoutConfig, WorkerSettings};
    use mosaic_core::TRAILER_SIZE;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let root = tmp.path().to_path_buf();
            Self { _tmp: tmp, root }
        }

        fn shard(&self, dir: &str, name: &str, len: usize) {
            let dir = self.root.join(dir);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(name), vec![0xAB; len]).unwrap();
        }

        fn config(&self, targets: usize, workers: WorkerSettings) -> RebalancerConfig {
            let dirs = |kind: &str| CategoryDirs {
                sources: vec![self.root.join(format!("src/{}", kind))],
                targets: (0..targets)
                    .map(|i| self.root.join(format!("dst/{}{}", kind, i)))
                    .collect(),
            };
            fs::create_dir_all(self.root.join("globals")).unwrap();
            fs::write(self.root.join("globals/stat.dat"), b"global").unwrap();
            RebalancerConfig {
                layout: LayoutConfig {
                    tile: dirs("tile"),
                    meta: dirs("meta"),
                    globals_dir: Some(self.root.join("globals")),
                    ..Default::default()
                },
                workers,
                ..Default::default()
            }
        }

        fn populate(&self, shards: usize) {
            for i in 0..shards {
                self.shard("src/tile/p0", &format!("eb-{:03}", i), 100);
                self.shard("src/meta/p0", &format!("ebi-{:03}", i), 16);
                self.shard("src/meta/p0", &format!("ebs-{:03}", i), 8);
            }
        }
    }

    #[tokio::test]
    async fn test_execute_writes_every_category() {
        let fx = Fixture::new();
        fx.populate(6);
        let config = fx.config(3, WorkerSettings::default());

        let report = Executor::new(config.clone()).execute().await;
        assert!(report.succeeded(), "{}", report.summary());
        assert_eq!(report.categories.len(), 3);

        for target in 0..3 {
            let tiles = config.output_path(Category::Tile, target).unwrap();
            assert_eq!(fs::metadata(tiles).unwrap().len(), 2 * 4096 + TRAILER_SIZE);
            let stats = config.output_path(Category::Stat, target).unwrap();
            assert_eq!(fs::metadata(stats).unwrap().len(), 16);
            let meta_dir = &config.layout.meta.targets[target];
            assert_eq!(fs::read(meta_dir.join("stat.dat")).unwrap(), b"global");
        }
        assert_eq!(report.global_stats_copied.len(), 3);
    }

    #[tokio::test]
    async fn test_sequential_pool_matches_parallel() {
        let fx = Fixture::new();
        fx.populate(7);
        let sequential = WorkerSettings {
            category_workers: 1,
            target_workers: Some(1),
        };
        let config = fx.config(2, sequential);
        let report = Executor::new(config.clone()).execute().await;
        assert!(report.succeeded());

        let tile = report.category(Category::Tile).unwrap();
        let counts: Vec<_> = tile.targets.iter().map(|t| t.shards).collect();
        assert_eq!(counts, vec![4, 3]);
        assert_eq!(tile.shards_written(), 7);
    }

    #[tokio::test]
    async fn test_failed_category_skips_global_stats() {
        let fx = Fixture::new();
        fx.populate(2);
        let mut config = fx.config(2, WorkerSettings::default());
        config.layout.tile.sources = vec![fx.root.join("missing")];

        let report = Executor::new(config.clone()).execute().await;
        assert!(!report.succeeded());
        assert_eq!(report.failed_categories(), vec![Category::Tile]);
        assert!(report.category(Category::Meta).unwrap().succeeded());
        assert!(report.global_stats_copied.is_empty());
        assert!(!config.layout.meta.targets[0].join("stat.dat").exists());
    }

    #[tokio::test]
    async fn test_existing_output_is_reported() {
        let fx = Fixture::new();
        fx.populate(2);
        let config = fx.config(1, WorkerSettings::default());
        let stale = config.output_path(Category::Stat, 0).unwrap();
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"stale").unwrap();

        let report = Executor::new(config.clone()).execute().await;
        let partial: Vec<_> = report.partial_state().collect();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].category, Category::Stat);
        assert_eq!(partial[0].existing_bytes, 5);
        // Appended after the stale bytes
        assert_eq!(fs::metadata(&stale).unwrap().len(), 5 + 16);

        let mut clean = config;
        clean.io.clean = true;
        let report = Executor::new(clean.clone()).execute().await;
        assert_eq!(report.partial_state().count(), 0);
        assert_eq!(fs::metadata(&stale).unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_progress_reports_each_target() {
        let fx = Fixture::new();
        fx.populate(2);
        let (executor, mut rx) = Executor::with_progress(fx.config(2, WorkerSettings::default()));
        let report = executor.execute().await;
        assert!(report.succeeded());
        drop(executor);

        let mut completed = 0;
        let mut cataloged = 0;
        while let Some(update) = rx.recv().await {
            match update.status {
                ProgressStatus::Completed { .. } => completed += 1,
                ProgressStatus::Cataloged { .. } => cataloged += 1,
                _ => {}
            }
        }
        assert_eq!(cataloged, 3);
        assert_eq!(completed, 6);
    }

    #[tokio::test]
    async fn test_mirrors_receive_statistics() {
        let fx = Fixture::new();
        fx.populate(2);
        let mut config = fx.config(2, WorkerSettings::default());
        config.layout.mirror_meta = vec![
            fx.root.join("edge/meta0"),
            // Same as meta target 1, skipped
            config.layout.meta.targets[1].clone(),
        ];

        let report = Executor::new(config.clone()).execute().await;
        assert!(report.succeeded(), "{:?}", report.finalize_error);
        assert_eq!(report.mirrored, vec![fx.root.join("edge/meta0")]);
        assert_eq!(fs::read(fx.root.join("edge/meta0/stat.dat")).unwrap(), b"global");
        assert_eq!(
            fs::metadata(fx.root.join("edge/meta0/tile_stats.dat")).unwrap().len(),
            8
        );
    }

    #[tokio::test]
    async fn test_mirror_without_stat_target_fails_finalize() {
        let fx = Fixture::new();
        fx.populate(2);
        let mut config = fx.config(2, WorkerSettings::default());
        config.layout.stat = Some(CategoryDirs {
            sources: vec![fx.root.join("src/meta")],
            targets: vec![fx.root.join("dst/stat0")],
        });
        config.layout.mirror_meta = vec![fx.root.join("edge/meta0"), fx.root.join("edge/meta1")];
        assert!(config.validate().is_err());

        let report = Executor::new(config).execute().await;
        assert!(report.failed_categories().is_empty());
        assert!(matches!(
            report.finalize_error,
            Some(RebalanceError::MirrorUnmatched { target: 1, .. })
        ));
        assert!(!report.succeeded());
        assert!(report.mirrored.is_empty());
        assert!(!fx.root.join("edge/meta1/tile_stats.dat").exists());
    }

    #[tokio::test]
    async fn test_missing_global_stats_fails_finalize() {
        let fx = Fixture::new();
        fx.populate(1);
        let mut config = fx.config(1, WorkerSettings::default());
        config.layout.globals_dir = Some(fx.root.join("nowhere"));

        let report = Executor::new(config).execute().await;
        assert!(report.failed_categories().is_empty());
        assert!(matches!(report.finalize_error, Some(RebalanceError::Copy { .. })));
        assert!(!report.succeeded());
    }
}
