//! End-to-end rebalance tests
//!
//! Builds a partitioner-like source tree in a temp dir, runs the executor
//! against it and checks the produced target files byte for byte.
//!
//! Run with: cargo test -p mosaic-rebalancer --test rebalance_test

use mosaic_core::{Category, BLOCK_ALIGNMENT, TRAILER_SIZE};
use mosaic_rebalancer::{
    CategoryDirs, Executor, LayoutConfig, RebalanceError, RebalancerConfig, WorkerSettings,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Shard content derived from its name so misplaced bytes are detectable
fn shard_bytes(name: &str, len: usize) -> Vec<u8> {
    let seed = name.bytes().fold(0u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

fn write_shard(dir: &Path, name: &str, len: usize) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), shard_bytes(name, len)).unwrap();
}

struct Cluster {
    _tmp: TempDir,
    root: PathBuf,
}

impl Cluster {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        fs::create_dir_all(root.join("globals")).unwrap();
        fs::write(root.join("globals/stat.dat"), b"global statistics").unwrap();
        Self { _tmp: tmp, root }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Two partitioner outputs, each with per-partition subdirectories
    fn config(&self, targets: usize) -> RebalancerConfig {
        let targets_for = |kind: &str| -> Vec<PathBuf> {
            (0..targets)
                .map(|i| self.path(&format!("nvme{}/{}", i, kind)))
                .collect()
        };
        RebalancerConfig {
            layout: LayoutConfig {
                tile: CategoryDirs {
                    sources: vec![self.path("out0/tile"), self.path("out1/tile")],
                    targets: targets_for("tile"),
                },
                meta: CategoryDirs {
                    sources: vec![self.path("out0/meta"), self.path("out1/meta")],
                    targets: targets_for("meta"),
                },
                globals_dir: Some(self.path("globals")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Tile shards of 100 bytes, meta shards of 40, stat shards of `i + 1`
    fn populate(&self, shards: usize) {
        for i in 0..shards {
            let out = if i % 2 == 0 { "out0" } else { "out1" };
            let part = format!("p{}", i % 3);
            write_shard(&self.path(&format!("{}/tile/{}", out, part)), &format!("eb-{:03}", i), 100);
            write_shard(&self.path(&format!("{}/meta/{}", out, part)), &format!("ebi-{:03}", i), 40);
            write_shard(&self.path(&format!("{}/meta/{}", out, part)), &format!("ebs-{:03}", i), i + 1);
        }
    }
}

fn read_all(paths: &[PathBuf]) -> Vec<Vec<u8>> {
    paths.iter().map(|p| fs::read(p).unwrap()).collect()
}

fn outputs(config: &RebalancerConfig) -> Vec<PathBuf> {
    Category::ALL
        .iter()
        .flat_map(|&c| {
            (0..config.dirs_for(c).targets.len()).filter_map(move |t| config.output_path(c, t))
        })
        .collect()
}

#[tokio::test]
async fn test_ten_tile_shards_over_two_targets() {
    let cluster = Cluster::new();
    cluster.populate(10);
    let config = cluster.config(2);

    let report = Executor::new(config.clone()).execute().await;
    assert!(report.succeeded(), "{}", report.summary());

    let tile = report.category(Category::Tile).unwrap();
    assert_eq!(tile.unique_shards, 10);
    for (target, outcome) in tile.targets.iter().enumerate() {
        assert_eq!(outcome.shards, 5);
        let output = config.output_path(Category::Tile, target).unwrap();
        let data = fs::read(&output).unwrap();
        assert_eq!(data.len() as u64, 5 * BLOCK_ALIGNMENT + TRAILER_SIZE);

        // Shards land in sorted order, every one at a block boundary
        for (slot, i) in (target..10).step_by(2).enumerate() {
            let name = format!("eb-{:03}", i);
            let start = slot * BLOCK_ALIGNMENT as usize;
            assert_eq!(&data[start..start + 100], &shard_bytes(&name, 100)[..]);
            assert!(data[start + 100..start + BLOCK_ALIGNMENT as usize]
                .iter()
                .all(|&b| b == 0));
        }
        assert!(data[5 * BLOCK_ALIGNMENT as usize..].iter().all(|&b| b == 0));
    }
}

#[tokio::test]
async fn test_stat_output_is_plain_concatenation() {
    let cluster = Cluster::new();
    cluster.populate(6);
    let config = cluster.config(2);

    let report = Executor::new(config.clone()).execute().await;
    assert!(report.succeeded());

    // ebs-000, 002, 004 have sizes 1, 3, 5; ebs-001, 003, 005 have 2, 4, 6
    let first = fs::read(config.output_path(Category::Stat, 0).unwrap()).unwrap();
    let second = fs::read(config.output_path(Category::Stat, 1).unwrap()).unwrap();
    assert_eq!(first.len(), 1 + 3 + 5);
    assert_eq!(second.len(), 2 + 4 + 6);
    let expected: Vec<u8> = ["ebs-000", "ebs-002", "ebs-004"]
        .iter()
        .zip([1, 3, 5])
        .flat_map(|(name, len)| shard_bytes(name, len))
        .collect();
    assert_eq!(first, expected);

    // Meta outputs are aligned and receive the global stats
    for dir in &config.layout.meta.targets {
        let meta = fs::metadata(dir.join("meta.dat")).unwrap().len();
        assert_eq!(meta, 3 * BLOCK_ALIGNMENT + TRAILER_SIZE);
        assert_eq!(fs::read(dir.join("stat.dat")).unwrap(), b"global statistics");
    }
}

#[tokio::test]
async fn test_duplicate_shard_is_reported_and_written_once() {
    let cluster = Cluster::new();
    cluster.populate(10);
    // Same filename in the second partitioner output
    write_shard(&cluster.path("out1/tile/p9"), "eb-005", 100);
    let config = cluster.config(2);

    let report = Executor::new(config.clone()).execute().await;
    assert!(report.succeeded());

    let collisions: Vec<_> = report.collisions().collect();
    assert_eq!(collisions.len(), 1);
    assert_eq!(collisions[0].name, "eb-005");
    assert_eq!(collisions[0].kept, cluster.path("out1/tile/p9/eb-005"));

    let tile = report.category(Category::Tile).unwrap();
    assert_eq!(tile.files_on_disk, 11);
    assert_eq!(tile.shards_written(), 10);
}

#[tokio::test]
async fn test_failed_category_does_not_stop_others() {
    let cluster = Cluster::new();
    cluster.populate(4);
    let config = cluster.config(2);

    // A regular file where a tile target directory should be
    fs::create_dir_all(cluster.path("nvme1")).unwrap();
    fs::write(cluster.path("nvme1/tile"), b"in the way").unwrap();

    let report = Executor::new(config.clone()).execute().await;
    assert!(!report.succeeded());
    assert_eq!(report.failed_categories(), vec![Category::Tile]);

    let tile = report.category(Category::Tile).unwrap();
    assert!(tile.targets[0].succeeded());
    assert!(matches!(
        tile.targets[1].result,
        Err(RebalanceError::TargetSetup { .. })
    ));

    // Meta and stat completed, but the global stats copy was skipped
    assert!(report.category(Category::Meta).unwrap().succeeded());
    assert!(report.category(Category::Stat).unwrap().succeeded());
    assert!(report.global_stats_copied.is_empty());
    for dir in &config.layout.meta.targets {
        assert!(dir.join("meta.dat").exists());
        assert!(!dir.join("stat.dat").exists());
    }
}

#[tokio::test]
async fn test_sequential_and_parallel_outputs_match() {
    let parallel = Cluster::new();
    parallel.populate(9);
    let parallel_config = parallel.config(3);
    assert!(Executor::new(parallel_config.clone()).execute().await.succeeded());

    let sequential = Cluster::new();
    sequential.populate(9);
    let mut sequential_config = sequential.config(3);
    sequential_config.workers = WorkerSettings {
        category_workers: 1,
        target_workers: Some(1),
    };
    assert!(Executor::new(sequential_config.clone()).execute().await.succeeded());

    assert_eq!(
        read_all(&outputs(&parallel_config)),
        read_all(&outputs(&sequential_config))
    );
}

#[tokio::test]
async fn test_unaligned_mode() {
    let cluster = Cluster::new();
    cluster.populate(4);
    let mut config = cluster.config(2);
    config.io.align = false;

    let report = Executor::new(config.clone()).execute().await;
    assert!(report.succeeded());
    for target in 0..2 {
        let tiles = config.output_path(Category::Tile, target).unwrap();
        assert_eq!(fs::metadata(tiles).unwrap().len(), 200);
        let meta = config.output_path(Category::Meta, target).unwrap();
        assert_eq!(fs::metadata(meta).unwrap().len(), 80);
    }
}

#[tokio::test]
async fn test_config_file_round_trip_through_executor() {
    let cluster = Cluster::new();
    cluster.populate(3);
    let config_path = cluster.path("rebalance.toml");
    fs::write(
        &config_path,
        format!(
            r#"
            [layout]
            globals_dir = "{root}/globals"

            [layout.tile]
            sources = ["{root}/out0/tile", "{root}/out1/tile"]
            targets = ["{root}/t/tile0"]

            [layout.meta]
            sources = ["{root}/out0/meta", "{root}/out1/meta"]
            targets = ["{root}/t/meta0"]

            [workers]
            category_workers = 2
            "#,
            root = cluster.root.display()
        ),
    )
    .unwrap();

    let config = RebalancerConfig::from_file(&config_path).unwrap();
    config.validate().unwrap();
    let report = Executor::new(config).execute().await;
    assert!(report.succeeded());
    assert_eq!(
        fs::metadata(cluster.path("t/tile0/tiles.dat")).unwrap().len(),
        3 * BLOCK_ALIGNMENT + TRAILER_SIZE
    );
    assert_eq!(
        fs::metadata(cluster.path("t/meta0/tile_stats.dat")).unwrap().len(),
        1 + 2 + 3
    );
}
