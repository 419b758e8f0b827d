//! Mosaic Rebalancer
//!
//! Commands:
//! - rebalance: redistribute partitioner shards over the engine targets
//! - topology: print the host CPU topology
//! - placement: decide whether the edge engines should use SMT siblings

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use mosaic_core::{
    decide, DeploymentTarget, FetcherMode, PlacementRequest, RoleThreads, RoundingPolicy,
    TopologyModel,
};
use mosaic_rebalancer::{split_paths, Executor, RebalanceReport, RebalancerConfig};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "mosaic-rebalancer")]
#[command(about = "Shard rebalancer and CPU placement tool for Mosaic")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Redistribute shards into the target directories
    Rebalance(RebalanceArgs),

    /// Print the CPU topology
    Topology {
        /// Processor descriptor dump to read
        #[arg(long, default_value = mosaic_core::CPUINFO_PATH)]
        cpuinfo: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "summary")]
        format: TopologyFormat,
    },

    /// Decide SMT usage for the edge engines
    Placement(PlacementArgs),
}

#[derive(clap::Args)]
struct RebalanceArgs {
    /// Configuration file
    #[arg(short, long, env = "MOSAIC_CONFIG")]
    config: Option<PathBuf>,

    /// Tile source directories, `:`-separated
    #[arg(long)]
    tile_sources: Option<String>,

    /// Tile target directories, `:`-separated
    #[arg(long)]
    tile_targets: Option<String>,

    /// Meta source directories, `:`-separated
    #[arg(long)]
    meta_sources: Option<String>,

    /// Meta target directories, `:`-separated
    #[arg(long)]
    meta_targets: Option<String>,

    /// Statistics source directories (default: meta sources)
    #[arg(long)]
    stat_sources: Option<String>,

    /// Statistics target directories (default: meta targets)
    #[arg(long)]
    stat_targets: Option<String>,

    /// Directory holding the global stat.dat
    #[arg(long)]
    globals_dir: Option<PathBuf>,

    /// Meta mirror directories, one per meta target
    #[arg(long)]
    mirror_meta: Option<String>,

    /// Write tile and meta outputs without padding or trailer
    #[arg(long)]
    no_align: bool,

    /// Categories processed at once
    #[arg(long)]
    category_workers: Option<usize>,

    /// Targets written at once per category
    #[arg(long)]
    target_workers: Option<usize>,

    /// Remove existing outputs before writing
    #[arg(long)]
    clean: bool,
}

#[derive(clap::Args)]
struct PlacementArgs {
    /// Configuration file providing the [placement] section
    #[arg(short, long, env = "MOSAIC_CONFIG")]
    config: Option<PathBuf>,

    /// Processor descriptor dump to read
    #[arg(long, default_value = mosaic_core::CPUINFO_PATH)]
    cpuinfo: PathBuf,

    /// Number of engine instances
    #[arg(long)]
    engines: Option<usize>,

    /// Engines run on the co-processor
    #[arg(long)]
    coprocessor: bool,

    /// Engines share a global fetcher pool
    #[arg(long)]
    global_fetcher: bool,

    /// Rounding of per-socket shares
    #[arg(long, value_enum)]
    rounding: Option<RoundingArg>,

    #[arg(long)]
    index_readers: Option<usize>,
    #[arg(long)]
    tile_readers: Option<usize>,
    #[arg(long)]
    tile_processors: Option<usize>,
    #[arg(long)]
    vertex_fetchers: Option<usize>,
    #[arg(long)]
    vertex_reducers: Option<usize>,
    #[arg(long)]
    global_reducers: Option<usize>,
    #[arg(long)]
    global_fetchers: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum TopologyFormat {
    Summary,
    C,
    Python,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoundingArg {
    Truncate,
    Ceil,
}

impl From<RoundingArg> for RoundingPolicy {
    fn from(arg: RoundingArg) -> Self {
        match arg {
            RoundingArg::Truncate => RoundingPolicy::Truncate,
            RoundingArg::Ceil => RoundingPolicy::Ceil,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .with_target(true)
        .init();

    match cli.command {
        Commands::Rebalance(args) => rebalance(args).await,
        Commands::Topology { cpuinfo, format } => topology(cpuinfo, format),
        Commands::Placement(args) => placement(args),
    }
}

async fn rebalance(args: RebalanceArgs) -> Result<()> {
    let config = rebalance_config(&args)?;
    config.validate().context("Invalid rebalance configuration")?;

    info!(
        tile_targets = config.layout.tile.targets.len(),
        meta_targets = config.layout.meta.targets.len(),
        category_workers = config.workers.category_workers,
        "Starting Mosaic rebalancer"
    );

    let (executor, mut progress_rx) = Executor::with_progress(config);

    // Spawn progress reporter
    let reporter = tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            info!(
                category = %update.category,
                target = ?update.target,
                status = ?update.status,
                "Rebalance progress"
            );
        }
    });

    let report = executor.execute().await;
    drop(executor);
    let _ = reporter.await;

    print_report(&report);

    if !report.succeeded() {
        let failed: Vec<String> = report
            .failed_categories()
            .iter()
            .map(ToString::to_string)
            .collect();
        match &report.finalize_error {
            Some(e) if failed.is_empty() => bail!("Rebalance failed while finalizing: {}", e),
            _ => bail!("Rebalance failed for categories: {}", failed.join(", ")),
        }
    }
    Ok(())
}

/// File, then environment, then command line
fn rebalance_config(args: &RebalanceArgs) -> Result<RebalancerConfig> {
    let mut config = match &args.config {
        Some(path) => RebalancerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => RebalancerConfig::default(),
    }
    .with_env_overrides()?;

    let layout = &mut config.layout;
    override_dirs(&mut layout.tile.sources, &args.tile_sources);
    override_dirs(&mut layout.tile.targets, &args.tile_targets);
    override_dirs(&mut layout.meta.sources, &args.meta_sources);
    override_dirs(&mut layout.meta.targets, &args.meta_targets);
    if args.stat_sources.is_some() || args.stat_targets.is_some() {
        let mut stat = layout
            .stat
            .clone()
            .unwrap_or_else(|| layout.meta.clone());
        override_dirs(&mut stat.sources, &args.stat_sources);
        override_dirs(&mut stat.targets, &args.stat_targets);
        layout.stat = Some(stat);
    }
    override_dirs(&mut layout.mirror_meta, &args.mirror_meta);
    if let Some(dir) = &args.globals_dir {
        layout.globals_dir = Some(dir.clone());
    }

    if args.no_align {
        config.io.align = false;
    }
    if args.clean {
        config.io.clean = true;
    }
    if let Some(n) = args.category_workers {
        config.workers.category_workers = n;
    }
    if let Some(n) = args.target_workers {
        config.workers.target_workers = Some(n);
    }

    Ok(config)
}

fn override_dirs(dirs: &mut Vec<PathBuf>, list: &Option<String>) {
    if let Some(list) = list {
        *dirs = split_paths(list);
    }
}

fn print_report(report: &RebalanceReport) {
    println!("\n{}", style("Rebalance Summary:").bold());

    for outcome in &report.categories {
        let mark = if outcome.succeeded() {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "  {} {:<5} {} shards, {} bytes, {:?}",
            mark,
            outcome.category,
            outcome.shards_written(),
            outcome.bytes_written(),
            outcome.duration
        );
        if let Some(e) = &outcome.error {
            println!("      {}", style(e).red());
        }
        for target in outcome.failed_targets() {
            if let Err(e) = &target.result {
                println!(
                    "      target {} ({}): {}",
                    target.target,
                    target.dir.display(),
                    style(e).red()
                );
            }
        }
    }

    for collision in report.collisions() {
        println!(
            "  {} duplicate shard {}: kept {}, dropped {}",
            style("Warning:").yellow(),
            collision.name,
            collision.kept.display(),
            collision.dropped.display()
        );
    }
    for partial in report.partial_state() {
        println!(
            "  {} {} already held {} bytes; output was appended",
            style("Warning:").yellow(),
            partial.output.display(),
            partial.existing_bytes
        );
    }
    if !report.global_stats_copied.is_empty() {
        println!(
            "  global stats copied to {} meta targets",
            report.global_stats_copied.len()
        );
    }
    if let Some(e) = &report.finalize_error {
        println!("  {}", style(e).red());
    }

    println!("  {}", style(report.summary()).dim());
}

fn topology(cpuinfo: PathBuf, format: TopologyFormat) -> Result<()> {
    let topology = load_topology(&cpuinfo)?;

    match format {
        TopologyFormat::C => print!("{}", topology.render_c()),
        TopologyFormat::Python => print!("{}", topology.render_python()),
        TopologyFormat::Json => println!("{}", topology.render_json()?),
        TopologyFormat::Summary => {
            println!("{}", style("CPU Topology").bold().underlined());
            println!("  sockets:                   {}", topology.socket_count());
            println!(
                "  physical cores per socket: {}",
                topology.physical_cores_per_socket()
            );
            println!("  SMT level:                 {}", topology.smt_level());
            println!("  logical CPUs:              {}", topology.logical_cpus());
            for socket in topology.sockets() {
                println!("  {}", style(format!("[socket {}]", socket)).cyan());
                for core in topology.cores_on(socket) {
                    println!(
                        "    core {:>3}: {:?}",
                        core,
                        topology.siblings(socket, core)
                    );
                }
            }
        }
    }
    Ok(())
}

fn placement(args: PlacementArgs) -> Result<()> {
    let topology = load_topology(&args.cpuinfo)?;
    let request = placement_request(&args)?;
    let decision = decide(&request, &topology);

    if decision.smt_forced_off {
        warn!("SMT disabled on the co-processor despite the thread budget");
    }
    println!("{}", style(&decision).dim());
    println!("use_smt={}", decision.use_smt_flag());
    Ok(())
}

fn placement_request(args: &PlacementArgs) -> Result<PlacementRequest> {
    let mut request = match &args.config {
        Some(path) => {
            RebalancerConfig::from_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?
                .placement
        }
        None => PlacementRequest::default(),
    };

    if args.coprocessor {
        request.target = DeploymentTarget::Coprocessor;
        if args.config.is_none() {
            request.roles = RoleThreads::coprocessor_defaults();
        }
    }
    if args.global_fetcher {
        request.fetcher_mode = FetcherMode::Global;
    }
    if let Some(engines) = args.engines {
        request.engines = engines;
    }
    if let Some(rounding) = args.rounding {
        request.rounding = rounding.into();
    }

    let roles = &mut request.roles;
    let overrides = [
        (&mut roles.index_readers, args.index_readers),
        (&mut roles.tile_readers, args.tile_readers),
        (&mut roles.tile_processors, args.tile_processors),
        (&mut roles.vertex_fetchers, args.vertex_fetchers),
        (&mut roles.vertex_reducers, args.vertex_reducers),
        (&mut roles.global_reducers, args.global_reducers),
        (&mut roles.global_fetchers, args.global_fetchers),
    ];
    for (slot, value) in overrides {
        if let Some(value) = value {
            *slot = value;
        }
    }

    Ok(request)
}

/// The host topology is cached; other dumps are parsed on demand
fn load_topology(path: &Path) -> Result<TopologyModel> {
    let topology = if path.as_os_str() == mosaic_core::CPUINFO_PATH {
        TopologyModel::host()?.clone()
    } else {
        TopologyModel::from_file(path)?
    };
    Ok(topology)
}
