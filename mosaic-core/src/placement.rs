//! Thread placement policy
//!
//! Decides whether the edge engines should spread their worker threads over
//! SMT siblings. This is a coarse admission check: it sizes a per-socket
//! thread budget from the configured role counts and compares it against the
//! number of physical cores. It performs no pinning itself; the resulting
//! flag is handed to the engine launch configuration.

use crate::error::{MosaicError, Result};
use crate::topology::TopologyModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};

/// How fractional per-socket shares are rounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingPolicy {
    /// Drop the fractional part (3 engines on 2 sockets count as 1 per socket)
    #[default]
    Truncate,
    /// Round any fractional part up
    Ceil,
}

impl RoundingPolicy {
    /// Divide `count` evenly over `parts`
    pub fn share(&self, count: usize, parts: usize) -> usize {
        if parts == 0 {
            return 0;
        }
        match self {
            RoundingPolicy::Truncate => count / parts,
            RoundingPolicy::Ceil => count.div_ceil(parts),
        }
    }
}

impl FromStr for RoundingPolicy {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "truncate" | "floor" => Ok(RoundingPolicy::Truncate),
            "ceil" => Ok(RoundingPolicy::Ceil),
            other => Err(MosaicError::UnknownRounding(other.to_string())),
        }
    }
}

/// Where the edge engines run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentTarget {
    /// Regular host CPUs
    #[default]
    Host,
    /// Constrained co-processor card. SMT is never enabled here.
    Coprocessor,
}

/// Which fetcher implementation the engines use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherMode {
    #[default]
    Local,
    /// A shared global fetcher pool, sized once for the whole run
    Global,
}

/// Worker thread counts per role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleThreads {
    // Per engine instance
    pub index_readers: usize,
    pub tile_readers: usize,
    pub tile_processors: usize,
    pub vertex_fetchers: usize,
    pub vertex_reducers: usize,
    // Socket-wide, split evenly over all sockets
    pub global_reducers: usize,
    pub global_fetchers: usize,
}

impl Default for RoleThreads {
    fn default() -> Self {
        Self::host_defaults()
    }
}

impl RoleThreads {
    /// Role sizing for engines running on host CPUs
    pub fn host_defaults() -> Self {
        Self {
            index_readers: 1,
            tile_readers: 1,
            tile_processors: 4,
            vertex_fetchers: 2,
            vertex_reducers: 2,
            global_reducers: 2,
            global_fetchers: 8,
        }
    }

    /// Role sizing for engines running on the co-processor
    pub fn coprocessor_defaults() -> Self {
        Self {
            tile_readers: 2,
            tile_processors: 3,
            ..Self::host_defaults()
        }
    }

    /// Defaults for a deployment target
    pub fn defaults_for(target: DeploymentTarget) -> Self {
        match target {
            DeploymentTarget::Host => Self::host_defaults(),
            DeploymentTarget::Coprocessor => Self::coprocessor_defaults(),
        }
    }

    /// Threads started by every engine instance
    pub fn per_instance(&self) -> usize {
        self.index_readers
            + self.tile_readers
            + self.tile_processors
            + self.vertex_fetchers
            + self.vertex_reducers
    }
}

/// Inputs to a placement decision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementRequest {
    pub roles: RoleThreads,
    /// Number of edge-engine instances in the run
    pub engines: usize,
    pub target: DeploymentTarget,
    pub fetcher_mode: FetcherMode,
    pub rounding: RoundingPolicy,
}

impl Default for PlacementRequest {
    fn default() -> Self {
        Self {
            roles: RoleThreads::host_defaults(),
            engines: 2,
            target: DeploymentTarget::Host,
            fetcher_mode: FetcherMode::Local,
            rounding: RoundingPolicy::Truncate,
        }
    }
}

/// Outcome of the placement policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacementDecision {
    pub use_smt: bool,
    /// SMT would have been enabled but the deployment target forbids it
    pub smt_forced_off: bool,
    pub threads_per_engine: usize,
    pub engines_per_socket: usize,
    pub threads_per_socket: usize,
    pub physical_cores_per_socket: usize,
    pub sockets: usize,
}

impl PlacementDecision {
    /// The flag as the engine launcher expects it
    pub fn use_smt_flag(&self) -> u8 {
        u8::from(self.use_smt)
    }
}

impl fmt::Display for PlacementDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "use_smt={} ({} threads/socket vs {} physical cores; {} engines/socket x {} threads)",
            self.use_smt,
            self.threads_per_socket,
            self.physical_cores_per_socket,
            self.engines_per_socket,
            self.threads_per_engine
        )?;
        if self.smt_forced_off {
            write!(f, " [forced off for co-processor]")?;
        }
        Ok(())
    }
}

/// Decide SMT enablement for a request on a topology
#[instrument(skip(topology), fields(engines = request.engines, target = ?request.target))]
pub fn decide(request: &PlacementRequest, topology: &TopologyModel) -> PlacementDecision {
    let sockets = topology.socket_count();
    let rounding = request.rounding;

    let threads_per_engine = request.roles.per_instance();
    let engines_per_socket = rounding.share(request.engines, sockets);

    let mut threads_per_socket = threads_per_engine * engines_per_socket
        + rounding.share(request.roles.global_reducers, sockets);
    if request.fetcher_mode == FetcherMode::Global {
        threads_per_socket += rounding.share(request.roles.global_fetchers, sockets);
    }

    let physical_cores_per_socket = topology.physical_cores_per_socket();
    let over_budget = threads_per_socket >= physical_cores_per_socket;
    let smt_forced_off = over_budget && request.target == DeploymentTarget::Coprocessor;
    let use_smt = over_budget && !smt_forced_off;

    let decision = PlacementDecision {
        use_smt,
        smt_forced_off,
        threads_per_engine,
        engines_per_socket,
        threads_per_socket,
        physical_cores_per_socket,
        sockets,
    };
    debug!(%decision, "Placement decided");
    decision
}
