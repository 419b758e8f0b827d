//! CPU topology model
//!
//! Turns the host's per-logical-processor descriptor dump into:
//! - the set of sockets
//! - physical cores per socket
//! - SMT level (hardware threads per physical core)
//! - a `(socket, core) -> [logical cpu]` sibling table
//!
//! The host topology is parsed once and shared read-only for the lifetime of
//! the process through [`TopologyModel::host`].

use crate::error::{MosaicError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Default location of the processor descriptor dump on Linux
pub const CPUINFO_PATH: &str = "/proc/cpuinfo";

const FIELD_PROCESSOR: &str = "processor";
const FIELD_CORE_ID: &str = "core id";
const FIELD_SOCKET_ID: &str = "physical id";
const FIELD_CPU_CORES: &str = "cpu cores";

static HOST_TOPOLOGY: OnceLock<TopologyModel> = OnceLock::new();

/// One raw descriptor block: field name to value
pub type CpuRecord = HashMap<String, String>;

/// Split a `/proc/cpuinfo` style dump into per-processor records.
///
/// Blocks are separated by blank lines; every `key : value` line is split at
/// the first colon and both halves trimmed.
pub fn parse_cpuinfo(text: &str) -> Vec<CpuRecord> {
    let mut records = Vec::new();
    let mut current = CpuRecord::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            current.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    if !current.is_empty() {
        records.push(current);
    }

    records
}

/// Physical core location of a logical processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CoreKey {
    pub socket: u32,
    pub core: u32,
}

/// Parsed CPU topology
#[derive(Debug, Clone, Serialize)]
pub struct TopologyModel {
    sockets: BTreeSet<u32>,
    physical_cores_per_socket: usize,
    smt_level: usize,
    logical_cpus: usize,
    #[serde(skip)]
    siblings: BTreeMap<CoreKey, Vec<u32>>,
}

impl TopologyModel {
    /// Build a topology from raw descriptor records
    pub fn from_records(records: &[CpuRecord]) -> Result<Self> {
        if records.is_empty() {
            return Err(MosaicError::MalformedTopology(
                "no processor records".to_string(),
            ));
        }

        let mut sockets = BTreeSet::new();
        let mut siblings: BTreeMap<CoreKey, Vec<u32>> = BTreeMap::new();

        for (index, record) in records.iter().enumerate() {
            let processor = numeric_field(record, index, FIELD_PROCESSOR)?;
            let core = numeric_field(record, index, FIELD_CORE_ID)?;
            let socket = numeric_field(record, index, FIELD_SOCKET_ID)?;
            // Validated on every record even though only the first is used.
            numeric_field(record, index, FIELD_CPU_CORES)?;

            sockets.insert(socket);
            siblings
                .entry(CoreKey { socket, core })
                .or_default()
                .push(processor);
        }

        let physical_cores_per_socket = numeric_field(&records[0], 0, FIELD_CPU_CORES)? as usize;
        if physical_cores_per_socket == 0 {
            return Err(MosaicError::InvalidField {
                record: 0,
                field: FIELD_CPU_CORES,
                value: "0".to_string(),
            });
        }

        let smt_level = records.len() / (sockets.len() * physical_cores_per_socket);
        if smt_level == 0 {
            return Err(MosaicError::MalformedTopology(format!(
                "{} logical processors cannot cover {} sockets x {} cores",
                records.len(),
                sockets.len(),
                physical_cores_per_socket
            )));
        }

        debug!(
            sockets = sockets.len(),
            physical_cores_per_socket,
            smt_level,
            logical_cpus = records.len(),
            "Parsed CPU topology"
        );

        Ok(Self {
            sockets,
            physical_cores_per_socket,
            smt_level,
            logical_cpus: records.len(),
            siblings,
        })
    }

    /// Parse a descriptor dump held in memory
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_records(&parse_cpuinfo(text))
    }

    /// Read and parse a descriptor dump from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Topology of the running host, parsed from [`CPUINFO_PATH`] on first use
    pub fn host() -> Result<&'static TopologyModel> {
        if let Some(model) = HOST_TOPOLOGY.get() {
            return Ok(model);
        }
        let model = Self::from_file(CPUINFO_PATH)?;
        Ok(HOST_TOPOLOGY.get_or_init(|| model))
    }

    /// Number of distinct sockets
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Socket identifiers in ascending order
    pub fn sockets(&self) -> impl Iterator<Item = u32> + '_ {
        self.sockets.iter().copied()
    }

    pub fn physical_cores_per_socket(&self) -> usize {
        self.physical_cores_per_socket
    }

    /// Hardware threads per physical core
    pub fn smt_level(&self) -> usize {
        self.smt_level
    }

    pub fn logical_cpus(&self) -> usize {
        self.logical_cpus
    }

    /// Logical processors sharing one physical core, in input order
    pub fn siblings(&self, socket: u32, core: u32) -> &[u32] {
        self.siblings
            .get(&CoreKey { socket, core })
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Logical processor id for `(socket, core, smt thread)`
    pub fn os_cpu_id(&self, socket: u32, core: u32, thread: usize) -> Option<u32> {
        self.siblings(socket, core).get(thread).copied()
    }

    /// Physical core ids present on a socket, ascending
    pub fn cores_on(&self, socket: u32) -> impl Iterator<Item = u32> + '_ {
        self.siblings
            .keys()
            .filter(move |key| key.socket == socket)
            .map(|key| key.core)
    }

    /// Render as a C header with the counts enum and the logical id table
    pub fn render_c(&self) -> String {
        self.c_header().to_string()
    }

    /// Render as a Python module with the counts and an `OS_CPU_ID` dict
    pub fn render_python(&self) -> String {
        self.python_module().to_string()
    }

    /// C header view, usable with any formatter
    pub fn c_header(&self) -> CHeader<'_> {
        CHeader(self)
    }

    /// Python module view, usable with any formatter
    pub fn python_module(&self) -> PythonModule<'_> {
        PythonModule(self)
    }

    /// Render the counts as JSON
    pub fn render_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// [`TopologyModel`] formatted as a C header
pub struct CHeader<'a>(&'a TopologyModel);

impl fmt::Display for CHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.0;
        writeln!(f, "enum {{")?;
        writeln!(f, "    NUM_SOCKET = {},", model.socket_count())?;
        writeln!(
            f,
            "    NUM_PHYSICAL_CPU_PER_SOCKET = {},",
            model.physical_cores_per_socket
        )?;
        writeln!(f, "    SMT_LEVEL = {},", model.smt_level)?;
        writeln!(f, "}};")?;
        writeln!(f)?;
        writeln!(
            f,
            "const int OS_CPU_ID[NUM_SOCKET][NUM_PHYSICAL_CPU_PER_SOCKET][SMT_LEVEL] = {{"
        )?;
        for socket in model.sockets() {
            writeln!(f, "    {{ /* socket id: {} */", socket)?;
            for core in model.cores_on(socket) {
                writeln!(f, "        {{ /* physical cpu id: {} */", core)?;
                write!(f, "          ")?;
                for id in model.siblings(socket, core) {
                    write!(f, "{}, ", id)?;
                }
                writeln!(f)?;
                writeln!(f, "        }},")?;
            }
            writeln!(f, "    }},")?;
        }
        writeln!(f, "}};")
    }
}

/// [`TopologyModel`] formatted as a Python module
pub struct PythonModule<'a>(&'a TopologyModel);

impl fmt::Display for PythonModule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.0;
        writeln!(f, "#!/usr/bin/env python3")?;
        writeln!(f)?;
        writeln!(f, "NUM_SOCKET = {}", model.socket_count())?;
        writeln!(
            f,
            "NUM_PHYSICAL_CPU_PER_SOCKET = {}",
            model.physical_cores_per_socket
        )?;
        writeln!(f, "SMT_LEVEL = {}", model.smt_level)?;
        writeln!(f)?;
        writeln!(f, "OS_CPU_ID = {{}} # socket_id, physical_cpu_id, smt_id")?;
        for socket in model.sockets() {
            for core in model.cores_on(socket) {
                for (thread, id) in model.siblings(socket, core).iter().enumerate() {
                    writeln!(f, "OS_CPU_ID[{},{},{}] = {}", socket, core, thread, id)?;
                }
            }
        }
        Ok(())
    }
}

fn numeric_field(record: &CpuRecord, index: usize, field: &'static str) -> Result<u32> {
    let raw = record.get(field).ok_or(MosaicError::MissingField {
        record: index,
        field,
    })?;
    raw.parse().map_err(|_| MosaicError::InvalidField {
        record: index,
        field,
        value: raw.clone(),
    })
}
