//! Socket topology discovery
//!
//! RAPL registers are per package, but they are reached through the register
//! file of any logical CPU on that package. For each socket we pick the
//! smallest logical CPU id, which is usually the first one brought online.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{RaplcapError, Result};

/// Default location of the kernel's CPU topology tree
pub const DEFAULT_SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// A logical CPU and the physical socket it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuLocation {
    pub socket: u32,
    pub cpu: u32,
}

/// Something that can enumerate the logical CPUs of the system
pub trait TopologySource {
    fn cpus(&self) -> Result<Vec<CpuLocation>>;
}

/// Topology read from sysfs
#[derive(Debug, Clone)]
pub struct SysfsTopology {
    root: PathBuf,
}

impl Default for SysfsTopology {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_CPU_ROOT)
    }
}

impl SysfsTopology {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Online CPUs from `<root>/online`
    fn online_cpus(&self) -> Result<Vec<u32>> {
        let path = self.root.join("online");
        let list = std::fs::read_to_string(&path).map_err(|e| {
            RaplcapError::TopologyUnavailable(format!("Failed to read {}: {e}", path.display()))
        })?;
        parse_cpu_list(&list).ok_or_else(|| {
            RaplcapError::TopologyUnavailable(format!(
                "Malformed CPU list in {}: {:?}",
                path.display(),
                list.trim()
            ))
        })
    }

    fn package_id(&self, cpu: u32) -> Result<u32> {
        let path = self
            .root
            .join(format!("cpu{cpu}"))
            .join("topology")
            .join("physical_package_id");
        let id = std::fs::read_to_string(&path).map_err(|e| {
            RaplcapError::TopologyUnavailable(format!("Failed to read {}: {e}", path.display()))
        })?;
        id.trim().parse::<u32>().map_err(|e| {
            RaplcapError::TopologyUnavailable(format!(
                "Failed to parse socket of CPU {cpu} from {:?}: {e}",
                id.trim()
            ))
        })
    }
}

impl TopologySource for SysfsTopology {
    fn cpus(&self) -> Result<Vec<CpuLocation>> {
        self.online_cpus()?
            .into_iter()
            .map(|cpu| {
                Ok(CpuLocation {
                    socket: self.package_id(cpu)?,
                    cpu,
                })
            })
            .collect()
    }
}

/// A caller-provided topology snapshot
#[derive(Debug, Clone, Default)]
pub struct FixedTopology(pub Vec<CpuLocation>);

impl TopologySource for FixedTopology {
    fn cpus(&self) -> Result<Vec<CpuLocation>> {
        Ok(self.0.clone())
    }
}

/// Parse a CPU list like "0-3,8-11" into CPU ids
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.parse().ok()?;
            let end: u32 = end.parse().ok()?;
            cpus.extend(start..=end);
        } else {
            cpus.push(part.parse().ok()?);
        }
    }
    Some(cpus)
}

/// Number of sockets: the highest socket id reported, plus one
pub fn count_sockets(source: &dyn TopologySource) -> Result<u32> {
    let cpus = source.cpus()?;
    let max = cpus
        .iter()
        .map(|loc| loc.socket)
        .max()
        .ok_or_else(|| RaplcapError::TopologyUnavailable("No CPUs reported".to_string()))?;
    Ok(max + 1)
}

/// One representative CPU per socket, indexed by socket
///
/// # Errors
///
/// [`RaplcapError::TopologyUnavailable`] if the source fails, reports a
/// socket `>= sockets`, or reports no CPU for some socket below `sockets`.
pub fn representative_cpus(source: &dyn TopologySource, sockets: u32) -> Result<Vec<u32>> {
    let mut smallest: BTreeMap<u32, u32> = BTreeMap::new();
    for CpuLocation { socket, cpu } in source.cpus()? {
        if socket >= sockets {
            return Err(RaplcapError::TopologyUnavailable(format!(
                "Found more sockets than expected: {} instead of {sockets}",
                socket + 1
            )));
        }
        smallest
            .entry(socket)
            .and_modify(|c| *c = (*c).min(cpu))
            .or_insert(cpu);
    }

    (0..sockets)
        .map(|socket| {
            let cpu = smallest.get(&socket).copied().ok_or_else(|| {
                RaplcapError::TopologyUnavailable(format!("No CPU found for socket {socket}"))
            })?;
            tracing::debug!("Using CPU {cpu} for socket {socket}");
            Ok(cpu)
        })
        .collect()
}
