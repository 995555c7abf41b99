use std::path::PathBuf;

use serde::Deserialize;

use crate::zone::Zone;

/// Environment variable requesting read-only device access
pub const ENV_READ_ONLY: &str = "RAPLCAP_READ_ONLY";

/// Which zones `is_zone_supported` reports as available
///
/// Package and Core are always supported. The rest cannot be probed through
/// the MSR interface, so they are a static policy the caller may override
/// (e.g. DRAM on client parts, Uncore on servers, Platform before Skylake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ZoneSupport {
    pub uncore: bool,
    pub dram: bool,
    pub platform: bool,
}

impl Default for ZoneSupport {
    fn default() -> Self {
        Self {
            uncore: true,
            dram: true,
            platform: true,
        }
    }
}

impl ZoneSupport {
    pub fn is_supported(&self, zone: Zone) -> bool {
        match zone {
            Zone::Package | Zone::Core => true,
            Zone::Uncore => self.uncore,
            Zone::Dram => self.dram,
            Zone::Platform => self.platform,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RaplcapConfig {
    /// Directory with one `<cpu>/msr_safe` / `<cpu>/msr` pair per logical CPU
    pub device_root: PathBuf,
    /// Directory with `online` and `cpu<N>/topology/`
    pub sysfs_cpu_root: PathBuf,
    /// Open devices without write access
    pub read_only: bool,
    pub zone_support: ZoneSupport,
    /// Fixed DRAM energy unit in Joules, overriding the unit register
    pub dram_energy_unit: Option<f64>,
}

impl Default for RaplcapConfig {
    fn default() -> Self {
        Self {
            device_root: PathBuf::from(raplcap_raw::msr::DEFAULT_DEVICE_ROOT),
            sysfs_cpu_root: PathBuf::from(crate::topology::DEFAULT_SYSFS_CPU_ROOT),
            read_only: false,
            zone_support: ZoneSupport::default(),
            dram_energy_unit: None,
        }
    }
}

impl RaplcapConfig {
    /// Defaults, with `read_only` taken from `RAPLCAP_READ_ONLY`
    pub fn from_env() -> Self {
        let read_only = std::env::var(ENV_READ_ONLY)
            .ok()
            .is_some_and(|v| Self::parse_flag(&v));
        if read_only {
            tracing::debug!("{ENV_READ_ONLY} set, opening MSR devices read-only");
        }

        Self {
            read_only,
            ..Self::default()
        }
    }

    /// A flag is set when it parses as a non-zero integer
    fn parse_flag(value: &str) -> bool {
        value.trim().parse::<i64>().is_ok_and(|v| v != 0)
    }

    pub fn with_device_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.device_root = root.into();
        self
    }

    pub fn with_sysfs_cpu_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_cpu_root = root.into();
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_zone_support(mut self, zone_support: ZoneSupport) -> Self {
        self.zone_support = zone_support;
        self
    }

    pub fn with_dram_energy_unit(mut self, joules: Option<f64>) -> Self {
        self.dram_energy_unit = joules;
        self
    }
}
