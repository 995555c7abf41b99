//! RAPL power capping session over MSR devices
//!
//! A [`Raplcap`] owns one open register file per socket and the unit scale
//! factors read at initialization. Every query and update is a direct
//! register access; nothing is cached between calls. Enabling a zone and
//! setting its limits are separate read-modify-write cycles on the same
//! register, not one transaction.
//!
//! A session is not synchronized: callers sharing one across threads must
//! serialize operations on the same socket themselves.

use raplcap_raw::rapl::{msr::MSR_RAPL_POWER_UNIT, EnergyStatus};
use raplcap_raw::{MsrHandle, RegisterLayout};

use crate::config::{RaplcapConfig, ZoneSupport};
use crate::error::{RaplcapError, Result};
use crate::topology::{count_sockets, representative_cpus, SysfsTopology, TopologySource};
use crate::units::{calibrate, Units};
use crate::zone::{Limit, Zone, ZoneLimits};

pub struct Raplcap {
    sockets: u32,
    handles: Vec<MsrHandle>,
    units: Units,
    zone_support: ZoneSupport,
}

impl Raplcap {
    /// Initialize from the system topology and the environment
    pub fn init() -> Result<Self> {
        Self::with_config(RaplcapConfig::from_env())
    }

    /// Initialize using the topology under `config.sysfs_cpu_root`
    pub fn with_config(config: RaplcapConfig) -> Result<Self> {
        let topology = SysfsTopology::new(config.sysfs_cpu_root.clone());
        Self::with_topology(config, &topology)
    }

    /// Initialize from an explicit topology source
    ///
    /// Opens one register file per socket and reads the unit register from
    /// socket 0. If anything fails, every handle opened so far is closed
    /// before the triggering error is returned.
    pub fn with_topology(config: RaplcapConfig, topology: &dyn TopologySource) -> Result<Self> {
        let sockets = count_sockets(topology)?;
        let cpus = representative_cpus(topology, sockets)?;

        let mut handles = Vec::with_capacity(cpus.len());
        let units = match Self::open_and_calibrate(&config, &cpus, &mut handles) {
            Ok(units) => units.with_dram_energy_unit(config.dram_energy_unit),
            Err(e) => {
                if let Err(close_err) = close_all(&mut handles) {
                    tracing::warn!("Cleanup after failed initialization: {close_err}");
                }
                return Err(e);
            }
        };

        tracing::info!("Initialized RAPL over MSRs for {sockets} socket(s)");

        Ok(Self {
            sockets,
            handles,
            units,
            zone_support: config.zone_support,
        })
    }

    fn open_and_calibrate(
        config: &RaplcapConfig,
        cpus: &[u32],
        handles: &mut Vec<MsrHandle>,
    ) -> Result<Units> {
        for &cpu in cpus {
            let handle = MsrHandle::open_in(&config.device_root, cpu, config.read_only)?;
            tracing::info!("Opened {} for core {cpu}", handle.path().display());
            handles.push(handle);
        }
        let first = handles
            .first()
            .ok_or_else(|| RaplcapError::TopologyUnavailable("No sockets found".to_string()))?;
        calibrate(first)
    }

    /// Close every register file
    ///
    /// All handles are closed even if some fail; the first failure is
    /// returned. Afterwards every register operation fails with
    /// [`RaplcapError::NotInitialized`]. Calling it again is a no-op.
    pub fn destroy(&mut self) -> Result<()> {
        close_all(&mut self.handles)
    }

    pub fn num_sockets(&self) -> u32 {
        self.sockets
    }

    pub fn units(&self) -> &Units {
        &self.units
    }

    fn handle(&self, socket: u32) -> Result<&MsrHandle> {
        if self.handles.is_empty() {
            return Err(RaplcapError::NotInitialized);
        }
        self.handles.get(socket as usize).ok_or_else(|| {
            RaplcapError::InvalidArgument(format!(
                "Socket {socket} out of range, {} socket(s) available",
                self.sockets
            ))
        })
    }

    fn read_register(&self, socket: u32, msr: u64) -> Result<u64> {
        let handle = self.handle(socket)?;
        let value = handle.read(msr as i64)?;
        tracing::debug!(
            "MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}",
            handle.cpu(),
            msr,
            value
        );
        Ok(value)
    }

    fn write_register(&self, socket: u32, msr: u64, value: u64) -> Result<()> {
        let handle = self.handle(socket)?;
        tracing::debug!(
            "MSR write: CPU {} MSR 0x{:08x} = 0x{:016x}",
            handle.cpu(),
            msr,
            value
        );
        handle.write(msr as i64, value)?;
        Ok(())
    }

    /// Whether `zone` is supported, per the configured [`ZoneSupport`] policy
    pub fn is_zone_supported(&self, socket: u32, zone: Zone) -> Result<bool> {
        self.handle(socket)?;
        Ok(self.zone_support.is_supported(zone))
    }

    /// Whether all of the zone's constraints are enabled
    pub fn is_zone_enabled(&self, socket: u32, zone: Zone) -> Result<bool> {
        let value = self.read_register(socket, zone.power_limit_msr())?;
        Ok(zone.family().is_enabled(value))
    }

    /// Whether all of the zone's constraints are clamped
    pub fn is_zone_clamped(&self, socket: u32, zone: Zone) -> Result<bool> {
        let value = self.read_register(socket, zone.power_limit_msr())?;
        Ok(zone.family().is_clamped(value))
    }

    /// Whether the zone's power-limit register is locked until reset
    pub fn is_zone_locked(&self, socket: u32, zone: Zone) -> Result<bool> {
        let value = self.read_register(socket, zone.power_limit_msr())?;
        Ok(zone.family().is_locked(value))
    }

    /// Enable or disable every constraint of the zone, clamping included
    pub fn set_zone_enabled(&self, socket: u32, zone: Zone, enabled: bool) -> Result<()> {
        let msr = zone.power_limit_msr();
        let value = self.read_register(socket, msr)?;
        self.write_register(socket, msr, zone.family().set_enabled(value, enabled))
    }

    pub fn get_limits(&self, socket: u32, zone: Zone) -> Result<ZoneLimits> {
        let value = self.read_register(socket, zone.power_limit_msr())?;
        Ok(zone.family().decode_limits(value, &self.units))
    }

    /// Update the zone's limits
    ///
    /// `None`, or a non-positive `seconds`/`watts`, leaves the corresponding
    /// fields unchanged. `short_term` is ignored by zones without one.
    pub fn set_limits(
        &self,
        socket: u32,
        zone: Zone,
        long_term: Option<&Limit>,
        short_term: Option<&Limit>,
    ) -> Result<()> {
        let msr = zone.power_limit_msr();
        let value = self.read_register(socket, msr)?;
        let value = zone
            .family()
            .encode_limits(value, &self.units, long_term, short_term)?;
        self.write_register(socket, msr, value)
    }

    /// Current value of the zone's energy counter in Joules; wraps around
    pub fn get_energy_counter(&self, socket: u32, zone: Zone) -> Result<f64> {
        let value = self.read_register(socket, zone.energy_status_msr())?;
        let status = EnergyStatus::from_msr_value(value);
        Ok(f64::from(status.total_energy_consumed) * self.units.energy_unit_for(zone))
    }

    /// Joules at which the zone's energy counter wraps to zero
    pub fn get_energy_counter_max(&self, socket: u32, zone: Zone) -> Result<f64> {
        self.handle(socket)?;
        Ok(2f64.powi(32) * self.units.energy_unit_for(zone))
    }

    /// Watts per power-limit LSB
    pub fn power_units(&self, socket: u32, _zone: Zone) -> Result<f64> {
        self.handle(socket)?;
        Ok(self.units.power_unit)
    }

    /// Seconds per time-window LSB
    pub fn time_units(&self, socket: u32, _zone: Zone) -> Result<f64> {
        self.handle(socket)?;
        Ok(self.units.time_unit)
    }

    /// Joules per energy-counter LSB
    pub fn energy_units(&self, socket: u32, zone: Zone) -> Result<f64> {
        self.handle(socket)?;
        Ok(self.units.energy_unit_for(zone))
    }

    /// Re-read the unit register of `socket` without touching the session
    pub fn read_units(&self, socket: u32) -> Result<Units> {
        let value = self.read_register(socket, MSR_RAPL_POWER_UNIT)?;
        Ok(Units::from_msr_value(value))
    }
}

/// Socket count of a session, or probed from sysfs without one
///
/// Returns 0 if the topology cannot be determined.
pub fn get_num_sockets(session: Option<&Raplcap>) -> u32 {
    match session {
        Some(rc) => rc.num_sockets(),
        None => count_sockets(&SysfsTopology::default()).unwrap_or_else(|e| {
            tracing::warn!("Failed to get number of sockets: {e}");
            0
        }),
    }
}

/// Close and remove every handle, returning the first error
fn close_all(handles: &mut Vec<MsrHandle>) -> Result<()> {
    let mut first_err = None;
    for mut handle in handles.drain(..) {
        if let Err(e) = handle.close() {
            tracing::warn!("{e}");
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
