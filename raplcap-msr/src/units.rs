use raplcap_raw::rapl::{msr::MSR_RAPL_POWER_UNIT, RaplPowerUnit};
use raplcap_raw::{MsrHandle, RegisterLayout};

use crate::error::Result;
use crate::zone::Zone;

/// Scale factors from `MSR_RAPL_POWER_UNIT`
///
/// Read once per session from socket 0 and assumed identical on every
/// socket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Units {
    /// Watts per power-limit LSB
    pub power_unit: f64,
    /// Seconds per time-window LSB
    pub time_unit: f64,
    /// Joules per energy-counter LSB
    pub energy_unit: f64,
    /// Joules per DRAM energy-counter LSB
    pub dram_energy_unit: f64,
}

impl Units {
    pub fn from_msr_value(value: u64) -> Self {
        let raw = RaplPowerUnit::from_msr_value(value);
        let energy_unit = raw.energy_unit_multiplier();
        Self {
            power_unit: raw.power_unit_multiplier(),
            time_unit: raw.time_unit_multiplier(),
            energy_unit,
            dram_energy_unit: energy_unit,
        }
    }

    /// Replace the DRAM energy unit with a fixed value
    pub fn with_dram_energy_unit(mut self, joules: Option<f64>) -> Self {
        if let Some(joules) = joules {
            self.dram_energy_unit = joules;
        }
        self
    }

    pub fn energy_unit_for(&self, zone: Zone) -> f64 {
        match zone {
            Zone::Dram => self.dram_energy_unit,
            _ => self.energy_unit,
        }
    }
}

/// Read the unit register through `handle`
pub fn calibrate(handle: &MsrHandle) -> Result<Units> {
    let value = handle.read(MSR_RAPL_POWER_UNIT as i64)?;
    let units = Units::from_msr_value(value);
    tracing::debug!(
        "RAPL units from CPU {}: power={:.12} W, time={:.12} s, energy={:.12} J",
        handle.cpu(),
        units.power_unit,
        units.time_unit,
        units.energy_unit
    );
    Ok(units)
}
