//! RAPL (Running Average Power Limit) register definitions
//!
//! RAPL exposes a unit register shared by all power domains and, per domain,
//! a power-limit register and an energy-status counter.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Section 14.9: Platform Specific Power Management Support

use crate::bits::{bit_is_set, extract_bits, replace_bits, set_bit};
use crate::register::RegisterLayout;

/// MSR addresses for RAPL
pub mod msr {
    /// RAPL Power Unit MSR - Defines energy, power, and time units
    pub const MSR_RAPL_POWER_UNIT: u64 = 0x606;

    /// Package Power Limit - Configure package power limits
    pub const MSR_PKG_POWER_LIMIT: u64 = 0x610;

    /// Package Energy Status - Total package energy consumption
    pub const MSR_PKG_ENERGY_STATUS: u64 = 0x611;

    /// PP0 Power Limit - Core power limits
    pub const MSR_PP0_POWER_LIMIT: u64 = 0x638;

    /// PP0 Energy Status - Core energy consumption
    pub const MSR_PP0_ENERGY_STATUS: u64 = 0x639;

    /// PP1 Power Limit - Uncore (graphics) power limits on client parts
    pub const MSR_PP1_POWER_LIMIT: u64 = 0x640;

    /// PP1 Energy Status - Uncore energy consumption
    pub const MSR_PP1_ENERGY_STATUS: u64 = 0x641;

    /// DRAM Power Limit - Memory power limits
    pub const MSR_DRAM_POWER_LIMIT: u64 = 0x618;

    /// DRAM Energy Status - Memory controller energy consumption
    pub const MSR_DRAM_ENERGY_STATUS: u64 = 0x619;

    /// Platform (PSys) Power Limit - Skylake and newer
    pub const MSR_PLATFORM_POWER_LIMIT: u64 = 0x65C;

    /// Platform (PSys) Energy Counter - Skylake and newer
    pub const MSR_PLATFORM_ENERGY_COUNTER: u64 = 0x64D;
}

/// Largest encodable power limit (15 bits)
pub const POWER_LIMIT_MAX: u64 = 0x7FFF;

/// Largest encodable time-window exponent "Y" (5 bits)
pub const TIME_EXPONENT_MAX: u64 = 0x1F;

/// Largest encodable time-window fraction "Z"/"F" (2 bits)
pub const TIME_FRACTION_MAX: u64 = 0x3;

/// Lock bit of the package and platform power-limit registers
pub const PACKAGE_LOCK_BIT: u8 = 63;

/// Lock bit of the PP0, PP1 and DRAM power-limit registers
pub const PLANE_LOCK_BIT: u8 = 31;

/// Bit positions of one power-limit constraint within a power-limit register
///
/// Ranges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintFields {
    pub power: (u8, u8),
    pub enable: u8,
    pub clamp: u8,
    pub time_exponent: (u8, u8),
    pub time_fraction: (u8, u8),
}

/// Power limit #1 ("long term"), present in every power-limit register
pub const LONG_TERM: ConstraintFields = ConstraintFields {
    power: (0, 14),
    enable: 15,
    clamp: 16,
    time_exponent: (17, 21),
    time_fraction: (22, 23),
};

/// Power limit #2 ("short term"), package and platform registers only
pub const SHORT_TERM: ConstraintFields = ConstraintFields {
    power: (32, 46),
    enable: 47,
    clamp: 48,
    time_exponent: (49, 53),
    time_fraction: (54, 55),
};

/// RAPL Power Unit Register layout
///
/// Defines the units for energy, power, and time measurements.
///
/// ## Register Format
///
/// | Bits   | Field        | Description                           |
/// |--------|--------------|---------------------------------------|
/// | 0-3    | power_units  | Power units (1/2^PU watts)           |
/// | 4-7    | reserved     |                                       |
/// | 8-12   | energy_units | Energy units (1/2^ESU joules)        |
/// | 13-15  | reserved     |                                       |
/// | 16-19  | time_units   | Time units (1/2^TU seconds)          |
/// | 20-63  | reserved     |                                       |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaplPowerUnit {
    /// Power units: watts = value * (1.0 / 2^power_units)
    pub power_units: u8,

    /// Energy units: joules = value * (1.0 / 2^energy_units)
    pub energy_units: u8,

    /// Time units: seconds = value * (1.0 / 2^time_units)
    pub time_units: u8,
}

impl RegisterLayout for RaplPowerUnit {
    fn from_msr_value(value: u64) -> Self {
        Self {
            power_units: extract_bits(value, 0, 3) as u8,
            energy_units: extract_bits(value, 8, 12) as u8,
            time_units: extract_bits(value, 16, 19) as u8,
        }
    }

    fn apply_to(&self, value: u64) -> u64 {
        let value = replace_bits(value, self.power_units.into(), 0, 3);
        let value = replace_bits(value, self.energy_units.into(), 8, 12);
        replace_bits(value, self.time_units.into(), 16, 19)
    }
}

impl RaplPowerUnit {
    /// Get power unit multiplier (watts per LSB)
    pub fn power_unit_multiplier(&self) -> f64 {
        0.5f64.powi(i32::from(self.power_units))
    }

    /// Get energy unit multiplier (joules per LSB)
    pub fn energy_unit_multiplier(&self) -> f64 {
        0.5f64.powi(i32::from(self.energy_units))
    }

    /// Get time unit multiplier (seconds per LSB)
    pub fn time_unit_multiplier(&self) -> f64 {
        0.5f64.powi(i32::from(self.time_units))
    }
}

/// One power-limit constraint as raw register fields
///
/// The time window is encoded as an exponent "Y" and a two-bit fraction
/// "Z"; how they combine into seconds depends on the register family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerLimitConstraint {
    /// Power limit, in power units
    pub power_limit: u16,

    /// Enable the constraint
    pub enable: bool,

    /// Allow going below the OS-requested P/T state to honor the limit
    pub clamp: bool,

    /// Time window exponent "Y"
    pub time_exponent: u8,

    /// Time window fraction "Z"
    pub time_fraction: u8,
}

impl PowerLimitConstraint {
    /// Parse the constraint located at `fields` in `value`
    pub fn read(value: u64, fields: &ConstraintFields) -> Self {
        Self {
            power_limit: extract_bits(value, fields.power.0, fields.power.1) as u16,
            enable: bit_is_set(value, fields.enable),
            clamp: bit_is_set(value, fields.clamp),
            time_exponent: extract_bits(value, fields.time_exponent.0, fields.time_exponent.1)
                as u8,
            time_fraction: extract_bits(value, fields.time_fraction.0, fields.time_fraction.1)
                as u8,
        }
    }

    /// Write the constraint into `value` at `fields`
    pub fn apply(&self, value: u64, fields: &ConstraintFields) -> u64 {
        let value = replace_bits(value, self.power_limit.into(), fields.power.0, fields.power.1);
        let value = set_bit(value, fields.enable, self.enable);
        let value = set_bit(value, fields.clamp, self.clamp);
        let value = replace_bits(
            value,
            self.time_exponent.into(),
            fields.time_exponent.0,
            fields.time_exponent.1,
        );
        replace_bits(
            value,
            self.time_fraction.into(),
            fields.time_fraction.0,
            fields.time_fraction.1,
        )
    }

    /// Check that every field fits its bit range
    pub fn validate(&self) -> Result<(), &'static str> {
        if u64::from(self.power_limit) > POWER_LIMIT_MAX {
            return Err("Power limit must be <= 0x7FFF (15 bits)");
        }
        if u64::from(self.time_exponent) > TIME_EXPONENT_MAX {
            return Err("Time window exponent must be <= 31 (5 bits)");
        }
        if u64::from(self.time_fraction) > TIME_FRACTION_MAX {
            return Err("Time window fraction must be <= 3 (2 bits)");
        }
        Ok(())
    }
}

/// Package / Platform Power Limit Register layout
///
/// ## Register Format
///
/// | Bits   | Field          | Description                        |
/// |--------|----------------|------------------------------------|
/// | 0-14   | power_limit_1  | Power limit 1                      |
/// | 15     | enable_1       | Enable power limit 1               |
/// | 16     | clamp_1        | Clamp to power limit 1             |
/// | 17-21  | Y_1            | Time window 1 exponent             |
/// | 22-23  | Z_1            | Time window 1 fraction             |
/// | 24-31  | reserved       |                                    |
/// | 32-46  | power_limit_2  | Power limit 2                      |
/// | 47     | enable_2       | Enable power limit 2               |
/// | 48     | clamp_2        | Clamp to power limit 2             |
/// | 49-53  | Y_2            | Time window 2 exponent             |
/// | 54-55  | Z_2            | Time window 2 fraction             |
/// | 56-62  | reserved       |                                    |
/// | 63     | lock           | Lock register                      |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackagePowerLimit {
    pub long_term: PowerLimitConstraint,
    pub short_term: PowerLimitConstraint,
    /// Lock register (prevents further writes until reset)
    pub lock: bool,
}

impl RegisterLayout for PackagePowerLimit {
    fn from_msr_value(value: u64) -> Self {
        Self {
            long_term: PowerLimitConstraint::read(value, &LONG_TERM),
            short_term: PowerLimitConstraint::read(value, &SHORT_TERM),
            lock: bit_is_set(value, PACKAGE_LOCK_BIT),
        }
    }

    fn apply_to(&self, value: u64) -> u64 {
        let value = self.long_term.apply(value, &LONG_TERM);
        let value = self.short_term.apply(value, &SHORT_TERM);
        set_bit(value, PACKAGE_LOCK_BIT, self.lock)
    }
}

/// Power-plane (PP0 / PP1) and DRAM Power Limit Register layout
///
/// ## Register Format
///
/// | Bits   | Field          | Description                        |
/// |--------|----------------|------------------------------------|
/// | 0-14   | power_limit    | Power limit                        |
/// | 15     | enable         | Enable power limit                 |
/// | 16     | clamp          | Clamp to power limit               |
/// | 17-21  | Y              | Time window exponent               |
/// | 22-23  | F              | Time window fraction digit         |
/// | 24-30  | reserved       |                                    |
/// | 31     | lock           | Lock register                      |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanePowerLimit {
    pub long_term: PowerLimitConstraint,
    /// Lock register (prevents further writes until reset)
    pub lock: bool,
}

impl RegisterLayout for PlanePowerLimit {
    fn from_msr_value(value: u64) -> Self {
        Self {
            long_term: PowerLimitConstraint::read(value, &LONG_TERM),
            lock: bit_is_set(value, PLANE_LOCK_BIT),
        }
    }

    fn apply_to(&self, value: u64) -> u64 {
        let value = self.long_term.apply(value, &LONG_TERM);
        set_bit(value, PLANE_LOCK_BIT, self.lock)
    }
}

/// Energy Status Register layout
///
/// Bits 0-31 hold a wrapping energy counter in energy units; the rest is
/// reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnergyStatus {
    pub total_energy_consumed: u32,
}

impl RegisterLayout for EnergyStatus {
    fn from_msr_value(value: u64) -> Self {
        Self {
            total_energy_consumed: extract_bits(value, 0, 31) as u32,
        }
    }

    fn apply_to(&self, value: u64) -> u64 {
        replace_bits(value, self.total_energy_consumed.into(), 0, 31)
    }
}
