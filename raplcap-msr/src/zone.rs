//! RAPL zones and the power-limit register codec
//!
//! Each zone owns one power-limit MSR. Package and Platform share a layout
//! with two constraints (long and short term, each with its own enable and
//! clamp bit); Core, Uncore and DRAM have a single long-term constraint.
//! The two families also disagree on how the time-window fraction is scaled:
//!
//! - Package/Platform: `2^Y * (1 + Z/4) * time_unit`
//! - Core/Uncore/DRAM: `2^Y * (1.0 + 0.1*F) * time_unit`
//!
//! Writes only touch the fields being changed; everything else in the
//! register, reserved bits included, is written back as it was read.

use std::fmt;
use std::str::FromStr;

use raplcap_raw::bits::bit_is_set;
use raplcap_raw::rapl::{
    msr, ConstraintFields, PackagePowerLimit, PlanePowerLimit, PowerLimitConstraint, LONG_TERM,
    POWER_LIMIT_MAX, SHORT_TERM, TIME_EXPONENT_MAX,
};
use raplcap_raw::RegisterLayout;

use crate::error::RaplcapError;
use crate::units::Units;

/// A RAPL power domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    Package,
    Core,
    Uncore,
    Dram,
    Platform,
}

impl Zone {
    pub const ALL: [Zone; 5] = [
        Zone::Package,
        Zone::Core,
        Zone::Uncore,
        Zone::Dram,
        Zone::Platform,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Zone::Package => "PACKAGE",
            Zone::Core => "CORE",
            Zone::Uncore => "UNCORE",
            Zone::Dram => "DRAM",
            Zone::Platform => "PSYS",
        }
    }

    /// Power-limit MSR of this zone
    pub fn power_limit_msr(&self) -> u64 {
        match self {
            Zone::Package => msr::MSR_PKG_POWER_LIMIT,
            Zone::Core => msr::MSR_PP0_POWER_LIMIT,
            Zone::Uncore => msr::MSR_PP1_POWER_LIMIT,
            Zone::Dram => msr::MSR_DRAM_POWER_LIMIT,
            Zone::Platform => msr::MSR_PLATFORM_POWER_LIMIT,
        }
    }

    /// Energy-status MSR of this zone
    pub fn energy_status_msr(&self) -> u64 {
        match self {
            Zone::Package => msr::MSR_PKG_ENERGY_STATUS,
            Zone::Core => msr::MSR_PP0_ENERGY_STATUS,
            Zone::Uncore => msr::MSR_PP1_ENERGY_STATUS,
            Zone::Dram => msr::MSR_DRAM_ENERGY_STATUS,
            Zone::Platform => msr::MSR_PLATFORM_ENERGY_COUNTER,
        }
    }

    pub fn family(&self) -> ZoneFamily {
        match self {
            Zone::Package | Zone::Platform => ZoneFamily::PackagePlatform,
            Zone::Core | Zone::Uncore | Zone::Dram => ZoneFamily::CoreUncoreDram,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Zone {
    type Err = RaplcapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PACKAGE" => Ok(Zone::Package),
            "CORE" => Ok(Zone::Core),
            "UNCORE" => Ok(Zone::Uncore),
            "DRAM" => Ok(Zone::Dram),
            "PSYS" | "PLATFORM" => Ok(Zone::Platform),
            _ => Err(RaplcapError::InvalidArgument(format!("Unknown zone: {s}"))),
        }
    }
}

impl TryFrom<u32> for Zone {
    type Error = RaplcapError;

    /// Zone ids in declaration order, PACKAGE = 0 through PSYS = 4
    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Zone::ALL
            .get(id as usize)
            .copied()
            .ok_or_else(|| RaplcapError::InvalidArgument(format!("Unknown zone id: {id}")))
    }
}

/// A power limit averaged over a time window
///
/// On write, a non-positive `seconds` or `watts` leaves that field of the
/// register unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Limit {
    pub seconds: f64,
    pub watts: f64,
}

impl Limit {
    pub fn new(seconds: f64, watts: f64) -> Self {
        Self { seconds, watts }
    }
}

/// Limits read from a zone; `short_term` only exists for Package/Platform
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZoneLimits {
    pub long_term: Limit,
    pub short_term: Option<Limit>,
}

/// Power-limit register layout family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneFamily {
    PackagePlatform,
    CoreUncoreDram,
}

impl ZoneFamily {
    fn constraints(&self) -> &'static [ConstraintFields] {
        match self {
            ZoneFamily::PackagePlatform => &[LONG_TERM, SHORT_TERM],
            ZoneFamily::CoreUncoreDram => &[LONG_TERM],
        }
    }

    pub fn has_short_term(&self) -> bool {
        self.constraints().len() > 1
    }

    /// Every constraint's enable bit is set
    pub fn is_enabled(&self, value: u64) -> bool {
        self.constraints()
            .iter()
            .all(|fields| bit_is_set(value, fields.enable))
    }

    /// Every constraint's clamp bit is set
    pub fn is_clamped(&self, value: u64) -> bool {
        self.constraints()
            .iter()
            .all(|fields| bit_is_set(value, fields.clamp))
    }

    pub fn is_locked(&self, value: u64) -> bool {
        match self {
            ZoneFamily::PackagePlatform => PackagePowerLimit::from_msr_value(value).lock,
            ZoneFamily::CoreUncoreDram => PlanePowerLimit::from_msr_value(value).lock,
        }
    }

    /// Set or clear the enable and clamp bits of every constraint
    pub fn set_enabled(&self, value: u64, enabled: bool) -> u64 {
        self.constraints().iter().fold(value, |value, fields| {
            let mut constraint = PowerLimitConstraint::read(value, fields);
            constraint.enable = enabled;
            constraint.clamp = enabled;
            constraint.apply(value, fields)
        })
    }

    /// Fractional multiplier of the time window for fraction field `z`
    fn time_window_factor(&self, z: u8) -> f64 {
        match self {
            ZoneFamily::PackagePlatform => 1.0 + f64::from(z) / 4.0,
            // Single decimal digit between 1.0 and 1.3
            ZoneFamily::CoreUncoreDram => 1.0 + 0.1 * f64::from(z),
        }
    }

    /// Seconds represented by exponent `y` and fraction `z`
    pub fn time_window_seconds(&self, y: u8, z: u8, time_unit: f64) -> f64 {
        2f64.powi(i32::from(y)) * self.time_window_factor(z) * time_unit
    }

    /// Exponent `y` for `seconds`, keeping fraction `z` as it is in the register
    ///
    /// The fraction is not recomputed, so the result is only as precise as
    /// the power of two below `seconds / (time_unit * factor(z))`.
    pub fn time_window_exponent(&self, seconds: f64, z: u8, time_unit: f64) -> u8 {
        let y = (seconds / (time_unit * self.time_window_factor(z))).log2();
        if y.is_nan() || y < 0.0 {
            tracing::warn!(
                "Time window too small: {seconds:.12} s, using min: {:.12} s",
                self.time_window_seconds(0, z, time_unit)
            );
            return 0;
        }
        if y >= (TIME_EXPONENT_MAX + 1) as f64 {
            tracing::warn!(
                "Time window too large: {seconds:.12} s, using max: {:.12} s",
                self.time_window_seconds(TIME_EXPONENT_MAX as u8, z, time_unit)
            );
            return TIME_EXPONENT_MAX as u8;
        }
        y as u8
    }

    fn decode_constraint(&self, value: u64, fields: &ConstraintFields, units: &Units) -> Limit {
        let raw = PowerLimitConstraint::read(value, fields);
        Limit {
            seconds: self.time_window_seconds(
                raw.time_exponent,
                raw.time_fraction,
                units.time_unit,
            ),
            watts: f64::from(raw.power_limit) * units.power_unit,
        }
    }

    fn encode_constraint(
        &self,
        value: u64,
        fields: &ConstraintFields,
        units: &Units,
        limit: &Limit,
    ) -> Result<u64, RaplcapError> {
        let mut raw = PowerLimitConstraint::read(value, fields);
        if limit.watts > 0.0 {
            raw.power_limit = encode_power(limit.watts, units.power_unit);
        }
        if limit.seconds > 0.0 {
            raw.time_exponent =
                self.time_window_exponent(limit.seconds, raw.time_fraction, units.time_unit);
        }
        raw.validate()
            .map_err(|e| RaplcapError::InvalidArgument(e.to_string()))?;
        Ok(raw.apply(value, fields))
    }

    pub fn decode_limits(&self, value: u64, units: &Units) -> ZoneLimits {
        let limits = ZoneLimits {
            long_term: self.decode_constraint(value, &LONG_TERM, units),
            short_term: self
                .has_short_term()
                .then(|| self.decode_constraint(value, &SHORT_TERM, units)),
        };
        tracing::debug!("Decoded 0x{value:016x}: {limits:?}");
        limits
    }

    /// Encode `long_term` and `short_term` into `value`
    ///
    /// `short_term` is ignored for Core/Uncore/DRAM. Every constraint written
    /// is range-checked before it is merged into `value`.
    pub fn encode_limits(
        &self,
        value: u64,
        units: &Units,
        long_term: Option<&Limit>,
        short_term: Option<&Limit>,
    ) -> Result<u64, RaplcapError> {
        let mut encoded = value;
        if let Some(limit) = long_term {
            encoded = self.encode_constraint(encoded, &LONG_TERM, units, limit)?;
        }
        if let Some(limit) = short_term.filter(|_| self.has_short_term()) {
            encoded = self.encode_constraint(encoded, &SHORT_TERM, units, limit)?;
        }
        tracing::debug!(
            "Encoded long={long_term:?} short={short_term:?}: 0x{value:016x} -> 0x{encoded:016x}"
        );
        Ok(encoded)
    }
}

/// Power limit field for `watts`, saturated to 15 bits
fn encode_power(watts: f64, power_unit: f64) -> u16 {
    let bits = (watts / power_unit) as u64;
    if bits > POWER_LIMIT_MAX {
        tracing::warn!(
            "Power limit too large: {watts:.12} W, using max: {:.12} W",
            POWER_LIMIT_MAX as f64 * power_unit
        );
        return POWER_LIMIT_MAX as u16;
    }
    bits as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use raplcap_raw::extract_bits;

    // 1/8 W, 1/1024 s, 1/16384 J
    fn units() -> Units {
        Units::from_msr_value(0x000A_0E03)
    }

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    #[test]
    fn test_zone_registers() {
        assert_eq!(Zone::Package.power_limit_msr(), 0x610);
        assert_eq!(Zone::Core.power_limit_msr(), 0x638);
        assert_eq!(Zone::Uncore.power_limit_msr(), 0x640);
        assert_eq!(Zone::Dram.power_limit_msr(), 0x618);
        assert_eq!(Zone::Platform.power_limit_msr(), 0x65C);
        assert_eq!(Zone::Platform.energy_status_msr(), 0x64D);
    }

    #[test]
    fn test_zone_parsing() {
        assert_eq!("package".parse::<Zone>().unwrap(), Zone::Package);
        assert_eq!("PSYS".parse::<Zone>().unwrap(), Zone::Platform);
        assert!(matches!(
            "GPU".parse::<Zone>(),
            Err(RaplcapError::InvalidArgument(_))
        ));
        assert_eq!(Zone::try_from(3).unwrap(), Zone::Dram);
        assert!(Zone::try_from(5).is_err());
        assert_eq!(Zone::Dram.to_string(), "DRAM");
    }

    #[test]
    fn test_families() {
        assert_eq!(Zone::Package.family(), ZoneFamily::PackagePlatform);
        assert_eq!(Zone::Platform.family(), ZoneFamily::PackagePlatform);
        for zone in [Zone::Core, Zone::Uncore, Zone::Dram] {
            assert_eq!(zone.family(), ZoneFamily::CoreUncoreDram);
        }
    }

    #[test]
    fn test_package_enable_sets_four_bits() {
        let family = ZoneFamily::PackagePlatform;
        let base: u64 = 0x7F00_0000_FF00_1234;

        let enabled = family.set_enabled(base, true);
        assert_eq!(enabled ^ base, (1 << 15) | (1 << 16) | (1 << 47) | (1 << 48));
        assert!(family.is_enabled(enabled));
        assert!(family.is_clamped(enabled));

        let disabled = family.set_enabled(enabled, false);
        assert_eq!(disabled, base);
        assert!(!family.is_enabled(disabled));
    }

    #[test]
    fn test_package_enabled_needs_both_constraints() {
        let family = ZoneFamily::PackagePlatform;
        assert!(!family.is_enabled(1 << 15));
        assert!(!family.is_enabled(1 << 47));
        assert!(family.is_enabled((1 << 15) | (1 << 47)));
    }

    #[test]
    fn test_plane_enable_touches_low_bits_only() {
        let family = ZoneFamily::CoreUncoreDram;
        let enabled = family.set_enabled(0, true);
        assert_eq!(enabled, (1 << 15) | (1 << 16));
        assert!(family.is_enabled(enabled));
        assert!(family.is_enabled(1 << 15));
        assert_eq!(family.set_enabled(u64::MAX, false), u64::MAX & !((1 << 15) | (1 << 16)));
    }

    #[test]
    fn test_lock_bits() {
        assert!(ZoneFamily::PackagePlatform.is_locked(1 << 63));
        assert!(!ZoneFamily::PackagePlatform.is_locked(1 << 31));
        assert!(ZoneFamily::CoreUncoreDram.is_locked(1 << 31));
        assert!(!ZoneFamily::CoreUncoreDram.is_locked(1 << 63));
    }

    #[test]
    fn test_decode_package_limits() {
        // PL1 = 0x118 (35 W), Y1 = 0x0E, Z1 = 1; PL2 = 0x150 (42 W), Y2 = 1, Z2 = 0
        let value: u64 = (1 << 49) | (0x150 << 32) | (1 << 22) | (0x0E << 17) | 0x118;
        let limits = ZoneFamily::PackagePlatform.decode_limits(value, &units());

        assert_eq!(limits.long_term.watts, 35.0);
        // 2^14 * 1.25 / 1024
        assert_eq!(limits.long_term.seconds, 20.0);
        let short = limits.short_term.unwrap();
        assert_eq!(short.watts, 42.0);
        assert_eq!(short.seconds, 2.0 / 1024.0);
    }

    #[test]
    fn test_decode_core_limits_uses_decimal_fraction() {
        // PL = 80 (10 W), Y = 10, F = 3
        let value: u64 = (3 << 22) | (10 << 17) | 80;
        let limits = ZoneFamily::CoreUncoreDram.decode_limits(value, &units());

        assert_eq!(limits.long_term.watts, 10.0);
        assert_close(limits.long_term.seconds, 1.3, 1e-12);
        assert!(limits.short_term.is_none());
    }

    #[test]
    fn test_core_encode_from_zero() {
        let family = ZoneFamily::CoreUncoreDram;
        let units = Units {
            power_unit: 1.0 / 8.0,
            time_unit: 1.0 / 1024.0,
            energy_unit: 1.0 / 16384.0,
            dram_energy_unit: 1.0 / 16384.0,
        };

        let value = family
            .encode_limits(0, &units, Some(&Limit::new(1.0, 10.0)), None)
            .unwrap();
        let limits = family.decode_limits(value, &units);

        assert_close(limits.long_term.watts, 10.0, units.power_unit);
        assert_close(limits.long_term.seconds, 1.0, units.time_unit);
    }

    #[test]
    fn test_core_encode_decode_inverse() {
        let family = ZoneFamily::CoreUncoreDram;
        let units = units();
        for &(seconds, watts) in &[(0.25, 4.5), (2.0, 15.0), (8.0, 120.125), (64.0, 1.0)] {
            let value = family
                .encode_limits(0, &units, Some(&Limit::new(seconds, watts)), None)
                .unwrap();
            let limits = family.decode_limits(value, &units);
            assert_close(limits.long_term.watts, watts, units.power_unit);
            assert_close(limits.long_term.seconds, seconds, units.time_unit);
        }
    }

    #[test]
    fn test_package_encode_keeps_fraction() {
        let family = ZoneFamily::PackagePlatform;
        let units = units();
        // Z1 = 2 already in the register
        let value = family
            .encode_limits(2 << 22, &units, Some(&Limit::new(1.5, 0.0)), None)
            .unwrap();

        assert_eq!(extract_bits(value, 22, 23), 2);
        // log2(4 * 1.5 * 1024 / 6) = 10
        assert_eq!(extract_bits(value, 17, 21), 10);
        assert_eq!(family.decode_limits(value, &units).long_term.seconds, 1.5);
    }

    #[test]
    fn test_package_encode_short_term() {
        let family = ZoneFamily::PackagePlatform;
        let units = units();
        let value = family
            .encode_limits(
                0,
                &units,
                Some(&Limit::new(1.0, 25.0)),
                Some(&Limit::new(0.0078125, 30.0)),
            )
            .unwrap();
        let limits = family.decode_limits(value, &units);

        assert_eq!(limits.long_term, Limit::new(1.0, 25.0));
        assert_eq!(limits.short_term, Some(Limit::new(0.0078125, 30.0)));
        assert_eq!(extract_bits(value, 32, 46), 240);
        assert_eq!(extract_bits(value, 49, 53), 3);
    }

    #[test]
    fn test_short_term_ignored_for_planes() {
        let family = ZoneFamily::CoreUncoreDram;
        let value = family
            .encode_limits(0, &units(), None, Some(&Limit::new(1.0, 10.0)))
            .unwrap();
        assert_eq!(value, 0);
    }

    #[test]
    fn test_non_positive_fields_untouched() {
        let family = ZoneFamily::PackagePlatform;
        let before: u64 = 0x8012_3456_789A_BCDE;

        let value = family
            .encode_limits(before, &units(), Some(&Limit::new(2.0, 0.0)), None)
            .unwrap();
        assert_eq!(extract_bits(value, 0, 14), extract_bits(before, 0, 14));

        let value = family
            .encode_limits(before, &units(), Some(&Limit::new(-1.0, -5.0)), None)
            .unwrap();
        assert_eq!(value, before);
    }

    #[test]
    fn test_encode_saturates() {
        let family = ZoneFamily::CoreUncoreDram;
        let units = units();

        let value = family
            .encode_limits(0, &units, Some(&Limit::new(1e12, 1e9)), None)
            .unwrap();
        assert_eq!(extract_bits(value, 0, 14), POWER_LIMIT_MAX);
        assert_eq!(extract_bits(value, 17, 21), TIME_EXPONENT_MAX);

        let value = family
            .encode_limits(0, &units, Some(&Limit::new(1e-9, 0.0)), None)
            .unwrap();
        assert_eq!(extract_bits(value, 17, 21), 0);
    }
}
