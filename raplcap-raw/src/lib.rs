//! # raplcap-raw
//!
//! Register definitions and device access for Intel RAPL (Running Average
//! Power Limit) power capping.
//!
//! This crate provides the low-level pieces shared by RAPL consumers:
//! - [`bits`] - inclusive bit-range extraction and replacement
//! - [`rapl`] - MSR addresses and typed layouts of the unit, power-limit and
//!   energy-status registers
//! - [`msr`] - per-CPU register files (`msr_safe` with `msr` fallback)
//!
//! ## Usage
//!
//! ```ignore
//! use raplcap_raw::rapl::{msr::MSR_PKG_POWER_LIMIT, PackagePowerLimit};
//! use raplcap_raw::{MsrHandle, RegisterLayout};
//!
//! let handle = MsrHandle::open(0)?;
//! let value = handle.read(MSR_PKG_POWER_LIMIT as i64)?;
//!
//! let mut limit = PackagePowerLimit::from_msr_value(value);
//! limit.long_term.power_limit = 0x1F0;
//! limit.long_term.validate()?;
//!
//! handle.write(MSR_PKG_POWER_LIMIT as i64, limit.apply_to(value))?;
//! ```

pub mod bits;
pub mod msr;
pub mod rapl;
pub mod register;

// Re-export for convenience
pub use bits::{extract_bits, replace_bits};
pub use msr::{MsrError, MsrHandle, Result};
pub use register::RegisterLayout;
