//! # raplcap
//!
//! Intel RAPL power capping through Model-Specific Registers.
//!
//! A [`Raplcap`] session discovers one CPU per socket, opens its register
//! file (`/dev/cpu/<n>/msr_safe`, falling back to `/dev/cpu/<n>/msr`), reads
//! the power/time/energy units once, and then reads or updates the power
//! limits of each [`Zone`] on request.
//!
//! ```ignore
//! use raplcap::{Limit, Raplcap, Zone};
//!
//! let mut rc = Raplcap::init()?;
//! rc.set_limits(0, Zone::Package, Some(&Limit::new(1.0, 65.0)), None)?;
//! rc.set_zone_enabled(0, Zone::Package, true)?;
//! println!("{:?}", rc.get_limits(0, Zone::Package)?);
//! rc.destroy()?;
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod topology;
pub mod units;
pub mod zone;

pub use config::{RaplcapConfig, ZoneSupport};
pub use error::{RaplcapError, Result};
pub use session::{get_num_sockets, Raplcap};
pub use topology::{CpuLocation, FixedTopology, SysfsTopology, TopologySource};
pub use units::Units;
pub use zone::{Limit, Zone, ZoneFamily, ZoneLimits};
