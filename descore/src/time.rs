//! Simulation time and clocks.
//!
//! This module provides most notably:
//!
//! * [`SimTime`]: a trait for totally ordered logical timestamps with an
//!   associated duration type, implemented for [`DoubleTime`], [`FloatTime`],
//!   `i64`, `u64` and the unit-carrying [`MonotonicTime`],
//! * [`Clock`]: a trait for types that can pace a simulation against the wall
//!   clock, implemented by [`NoClock`] and [`RealTimeClock`].
//!
//!
//! # Examples
//!
//! A simulator running twice as fast as real time, one logical time unit
//! lasting 10ms of wall-clock time at speed factor 1, and aborting if an event
//! is processed more than 5ms late:
//!
//! ```
//! use std::time::Duration;
//!
//! use descore::simulation::{SimInit, Simulator};
//! use descore::time::{CatchUpPolicy, DoubleTime, RealTimeClock};
//!
//! let clock = RealTimeClock::new(
//!     2.0,
//!     CatchUpPolicy::Abort {
//!         tolerance: Duration::from_millis(5),
//!     },
//! )
//! .with_time_unit(Duration::from_millis(10));
//!
//! let simulator: Simulator<DoubleTime> = SimInit::new().set_clock(clock).build();
//! ```

mod clock;
mod sim_time;

pub use tai_time::MonotonicTime;

pub use clock::{CatchUpPolicy, Clock, NoClock, RealTimeClock, SyncStatus};
pub(crate) use clock::spin_until;
pub use sim_time::{DoubleTime, FloatTime, SimTime};
