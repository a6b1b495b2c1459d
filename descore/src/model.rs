//! Model construction.
//!
//! # Model trait
//!
//! A model is whatever schedules the initial events of a replication. It is
//! represented by the [`Model`] trait, whose single method
//! [`Model::construct()`] is invoked by
//! [`Simulator::initialize()`](crate::simulation::Simulator::initialize) once
//! the event list has been cleared and the simulation time set to the start
//! time of the replication.
//!
//! The state of a model is typically shared with the actions it schedules, so
//! models usually keep it behind an `Arc`.
//!
//! #### Examples
//!
//! A closure taking a `&Simulator` is a model:
//!
//! ```
//! use descore::replication::Replication;
//! use descore::simulation::{Simulator, NORMAL_PRIORITY};
//! use descore::time::DoubleTime;
//!
//! let simulator = Simulator::new();
//! let replication = Replication::new("closure", DoubleTime(0.0), 0.0, 5.0).unwrap();
//!
//! simulator
//!     .initialize(replication, &mut |sim: &Simulator<DoubleTime>| {
//!         sim.schedule_event(DoubleTime(1.0), NORMAL_PRIORITY, |_| {})
//!             .map(|_| ())
//!     })
//!     .unwrap();
//!
//! assert_eq!(simulator.pending_events(), 1);
//! ```
//!
//! Models with parameters can implement the trait directly:
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! use descore::model::Model;
//! use descore::simulation::{BoxError, Simulator, NORMAL_PRIORITY};
//!
//! /// A source emitting one arrival per time unit.
//! struct Source {
//!     arrivals: Arc<AtomicU64>,
//! }
//!
//! fn arrival(sim: &Simulator<u64>, arrivals: Arc<AtomicU64>) -> Result<(), BoxError> {
//!     arrivals.fetch_add(1, Ordering::Relaxed);
//!     sim.schedule_event_in(1, NORMAL_PRIORITY, move |sim| arrival(sim, arrivals))?;
//!
//!     Ok(())
//! }
//!
//! impl Model<u64> for Source {
//!     fn construct(&mut self, simulator: &Simulator<u64>) -> Result<(), BoxError> {
//!         let arrivals = self.arrivals.clone();
//!         simulator.schedule_event_now(NORMAL_PRIORITY, move |sim| arrival(sim, arrivals))?;
//!
//!         Ok(())
//!     }
//! }
//! ```

use crate::simulation::{BoxError, Outcome, Simulator};
use crate::time::SimTime;

/// Trait to be implemented by simulation models.
///
/// This trait is implemented for all closures taking a `&Simulator` and
/// returning either `()` or a `Result<(), E>` where `E` can be converted into a
/// [`BoxError`].
pub trait Model<T: SimTime> {
    /// Schedules the initial events of a replication.
    ///
    /// An error aborts the initialization of the simulator, and the events
    /// scheduled so far are discarded.
    fn construct(&mut self, simulator: &Simulator<T>) -> Result<(), BoxError>;
}

impl<T, F, R> Model<T> for F
where
    T: SimTime,
    F: FnMut(&Simulator<T>) -> R,
    R: Outcome,
{
    fn construct(&mut self, simulator: &Simulator<T>) -> Result<(), BoxError> {
        self(simulator).into_result()
    }
}
