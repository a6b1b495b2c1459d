//! A discrete-event simulation kernel.
//!
//! Descore advances a logical clock by repeatedly selecting and executing the
//! earliest pending event from a dynamically growing and shrinking event list,
//! and manages the lifecycle of a simulation run, or *replication*, from its
//! initialization to its end.
//!
//! The kernel guarantees a total and reproducible ordering of events, even
//! when events are scheduled or cancelled concurrently: events are ordered by
//! time, then by decreasing priority, then by insertion order. It supports
//! several representations of logical time and can optionally pace the
//! simulation against the wall clock for live or animated runs.
//!
//! # A practical overview
//!
//! Running a simulation typically involves the following steps:
//!
//! 1. the definition of a [`Replication`](replication::Replication), *i.e.* of
//!    the time window of the run and of the random streams the model draws
//!    from,
//! 2. the creation of a [`Simulator`](simulation::Simulator), possibly with a
//!    real-time [`Clock`](time::Clock) set through the
//!    [`SimInit`](simulation::SimInit) builder,
//! 3. the initialization of the simulator with a [`Model`](model::Model),
//!    which schedules the initial events,
//! 4. the execution of the run loop, either on the calling thread with
//!    [`Simulator::run()`](simulation::Simulator::run) or in the background with
//!    [`Simulator::start()`](simulation::Simulator::start).
//!
//! Actions are plain closures taking a `&Simulator`, from which they can read
//! the simulation time, schedule or cancel other events and draw random
//! numbers. Observers can subscribe to lifecycle
//! [`Notification`](simulation::Notification)s such as the end of the warm-up
//! period or the end of the replication.
//!
//! Several independent replications of the same model can be run sequentially
//! or in parallel with an [`Experiment`](replication::Experiment).
//!
//! # Example
//!
//! A single-server queue with exponentially distributed inter-arrival and
//! service times, whose counters are reset at the end of the warm-up period:
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use rand::Rng;
//!
//! use descore::replication::Replication;
//! use descore::simulation::{NotificationKind, SimState, Simulator, NORMAL_PRIORITY};
//! use descore::time::DoubleTime;
//!
//! #[derive(Default)]
//! struct Station {
//!     arrivals: u64,
//!     served: u64,
//!     waiting: u64,
//!     busy: bool,
//! }
//!
//! type SharedStation = Arc<Mutex<Station>>;
//!
//! // Draws an exponentially distributed duration from the named stream.
//! fn exponential(sim: &Simulator<DoubleTime>, stream: &str, mean: f64) -> f64 {
//!     let mut rng = sim.stream(stream).expect("unknown stream");
//!
//!     -mean * (1.0 - rng.gen::<f64>()).ln()
//! }
//!
//! fn arrival(sim: &Simulator<DoubleTime>, station: SharedStation) {
//!     let was_idle = {
//!         let mut station = station.lock().unwrap();
//!         station.arrivals += 1;
//!         station.waiting += 1;
//!         !std::mem::replace(&mut station.busy, true)
//!     };
//!     if was_idle {
//!         begin_service(sim, station.clone());
//!     }
//!     let gap = exponential(sim, "arrivals", 1.0);
//!     sim.schedule_event_in(gap, NORMAL_PRIORITY, move |sim| arrival(sim, station))
//!         .unwrap();
//! }
//!
//! fn begin_service(sim: &Simulator<DoubleTime>, station: SharedStation) {
//!     station.lock().unwrap().waiting -= 1;
//!     let duration = exponential(sim, "services", 0.8);
//!     sim.schedule_event_in(duration, NORMAL_PRIORITY, move |sim| departure(sim, station))
//!         .unwrap();
//! }
//!
//! fn departure(sim: &Simulator<DoubleTime>, station: SharedStation) {
//!     let next = {
//!         let mut station = station.lock().unwrap();
//!         station.served += 1;
//!         station.busy = station.waiting > 0;
//!         station.busy
//!     };
//!     if next {
//!         begin_service(sim, station);
//!     }
//! }
//!
//! let replication = Replication::new("M/M/1", DoubleTime(0.0), 100.0, 1000.0)?
//!     .with_stream("arrivals", 1)?
//!     .with_stream("services", 2)?;
//!
//! let station = SharedStation::default();
//! let simulator = Simulator::new();
//!
//! let observed = station.clone();
//! simulator.subscribe(NotificationKind::WarmupReached, move |_| {
//!     let mut station = observed.lock().unwrap();
//!     station.arrivals = 0;
//!     station.served = 0;
//! });
//!
//! let model_station = station.clone();
//! simulator.initialize(replication, &mut |sim: &Simulator<DoubleTime>| {
//!     let station = model_station.clone();
//!     sim.schedule_event_now(NORMAL_PRIORITY, move |sim| arrival(sim, station))
//!         .map(|_| ())
//! })?;
//!
//! assert_eq!(simulator.run()?, SimState::Ended);
//! assert_eq!(simulator.time(), DoubleTime(1000.0));
//! assert!(station.lock().unwrap().arrivals > 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Logging
//!
//! Descore emits diagnostics through the [`tracing`] crate: state transitions
//! at the `debug` level, executed events at the `trace` level, the start and
//! end of replications at the `info` level, failed actions and clock drift at
//! the `warn` level and timing violations at the `error` level. No subscriber
//! is installed by the library.
//!
//! # Feature flags
//!
//! * `serde`: derives `Serialize` and `Deserialize` for the replication and
//!   experiment configurations, the floating-point timestamps and the
//!   replication reports.
//!
//! # Modules documentation
//!
//! * the [`simulation`] module discusses the lifecycle of a simulator, the
//!   ordering of events and the concurrency model,
//! * the [`time`] module presents the available time representations and
//!   real-time clocks,
//! * the [`replication`] module describes replications, random streams and
//!   experiments,
//! * the [`model`] module presents the model construction callback.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod model;
pub mod replication;
pub mod simulation;
pub mod time;
