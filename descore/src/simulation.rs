//! Discrete-event simulation management.
//!
//! This module contains most notably the [`Simulator`] state machine, the
//! [`SimInit`] simulator builder, the [`EventList`] and the lifecycle
//! [`Notification`]s, as well as miscellaneous other types related to the
//! execution of a replication.
//!
//! # Simulator lifecycle
//!
//! A simulator goes through the following states:
//!
//! ```text
//!   NotInitialized --initialize--> Initialized --start/run/step--> Started
//!   Started --stop, end of step or run_up_to--> Stopped --start/run/step--> Started
//!   Started --list exhausted or end of run length--> Ended
//!   Initialized, Stopped, Ended --initialize--> Initialized
//!   (model construction error) --> NotInitialized
//! ```
//!
//! A simulator is bound to a [`Replication`] by
//! [`initialize()`](Simulator::initialize), which clears the event list,
//! resets the simulation time to the start time of the replication and invokes
//! the [`Model`] constructor so that it can schedule the initial events.
//!
//! The run loop then repeatedly removes the earliest event from the event list,
//! advances the simulation time to that of the event and executes its action,
//! until one of the following happens:
//!
//! 1. the event list is exhausted, in which case the replication ends and the
//!    simulation time is left unchanged,
//! 2. the next event lies beyond the end of the run length, in which case the
//!    simulation time is set to the end time and the replication ends,
//! 3. the loop is paused with [`stop()`](Simulator::stop), or because the
//!    bound of [`step()`](Simulator::step) or
//!    [`run_up_to()`](Simulator::run_up_to) was reached.
//!
//! # Practical considerations
//!
//! ## Scheduling from actions
//!
//! Actions receive a `&Simulator` and can therefore schedule and cancel
//! events, read the simulation time and even stop the simulator. Events
//! scheduled from within an action only become visible to the run loop once
//! the action has returned. An event may be scheduled for the current time,
//! in which case it is executed after all events already pending for that
//! time with the same or a higher priority.
//!
//! ## Concurrency
//!
//! A `Simulator` is a cheaply cloneable handle. A single coarse lock guards the
//! state, the simulation time, the event list and the clock; it is released
//! while actions and observers run, so that these can freely call back into
//! the simulator. Any thread may schedule events, cancel events or stop the
//! simulator while the run loop is waiting on a real-time clock: the wait is
//! interrupted and the next event is re-evaluated.
//!
//! # Examples
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use descore::replication::Replication;
//! use descore::simulation::{SimState, Simulator};
//! use descore::time::DoubleTime;
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//!
//! let simulator = Simulator::new();
//! let replication = Replication::new("demo", DoubleTime(0.0), 0.0, 10.0).unwrap();
//!
//! let model_log = log.clone();
//! simulator
//!     .initialize(replication, &mut |sim: &Simulator<DoubleTime>| {
//!         for (t, p) in [(5.0, 0), (5.0, 1), (3.0, 0)] {
//!             let log = model_log.clone();
//!             sim.schedule_event(DoubleTime(t), p, move |sim| {
//!                 log.lock().unwrap().push((sim.time().get(), p));
//!             })
//!             .unwrap();
//!         }
//!     })
//!     .unwrap();
//!
//! assert_eq!(simulator.run().unwrap(), SimState::Ended);
//! assert_eq!(*log.lock().unwrap(), vec![(3.0, 0), (5.0, 1), (5.0, 0)]);
//! assert_eq!(simulator.time(), DoubleTime(5.0));
//! ```
mod action;
mod event_list;
mod notification;
mod sim_init;

pub use action::{ActionError, ActionFailure, BoxError, Outcome};
pub use event_list::{
    EventHandle, EventKey, EventList, Priority, ScheduledEvent, MAX_PRIORITY, MIN_PRIORITY,
    NORMAL_PRIORITY,
};
pub use notification::{ListenerId, Notification, NotificationKind, NotificationKinds};
pub use sim_init::SimInit;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::model::Model;
use crate::replication::{RandomStream, Replication};
use crate::time::{spin_until, CatchUpPolicy, Clock, SimTime, SyncStatus};

use action::{box_action, panic_message, BoxedAction};
use notification::ListenerRegistry;

/// Simulator state machine.
///
/// A `Simulator` is created with [`Simulator::new()`] or, to configure a
/// real-time clock, with the [`SimInit`] builder. It owns an [`EventList`],
/// the current simulation time and the clock used to pace the simulation.
///
/// The simulator is a handle: clones refer to the same simulator, which makes
/// it possible to stop a simulator running in the background or to schedule
/// events from another thread. All methods take `&self`.
///
/// The run loop can execute on the calling thread with [`run()`](Self::run),
/// [`step()`](Self::step) and [`run_up_to()`](Self::run_up_to), or on a
/// dedicated background thread with [`start()`](Self::start), in which case
/// its outcome is collected with [`join()`](Self::join).
///
/// See the [module-level documentation](self) for the lifecycle of a
/// simulator.
pub struct Simulator<T: SimTime> {
    shared: Arc<Shared<T>>,
}

impl<T: SimTime> Simulator<T> {
    /// Creates a simulator that runs as fast as possible.
    pub fn new() -> Self {
        SimInit::new().build()
    }

    /// Creates a simulator with the specified clock and event list capacity.
    pub(crate) fn with_clock(clock: Box<dyn Clock<T>>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SimState::NotInitialized,
                    time: T::ORIGIN,
                    event_list: EventList::with_capacity(capacity),
                    replication: None,
                    clock,
                    clock_epoch: 0,
                    anchor_time: T::ORIGIN,
                    initializing: false,
                    loop_active: false,
                    worker: None,
                    replication_started: false,
                    warmup_reached: false,
                    run_bound: RunBound::Unbounded,
                    stats: RunStats::default(),
                    drift: DriftStats::default(),
                    last_violation: None,
                    aborting: None,
                }),
                condvar: Condvar::new(),
                listeners: Mutex::new(ListenerRegistry::new()),
            }),
        }
    }

    /// Returns the current simulation time.
    ///
    /// Before the first initialization, this is the origin of the timeline.
    pub fn time(&self) -> T {
        self.shared.lock().time
    }

    /// Returns the current state.
    pub fn state(&self) -> SimState {
        self.shared.lock().state
    }

    /// Returns the bound replication, if any.
    pub fn replication(&self) -> Option<Arc<Replication<T>>> {
        self.shared.lock().replication.clone()
    }

    /// Returns the warm-up time of the bound replication, if any.
    pub fn warmup_time(&self) -> Option<T> {
        self.shared
            .lock()
            .replication
            .as_ref()
            .map(|replication| replication.warmup_time())
    }

    /// Returns the end time of the bound replication, if any.
    pub fn end_time(&self) -> Option<T> {
        self.shared
            .lock()
            .replication
            .as_ref()
            .map(|replication| replication.end_time())
    }

    /// Returns the named random stream of the bound replication.
    pub fn stream(&self, name: &str) -> Option<RandomStream> {
        self.shared
            .lock()
            .replication
            .as_ref()
            .and_then(|replication| replication.stream(name).cloned())
    }

    /// Returns the number of pending events.
    pub fn pending_events(&self) -> usize {
        self.shared.lock().event_list.len()
    }

    /// Returns the execution statistics of the current replication.
    pub fn stats(&self) -> RunStats {
        self.shared.lock().stats
    }

    /// Returns the clock drift statistics of the current replication.
    pub fn drift(&self) -> DriftStats {
        self.shared.lock().drift
    }

    /// Returns the last timing violation of the current replication, if any.
    pub fn last_violation(&self) -> Option<TimingViolation<T>> {
        self.shared.lock().last_violation
    }

    /// Returns the speed factor of the clock, if it has one.
    pub fn speed_factor(&self) -> Option<f64> {
        self.shared.lock().clock.speed_factor()
    }

    /// Changes the speed factor of the clock.
    ///
    /// The change takes effect immediately, including for an event the run
    /// loop is currently waiting for. Returns `false` if the clock does not
    /// support speed factors or if the factor is not strictly positive.
    pub fn set_speed_factor(&self, speed_factor: f64) -> bool {
        let mut inner = self.shared.lock();
        let was_unpaced = inner.clock.speed_factor().is_some_and(f64::is_infinite);
        if !inner.clock.set_speed_factor(speed_factor, Instant::now()) {
            return false;
        }
        // An unpaced clock has not followed the simulation time since it was
        // last anchored.
        if was_unpaced && inner.loop_active {
            let time = inner.time;
            inner.anchor_clock(time);
        }
        inner.clock_epoch += 1;
        debug!(speed_factor, "speed factor changed");
        drop(inner);
        self.shared.condvar.notify_all();

        true
    }

    /// Registers an observer for the specified notification kinds.
    ///
    /// Observers are invoked synchronously on the thread of the run loop, in
    /// registration order and without the simulator lock held. A panicking
    /// observer is logged and otherwise ignored.
    ///
    /// Notifications raised while another notification is being delivered
    /// from within an observer are not delivered.
    pub fn subscribe<F>(&self, kinds: impl Into<NotificationKinds>, listener: F) -> ListenerId
    where
        F: FnMut(&Notification<T>) + Send + 'static,
    {
        self.shared
            .listeners()
            .subscribe(kinds.into(), Box::new(listener))
    }

    /// Unregisters an observer.
    ///
    /// Returns `false` if the observer was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.listeners().unsubscribe(id)
    }

    /// Binds the simulator to a replication and constructs the model.
    ///
    /// The event list is cleared, the simulation time is set to the start time
    /// of the replication, its random streams are rewound and all statistics
    /// are reset. The model constructor may then schedule the initial events.
    ///
    /// If the model constructor fails or panics, the events it scheduled are
    /// discarded and the simulator is left in the
    /// [`NotInitialized`](SimState::NotInitialized) state.
    ///
    /// An error is returned if the simulator is running.
    pub fn initialize<M>(
        &self,
        replication: impl Into<Arc<Replication<T>>>,
        model: &mut M,
    ) -> Result<(), ExecutionError<T>>
    where
        M: Model<T> + ?Sized,
    {
        let replication = replication.into();
        {
            let mut inner = self.shared.lock();
            if inner.state == SimState::Started {
                return Err(ExecutionError::IllegalState {
                    operation: "initialize",
                    state: inner.state,
                });
            }
            if inner.loop_active || inner.initializing {
                return Err(ExecutionError::Busy {
                    operation: "initialize",
                });
            }
            replication.reset_streams();
            inner.reset(replication.clone());
        }
        self.shared.condvar.notify_all();

        debug!(replication = replication.name(), "constructing model");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| model.construct(self)))
            .unwrap_or_else(|payload| Err(ActionFailure::from_panic(payload).into()));

        let mut inner = self.shared.lock();
        inner.initializing = false;

        match outcome {
            Ok(()) => {
                inner.state = SimState::Initialized;
                debug!(
                    time = ?inner.time,
                    pending = inner.event_list.len(),
                    "simulator initialized"
                );

                Ok(())
            }
            Err(source) => {
                inner.event_list.clear();
                inner.replication = None;
                let time = inner.time;
                warn!(time = ?time, "model construction failed: {}", source);

                Err(ExecutionError::ModelConstruction { time, source })
            }
        }
    }

    /// Runs the simulation on the calling thread until it is stopped or ends.
    ///
    /// The state upon completion is returned, which is either
    /// [`Stopped`](SimState::Stopped) or [`Ended`](SimState::Ended).
    pub fn run(&self) -> Result<SimState, ExecutionError<T>> {
        self.run_bounded("run", RunBound::Unbounded)
    }

    /// Executes exactly one event on the calling thread.
    ///
    /// The simulator is left [`Stopped`](SimState::Stopped), unless the
    /// replication ended instead.
    pub fn step(&self) -> Result<SimState, ExecutionError<T>> {
        self.run_bounded("step", RunBound::Steps(1))
    }

    /// Executes all events scheduled up to the specified time on the calling
    /// thread.
    ///
    /// Once the method returns, the simulation time is set to the target time
    /// (or left unchanged if it lies in the past) and the simulator is
    /// [`Stopped`](SimState::Stopped), unless the replication ended first.
    pub fn run_up_to(&self, time: T) -> Result<SimState, ExecutionError<T>> {
        self.run_bounded("run_up_to", RunBound::UpTo(time))
    }

    /// Runs the simulation on a background thread.
    ///
    /// The outcome of the run can be collected with [`join()`](Self::join).
    ///
    /// If the simulator was stopped but its run loop has not yet exited, which
    /// is notably the case when this method is called by an observer of the
    /// [`Stop`](Notification::Stop) notification, the loop simply resumes.
    /// A loop stopped by a timing violation cannot be resumed this way and
    /// the violation is returned instead.
    pub fn start(&self) -> Result<(), ExecutionError<T>> {
        let mut inner = self.shared.lock();
        if inner.state == SimState::Stopped && inner.loop_active {
            if let Some(violation) = inner.aborting {
                return Err(violation.into());
            }
            inner.state = SimState::Started;
            inner.run_bound = RunBound::Unbounded;
            let time = inner.time;
            inner.anchor_clock(time);
            debug!(time = ?time, "simulator resumed");
            drop(inner);
            self.shared.condvar.notify_all();

            return Ok(());
        }

        let previous_state = inner.state;
        inner.prepare_run("start", RunBound::Unbounded)?;

        let simulator = self.clone();
        let spawned = thread::Builder::new()
            .name("descore-simulator".into())
            .spawn(move || simulator.run_loop());

        match spawned {
            Ok(handle) => {
                // Discards the outcome of a former run that was never joined.
                inner.worker = Some(handle);

                Ok(())
            }
            Err(e) => {
                inner.state = previous_state;
                inner.loop_active = false;

                Err(ExecutionError::WorkerSpawn(e))
            }
        }
    }

    /// Waits for the background run loop to exit and returns its outcome.
    ///
    /// If no background run is pending, the current state is returned.
    pub fn join(&self) -> Result<SimState, ExecutionError<T>> {
        let handle = {
            let mut inner = self.shared.lock();
            match inner.worker.take() {
                Some(handle) if handle.thread().id() == thread::current().id() => {
                    inner.worker = Some(handle);

                    return Err(ExecutionError::Busy { operation: "join" });
                }
                Some(handle) => handle,
                None => return Ok(inner.state),
            }
        };

        match handle.join() {
            Ok(outcome) => outcome,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Requests the run loop to pause.
    ///
    /// This method may be called from any thread, including from an action.
    /// It does not interrupt an action that is being executed but does
    /// interrupt a wait on a real-time clock.
    pub fn stop(&self) -> Result<(), ExecutionError<T>> {
        let mut inner = self.shared.lock();
        if inner.state != SimState::Started {
            return Err(ExecutionError::IllegalState {
                operation: "stop",
                state: inner.state,
            });
        }
        inner.state = SimState::Stopped;
        debug!(time = ?inner.time, "stop requested");
        drop(inner);
        self.shared.condvar.notify_all();

        Ok(())
    }

    /// Schedules an event at the specified time.
    ///
    /// Events can be scheduled while the model is being constructed and in
    /// the `Initialized`, `Started` and `Stopped` states. An error is returned
    /// if the time lies in the past of the current simulation time, in which
    /// case the event list is left unchanged.
    pub fn schedule_event<F, R>(
        &self,
        time: T,
        priority: Priority,
        action: F,
    ) -> Result<EventHandle<T>, SchedulingError<T>>
    where
        F: FnOnce(&Simulator<T>) -> R + Send + 'static,
        R: Outcome,
    {
        self.schedule_boxed(|_| time, priority, box_action(action))
    }

    /// Schedules an event after the specified delay from the current
    /// simulation time.
    ///
    /// See [`schedule_event()`](Self::schedule_event).
    pub fn schedule_event_in<F, R>(
        &self,
        delay: T::Duration,
        priority: Priority,
        action: F,
    ) -> Result<EventHandle<T>, SchedulingError<T>>
    where
        F: FnOnce(&Simulator<T>) -> R + Send + 'static,
        R: Outcome,
    {
        self.schedule_boxed(
            |now| now.add_duration(delay),
            priority,
            box_action(action),
        )
    }

    /// Schedules an event for the current simulation time.
    ///
    /// See [`schedule_event()`](Self::schedule_event).
    pub fn schedule_event_now<F, R>(
        &self,
        priority: Priority,
        action: F,
    ) -> Result<EventHandle<T>, SchedulingError<T>>
    where
        F: FnOnce(&Simulator<T>) -> R + Send + 'static,
        R: Outcome,
    {
        self.schedule_boxed(|now| now, priority, box_action(action))
    }

    /// Cancels a pending event.
    ///
    /// Returns `false` if the event was already executed or cancelled.
    pub fn cancel_event(&self, handle: EventHandle<T>) -> bool {
        let mut inner = self.shared.lock();
        if !inner.event_list.cancel(handle) {
            return false;
        }
        trace!(time = ?handle.time(), sequence = handle.key().sequence(), "event cancelled");
        drop(inner);
        self.shared.condvar.notify_all();

        true
    }

    /// Inserts an event at a time computed from the current simulation time.
    fn schedule_boxed(
        &self,
        time: impl FnOnce(T) -> T,
        priority: Priority,
        action: BoxedAction<T>,
    ) -> Result<EventHandle<T>, SchedulingError<T>> {
        let mut inner = self.shared.lock();
        if !inner.accepts_events() {
            return Err(SchedulingError::IllegalState { state: inner.state });
        }
        let now = inner.time;
        let time = time(now);
        if time < now {
            return Err(SchedulingError::PastTime {
                time,
                priority,
                now,
            });
        }
        let handle = inner.event_list.schedule_boxed(time, priority, action);
        drop(inner);
        self.shared.condvar.notify_all();

        Ok(handle)
    }

    /// Runs the loop on the calling thread with the specified bound.
    fn run_bounded(
        &self,
        operation: &'static str,
        bound: RunBound<T>,
    ) -> Result<SimState, ExecutionError<T>> {
        self.shared.lock().prepare_run(operation, bound)?;

        self.run_loop()
    }

    /// The run loop.
    ///
    /// The loop must have been marked active and the state set to `Started`
    /// beforehand.
    fn run_loop(&self) -> Result<SimState, ExecutionError<T>> {
        let mut violation: Option<TimingViolation<T>> = None;

        loop {
            let mut inner = self.shared.lock();

            if inner.state == SimState::Started {
                if !inner.replication_started {
                    inner.replication_started = true;
                    let time = inner.time;
                    drop(inner);
                    info!(time = ?time, "replication started");
                    self.publish(Notification::StartOfReplication { time });

                    continue;
                }
                if let RunBound::Steps(0) = inner.run_bound {
                    inner.state = SimState::Stopped;
                }
            }

            if inner.state != SimState::Started {
                let state = inner.state;
                let time = inner.time;
                drop(inner);

                if state == SimState::Ended {
                    info!(time = ?time, "replication ended");
                    self.publish(Notification::EndOfReplication { time });
                } else {
                    debug!(time = ?time, "simulator stopped");
                    self.publish(Notification::Stop { time });
                }

                let mut inner = self.shared.lock();
                if inner.state == SimState::Started {
                    // An observer resumed the run.
                    if violation.is_none() {
                        continue;
                    }
                    inner.state = SimState::Stopped;
                }
                inner.loop_active = false;
                inner.aborting = None;
                inner.run_bound = RunBound::Unbounded;
                let state = inner.state;
                drop(inner);
                self.shared.condvar.notify_all();

                return match violation {
                    Some(violation) => Err(violation.into()),
                    None => Ok(state),
                };
            }

            match inner.next_target() {
                Target::Exhausted => {
                    inner.state = SimState::Ended;
                    debug!(time = ?inner.time, "event list exhausted");
                }
                Target::End(end) => {
                    let previous = inner.time;
                    inner.time = end;
                    inner.state = SimState::Ended;
                    drop(inner);
                    debug!(time = ?end, "end of run length reached");
                    self.publish_time_change(previous, end);
                }
                Target::Pause(limit) => {
                    let previous = inner.time;
                    let time = previous.max(limit);
                    inner.time = time;
                    inner.state = SimState::Stopped;
                    drop(inner);
                    self.publish_time_change(previous, time);
                }
                Target::Warmup(time) => {
                    let mut inner = match self.pace(inner, time) {
                        Ok(Some(inner)) => inner,
                        Ok(None) => continue,
                        Err(v) => {
                            violation = Some(v);
                            continue;
                        }
                    };
                    let previous = inner.time;
                    inner.time = time;
                    inner.warmup_reached = true;
                    drop(inner);
                    self.publish_time_change(previous, time);
                    info!(time = ?time, "warm-up period elapsed");
                    self.publish(Notification::WarmupReached { time });
                }
                Target::Event(key) => {
                    let mut inner = match self.pace(inner, key.time()) {
                        Ok(Some(inner)) => inner,
                        Ok(None) => continue,
                        Err(v) => {
                            violation = Some(v);
                            continue;
                        }
                    };
                    let Some(event) = inner.event_list.remove_first() else {
                        continue;
                    };
                    let previous = inner.time;
                    inner.time = event.time();
                    inner.stats.events_executed += 1;
                    if let RunBound::Steps(n) = &mut inner.run_bound {
                        *n = n.saturating_sub(1);
                    }
                    drop(inner);
                    self.publish_time_change(previous, event.time());
                    self.execute(event);
                }
            }
        }
    }

    /// Waits until the wall-clock deadline of the specified time.
    ///
    /// Returns the lock guard if the target is due, `None` if the wait was
    /// interrupted and the next target must be re-evaluated, or the timing
    /// violation if the catch-up policy aborted the run.
    fn pace<'a>(
        &'a self,
        mut inner: MutexGuard<'a, Inner<T>>,
        due: T,
    ) -> Result<Option<MutexGuard<'a, Inner<T>>>, TimingViolation<T>> {
        // Targets due at the anchor time are never late.
        if due <= inner.anchor_time {
            return Ok(Some(inner));
        }
        let Some(deadline) = inner.clock.deadline(due) else {
            return Ok(Some(inner));
        };
        let head = inner.event_list.peek_key();
        let epoch = inner.clock_epoch;

        match sync_status(deadline, Instant::now()) {
            SyncStatus::OutOfSync(lag) => {
                let catch_up_policy = inner.clock.catch_up_policy();
                if let CatchUpPolicy::Abort { tolerance } = catch_up_policy {
                    if lag > tolerance {
                        let violation = TimingViolation {
                            time: due,
                            lag,
                            tolerance,
                        };
                        error!("{}", violation);
                        inner.drift.record(lag);
                        inner.last_violation = Some(violation);
                        inner.aborting = Some(violation);
                        inner.state = SimState::Stopped;

                        return Err(violation);
                    }
                }
                if lag > inner.drift.max_lag {
                    warn!(time = ?due, ?lag, "simulation is lagging behind the wall clock");
                }
                inner.drift.record(lag);

                Ok(Some(inner))
            }
            SyncStatus::Synchronized => {
                inner.drift.last_lag = Duration::ZERO;
                let spin_threshold = inner.clock.spin_threshold();

                loop {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        break;
                    };
                    if remaining <= spin_threshold {
                        break;
                    }
                    let (guard, _) = self
                        .shared
                        .condvar
                        .wait_timeout(inner, remaining - spin_threshold)
                        .unwrap_or_else(PoisonError::into_inner);
                    inner = guard;
                    if inner.pacing_interrupted(head, epoch) {
                        return Ok(None);
                    }
                }

                if Instant::now() < deadline {
                    drop(inner);
                    spin_until(deadline);
                    inner = self.shared.lock();
                    if inner.pacing_interrupted(head, epoch) {
                        return Ok(None);
                    }
                }

                Ok(Some(inner))
            }
        }
    }

    /// Executes an event, reporting a failure of its action.
    fn execute(&self, event: ScheduledEvent<T>) {
        let key = event.key();
        trace!(
            time = ?key.time(),
            priority = key.priority(),
            sequence = key.sequence(),
            "executing event"
        );

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| event.execute(self))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => ActionFailure::Error(e),
            Err(payload) => ActionFailure::from_panic(payload),
        };
        let error = ActionError {
            time: key.time(),
            priority: key.priority(),
            sequence: key.sequence(),
            failure,
        };
        warn!("{}", error);

        self.shared.lock().stats.action_failures += 1;
        self.publish(Notification::ActionFailed(error));
    }

    /// Publishes a `TimeChanged` notification if the time has changed.
    fn publish_time_change(&self, previous: T, time: T) {
        if time != previous {
            self.publish(Notification::TimeChanged { previous, time });
        }
    }

    /// Delivers a notification to all interested observers.
    fn publish(&self, notification: Notification<T>) {
        let Some(mut entries) = self.shared.listeners().begin_delivery() else {
            return;
        };
        for entry in entries.iter_mut() {
            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| entry.deliver(&notification)))
            {
                error!(
                    listener = ?entry.id(),
                    "observer panicked: {}",
                    panic_message(payload)
                );
            }
        }
        self.shared.listeners().end_delivery(entries);
    }
}

impl<T: SimTime> Clone for Simulator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: SimTime> Default for Simulator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SimTime> fmt::Debug for Simulator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();

        f.debug_struct("Simulator")
            .field("state", &inner.state)
            .field("time", &inner.time)
            .field("pending_events", &inner.event_list.len())
            .finish_non_exhaustive()
    }
}

/// State shared by all handles of a simulator.
struct Shared<T: SimTime> {
    inner: Mutex<Inner<T>>,
    condvar: Condvar,
    listeners: Mutex<ListenerRegistry<T>>,
}

impl<T: SimTime> Shared<T> {
    // The guarded data is consistent whenever the lock is released, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, ListenerRegistry<T>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mutable simulator state, guarded by the coarse lock.
struct Inner<T: SimTime> {
    state: SimState,
    time: T,
    event_list: EventList<T>,
    replication: Option<Arc<Replication<T>>>,
    clock: Box<dyn Clock<T>>,
    // Incremented each time the time mapping of the clock changes.
    clock_epoch: u64,
    // Simulation time at which the clock was last anchored.
    anchor_time: T,
    initializing: bool,
    loop_active: bool,
    worker: Option<JoinHandle<Result<SimState, ExecutionError<T>>>>,
    replication_started: bool,
    warmup_reached: bool,
    run_bound: RunBound<T>,
    stats: RunStats,
    drift: DriftStats,
    last_violation: Option<TimingViolation<T>>,
    // Violation bringing the active run loop to a halt.
    aborting: Option<TimingViolation<T>>,
}

impl<T: SimTime> Inner<T> {
    /// Binds a new replication and enters model construction.
    fn reset(&mut self, replication: Arc<Replication<T>>) {
        self.state = SimState::NotInitialized;
        self.time = replication.start_time();
        self.event_list.clear();
        self.replication = Some(replication);
        self.initializing = true;
        self.worker = None;
        self.replication_started = false;
        self.warmup_reached = false;
        self.run_bound = RunBound::Unbounded;
        self.stats = RunStats::default();
        self.drift = DriftStats::default();
        self.last_violation = None;
    }

    /// Checks whether events may currently be scheduled.
    fn accepts_events(&self) -> bool {
        self.initializing
            || matches!(
                self.state,
                SimState::Initialized | SimState::Started | SimState::Stopped
            )
    }

    /// Transitions to `Started` and marks the run loop active.
    fn prepare_run(
        &mut self,
        operation: &'static str,
        bound: RunBound<T>,
    ) -> Result<(), ExecutionError<T>> {
        if !matches!(self.state, SimState::Initialized | SimState::Stopped) {
            return Err(ExecutionError::IllegalState {
                operation,
                state: self.state,
            });
        }
        if self.loop_active || self.initializing {
            return Err(ExecutionError::Busy { operation });
        }

        self.state = SimState::Started;
        self.loop_active = true;
        self.run_bound = bound;
        let time = self.time;
        self.anchor_clock(time);
        debug!(time = ?time, operation, "simulator started");

        Ok(())
    }

    /// Makes the specified simulation time coincide with the present instant.
    fn anchor_clock(&mut self, time: T) {
        self.clock.anchor(time, Instant::now());
        self.anchor_time = time;
    }

    /// Returns the warm-up time if it has not been reached yet.
    fn pending_warmup(&self) -> Option<T> {
        if self.warmup_reached {
            return None;
        }

        self.replication
            .as_ref()
            .map(|replication| replication.warmup_time())
    }

    /// Determines what the run loop should do next.
    fn next_target(&self) -> Target<T> {
        let next = self.event_list.peek_key();
        let end = self
            .replication
            .as_ref()
            .map(|replication| replication.end_time());
        let limit = match self.run_bound {
            RunBound::UpTo(limit) => Some(limit),
            _ => None,
        };

        if let Some(warmup) = self.pending_warmup() {
            let reachable = warmup <= self.time
                || match next {
                    Some(key) => warmup <= key.time(),
                    None => limit.is_some(),
                };
            if reachable && limit.map_or(true, |limit| warmup <= limit) {
                return Target::Warmup(warmup);
            }
        }

        let next_time = next.map(|key| key.time());
        if let Some(limit) = limit {
            let beyond_limit = next_time.map_or(true, |t| t > limit);
            if beyond_limit && end.map_or(true, |end| limit < end) {
                return Target::Pause(limit);
            }
        }
        match (next, end) {
            (None, Some(end)) if limit.is_some() => Target::End(end),
            (None, _) => Target::Exhausted,
            (Some(key), Some(end)) if key.time() > end => Target::End(end),
            (Some(key), _) => Target::Event(key),
        }
    }

    /// Checks whether a wait on the clock must be abandoned.
    fn pacing_interrupted(&self, head: Option<EventKey<T>>, clock_epoch: u64) -> bool {
        self.state != SimState::Started
            || self.event_list.peek_key() != head
            || self.clock_epoch != clock_epoch
    }
}

/// Bound of a single run of the loop.
#[derive(Copy, Clone, Debug)]
enum RunBound<T> {
    Unbounded,
    Steps(u64),
    UpTo(T),
}

/// Next action of the run loop.
enum Target<T: SimTime> {
    Warmup(T),
    Event(EventKey<T>),
    End(T),
    Pause(T),
    Exhausted,
}

/// Determines the synchronization status at `now` for the specified deadline.
fn sync_status(deadline: Instant, now: Instant) -> SyncStatus {
    match now.checked_duration_since(deadline) {
        Some(lag) if !lag.is_zero() => SyncStatus::OutOfSync(lag),
        _ => SyncStatus::Synchronized,
    }
}

/// The state of a simulator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SimState {
    /// The simulator is not bound to a replication, or the model construction
    /// failed.
    NotInitialized,
    /// The model was constructed and the simulator is ready to run.
    Initialized,
    /// The run loop is executing events.
    Started,
    /// The run loop is paused.
    Stopped,
    /// The replication is over.
    Ended,
}

impl fmt::Display for SimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotInitialized => "not initialized",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Ended => "ended",
        })
    }
}

/// Execution statistics of a replication.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunStats {
    /// Number of events whose action was executed.
    pub events_executed: u64,
    /// Number of actions that returned an error or panicked.
    pub action_failures: u64,
}

/// Lag statistics of a real-time simulation.
///
/// An event is late when its wall-clock deadline has already elapsed by the
/// time the run loop considers it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DriftStats {
    /// Lag of the last event, or zero if it was on time.
    pub last_lag: Duration,
    /// Largest lag observed.
    pub max_lag: Duration,
    /// Number of late events.
    pub late_events: u64,
}

impl DriftStats {
    fn record(&mut self, lag: Duration) {
        self.last_lag = lag;
        self.max_lag = self.max_lag.max(lag);
        self.late_events += 1;
    }
}

/// An event was processed later than its wall-clock deadline by more than the
/// tolerance of the [`CatchUpPolicy`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("the event at {time:?} is {lag:?} behind its wall-clock deadline, exceeding the tolerance of {tolerance:?}")]
pub struct TimingViolation<T: SimTime> {
    /// Simulation time of the late event.
    pub time: T,
    /// Lag of the event behind its deadline.
    pub lag: Duration,
    /// Tolerance of the catch-up policy.
    pub tolerance: Duration,
}

/// An error returned by a lifecycle operation of a [`Simulator`].
#[derive(Debug, Error)]
pub enum ExecutionError<T: SimTime> {
    /// The operation is not permitted in the current state.
    #[error("`{operation}` is not permitted when the simulator is {state}")]
    IllegalState {
        /// The rejected operation.
        operation: &'static str,
        /// State of the simulator.
        state: SimState,
    },
    /// A run loop or a model constructor is already active on this simulator.
    #[error("`{operation}` cannot be performed while a run loop or a model constructor is active")]
    Busy {
        /// The rejected operation.
        operation: &'static str,
    },
    /// The model constructor returned an error or panicked.
    #[error("model construction failed at {time:?}")]
    ModelConstruction {
        /// Simulation time at the start of the replication.
        time: T,
        /// The error of the model constructor.
        #[source]
        source: BoxError,
    },
    /// The catch-up policy of a real-time clock aborted the run.
    #[error(transparent)]
    TimingViolation(#[from] TimingViolation<T>),
    /// The background thread of the run loop could not be spawned.
    #[error("the simulator thread could not be spawned")]
    WorkerSpawn(#[source] std::io::Error),
}

/// An error returned when an event cannot be scheduled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum SchedulingError<T: SimTime> {
    /// The scheduled time lies in the past of the current simulation time.
    #[error("the event at {time:?} (priority {priority}) lies in the past of the current time {now:?}")]
    PastTime {
        /// Requested time.
        time: T,
        /// Requested priority.
        priority: Priority,
        /// Current simulation time.
        now: T,
    },
    /// Events cannot be scheduled in the current state.
    #[error("events cannot be scheduled when the simulator is {state}")]
    IllegalState {
        /// State of the simulator.
        state: SimState,
    },
}
