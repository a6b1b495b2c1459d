use std::time::{Duration, Instant};

use crate::time::SimTime;

/// A type that can be used to pace a simulation against the wall clock.
///
/// This trait abstracts over different types of clocks, such as
/// as-fast-as-possible and real-time clocks.
///
/// A clock can be associated to a simulator prior to initialization by calling
/// [`SimInit::set_clock()`](crate::simulation::SimInit::set_clock).
///
/// The simulator does not block inside the clock: it asks the clock for the
/// wall-clock deadline of the next event and performs the wait itself, so that
/// the wait can be interrupted by [`stop()`](crate::simulation::Simulator::stop)
/// or by the scheduling of an earlier event.
pub trait Clock<T: SimTime>: Send {
    /// Makes the specified simulation time coincide with the wall-clock
    /// instant `now`.
    ///
    /// The simulator calls this method each time a run is started or resumed,
    /// so that the time spent paused is never caught up.
    fn anchor(&mut self, time: T, now: Instant);

    /// Returns the wall-clock instant at which the specified simulation time
    /// is due, or `None` if the event can be processed immediately.
    fn deadline(&self, time: T) -> Option<Instant>;

    /// Returns the policy applied when an event is processed after its
    /// wall-clock deadline.
    fn catch_up_policy(&self) -> CatchUpPolicy;

    /// Returns the duration before a deadline below which the simulator
    /// busy-waits rather than sleeps.
    fn spin_threshold(&self) -> Duration {
        Duration::ZERO
    }

    /// Changes the speed factor at the wall-clock instant `now`, preserving
    /// the continuity of the time mapping.
    ///
    /// A clock leaving an infinite speed factor cannot know the current
    /// simulation time and must be anchored anew by its owner.
    ///
    /// Returns `false` if the clock does not support speed factors.
    fn set_speed_factor(&mut self, _speed_factor: f64, _now: Instant) -> bool {
        false
    }

    /// Returns the current speed factor, if any.
    fn speed_factor(&self) -> Option<f64> {
        None
    }
}

/// The current synchronization status of a clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// The clock is synchronized.
    Synchronized,
    /// The deadline has already elapsed and lags behind the current clock time
    /// by the duration given in the payload.
    OutOfSync(Duration),
}

/// Behavior of a real-time simulation when the processing of events falls
/// behind the wall clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CatchUpPolicy {
    /// Late events are processed immediately without sleeping until the
    /// simulation has caught up; the lag is recorded in the drift statistics.
    Drift,
    /// The simulation is stopped with a timing violation error as soon as an
    /// event is processed later than its deadline by more than the tolerance.
    Abort {
        /// Maximum accepted lag.
        tolerance: Duration,
    },
}

/// A dummy [`Clock`] that ignores synchronization.
///
/// Choosing this clock effectively makes the simulation run as fast as
/// possible.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoClock {}

impl NoClock {
    /// Constructs a new `NoClock` object.
    pub fn new() -> Self {
        Self {}
    }
}

impl<T: SimTime> Clock<T> for NoClock {
    fn anchor(&mut self, _: T, _: Instant) {}

    /// Always returns `None`.
    fn deadline(&self, _: T) -> Option<Instant> {
        None
    }

    /// Never applied since no deadline is ever missed.
    fn catch_up_policy(&self) -> CatchUpPolicy {
        CatchUpPolicy::Drift
    }
}

/// A real-time [`Clock`] based on the system's monotonic clock.
///
/// At speed factor 1, one time unit of logical time lasts
/// [`time_unit`](RealTimeClock::with_time_unit) of wall-clock time (one second
/// by default). A speed factor of 2 runs the simulation twice as fast as real
/// time, and an infinite speed factor runs it as fast as possible.
#[derive(Copy, Clone, Debug)]
pub struct RealTimeClock<T: SimTime> {
    speed_factor: f64,
    time_unit: Duration,
    catch_up_policy: CatchUpPolicy,
    spin_threshold: Duration,
    anchor: Option<Anchor<T>>,
}

/// Correspondence between simulation time and wall-clock time.
#[derive(Copy, Clone, Debug)]
struct Anchor<T> {
    // Simulation time of the reference point.
    time: T,
    // Logical time units already elapsed at `instant`, counted from `time`.
    offset: f64,
    // Wall-clock reference point.
    instant: Instant,
}

impl<T: SimTime> RealTimeClock<T> {
    /// Default spin threshold.
    pub const DEFAULT_SPIN_THRESHOLD: Duration = Duration::from_millis(1);

    /// Constructs a real-time clock with the specified speed factor and
    /// catch-up policy.
    ///
    /// # Panics
    ///
    /// Panics if the speed factor is not strictly positive.
    pub fn new(speed_factor: f64, catch_up_policy: CatchUpPolicy) -> Self {
        assert!(
            speed_factor > 0.0,
            "the speed factor must be strictly positive (got {speed_factor})"
        );

        Self {
            speed_factor,
            time_unit: Duration::from_secs(1),
            catch_up_policy,
            spin_threshold: Self::DEFAULT_SPIN_THRESHOLD,
            anchor: None,
        }
    }

    /// Sets the wall-clock duration of one logical time unit at speed factor 1.
    pub fn with_time_unit(mut self, time_unit: Duration) -> Self {
        self.time_unit = time_unit;

        self
    }

    /// Sets the duration before a deadline below which the simulator spins
    /// rather than sleeps.
    ///
    /// A zero threshold disables spinning altogether.
    pub fn with_spin_threshold(mut self, spin_threshold: Duration) -> Self {
        self.spin_threshold = spin_threshold;

        self
    }

    /// Returns the wall-clock duration of one logical time unit.
    pub fn time_unit(&self) -> Duration {
        self.time_unit
    }
}

impl<T: SimTime> Clock<T> for RealTimeClock<T> {
    fn anchor(&mut self, time: T, now: Instant) {
        self.anchor = Some(Anchor {
            time,
            offset: 0.0,
            instant: now,
        });
    }

    fn deadline(&self, time: T) -> Option<Instant> {
        if self.speed_factor.is_infinite() {
            return None;
        }
        let anchor = self.anchor.as_ref()?;

        let units = T::duration_as_secs_f64(time.duration_since(anchor.time)) - anchor.offset;
        let wall_secs = units * self.time_unit.as_secs_f64() / self.speed_factor;

        if wall_secs >= 0.0 {
            // An unrepresentable deadline lies so far in the future that it
            // is best treated as never due.
            let delay = Duration::try_from_secs_f64(wall_secs).ok()?;
            anchor.instant.checked_add(delay)
        } else {
            let advance = Duration::try_from_secs_f64(-wall_secs).unwrap_or(Duration::MAX);
            Some(anchor.instant.checked_sub(advance).unwrap_or(anchor.instant))
        }
    }

    fn catch_up_policy(&self) -> CatchUpPolicy {
        self.catch_up_policy
    }

    fn spin_threshold(&self) -> Duration {
        self.spin_threshold
    }

    fn set_speed_factor(&mut self, speed_factor: f64, now: Instant) -> bool {
        if speed_factor <= 0.0 || speed_factor.is_nan() {
            return false;
        }

        // Carry over the logical progress made at the former speed.
        if let Some(anchor) = &mut self.anchor {
            if self.speed_factor.is_finite() {
                let elapsed = now.saturating_duration_since(anchor.instant).as_secs_f64();
                anchor.offset += elapsed * self.speed_factor / self.time_unit.as_secs_f64();
            }
            anchor.instant = now;
        }
        self.speed_factor = speed_factor;

        true
    }

    fn speed_factor(&self) -> Option<f64> {
        Some(self.speed_factor)
    }
}

/// Sleeps until the deadline, spinning over the last part of the wait.
///
/// The wait is not interruptible and should therefore only be used for short
/// durations.
pub(crate) fn spin_until(deadline: Instant) {
    let now = Instant::now();
    if now < deadline {
        spin_sleep::sleep(deadline - now);
    }
}
