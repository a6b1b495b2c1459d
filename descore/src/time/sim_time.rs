//! Logical time representations.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use tai_time::MonotonicTime;

/// A logical timestamp on the simulation timeline.
///
/// A `SimTime` is an absolute position on the timeline, totally ordered and
/// paired with a relative [`SimTime::Duration`] type. The only operations the
/// simulator relies upon are the addition of a duration to a timestamp and the
/// subtraction of two timestamps.
///
/// This trait is implemented for:
///
/// * [`DoubleTime`] with `f64` durations,
/// * [`FloatTime`] with `f32` durations,
/// * `i64` and `u64` with durations of the same type,
/// * [`MonotonicTime`] with [`std::time::Duration`] durations, which carries
///   physical units (seconds).
///
/// Numeric representations are unit-less; when a real-time clock is used, one
/// unit of logical time corresponds to one second of wall-clock time at speed
/// factor 1, unless configured otherwise with
/// [`RealTimeClock::with_time_unit()`](crate::time::RealTimeClock::with_time_unit).
pub trait SimTime: Copy + Ord + fmt::Debug + Send + Sync + 'static {
    /// The relative (duration) counterpart of this timestamp.
    type Duration: Copy + PartialOrd + fmt::Debug + Send + Sync + 'static;

    /// The origin of the timeline, used as the simulation time of a simulator
    /// that was never initialized.
    const ORIGIN: Self;

    /// Returns the timestamp shifted forward by `duration`.
    ///
    /// Integer representations saturate at the bounds of their range.
    fn add_duration(self, duration: Self::Duration) -> Self;

    /// Returns the duration elapsed from `earlier` to `self`.
    ///
    /// Representations that cannot express negative durations return the zero
    /// duration when `earlier` lies in the future of `self`.
    fn duration_since(self, earlier: Self) -> Self::Duration;

    /// Returns the null duration.
    fn zero_duration() -> Self::Duration;

    /// Converts a duration to a number of time units, for wall-clock pacing.
    fn duration_as_secs_f64(duration: Self::Duration) -> f64;
}

/// A double-precision floating-point timestamp.
///
/// Timestamps are totally ordered following the IEEE 754 `totalOrder`
/// predicate, so that a `NaN` sorts after all other values rather than
/// corrupting the ordering of an event list. Unlike `totalOrder`, the two
/// zeros compare equal.
#[derive(Copy, Clone, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct DoubleTime(pub f64);

impl DoubleTime {
    /// The origin of the timeline.
    pub const ZERO: Self = Self(0.0);

    /// Creates a new timestamp.
    pub const fn new(t: f64) -> Self {
        Self(t)
    }

    /// Returns the raw value of the timestamp.
    pub const fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for DoubleTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DoubleTime {}

impl PartialOrd for DoubleTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DoubleTime {
    fn cmp(&self, other: &Self) -> Ordering {
        // Adding a positive zero maps `-0.0` to `0.0`.
        (self.0 + 0.0).total_cmp(&(other.0 + 0.0))
    }
}

impl fmt::Debug for DoubleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for DoubleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<f64> for DoubleTime {
    fn from(t: f64) -> Self {
        Self(t)
    }
}

impl SimTime for DoubleTime {
    type Duration = f64;

    const ORIGIN: Self = Self::ZERO;

    fn add_duration(self, duration: f64) -> Self {
        Self(self.0 + duration)
    }
    fn duration_since(self, earlier: Self) -> f64 {
        self.0 - earlier.0
    }
    fn zero_duration() -> f64 {
        0.0
    }
    fn duration_as_secs_f64(duration: f64) -> f64 {
        duration
    }
}

/// A single-precision floating-point timestamp.
///
/// See [`DoubleTime`] for the ordering of special values.
#[derive(Copy, Clone, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct FloatTime(pub f32);

impl FloatTime {
    /// The origin of the timeline.
    pub const ZERO: Self = Self(0.0);

    /// Creates a new timestamp.
    pub const fn new(t: f32) -> Self {
        Self(t)
    }

    /// Returns the raw value of the timestamp.
    pub const fn get(self) -> f32 {
        self.0
    }
}

impl PartialEq for FloatTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloatTime {}

impl PartialOrd for FloatTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatTime {
    fn cmp(&self, other: &Self) -> Ordering {
        // Adding a positive zero maps `-0.0` to `0.0`.
        (self.0 + 0.0).total_cmp(&(other.0 + 0.0))
    }
}

impl fmt::Debug for FloatTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for FloatTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<f32> for FloatTime {
    fn from(t: f32) -> Self {
        Self(t)
    }
}

impl SimTime for FloatTime {
    type Duration = f32;

    const ORIGIN: Self = Self::ZERO;

    fn add_duration(self, duration: f32) -> Self {
        Self(self.0 + duration)
    }
    fn duration_since(self, earlier: Self) -> f32 {
        self.0 - earlier.0
    }
    fn zero_duration() -> f32 {
        0.0
    }
    fn duration_as_secs_f64(duration: f32) -> f64 {
        duration as f64
    }
}

impl SimTime for i64 {
    type Duration = i64;

    const ORIGIN: Self = 0;

    fn add_duration(self, duration: i64) -> Self {
        self.saturating_add(duration)
    }
    fn duration_since(self, earlier: Self) -> i64 {
        self.saturating_sub(earlier)
    }
    fn zero_duration() -> i64 {
        0
    }
    fn duration_as_secs_f64(duration: i64) -> f64 {
        duration as f64
    }
}

impl SimTime for u64 {
    type Duration = u64;

    const ORIGIN: Self = 0;

    fn add_duration(self, duration: u64) -> Self {
        self.saturating_add(duration)
    }
    fn duration_since(self, earlier: Self) -> u64 {
        self.saturating_sub(earlier)
    }
    fn zero_duration() -> u64 {
        0
    }
    fn duration_as_secs_f64(duration: u64) -> f64 {
        duration as f64
    }
}

impl SimTime for MonotonicTime {
    type Duration = Duration;

    const ORIGIN: Self = MonotonicTime::EPOCH;

    fn add_duration(self, duration: Duration) -> Self {
        self + duration
    }
    fn duration_since(self, earlier: Self) -> Duration {
        if earlier <= self {
            MonotonicTime::duration_since(self, earlier)
        } else {
            Duration::ZERO
        }
    }
    fn zero_duration() -> Duration {
        Duration::ZERO
    }
    fn duration_as_secs_f64(duration: Duration) -> f64 {
        duration.as_secs_f64()
    }
}
