//! Replications and experiments.
//!
//! A [`Replication`] describes one run of a model: the time window of the run
//! (start time, warm-up period and run length) and the named
//! [`RandomStream`]s the model draws from. A replication is bound to a
//! simulator by [`Simulator::initialize()`](crate::simulation::Simulator::initialize).
//!
//! An [`Experiment`] runs several replications of the same model, each on its
//! own simulator, either sequentially or in parallel. Replication `i` of an
//! experiment positions all its random streams on ChaCha stream `i`, so that
//! the replications are statistically independent and any of them can be
//! reproduced in isolation.
//!
//! # Examples
//!
//! ```
//! use descore::replication::{ExperimentConfig, Experiment, ReplicationConfig, StreamConfig};
//! use descore::simulation::{Simulator, NORMAL_PRIORITY};
//! use descore::time::DoubleTime;
//!
//! let config = ExperimentConfig {
//!     replication: ReplicationConfig {
//!         name: String::from("arrivals"),
//!         start_time: DoubleTime(0.0),
//!         warmup_period: 0.0,
//!         run_length: 100.0,
//!         streams: vec![StreamConfig { name: String::from("gaps"), seed: 7 }],
//!     },
//!     replications: 4,
//! };
//!
//! let experiment = Experiment::new(config, |_index| {
//!     |sim: &Simulator<DoubleTime>| {
//!         sim.schedule_event(DoubleTime(10.0), NORMAL_PRIORITY, |_| {})
//!             .map(|_| ())
//!     }
//! });
//!
//! let reports = experiment.run_sequential().unwrap();
//! assert_eq!(reports.len(), 4);
//! assert!(reports.iter().all(|report| report.events_executed == 1));
//! ```
mod experiment;
mod streams;

pub use experiment::{Experiment, ExperimentConfig, ExperimentError, ReplicationReport};
pub use streams::RandomStream;

use std::fmt;

use thiserror::Error;

use crate::time::SimTime;

/// The time window and random streams of a simulation run.
pub struct Replication<T: SimTime> {
    name: String,
    start_time: T,
    warmup_period: T::Duration,
    run_length: T::Duration,
    stream_index: u64,
    streams: Vec<RandomStream>,
}

impl<T: SimTime> Replication<T> {
    /// Creates a replication without random streams.
    ///
    /// An error is returned if the warm-up period or the run length is
    /// negative or not comparable (such as a `NaN`), or if the warm-up period
    /// exceeds the run length.
    pub fn new(
        name: impl Into<String>,
        start_time: T,
        warmup_period: T::Duration,
        run_length: T::Duration,
    ) -> Result<Self, ReplicationError> {
        let zero = T::zero_duration();

        // Negated comparisons so that incomparable values are rejected too.
        if !(warmup_period >= zero) {
            return Err(ReplicationError::InvalidWarmupPeriod);
        }
        if !(run_length >= zero) {
            return Err(ReplicationError::InvalidRunLength);
        }
        if !(warmup_period <= run_length) {
            return Err(ReplicationError::WarmupExceedsRunLength);
        }

        Ok(Self {
            name: name.into(),
            start_time,
            warmup_period,
            run_length,
            stream_index: 0,
            streams: Vec::new(),
        })
    }

    /// Creates a replication from its configuration.
    pub fn from_config(config: &ReplicationConfig<T>) -> Result<Self, ReplicationError> {
        let mut replication = Self::new(
            config.name.clone(),
            config.start_time,
            config.warmup_period,
            config.run_length,
        )?;
        for stream in &config.streams {
            replication = replication.with_stream(stream.name.clone(), stream.seed)?;
        }

        Ok(replication)
    }

    /// Adds a named random stream.
    ///
    /// An error is returned if a stream with the same name already exists.
    pub fn with_stream(
        mut self,
        name: impl Into<String>,
        seed: u64,
    ) -> Result<Self, ReplicationError> {
        let name = name.into();
        if self.stream(&name).is_some() {
            return Err(ReplicationError::DuplicateStream { name });
        }
        self.streams
            .push(RandomStream::new(name, seed, self.stream_index));

        Ok(self)
    }

    /// Positions all random streams, including those added later, on the
    /// specified ChaCha stream.
    pub fn with_stream_index(mut self, stream_index: u64) -> Self {
        self.stream_index = stream_index;
        self.streams = self
            .streams
            .iter()
            .map(|stream| RandomStream::new(stream.name(), stream.seed(), stream_index))
            .collect();

        self
    }

    /// Returns the name of the replication.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the start time.
    pub fn start_time(&self) -> T {
        self.start_time
    }

    /// Returns the warm-up period.
    pub fn warmup_period(&self) -> T::Duration {
        self.warmup_period
    }

    /// Returns the run length.
    pub fn run_length(&self) -> T::Duration {
        self.run_length
    }

    /// Returns the time at which the warm-up period elapses.
    pub fn warmup_time(&self) -> T {
        self.start_time.add_duration(self.warmup_period)
    }

    /// Returns the time at which the replication ends.
    pub fn end_time(&self) -> T {
        self.start_time.add_duration(self.run_length)
    }

    /// Returns the ChaCha stream index of the random streams.
    pub fn stream_index(&self) -> u64 {
        self.stream_index
    }

    /// Returns the named random stream.
    pub fn stream(&self, name: &str) -> Option<&RandomStream> {
        self.streams.iter().find(|stream| stream.name() == name)
    }

    /// Returns an iterator over all random streams.
    pub fn streams(&self) -> impl Iterator<Item = &RandomStream> {
        self.streams.iter()
    }

    /// Rewinds all random streams.
    pub(crate) fn reset_streams(&self) {
        for stream in &self.streams {
            stream.reset();
        }
    }
}

impl<T: SimTime> fmt::Debug for Replication<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replication")
            .field("name", &self.name)
            .field("start_time", &self.start_time)
            .field("warmup_period", &self.warmup_period)
            .field("run_length", &self.run_length)
            .field("stream_index", &self.stream_index)
            .field("streams", &self.streams)
            .finish()
    }
}

/// Configuration of a [`Replication`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(bound(
        serialize = "T: serde::Serialize, T::Duration: serde::Serialize",
        deserialize = "T: serde::Deserialize<'de>, T::Duration: serde::Deserialize<'de>"
    ))
)]
pub struct ReplicationConfig<T: SimTime> {
    /// Name of the replication.
    pub name: String,
    /// Start time.
    pub start_time: T,
    /// Warm-up period.
    pub warmup_period: T::Duration,
    /// Run length.
    pub run_length: T::Duration,
    /// Random streams.
    #[cfg_attr(feature = "serde", serde(default))]
    pub streams: Vec<StreamConfig>,
}

/// Configuration of a [`RandomStream`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamConfig {
    /// Name of the stream, unique within a replication.
    pub name: String,
    /// Seed of the stream.
    pub seed: u64,
}

/// An error returned when a replication is ill-defined.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// The warm-up period is negative or not a number.
    #[error("the warm-up period must be a non-negative duration")]
    InvalidWarmupPeriod,
    /// The run length is negative or not a number.
    #[error("the run length must be a non-negative duration")]
    InvalidRunLength,
    /// The warm-up period is longer than the run length.
    #[error("the warm-up period exceeds the run length")]
    WarmupExceedsRunLength,
    /// Two random streams have the same name.
    #[error("the random stream `{name}` is defined more than once")]
    DuplicateStream {
        /// Name of the stream.
        name: String,
    },
}
