use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam_utils::thread;
use thiserror::Error;
use tracing::{info, info_span};

use crate::model::Model;
use crate::simulation::{ExecutionError, SimInit, SimState};
use crate::time::{Clock, SimTime};

use super::{Replication, ReplicationConfig, ReplicationError};

/// Configuration of an [`Experiment`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(bound(
        serialize = "T: serde::Serialize, T::Duration: serde::Serialize",
        deserialize = "T: serde::Deserialize<'de>, T::Duration: serde::Deserialize<'de>"
    ))
)]
pub struct ExperimentConfig<T: SimTime> {
    /// Template of the replications.
    ///
    /// Replication `i` is named after the template with a `#i` suffix and its
    /// random streams are positioned on ChaCha stream `i`.
    pub replication: ReplicationConfig<T>,
    /// Number of replications.
    pub replications: usize,
}

/// Summary of a completed replication.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(bound(
        serialize = "T: serde::Serialize",
        deserialize = "T: serde::Deserialize<'de>"
    ))
)]
pub struct ReplicationReport<T: SimTime> {
    /// Index of the replication within the experiment.
    pub index: usize,
    /// Name of the replication.
    pub name: String,
    /// Simulation time when the run loop exited.
    pub final_time: T,
    /// State when the run loop exited.
    pub state: SimState,
    /// Number of events whose action was executed.
    pub events_executed: u64,
    /// Number of actions that returned an error or panicked.
    pub action_failures: u64,
}

type ClockFactory<T> = Box<dyn Fn(usize) -> Box<dyn Clock<T>> + Send + Sync>;

/// A set of replications of the same model.
///
/// Each replication runs on its own simulator, with a fresh model obtained from
/// the model factory; only the configuration and the factories are shared
/// between replications. Since the random streams of replication `i` only
/// depend on the configured seeds and on `i`, the outcome of an experiment does
/// not depend on whether it runs sequentially or in parallel.
pub struct Experiment<T: SimTime, F> {
    config: ExperimentConfig<T>,
    model_factory: F,
    clock_factory: Option<ClockFactory<T>>,
}

impl<T, F, M> Experiment<T, F>
where
    T: SimTime,
    F: Fn(usize) -> M + Sync,
    M: Model<T>,
{
    /// Creates an experiment whose replications run as fast as possible.
    ///
    /// The model factory is called with the index of each replication.
    pub fn new(config: ExperimentConfig<T>, model_factory: F) -> Self {
        Self {
            config,
            model_factory,
            clock_factory: None,
        }
    }

    /// Sets a factory for the clocks of the replications.
    pub fn with_clock<C, G>(mut self, clock_factory: G) -> Self
    where
        C: Clock<T> + 'static,
        G: Fn(usize) -> C + Send + Sync + 'static,
    {
        let clock_factory: ClockFactory<T> =
            Box::new(move |index| Box::new(clock_factory(index)) as Box<dyn Clock<T>>);
        self.clock_factory = Some(clock_factory);

        self
    }

    /// Returns the configuration of the experiment.
    pub fn config(&self) -> &ExperimentConfig<T> {
        &self.config
    }

    /// Returns the replication with the specified index.
    pub fn replication(&self, index: usize) -> Result<Replication<T>, ReplicationError> {
        let template = &self.config.replication;
        let config = ReplicationConfig {
            name: format!("{}#{}", template.name, index),
            ..template.clone()
        };

        Ok(Replication::from_config(&config)?.with_stream_index(index as u64))
    }

    /// Runs all replications one after the other on the calling thread.
    ///
    /// The reports are returned in replication order. The first error aborts
    /// the experiment.
    pub fn run_sequential(&self) -> Result<Vec<ReplicationReport<T>>, ExperimentError<T>> {
        (0..self.config.replications)
            .map(|index| self.run_replication(index))
            .collect()
    }

    /// Runs all replications on as many threads as there are logical CPUs.
    ///
    /// See [`run_parallel_with()`](Self::run_parallel_with).
    pub fn run_parallel(&self) -> Result<Vec<ReplicationReport<T>>, ExperimentError<T>> {
        self.run_parallel_with(num_cpus::get())
    }

    /// Runs all replications on the specified number of threads.
    ///
    /// The reports are returned in replication order. If several replications
    /// fail, the error of the replication with the lowest index is returned.
    ///
    /// # Panics
    ///
    /// A panic of the model factory is propagated to the caller once all
    /// threads have completed.
    pub fn run_parallel_with(
        &self,
        num_threads: usize,
    ) -> Result<Vec<ReplicationReport<T>>, ExperimentError<T>> {
        let count = self.config.replications;
        let num_threads = num_threads.clamp(1, count.max(1));
        let next_index = AtomicUsize::new(0);
        let results: Mutex<Vec<Option<Result<ReplicationReport<T>, ExperimentError<T>>>>> =
            Mutex::new((0..count).map(|_| None).collect());

        let scope = thread::scope(|s| {
            for _ in 0..num_threads {
                s.spawn(|_| loop {
                    let index = next_index.fetch_add(1, Ordering::Relaxed);
                    if index >= count {
                        break;
                    }
                    let result = self.run_replication(index);
                    results.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(result);
                });
            }
        });
        if let Err(payload) = scope {
            panic::resume_unwind(payload);
        }

        results
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .flatten()
            .collect()
    }

    /// Builds, initializes and runs one replication.
    fn run_replication(&self, index: usize) -> Result<ReplicationReport<T>, ExperimentError<T>> {
        let span = info_span!("replication", index);
        let _enter = span.enter();

        let replication = self
            .replication(index)
            .map_err(|source| ExperimentError::Replication { index, source })?;
        let name = replication.name().to_owned();

        let mut init = SimInit::new();
        if let Some(clock_factory) = &self.clock_factory {
            init = init.set_boxed_clock(clock_factory(index));
        }
        let simulator = init.build();
        let mut model = (self.model_factory)(index);

        let state = simulator
            .initialize(replication, &mut model)
            .and_then(|_| simulator.run())
            .map_err(|source| ExperimentError::Execution { index, source })?;

        let stats = simulator.stats();
        let report = ReplicationReport {
            index,
            name,
            final_time: simulator.time(),
            state,
            events_executed: stats.events_executed,
            action_failures: stats.action_failures,
        };
        info!(
            final_time = ?report.final_time,
            events = report.events_executed,
            failures = report.action_failures,
            "replication completed"
        );

        Ok(report)
    }
}

impl<T: SimTime, F> fmt::Debug for Experiment<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("config", &self.config)
            .field("real_time", &self.clock_factory.is_some())
            .finish_non_exhaustive()
    }
}

/// An error returned when a replication of an experiment fails.
#[derive(Debug, Error)]
pub enum ExperimentError<T: SimTime> {
    /// The replication is ill-defined.
    #[error("replication {index} is ill-defined")]
    Replication {
        /// Index of the replication.
        index: usize,
        /// The configuration error.
        #[source]
        source: ReplicationError,
    },
    /// The replication could not be initialized or run.
    #[error("replication {index} failed")]
    Execution {
        /// Index of the replication.
        index: usize,
        /// The execution error.
        #[source]
        source: ExecutionError<T>,
    },
}

impl<T: SimTime> ExperimentError<T> {
    /// Returns the index of the failed replication.
    pub fn index(&self) -> usize {
        match self {
            Self::Replication { index, .. } | Self::Execution { index, .. } => *index,
        }
    }
}
