//! Example: single-server queue replicated in parallel.
//!
//! This example demonstrates in particular:
//!
//! * a model implemented as a struct sharing its state with its actions,
//! * the reset of statistics at the end of the warm-up period,
//! * parallel replications with independent random streams.
//!
//! ```text
//!                  ┌─────────┐      ┌──────────┐
//! Arrivals ●──────►│  Queue  ├─────►│  Server  ├──────► Departures
//!                  └─────────┘      └──────────┘
//! ```
use std::error::Error;
use std::sync::{Arc, Mutex};

use rand::Rng;

use descore::model::Model;
use descore::replication::{Experiment, ExperimentConfig, ReplicationConfig, StreamConfig};
use descore::simulation::{BoxError, NotificationKind, Simulator, NORMAL_PRIORITY};
use descore::time::DoubleTime;

/// Mean inter-arrival time.
const MEAN_INTER_ARRIVAL: f64 = 1.0;
/// Mean service time.
const MEAN_SERVICE: f64 = 0.8;

/// Statistics collected after the warm-up period.
#[derive(Default)]
struct Counters {
    served: u64,
    total_wait: f64,
}

/// State of the station.
#[derive(Default)]
struct Station {
    queue: Vec<DoubleTime>,
    busy: bool,
    counters: Counters,
}

type SharedStation = Arc<Mutex<Station>>;

/// Draws an exponentially distributed duration from the named stream.
fn exponential(sim: &Simulator<DoubleTime>, stream: &str, mean: f64) -> Result<f64, BoxError> {
    let mut rng = sim
        .stream(stream)
        .ok_or_else(|| format!("unknown stream `{stream}`"))?;

    Ok(-mean * (1.0 - rng.gen::<f64>()).ln())
}

/// Single-server queue.
struct SingleServerQueue {
    station: SharedStation,
}

impl SingleServerQueue {
    fn arrival(sim: &Simulator<DoubleTime>, station: SharedStation) -> Result<(), BoxError> {
        let start_service = {
            let mut st = station.lock().unwrap();
            st.queue.push(sim.time());
            !std::mem::replace(&mut st.busy, true)
        };
        if start_service {
            Self::start_service(sim, station.clone())?;
        }

        let gap = exponential(sim, "arrivals", MEAN_INTER_ARRIVAL)?;
        sim.schedule_event_in(gap, NORMAL_PRIORITY, move |sim| {
            Self::arrival(sim, station)
        })?;

        Ok(())
    }

    fn start_service(sim: &Simulator<DoubleTime>, station: SharedStation) -> Result<(), BoxError> {
        {
            let mut st = station.lock().unwrap();
            let arrival = st.queue.remove(0);
            st.counters.served += 1;
            st.counters.total_wait += sim.time().get() - arrival.get();
        }

        let duration = exponential(sim, "services", MEAN_SERVICE)?;
        sim.schedule_event_in(duration, NORMAL_PRIORITY, move |sim| {
            Self::departure(sim, station)
        })?;

        Ok(())
    }

    fn departure(sim: &Simulator<DoubleTime>, station: SharedStation) -> Result<(), BoxError> {
        let next = {
            let mut st = station.lock().unwrap();
            st.busy = !st.queue.is_empty();
            st.busy
        };
        if next {
            Self::start_service(sim, station)?;
        }

        Ok(())
    }
}

impl Model<DoubleTime> for SingleServerQueue {
    fn construct(&mut self, sim: &Simulator<DoubleTime>) -> Result<(), BoxError> {
        // Discard the statistics of the transient phase.
        let station = self.station.clone();
        sim.subscribe(NotificationKind::WarmupReached, move |_| {
            station.lock().unwrap().counters = Counters::default();
        });

        let station = self.station.clone();
        sim.schedule_event_now(NORMAL_PRIORITY, move |sim| {
            Self::arrival(sim, station)
        })?;

        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // -------------------
    // Experiment set-up.
    // -------------------

    let config = ExperimentConfig {
        replication: ReplicationConfig {
            name: String::from("M/M/1"),
            start_time: DoubleTime(0.0),
            warmup_period: 1_000.0,
            run_length: 20_000.0,
            streams: vec![
                StreamConfig {
                    name: String::from("arrivals"),
                    seed: 1,
                },
                StreamConfig {
                    name: String::from("services"),
                    seed: 2,
                },
            ],
        },
        replications: 8,
    };

    // One station per replication, kept aside to read the statistics back.
    let stations: Vec<SharedStation> = (0..config.replications)
        .map(|_| SharedStation::default())
        .collect();

    let experiment = Experiment::new(config, |index| SingleServerQueue {
        station: stations[index].clone(),
    });

    // ----------
    // Execution.
    // ----------

    let reports = experiment.run_parallel()?;

    // --------
    // Results.
    // --------

    // Theoretical mean wait in queue: rho / (mu - lambda).
    let rho = MEAN_SERVICE / MEAN_INTER_ARRIVAL;
    let expected_wait = rho * MEAN_SERVICE / (1.0 - rho);

    let mut grand_mean = 0.0;
    for (report, station) in reports.iter().zip(&stations) {
        let st = station.lock().unwrap();
        let mean_wait = st.counters.total_wait / st.counters.served as f64;
        grand_mean += mean_wait / reports.len() as f64;
        println!(
            "{}: {} events, {} customers served after warm-up, mean wait {:.3}",
            report.name, report.events_executed, st.counters.served, mean_wait
        );
    }
    println!("mean wait over all replications: {grand_mean:.3} (theory: {expected_wait:.3})");

    assert!((grand_mean - expected_wait).abs() < 0.5 * expected_wait);

    Ok(())
}
