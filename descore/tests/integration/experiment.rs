//! Sequential and parallel replications of a stochastic model.

use rand::Rng;

use descore::replication::{Experiment, ExperimentConfig, ReplicationConfig, StreamConfig};
use descore::simulation::{SimState, Simulator, NORMAL_PRIORITY};
use descore::time::{CatchUpPolicy, DoubleTime, RealTimeClock};

fn config(replications: usize) -> ExperimentConfig<DoubleTime> {
    ExperimentConfig {
        replication: ReplicationConfig {
            name: String::from("bank"),
            start_time: DoubleTime(0.0),
            warmup_period: 10.0,
            run_length: 200.0,
            streams: vec![
                StreamConfig {
                    name: String::from("arrivals"),
                    seed: 2024,
                },
                StreamConfig {
                    name: String::from("services"),
                    seed: 2025,
                },
            ],
        },
        replications,
    }
}

// Customers arrive at random and leave after a random service time.
fn arrival(sim: &Simulator<DoubleTime>) {
    let service: f64 = sim.stream("services").unwrap().gen_range(0.5..3.0);
    sim.schedule_event_in(service, NORMAL_PRIORITY, |_| {}).unwrap();

    let gap: f64 = sim.stream("arrivals").unwrap().gen_range(0.1..2.0);
    sim.schedule_event_in(gap, NORMAL_PRIORITY, arrival).unwrap();
}

fn bank(_index: usize) -> impl FnMut(&Simulator<DoubleTime>) {
    |sim: &Simulator<DoubleTime>| {
        sim.schedule_event_now(NORMAL_PRIORITY, arrival).unwrap();
    }
}

#[test]
fn experiment_is_reproducible() {
    let experiment = Experiment::new(config(8), bank);

    let first = experiment.run_sequential().unwrap();
    let second = experiment.run_sequential().unwrap();
    let parallel = experiment.run_parallel().unwrap();

    assert_eq!(first, second);
    assert_eq!(first, parallel);

    for (index, report) in first.iter().enumerate() {
        assert_eq!(report.index, index);
        assert_eq!(report.name, format!("bank#{index}"));
        assert_eq!(report.state, SimState::Ended);
        assert_eq!(report.final_time, DoubleTime(200.0));
        assert_eq!(report.action_failures, 0);
    }
}

#[test]
fn replication_reproduced_in_isolation() {
    let experiment = Experiment::new(config(4), bank);
    let reports = experiment.run_parallel_with(2).unwrap();

    let simulator = Simulator::new();
    simulator
        .initialize(experiment.replication(3).unwrap(), &mut bank(3))
        .unwrap();
    simulator.run().unwrap();

    assert_eq!(simulator.stats().events_executed, reports[3].events_executed);
    assert_eq!(simulator.time(), reports[3].final_time);
}

#[test]
fn experiment_with_clock() {
    let experiment = Experiment::new(config(3), bank)
        .with_clock(|_| RealTimeClock::new(f64::INFINITY, CatchUpPolicy::Drift));

    let paced = experiment.run_parallel_with(3).unwrap();
    let unpaced = Experiment::new(config(3), bank).run_sequential().unwrap();

    assert_eq!(paced, unpaced);
}
