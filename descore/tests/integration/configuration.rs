//! Serialization of experiment configurations and reports.

use descore::replication::{
    Experiment, ExperimentConfig, Replication, ReplicationConfig, ReplicationReport,
};
use descore::simulation::{Simulator, NORMAL_PRIORITY};
use descore::time::DoubleTime;

#[test]
fn experiment_from_json() {
    let json = r#"{
        "replication": {
            "name": "line",
            "start_time": 0.0,
            "warmup_period": 5.0,
            "run_length": 50.0,
            "streams": [{ "name": "failures", "seed": 17 }]
        },
        "replications": 3
    }"#;

    let config: ExperimentConfig<DoubleTime> = serde_json::from_str(json).unwrap();
    assert_eq!(config.replications, 3);
    assert_eq!(config.replication.start_time, DoubleTime(0.0));
    assert_eq!(config.replication.streams[0].seed, 17);

    let experiment = Experiment::new(config, |_| {
        |sim: &Simulator<DoubleTime>| {
            sim.schedule_event(DoubleTime(20.0), NORMAL_PRIORITY, |_| {})
                .map(|_| ())
        }
    });
    let reports = experiment.run_sequential().unwrap();
    assert_eq!(reports.len(), 3);

    // Reports can be exported and read back.
    let exported = serde_json::to_string(&reports).unwrap();
    let imported: Vec<ReplicationReport<DoubleTime>> = serde_json::from_str(&exported).unwrap();
    assert_eq!(imported, reports);
}

#[test]
fn streams_are_optional() {
    let json = r#"{ "name": "plain", "start_time": 10, "warmup_period": 0, "run_length": 100 }"#;

    let config: ReplicationConfig<u64> = serde_json::from_str(json).unwrap();
    assert!(config.streams.is_empty());

    let replication = Replication::from_config(&config).unwrap();
    assert_eq!(replication.end_time(), 110);
    assert_eq!(replication.streams().count(), 0);
}

#[test]
fn invalid_configuration_is_rejected_on_use() {
    let json = r#"{ "name": "odd", "start_time": 0.0, "warmup_period": 20.0, "run_length": 10.0 }"#;

    let config: ReplicationConfig<DoubleTime> = serde_json::from_str(json).unwrap();
    assert!(Replication::from_config(&config).is_err());
}
