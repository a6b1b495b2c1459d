//! Delivery of lifecycle notifications to observers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use descore::replication::Replication;
use descore::simulation::{
    Notification, NotificationKind, NotificationKinds, SimState, Simulator, NORMAL_PRIORITY,
};
use descore::time::DoubleTime;

type Log = Arc<Mutex<Vec<(NotificationKind, f64)>>>;

// Subscribes an observer logging the kind and time of the specified
// notification kinds.
fn observe(simulator: &Simulator<DoubleTime>, kinds: impl Into<NotificationKinds>) -> Log {
    let log = Log::default();

    let sink = log.clone();
    simulator.subscribe(kinds, move |notification| {
        let time = match notification {
            Notification::StartOfReplication { time }
            | Notification::WarmupReached { time }
            | Notification::TimeChanged { time, .. }
            | Notification::Stop { time }
            | Notification::EndOfReplication { time } => *time,
            Notification::ActionFailed(error) => error.time,
        };
        sink.lock().unwrap().push((notification.kind(), time.get()));
    });

    log
}

fn schedule_at(times: &'static [f64]) -> impl FnMut(&Simulator<DoubleTime>) {
    move |sim| {
        for &t in times {
            sim.schedule_event(DoubleTime(t), NORMAL_PRIORITY, |_| {})
                .unwrap();
        }
    }
}

#[test]
fn notifications_of_a_replication() {
    use NotificationKind::*;

    let simulator = Simulator::new();
    let log = observe(&simulator, NotificationKinds::ALL);

    simulator
        .initialize(
            Replication::new("notified", DoubleTime(0.0), 2.0, 10.0).unwrap(),
            &mut schedule_at(&[1.0, 3.0, 3.0, 12.0]),
        )
        .unwrap();
    assert_eq!(simulator.run().unwrap(), SimState::Ended);

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            (StartOfReplication, 0.0),
            (TimeChanged, 1.0),
            (TimeChanged, 2.0),
            (WarmupReached, 2.0),
            // Two events at the same time yield a single time change.
            (TimeChanged, 3.0),
            (TimeChanged, 10.0),
            (EndOfReplication, 10.0),
        ]
    );
}

#[test]
fn warmup_precedes_events_at_the_boundary() {
    let simulator = Simulator::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let observed = order.clone();
    simulator.subscribe(NotificationKind::WarmupReached, move |_| {
        observed.lock().unwrap().push("warm-up")
    });
    let executed = order.clone();
    simulator
        .initialize(
            Replication::new("boundary", DoubleTime(0.0), 5.0, 10.0).unwrap(),
            &mut |sim: &Simulator<DoubleTime>| {
                let executed = executed.clone();
                sim.schedule_event(DoubleTime(5.0), NORMAL_PRIORITY, move |_| {
                    executed.lock().unwrap().push("event")
                })
                .unwrap();
            },
        )
        .unwrap();

    simulator.run().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["warm-up", "event"]);
}

#[test]
fn stop_and_resume() {
    use NotificationKind::*;

    let simulator = Simulator::new();
    let log = observe(&simulator, StartOfReplication | Stop | EndOfReplication);

    simulator
        .initialize(
            Replication::new("paused", DoubleTime(0.0), 0.0, 10.0).unwrap(),
            &mut schedule_at(&[4.0, 8.0]),
        )
        .unwrap();

    assert_eq!(simulator.run_up_to(DoubleTime(5.0)).unwrap(), SimState::Stopped);
    assert_eq!(simulator.step().unwrap(), SimState::Stopped);
    assert_eq!(simulator.run().unwrap(), SimState::Ended);

    // The start of the replication is only notified once.
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            (StartOfReplication, 0.0),
            (Stop, 5.0),
            (Stop, 8.0),
            // The event list ran dry before the end of the run length.
            (EndOfReplication, 8.0),
        ]
    );
}

#[test]
fn failed_actions_are_notified() {
    let simulator = Simulator::new();
    let failures = Arc::new(Mutex::new(Vec::new()));

    let sink = failures.clone();
    simulator.subscribe(NotificationKind::ActionFailed, move |notification| {
        if let Notification::ActionFailed(error) = notification {
            sink.lock().unwrap().push((
                error.time,
                error.to_string(),
                error.panic_message().map(str::to_owned),
            ));
        }
    });

    simulator
        .initialize(
            Replication::new("faulty", DoubleTime(0.0), 0.0, 10.0).unwrap(),
            &mut |sim: &Simulator<DoubleTime>| {
                sim.schedule_event(DoubleTime(1.0), NORMAL_PRIORITY, |_| {
                    Err::<(), _>("out of stock")
                })
                .unwrap();
                sim.schedule_event(DoubleTime(2.0), NORMAL_PRIORITY, |_| -> () {
                    panic!("conveyor jammed")
                })
                .unwrap();
                sim.schedule_event(DoubleTime(3.0), NORMAL_PRIORITY, |_| {})
                    .unwrap();
            },
        )
        .unwrap();

    // Failed actions do not abort the run.
    assert_eq!(simulator.run().unwrap(), SimState::Ended);
    assert_eq!(simulator.time(), DoubleTime(3.0));

    let stats = simulator.stats();
    assert_eq!(stats.events_executed, 3);
    assert_eq!(stats.action_failures, 2);

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].0, DoubleTime(1.0));
    assert!(failures[0].1.contains("out of stock"));
    assert_eq!(failures[0].2, None);
    assert_eq!(failures[1].0, DoubleTime(2.0));
    assert_eq!(failures[1].2.as_deref(), Some("conveyor jammed"));
}

#[test]
fn subscriptions() {
    let simulator = Simulator::new();
    let all = Arc::new(AtomicUsize::new(0));
    let ends = Arc::new(AtomicUsize::new(0));

    let counter = all.clone();
    let id = simulator.subscribe(NotificationKinds::ALL, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    let counter = ends.clone();
    simulator.subscribe(NotificationKind::EndOfReplication, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    assert!(simulator.unsubscribe(id));
    assert!(!simulator.unsubscribe(id));

    simulator
        .initialize(
            Replication::new("filtered", DoubleTime(0.0), 0.0, 10.0).unwrap(),
            &mut schedule_at(&[1.0, 2.0]),
        )
        .unwrap();
    simulator.run().unwrap();

    assert_eq!(all.load(Ordering::Relaxed), 0);
    assert_eq!(ends.load(Ordering::Relaxed), 1);
}

#[test]
fn panicking_observer_is_isolated() {
    let simulator = Simulator::new();
    let delivered = Arc::new(AtomicUsize::new(0));

    simulator.subscribe(NotificationKind::TimeChanged, |_| panic!("faulty observer"));
    let counter = delivered.clone();
    simulator.subscribe(NotificationKind::TimeChanged, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    simulator
        .initialize(
            Replication::new("isolated", DoubleTime(0.0), 0.0, 10.0).unwrap(),
            &mut schedule_at(&[1.0, 2.0]),
        )
        .unwrap();

    assert_eq!(simulator.run().unwrap(), SimState::Ended);
    assert_eq!(delivered.load(Ordering::Relaxed), 2);
    assert_eq!(simulator.stats().action_failures, 0);
}

#[test]
fn observers_can_schedule_events() {
    let simulator = Simulator::new();
    let executed = Arc::new(AtomicUsize::new(0));

    let handle = simulator.clone();
    let counter = executed.clone();
    let id = simulator.subscribe(NotificationKind::WarmupReached, move |_| {
        let counter = counter.clone();
        handle
            .schedule_event_now(NORMAL_PRIORITY, move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
    });

    simulator
        .initialize(
            Replication::new("reactive", DoubleTime(0.0), 3.0, 10.0).unwrap(),
            &mut schedule_at(&[5.0]),
        )
        .unwrap();
    simulator.run().unwrap();

    assert_eq!(executed.load(Ordering::Relaxed), 1);
    assert_eq!(simulator.stats().events_executed, 2);
    simulator.unsubscribe(id);
}

#[test]
fn unsubscribe_from_an_observer() {
    let simulator = Simulator::new();
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    let removed = simulator.subscribe(NotificationKinds::ALL, |_| {});
    assert!(simulator.unsubscribe(removed));

    let handle = simulator.clone();
    let sink = outcomes.clone();
    let id = simulator.subscribe(NotificationKind::EndOfReplication, move |_| {
        let mut outcomes = sink.lock().unwrap();
        outcomes.push(handle.unsubscribe(removed));
    });
    let handle = simulator.clone();
    let sink = outcomes.clone();
    simulator.subscribe(NotificationKind::EndOfReplication, move |_| {
        let mut outcomes = sink.lock().unwrap();
        outcomes.push(handle.unsubscribe(id));
        outcomes.push(handle.unsubscribe(id));
    });

    simulator
        .initialize(
            Replication::new("unsubscribed", DoubleTime(0.0), 0.0, 10.0).unwrap(),
            &mut schedule_at(&[1.0]),
        )
        .unwrap();
    simulator.run().unwrap();

    // An observer removed before delivery is not registered anymore.
    assert_eq!(*outcomes.lock().unwrap(), vec![false, true, false]);
    assert!(!simulator.unsubscribe(id));
}
