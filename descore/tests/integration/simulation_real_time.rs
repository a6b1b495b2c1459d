//! Pacing against the wall clock and loss of synchronization.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use descore::replication::Replication;
use descore::simulation::{
    ExecutionError, NotificationKind, SimInit, SimState, Simulator, NORMAL_PRIORITY,
};
use descore::time::{CatchUpPolicy, Clock, DoubleTime, RealTimeClock};

// Builds a simulator at speed 1 where one time unit lasts one second, with
// no-op events at the specified times.
fn real_time_simulator(
    catch_up_policy: CatchUpPolicy,
    times: &[f64],
) -> Simulator<DoubleTime> {
    let simulator = SimInit::new()
        .set_clock(RealTimeClock::new(1.0, catch_up_policy))
        .build();
    simulator
        .initialize(
            Replication::new("real-time", DoubleTime(0.0), 0.0, 10.0).unwrap(),
            &mut |sim: &Simulator<DoubleTime>| {
                for &t in times {
                    sim.schedule_event(DoubleTime(t), NORMAL_PRIORITY, |_| {})
                        .unwrap();
                }
            },
        )
        .unwrap();

    simulator
}

// Returns an action recording the instant at which it is executed.
fn timestamp(slot: &Arc<Mutex<Option<Instant>>>) -> impl FnOnce(&Simulator<DoubleTime>) + Send {
    let slot = slot.clone();

    move |_| *slot.lock().unwrap() = Some(Instant::now())
}

#[test]
fn events_wait_for_their_deadline() {
    let executed = Arc::new(Mutex::new(None));
    let simulator = real_time_simulator(CatchUpPolicy::Drift, &[]);
    simulator
        .schedule_event(DoubleTime(0.2), NORMAL_PRIORITY, timestamp(&executed))
        .unwrap();

    let t0 = Instant::now();
    assert_eq!(simulator.run().unwrap(), SimState::Ended);

    let elapsed = executed.lock().unwrap().unwrap().duration_since(t0);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(400));
    // The exhausted event list does not wait for the end of the run length.
    assert!(t0.elapsed() < Duration::from_millis(600));
    assert_eq!(simulator.time(), DoubleTime(0.2));
    assert_eq!(simulator.drift().late_events, 0);
}

#[test]
fn speed_factor_and_time_unit() {
    let executed = Arc::new(Mutex::new(None));
    let clock = RealTimeClock::new(4.0, CatchUpPolicy::Drift)
        .with_time_unit(Duration::from_millis(100));
    let simulator = SimInit::new().set_clock(clock).build();

    let slot = executed.clone();
    simulator
        .initialize(
            Replication::new("fast", DoubleTime(0.0), 0.0, 10.0).unwrap(),
            &mut |sim: &Simulator<DoubleTime>| {
                sim.schedule_event(DoubleTime(2.0), NORMAL_PRIORITY, timestamp(&slot))
                    .unwrap();
            },
        )
        .unwrap();

    let t0 = Instant::now();
    simulator.run().unwrap();

    // 2 units of 100ms at 4 times real time.
    let elapsed = executed.lock().unwrap().unwrap().duration_since(t0);
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(250));
    assert_eq!(simulator.speed_factor(), Some(4.0));
}

#[test]
fn stop_interrupts_the_wait() {
    let simulator = real_time_simulator(CatchUpPolicy::Drift, &[0.5]);

    simulator.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    let t_stop = Instant::now();
    simulator.stop().unwrap();
    assert_eq!(simulator.join().unwrap(), SimState::Stopped);
    assert!(t_stop.elapsed() < Duration::from_millis(100));

    assert_eq!(simulator.time(), DoubleTime(0.0));
    assert_eq!(simulator.pending_events(), 1);
    assert_eq!(simulator.stats().events_executed, 0);

    // The clock is anchored anew when the run resumes.
    let t_resume = Instant::now();
    assert_eq!(simulator.run().unwrap(), SimState::Ended);
    assert!(t_resume.elapsed() >= Duration::from_millis(500));
    assert_eq!(simulator.time(), DoubleTime(0.5));
}

#[test]
fn earlier_event_interrupts_the_wait() {
    let executed = Arc::new(Mutex::new(None));
    let simulator = real_time_simulator(CatchUpPolicy::Drift, &[5.0]);

    let t0 = Instant::now();
    simulator.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    let slot = executed.clone();
    simulator
        .schedule_event(DoubleTime(0.1), NORMAL_PRIORITY, move |sim| {
            timestamp(&slot)(sim);
            sim.stop()
        })
        .unwrap();

    assert_eq!(simulator.join().unwrap(), SimState::Stopped);
    let elapsed = executed.lock().unwrap().unwrap().duration_since(t0);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1000));
    assert_eq!(simulator.time(), DoubleTime(0.1));
}

#[test]
fn speed_change_during_a_wait() {
    let simulator = real_time_simulator(CatchUpPolicy::Drift, &[1.0]);

    let t0 = Instant::now();
    simulator.start().unwrap();
    thread::sleep(Duration::from_millis(100));

    // The remaining 0.9 units now last 90ms.
    assert!(simulator.set_speed_factor(10.0));
    assert_eq!(simulator.join().unwrap(), SimState::Ended);

    let elapsed = t0.elapsed();
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(800));
    assert_eq!(simulator.speed_factor(), Some(10.0));

    assert!(!simulator.set_speed_factor(0.0));
    assert!(!simulator.set_speed_factor(f64::NAN));
    assert_eq!(simulator.speed_factor(), Some(10.0));
}

#[test]
fn pacing_after_leaving_infinite_speed() {
    let changed = Arc::new(Mutex::new(None));
    let executed = Arc::new(Mutex::new(None));
    let simulator = SimInit::new()
        .set_clock(RealTimeClock::new(f64::INFINITY, CatchUpPolicy::Drift))
        .build();

    simulator
        .initialize(
            Replication::new("unpaced", DoubleTime(0.0), 0.0, 100.0).unwrap(),
            &mut |sim: &Simulator<DoubleTime>| {
                let changed = changed.clone();
                sim.schedule_event(DoubleTime(50.0), NORMAL_PRIORITY, move |sim| {
                    sim.set_speed_factor(1.0);
                    *changed.lock().unwrap() = Some(Instant::now());
                })
                .unwrap();
                sim.schedule_event(DoubleTime(50.2), NORMAL_PRIORITY, timestamp(&executed))
                    .unwrap();
            },
        )
        .unwrap();

    simulator.start().unwrap();
    let t0 = Instant::now();
    while executed.lock().unwrap().is_none() && t0.elapsed() < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(10));
    }
    // The run has normally ended already.
    let _ = simulator.stop();
    simulator.join().unwrap();

    // The remaining 0.2 units are paced from the time of the speed change.
    let changed = changed.lock().unwrap().unwrap();
    let executed = executed
        .lock()
        .unwrap()
        .expect("the event following the speed change was not executed");
    let elapsed = executed.duration_since(changed);
    assert!(elapsed >= Duration::from_millis(190));
    assert!(elapsed < Duration::from_millis(1000));
    assert_eq!(simulator.time(), DoubleTime(50.2));
    assert_eq!(simulator.speed_factor(), Some(1.0));
}

#[test]
fn speed_factor_without_clock() {
    let simulator: Simulator<DoubleTime> = Simulator::new();

    assert!(!simulator.set_speed_factor(2.0));
    assert_eq!(simulator.speed_factor(), None);
}

// Schedules an action blocking for the specified duration at each tick, then
// runs the simulation with the specified catch-up policy.
//
// Returns the simulation time upon completion or when the error occurred, and
// the result of the run.
fn clock_sync(
    catch_up_policy: CatchUpPolicy,
    block_time_ms: u64,
    ticks_ms: &[u64],
) -> (Simulator<DoubleTime>, Result<SimState, ExecutionError<DoubleTime>>) {
    let block_time = Duration::from_millis(block_time_ms);
    let simulator = real_time_simulator(catch_up_policy, &[]);

    for tick_ms in ticks_ms {
        let tick = DoubleTime(*tick_ms as f64 / 1000.0);
        simulator
            .schedule_event(tick, NORMAL_PRIORITY, move |_| thread::sleep(block_time))
            .unwrap();
    }

    let res = simulator.run();

    (simulator, res)
}

#[test]
fn clock_sync_zero_tolerance() {
    // The fourth tick should fail for being ~50ms too late.
    const BLOCKING_MS: u64 = 100;
    const TICKS_MS: &[u64] = &[100, 250, 400, 450, 650];

    let policy = CatchUpPolicy::Abort {
        tolerance: Duration::ZERO,
    };
    let (simulator, res) = clock_sync(policy, BLOCKING_MS, TICKS_MS);

    if let Err(ExecutionError::TimingViolation(violation)) = res {
        assert_eq!(violation.time, DoubleTime(0.45));
        assert!(violation.lag > Duration::ZERO);
        assert_eq!(simulator.time(), DoubleTime(0.4));
        assert_eq!(simulator.state(), SimState::Stopped);
        assert_eq!(simulator.last_violation(), Some(violation));
        assert_eq!(simulator.pending_events(), 2);
    } else {
        panic!("loss of synchronization not observed");
    }
}

#[test]
fn clock_sync_with_tolerance() {
    // The third tick is ~50ms too late but should pass thanks to the tolerance.
    // The fifth tick should fail for being ~150ms too late, which is beyond the
    // 100ms tolerance.
    const BLOCKING_MS: u64 = 200;
    const CLOCK_TOLERANCE_MS: u64 = 100;
    const TICKS_MS: &[u64] = &[100, 350, 500, 800, 850, 1250];

    let policy = CatchUpPolicy::Abort {
        tolerance: Duration::from_millis(CLOCK_TOLERANCE_MS),
    };
    let (simulator, res) = clock_sync(policy, BLOCKING_MS, TICKS_MS);

    if let Err(ExecutionError::TimingViolation(violation)) = res {
        assert_eq!(violation.time, DoubleTime(0.85));
        assert!(violation.lag > Duration::from_millis(CLOCK_TOLERANCE_MS));
        assert_eq!(simulator.time(), DoubleTime(0.8));
        assert!(simulator.drift().late_events >= 2);
    } else {
        panic!("loss of synchronization not observed");
    }
}

#[test]
fn clock_sync_drift() {
    // The fourth tick is ~50ms late and the simulation carries on.
    const BLOCKING_MS: u64 = 100;
    const TICKS_MS: &[u64] = &[100, 250, 400, 450, 650];

    let (simulator, res) = clock_sync(CatchUpPolicy::Drift, BLOCKING_MS, TICKS_MS);

    assert_eq!(res.unwrap(), SimState::Ended);
    assert_eq!(simulator.time(), DoubleTime(0.65));
    assert_eq!(simulator.stats().events_executed, 5);

    let drift = simulator.drift();
    assert!(drift.late_events >= 1);
    assert!(drift.max_lag >= Duration::from_millis(30));
    assert!(simulator.last_violation().is_none());
}

#[test]
fn aborted_run_cannot_be_resumed_by_an_observer() {
    const BLOCKING_MS: u64 = 100;

    let simulator = real_time_simulator(
        CatchUpPolicy::Abort {
            tolerance: Duration::ZERO,
        },
        &[],
    );
    let resumed = Arc::new(Mutex::new(None));

    let handle = simulator.clone();
    let outcome = resumed.clone();
    let id = simulator.subscribe(NotificationKind::Stop, move |_| {
        *outcome.lock().unwrap() = Some(handle.start());
    });
    // The second tick is ~50ms late.
    for tick in [0.1, 0.15, 0.3] {
        simulator
            .schedule_event(DoubleTime(tick), NORMAL_PRIORITY, move |_| {
                thread::sleep(Duration::from_millis(BLOCKING_MS))
            })
            .unwrap();
    }

    let res = simulator.run();
    simulator.unsubscribe(id);

    let Err(ExecutionError::TimingViolation(violation)) = res else {
        panic!("loss of synchronization not observed");
    };
    assert_eq!(violation.time, DoubleTime(0.15));
    match resumed.lock().unwrap().take() {
        Some(Err(ExecutionError::TimingViolation(rejected))) => assert_eq!(rejected, violation),
        other => panic!("unexpected outcome of the resumption: {other:?}"),
    }
    assert_eq!(simulator.state(), SimState::Stopped);
    assert_eq!(simulator.time(), DoubleTime(0.1));
    assert_eq!(simulator.pending_events(), 2);
}

// A clock whose deadlines always lie one second in the past.
struct LaggingClock {
    catch_up_policy: CatchUpPolicy,
}

impl Clock<DoubleTime> for LaggingClock {
    fn anchor(&mut self, _: DoubleTime, _: Instant) {}

    fn deadline(&self, _: DoubleTime) -> Option<Instant> {
        Instant::now().checked_sub(Duration::from_secs(1))
    }

    fn catch_up_policy(&self) -> CatchUpPolicy {
        self.catch_up_policy
    }
}

#[test]
fn custom_clock_policy() {
    for (catch_up_policy, aborted) in [
        (CatchUpPolicy::Drift, false),
        (
            CatchUpPolicy::Abort {
                tolerance: Duration::from_millis(10),
            },
            true,
        ),
    ] {
        let simulator = SimInit::new()
            .set_clock(LaggingClock { catch_up_policy })
            .build();
        simulator
            .initialize(
                Replication::new("lagging", DoubleTime(0.0), 0.0, 10.0).unwrap(),
                &mut |sim: &Simulator<DoubleTime>| {
                    sim.schedule_event(DoubleTime(1.0), NORMAL_PRIORITY, |_| {})
                        .unwrap();
                },
            )
            .unwrap();

        let res = simulator.run();
        assert_eq!(
            matches!(res, Err(ExecutionError::TimingViolation(_))),
            aborted
        );
        assert_eq!(simulator.drift().late_events, 1);
    }
}
