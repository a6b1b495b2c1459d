//! Example: a simulation paced against the wall clock.
//!
//! This example demonstrates in particular:
//!
//! * the use of a real-time clock with a custom time unit,
//! * the control of a background run from the main thread,
//! * a change of the speed factor while the simulation is running.
use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

use descore::replication::Replication;
use descore::simulation::{Notification, NotificationKind, SimInit, Simulator, NORMAL_PRIORITY};
use descore::time::{CatchUpPolicy, RealTimeClock};

/// Period of the beacon, in milliseconds of simulation time.
const PERIOD: u64 = 100;

fn beacon(sim: &Simulator<u64>) {
    println!("beacon at t = {} ms", sim.time());
    sim.schedule_event_in(PERIOD, NORMAL_PRIORITY, beacon)
        .unwrap();
}

fn main() -> Result<(), Box<dyn Error>> {
    // One time unit is one millisecond; lag is tolerated up to 20ms.
    let clock = RealTimeClock::new(
        1.0,
        CatchUpPolicy::Abort {
            tolerance: Duration::from_millis(20),
        },
    )
    .with_time_unit(Duration::from_millis(1));

    let simulator = SimInit::new().set_clock(clock).build();
    simulator.subscribe(NotificationKind::EndOfReplication, |notification| {
        if let Notification::EndOfReplication { time } = notification {
            println!("replication ended at t = {time} ms");
        }
    });

    let replication = Replication::new("beacon", 0u64, 0, 2_000)?;
    simulator.initialize(replication, &mut |sim: &Simulator<u64>| {
        sim.schedule_event_now(NORMAL_PRIORITY, beacon).map(|_| ())
    })?;

    let t0 = Instant::now();
    simulator.start()?;

    // Run the second half of the replication 4 times faster.
    thread::sleep(Duration::from_millis(1_000));
    simulator.set_speed_factor(4.0);

    simulator.join()?;
    let elapsed = t0.elapsed();
    println!("wall-clock duration: {:.3} s", elapsed.as_secs_f64());

    assert!(elapsed >= Duration::from_millis(1_200));
    assert!(simulator.last_violation().is_none());

    Ok(())
}
