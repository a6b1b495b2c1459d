use std::fmt;

use crate::time::{Clock, NoClock, SimTime};

use super::Simulator;

/// Builder for a discrete-event simulator.
pub struct SimInit<T: SimTime> {
    clock: Box<dyn Clock<T>>,
    capacity: usize,
}

impl<T: SimTime> SimInit<T> {
    /// Default initial capacity of the event list.
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Creates a builder for a simulator running as fast as possible.
    pub fn new() -> Self {
        Self {
            clock: Box::new(NoClock::new()),
            capacity: Self::DEFAULT_CAPACITY,
        }
    }

    /// Synchronize the simulator with the provided [`Clock`].
    ///
    /// If the clock isn't explicitly set then the default [`NoClock`] is used,
    /// resulting in the simulation running as fast as possible.
    pub fn set_clock(mut self, clock: impl Clock<T> + 'static) -> Self {
        self.clock = Box::new(clock);

        self
    }

    /// Synchronize the simulator with an already boxed [`Clock`].
    pub(crate) fn set_boxed_clock(mut self, clock: Box<dyn Clock<T>>) -> Self {
        self.clock = clock;

        self
    }

    /// Sets the initial capacity of the event list.
    ///
    /// The event list grows as needed; this only avoids reallocations when the
    /// typical number of pending events is known in advance.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;

        self
    }

    /// Builds a simulator in the
    /// [`NotInitialized`](crate::simulation::SimState::NotInitialized) state.
    pub fn build(self) -> Simulator<T> {
        Simulator::with_clock(self.clock, self.capacity)
    }
}

impl<T: SimTime> Default for SimInit<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SimTime> fmt::Debug for SimInit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimInit")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
