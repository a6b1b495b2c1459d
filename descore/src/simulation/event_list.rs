//! Ordered store of pending events.

use std::cmp::Reverse;
use std::fmt;

use slab::Slab;

use crate::simulation::action::{box_action, BoxError, BoxedAction, OpaqueAction, Outcome};
use crate::simulation::Simulator;
use crate::time::SimTime;

/// Priority of an event.
///
/// Among events scheduled for the same time, events with a higher priority
/// are executed first.
pub type Priority = i32;

/// Lowest conventional priority.
pub const MIN_PRIORITY: Priority = 1;

/// Default priority.
pub const NORMAL_PRIORITY: Priority = 5;

/// Highest conventional priority.
pub const MAX_PRIORITY: Priority = 10;

/// The ordering key of a scheduled event.
///
/// Keys are ordered by ascending time, then descending priority, then
/// ascending sequence number. Since sequence numbers are unique within an
/// event list, this is a total order.
// Implementation note: the derived `Ord` is lexicographic over the fields in
// declaration order, so the field order must not be changed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey<T: SimTime> {
    time: T,
    priority: Reverse<Priority>,
    sequence: u64,
}

impl<T: SimTime> EventKey<T> {
    /// Returns the scheduled time.
    pub fn time(&self) -> T {
        self.time
    }

    /// Returns the priority.
    pub fn priority(&self) -> Priority {
        self.priority.0
    }

    /// Returns the sequence number assigned at scheduling time.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// An event awaiting execution.
pub struct ScheduledEvent<T: SimTime> {
    key: EventKey<T>,
    action: BoxedAction<T>,
}

impl<T: SimTime> ScheduledEvent<T> {
    /// Returns the ordering key.
    pub fn key(&self) -> EventKey<T> {
        self.key
    }

    /// Returns the scheduled time.
    pub fn time(&self) -> T {
        self.key.time
    }

    /// Returns the priority.
    pub fn priority(&self) -> Priority {
        self.key.priority.0
    }

    /// Returns the sequence number assigned at scheduling time.
    pub fn sequence(&self) -> u64 {
        self.key.sequence
    }

    /// Executes the action on the provided simulator.
    ///
    /// This is what the run loop does for each event; it is exposed for
    /// drivers that pull events from a standalone [`EventList`].
    pub fn execute(self, simulator: &Simulator<T>) -> Result<(), BoxError> {
        (self.action)(simulator)
    }
}

impl<T: SimTime> fmt::Debug for ScheduledEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("time", &self.key.time)
            .field("priority", &self.key.priority.0)
            .field("sequence", &self.key.sequence)
            .field("action", &OpaqueAction)
            .finish()
    }
}

/// Handle to a scheduled event.
///
/// An `EventHandle` can be used to cancel a pending event. Using a handle
/// issued by another event list is a logic error and could result in the
/// cancellation of an arbitrary event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EventHandle<T: SimTime> {
    // Slab slot of the event when it was scheduled.
    slot: usize,
    key: EventKey<T>,
}

impl<T: SimTime> EventHandle<T> {
    /// Returns the ordering key of the event.
    pub fn key(&self) -> EventKey<T> {
        self.key
    }

    /// Returns the scheduled time of the event.
    pub fn time(&self) -> T {
        self.key.time
    }
}

/// A collection of pending events maintaining a total order by time, priority
/// and insertion sequence.
///
/// The event list is a binary min-heap of event keys cross-indexed with a slab
/// holding the events themselves: each heap entry points to the slab slot of
/// its event and each slot records the current heap position of its entry.
/// Scheduling, removal of the first event and cancellation by handle thus all
/// have *O*(log(*N*)) complexity, while peeking at the first event is *O*(1).
///
/// A handle stores the key of its event besides the slab slot, so a handle
/// whose slot has since been reused by another event is recognized as stale.
///
/// The list does not know about the current simulation time; refusing events
/// scheduled in the past is the responsibility of the [`Simulator`].
///
/// # Examples
///
/// ```
/// use descore::simulation::EventList;
/// use descore::time::DoubleTime;
///
/// let mut list = EventList::new();
/// list.schedule(DoubleTime(5.0), 0, |_| {});
/// list.schedule(DoubleTime(5.0), 1, |_| {});
/// list.schedule(DoubleTime(3.0), 0, |_| {});
///
/// let order: Vec<_> = std::iter::from_fn(|| list.remove_first())
///     .map(|event| (event.time().get(), event.priority()))
///     .collect();
///
/// assert_eq!(order, vec![(3.0, 0), (5.0, 1), (5.0, 0)]);
/// ```
pub struct EventList<T: SimTime> {
    heap: Vec<HeapEntry<T>>,
    slots: Slab<Slot<T>>,
    next_sequence: u64,
}

impl<T: SimTime> EventList<T> {
    /// Creates an empty event list.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty event list with at least the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            slots: Slab::with_capacity(capacity),
            next_sequence: 0,
        }
    }

    /// Inserts an event and returns a handle that can be used to cancel it.
    pub fn schedule<F, R>(&mut self, time: T, priority: Priority, action: F) -> EventHandle<T>
    where
        F: FnOnce(&Simulator<T>) -> R + Send + 'static,
        R: Outcome,
    {
        self.schedule_boxed(time, priority, box_action(action))
    }

    /// Inserts a type-erased event.
    pub(crate) fn schedule_boxed(
        &mut self,
        time: T,
        priority: Priority,
        action: BoxedAction<T>,
    ) -> EventHandle<T> {
        let key = EventKey {
            time,
            priority: Reverse(priority),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        let position = self.heap.len();
        let slot = self.slots.insert(Slot {
            event: ScheduledEvent { key, action },
            position,
        });
        self.heap.push(HeapEntry { key, slot });
        self.sift_up(position);

        EventHandle { slot, key }
    }

    /// Removes a pending event.
    ///
    /// Returns `false` if the event was already removed, executed or
    /// cancelled.
    pub fn cancel(&mut self, handle: EventHandle<T>) -> bool {
        let position = match self.slots.get(handle.slot) {
            Some(slot) if slot.event.key == handle.key => slot.position,
            _ => return false,
        };
        self.remove_at(position);

        true
    }

    /// Returns the event with the smallest key, leaving it in the list.
    pub fn peek_first(&self) -> Option<&ScheduledEvent<T>> {
        self.heap.first().map(|entry| &self.slots[entry.slot].event)
    }

    /// Returns the smallest key, leaving the event in the list.
    pub fn peek_key(&self) -> Option<EventKey<T>> {
        self.heap.first().map(|entry| entry.key)
    }

    /// Removes and returns the event with the smallest key.
    pub fn remove_first(&mut self) -> Option<ScheduledEvent<T>> {
        if self.heap.is_empty() {
            return None;
        }

        Some(self.remove_at(0))
    }

    /// Checks whether the list contains no events.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns the number of pending events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Removes all events.
    ///
    /// Handles issued before the call become invalid: sequence numbers keep
    /// increasing, so a stale handle can never match a newer event.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.slots.clear();
    }

    /// Removes the event whose heap entry is at the specified position.
    ///
    /// The position must be valid.
    fn remove_at(&mut self, position: usize) -> ScheduledEvent<T> {
        let last = self.heap.len() - 1;
        self.swap_entries(position, last);
        let removed = self.heap[last];
        self.heap.truncate(last);

        // The former last entry now fills the vacated position, where it may
        // be out of order in either direction.
        if position < last {
            if position > 0 && self.heap[position].key < self.heap[(position - 1) / 2].key {
                self.sift_up(position);
            } else {
                self.sift_down(position);
            }
        }

        self.slots.remove(removed.slot).event
    }

    /// Moves the entry at the specified position towards the root until its
    /// parent has a smaller key.
    fn sift_up(&mut self, mut position: usize) {
        while position > 0 {
            let parent = (position - 1) / 2;
            if self.heap[parent].key <= self.heap[position].key {
                break;
            }
            self.swap_entries(position, parent);
            position = parent;
        }
    }

    /// Moves the entry at the specified position towards the leaves until
    /// both children have larger keys.
    fn sift_down(&mut self, mut position: usize) {
        let len = self.heap.len();

        loop {
            let left = 2 * position + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.heap[right].key < self.heap[left].key {
                right
            } else {
                left
            };
            if self.heap[position].key <= self.heap[child].key {
                break;
            }
            self.swap_entries(position, child);
            position = child;
        }
    }

    /// Swaps two heap entries and updates the back-references of their slots.
    fn swap_entries(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.slots[self.heap[a].slot].position = a;
        self.slots[self.heap[b].slot].position = b;
    }
}

/// An entry of the binary heap.
#[derive(Copy, Clone)]
struct HeapEntry<T: SimTime> {
    key: EventKey<T>,
    // Slab slot of the event.
    slot: usize,
}

/// A pending event in the slab.
struct Slot<T: SimTime> {
    event: ScheduledEvent<T>,
    // Position of the corresponding entry in the heap.
    position: usize,
}

impl<T: SimTime> Default for EventList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SimTime> fmt::Debug for EventList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventList")
            .field("len", &self.heap.len())
            .field("first", &self.peek_key())
            .finish_non_exhaustive()
    }
}
