//! Lifecycle notifications and their observers.

use std::fmt;
use std::ops::BitOr;

use crate::simulation::ActionError;
use crate::time::SimTime;

/// A lifecycle notification delivered to observers of a [`Simulator`](crate::simulation::Simulator).
#[derive(Debug)]
pub enum Notification<T: SimTime> {
    /// The first run of a replication is about to process events.
    StartOfReplication {
        /// Simulation time at the start of the replication.
        time: T,
    },
    /// The simulation time reached the warm-up boundary of the replication.
    ///
    /// This notification is delivered once per replication, before any event
    /// scheduled at or after the boundary is executed.
    WarmupReached {
        /// Warm-up time.
        time: T,
    },
    /// The simulation time was advanced.
    ///
    /// This notification is delivered once per distinct time advance, not once
    /// per event.
    TimeChanged {
        /// Simulation time before the advance.
        previous: T,
        /// New simulation time.
        time: T,
    },
    /// The action of an event failed; the run continues.
    ActionFailed(ActionError<T>),
    /// The run loop paused.
    Stop {
        /// Simulation time at which the run loop paused.
        time: T,
    },
    /// The replication ended.
    EndOfReplication {
        /// Final simulation time.
        time: T,
    },
}

impl<T: SimTime> Notification<T> {
    /// Returns the kind of this notification.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::StartOfReplication { .. } => NotificationKind::StartOfReplication,
            Self::WarmupReached { .. } => NotificationKind::WarmupReached,
            Self::TimeChanged { .. } => NotificationKind::TimeChanged,
            Self::ActionFailed(_) => NotificationKind::ActionFailed,
            Self::Stop { .. } => NotificationKind::Stop,
            Self::EndOfReplication { .. } => NotificationKind::EndOfReplication,
        }
    }
}

/// The kind of a [`Notification`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// See [`Notification::StartOfReplication`].
    StartOfReplication,
    /// See [`Notification::WarmupReached`].
    WarmupReached,
    /// See [`Notification::TimeChanged`].
    TimeChanged,
    /// See [`Notification::ActionFailed`].
    ActionFailed,
    /// See [`Notification::Stop`].
    Stop,
    /// See [`Notification::EndOfReplication`].
    EndOfReplication,
}

impl NotificationKind {
    fn mask(self) -> u8 {
        1 << (self as u8)
    }
}

impl BitOr for NotificationKind {
    type Output = NotificationKinds;

    fn bitor(self, rhs: Self) -> NotificationKinds {
        NotificationKinds(self.mask() | rhs.mask())
    }
}

/// A set of notification kinds an observer subscribes to.
///
/// # Examples
///
/// ```
/// use descore::simulation::{NotificationKind, NotificationKinds};
///
/// let kinds = NotificationKind::WarmupReached | NotificationKind::EndOfReplication;
///
/// assert!(kinds.contains(NotificationKind::EndOfReplication));
/// assert!(!kinds.contains(NotificationKind::TimeChanged));
/// assert!(NotificationKinds::ALL.contains(NotificationKind::TimeChanged));
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct NotificationKinds(u8);

impl NotificationKinds {
    /// The empty set.
    pub const NONE: Self = Self(0);

    /// All notification kinds.
    pub const ALL: Self = Self(0b11_1111);

    /// Checks whether the set contains the specified kind.
    pub fn contains(self, kind: NotificationKind) -> bool {
        self.0 & kind.mask() != 0
    }
}

impl From<NotificationKind> for NotificationKinds {
    fn from(kind: NotificationKind) -> Self {
        Self(kind.mask())
    }
}

impl BitOr for NotificationKinds {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOr<NotificationKind> for NotificationKinds {
    type Output = Self;

    fn bitor(self, rhs: NotificationKind) -> Self {
        Self(self.0 | rhs.mask())
    }
}

impl fmt::Debug for NotificationKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KINDS: [NotificationKind; 6] = [
            NotificationKind::StartOfReplication,
            NotificationKind::WarmupReached,
            NotificationKind::TimeChanged,
            NotificationKind::ActionFailed,
            NotificationKind::Stop,
            NotificationKind::EndOfReplication,
        ];

        f.debug_set()
            .entries(KINDS.iter().filter(|kind| self.contains(**kind)))
            .finish()
    }
}

/// Unique identifier of a registered observer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A type-erased observer.
pub(crate) type Listener<T> = Box<dyn FnMut(&Notification<T>) + Send + 'static>;

/// A registered observer.
pub(crate) struct Entry<T: SimTime> {
    id: ListenerId,
    kinds: NotificationKinds,
    listener: Listener<T>,
}

/// The observers of a single simulator, in registration order.
///
/// During delivery, the entries are moved out of the registry so that the
/// registry lock need not be held while observers run; observers registered
/// or removed meanwhile are reconciled once delivery completes.
pub(crate) struct ListenerRegistry<T: SimTime> {
    entries: Vec<Entry<T>>,
    next_id: u64,
    delivering: bool,
    // Identifiers of the entries moved out for delivery.
    delivered_ids: Vec<ListenerId>,
    removed_during_delivery: Vec<ListenerId>,
}

impl<T: SimTime> ListenerRegistry<T> {
    /// Creates an empty registry.
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
            delivering: false,
            delivered_ids: Vec::new(),
            removed_during_delivery: Vec::new(),
        }
    }

    /// Registers an observer for the specified kinds.
    pub(crate) fn subscribe(&mut self, kinds: NotificationKinds, listener: Listener<T>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            kinds,
            listener,
        });

        id
    }

    /// Unregisters an observer.
    ///
    /// Returns `false` if no such observer is registered.
    pub(crate) fn unsubscribe(&mut self, id: ListenerId) -> bool {
        if let Some(pos) = self.entries.iter().position(|entry| entry.id == id) {
            self.entries.remove(pos);
            return true;
        }
        if self.delivering
            && self.delivered_ids.contains(&id)
            && !self.removed_during_delivery.contains(&id)
        {
            self.removed_during_delivery.push(id);
            return true;
        }

        false
    }

    /// Moves the entries out for delivery, unless there is nothing to deliver.
    pub(crate) fn begin_delivery(&mut self) -> Option<Vec<Entry<T>>> {
        if self.delivering || self.entries.is_empty() {
            return None;
        }
        self.delivering = true;
        self.delivered_ids.clear();
        self.delivered_ids
            .extend(self.entries.iter().map(|entry| entry.id));

        Some(std::mem::take(&mut self.entries))
    }

    /// Moves the entries back after delivery, appending observers registered
    /// in the meantime and dropping those removed in the meantime.
    pub(crate) fn end_delivery(&mut self, mut entries: Vec<Entry<T>>) {
        let removed = std::mem::take(&mut self.removed_during_delivery);
        entries.retain(|entry| !removed.contains(&entry.id));
        entries.append(&mut self.entries);
        self.entries = entries;
        self.delivered_ids.clear();
        self.delivering = false;
    }
}

impl<T: SimTime> Entry<T> {
    /// Delivers the notification if the observer subscribed to its kind.
    pub(crate) fn deliver(&mut self, notification: &Notification<T>) {
        if self.kinds.contains(notification.kind()) {
            (self.listener)(notification);
        }
    }

    /// Returns the identifier of the observer.
    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }
}
