//! Outcome fan-out: the worker publishes, independent reactors subscribe.
//!
//! Reactors (feed writers, counters, client push bridges) are not part of
//! the queue's reliability contract. Publishing never blocks the worker: a
//! subscriber whose buffer is full misses the event and the bus counts the
//! drop. Jobs can be delivered more than once upstream, so reactors must be
//! idempotent.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::job_event::{EventKind, JobEvent};

/// Which event kinds a subscription wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    kinds: HashSet<EventKind>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::only(EventKind::ALL)
    }

    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn accepts(&self, event: &JobEvent) -> bool {
        self.kinds.contains(&event.kind())
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Receiving end of one subscription, for a single consuming thread.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<JobEvent>,
    filter: EventFilter,
}

impl Subscription {
    pub fn new(receiver: Receiver<JobEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn try_recv(&self) -> Result<JobEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// `Disconnected` once the bus is gone and the buffer is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<JobEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered right now.
    pub fn drain(&self) -> Vec<JobEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Sink for job outcome events.
pub trait EventBus: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, event: JobEvent) -> Result<(), Self::Error>;

    fn subscribe(&self, filter: EventFilter) -> Subscription;
}

impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, event: JobEvent) -> Result<(), Self::Error> {
        (**self).publish(event)
    }

    fn subscribe(&self, filter: EventFilter) -> Subscription {
        (**self).subscribe(filter)
    }
}
