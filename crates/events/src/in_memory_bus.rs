//! Process-local outcome bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, EventFilter, Subscription};
use crate::job_event::JobEvent;

/// Per-subscriber buffer used by [`InMemoryEventBus::new`].
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    #[error("event bus lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct Subscriber {
    sender: mpsc::SyncSender<JobEvent>,
    filter: EventFilter,
}

/// Bounded, filtered fan-out of [`JobEvent`]s to in-process reactors.
///
/// Each subscriber gets its own buffer of `capacity` events. A publish to a
/// full buffer is dropped for that subscriber only and counted in
/// [`dropped`](Self::dropped).
#[derive(Debug)]
pub struct InMemoryEventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Events not delivered because a subscriber's buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    type Error = InMemoryBusError;

    fn publish(&self, event: JobEvent) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        subs.retain(|sub| {
            if !sub.filter.accepts(&event) {
                return true;
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                // Receiver gone: unsubscribe.
                Err(mpsc::TrySendError::Disconnected(_)) => false,
            }
        });

        Ok(())
    }

    fn subscribe(&self, filter: EventFilter) -> Subscription {
        let (sender, receiver) = mpsc::sync_channel(self.capacity);

        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber {
                sender,
                filter: filter.clone(),
            });
        }

        Subscription::new(receiver, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_event::EventKind;
    use herald_core::Job;

    fn job(id: &str) -> Job {
        Job::builder("email", 1).id(id).build().unwrap()
    }

    #[test]
    fn subscribers_only_see_kinds_they_asked_for() {
        let bus = InMemoryEventBus::new();
        let everything = bus.subscribe(EventFilter::all());
        let dead_only = bus.subscribe(EventFilter::only([EventKind::DeadLettered]));

        bus.publish(JobEvent::delivered(&job("a"))).unwrap();
        bus.publish(JobEvent::dead_lettered(&job("b"))).unwrap();

        assert_eq!(everything.drain().len(), 2);
        let dead = dead_only.drain();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job_id(), "b");
    }

    #[test]
    fn full_buffer_drops_and_counts_without_blocking() {
        let bus = InMemoryEventBus::with_capacity(2);
        let slow = bus.subscribe(EventFilter::all());

        for id in ["a", "b", "c", "d"] {
            bus.publish(JobEvent::delivered(&job(id))).unwrap();
        }

        assert_eq!(bus.dropped(), 2);
        let kept: Vec<String> = slow.drain().iter().map(|e| e.job_id().to_string()).collect();
        assert_eq!(kept, vec!["a", "b"]);
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let bus = InMemoryEventBus::new();
        let kept = bus.subscribe(EventFilter::all());
        drop(bus.subscribe(EventFilter::all()));

        bus.publish(JobEvent::resurrected("r".into())).unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.drain().len(), 1);
    }

    #[test]
    fn filtered_out_events_do_not_count_as_drops() {
        let bus = InMemoryEventBus::with_capacity(1);
        let _sub = bus.subscribe(EventFilter::only([EventKind::Resurrected]));

        for id in ["a", "b", "c"] {
            bus.publish(JobEvent::delivered(&job(id))).unwrap();
        }
        assert_eq!(bus.dropped(), 0);
    }
}
