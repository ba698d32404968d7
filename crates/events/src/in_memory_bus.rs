//! In-memory event bus for tests/dev.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription, SubscriptionFilter};
use crate::envelope::EventEnvelope;

#[derive(Debug)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
}

/// In-memory filtered pub/sub bus.
///
/// - No IO / no async
/// - Fan-out to every subscription whose filter matches
/// - At-least-once acceptable (subscribers must persist idempotently)
#[derive(Debug)]
pub struct InMemoryEventBus {
    subscribers: Mutex<Vec<(SubscriptionFilter, mpsc::Sender<EventEnvelope>)>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl EventBus for InMemoryEventBus {
    type Error = InMemoryBusError;

    fn publish(&self, envelope: EventEnvelope) -> Result<(), Self::Error> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?;

        // Drop any dead subscribers while publishing; non-matching live
        // subscribers are kept but skipped.
        subs.retain(|(filter, tx)| {
            if !filter.matches(&envelope) {
                return true;
            }
            tx.send(envelope.clone()).is_ok()
        });

        Ok(())
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push((filter, tx));
        }

        Subscription::new(rx)
    }
}
