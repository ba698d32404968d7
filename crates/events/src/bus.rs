//! Event bus abstraction (mechanics only).
//!
//! A pub/sub channel for distributing mutation envelopes to consumers.
//! The contract is deliberately small and makes minimal assumptions:
//!
//! - **Transport-agnostic**: in-memory channels here, Redis Streams in
//!   `dinesync-infra`.
//! - **At-least-once delivery**: an envelope may reach a consumer more than
//!   once; consumers must persist idempotently.
//! - **Fan-out, not routing**: every envelope matching a subscription's
//!   filter is delivered to every subscriber; a consumer still filters
//!   locally by entity.
//! - **No ordering guarantees** between envelopes from different mutation
//!   calls.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::envelope::{EVENT_SOURCE, EventEnvelope, MutationKind};

/// Filter attached to a subscription: `(source == tag) AND (kind ∈ kinds)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    source: String,
    kinds: BTreeSet<MutationKind>,
}

impl SubscriptionFilter {
    pub fn new(source: impl Into<String>, kinds: impl IntoIterator<Item = MutationKind>) -> Self {
        Self {
            source: source.into(),
            kinds: kinds.into_iter().collect(),
        }
    }

    /// The canonical pipeline filter: our source tag, all four mutation
    /// kinds. Consumers narrow by entity locally.
    pub fn mutations() -> Self {
        Self::new(EVENT_SOURCE, MutationKind::ALL)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kinds(&self) -> &BTreeSet<MutationKind> {
        &self.kinds
    }

    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        envelope.source() == self.source && self.kinds.contains(&envelope.kind())
    }
}

/// A subscription to a filtered envelope stream.
///
/// Designed for single-threaded consumption: one subscription per consumer
/// worker. Duplicate delivery is possible; the consumer's persistence logic
/// absorbs it.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<EventEnvelope>,
    closed: Option<Arc<AtomicBool>>,
}

impl Subscription {
    pub fn new(receiver: Receiver<EventEnvelope>) -> Self {
        Self {
            receiver,
            closed: None,
        }
    }

    /// Subscription that flips `flag` when dropped.
    ///
    /// Buses whose delivery loop runs on its own thread poll the flag to
    /// stop delivering once the consumer is gone, instead of waiting for a
    /// failed send on the next matching envelope.
    pub fn with_close_flag(receiver: Receiver<EventEnvelope>, flag: Arc<AtomicBool>) -> Self {
        Self {
            receiver,
            closed: Some(flag),
        }
    }

    /// Block until the next envelope is available.
    pub fn recv(&self) -> Result<EventEnvelope, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an envelope without blocking.
    pub fn try_recv(&self) -> Result<EventEnvelope, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for an envelope.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<EventEnvelope, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(flag) = &self.closed {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Durable-or-not pub/sub channel for mutation envelopes.
///
/// `publish()` failing means the envelope never reached the channel; the
/// caller sees it synchronously and can reject the mutation. Once publish
/// succeeds, delivery is the bus's problem: at-least-once to every
/// subscription whose filter matches.
pub trait EventBus: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, envelope: EventEnvelope) -> Result<(), Self::Error>;

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription;
}

impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, envelope: EventEnvelope) -> Result<(), Self::Error> {
        (**self).publish(envelope)
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        (**self).subscribe(filter)
    }
}
