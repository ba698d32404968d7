//! `dinesync-events`: envelope construction and event bus mechanics.
//!
//! This crate owns the canonical event envelope, the closed set of mutation
//! kinds/requests, the envelope builder, and the pub/sub abstraction the
//! mutation pipeline rides on. It contains no IO beyond in-memory channels;
//! durable bus implementations live in `dinesync-infra`.

pub mod builder;
pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod request;

pub use builder::{Ack, EnvelopeBuilder};
pub use bus::{EventBus, Subscription, SubscriptionFilter};
pub use envelope::{EVENT_SOURCE, EventEnvelope, MutationKind};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use request::MutationRequest;
