//! Mutation consumers.
//!
//! One consumer instantiation per entity type. Each receives every envelope
//! matching the bus filter, discards envelopes belonging to the other
//! entity, and applies the remainder to its table via idempotent-safe
//! writes. Transient store failures retry with bounded backoff; everything
//! else that cannot be applied lands in the dead-letter sink, never on the
//! floor.

pub mod batch;
pub mod consumer;
pub mod dead_letter;
pub mod retry;

pub use batch::{BatchReport, EnvelopeOutcome};
pub use consumer::MutationConsumer;
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterSink, PostgresDeadLetterSink};
pub use retry::{BackoffStrategy, RetryPolicy};
