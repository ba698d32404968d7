//! Relational store access.
//!
//! The `EntityStore` trait is the only shared resource in the pipeline:
//! consumers, read services, and the dead-letter sink all go through it (or
//! its pool). Implementations must be safe for concurrent use by multiple
//! consumer invocations and multiple entries within one batch.

pub mod in_memory;
pub mod postgres;
mod r#trait;

pub use in_memory::InMemoryEntityStore;
pub use postgres::PostgresEntityStore;
pub use r#trait::{EntityStore, StoreError};
