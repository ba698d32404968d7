//! Infrastructure layer: relational store, mutation consumers, durable bus,
//! configuration.
//!
//! The envelope/bus abstractions live in `dinesync-events` as pure mechanics.
//! This crate provides the infrastructure-backed pieces: the `EntityStore`
//! trait with Postgres and in-memory implementations, the per-entity mutation
//! consumers with retry and dead-letter handling, the consumer worker loop,
//! and (behind the `redis` feature) a durable Redis Streams event bus.

pub mod config;
pub mod consumers;
pub mod event_bus;
pub mod read;
pub mod store;
pub mod worker;

#[cfg(test)]
mod integration_tests;
