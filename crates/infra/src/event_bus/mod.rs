//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `dinesync-events` as pure mechanics. This
//! module provides the durable implementation (Redis Streams) behind the
//! `redis` feature; dev/test wiring uses the in-memory bus from
//! `dinesync-events` directly.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsEventBus};
