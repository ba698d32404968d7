use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use dinesync_core::{EntityKind, PipelineError, Restaurant, User};

/// Classified store failure.
///
/// The transient/permanent split drives the consumer's retry decision:
/// transient failures are retried with backoff, permanent failures go
/// straight to the dead-letter sink.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection, pool, or timeout trouble; retry may succeed.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Constraint violation or malformed data; retrying cannot help.
    #[error("permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for PipelineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Transient(msg) => PipelineError::TransientStore(msg),
            StoreError::Permanent(msg) => PipelineError::PermanentStore(msg),
        }
    }
}

/// Canonical entity state, keyed by the caller-supplied id.
///
/// Contract notes:
/// - `ensure_schema` must be natively idempotent (`CREATE TABLE IF NOT
///   EXISTS`-grade), safe under concurrent invocation by multiple consumer
///   instances. No in-memory "already created" flag is allowed to guard it.
/// - `insert_*` is insert-if-absent: re-inserting an existing id is a no-op
///   success (`Ok(false)`), which is what makes duplicate redelivery safe.
/// - `delete_*` returns the number of rows removed; deleting a missing id is
///   a no-op (`Ok(0)`), not an error.
/// - Every field value is passed as a bound parameter, never interpolated
///   into query text.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn ensure_schema(&self, entity: EntityKind) -> Result<(), StoreError>;

    /// Insert a user row. Returns `false` if the id already existed.
    async fn insert_user(&self, id: i64, name: &str) -> Result<bool, StoreError>;

    /// Delete a user row by id. Returns the number of rows removed (0 or 1).
    async fn delete_user(&self, id: i64) -> Result<u64, StoreError>;

    /// Insert a restaurant row. Returns `false` if the id already existed.
    async fn insert_restaurant(
        &self,
        id: i64,
        name: &str,
        address: &str,
        cuisine: &str,
    ) -> Result<bool, StoreError>;

    /// Delete a restaurant row by id. Returns the number of rows removed.
    async fn delete_restaurant(&self, id: i64) -> Result<u64, StoreError>;

    async fn all_users(&self) -> Result<Vec<User>, StoreError>;

    async fn all_restaurants(&self) -> Result<Vec<Restaurant>, StoreError>;
}

#[async_trait]
impl<S> EntityStore for Arc<S>
where
    S: EntityStore + ?Sized,
{
    async fn ensure_schema(&self, entity: EntityKind) -> Result<(), StoreError> {
        (**self).ensure_schema(entity).await
    }

    async fn insert_user(&self, id: i64, name: &str) -> Result<bool, StoreError> {
        (**self).insert_user(id, name).await
    }

    async fn delete_user(&self, id: i64) -> Result<u64, StoreError> {
        (**self).delete_user(id).await
    }

    async fn insert_restaurant(
        &self,
        id: i64,
        name: &str,
        address: &str,
        cuisine: &str,
    ) -> Result<bool, StoreError> {
        (**self).insert_restaurant(id, name, address, cuisine).await
    }

    async fn delete_restaurant(&self, id: i64) -> Result<u64, StoreError> {
        (**self).delete_restaurant(id).await
    }

    async fn all_users(&self) -> Result<Vec<User>, StoreError> {
        (**self).all_users().await
    }

    async fn all_restaurants(&self) -> Result<Vec<Restaurant>, StoreError> {
        (**self).all_restaurants().await
    }
}
