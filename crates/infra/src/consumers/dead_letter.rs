//! Dead-letter sink.
//!
//! Envelopes that cannot be applied (validation failures, permanent store
//! errors, exhausted retries) are recorded here for operator inspection.
//! Dead-lettering is the alternative to silent discard; a sink failure is
//! the one case where a batch reports itself unresolved so the bus keeps
//! the envelope redeliverable.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use dinesync_events::EventEnvelope;

use crate::store::StoreError;

/// A terminally failed envelope, held for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub envelope: EventEnvelope,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(envelope: EventEnvelope, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            envelope,
            reason: reason.into(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

/// Destination for envelopes that exhausted their options.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn push(&self, letter: DeadLetter) -> Result<(), StoreError>;
}

#[async_trait]
impl<D> DeadLetterSink for Arc<D>
where
    D: DeadLetterSink + ?Sized,
{
    async fn push(&self, letter: DeadLetter) -> Result<(), StoreError> {
        (**self).push(letter).await
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.letters.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the recorded letters.
    pub fn all(&self) -> Vec<DeadLetter> {
        self.letters.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Remove and return all recorded letters.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .map(|mut l| l.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn push(&self, letter: DeadLetter) -> Result<(), StoreError> {
        let mut letters = self
            .letters
            .lock()
            .map_err(|_| StoreError::transient("dead-letter lock poisoned"))?;
        letters.push(letter);
        Ok(())
    }
}

const CREATE_DEAD_LETTERS: &str = r#"
    CREATE TABLE IF NOT EXISTS dead_letters (
        id UUID PRIMARY KEY,
        source TEXT NOT NULL,
        kind TEXT NOT NULL,
        envelope JSONB NOT NULL,
        reason TEXT NOT NULL,
        attempts INT NOT NULL,
        failed_at TIMESTAMPTZ NOT NULL
    )
"#;

/// Postgres-backed sink: `dead_letters` table, created lazily and
/// idempotently like the entity tables.
#[derive(Debug, Clone)]
pub struct PostgresDeadLetterSink {
    pool: Arc<PgPool>,
}

impl PostgresDeadLetterSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl DeadLetterSink for PostgresDeadLetterSink {
    #[instrument(skip(self, letter), fields(kind = %letter.envelope.kind(), reason = %letter.reason), err)]
    async fn push(&self, letter: DeadLetter) -> Result<(), StoreError> {
        sqlx::query(CREATE_DEAD_LETTERS)
            .execute(&*self.pool)
            .await
            .map_err(|e| StoreError::transient(format!("dead_letters DDL failed: {e}")))?;

        let envelope = serde_json::to_value(&letter.envelope)
            .map_err(|e| StoreError::permanent(format!("dead letter not serializable: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO dead_letters (id, source, kind, envelope, reason, attempts, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(letter.id)
        .bind(letter.envelope.source())
        .bind(letter.envelope.kind().as_str())
        .bind(envelope)
        .bind(&letter.reason)
        .bind(letter.attempts as i32)
        .bind(letter.failed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| StoreError::transient(format!("dead letter insert failed: {e}")))?;

        Ok(())
    }
}
