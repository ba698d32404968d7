//! The mutation consumer, one instantiation per entity type.

use futures::future::join_all;
use tracing::{debug, warn};

use dinesync_core::{EntityKind, PipelineError};
use dinesync_events::{EventEnvelope, MutationRequest};

use crate::store::{EntityStore, StoreError};

use super::batch::{BatchReport, EnvelopeOutcome};
use super::dead_letter::{DeadLetter, DeadLetterSink};
use super::retry::RetryPolicy;

/// Applies mutation envelopes for one entity to that entity's table.
///
/// Invoked with a batch of one or more envelopes. Each envelope resolves
/// terminally and independently:
///
/// ```text
/// Received → FilteredOut
/// Received → SchemaReady → Applied
/// Received → SchemaReady → transient failures → Applied | DeadLettered
/// ```
///
/// Entries within a batch are processed concurrently; no atomicity across
/// entries is assumed, so a permanent failure on one envelope never blocks
/// the rest. The consumer holds no mutable state between invocations;
/// everything it knows lives in the store, which is what makes duplicate
/// and out-of-order redelivery safe.
pub struct MutationConsumer<S, D> {
    entity: EntityKind,
    store: S,
    dead_letters: D,
    retry: RetryPolicy,
}

impl<S, D> MutationConsumer<S, D>
where
    S: EntityStore,
    D: DeadLetterSink,
{
    /// Consumer owning the `users` table.
    pub fn users(store: S, dead_letters: D) -> Self {
        Self::new(EntityKind::User, store, dead_letters)
    }

    /// Consumer owning the `restaurants` table.
    pub fn restaurants(store: S, dead_letters: D) -> Self {
        Self::new(EntityKind::Restaurant, store, dead_letters)
    }

    fn new(entity: EntityKind, store: S, dead_letters: D) -> Self {
        Self {
            entity,
            store,
            dead_letters,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    /// Process a batch of envelopes, resolving each one terminally.
    ///
    /// Returns the per-envelope outcomes in input order. `Err` means at
    /// least one envelope could *not* be terminally resolved (the
    /// dead-letter sink itself failed); the caller must treat the batch as
    /// redeliverable: applied entries are idempotent, so redelivery is
    /// safe.
    pub async fn process_batch(
        &self,
        envelopes: &[EventEnvelope],
    ) -> Result<BatchReport, StoreError> {
        let resolved = join_all(envelopes.iter().map(|env| self.resolve(env))).await;
        let outcomes = resolved.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(BatchReport::new(outcomes))
    }

    async fn resolve(&self, envelope: &EventEnvelope) -> Result<EnvelopeOutcome, StoreError> {
        if envelope.kind().entity() != self.entity {
            debug!(
                consumer = %self.entity,
                kind = %envelope.kind(),
                "envelope belongs to the other consumer, skipping"
            );
            return Ok(EnvelopeOutcome::FilteredOut);
        }

        // Validation failures are terminal before anything touches the
        // store: dead-letter, never retry.
        let request = match MutationRequest::try_from(envelope) {
            Ok(request) => request,
            Err(error) => return self.dead_letter(envelope, error, 0).await,
        };
        let row_id = match request.row_id() {
            Ok(id) => id,
            Err(error) => return self.dead_letter(envelope, error, 0).await,
        };

        match self.apply_with_retry(&request, row_id).await {
            Ok(()) => {
                debug!(consumer = %self.entity, kind = %envelope.kind(), id = row_id, "applied");
                Ok(EnvelopeOutcome::Applied)
            }
            Err((error, attempts)) => self.dead_letter(envelope, error, attempts).await,
        }
    }

    async fn dead_letter(
        &self,
        envelope: &EventEnvelope,
        error: PipelineError,
        attempts: u32,
    ) -> Result<EnvelopeOutcome, StoreError> {
        let reason = error.to_string();
        warn!(
            consumer = %self.entity,
            kind = %envelope.kind(),
            attempts,
            reason = %reason,
            "envelope dead-lettered"
        );

        self.dead_letters
            .push(DeadLetter::new(envelope.clone(), reason.clone(), attempts))
            .await?;

        Ok(EnvelopeOutcome::DeadLettered { reason })
    }

    /// Drive one envelope through ensure-schema + apply, retrying transient
    /// store failures with bounded backoff, then escalating. Both steps are
    /// idempotent, so re-running the pair on retry leaves no duplicate
    /// effects.
    async fn apply_with_retry(
        &self,
        request: &MutationRequest,
        row_id: i64,
    ) -> Result<(), (PipelineError, u32)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.apply_once(request, row_id).await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        consumer = %self.entity,
                        id = row_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::Transient(msg)) => {
                    return Err((
                        PipelineError::permanent(format!(
                            "retries exhausted after {attempt} attempts: {msg}"
                        )),
                        attempt,
                    ));
                }
                Err(StoreError::Permanent(msg)) => {
                    return Err((PipelineError::PermanentStore(msg), attempt));
                }
            }
        }
    }

    async fn apply_once(&self, request: &MutationRequest, row_id: i64) -> Result<(), StoreError> {
        self.store.ensure_schema(self.entity).await?;

        match request {
            MutationRequest::CreateUser { name, .. } => {
                if !self.store.insert_user(row_id, name).await? {
                    debug!(id = row_id, "duplicate user create ignored");
                }
            }
            MutationRequest::DeleteUser { .. } => {
                if self.store.delete_user(row_id).await? == 0 {
                    debug!(id = row_id, "delete of missing user is a no-op");
                }
            }
            MutationRequest::CreateRestaurant {
                name,
                address,
                cuisine,
                ..
            } => {
                if !self
                    .store
                    .insert_restaurant(row_id, name, address, cuisine)
                    .await?
                {
                    debug!(id = row_id, "duplicate restaurant create ignored");
                }
            }
            MutationRequest::DeleteRestaurant { .. } => {
                if self.store.delete_restaurant(row_id).await? == 0 {
                    debug!(id = row_id, "delete of missing restaurant is a no-op");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::dead_letter::InMemoryDeadLetterSink;
    use crate::store::InMemoryEntityStore;
    use async_trait::async_trait;
    use dinesync_events::{EnvelopeBuilder, EventEnvelope, MutationKind, EVENT_SOURCE};
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Store wrapper that injects scripted failures per row id, then
    /// delegates to the in-memory store.
    struct ScriptedStore {
        inner: Arc<InMemoryEntityStore>,
        faults: Mutex<HashMap<i64, VecDeque<StoreError>>>,
    }

    impl ScriptedStore {
        fn new(inner: Arc<InMemoryEntityStore>) -> Self {
            Self {
                inner,
                faults: Mutex::new(HashMap::new()),
            }
        }

        fn fail_on(&self, id: i64, errors: impl IntoIterator<Item = StoreError>) {
            self.faults
                .lock()
                .unwrap()
                .entry(id)
                .or_default()
                .extend(errors);
        }

        fn take_fault(&self, id: i64) -> Option<StoreError> {
            self.faults
                .lock()
                .unwrap()
                .get_mut(&id)
                .and_then(VecDeque::pop_front)
        }
    }

    #[async_trait]
    impl EntityStore for ScriptedStore {
        async fn ensure_schema(&self, entity: EntityKind) -> Result<(), StoreError> {
            self.inner.ensure_schema(entity).await
        }

        async fn insert_user(&self, id: i64, name: &str) -> Result<bool, StoreError> {
            if let Some(err) = self.take_fault(id) {
                return Err(err);
            }
            self.inner.insert_user(id, name).await
        }

        async fn delete_user(&self, id: i64) -> Result<u64, StoreError> {
            if let Some(err) = self.take_fault(id) {
                return Err(err);
            }
            self.inner.delete_user(id).await
        }

        async fn insert_restaurant(
            &self,
            id: i64,
            name: &str,
            address: &str,
            cuisine: &str,
        ) -> Result<bool, StoreError> {
            if let Some(err) = self.take_fault(id) {
                return Err(err);
            }
            self.inner.insert_restaurant(id, name, address, cuisine).await
        }

        async fn delete_restaurant(&self, id: i64) -> Result<u64, StoreError> {
            if let Some(err) = self.take_fault(id) {
                return Err(err);
            }
            self.inner.delete_restaurant(id).await
        }

        async fn all_users(&self) -> Result<Vec<dinesync_core::User>, StoreError> {
            self.inner.all_users().await
        }

        async fn all_restaurants(&self) -> Result<Vec<dinesync_core::Restaurant>, StoreError> {
            self.inner.all_restaurants().await
        }
    }

    fn create_user(id: &str, name: &str) -> EventEnvelope {
        let (envelope, _) = EnvelopeBuilder::new()
            .build(dinesync_events::MutationRequest::CreateUser {
                id: id.to_string(),
                name: name.to_string(),
            })
            .unwrap();
        envelope
    }

    fn delete_user(id: &str) -> EventEnvelope {
        let (envelope, _) = EnvelopeBuilder::new()
            .build(dinesync_events::MutationRequest::DeleteUser { id: id.to_string() })
            .unwrap();
        envelope
    }

    fn create_restaurant(id: &str, name: &str) -> EventEnvelope {
        let (envelope, _) = EnvelopeBuilder::new()
            .build(dinesync_events::MutationRequest::CreateRestaurant {
                id: id.to_string(),
                name: name.to_string(),
                address: "1 Main St".to_string(),
                cuisine: "Italian".to_string(),
            })
            .unwrap();
        envelope
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::fixed(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn restaurant_consumer_filters_user_envelopes() {
        let store = Arc::new(InMemoryEntityStore::new());
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer = MutationConsumer::restaurants(store.clone(), sink.clone());

        let report = consumer
            .process_batch(&[create_user("1", "Ada"), create_restaurant("1", "Cafe")])
            .await
            .unwrap();

        assert_eq!(
            report.outcomes(),
            &[EnvelopeOutcome::FilteredOut, EnvelopeOutcome::Applied]
        );
        assert_eq!(store.all_restaurants().await.unwrap().len(), 1);
        // The user envelope left user state completely untouched: the users
        // table was never even created.
        assert!(store.all_users().await.is_err());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn duplicate_create_redelivery_yields_one_row() {
        let store = Arc::new(InMemoryEntityStore::new());
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer = MutationConsumer::restaurants(store.clone(), sink.clone());

        let envelope = create_restaurant("1", "Cafe");
        consumer.process_batch(&[envelope.clone()]).await.unwrap();
        let report = consumer.process_batch(&[envelope]).await.unwrap();

        assert_eq!(report.outcomes(), &[EnvelopeOutcome::Applied]);
        let rows = store.all_restaurants().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Cafe");
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn delete_of_missing_row_is_a_no_op() {
        let store = Arc::new(InMemoryEntityStore::new());
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer = MutationConsumer::users(store.clone(), sink.clone());

        let report = consumer.process_batch(&[delete_user("999")]).await.unwrap();

        assert_eq!(report.outcomes(), &[EnvelopeOutcome::Applied]);
        assert!(store.all_users().await.unwrap().is_empty());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn delete_arriving_before_create_is_handled_gracefully() {
        let store = Arc::new(InMemoryEntityStore::new());
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer = MutationConsumer::users(store.clone(), sink.clone());

        consumer.process_batch(&[delete_user("7")]).await.unwrap();
        let report = consumer
            .process_batch(&[create_user("7", "Grace")])
            .await
            .unwrap();

        // At-least-once eventual consistency: the late create lands. No
        // errors anywhere along the way.
        assert_eq!(report.outcomes(), &[EnvelopeOutcome::Applied]);
        assert_eq!(store.all_users().await.unwrap().len(), 1);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn missing_required_field_is_dead_lettered_not_retried() {
        let store = Arc::new(InMemoryEntityStore::new());
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer = MutationConsumer::users(store.clone(), sink.clone());

        // CreateUser without the name field.
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), "1".to_string());
        let envelope = EventEnvelope::new(EVENT_SOURCE, MutationKind::CreateUser, fields);

        let report = consumer.process_batch(&[envelope]).await.unwrap();

        assert_eq!(report.dead_lettered(), 1);
        let letters = sink.drain();
        assert_eq!(letters.len(), 1);
        assert!(letters[0].reason.contains("missing field"));
        assert_eq!(letters[0].attempts, 0);
        assert!(store.all_users().await.is_err());
    }

    #[tokio::test]
    async fn non_numeric_id_is_dead_lettered() {
        let store = Arc::new(InMemoryEntityStore::new());
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer = MutationConsumer::users(store, sink.clone());

        let report = consumer
            .process_batch(&[delete_user("not-a-number")])
            .await
            .unwrap();

        assert_eq!(report.dead_lettered(), 1);
        assert!(sink.drain()[0].reason.contains("not an integer"));
    }

    #[tokio::test]
    async fn permanent_failure_on_one_entry_does_not_block_the_rest() {
        let inner = Arc::new(InMemoryEntityStore::new());
        let store = Arc::new(ScriptedStore::new(inner.clone()));
        store.fail_on(2, [StoreError::permanent("value out of range")]);

        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer = MutationConsumer::restaurants(store, sink.clone())
            .with_retry_policy(quick_retry());

        let report = consumer
            .process_batch(&[
                create_restaurant("1", "First"),
                create_restaurant("2", "Second"),
                create_restaurant("3", "Third"),
            ])
            .await
            .unwrap();

        assert!(report.outcomes()[0].is_applied());
        assert!(report.outcomes()[1].is_dead_lettered());
        assert!(report.outcomes()[2].is_applied());

        let ids: Vec<i64> = inner
            .all_restaurants()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_applied() {
        let inner = Arc::new(InMemoryEntityStore::new());
        let store = Arc::new(ScriptedStore::new(inner.clone()));
        store.fail_on(5, [StoreError::transient("connection reset")]);

        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer =
            MutationConsumer::users(store, sink.clone()).with_retry_policy(quick_retry());

        let report = consumer
            .process_batch(&[create_user("5", "Eve")])
            .await
            .unwrap();

        assert_eq!(report.outcomes(), &[EnvelopeOutcome::Applied]);
        assert_eq!(inner.all_users().await.unwrap().len(), 1);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn exhausted_transient_retries_escalate_to_dead_letter() {
        let inner = Arc::new(InMemoryEntityStore::new());
        let store = Arc::new(ScriptedStore::new(inner.clone()));
        store.fail_on(
            6,
            std::iter::repeat_with(|| StoreError::transient("pool timed out")).take(10),
        );

        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer = MutationConsumer::users(store, sink.clone())
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(1)));

        let report = consumer
            .process_batch(&[create_user("6", "Mallory")])
            .await
            .unwrap();

        assert_eq!(report.dead_lettered(), 1);
        let letters = sink.drain();
        assert!(letters[0].reason.contains("retries exhausted"));
        assert_eq!(letters[0].attempts, 2);
        assert!(inner.all_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quoted_names_persist_literally() {
        let store = Arc::new(InMemoryEntityStore::new());
        let sink = Arc::new(InMemoryDeadLetterSink::new());
        let consumer = MutationConsumer::users(store.clone(), sink);

        consumer
            .process_batch(&[create_user("1", "O'Brien")])
            .await
            .unwrap();

        assert_eq!(store.all_users().await.unwrap()[0].name, "O'Brien");
    }
}
