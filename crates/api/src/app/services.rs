//! Service wiring: bus, store, dead-letter sink, and consumer workers.
//!
//! Two wirings exist behind the same `AppServices` surface:
//! - `InMemory`: std channel bus + in-memory store (dev/test, the default)
//! - `Persistent` (feature `redis`): Redis Streams bus + Postgres store

use std::sync::Arc;

use dinesync_core::{Restaurant, User};
use dinesync_events::{
    Ack, EnvelopeBuilder, EventBus, InMemoryEventBus, MutationRequest, SubscriptionFilter,
};
use dinesync_infra::config::AppConfig;
use dinesync_infra::consumers::{InMemoryDeadLetterSink, MutationConsumer};
use dinesync_infra::store::{EntityStore, InMemoryEntityStore, StoreError};
use dinesync_infra::worker::{ConsumerWorker, WorkerHandle};

#[cfg(feature = "redis")]
use dinesync_infra::config::{BusConfig, DatabaseConfig};
#[cfg(feature = "redis")]
use dinesync_infra::consumers::PostgresDeadLetterSink;
#[cfg(feature = "redis")]
use dinesync_infra::event_bus::{RedisStreamsError, RedisStreamsEventBus};
#[cfg(feature = "redis")]
use dinesync_infra::store::PostgresEntityStore;

use super::errors::SubmitError;

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        builder: EnvelopeBuilder,
        bus: Arc<InMemoryEventBus>,
        store: Arc<InMemoryEntityStore>,
        dead_letters: Arc<InMemoryDeadLetterSink>,
    },
    #[cfg(feature = "redis")]
    Persistent {
        builder: EnvelopeBuilder,
        bus: Arc<RedisStreamsEventBus>,
        store: Arc<PostgresEntityStore>,
        dead_letters: Arc<PostgresDeadLetterSink>,
    },
}

impl AppServices {
    /// Build an envelope from the request and publish it.
    ///
    /// Returns the acknowledgment on success. This confirms acceptance onto
    /// the bus only; persistence happens asynchronously in the consumer
    /// workers.
    pub fn submit(&self, request: MutationRequest) -> Result<Ack, SubmitError> {
        match self {
            AppServices::InMemory { builder, bus, .. } => {
                let (envelope, ack) = builder.build(request)?;
                bus.publish(envelope)
                    .map_err(|e| SubmitError::Publish(format!("{e:?}")))?;
                Ok(ack)
            }
            #[cfg(feature = "redis")]
            AppServices::Persistent { builder, bus, .. } => {
                let (envelope, ack) = builder.build(request)?;
                bus.publish(envelope)
                    .map_err(|e| SubmitError::Publish(e.to_string()))?;
                Ok(ack)
            }
        }
    }

    pub async fn all_users(&self) -> Result<Vec<User>, StoreError> {
        match self {
            AppServices::InMemory { store, .. } => store.all_users().await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { store, .. } => store.all_users().await,
        }
    }

    pub async fn all_restaurants(&self) -> Result<Vec<Restaurant>, StoreError> {
        match self {
            AppServices::InMemory { store, .. } => store.all_restaurants().await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { store, .. } => store.all_restaurants().await,
        }
    }
}

#[cfg(feature = "redis")]
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("event bus setup failed: {0}")]
    Bus(#[from] RedisStreamsError),
}

/// Wire services from configuration.
///
/// Persistent wiring requires both `DATABASE_URL` and `REDIS_URL` plus the
/// `redis` feature; anything less falls back to in-memory wiring.
pub async fn build_services(config: &AppConfig) -> (AppServices, Vec<WorkerHandle>) {
    #[cfg(feature = "redis")]
    if let (Some(db), Some(bus)) = (&config.database, &config.bus) {
        match build_persistent(db, bus).await {
            Ok(pair) => return pair,
            Err(e) => {
                tracing::error!(error = %e, "failed to build persistent services");
                std::process::exit(1);
            }
        }
    }

    let _ = config;
    tracing::warn!("persistent wiring not configured; using in-memory services");
    build_in_memory()
}

/// In-memory wiring: std channel bus, in-memory store and dead-letter sink,
/// one consumer worker per entity.
pub fn build_in_memory() -> (AppServices, Vec<WorkerHandle>) {
    let bus = Arc::new(InMemoryEventBus::new());
    let store = Arc::new(InMemoryEntityStore::new());
    let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
    let runtime = tokio::runtime::Handle::current();

    let workers = vec![
        ConsumerWorker::spawn(
            "users-consumer",
            &bus,
            SubscriptionFilter::mutations(),
            runtime.clone(),
            MutationConsumer::users(Arc::clone(&store), Arc::clone(&dead_letters)),
        ),
        ConsumerWorker::spawn(
            "restaurants-consumer",
            &bus,
            SubscriptionFilter::mutations(),
            runtime,
            MutationConsumer::restaurants(Arc::clone(&store), Arc::clone(&dead_letters)),
        ),
    ];

    let services = AppServices::InMemory {
        builder: EnvelopeBuilder::new(),
        bus,
        store,
        dead_letters,
    };
    (services, workers)
}

/// Persistent wiring: Redis Streams bus with named consumer groups, Postgres
/// store and dead-letter table.
#[cfg(feature = "redis")]
pub async fn build_persistent(
    db: &DatabaseConfig,
    bus_config: &BusConfig,
) -> Result<(AppServices, Vec<WorkerHandle>), BuildError> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(&db.url)
        .await?;

    let bus = Arc::new(RedisStreamsEventBus::new(
        &bus_config.redis_url,
        Some(bus_config.stream_key.clone()),
        Some(bus_config.dlq_key.clone()),
    )?);
    let store = Arc::new(PostgresEntityStore::new(pool.clone()));
    let dead_letters = Arc::new(PostgresDeadLetterSink::new(pool));
    let runtime = tokio::runtime::Handle::current();

    let workers = vec![
        ConsumerWorker::spawn_on(
            "users-consumer",
            bus.subscribe_with_group("users-consumer", "api", SubscriptionFilter::mutations()),
            runtime.clone(),
            MutationConsumer::users(Arc::clone(&store), Arc::clone(&dead_letters)),
        ),
        ConsumerWorker::spawn_on(
            "restaurants-consumer",
            bus.subscribe_with_group(
                "restaurants-consumer",
                "api",
                SubscriptionFilter::mutations(),
            ),
            runtime,
            MutationConsumer::restaurants(Arc::clone(&store), Arc::clone(&dead_letters)),
        ),
    ];

    let services = AppServices::Persistent {
        builder: EnvelopeBuilder::new(),
        bus,
        store,
        dead_letters,
    };
    Ok((services, workers))
}
