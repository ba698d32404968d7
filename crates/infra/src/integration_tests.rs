//! End-to-end pipeline tests over in-memory implementations:
//! builder -> bus -> consumer workers -> read service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dinesync_events::{
    EnvelopeBuilder, EventBus, InMemoryEventBus, MutationRequest, SubscriptionFilter,
};

use crate::consumers::{InMemoryDeadLetterSink, MutationConsumer};
use crate::read::ReadService;
use crate::store::InMemoryEntityStore;
use crate::worker::{ConsumerWorker, WorkerHandle};

struct Pipeline {
    builder: EnvelopeBuilder,
    bus: Arc<InMemoryEventBus>,
    store: Arc<InMemoryEntityStore>,
    dead_letters: Arc<InMemoryDeadLetterSink>,
    workers: Vec<WorkerHandle>,
}

impl Pipeline {
    fn start() -> Self {
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

        Self {
            builder: EnvelopeBuilder::new(),
            bus,
            store,
            dead_letters,
            workers,
        }
    }

    fn submit(&self, request: MutationRequest) {
        let (envelope, _ack) = self.builder.build(request).unwrap();
        self.bus.publish(envelope).unwrap();
    }

    fn reads(&self) -> ReadService<Arc<InMemoryEntityStore>> {
        ReadService::new(Arc::clone(&self.store))
    }

    fn stop(self) {
        for worker in self.workers {
            worker.shutdown();
        }
    }
}

async fn wait_until(deadline_secs: u64, mut check: impl AsyncFnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(deadline_secs);
    loop {
        if check().await {
            return;
        }
        assert!(Instant::now() < deadline, "condition not met before deadline");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn created_restaurant_is_eventually_readable() {
    let pipeline = Pipeline::start();

    pipeline.submit(MutationRequest::CreateRestaurant {
        id: "1".to_string(),
        name: "Cafe".to_string(),
        address: "1 Main St".to_string(),
        cuisine: "bistro".to_string(),
    });

    let reads = pipeline.reads();
    wait_until(5, async || {
        matches!(reads.all_restaurants().await, Ok(rows) if rows.len() == 1)
    })
    .await;

    let rows = reads.all_restaurants().await.unwrap();
    assert_eq!(rows[0].id, 1);
    assert_eq!(rows[0].name, "Cafe");
    assert!(pipeline.dead_letters.is_empty());

    pipeline.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_then_delete_converges_to_empty() {
    let pipeline = Pipeline::start();

    pipeline.submit(MutationRequest::CreateUser {
        id: "42".to_string(),
        name: "Alice".to_string(),
    });

    let reads = pipeline.reads();
    wait_until(5, async || {
        matches!(reads.all_users().await, Ok(rows) if rows.len() == 1)
    })
    .await;

    pipeline.submit(MutationRequest::DeleteUser {
        id: "42".to_string(),
    });
    wait_until(5, async || {
        matches!(reads.all_users().await, Ok(rows) if rows.is_empty())
    })
    .await;

    assert!(pipeline.dead_letters.is_empty());
    pipeline.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_mutation_lands_in_the_dead_letter_sink_not_the_store() {
    let pipeline = Pipeline::start();

    pipeline.submit(MutationRequest::CreateUser {
        id: "not-a-number".to_string(),
        name: "Alice".to_string(),
    });
    pipeline.submit(MutationRequest::CreateUser {
        id: "7".to_string(),
        name: "Bob".to_string(),
    });

    let reads = pipeline.reads();
    wait_until(5, async || {
        matches!(reads.all_users().await, Ok(rows) if rows.len() == 1)
    })
    .await;

    let rows = reads.all_users().await.unwrap();
    assert_eq!(rows[0].id, 7);
    // Only the users consumer resolves user mutations, so exactly one record.
    wait_until(5, async || pipeline.dead_letters.len() == 1).await;

    pipeline.stop();
}
