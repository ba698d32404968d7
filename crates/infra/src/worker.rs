//! Consumer worker loop.
//!
//! Bridges the bus's blocking subscription to the async consumer: a
//! dedicated thread drains envelopes into small batches and runs each batch
//! to completion on the provided runtime handle before pulling more. A batch
//! that cannot be terminally resolved is logged and left to the bus's
//! redelivery mechanism (applied entries are idempotent, so redelivery is
//! safe).

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use dinesync_events::{EventBus, EventEnvelope, SubscriptionFilter};

use crate::consumers::MutationConsumer;
use crate::consumers::dead_letter::DeadLetterSink;
use crate::store::EntityStore;

/// Envelopes drained per batch invocation.
const MAX_BATCH: usize = 16;

/// Poll tick for shutdown checks.
const TICK: Duration = Duration::from_millis(250);

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Spawns consumer worker threads.
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Spawn a worker thread feeding `consumer` from a bus subscription.
    ///
    /// The worker owns the subscription; the consumer owns idempotency.
    pub fn spawn<B, S, D>(
        name: &'static str,
        bus: &B,
        filter: SubscriptionFilter,
        runtime: tokio::runtime::Handle,
        consumer: MutationConsumer<S, D>,
    ) -> WorkerHandle
    where
        B: EventBus,
        S: EntityStore + Send + Sync + 'static,
        D: DeadLetterSink + Send + Sync + 'static,
    {
        Self::spawn_on(name, bus.subscribe(filter), runtime, consumer)
    }

    /// Spawn a worker thread over an already-established subscription.
    ///
    /// Used when the subscription carries transport state the bus trait
    /// cannot express, e.g. a durable consumer group.
    pub fn spawn_on<S, D>(
        name: &'static str,
        sub: dinesync_events::Subscription,
        runtime: tokio::runtime::Handle,
        consumer: MutationConsumer<S, D>,
    ) -> WorkerHandle
    where
        S: EntityStore + Send + Sync + 'static,
        D: DeadLetterSink + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, runtime, consumer))
            .expect("failed to spawn consumer worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn worker_loop<S, D>(
    name: &'static str,
    sub: dinesync_events::Subscription,
    shutdown_rx: mpsc::Receiver<()>,
    runtime: tokio::runtime::Handle,
    consumer: MutationConsumer<S, D>,
) where
    S: EntityStore,
    D: DeadLetterSink,
{
    info!(worker = name, "consumer worker started");

    loop {
        // Shutdown check (non-blocking).
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let mut batch: Vec<EventEnvelope> = Vec::new();
        match sub.recv_timeout(TICK) {
            Ok(envelope) => batch.push(envelope),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        // Drain whatever else is already queued, up to the batch cap.
        while batch.len() < MAX_BATCH {
            match sub.try_recv() {
                Ok(envelope) => batch.push(envelope),
                Err(_) => break,
            }
        }

        match runtime.block_on(consumer.process_batch(&batch)) {
            Ok(report) => {
                if !report.fully_applied() {
                    warn!(
                        worker = name,
                        dead_lettered = report.dead_lettered(),
                        applied = report.applied(),
                        "batch partially failed; failures dead-lettered"
                    );
                }
            }
            Err(err) => {
                warn!(
                    worker = name,
                    error = %err,
                    batch_len = batch.len(),
                    "batch not terminally resolved; relying on bus redelivery"
                );
            }
        }
    }

    info!(worker = name, "consumer worker stopped");
}
