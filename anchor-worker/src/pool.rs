//! The Anchor Worker Pool (spec.md §4.D): a bounded-concurrency pool of
//! consumers draining [`anchor_queue::DispatchJob`]s off the Anchor Queue's
//! channel, each under a lease/heartbeat with retry and dead-letter
//! handling.

use std::sync::Arc;
use std::time::Duration;

use anchor_core::{AnchorBus, AnchorBusEvent, OutboxState, DEFAULT_CONCURRENCY, HEARTBEAT_INTERVAL_MS, MAX_RETRIES};
use anchor_db::OutboxStore;
use anchor_queue::DispatchJob;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::handler::AnchorHandler;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: MAX_RETRIES,
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// Drives jobs off the Anchor Queue's channel through the per-job state
/// machine `assigned -> running (heartbeating) -> {completed | failed(retry)
/// | failed(dead_letter)}` (spec.md §4.D), bounded to `concurrency`
/// concurrent jobs via a semaphore.
pub struct WorkerPool<H: AnchorHandler + 'static> {
    store: OutboxStore,
    handler: Arc<H>,
    bus: AnchorBus,
    config: WorkerPoolConfig,
    semaphore: Arc<Semaphore>,
}

impl<H: AnchorHandler + 'static> WorkerPool<H> {
    pub fn new(store: OutboxStore, handler: Arc<H>, bus: AnchorBus, config: WorkerPoolConfig) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Arc::new(Self {
            store,
            handler,
            bus,
            config,
            semaphore,
        })
    }

    /// Drains `receiver` until it closes, running up to `concurrency` jobs
    /// concurrently. Returns once every in-flight job has finished.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<DispatchJob>) {
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                job = receiver.recv() => {
                    let Some(job) = job else { break };
                    let permit = Arc::clone(&self.semaphore)
                        .acquire_owned()
                        .await
                        .expect("semaphore is never closed");
                    let this = Arc::clone(&self);
                    in_flight.spawn(async move {
                        this.process_job(job).await;
                        drop(permit);
                    });
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }
        while in_flight.join_next().await.is_some() {}
        info!("anchor-worker: dispatch channel closed, pool drained");
    }

    async fn process_job(&self, job: DispatchJob) {
        if let Err(err) = self.store.mark_processing(&job.outbox_id) {
            warn!(outbox_id = %job.outbox_id, error = %err, "anchor-worker: mark_processing failed");
            return;
        }

        let heartbeat = self.spawn_heartbeat(job.outbox_id.clone());

        let row = match self.store.get(&job.outbox_id) {
            Ok(Some(row)) => row,
            Ok(None) => {
                // Another worker already completed this row between
                // dispatch and lease acquisition; nothing to do.
                debug!(outbox_id = %job.outbox_id, "anchor-worker: row no longer present, skipping");
                heartbeat.abort();
                return;
            }
            Err(err) => {
                warn!(outbox_id = %job.outbox_id, error = %err, "anchor-worker: failed to fetch canonical row");
                heartbeat.abort();
                return;
            }
        };

        let app_id = row.app_id.clone();
        let result = self.handler.handle(&row).await;
        heartbeat.abort();

        match result {
            Ok(tx_hash_or_event_id) => {
                if let Err(err) = self.store.mark_completed(&job.outbox_id, &job.idempotency_key, tx_hash_or_event_id) {
                    warn!(outbox_id = %job.outbox_id, error = %err, "anchor-worker: mark_completed failed");
                }
            }
            Err(err) => match self.store.mark_failed(&job.outbox_id, err.to_string(), self.config.max_retries) {
                Ok(OutboxState::DeadLetter) => {
                    self.bus.publish(AnchorBusEvent::EventDeadLettered {
                        outbox_id: job.outbox_id,
                        app_id,
                        idempotency_key: job.idempotency_key,
                        error: err.to_string(),
                    });
                }
                Ok(_) => {
                    debug!(outbox_id = %job.outbox_id, error = %err, "anchor-worker: job failed, scheduled for retry");
                }
                Err(mark_err) => {
                    warn!(outbox_id = %job.outbox_id, error = %mark_err, "anchor-worker: mark_failed itself failed");
                }
            },
        }
    }

    /// Starts a cancellable ticker that refreshes `heartbeatAt` until
    /// aborted, tied to the job's lifetime (spec.md §4.D step 2, §5
    /// "Cancellation and timeouts").
    fn spawn_heartbeat(&self, outbox_id: anchor_core::OutboxId) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; mark_processing already stamped it
            loop {
                ticker.tick().await;
                if let Err(err) = store.update_heartbeat(&outbox_id) {
                    warn!(outbox_id = %outbox_id, error = %err, "anchor-worker: heartbeat refresh failed");
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use anchor_core::{AppId, OutboxState};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::handler::AnchorHandler;

    fn open_store() -> (tempfile::TempDir, OutboxStore) {
        let dir = tempdir().unwrap();
        (dir, OutboxStore::with_path(dir.path()).unwrap())
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl AnchorHandler for AlwaysSucceeds {
        async fn handle(&self, event: &anchor_core::OutboxEvent) -> anchor_core::AnchorResult<String> {
            Ok(format!("handled-{}", event.id))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl AnchorHandler for AlwaysFails {
        async fn handle(&self, _event: &anchor_core::OutboxEvent) -> anchor_core::AnchorResult<String> {
            Err(anchor_core::AnchorError::WorkerExecution("boom".into()))
        }
    }

    #[tokio::test]
    async fn successful_job_completes_and_creates_receipt() {
        let (_dir, store) = open_store();
        let outcome = store
            .write(AppId::from("atlas"), "us".into(), "message".into(), json!({"id": "e1"}), None)
            .unwrap();

        let (sender, receiver) = mpsc::channel(4);
        let pool = WorkerPool::new(store.clone(), Arc::new(AlwaysSucceeds), AnchorBus::new(16), WorkerPoolConfig::default());
        sender
            .send(DispatchJob {
                outbox_id: outcome.id.clone(),
                digest: outcome.digest,
                idempotency_key: outcome.idempotency_key.clone(),
            })
            .await
            .unwrap();
        drop(sender);

        pool.run(receiver).await;

        let row = store.get(&outcome.id).unwrap().unwrap();
        assert_eq!(row.state, OutboxState::Completed);
        assert!(store.get_receipt_by_key(&outcome.idempotency_key).unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_job_past_max_retries_dead_letters_and_publishes() {
        let (_dir, store) = open_store();
        let outcome = store
            .write(AppId::from("atlas"), "us".into(), "message".into(), json!({"id": "e1"}), None)
            .unwrap();
        // Pre-set retry_count to one below the default ceiling so this single
        // failure is the one that crosses it.
        for _ in 0..MAX_RETRIES - 1 {
            store.mark_failed(&outcome.id, "prior".into(), MAX_RETRIES).unwrap();
        }

        let bus = AnchorBus::new(16);
        let mut subscriber = bus.subscribe();
        let (sender, receiver) = mpsc::channel(4);
        let pool = WorkerPool::new(store.clone(), Arc::new(AlwaysFails), bus, WorkerPoolConfig::default());
        sender
            .send(DispatchJob {
                outbox_id: outcome.id.clone(),
                digest: outcome.digest,
                idempotency_key: outcome.idempotency_key.clone(),
            })
            .await
            .unwrap();
        drop(sender);

        pool.run(receiver).await;

        let row = store.get(&outcome.id).unwrap().unwrap();
        assert_eq!(row.state, OutboxState::DeadLetter);

        let event = subscriber.try_recv().unwrap();
        assert!(matches!(event, AnchorBusEvent::EventDeadLettered { .. }));
    }

    #[tokio::test]
    async fn missing_row_is_skipped_cleanly() {
        let (_dir, store) = open_store();
        let (sender, receiver) = mpsc::channel(4);
        let pool = WorkerPool::new(store.clone(), Arc::new(AlwaysSucceeds), AnchorBus::new(16), WorkerPoolConfig::default());
        sender
            .send(DispatchJob {
                outbox_id: anchor_core::OutboxId::from("missing"),
                digest: anchor_core::Digest(anchor_core::merkle::ZERO_HASH),
                idempotency_key: anchor_core::IdempotencyKey::from("missing"),
            })
            .await
            .unwrap();
        drop(sender);

        // Should not panic even though mark_processing fails for a row that
        // was never written.
        pool.run(receiver).await;
    }
}
