#![forbid(unsafe_code)]
//! The Anchor Queue (spec.md §4.C): durable-first, best-effort dispatch of
//! outbox rows to the worker pool's in-memory channel.

use anchor_core::{
    AnchorResult, AppId, Digest, IdempotencyKey, OutboxId, BACKOFF_BASE_MS, MAX_DISPATCH_ATTEMPTS,
};
use anchor_db::OutboxStore;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, warn};

/// A dispatch-layer job descriptor. Job identity is derived from
/// `(outboxId, digest)` so a dispatcher that already holds the job safely
/// rejects a duplicate re-submission from the Reconciler (spec.md §4.E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchJob {
    pub outbox_id: OutboxId,
    pub digest: Digest,
    pub idempotency_key: IdempotencyKey,
}

/// One input to [`AnchorQueue::enqueue`].
pub struct EnqueueInput {
    pub app_id: AppId,
    pub region: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Per-input result of [`AnchorQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub id: OutboxId,
    pub digest: Digest,
    pub idempotency_key: IdempotencyKey,
    pub deduped: bool,
    /// Whether the in-memory dispatch succeeded. `false` is not an error —
    /// the row stays `pending` and the Reconciler will pick it up.
    pub dispatched: bool,
}

/// Durable-first, best-effort dispatcher: `write`s to the Outbox before
/// ever touching the in-memory channel, matching the channel-backed queue
/// idiom used by the teacher's mock DA service mempool.
#[derive(Clone)]
pub struct AnchorQueue {
    store: OutboxStore,
    sender: mpsc::Sender<DispatchJob>,
}

impl AnchorQueue {
    /// Builds a queue with the given channel capacity, returning the
    /// receiving half for the worker pool to drain.
    pub fn new(store: OutboxStore, capacity: usize) -> (Self, mpsc::Receiver<DispatchJob>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { store, sender }, receiver)
    }

    /// Writes each event to the Outbox (durable first), then attempts to
    /// dispatch an in-memory job descriptor referencing it. Dispatch
    /// failure never fails the call — the Outbox is the source of truth.
    pub async fn enqueue(&self, events: Vec<EnqueueInput>) -> AnchorResult<Vec<EnqueueOutcome>> {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            let outcome = self.store.write(
                event.app_id,
                event.region,
                event.event_type,
                event.payload,
                event.idempotency_key,
            )?;

            let job = DispatchJob {
                outbox_id: outcome.id.clone(),
                digest: outcome.digest,
                idempotency_key: outcome.idempotency_key.clone(),
            };
            let dispatched = self.try_dispatch(job).await;
            if dispatched {
                self.store.mark_enqueued(&outcome.id)?;
            }

            out.push(EnqueueOutcome {
                id: outcome.id,
                digest: outcome.digest,
                idempotency_key: outcome.idempotency_key,
                deduped: outcome.deduped,
                dispatched,
            });
        }
        Ok(out)
    }

    /// Re-submits a job for a row the Reconciler found still `pending` (or
    /// newly reclaimed from a stale lease). Safe to call even if a prior
    /// dispatch for the same `(outboxId, digest)` is still in flight: the
    /// worker pool's own state checks (the row is re-fetched by id before
    /// handling) make a duplicate in-channel job a no-op rather than a
    /// double external effect.
    pub async fn resubmit(&self, job: DispatchJob) -> bool {
        let outbox_id = job.outbox_id.clone();
        let dispatched = self.try_dispatch(job).await;
        if dispatched {
            if let Err(err) = self.store.mark_enqueued(&outbox_id) {
                warn!(outbox_id = %outbox_id, error = %err, "anchor-queue: resubmit could not mark row enqueued");
            }
        }
        dispatched
    }

    /// Submits `job` with exponential backoff on a full channel, capped at
    /// [`MAX_DISPATCH_ATTEMPTS`]. A closed channel (no worker pool
    /// attached) fails immediately without retrying.
    async fn try_dispatch(&self, job: DispatchJob) -> bool {
        for attempt in 0..MAX_DISPATCH_ATTEMPTS {
            match self.sender.try_send(job.clone()) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(outbox_id = %job.outbox_id, "anchor-queue: dispatch channel closed");
                    return false;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let delay = BACKOFF_BASE_MS * 2u64.pow(attempt);
                    debug!(
                        outbox_id = %job.outbox_id,
                        attempt,
                        delay_ms = delay,
                        "anchor-queue: dispatch channel full, backing off"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
        warn!(outbox_id = %job.outbox_id, "anchor-queue: dispatch exhausted all attempts");
        false
    }
}

#[cfg(test)]
mod tests {
    use anchor_core::AppId;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn open_store() -> (tempfile::TempDir, OutboxStore) {
        let dir = tempdir().unwrap();
        let store = OutboxStore::with_path(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn enqueue_writes_durable_row_and_dispatches() {
        let (_dir, store) = open_store();
        let (queue, mut receiver) = AnchorQueue::new(store.clone(), 16);

        let outcomes = queue
            .enqueue(vec![EnqueueInput {
                app_id: AppId::from("atlas"),
                region: "us".into(),
                event_type: "message".into(),
                payload: json!({"id": "e1"}),
                idempotency_key: None,
            }])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].dispatched);
        assert!(!outcomes[0].deduped);

        let row = store.get(&outcomes[0].id).unwrap().unwrap();
        assert_eq!(row.state, anchor_core::OutboxState::Enqueued);

        let job = receiver.try_recv().unwrap();
        assert_eq!(job.outbox_id, outcomes[0].id);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_failure_leaves_row_pending() {
        let (_dir, store) = open_store();
        // Capacity 1, pre-fill the channel so the real enqueue call can't
        // dispatch and must back off until attempts are exhausted. Virtual
        // time is paused and auto-advanced so the backoff sleeps resolve
        // instantly instead of taking real seconds.
        let (queue, _receiver) = AnchorQueue::new(store.clone(), 1);
        queue
            .sender
            .try_send(DispatchJob {
                outbox_id: OutboxId::from("filler"),
                digest: Digest(anchor_core::merkle::ZERO_HASH),
                idempotency_key: IdempotencyKey::from("filler"),
            })
            .unwrap();

        let outcomes = queue
            .enqueue(vec![EnqueueInput {
                app_id: AppId::from("atlas"),
                region: "us".into(),
                event_type: "message".into(),
                payload: json!({"id": "e2"}),
                idempotency_key: None,
            }])
            .await
            .unwrap();

        assert!(!outcomes[0].dispatched);
        let row = store.get(&outcomes[0].id).unwrap().unwrap();
        assert_eq!(row.state, anchor_core::OutboxState::Pending);
    }
}
