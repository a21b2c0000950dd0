#![forbid(unsafe_code)]
//! The Sequencer (spec.md §4.F): in-memory batching, deterministic
//! ordering, Merkle-root computation, and Anchor Registry submission.

mod registry;

use std::sync::Arc;
use std::time::Duration;

use anchor_core::merkle::{leaf_hash, merkle_root, ZERO_HASH};
use anchor_core::{AnchorBus, AnchorBusEvent, AnchorEvent, DEFAULT_BATCH_INTERVAL_MS, DEFAULT_MAX_BATCH_SIZE};
use chain_provider::ChainProvider;
use ethers_core::types::Address;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};
use uuid::Uuid;

pub use registry::encode_anchor_bundle_call;

/// An ordered, hashed window of events (spec.md §3 "Batch"). Lives only in
/// the Sequencer's memory until anchored; the durable trace afterwards is
/// the `(merkleRoot, metadata)` on-chain plus the DA publication.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    pub events: Vec<AnchorEvent>,
    pub merkle_root: [u8; 32],
    pub start_time: i64,
    pub end_time: i64,
    pub event_count: usize,
}

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub batch_interval: Duration,
    pub max_batch_size: usize,
    pub anchor_registry_address: Address,
}

impl SequencerConfig {
    pub fn new(anchor_registry_address: Address) -> Self {
        Self {
            batch_interval: Duration::from_millis(DEFAULT_BATCH_INTERVAL_MS),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            anchor_registry_address,
        }
    }
}

/// A single scheduled loop per instance (spec.md §4.F). `is_processing` is
/// a non-blocking single-flight guard: `tokio::sync::Mutex::try_lock`
/// mirrors the source's `isProcessing` boolean more faithfully than an
/// awaited lock would, since an overlapping call should be skipped, not
/// queued.
pub struct Sequencer<C: ChainProvider> {
    config: SequencerConfig,
    chain: Arc<C>,
    bus: AnchorBus,
    queue: Mutex<Vec<AnchorEvent>>,
    is_processing: Mutex<()>,
    stop: Notify,
}

impl<C: ChainProvider + 'static> Sequencer<C> {
    pub fn new(config: SequencerConfig, chain: Arc<C>, bus: AnchorBus) -> Arc<Self> {
        Arc::new(Self {
            config,
            chain,
            bus,
            queue: Mutex::new(Vec::new()),
            is_processing: Mutex::new(()),
            stop: Notify::new(),
        })
    }

    /// Enqueues `event`; if the queue has reached `maxBatchSize`, forces an
    /// immediate batch and returns it.
    pub async fn add_event(&self, event: AnchorEvent) -> Option<Batch> {
        let should_force = {
            let mut queue = self.queue.lock().await;
            queue.push(event);
            queue.len() >= self.config.max_batch_size
        };
        if should_force {
            self.force_batch_creation().await
        } else {
            None
        }
    }

    /// Runs the scheduled loop: on every tick of `batchInterval`, forms a
    /// batch if one is due. Returns when `stop` is signalled.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.batch_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.force_batch_creation().await;
                }
                _ = self.stop.notified() => {
                    info!("sequencer: stop signal received, exiting loop");
                    return;
                }
            }
        }
    }

    /// Signals [`Self::run`] to return after its current tick.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// The configured tick period, for callers that drive their own loop
    /// around [`Self::force_batch_creation`] instead of [`Self::run`] (e.g.
    /// to route forced batches onward to a downstream publisher).
    pub fn batch_interval(&self) -> Duration {
        self.config.batch_interval
    }

    /// Signals a running [`Self::run`] loop, or an equivalent caller-driven
    /// loop built on [`Self::batch_interval`], to stop on its next check.
    pub fn stop_signal(&self) -> &tokio::sync::Notify {
        &self.stop
    }

    /// Drains up to `maxBatchSize` events, sorts them, computes the Merkle
    /// root, and submits to the Anchor Registry. Returns `None` if another
    /// call is already in flight or the queue was empty (an empty batch is
    /// never emitted, spec.md §3/§8).
    pub async fn force_batch_creation(&self) -> Option<Batch> {
        let Ok(_guard) = self.is_processing.try_lock() else {
            return None;
        };

        let mut events = {
            let mut queue = self.queue.lock().await;
            let drain_count = queue.len().min(self.config.max_batch_size);
            queue.drain(..drain_count).collect::<Vec<_>>()
        };
        if events.is_empty() {
            return None;
        }

        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let leaves: Vec<[u8; 32]> = events.iter().map(leaf_hash).collect();
        let root = merkle_root(&leaves);
        debug_assert_ne!(root, ZERO_HASH, "non-empty event set must not hash to the zero sentinel");

        let batch = Batch {
            id: Uuid::new_v4().to_string(),
            start_time: events.first().map(|e| e.timestamp).unwrap_or_default(),
            end_time: events.last().map(|e| e.timestamp).unwrap_or_default(),
            event_count: events.len(),
            merkle_root: root,
            events,
        };

        let root_hex = format!("0x{}", hex::encode(batch.merkle_root));
        self.bus.publish(AnchorBusEvent::BatchCreated {
            batch_id: batch.id.clone(),
            event_count: batch.event_count,
            merkle_root: root_hex.clone(),
        });

        let metadata = serde_json::json!({
            "batchId": batch.id,
            "startTime": batch.start_time,
            "endTime": batch.end_time,
        })
        .to_string();
        let calldata = encode_anchor_bundle_call(batch.merkle_root, batch.event_count as u64, &metadata);
        let request = chain_provider::TxRequest::calldata(self.config.anchor_registry_address, calldata);

        match self.chain.send_transaction(request).await {
            Ok(tx_hash) => {
                info!(batch_id = %batch.id, tx_hash = %tx_hash, event_count = batch.event_count, "sequencer: batch anchored");
                self.bus.publish(AnchorBusEvent::BatchAnchored {
                    batch_id: batch.id.clone(),
                    merkle_root: root_hex,
                    tx_hash,
                });
            }
            Err(err) => {
                // Per spec.md §4.F/§9: a batch that fails on-chain submission
                // is dropped from in-flight state, not retried here. The
                // events it contained are already durable upstream in the
                // Outbox; this loop is not the durability path.
                warn!(batch_id = %batch.id, error = %err, "sequencer: batch submission failed, dropping from in-flight state");
            }
        }

        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use anchor_core::{AppId, EventId, EventKind};
    use chain_provider::MockChainProvider;
    use serde_json::json;

    use super::*;

    fn event(id: &str, ts: i64) -> AnchorEvent {
        AnchorEvent {
            id: EventId::from(id),
            app_id: AppId::from("atlas"),
            event_type: EventKind::Message,
            timestamp: ts,
            user_id: None,
            data: json!({"id": id}),
            signature: None,
        }
    }

    fn sequencer() -> Arc<Sequencer<MockChainProvider>> {
        let config = SequencerConfig::new(Address::zero());
        Sequencer::new(config, Arc::new(MockChainProvider::new()), AnchorBus::new(16))
    }

    #[tokio::test]
    async fn merkle_root_is_independent_of_insertion_order() {
        let seq_a = sequencer();
        seq_a.add_event(event("b", 2)).await;
        seq_a.add_event(event("a", 1)).await;
        seq_a.add_event(event("c", 1)).await;
        let batch_a = seq_a.force_batch_creation().await.unwrap();

        let seq_b = sequencer();
        seq_b.add_event(event("a", 1)).await;
        seq_b.add_event(event("c", 1)).await;
        seq_b.add_event(event("b", 2)).await;
        let batch_b = seq_b.force_batch_creation().await.unwrap();

        assert_eq!(batch_a.merkle_root, batch_b.merkle_root);
        assert_eq!(
            batch_a.events.iter().map(|e| e.id.as_str().to_string()).collect::<Vec<_>>(),
            vec!["a", "c", "b"]
        );
    }

    #[tokio::test]
    async fn empty_queue_yields_no_batch() {
        let seq = sequencer();
        assert!(seq.force_batch_creation().await.is_none());
    }

    #[tokio::test]
    async fn max_batch_size_forces_synchronous_batch() {
        let config = SequencerConfig {
            max_batch_size: 2,
            ..SequencerConfig::new(Address::zero())
        };
        let seq = Sequencer::new(config, Arc::new(MockChainProvider::new()), AnchorBus::new(16));
        assert!(seq.add_event(event("a", 1)).await.is_none());
        let batch = seq.add_event(event("b", 2)).await.unwrap();
        assert_eq!(batch.event_count, 2);
    }
}
