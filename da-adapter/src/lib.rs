#![forbid(unsafe_code)]
//! The Data Availability Adapter (spec.md §4.G): FIFO batch publication,
//! inline calldata or blob.

mod serialize;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anchor_core::merkle::keccak256;
use anchor_core::{AnchorBus, AnchorBusEvent, DaPublicationMethod, DEFAULT_MAX_CALLDATA_SIZE};
use chain_provider::{BlobParams, ChainProvider, TxRequest};
use ethers_core::types::Address;
use sequencer::Batch;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

pub use serialize::{serialize_batch, BatchData, BatchEventSummary};

/// Size in bytes of a single EIP-4844 blob (4096 field elements * 32 bytes),
/// used to pad blob payloads before hashing a versioned-hash placeholder.
pub const BLOB_SIZE_BYTES: usize = 131_072;

/// Default `maxFeePerBlobGas`, 1 gwei. The spec does not name a concrete
/// default; operators are expected to override this from current network
/// conditions.
pub const DEFAULT_MAX_FEE_PER_BLOB_GAS: u128 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct DaAdapterConfig {
    pub enable_blob_storage: bool,
    pub max_calldata_size: usize,
    pub target_address: Address,
}

impl DaAdapterConfig {
    pub fn new(target_address: Address) -> Self {
        Self {
            enable_blob_storage: false,
            max_calldata_size: DEFAULT_MAX_CALLDATA_SIZE,
            target_address,
        }
    }
}

/// Point-in-time snapshot of the DA queue's depth, the `queueSize` stat
/// spec.md §5 ("Backpressure") says operators should monitor to decide
/// when to shed load upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaAdapterStats {
    pub queue_size: usize,
}

/// FIFO publication queue with a single-flight processor, mirroring
/// `adapters/mock-da`'s `Arc<Mutex<Receiver<_>>>` pattern: multiple callers
/// may hold a cloned `DaAdapter`, but only one processing loop ever runs.
/// The channel is unbounded: per spec.md §5, the DA queue "grows unbounded
/// in memory" rather than applying back-pressure to `submit_batch`'s
/// caller, and `queue_size`/`stats` expose the depth so operators can shed
/// load upstream instead.
pub struct DaAdapter<C: ChainProvider> {
    config: DaAdapterConfig,
    chain: Arc<C>,
    bus: AnchorBus,
    sender: mpsc::UnboundedSender<Batch>,
    receiver: AsyncMutex<Option<mpsc::UnboundedReceiver<Batch>>>,
    processor_started: AtomicBool,
    queue_depth: AtomicUsize,
}

impl<C: ChainProvider + 'static> DaAdapter<C> {
    pub fn new(config: DaAdapterConfig, chain: Arc<C>, bus: AnchorBus) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            chain,
            bus,
            sender,
            receiver: AsyncMutex::new(Some(receiver)),
            processor_started: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
        })
    }

    /// Enqueues `batch` and lazily starts the single-flight processor task
    /// on first use. Never blocks the caller: the channel is unbounded, so
    /// a stalled processor grows `queue_size` instead of applying
    /// back-pressure (spec.md §5).
    pub async fn submit_batch(self: &Arc<Self>, batch: Batch) {
        if self
            .processor_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_processor().await });
        }
        if self.sender.send(batch).is_err() {
            warn!("da-adapter: processor task is gone, batch dropped before queueing");
        } else {
            self.queue_depth.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Current queue depth: batches submitted but not yet published.
    pub fn queue_size(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    /// Snapshot of monitorable queue stats (spec.md §5).
    pub fn stats(&self) -> DaAdapterStats {
        DaAdapterStats {
            queue_size: self.queue_size(),
        }
    }

    async fn run_processor(self: Arc<Self>) {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .expect("run_processor must only be started once");
        while let Some(batch) = receiver.recv().await {
            self.publish_one(batch).await;
            self.queue_depth.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn publish_one(&self, batch: Batch) {
        let bytes = serialize_batch(&batch);
        let size = bytes.len();

        let (request, method) = if self.config.enable_blob_storage && size > self.config.max_calldata_size {
            let mut padded = bytes.clone();
            padded.resize(BLOB_SIZE_BYTES, 0);
            let versioned_hash = keccak256(&padded);
            let blob = BlobParams {
                max_fee_per_blob_gas: DEFAULT_MAX_FEE_PER_BLOB_GAS,
                blob_versioned_hashes: vec![versioned_hash],
            };
            (
                TxRequest::blob_carrying(self.config.target_address, bytes, blob),
                DaPublicationMethod::Blob,
            )
        } else {
            (
                TxRequest::calldata(self.config.target_address, bytes),
                DaPublicationMethod::Calldata,
            )
        };

        match self.chain.send_transaction(request).await {
            Ok(tx_hash) => {
                info!(batch_id = %batch.id, tx_hash = %tx_hash, size, "da-adapter: batch published");
                self.bus.publish(AnchorBusEvent::BatchSubmitted {
                    batch_id: batch.id,
                    tx_hash,
                    method,
                    size_bytes: size,
                });
            }
            Err(err) => {
                // The failed batch is dropped from the DA queue; its anchor
                // commitment already lives on-chain via the Sequencer
                // (spec.md §4.G/§9).
                warn!(batch_id = %batch.id, error = %err, "da-adapter: publication failed, dropping batch");
                self.bus.publish(AnchorBusEvent::BatchPublicationFailed {
                    batch_id: batch.id,
                    error: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anchor_core::{AppId, EventId, EventKind};
    use chain_provider::MockChainProvider;
    use serde_json::json;

    use super::*;

    fn batch() -> Batch {
        Batch {
            id: "batch-1".into(),
            events: vec![sequencer_event()],
            merkle_root: [7u8; 32],
            start_time: 1,
            end_time: 1,
            event_count: 1,
        }
    }

    fn sequencer_event() -> anchor_core::AnchorEvent {
        anchor_core::AnchorEvent {
            id: EventId::from("e1"),
            app_id: AppId::from("atlas"),
            event_type: EventKind::Message,
            timestamp: 1,
            user_id: Some("u1".into()),
            data: json!({"text": "hi"}),
            signature: None,
        }
    }

    #[tokio::test]
    async fn small_batch_publishes_as_calldata() {
        let chain = Arc::new(MockChainProvider::new());
        let adapter = DaAdapter::new(DaAdapterConfig::new(Address::zero()), chain.clone(), AnchorBus::new(16));
        let mut subscriber = adapter.bus.subscribe();

        adapter.submit_batch(batch()).await;

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            AnchorBusEvent::BatchSubmitted { method, .. } => {
                assert_eq!(method, DaPublicationMethod::Calldata)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_batch_with_blob_enabled_publishes_as_blob() {
        let chain = Arc::new(MockChainProvider::new());
        let mut config = DaAdapterConfig::new(Address::zero());
        config.enable_blob_storage = true;
        config.max_calldata_size = 4; // force any real batch over the threshold
        let adapter = DaAdapter::new(config, chain.clone(), AnchorBus::new(16));
        let mut subscriber = adapter.bus.subscribe();

        adapter.submit_batch(batch()).await;

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            AnchorBusEvent::BatchSubmitted { method, .. } => assert_eq!(method, DaPublicationMethod::Blob),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publication_failure_emits_failed_event_and_continues() {
        let chain = Arc::new(MockChainProvider::new());
        chain.fail_next_send();
        let adapter = DaAdapter::new(DaAdapterConfig::new(Address::zero()), chain.clone(), AnchorBus::new(16));
        let mut subscriber = adapter.bus.subscribe();

        adapter.submit_batch(batch()).await;
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AnchorBusEvent::BatchPublicationFailed { .. }));

        // The queue continues with the next item.
        adapter.submit_batch(batch()).await;
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AnchorBusEvent::BatchSubmitted { .. }));
    }

    #[tokio::test]
    async fn queue_size_tracks_pending_batches() {
        let chain = Arc::new(MockChainProvider::new());
        let adapter = DaAdapter::new(DaAdapterConfig::new(Address::zero()), chain, AnchorBus::new(16));
        let mut subscriber = adapter.bus.subscribe();

        assert_eq!(adapter.queue_size(), 0);
        adapter.submit_batch(batch()).await;
        assert_eq!(adapter.stats(), DaAdapterStats { queue_size: 1 });

        tokio::time::timeout(std::time::Duration::from_secs(1), subscriber.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adapter.queue_size(), 0);
    }
}
