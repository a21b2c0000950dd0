#![forbid(unsafe_code)]
//! The Bridge Relay (spec.md §4.I): cross-chain receipt emission with a
//! confirmation-depth watcher.

mod registry;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anchor_core::merkle::canonical_json;
use anchor_core::{AnchorBus, AnchorBusEvent, CrossChainStatus, DEFAULT_CONFIRMATION_BLOCKS};
use chain_provider::{ChainProvider, TxRequest};
use ethers_core::types::Address;
use tokio::sync::watch;
use tracing::{info, warn};

pub use registry::encode_emit_receipt_call;

const CONFIRMATION_POLL_INTERVAL_MS: u64 = 15_000;
const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 5;

#[derive(Debug, Clone)]
pub struct RelayReceiptInput {
    pub receipt_id: String,
    pub source_chain: String,
    pub target_chain: String,
    pub data: serde_json::Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct CrossChainReceipt {
    pub receipt_id: String,
    pub source_chain: String,
    pub target_chain: String,
    pub data: serde_json::Value,
    pub timestamp: i64,
    pub status: CrossChainStatus,
    pub source_tx_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub confirmation_blocks: u64,
    pub bridge_contract: Address,
}

impl BridgeConfig {
    pub fn new(bridge_contract: Address) -> Self {
        Self {
            confirmation_blocks: DEFAULT_CONFIRMATION_BLOCKS,
            bridge_contract,
        }
    }
}

/// Cross-chain receipts live in memory with a watcher timer; cancellation
/// is guaranteed on completion, failure, or `cleanup` (spec.md §3/§4.I).
pub struct BridgeRelay<Src: ChainProvider, Tgt: ChainProvider> {
    config: BridgeConfig,
    source_chain: Arc<Src>,
    target_chain: Arc<Tgt>,
    bus: AnchorBus,
    receipts: Mutex<HashMap<String, CrossChainReceipt>>,
    watchers: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl<Src: ChainProvider + 'static, Tgt: ChainProvider + 'static> BridgeRelay<Src, Tgt> {
    pub fn new(config: BridgeConfig, source_chain: Arc<Src>, target_chain: Arc<Tgt>, bus: AnchorBus) -> Arc<Self> {
        Arc::new(Self {
            config,
            source_chain,
            target_chain,
            bus,
            receipts: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        })
    }

    /// Encodes and emits the receipt through the source chain's bridge
    /// contract. On success, starts a confirmation watcher against the
    /// target chain; on failure, transitions the receipt to `failed`
    /// immediately.
    pub async fn relay_receipt(self: &Arc<Self>, input: RelayReceiptInput) {
        let encoded_data = canonical_json(&input.data);
        let calldata = encode_emit_receipt_call(&input.receipt_id, &input.target_chain, &encoded_data);
        let request = TxRequest::calldata(self.config.bridge_contract, calldata);

        let mut receipt = CrossChainReceipt {
            receipt_id: input.receipt_id.clone(),
            source_chain: input.source_chain,
            target_chain: input.target_chain,
            data: input.data,
            timestamp: input.timestamp,
            status: CrossChainStatus::Pending,
            source_tx_hash: None,
        };

        match self.source_chain.send_transaction(request).await {
            Ok(tx_hash) => {
                receipt.source_tx_hash = Some(tx_hash.clone());
                self.receipts
                    .lock()
                    .expect("receipts lock poisoned")
                    .insert(input.receipt_id.clone(), receipt);
                info!(receipt_id = %input.receipt_id, tx_hash = %tx_hash, "bridge-relay: receipt emitted, starting watcher");
                self.start_watcher(input.receipt_id, tx_hash);
            }
            Err(err) => {
                warn!(receipt_id = %input.receipt_id, error = %err, "bridge-relay: emit failed");
                receipt.status = CrossChainStatus::Failed;
                self.receipts
                    .lock()
                    .expect("receipts lock poisoned")
                    .insert(input.receipt_id.clone(), receipt);
                self.bus.publish(AnchorBusEvent::ReceiptFailed {
                    receipt_id: input.receipt_id,
                    error: err.to_string(),
                });
            }
        }
    }

    /// Spawns a confirmation-depth watcher for `receipt_id`, polling the
    /// target chain on a fixed cadence until the transaction reaches
    /// `confirmationBlocks` (-> `confirmed`) or the poll fails past its
    /// retry budget (-> `failed`). The watcher is always removed from the
    /// map on exit, on either outcome.
    fn start_watcher(self: &Arc<Self>, receipt_id: String, tx_hash: String) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        self.watchers
            .lock()
            .expect("watchers lock poisoned")
            .insert(receipt_id.clone(), stop_tx);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            let mut ticker = tokio::time::interval(Duration::from_millis(CONFIRMATION_POLL_INTERVAL_MS));
            ticker.tick().await; // first tick fires immediately; skip it

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match this.target_chain.get_transaction(&tx_hash).await {
                            Ok(Some(info)) if info.confirmations >= this.config.confirmation_blocks => {
                                this.finish_receipt(&receipt_id, CrossChainStatus::Confirmed);
                                this.bus.publish(AnchorBusEvent::ReceiptConfirmed {
                                    receipt_id: receipt_id.clone(),
                                    outbox_id: None,
                                });
                                break;
                            }
                            Ok(_) => {
                                consecutive_failures = 0;
                            }
                            Err(err) => {
                                consecutive_failures += 1;
                                warn!(
                                    receipt_id = %receipt_id, error = %err, consecutive_failures,
                                    "bridge-relay: confirmation poll failed"
                                );
                                if consecutive_failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                                    let error = err.to_string();
                                    this.finish_receipt(&receipt_id, CrossChainStatus::Failed);
                                    this.bus.publish(AnchorBusEvent::ReceiptFailed {
                                        receipt_id: receipt_id.clone(),
                                        error,
                                    });
                                    break;
                                }
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        return;
                    }
                }
            }
            this.watchers.lock().expect("watchers lock poisoned").remove(&receipt_id);
        });
    }

    fn finish_receipt(&self, receipt_id: &str, status: CrossChainStatus) {
        if let Some(receipt) = self.receipts.lock().expect("receipts lock poisoned").get_mut(receipt_id) {
            receipt.status = status;
        }
    }

    /// Returns a snapshot of the receipt's current state, if known.
    pub fn get_receipt(&self, receipt_id: &str) -> Option<CrossChainReceipt> {
        self.receipts.lock().expect("receipts lock poisoned").get(receipt_id).cloned()
    }

    /// Cancels all running watchers and clears the in-memory map.
    pub fn cleanup(&self) {
        let mut watchers = self.watchers.lock().expect("watchers lock poisoned");
        for (_, stop) in watchers.drain() {
            let _ = stop.send(true);
        }
        self.receipts.lock().expect("receipts lock poisoned").clear();
    }
}
